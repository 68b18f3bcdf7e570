pub mod attempt;
pub mod audit;
pub mod dashboard;
pub mod health;
pub mod plan;
pub mod session;
pub mod sync;
pub mod sync_log;
pub mod user;
