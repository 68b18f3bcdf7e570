pub mod dashboard;
pub mod error;
pub mod health;
pub mod sync;
pub mod user;
