pub mod attempt_store;
pub mod audit;
pub mod postgres_repository;
pub mod session;
pub mod sync;
pub mod user;
pub mod sync_log;
