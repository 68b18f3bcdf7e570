pub mod dashboard;
pub mod login_throttle;
pub mod plan_quota;
pub mod sync;
pub mod user_locks;
