/// Event types for security audit log
pub mod audit_events {
    // Authentication events
    pub const LOGIN_SUCCESS: &str = "login_success";
    pub const LOGIN_FAILED: &str = "login_failed";
    pub const LOGIN_LOCKED: &str = "login_locked";
    pub const LOGOUT: &str = "logout";
    pub const REGISTERED: &str = "registered";

    // Sync quota events
    pub const SYNC_CREATED: &str = "sync_created";
    pub const SYNC_LIMIT_REACHED: &str = "sync_limit_reached";
}
