/// Default lifetime of a session token in minutes
pub const DEFAULT_TOKEN_TTL_MINUTES: i64 = 60;

/// Clock skew tolerated when verifying tokens, in seconds
pub const TOKEN_LEEWAY_SECS: u64 = 10;

/// Lifetime of a delete-intent token in seconds
pub const DELETE_INTENT_TTL_SECS: i64 = 120;

/// Maximum length of stat type and rank labels (VARCHAR(50))
pub const MAX_LABEL_LEN: usize = 50;

/// Maximum length of names, emails and game modes (VARCHAR(255))
pub const MAX_NAME_LEN: usize = 255;

/// Default and maximum page size for stat listings
pub const DEFAULT_STAT_LIMIT: i64 = 100;
pub const MAX_STAT_LIMIT: i64 = 1000;

/// Singleton key of the dashboard state row
pub const DASHBOARD_STATE_ID: i32 = 1;
