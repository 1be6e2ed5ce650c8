// Position thresholds (1-based) that trigger a "getting close" push,
// checked in ascending order.
pub const POSITION_THRESHOLDS: [(u32, &str); 2] = [(2, "pos_2"), (5, "pos_5")];

// Number of recently-served parties folded into the ETA moving average.
pub const ETA_HISTORY_WINDOW: usize = 20;

// In milliseconds.
pub const ETA_MIN_MS: i64 = 30_000;
pub const ETA_MAX_MS: i64 = 30 * 60 * 1000;
pub const ETA_PRIOR_MS: i64 = 5 * 60 * 1000;

// Smoothing factor for the exponentially weighted moving average.
pub const ETA_EWMA_ALPHA: f64 = 0.3;

// Coordinator mailbox backpressure limit (spec.md §5).
pub const MAILBOX_HIGH_WATER_MARK: usize = 1024;

// Short code alphabet: Crockford-like, no 0/1/I/O.
pub const SHORT_CODE_ALPHABET: &[u8] = b"ABCDEFGHJKLMNPQRSTUVWXYZ23456789";
pub const SHORT_CODE_LEN: usize = 6;
pub const SHORT_CODE_MAX_ATTEMPTS: usize = 20;

// How long a KV directory entry may be served stale before a durable
// refresh is forced.
pub const KV_TTL_SECS: u64 = 300;

// Host cookie lifetime.
pub const HOST_COOKIE_MAX_AGE_SECS: i64 = 24 * 60 * 60;

// User session lifetime.
pub const USER_SESSION_TTL_SECS: i64 = 14 * 24 * 60 * 60;

// OAuth state / exchange token lifetime.
pub const OAUTH_STATE_TTL_SECS: i64 = 10 * 60;
pub const EXCHANGE_TOKEN_TTL_SECS: i64 = 10 * 60;

// Web Push delivery.
pub const PUSH_TTL_SECS: u32 = 60;

pub const MAX_GUESTS_MIN: i32 = 1;
pub const MAX_GUESTS_MAX: i32 = 100;
pub const MAX_PARTY_NAME_LEN: usize = 80;

pub const CORS_MAX_AGE_SECS: u64 = 600;
