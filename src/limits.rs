use crate::model::Ms;

pub const MINUTE_MS: Ms = 60_000;
pub const HOUR_MS: Ms = 60 * MINUTE_MS;

/// Shortest admissible booking, inclusive.
pub const MIN_BOOKING_DURATION_MS: Ms = 30 * MINUTE_MS;
/// Longest admissible booking, inclusive.
pub const MAX_BOOKING_DURATION_MS: Ms = 4 * HOUR_MS;

pub const MAX_CLIENT_ID_LEN: usize = 256;

/// Pending appends the group-commit writer will queue before senders wait.
pub const WAL_CHANNEL_CAPACITY: usize = 4096;
