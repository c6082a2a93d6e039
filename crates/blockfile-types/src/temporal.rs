use chrono::Utc;

/// Current wall-clock time in milliseconds since the UNIX epoch.
pub fn now_ms() -> i64 {
    Utc::now().timestamp_millis()
}

/// Next modification timestamp: the current time, but never earlier than
/// `previous`, so `modTs` stays monotonic under wall-clock adjustments.
pub fn next_mod_ts(previous: i64) -> i64 {
    now_ms().max(previous)
}
