//! Environment variable utilities
//!
//! Generic `env_get<T>` parsing with defaults, used by the engine
//! configuration (`BURST_*` overrides).

use std::str::FromStr;

/// Get an environment variable parsed as `T`, or the default.
///
/// ```ignore
/// let workers: usize = env_get("BURST_NUM_WORKERS", 4);
/// let timeout: u64 = env_get("BURST_WAIT_TIMEOUT_MS", 50);
/// ```
#[inline]
pub fn env_get<T>(key: &str, default: T) -> T
where
    T: FromStr,
{
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

/// Get an environment variable as a boolean.
///
/// "1", "true", "yes", "on" (case-insensitive) are true; anything
/// else is false; unset returns the default.
#[inline]
pub fn env_get_bool(key: &str, default: bool) -> bool {
    match std::env::var(key) {
        Ok(val) => matches!(val.to_lowercase().as_str(), "1" | "true" | "yes" | "on"),
        Err(_) => default,
    }
}

/// Get an environment variable if set and parseable.
#[inline]
pub fn env_get_opt<T>(key: &str) -> Option<T>
where
    T: FromStr,
{
    std::env::var(key).ok().and_then(|v| v.parse().ok())
}
