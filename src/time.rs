//! Millisecond-since-epoch helpers shared by every subsystem that stamps
//! timestamps (inodes, CAS objects, branch commits).

use std::time::{SystemTime, UNIX_EPOCH};

/// Current wall-clock time in milliseconds since the Unix epoch.
pub fn now_ms() -> i64 {
    SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default().as_millis() as i64
}

/// Normalize a caller-supplied `utimes` value: seconds >= 1e12 are already
/// milliseconds, otherwise treat as seconds and scale up.
pub fn normalize_to_ms(value: i64) -> i64 {
    if value >= 1_000_000_000_000 {
        value
    } else {
        value * 1000
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn now_ms_is_plausible() {
        assert!(now_ms() > 1_700_000_000_000);
    }

    #[test]
    fn normalize_treats_small_values_as_seconds() {
        assert_eq!(normalize_to_ms(1_000), 1_000_000);
    }

    #[test]
    fn normalize_treats_large_values_as_already_ms() {
        assert_eq!(normalize_to_ms(1_700_000_000_000), 1_700_000_000_000);
    }
}
