use chrono::Utc;
use std::sync::atomic::{AtomicI64, Ordering};

const BIN_DIGITS: u32 = 12;

/// Timestamp units per millisecond.
pub const ONE_MS: i64 = 1 << BIN_DIGITS;

static LAST_TIMESTAMP: AtomicI64 = AtomicI64::new(0);

/// Strictly increasing cache timestamp: wall-clock milliseconds shifted left
/// by 12 bits, with the low bits used as a counter inside one millisecond.
pub fn next_timestamp() -> i64 {
    let base = Utc::now().timestamp_millis() << BIN_DIGITS;
    let mut current = LAST_TIMESTAMP.load(Ordering::SeqCst);
    loop {
        let next = if base > current { base } else { current + 1 };
        match LAST_TIMESTAMP.compare_exchange(current, next, Ordering::SeqCst, Ordering::SeqCst) {
            Ok(_) => return next,
            Err(actual) => current = actual,
        }
    }
}

/// Convert a duration in milliseconds to timestamp units.
pub fn millis_to_timestamp_units(ms: u64) -> i64 {
    (ms as i64).saturating_mul(ONE_MS)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_timestamps_strictly_increase() {
        let mut last = next_timestamp();
        for _ in 0..10_000 {
            let next = next_timestamp();
            assert!(next > last);
            last = next;
        }
    }
}
