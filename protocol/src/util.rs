//! Small shared helpers that don't deserve their own module.

use std::time::{SystemTime, UNIX_EPOCH};

/// Milliseconds since the Unix epoch. Saturates to 0 on a pre-1970 clock
/// rather than panicking; a node with a broken clock should misbehave
/// loudly in validation, not crash in a helper.
pub fn unix_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unix_millis_is_monotonic_enough() {
        let a = unix_millis();
        let b = unix_millis();
        assert!(b >= a);
        // Sanity: we are past 2020 and before the heat death of the universe.
        assert!(a > 1_577_836_800_000);
    }
}
