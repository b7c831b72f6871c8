//! # Difficulty Adjuster
//!
//! Bitcoin-style retarget over a 256-bit threshold. Every miner on the
//! network feeds the adjuster the timestamps of the blocks it observes,
//! local and remote alike, and once a full adjustment window has been
//! seen, the target scales by `actual_elapsed / expected_elapsed`,
//! clamped to [1/4, 4]. The global block rate converges on the configured
//! spacing no matter how many miners are active.
//!
//! The ratio is fixed-point integer math (scale 10 000). The target value
//! itself never passes through a float.

use parking_lot::RwLock;
use primitive_types::{U256, U512};
use std::time::Duration;
use tracing::{debug, info};

use crate::config;

/// Easiest allowed target: 16 bits of leading zeros, i.e. four leading
/// zero hex chars. A fresh network starts here.
pub fn max_target() -> U256 {
    U256::MAX >> 16
}

/// Hardest allowed target. Far beyond any plausible fleet of indexers;
/// exists so a runaway retarget can never zero the target out.
pub fn min_target() -> U256 {
    U256::one() << 32
}

/// Leading-zeros acceptance check, the coarse standalone mode used when no
/// adjuster is attached: the hash hex must start with `zeros` `'0'` chars.
pub fn check_leading(hash_hex: &str, zeros: u32) -> bool {
    hash_hex.len() >= zeros as usize
        && hash_hex.chars().take(zeros as usize).all(|c| c == '0')
}

// ---------------------------------------------------------------------------
// DifficultyAdjuster
// ---------------------------------------------------------------------------

/// Shared retarget state. Reads (the miner polling the target, the health
/// endpoint reading difficulty) vastly outnumber writes (one per observed
/// block), hence the read-write lock.
#[derive(Debug)]
pub struct DifficultyAdjuster {
    inner: RwLock<Inner>,
    /// Target spacing between blocks.
    target_block_time: Duration,
    /// Blocks per adjustment window.
    adjustment_period: usize,
}

#[derive(Debug)]
struct Inner {
    /// Current 256-bit threshold.
    target: U256,
    /// Timestamps (ms) of blocks in the current window, in arrival order.
    recent: Vec<u64>,
    /// Blocks observed since startup/restore.
    total_blocks: u64,
}

impl Default for DifficultyAdjuster {
    fn default() -> Self {
        Self::new(config::TARGET_BLOCK_TIME, config::ADJUSTMENT_PERIOD)
    }
}

impl DifficultyAdjuster {
    /// Build an adjuster starting at the maximum target.
    pub fn new(target_block_time: Duration, adjustment_period: usize) -> Self {
        Self {
            inner: RwLock::new(Inner {
                target: max_target(),
                recent: Vec::with_capacity(adjustment_period),
                total_blocks: 0,
            }),
            target_block_time,
            adjustment_period,
        }
    }

    /// Record one observed block. When the window fills, retargets and
    /// clears the window.
    pub fn record_block(&self, timestamp_ms: u64) {
        let mut inner = self.inner.write();
        inner.recent.push(timestamp_ms);
        inner.total_blocks += 1;

        if inner.recent.len() >= self.adjustment_period {
            self.adjust(&mut inner);
            inner.recent.clear();
        }
    }

    /// Restore state persisted by a previous run. `recent` is truncated to
    /// the last `adjustment_period` entries.
    pub fn restore(&self, target: U256, total_blocks: u64, recent: &[u64]) {
        let mut inner = self.inner.write();
        inner.target = target.clamp(min_target(), max_target());
        inner.total_blocks = total_blocks;
        let keep = recent.len().saturating_sub(self.adjustment_period);
        inner.recent = recent[keep..].to_vec();
        info!(
            target: "difficulty",
            difficulty = leading_zeros(&inner.target),
            total_blocks,
            window = inner.recent.len(),
            "restored difficulty state"
        );
    }

    /// The current 256-bit threshold.
    pub fn target(&self) -> U256 {
        self.inner.read().target
    }

    /// The target as 64 zero-padded hex chars.
    pub fn target_hex(&self) -> String {
        format!("{:064x}", self.inner.read().target)
    }

    /// Display difficulty: count of leading `'0'` hex chars of the target.
    /// A 16x quantization of the real threshold; display and the legacy
    /// bits field only.
    pub fn difficulty(&self) -> u32 {
        leading_zeros(&self.inner.read().target)
    }

    /// Blocks observed since startup/restore.
    pub fn total_blocks(&self) -> u64 {
        self.inner.read().total_blocks
    }

    /// Whether a 64-hex block hash, read big-endian, meets the current
    /// target. Unparseable input never meets it.
    pub fn check_hash(&self, hash_hex: &str) -> bool {
        let Ok(value) = U256::from_str_radix(hash_hex, 16) else {
            return false;
        };
        value <= self.inner.read().target
    }

    // -- retarget ------------------------------------------------------------

    /// `new_target = old_target * clamp(actual/expected, 1/4, 4)`, in
    /// fixed-point with scale `RATIO_SCALE`, clamped to the target bounds.
    fn adjust(&self, inner: &mut Inner) {
        let n = inner.recent.len();
        let first = inner.recent[0];
        let last = inner.recent[n - 1];

        // Clamped to at least one second so a burst of same-millisecond
        // blocks retargets hard instead of dividing by zero.
        let actual_secs = (last.saturating_sub(first) / 1000).max(1);
        let expected_secs =
            ((n as u64 - 1) * self.target_block_time.as_secs()).max(1);

        let ratio_scaled = (actual_secs * config::RATIO_SCALE / expected_secs)
            .clamp(config::RATIO_MIN, config::RATIO_MAX);

        let old = inner.target;
        let widened: U512 = old.full_mul(U256::from(ratio_scaled));
        let scaled = widened / U512::from(config::RATIO_SCALE);
        let new_target = U256::try_from(scaled)
            .unwrap_or_else(|_| max_target())
            .clamp(min_target(), max_target());

        inner.target = new_target;

        info!(
            target: "difficulty",
            actual_secs,
            expected_secs,
            ratio_scaled,
            old_difficulty = leading_zeros(&old),
            new_difficulty = leading_zeros(&new_target),
            "retargeted"
        );
        debug!(target: "difficulty", target_hex = %format!("{:064x}", new_target));
    }
}

fn leading_zeros(target: &U256) -> u32 {
    let hex = format!("{:064x}", target);
    hex.chars().take_while(|c| *c == '0').count() as u32
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    /// 10-block window at 600 s spacing, the network defaults.
    fn adjuster() -> DifficultyAdjuster {
        DifficultyAdjuster::new(Duration::from_secs(600), 10)
    }

    #[test]
    fn starts_at_max_target() {
        let adj = adjuster();
        assert_eq!(adj.target(), max_target());
        assert_eq!(adj.difficulty(), 4, "max target has four leading zero hexes");
        assert_eq!(adj.target_hex().len(), 64);
        assert!(adj.target_hex().starts_with("0000f"));
    }

    #[test]
    fn check_leading_mode() {
        assert!(check_leading("000abc", 3));
        assert!(!check_leading("000abc", 4));
        assert!(!check_leading("abc000", 3));
        assert!(check_leading("0000", 4));
        assert!(!check_leading("00", 4)); // shorter than requested zeros
    }

    #[test]
    fn fast_blocks_shrink_target_by_clamped_quarter() {
        // 10 blocks spaced 150 s apart: actual = 1350 s, expected = 5400 s,
        // ratio = 0.25 exactly (the clamp boundary).
        let adj = adjuster();
        for i in 0..10u64 {
            adj.record_block(i * 150_000);
        }
        assert_eq!(adj.target(), max_target() / 4);
        assert_eq!(adj.total_blocks(), 10);
    }

    #[test]
    fn slow_blocks_grow_target_clamped_at_max() {
        // Already at max; slow blocks cannot push past it.
        let adj = adjuster();
        for i in 0..10u64 {
            adj.record_block(i * 6_000_000); // 6000 s spacing, ratio clamps to 4
        }
        assert_eq!(adj.target(), max_target());
    }

    #[test]
    fn on_pace_blocks_leave_target_unchanged() {
        let adj = adjuster();
        for i in 0..10u64 {
            adj.record_block(i * 600_000);
        }
        assert_eq!(adj.target(), max_target());
    }

    #[test]
    fn window_clears_after_adjustment() {
        let adj = adjuster();
        for i in 0..10u64 {
            adj.record_block(i * 150_000);
        }
        let after_first = adj.target();

        // A second full window at the same fast pace shrinks it again.
        for i in 0..10u64 {
            adj.record_block(10_000_000 + i * 150_000);
        }
        assert_eq!(adj.target(), after_first / 4);
    }

    #[test]
    fn ratio_lower_clamp_holds_for_instant_blocks() {
        // All ten blocks in the same millisecond: elapsed clamps to 1 s,
        // ratio to 1/4.
        let adj = adjuster();
        for _ in 0..10 {
            adj.record_block(1_000_000);
        }
        assert_eq!(adj.target(), max_target() / 4);
    }

    #[test]
    fn target_never_drops_below_min() {
        let adj = adjuster();
        adj.restore(min_target(), 0, &[]);
        for i in 0..10u64 {
            adj.record_block(i * 150_000);
        }
        assert_eq!(adj.target(), min_target());
    }

    #[test]
    fn check_hash_compares_big_endian() {
        let adj = adjuster();
        // Exactly the target passes; one above fails.
        let at_target = format!("{:064x}", max_target());
        assert!(adj.check_hash(&at_target));

        let above = format!("{:064x}", max_target() + U256::one());
        assert!(!adj.check_hash(&above));

        let below = format!("{:064x}", max_target() - U256::one());
        assert!(adj.check_hash(&below));
    }

    #[test]
    fn check_hash_rejects_garbage() {
        let adj = adjuster();
        assert!(!adj.check_hash("not hex"));
    }

    #[test]
    fn restore_truncates_window() {
        let adj = adjuster();
        let stamps: Vec<u64> = (0..25).map(|i| i * 1_000).collect();
        adj.restore(max_target() / 2, 25, &stamps);

        assert_eq!(adj.target(), max_target() / 2);
        assert_eq!(adj.total_blocks(), 25);

        // The restored window already holds a full period, so the very
        // next recorded block triggers a retarget.
        adj.record_block(30_000);
        assert_ne!(adj.target(), max_target() / 2);
    }

    #[test]
    fn difficulty_counts_hex_zeros() {
        let adj = adjuster();
        adj.restore(U256::one() << 200, 0, &[]);
        // 1 << 200: 256-200 = 56 leading zero bits = 14 hex digits; the
        // 15th digit is '1'.
        assert_eq!(adj.difficulty(), 13);
    }
}
