use serde::{Deserialize, Serialize};

/// Tiny deterministic RNG used by the simulator.
///
/// Reproducible across platforms so a failing seed replays identically.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeterministicRng {
    state: u64,
}

impl DeterministicRng {
    #[must_use]
    pub const fn new(seed: u64) -> Self {
        Self {
            state: seed ^ 0x9E37_79B9_7F4A_7C15,
        }
    }

    /// Next pseudo-random `u64`.
    #[must_use]
    pub const fn next_u64(&mut self) -> u64 {
        self.state = self
            .state
            .wrapping_mul(6_364_136_223_846_793_005)
            .wrapping_add(1_442_695_040_888_963_407);
        // High bits of an LCG are the well-mixed ones.
        self.state >> 16
    }

    /// Value in `[low, high]`. Returns `low` when the range is empty.
    #[must_use]
    pub const fn between(&mut self, low: u64, high: u64) -> u64 {
        if high <= low {
            return low;
        }
        low + self.next_u64() % (high - low + 1)
    }

    /// Bernoulli trial with integer percent.
    #[must_use]
    pub const fn chance(&mut self, percent: u8) -> bool {
        if percent == 0 {
            return false;
        }
        if percent >= 100 {
            return true;
        }
        self.next_u64() % 100 < percent as u64
    }
}
