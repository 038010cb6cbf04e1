//! Seeded randomness for pattern selection and pattern bodies.
//!
//! Every random draw in an encounter is derived from the encounter seed, so a
//! fight replayed with the same seed and the same health curve picks the same
//! patterns in the same order.

/// Stateless random source: maps a 64-bit seed to a 32-bit value.
///
/// Implementations must be deterministic.
pub trait RngOracle {
    /// Generate a random u32 value from a seed.
    fn next_u32(&self, seed: u64) -> u32;

    /// Value in `0..bound`; returns 0 when `bound` is 0.
    fn below(&self, seed: u64, bound: u32) -> u32 {
        if bound == 0 {
            return 0;
        }
        self.next_u32(seed) % bound
    }

    /// Value in `[min, max]` inclusive.
    fn range(&self, seed: u64, min: u32, max: u32) -> u32 {
        if min >= max {
            return min;
        }
        min + self.below(seed, max - min + 1)
    }
}

/// PCG-XSH-RR generator (64-bit state, 32-bit output).
#[derive(Clone, Copy, Debug, Default)]
pub struct PcgRng;

impl PcgRng {
    const MULTIPLIER: u64 = 6364136223846793005;
    const INCREMENT: u64 = 1442695040888963407;

    #[inline]
    fn step(state: u64) -> u64 {
        state
            .wrapping_mul(Self::MULTIPLIER)
            .wrapping_add(Self::INCREMENT)
    }

    #[inline]
    fn output(state: u64) -> u32 {
        let xorshifted = (((state >> 18) ^ state) >> 27) as u32;
        let rot = (state >> 59) as u32;
        xorshifted.rotate_right(rot)
    }
}

impl RngOracle for PcgRng {
    fn next_u32(&self, seed: u64) -> u32 {
        Self::output(Self::step(seed))
    }
}

/// Mixes the encounter seed with a draw position into a fresh PCG seed.
///
/// * `seed` - encounter seed from [`crate::EncounterConfig`]
/// * `nonce` - draw counter, or the frame for per-task streams
/// * `stream` - independent stream id (0 for the scheduler, task id otherwise)
/// * `context` - distinguishes several draws made at the same position
pub fn compute_seed(seed: u64, nonce: u64, stream: u64, context: u32) -> u64 {
    // SplitMix64 / FxHash style multipliers followed by a murmur finalizer
    let mut hash = seed;
    hash ^= nonce.wrapping_mul(0x9e3779b97f4a7c15);
    hash ^= stream.wrapping_mul(0x517cc1b727220a95);
    hash ^= (context as u64).wrapping_mul(0x85ebca6b);

    hash ^= hash >> 33;
    hash = hash.wrapping_mul(0xff51afd7ed558ccd);
    hash ^= hash >> 33;

    hash
}

/// The encounter's own random stream, owned by [`crate::EncounterContext`].
///
/// Each draw advances a counter instead of mutating generator state, so the
/// position in the stream is a single number that can be logged or saved.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct EncounterRng {
    seed: u64,
    draws: u64,
}

impl EncounterRng {
    /// Stream id reserved for scheduler draws.
    const SCHEDULER_STREAM: u64 = 0;

    pub const fn new(seed: u64) -> Self {
        Self { seed, draws: 0 }
    }

    pub const fn seed(&self) -> u64 {
        self.seed
    }

    /// Number of values drawn so far.
    pub const fn draws(&self) -> u64 {
        self.draws
    }

    pub fn next_u32(&mut self) -> u32 {
        let value = PcgRng.next_u32(compute_seed(
            self.seed,
            self.draws,
            Self::SCHEDULER_STREAM,
            0,
        ));
        self.draws += 1;
        value
    }

    /// Uniform value in `0..bound` (0 when `bound` is 0).
    pub fn below(&mut self, bound: u32) -> u32 {
        if bound == 0 {
            return 0;
        }
        self.next_u32() % bound
    }
}
