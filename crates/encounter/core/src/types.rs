//! Small value types shared by every encounter module.
use core::fmt;
use core::time::Duration;

/// Identifier of a pattern definition inside a [`crate::PatternCatalog`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(transparent))]
pub struct PatternId(pub u32);

impl fmt::Display for PatternId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "pattern#{}", self.0)
    }
}

/// Frame counter advanced once per host tick.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Frame(pub u64);

impl Frame {
    pub const ZERO: Self = Self(0);

    pub fn next(self) -> Self {
        Self(self.0 + 1)
    }
}

impl fmt::Display for Frame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Encounter time: the frame counter plus accumulated simulated time.
///
/// The host advances the clock with the frame delta it already computes; the
/// engine never reads wall-clock time, which keeps replays deterministic.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub struct Clock {
    pub frame: Frame,
    pub now: Duration,
}

impl Clock {
    pub const fn new() -> Self {
        Self {
            frame: Frame::ZERO,
            now: Duration::ZERO,
        }
    }

    /// Advances one frame by `dt`.
    pub fn advance(&mut self, dt: Duration) {
        self.frame = self.frame.next();
        self.now += dt;
    }

    /// Returns the time elapsed since `since`, saturating at zero.
    pub fn since(&self, since: Duration) -> Duration {
        self.now.saturating_sub(since)
    }
}

/// World-space vector used for spawn positions and velocities.
#[derive(Clone, Copy, Debug, PartialEq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Vec2 {
    pub x: f32,
    pub y: f32,
}

impl Vec2 {
    pub const ZERO: Self = Self { x: 0.0, y: 0.0 };

    pub const fn new(x: f32, y: f32) -> Self {
        Self { x, y }
    }
}

impl fmt::Display for Vec2 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({:.2}, {:.2})", self.x, self.y)
    }
}
