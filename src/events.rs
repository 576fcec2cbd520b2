use std::fmt;

/// Opaque handle for a presentation region.
///
/// The observation platform maps it to a rectangle; the engine only passes it
/// around.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Target(pub u64);

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "target#{}", self.0)
    }
}

/// Load state of a single controller.
///
/// Transitions only move forward: `Idle -> Observing -> Loading -> Loaded | Failed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LoadState {
    Idle,
    Observing,
    Loading,
    Loaded,
    Failed,
}

impl LoadState {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Loaded | Self::Failed)
    }

    /// Position in the forward-only ordering. Terminal states share a rank.
    pub fn rank(self) -> u8 {
        match self {
            Self::Idle => 0,
            Self::Observing => 1,
            Self::Loading => 2,
            Self::Loaded | Self::Failed => 3,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Observing => "observing",
            Self::Loading => "loading",
            Self::Loaded => "loaded",
            Self::Failed => "failed",
        }
    }
}

impl fmt::Display for LoadState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How a watcher decided its target became visible.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Visibility {
    /// The platform reported the target crossing the threshold.
    Intersecting,
    /// Observation is unsupported; the target is treated as visible at once.
    Degraded,
}

/// One intersection report from the observation platform.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Intersection {
    /// Fraction of the target's area inside the (margin-expanded) viewport.
    pub ratio: f32,
    pub is_intersecting: bool,
}

impl Intersection {
    pub const HIDDEN: Self = Self {
        ratio: 0.0,
        is_intersecting: false,
    };

    pub fn reaches(&self, threshold: f32) -> bool {
        self.is_intersecting && self.ratio >= threshold
    }
}
