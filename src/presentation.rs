//! Helpers for presentation adapters: placeholder sizing and the visual
//! phase that corresponds to each load state.

use std::str::FromStr;

use serde::{Deserialize, Deserializer, de};

use crate::error::Error;
use crate::events::LoadState;

/// Width-to-height ratio of a placeholder box.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AspectRatio {
    pub width: f32,
    pub height: f32,
}

impl AspectRatio {
    pub fn new(width: f32, height: f32) -> Option<Self> {
        (width.is_finite() && height.is_finite() && width > 0.0 && height > 0.0)
            .then_some(Self { width, height })
    }

    /// Bottom padding, as a percentage of the width, that reserves the
    /// placeholder's height: always `height / width * 100`.
    pub fn padding_percent(&self) -> f32 {
        self.height / self.width * 100.0
    }

    pub fn height_for(&self, width: f32) -> f32 {
        width * self.height / self.width
    }
}

impl FromStr for AspectRatio {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || Error::InvalidAspectRatio(s.to_string());
        let parse = |v: &str| v.trim().parse::<f32>().map_err(|_| invalid());
        let (width, height) = match s.split_once([':', '/']) {
            Some((w, h)) => (parse(w)?, parse(h)?),
            None => (parse(s)?, 1.0),
        };
        Self::new(width, height).ok_or_else(invalid)
    }
}

impl<'de> Deserialize<'de> for AspectRatio {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(de::Error::custom)
    }
}

/// What an adapter paints for a given load state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Placeholder,
    /// Blurred low-resolution preview while the real resource loads.
    BlurUp,
    Final,
    Error,
}

impl Phase {
    pub fn for_state(state: LoadState, blur_placeholder: bool) -> Self {
        match state {
            LoadState::Idle | LoadState::Observing => Self::Placeholder,
            LoadState::Loading if blur_placeholder => Self::BlurUp,
            LoadState::Loading => Self::Placeholder,
            LoadState::Loaded => Self::Final,
            LoadState::Failed => Self::Error,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Placeholder => "placeholder",
            Self::BlurUp => "blur-up",
            Self::Final => "final",
            Self::Error => "error",
        }
    }
}
