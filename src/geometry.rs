//! Rectangles, proximity margins and intersection math.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, de};

use crate::error::Error;
use crate::events::Intersection;

#[derive(Debug, Clone, Copy, PartialEq, Default, Deserialize)]
#[serde(from = "[f32; 4]")]
pub struct Rect {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
}

impl From<[f32; 4]> for Rect {
    fn from([x, y, width, height]: [f32; 4]) -> Self {
        Self::new(x, y, width, height)
    }
}

impl Rect {
    pub const fn new(x: f32, y: f32, width: f32, height: f32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    pub fn right(&self) -> f32 {
        self.x + self.width
    }

    pub fn bottom(&self) -> f32 {
        self.y + self.height
    }

    pub fn area(&self) -> f32 {
        self.width.max(0.0) * self.height.max(0.0)
    }

    /// Grow outward by `margin`. Negative margins shrink the rectangle.
    pub fn expanded(&self, margin: &RootMargin) -> Self {
        Self {
            x: self.x - margin.left,
            y: self.y - margin.top,
            width: (self.width + margin.left + margin.right).max(0.0),
            height: (self.height + margin.top + margin.bottom).max(0.0),
        }
    }

    /// Overlap of two rectangles, `None` when they neither overlap nor touch.
    pub fn intersection(&self, other: &Rect) -> Option<Rect> {
        let left = self.x.max(other.x);
        let top = self.y.max(other.y);
        let right = self.right().min(other.right());
        let bottom = self.bottom().min(other.bottom());
        if right < left || bottom < top {
            return None;
        }
        Some(Rect::new(left, top, right - left, bottom - top))
    }
}

/// Compute how much of `target` lies within `root` grown by `margin`.
pub fn intersect(target: &Rect, root: &Rect, margin: &RootMargin) -> Intersection {
    let root = root.expanded(margin);
    match target.intersection(&root) {
        None => Intersection::HIDDEN,
        Some(overlap) => {
            let area = target.area();
            // Degenerate targets count as fully visible once they touch the root.
            let ratio = if area <= 0.0 {
                1.0
            } else {
                (overlap.area() / area).clamp(0.0, 1.0)
            };
            Intersection {
                ratio,
                is_intersecting: true,
            }
        }
    }
}

/// CSS-style margin applied around the viewport before intersecting.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct RootMargin {
    pub top: f32,
    pub right: f32,
    pub bottom: f32,
    pub left: f32,
}

impl RootMargin {
    pub const ZERO: Self = Self::uniform(0.0);

    pub const fn uniform(px: f32) -> Self {
        Self {
            top: px,
            right: px,
            bottom: px,
            left: px,
        }
    }
}

fn parse_length(raw: &str) -> Option<f32> {
    if let Some(number) = raw.strip_suffix("px") {
        return number.parse::<f32>().ok().filter(|v| v.is_finite());
    }
    // Unitless lengths are only meaningful for zero.
    match raw.parse::<f32>() {
        Ok(v) if v == 0.0 => Some(0.0),
        _ => None,
    }
}

impl FromStr for RootMargin {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || Error::InvalidMargin(s.to_string());
        let parts = s
            .split_whitespace()
            .map(|p| parse_length(p).ok_or_else(invalid))
            .collect::<Result<Vec<_>, _>>()?;
        match parts.as_slice() {
            [all] => Ok(Self::uniform(*all)),
            [vertical, horizontal] => Ok(Self {
                top: *vertical,
                right: *horizontal,
                bottom: *vertical,
                left: *horizontal,
            }),
            [top, horizontal, bottom] => Ok(Self {
                top: *top,
                right: *horizontal,
                bottom: *bottom,
                left: *horizontal,
            }),
            [top, right, bottom, left] => Ok(Self {
                top: *top,
                right: *right,
                bottom: *bottom,
                left: *left,
            }),
            _ => Err(invalid()),
        }
    }
}

impl fmt::Display for RootMargin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}px {}px {}px {}px",
            self.top, self.right, self.bottom, self.left
        )
    }
}

impl<'de> Deserialize<'de> for RootMargin {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(de::Error::custom)
    }
}
