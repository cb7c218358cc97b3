//! LOD and tile ranges.

use super::Lod;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Closed range of levels of detail, `min <= max`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LodRange {
    pub min: Lod,
    pub max: Lod,
}

impl LodRange {
    pub fn new(min: Lod, max: Lod) -> Self {
        debug_assert!(min <= max);
        Self { min, max }
    }

    pub fn contains(&self, lod: Lod) -> bool {
        lod >= self.min && lod <= self.max
    }

    /// Iterate the range from `min` to `max` inclusive.
    pub fn iter(&self) -> impl Iterator<Item = Lod> {
        self.min..=self.max
    }
}

impl fmt::Display for LodRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{},{}", self.min, self.max)
    }
}

/// Inclusive rectangle of tile coordinates at a single LOD.
///
/// An empty range has `x_min > x_max` (the [`TileRange::empty`]
/// constructor); absorbing coordinates via [`TileRange::update`] makes it
/// valid.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TileRange {
    pub x_min: u32,
    pub y_min: u32,
    pub x_max: u32,
    pub y_max: u32,
}

impl TileRange {
    pub fn new(x_min: u32, y_min: u32, x_max: u32, y_max: u32) -> Self {
        Self {
            x_min,
            y_min,
            x_max,
            y_max,
        }
    }

    pub fn empty() -> Self {
        Self {
            x_min: u32::MAX,
            y_min: u32::MAX,
            x_max: 0,
            y_max: 0,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.x_min > self.x_max || self.y_min > self.y_max
    }

    /// Grow to include the tile at `(x, y)`.
    pub fn update(&mut self, x: u32, y: u32) {
        self.x_min = self.x_min.min(x);
        self.y_min = self.y_min.min(y);
        self.x_max = self.x_max.max(x);
        self.y_max = self.y_max.max(y);
    }

    pub fn contains(&self, x: u32, y: u32) -> bool {
        x >= self.x_min && x <= self.x_max && y >= self.y_min && y <= self.y_max
    }

    /// Number of tiles along each axis.
    pub fn size(&self) -> (u32, u32) {
        if self.is_empty() {
            return (0, 0);
        }
        (self.x_max - self.x_min + 1, self.y_max - self.y_min + 1)
    }

    /// The same range expressed `levels` LODs shallower (parent tiles).
    pub fn shifted_up(&self, levels: u8) -> Self {
        if self.is_empty() {
            return *self;
        }
        Self {
            x_min: self.x_min >> levels,
            y_min: self.y_min >> levels,
            x_max: self.x_max >> levels,
            y_max: self.y_max >> levels,
        }
    }

    /// The same range expressed `levels` LODs deeper (all child tiles).
    pub fn shifted_down(&self, levels: u8) -> Self {
        if self.is_empty() {
            return *self;
        }
        Self {
            x_min: self.x_min << levels,
            y_min: self.y_min << levels,
            x_max: ((self.x_max + 1) << levels) - 1,
            y_max: ((self.y_max + 1) << levels) - 1,
        }
    }

    /// Intersection, empty when disjoint.
    pub fn intersection(&self, other: &TileRange) -> Self {
        if self.is_empty() || other.is_empty() {
            return Self::empty();
        }
        let out = Self {
            x_min: self.x_min.max(other.x_min),
            y_min: self.y_min.max(other.y_min),
            x_max: self.x_max.min(other.x_max),
            y_max: self.y_max.min(other.y_max),
        };
        if out.is_empty() {
            Self::empty()
        } else {
            out
        }
    }
}

impl fmt::Display for TileRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{},{}-{},{}",
            self.x_min, self.y_min, self.x_max, self.y_max
        )
    }
}
