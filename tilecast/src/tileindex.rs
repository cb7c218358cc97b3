//! Per-tile flag bitsets.
//!
//! A [`TileIndex`] answers two questions the serving path asks constantly:
//! which content a concrete tile carries ([`TileIndex::get`]) and whether
//! anything at all exists below a tile ([`TileIndex::valid_subtree`]).
//! Storage is one dense row-major layer per LOD, bounded by that LOD's tile
//! range.

use crate::geo::{Lod, TileId, TileRange};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Tile content flags.
pub mod flags {
    /// Tile has a mesh.
    pub const MESH: u8 = 0x01;
    /// Tile mesh covers the whole tile area.
    pub const WATERTIGHT: u8 = 0x02;
    /// Tile has a navigation tile.
    pub const NAVTILE: u8 = 0x04;
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct LodLayer {
    range: TileRange,
    /// Row-major flag bytes covering `range`.
    data: Vec<u8>,
}

impl LodLayer {
    fn new(range: TileRange) -> Self {
        let (w, h) = range.size();
        Self {
            range,
            data: vec![0; (w as usize) * (h as usize)],
        }
    }

    fn index(&self, x: u32, y: u32) -> Option<usize> {
        if !self.range.contains(x, y) {
            return None;
        }
        let (w, _) = self.range.size();
        Some(((y - self.range.y_min) as usize) * (w as usize) + (x - self.range.x_min) as usize)
    }

    fn get(&self, x: u32, y: u32) -> u8 {
        self.index(x, y).map(|i| self.data[i]).unwrap_or(0)
    }

    fn set(&mut self, x: u32, y: u32, value: u8) {
        if let Some(i) = self.index(x, y) {
            self.data[i] = value;
        }
    }

    fn any_in(&self, range: &TileRange) -> bool {
        let clipped = self.range.intersection(range);
        if clipped.is_empty() {
            return false;
        }
        for y in clipped.y_min..=clipped.y_max {
            for x in clipped.x_min..=clipped.x_max {
                if self.get(x, y) != 0 {
                    return true;
                }
            }
        }
        false
    }
}

/// Compact per-tile bitset over a LOD pyramid.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TileIndex {
    lods: BTreeMap<Lod, LodLayer>,
}

impl TileIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocate a layer covering `range` at `lod`; existing content at that
    /// LOD is replaced.
    pub fn add_layer(&mut self, lod: Lod, range: TileRange) {
        self.lods.insert(lod, LodLayer::new(range));
    }

    /// Fill every tile of an existing layer region with `value`.
    pub fn fill(&mut self, lod: Lod, range: TileRange, value: u8) {
        if let Some(layer) = self.lods.get_mut(&lod) {
            let clipped = layer.range.intersection(&range);
            if clipped.is_empty() {
                return;
            }
            for y in clipped.y_min..=clipped.y_max {
                for x in clipped.x_min..=clipped.x_max {
                    layer.set(x, y, value);
                }
            }
        }
    }

    pub fn set(&mut self, tile: TileId, value: u8) {
        if let Some(layer) = self.lods.get_mut(&tile.lod) {
            layer.set(tile.x, tile.y, value);
        }
    }

    /// Flags of a single tile; zero when the tile is unknown.
    pub fn get(&self, tile: TileId) -> u8 {
        self.lods
            .get(&tile.lod)
            .map(|layer| layer.get(tile.x, tile.y))
            .unwrap_or(0)
    }

    /// True when the subtree rooted at `tile` contains any flagged tile,
    /// the root included.
    pub fn valid_subtree(&self, tile: TileId) -> bool {
        for (&lod, layer) in self.lods.range(tile.lod..) {
            let depth = lod - tile.lod;
            let range = TileRange::new(tile.x, tile.y, tile.x, tile.y).shifted_down(depth);
            if layer.any_in(&range) {
                return true;
            }
        }
        false
    }

    pub fn is_empty(&self) -> bool {
        self.lods.is_empty()
    }

    /// LODs with an allocated layer.
    pub fn lods(&self) -> impl Iterator<Item = Lod> + '_ {
        self.lods.keys().copied()
    }
}
