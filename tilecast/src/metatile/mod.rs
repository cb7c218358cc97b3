//! Metatile model: per-tile metadata aggregated into fixed-size blocks.
//!
//! A metatile covers `2^binary_order` tiles on a side at one LOD. Each
//! covered tile gets a [`MetaNode`]: content flags, child validity,
//! normalized 3D extents, height range in navigation space, texel size and
//! geometry extents. The builder lives in [`builder`].

pub mod builder;

use crate::frame::ReferenceFrame;
use crate::geo::{Extents3, TileId, TileRange};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::io::Write;

/// Metanode content flags.
pub mod flags {
    /// Node has geometry.
    pub const GEOMETRY: u8 = 0x01;
    /// Node has a navigation tile.
    pub const NAVTILE: u8 = 0x02;
    /// Texel size applies to this node.
    pub const APPLY_TEXEL_SIZE: u8 = 0x04;
    /// Display size applies to this node.
    pub const APPLY_DISPLAY_SIZE: u8 = 0x08;
}

/// Closed floating-point height interval; starts out empty.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct HeightRange {
    pub min: f64,
    pub max: f64,
}

impl HeightRange {
    pub fn empty() -> Self {
        Self {
            min: f64::INFINITY,
            max: f64::NEG_INFINITY,
        }
    }

    pub fn new(min: f64, max: f64) -> Self {
        Self { min, max }
    }

    pub fn is_empty(&self) -> bool {
        self.min > self.max
    }

    pub fn unite(&mut self, other: &HeightRange) {
        self.min = self.min.min(other.min);
        self.max = self.max.max(other.max);
    }
}

impl Default for HeightRange {
    fn default() -> Self {
        Self::empty()
    }
}

/// Vertical geometry extents plus the surrogate height used by coarse
/// rendering.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct GeomExtents {
    pub z: HeightRange,
    pub surrogate: Option<f64>,
}

impl GeomExtents {
    pub fn is_empty(&self) -> bool {
        self.z.is_empty() && self.surrogate.is_none()
    }
}

/// Metadata of one tile.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetaNode {
    flags: u8,
    /// Validity bit per child, in [`TileId::children`] order.
    children: u8,
    /// 3D extents normalized to the reference frame's division extents.
    pub extents: Extents3,
    pub texel_size: f64,
    pub display_size: Option<u32>,
    /// Rounded height range in navigation space.
    pub height_range: Option<(i32, i32)>,
    pub geom_extents: GeomExtents,
    pub credits: BTreeSet<u16>,
}

impl Default for MetaNode {
    fn default() -> Self {
        Self {
            flags: 0,
            children: 0,
            extents: Extents3::invalid(),
            texel_size: 0.0,
            display_size: None,
            height_range: None,
            geom_extents: GeomExtents::default(),
            credits: BTreeSet::new(),
        }
    }
}

impl MetaNode {
    pub fn flags(&self) -> u8 {
        self.flags
    }

    pub fn set_flags(&mut self, flags: u8) {
        self.flags = flags;
    }

    pub fn geometry(&self) -> bool {
        self.flags & flags::GEOMETRY != 0
    }

    pub fn set_geometry(&mut self, on: bool) {
        self.toggle(flags::GEOMETRY, on);
    }

    pub fn navtile(&self) -> bool {
        self.flags & flags::NAVTILE != 0
    }

    pub fn set_navtile(&mut self, on: bool) {
        self.toggle(flags::NAVTILE, on);
    }

    pub fn apply_texel_size(&self) -> bool {
        self.flags & flags::APPLY_TEXEL_SIZE != 0
    }

    pub fn set_apply_texel_size(&mut self, on: bool) {
        self.toggle(flags::APPLY_TEXEL_SIZE, on);
    }

    pub fn apply_display_size(&self) -> bool {
        self.flags & flags::APPLY_DISPLAY_SIZE != 0
    }

    pub fn set_apply_display_size(&mut self, on: bool) {
        self.toggle(flags::APPLY_DISPLAY_SIZE, on);
    }

    fn toggle(&mut self, flag: u8, on: bool) {
        if on {
            self.flags |= flag;
        } else {
            self.flags &= !flag;
        }
    }

    /// Child validity in [`TileId::children`] order.
    pub fn child(&self, index: usize) -> bool {
        self.children & (1 << index) != 0
    }

    pub fn set_child(&mut self, index: usize, valid: bool) {
        if valid {
            self.children |= 1 << index;
        } else {
            self.children &= !(1 << index);
        }
    }
}

/// A block of metanodes covering one metatile.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetaTile {
    /// Origin tile id, aligned to the metatile grid.
    id: TileId,
    binary_order: u8,
    /// Row-major nodes, `2^binary_order` per side.
    nodes: Vec<Option<MetaNode>>,
}

impl MetaTile {
    /// Create an empty metatile anchored at `id` (aligned down if needed).
    pub fn new(id: TileId, binary_order: u8) -> Self {
        let side = 1usize << binary_order;
        Self {
            id: id.metatile_id(binary_order),
            binary_order,
            nodes: vec![None; side * side],
        }
    }

    pub fn id(&self) -> TileId {
        self.id
    }

    /// Tiles this metatile can hold.
    pub fn coverage(&self) -> TileRange {
        let side = (1u32 << self.binary_order) - 1;
        TileRange::new(self.id.x, self.id.y, self.id.x + side, self.id.y + side)
    }

    fn index(&self, tile: TileId) -> Option<usize> {
        if tile.lod != self.id.lod || !self.coverage().contains(tile.x, tile.y) {
            return None;
        }
        let side = 1usize << self.binary_order;
        Some((tile.y - self.id.y) as usize * side + (tile.x - self.id.x) as usize)
    }

    /// Store a node; silently ignores tiles outside the metatile.
    pub fn set(&mut self, tile: TileId, node: MetaNode) {
        if let Some(i) = self.index(tile) {
            self.nodes[i] = Some(node);
        }
    }

    pub fn get(&self, tile: TileId) -> Option<&MetaNode> {
        self.index(tile).and_then(|i| self.nodes[i].as_ref())
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.iter().all(|n| n.is_none())
    }

    /// Serialize deterministically; identical inputs produce identical
    /// bytes.
    pub fn save<W: Write>(&self, writer: W) -> Result<(), crate::Error> {
        serde_json::to_writer(writer, self)?;
        Ok(())
    }
}

/// Map absolute 3D extents into the frame's normalized form, each axis to
/// `[-1, +1]` across the frame division extents.
pub fn normalized_extents(frame: &ReferenceFrame, extents: &Extents3) -> Extents3 {
    if !extents.valid() {
        return Extents3::invalid();
    }

    let div = &frame.division_extents;
    let center = div.center();
    let half = (
        (div.ur.x - div.ll.x) / 2.0,
        (div.ur.y - div.ll.y) / 2.0,
        (div.ur.z - div.ll.z) / 2.0,
    );

    Extents3::new(
        (extents.ll.x - center.x) / half.0,
        (extents.ll.y - center.y) / half.1,
        (extents.ll.z - center.z) / half.2,
        (extents.ur.x - center.x) / half.0,
        (extents.ur.y - center.y) / half.1,
        (extents.ur.z - center.z) / half.2,
    )
}
