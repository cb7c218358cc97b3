//! Reference frames: the tiling schemes resources are published into.
//!
//! A [`ReferenceFrame`] is a read-only catalogue entry: a navigation SRS,
//! 3D division extents used for extents normalization, and a set of subtree
//! root [`Node`]s. Each node owns one spatial reference and one pane of
//! extents; every tile below it inherits both. Frames are loaded once and
//! never mutated.
//!
//! [`NodeInfo`] embeds a tile in its frame: it resolves the subtree root the
//! tile lives under and carries the tile's extents in the subtree's SRS.

use crate::geo::srs::SrsDef;
use crate::geo::{tile_extents, Extents2, Extents3, Lod, Point2, TileId};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use tracing::info;

/// Extent of the Web Mercator square in meters.
const WEBMERC_EXTENT: f64 = 20_037_508.342789244;

/// One subtree root of a reference frame.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Node {
    /// Identity of the subtree root tile.
    pub id: TileId,
    /// Spatial reference of the whole subtree.
    pub srs: SrsDef,
    /// Pane extents in `srs` units.
    pub extents: Extents2,
    /// Unproductive nodes (e.g. polar caps) never produce content.
    pub productive: bool,
}

/// An identified tiling scheme.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReferenceFrame {
    pub id: String,
    #[serde(default)]
    pub description: String,
    /// Metatiles are `2^meta_binary_order` tiles on a side.
    pub meta_binary_order: u8,
    /// SRS heights and positions are navigated in.
    pub navigation_srs: SrsDef,
    /// SRS world geometry is expressed in.
    pub physical_srs: SrsDef,
    /// 3D extents used for normalized metanode extents.
    pub division_extents: Extents3,
    nodes: Vec<Node>,
}

impl ReferenceFrame {
    pub fn new(
        id: impl Into<String>,
        meta_binary_order: u8,
        navigation_srs: SrsDef,
        physical_srs: SrsDef,
        division_extents: Extents3,
        mut nodes: Vec<Node>,
    ) -> Self {
        nodes.sort_by_key(|n| n.id);
        Self {
            id: id.into(),
            description: String::new(),
            meta_binary_order,
            navigation_srs,
            physical_srs,
            division_extents,
            nodes,
        }
    }

    /// The single-root Web Mercator frame.
    pub fn webmercator() -> Self {
        let merc = SrsDef::from_epsg(3857).expect("EPSG:3857 is always known");
        let mut frame = Self::new(
            "webmercator",
            5,
            merc.clone(),
            merc.clone(),
            Extents3::new(
                -WEBMERC_EXTENT,
                -WEBMERC_EXTENT,
                -WEBMERC_EXTENT,
                WEBMERC_EXTENT,
                WEBMERC_EXTENT,
                WEBMERC_EXTENT,
            ),
            vec![Node {
                id: TileId::new(0, 0, 0),
                srs: merc,
                extents: Extents2::new(
                    -WEBMERC_EXTENT,
                    -WEBMERC_EXTENT,
                    WEBMERC_EXTENT,
                    WEBMERC_EXTENT,
                ),
                productive: true,
            }],
        );
        frame.description = "Pseudo-mercator (slippy map) tiling".to_string();
        frame
    }

    /// All subtree roots of this frame, embedded as [`NodeInfo`].
    pub fn nodes(&self) -> Vec<NodeInfo<'_>> {
        self.nodes
            .iter()
            .map(|node| NodeInfo {
                frame: self,
                root: node,
                tile: node.id,
                extents: node.extents,
            })
            .collect()
    }

    /// The subtree root governing `tile`: the deepest registered node that
    /// is an ancestor of (or equal to) the tile.
    fn subtree_root(&self, tile: &TileId) -> Option<&Node> {
        self.nodes
            .iter()
            .filter(|n| tile.is_under(&n.id))
            .max_by_key(|n| n.id.lod)
    }

    /// Embed `tile` in this frame; `None` when the tile lies outside every
    /// registered subtree.
    pub fn node_info(&self, tile: TileId) -> Option<NodeInfo<'_>> {
        let root = self.subtree_root(&tile)?;
        let depth = tile.lod - root.id.lod;
        let local = TileId::new(
            depth,
            tile.x - (root.id.x << depth),
            tile.y - (root.id.y << depth),
        );
        Some(NodeInfo {
            frame: self,
            root,
            tile,
            extents: tile_extents(&root.extents, local),
        })
    }

    /// True when the tile lies in the valid reference-frame tree.
    pub fn valid(&self, tile: TileId) -> bool {
        self.subtree_root(&tile).is_some()
    }
}

/// A tile embedded in its reference frame.
#[derive(Debug, Clone, Copy)]
pub struct NodeInfo<'a> {
    frame: &'a ReferenceFrame,
    root: &'a Node,
    tile: TileId,
    extents: Extents2,
}

impl<'a> NodeInfo<'a> {
    pub fn frame(&self) -> &'a ReferenceFrame {
        self.frame
    }

    pub fn node_id(&self) -> TileId {
        self.tile
    }

    pub fn srs(&self) -> &'a SrsDef {
        &self.root.srs
    }

    /// Extents of this tile in the subtree SRS.
    pub fn extents(&self) -> &Extents2 {
        &self.extents
    }

    /// Identity of the subtree root this tile lives under.
    pub fn subtree_root_id(&self) -> TileId {
        self.root.id
    }

    pub fn productive(&self) -> bool {
        self.root.productive
    }

    /// Point containment in the subtree SRS.
    pub fn inside(&self, p: &Point2) -> bool {
        self.extents.inside(p)
    }

    /// The first descendant `depth` levels down.
    pub fn lowest_child(&self, depth: Lod) -> TileId {
        self.tile.lowest_child(depth)
    }

    /// True when `descendant` still belongs to the same subtree as this
    /// node, i.e. no deeper subtree root with a different SRS takes over
    /// between the two.
    pub fn compatible(&self, descendant: TileId) -> bool {
        match self.frame.subtree_root(&descendant) {
            Some(root) => root.id == self.root.id,
            None => false,
        }
    }
}

/// Read-only catalogue of reference frames.
#[derive(Debug, Default)]
pub struct FrameRegistry {
    frames: BTreeMap<String, ReferenceFrame>,
}

impl FrameRegistry {
    /// Registry holding the built-in frames.
    pub fn with_defaults() -> Self {
        let mut registry = Self::default();
        registry.add(ReferenceFrame::webmercator());
        registry
    }

    pub fn add(&mut self, frame: ReferenceFrame) {
        self.frames.insert(frame.id.clone(), frame);
    }

    pub fn get(&self, id: &str) -> Option<&ReferenceFrame> {
        self.frames.get(id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &ReferenceFrame> {
        self.frames.values()
    }

    /// Merge frames from a JSON catalogue file.
    pub fn load_file(&mut self, path: &Path) -> Result<(), crate::Error> {
        let data = std::fs::read(path)?;
        let frames: Vec<ReferenceFrame> = serde_json::from_slice(&data)?;
        info!(path = %path.display(), count = frames.len(), "loaded reference frames");
        for frame in frames {
            self.add(frame);
        }
        Ok(())
    }
}
