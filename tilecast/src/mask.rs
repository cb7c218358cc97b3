//! Spatial mask trees.
//!
//! A [`MaskTree`] is a quadtree of coverage: full, empty or split. It
//! answers point queries at arbitrary depth, which is what the metatile
//! sampling grid needs (sample positions are finer than tiles).

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
enum MaskNode {
    Full,
    Empty,
    Split(Box<[MaskNode; 4]>),
}

impl MaskNode {
    fn covered(&self, depth: u8, x: u64, y: u64) -> bool {
        match self {
            MaskNode::Full => true,
            MaskNode::Empty => false,
            MaskNode::Split(children) => {
                if depth == 0 {
                    // a split node at query depth is partially covered;
                    // treat the sample as inside
                    return true;
                }
                let shift = depth - 1;
                let index = (((y >> shift) & 1) << 1) | ((x >> shift) & 1);
                let mask = (1u64 << shift) - 1;
                children[index as usize].covered(shift, x & mask, y & mask)
            }
        }
    }
}

/// Quadtree coverage mask.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MaskTree {
    root: MaskNode,
}

impl MaskTree {
    /// Mask covering everything.
    pub fn full() -> Self {
        Self {
            root: MaskNode::Full,
        }
    }

    /// Mask covering nothing.
    pub fn empty() -> Self {
        Self {
            root: MaskNode::Empty,
        }
    }

    /// Mask covering the union of the given quads, each `(depth, x, y)`.
    pub fn from_quads(quads: &[(u8, u64, u64)]) -> Self {
        let mut tree = Self::empty();
        for &(depth, x, y) in quads {
            set_quad(&mut tree.root, depth, x, y);
        }
        tree
    }

    /// Point query at `depth` levels below the root; `(x, y)` are grid
    /// coordinates at that depth.
    pub fn covered(&self, depth: u8, x: u64, y: u64) -> bool {
        self.root.covered(depth, x, y)
    }
}

fn set_quad(node: &mut MaskNode, depth: u8, x: u64, y: u64) {
    if matches!(node, MaskNode::Full) {
        return;
    }
    if depth == 0 {
        *node = MaskNode::Full;
        return;
    }

    if matches!(node, MaskNode::Empty) {
        *node = MaskNode::Split(Box::new([
            MaskNode::Empty,
            MaskNode::Empty,
            MaskNode::Empty,
            MaskNode::Empty,
        ]));
    }

    if let MaskNode::Split(children) = node {
        let shift = depth - 1;
        let index = (((y >> shift) & 1) << 1) | ((x >> shift) & 1);
        let mask = (1u64 << shift) - 1;
        set_quad(&mut children[index as usize], shift, x & mask, y & mask);

        // collapse fully covered nodes
        if children.iter().all(|c| matches!(c, MaskNode::Full)) {
            *node = MaskNode::Full;
        }
    }
}
