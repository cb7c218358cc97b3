//! Dataset measurement ("calipers").
//!
//! Given a dataset descriptor and a reference frame, this module computes,
//! per subtree of the frame, the level of detail at which the dataset's
//! pixels map to roughly one tile texel, the first level at which the
//! dataset covers a whole tile, and the tile range at the bottom level.
//! It also reports a global ground sample distance measured in a local
//! tangent plane.
//!
//! Everything here works on projected quadrilaterals. A failed coordinate
//! transform is a normal "point is outside this subtree" signal and never
//! aborts the measurement.

use crate::dataset::Descriptor;
use crate::error::Error;
use crate::frame::{NodeInfo, ReferenceFrame};
use crate::geo::srs::CsConvertor;
use crate::geo::{
    tile_size, triangle_area_2d, Extents2, Lod, LodRange, Point2, Size2f, TileId, TileRange,
};
use rayon::prelude::*;
use tracing::{debug, info};

/// Side of a bound-layer tile in pixels.
pub const TILE_SIZE: u32 = 256;

/// Pixel count of one bound-layer tile.
fn tile_area() -> f64 {
    f64::from(TILE_SIZE) * f64::from(TILE_SIZE)
}

/// Number of grid steps along each dataset axis while sampling.
const GRID_STEPS: usize = 255;

/// Kind of source dataset.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DatasetType {
    Dem,
    Ophoto,
}

/// Measurement tunables.
#[derive(Debug, Clone)]
pub struct MeasureParams {
    /// Forced dataset type; autodetected when unset.
    pub dataset_type: Option<DatasetType>,
    /// Inverse scale between a DEM's resolution and the most detailed
    /// orthophoto that can be draped on it.
    pub dem_to_ophoto_scale: f64,
    /// Inverse tile fraction at which border refinement stops.
    pub tile_fraction_limit: f64,
}

impl Default for MeasureParams {
    fn default() -> Self {
        Self {
            dataset_type: None,
            dem_to_ophoto_scale: 3.0,
            tile_fraction_limit: 32.0,
        }
    }
}

/// Result ranges for one subtree; the tile range is expressed at the bottom
/// of the LOD range.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Ranges {
    pub lod_range: LodRange,
    pub tile_range: TileRange,
}

impl Ranges {
    /// Tile range of any LOD within the range, derived from the bottom one.
    pub fn tile_range_at(&self, lod: Lod) -> TileRange {
        debug_assert!(self.lod_range.contains(lod));
        self.tile_range.shifted_up(self.lod_range.max - lod)
    }
}

/// Measurement output for one subtree root.
#[derive(Debug, Clone)]
pub struct NodeRanges {
    /// SRS of the subtree (proj string).
    pub srs: String,
    /// Identity of the subtree root.
    pub node_id: TileId,
    pub ranges: Ranges,
}

/// Complete measurement of a dataset against a reference frame.
#[derive(Debug, Clone)]
pub struct Measurement {
    /// Approximate ground sample distance in meters. Informational.
    pub gsd: f64,
    /// Per-subtree results, ordered as the frame orders its nodes.
    pub nodes: Vec<NodeRanges>,
}

/// Detect the dataset type from its band layout.
pub fn detect_type(
    ds: &Descriptor,
    forced: Option<DatasetType>,
) -> Result<DatasetType, Error> {
    if let Some(forced) = forced {
        return Ok(forced);
    }

    if ds.bands >= 3 {
        return Ok(DatasetType::Ophoto);
    }

    if ds.bands != 1 {
        return Err(Error::UnsupportedDataset(format!(
            "cannot autodetect dataset type, unsupported number of bands ({})",
            ds.bands
        )));
    }

    if ds.data_type.is_byte() {
        // probably monochromatic orthophoto
        return Ok(DatasetType::Ophoto);
    }

    Ok(DatasetType::Dem)
}

/// Ground sample distance of the dataset's center pixel, measured in a
/// transverse-Mercator plane tangent at the dataset center.
pub fn compute_gsd(ds: &Descriptor, frame: &ReferenceFrame) -> Result<f64, Error> {
    let geographic = frame.navigation_srs.geographic();

    let ds_center = ds.extents.center();
    let ll_center = CsConvertor::new(&ds.srs, &geographic)?.convert(&ds_center)?;

    let tm = geographic.transverse_mercator(ll_center.y, ll_center.x);
    let ds2tm = CsConvertor::new(&ds.srs, &tm)?;

    // half-pixel size in dataset units
    let s = ds.extents.size();
    let hw = s.width / (2.0 * f64::from(ds.size.width));
    let hh = s.height / (2.0 * f64::from(ds.size.height));

    let corners = [
        ds2tm.convert(&Point2::new(ds_center.x - hw, ds_center.y - hh))?,
        ds2tm.convert(&Point2::new(ds_center.x - hw, ds_center.y + hh))?,
        ds2tm.convert(&Point2::new(ds_center.x + hw, ds_center.y + hh))?,
        ds2tm.convert(&Point2::new(ds_center.x + hw, ds_center.y - hh))?,
    ];

    let px_area = triangle_area_2d(&corners[0], &corners[1], &corners[2])
        + triangle_area_2d(&corners[2], &corners[3], &corners[0]);

    Ok(px_area.sqrt())
}

/// Measure a dataset against a reference frame.
pub fn measure(
    ds: &Descriptor,
    frame: &ReferenceFrame,
    params: &MeasureParams,
) -> Result<Measurement, Error> {
    if params.dem_to_ophoto_scale < 1.0 {
        return Err(Error::InvalidConfiguration(
            "demToOphotoScale must be >= 1".to_string(),
        ));
    }
    if params.tile_fraction_limit < 1.0 {
        return Err(Error::InvalidConfiguration(
            "tileFractionLimit must be >= 1".to_string(),
        ));
    }

    let dataset_type = detect_type(ds, params.dataset_type)?;
    let gsd = compute_gsd(ds, frame)?;

    let inv_gsd_scale = match dataset_type {
        DatasetType::Dem => params.dem_to_ophoto_scale,
        DatasetType::Ophoto => 1.0,
    };

    info!(
        frame = %frame.id,
        ?dataset_type,
        gsd,
        inv_gsd_scale,
        "measuring dataset"
    );

    let frame_nodes = frame.nodes();
    let nodes: Vec<NodeRanges> = frame_nodes
        .par_iter()
        .filter(|node| node.productive())
        .filter_map(|node| {
            NodeMeasure::new(ds, *node)
                .ok()?
                .run(inv_gsd_scale, params.tile_fraction_limit)
        })
        .collect();

    Ok(Measurement { gsd, nodes })
}

/// Working state for measuring one subtree.
struct NodeMeasure<'a> {
    ds: &'a Descriptor,
    node: NodeInfo<'a>,
    conv: CsConvertor,
    /// Dataset extents in dataset SRS.
    extents: Extents2,
    /// Sampling step in dataset units.
    step: Size2f,
    /// Validity of each grid point.
    grid: Vec<bool>,
    /// Projected grid points (valid where `grid` says so).
    projected: Vec<Point2>,
    /// Dataset footprint inside the node, in node SRS.
    local_extents: Extents2,
    /// Sampling step in dataset pixels.
    step_in_pixels: Size2f,
    /// Border refinement stops below this source footprint.
    source_block_limit: Size2f,
    local_lod: Lod,
}

impl<'a> NodeMeasure<'a> {
    fn new(ds: &'a Descriptor, node: NodeInfo<'a>) -> Result<Self, Error> {
        let conv = CsConvertor::new(&ds.srs, node.srs())?;
        let extents = ds.extents;
        let s = extents.size();
        let points = (GRID_STEPS + 1) * (GRID_STEPS + 1);
        Ok(Self {
            ds,
            node,
            conv,
            extents,
            step: Size2f::new(s.width / GRID_STEPS as f64, s.height / GRID_STEPS as f64),
            grid: vec![false; points],
            projected: vec![Point2::new(0.0, 0.0); points],
            local_extents: Extents2::invalid(),
            step_in_pixels: Size2f::new(
                f64::from(ds.size.width) / GRID_STEPS as f64,
                f64::from(ds.size.height) / GRID_STEPS as f64,
            ),
            source_block_limit: Size2f::new(0.0, 0.0),
            local_lod: 0,
        })
    }

    fn run(mut self, inv_gsd_scale: f64, tile_fraction_limit: f64) -> Option<NodeRanges> {
        if !self.sample(inv_gsd_scale, tile_fraction_limit) {
            return None;
        }
        let tile_range = self.refine();
        if tile_range.is_empty() {
            return None;
        }
        let min_lod = self.min_lod();

        let node_id = self.node.node_id();
        let lod = node_id.lod + self.local_lod;
        // coverage can lag behind resolution for tiny datasets
        let min_lod = min_lod.min(lod);

        debug!(
            node = %node_id,
            lod,
            min_lod,
            %tile_range,
            "measured subtree"
        );

        Some(NodeRanges {
            srs: self.node.srs().as_str().to_string(),
            node_id,
            ranges: Ranges {
                lod_range: LodRange::new(min_lod, lod),
                tile_range,
            },
        })
    }

    fn index(&self, i: usize, j: usize) -> usize {
        j * (GRID_STEPS + 1) + i
    }

    /// Project a dataset point into the node SRS. `None` when the
    /// conversion fails or the result lies outside the node; successful
    /// points grow the node-local extents.
    fn convert(&mut self, x: f64, y: f64) -> Option<Point2> {
        let p = self.conv.convert(&Point2::new(x, y)).ok()?;
        if !self.node.inside(&p) {
            return None;
        }
        self.local_extents.update(p);
        Some(p)
    }

    /// Sample the dataset on a regular grid and pick the best local LOD
    /// from the grid point closest to the dataset center.
    fn sample(&mut self, inv_gsd_scale: f64, tile_fraction_limit: f64) -> bool {
        let pane = self.node.extents().size();
        let es = self.extents.size();
        let ds_center = self.extents.center();

        // pixel and half-pixel size in dataset units
        let px = Size2f::new(
            es.width / f64::from(self.ds.size.width),
            es.height / f64::from(self.ds.size.height),
        );
        let hpx = Size2f::new(px.width / 2.0, px.height / 2.0);

        let mut best_lod: Option<f64> = None;
        // candidate order: (distance, j, i), lexicographic, so the result
        // does not depend on traversal order
        let mut best_key = (f64::MAX, usize::MAX, usize::MAX);

        for j in 0..=GRID_STEPS {
            let y = self.extents.ll.y + j as f64 * self.step.height;
            for i in 0..=GRID_STEPS {
                let x = self.extents.ll.x + i as f64 * self.step.width;

                let Some(projected) = self.convert(x, y) else {
                    continue;
                };
                let idx = self.index(i, j);
                self.grid[idx] = true;
                self.projected[idx] = projected;

                // make the point a pixel center, shifting inward on the
                // dataset boundary
                let mut p = Point2::new(x, y);
                if i == 0 {
                    p.x += hpx.width;
                } else if i == GRID_STEPS {
                    p.x -= hpx.width;
                }
                if j == 0 {
                    p.y += hpx.height;
                } else if j == GRID_STEPS {
                    p.y -= hpx.height;
                }

                let distance = p.distance(&ds_center);
                let key = (distance, j, i);
                if key >= best_key {
                    continue;
                }

                // project a one-pixel quad around the point
                let Some(c0) = self.convert(p.x - hpx.width, p.y - hpx.height) else {
                    continue;
                };
                let Some(c1) = self.convert(p.x - hpx.width, p.y + hpx.height) else {
                    continue;
                };
                let Some(c2) = self.convert(p.x + hpx.width, p.y + hpx.height) else {
                    continue;
                };
                let Some(c3) = self.convert(p.x + hpx.width, p.y - hpx.height) else {
                    continue;
                };

                let px_area = triangle_area_2d(&c0, &c1, &c2) + triangle_area_2d(&c2, &c3, &c0);
                if px_area <= 0.0 {
                    continue;
                }

                // number of tiles per side is sqrt(pane area / tile area);
                // log2 of that is the LOD; two passes keep the huge pane
                // area from losing precision
                let tmp = (pane.width * inv_gsd_scale * inv_gsd_scale)
                    / (px_area * tile_area());
                let lod = 0.5 * (tmp * pane.height).log2();

                if lod >= 0.0 {
                    best_lod = Some(lod);
                    best_key = key;
                }
            }
        }

        let Some(best_lod) = best_lod else {
            return false;
        };

        // depths beyond the tile pyramid are meaningless
        if best_lod >= 31.0 {
            return false;
        }
        let computed = best_lod.ceil() as Lod;

        // the subtree must actually reach the computed depth
        let lowest_child = self.node.lowest_child(computed);
        if !self.node.compatible(lowest_child) {
            return false;
        }

        self.local_lod = computed;
        self.source_block_limit = Size2f::new(
            f64::from(TILE_SIZE) / (inv_gsd_scale * tile_fraction_limit),
            f64::from(TILE_SIZE) / (inv_gsd_scale * tile_fraction_limit),
        );
        true
    }

    /// Refine the node-local extents along the coverage border, then derive
    /// the tile range at the local LOD.
    fn refine(&mut self) -> TileRange {
        for j in 1..=GRID_STEPS {
            let y = self.extents.ll.y + (j - 1) as f64 * self.step.height;
            for i in 1..=GRID_STEPS {
                let x = self.extents.ll.x + (i - 1) as f64 * self.step.width;

                let ll = self.grid[self.index(i - 1, j - 1)];
                let ul = self.grid[self.index(i - 1, j)];
                let ur = self.grid[self.index(i, j)];
                let lr = self.grid[self.index(i, j - 1)];

                let count = usize::from(ll) + usize::from(ul) + usize::from(ur) + usize::from(lr);
                if count == 0 || count == 4 {
                    continue;
                }

                // border cell: corners ordered ll, ul, ur, lr
                let cell = Extents2::new(x, y, x + self.step.width, y + self.step.height);
                let corners = [
                    ll.then(|| self.projected[self.index(i - 1, j - 1)]),
                    ul.then(|| self.projected[self.index(i - 1, j)]),
                    ur.then(|| self.projected[self.index(i, j)]),
                    lr.then(|| self.projected[self.index(i, j - 1)]),
                ];

                self.divide_border_block(self.step_in_pixels, &cell, &corners);
            }
        }

        let mut tile_range = TileRange::empty();
        if !self.local_extents.valid() {
            return tile_range;
        }

        let node_extents = *self.node.extents();
        let ts = tile_size(&node_extents, self.local_lod);
        let origin = node_extents.ul();
        let last = (1u64 << self.local_lod) - 1;

        let mut update = |p: Point2| {
            let tx = ((p.x - origin.x) / ts.width).floor();
            let ty = ((origin.y - p.y) / ts.height).floor();
            let tx = (tx.max(0.0) as u64).min(last) as u32;
            let ty = (ty.max(0.0) as u64).min(last) as u32;
            tile_range.update(tx, ty);
        };

        update(self.local_extents.ll);
        update(self.local_extents.ul());
        update(self.local_extents.ur);
        update(self.local_extents.lr());

        tile_range
    }

    /// Recursively bisect a partially covered block, projecting the center
    /// cross, until the source footprint drops below the refinement limit.
    fn divide_border_block(
        &mut self,
        block_px: Size2f,
        extents: &Extents2,
        corners: &[Option<Point2>; 4],
    ) {
        if block_px.width < self.source_block_limit.width
            && block_px.height < self.source_block_limit.height
        {
            // too little source
            return;
        }

        let block_px = Size2f::new(block_px.width / 2.0, block_px.height / 2.0);
        let ec = extents.center();

        let center = self.convert(ec.x, ec.y);
        let left = self.convert(extents.ll.x, ec.y);
        let right = self.convert(extents.ur.x, ec.y);
        let lower = self.convert(ec.x, extents.ll.y);
        let upper = self.convert(ec.x, extents.ur.y);

        let partial = |c: &[Option<Point2>; 4]| {
            let count = c.iter().filter(|p| p.is_some()).count();
            count > 0 && count < 4
        };

        // ll
        let c = [corners[0], left, center, lower];
        if partial(&c) {
            let e = Extents2::new(extents.ll.x, extents.ll.y, ec.x, ec.y);
            self.divide_border_block(block_px, &e, &c);
        }

        // ul
        let c = [left, corners[1], upper, center];
        if partial(&c) {
            let e = Extents2::new(extents.ll.x, ec.y, ec.x, extents.ur.y);
            self.divide_border_block(block_px, &e, &c);
        }

        // ur
        let c = [center, upper, corners[2], right];
        if partial(&c) {
            let e = Extents2::new(ec.x, ec.y, extents.ur.x, extents.ur.y);
            self.divide_border_block(block_px, &e, &c);
        }

        // lr
        let c = [lower, center, right, corners[3]];
        if partial(&c) {
            let e = Extents2::new(ec.x, extents.ll.y, extents.ur.x, ec.y);
            self.divide_border_block(block_px, &e, &c);
        }
    }

    /// First local LOD at which the dataset covers at least one whole tile,
    /// from the pane/footprint area ratio.
    fn min_lod(&self) -> Lod {
        let pane = self.node.extents().size();
        let local = self.local_extents.size();

        let lod = 0.5 * ((pane.width / local.width) * (pane.height / local.height)).log2();
        // a degenerate footprint yields an unbounded ratio
        let lod = lod.clamp(0.0, 31.0).floor();

        self.node.node_id().lod + lod as Lod
    }
}
