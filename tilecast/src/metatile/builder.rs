//! Metatile generation from a warped DEM supergrid.
//!
//! The metatile is split into blocks, each contained in one subtree of the
//! reference frame (one SRS). For every productive block the DEM is warped
//! into the block's SRS on a regular supergrid and per-tile metadata is
//! aggregated from the samples. Unproductive blocks get metanodes with only
//! tileindex-derived flags and child validity.

use super::{flags, normalized_extents, GeomExtents, HeightRange, MetaNode, MetaTile};
use crate::error::Error;
use crate::frame::{NodeInfo, ReferenceFrame};
use crate::geo::srs::CsConvertor;
use crate::geo::{
    quad_area, Extents2, Extents3, LodRange, Point3, Size2, TileId, TileRange,
};
use crate::mask::MaskTree;
use crate::sink::Sink;
use crate::tileindex::{flags as ti_flags, TileIndex};
use crate::warper::{
    extents_plus_half_pixel, Arsenal, Operation, Raster, RasterRequest, Resampling,
};
use std::collections::BTreeSet;
use tracing::debug;

/// Binary logarithm of the number of metatile samples per tile.
///
/// NB: Do Not Change! This constant has huge impact on dataset stability:
/// changing it breaks tiles already served to the outer world.
pub const SAMPLES_PER_TILE_BIN_LOG: u8 = 3;

/// Metatile samples per tile, derived from the binary logarithm above.
pub const SAMPLES_PER_TILE: u32 = 1 << SAMPLES_PER_TILE_BIN_LOG;

/// A DEM sample is valid when its scalar channel clears this sentinel.
fn valid_sample(value: f64) -> bool {
    value >= -1e6
}

/// Everything the builder needs besides the tile id.
pub struct MetatileParams<'a> {
    pub frame: &'a ReferenceFrame,
    pub tile_index: &'a TileIndex,
    /// Published LOD range of the resource.
    pub lod_range: LodRange,
    /// Tile range at `lod_range.min`.
    pub tile_range: TileRange,
    pub credits: &'a BTreeSet<u16>,
    /// DEM dataset handed to the warper.
    pub dem_dataset: &'a str,
    pub geoid_grid: Option<&'a str>,
    pub mask: Option<&'a MaskTree>,
    /// Display-size override; texel size is computed when unset.
    pub display_size: Option<u32>,
}

/// One block of a metatile, fully contained in a single subtree.
struct MetatileBlock<'a> {
    /// Subtree root governing this block.
    ancestor: NodeInfo<'a>,
    /// Tiles of the block, at the metatile LOD.
    view: TileRange,
    /// Extents of `view` in the subtree SRS.
    extents: Extents2,
}

/// Split the metatile at `tile_id` into per-subtree blocks, clipped to the
/// published range.
fn metatile_blocks<'a>(
    frame: &'a ReferenceFrame,
    tile_id: TileId,
    lod_range: &LodRange,
    tile_range: &TileRange,
) -> Vec<MetatileBlock<'a>> {
    let lod = tile_id.lod;
    if !lod_range.contains(lod) {
        return Vec::new();
    }

    let origin = tile_id.metatile_id(frame.meta_binary_order);
    let side = (1u32 << frame.meta_binary_order) - 1;
    let view = TileRange::new(origin.x, origin.y, origin.x + side, origin.y + side);

    // clip by published range and the world at this lod
    let published = tile_range.shifted_down(lod - lod_range.min);
    let world_side = if lod >= 32 { u32::MAX } else { (1u32 << lod) - 1 };
    let view = view
        .intersection(&published)
        .intersection(&TileRange::new(0, 0, world_side, world_side));
    if view.is_empty() {
        return Vec::new();
    }

    // partition by subtree root; roots split space along aligned quads, so
    // every group is a rectangle
    let mut blocks: Vec<(TileId, TileRange)> = Vec::new();
    for y in view.y_min..=view.y_max {
        for x in view.x_min..=view.x_max {
            let Some(info) = frame.node_info(TileId::new(lod, x, y)) else {
                continue;
            };
            let root = info.subtree_root_id();
            match blocks.iter_mut().find(|(r, _)| *r == root) {
                Some((_, range)) => range.update(x, y),
                None => blocks.push((root, TileRange::new(x, y, x, y))),
            }
        }
    }

    blocks
        .into_iter()
        .filter_map(|(_, range)| {
            let nw = frame.node_info(TileId::new(lod, range.x_min, range.y_min))?;
            let se = frame.node_info(TileId::new(lod, range.x_max, range.y_max))?;
            let mut extents = *nw.extents();
            extents.update(se.extents().ll);
            extents.update(se.extents().ur);
            let ancestor = frame.node_info(nw.subtree_root_id())?;
            Some(MetatileBlock {
                ancestor,
                view: range,
                extents,
            })
        })
        .collect()
}

/// Initial metanode flags derived from tileindex flags.
fn ti2meta_flags(ti: u8) -> u8 {
    let mut meta = 0;
    if ti & ti_flags::MESH != 0 {
        meta |= flags::GEOMETRY;
    }
    if ti & ti_flags::NAVTILE != 0 {
        meta |= flags::NAVTILE;
    }
    meta
}

/// One accepted sample of the warped supergrid.
struct Sample {
    /// Value point in physical space.
    value: Point3,
    /// Minimum point in physical space.
    min: Point3,
    /// Maximum point in physical space.
    max: Point3,
    /// Height interval in navigation space.
    height_range: HeightRange,
    /// Height interval in the reference surface SRS.
    z_range: HeightRange,
    /// Surrogate height in the reference surface SRS.
    surrogate: f64,
}

impl Sample {
    fn build(
        x: f64,
        y: f64,
        value: &[f64],
        conv: &CsConvertor,
        nav_conv: &CsConvertor,
        ge_conv: &CsConvertor,
    ) -> Option<Sample> {
        let phys_value = conv.convert3(&Point3::new(x, y, value[0])).ok()?;
        let phys_min = conv.convert3(&Point3::new(x, y, value[1])).ok()?;
        let phys_max = conv.convert3(&Point3::new(x, y, value[2])).ok()?;

        let nav_min = nav_conv.convert3(&Point3::new(x, y, value[1])).ok()?;
        let nav_max = nav_conv.convert3(&Point3::new(x, y, value[2])).ok()?;

        let ge_min = ge_conv.convert3(&Point3::new(x, y, value[1])).ok()?;
        let ge_max = ge_conv.convert3(&Point3::new(x, y, value[2])).ok()?;
        let ge_value = ge_conv.convert3(&Point3::new(x, y, value[0])).ok()?;

        Some(Sample {
            value: phys_value,
            min: phys_min,
            max: phys_max,
            height_range: HeightRange::new(nav_min.z, nav_max.z),
            z_range: HeightRange::new(ge_min.z, ge_max.z),
            surrogate: ge_value.z,
        })
    }
}

/// Sampler over a value/min/max DEM raster with nodata dilation.
struct ValueMinMaxSampler<'a> {
    dem: &'a Raster,
}

impl<'a> ValueMinMaxSampler<'a> {
    fn new(dem: &'a Raster) -> Self {
        Self { dem }
    }

    /// Sample at `(i, j)`; an invalid pixel is replaced by its 3x3
    /// neighborhood (average value, min of mins, max of maxes). `None`
    /// when the whole neighborhood is invalid.
    fn get(&self, i: u32, j: u32) -> Option<[f64; 3]> {
        let v = self.dem.at(i, j);
        if valid_sample(v[0]) {
            return Some([v[0], v[1], v[2]]);
        }

        let mut out = [0.0, f64::MAX, f64::MIN];
        let mut count = 0;

        for jj in -1i64..=1 {
            for ii in -1i64..=1 {
                if ii == 0 && jj == 0 {
                    continue;
                }
                let x = i64::from(i) + ii;
                let y = i64::from(j) + jj;
                if !self.dem.in_bounds(x, y) {
                    continue;
                }
                let v = self.dem.at(x as u32, y as u32);
                if valid_sample(v[0]) {
                    out[0] += v[0];
                    out[1] = out[1].min(v[1]);
                    out[2] = out[2].max(v[2]);
                    count += 1;
                }
            }
        }

        if count == 0 {
            return None;
        }
        out[0] /= f64::from(count);
        Some(out)
    }
}

/// Build the metatile at `tile_id` from a DEM.
pub fn metatile_from_dem(
    tile_id: TileId,
    sink: &Sink,
    arsenal: &Arsenal,
    params: &MetatileParams<'_>,
) -> Result<MetaTile, Error> {
    let frame = params.frame;
    let blocks = metatile_blocks(frame, tile_id, &params.lod_range, &params.tile_range);
    if blocks.is_empty() {
        return Err(Error::NotFound(
            "metatile completely outside of configured range".to_string(),
        ));
    }

    let mut metatile = MetaTile::new(tile_id, frame.meta_binary_order);

    let set_children = |node: &mut MetaNode, node_id: TileId| {
        // some subtrees have false positives (e.g. polar caps); combine the
        // tile index with node validity
        for (i, child) in node_id.children().into_iter().enumerate() {
            let valid = params.tile_index.valid_subtree(child) && frame.valid(child);
            node.set_child(i, valid);
        }
    };

    for block in &blocks {
        sink.check_aborted()?;

        let view = block.view;
        let (bw, bh) = view.size();

        if !block.ancestor.productive() {
            // flags and children only, no geometry
            for y in view.y_min..=view.y_max {
                for x in view.x_min..=view.x_max {
                    let node_id = TileId::new(tile_id.lod, x, y);
                    let mut node = MetaNode::default();
                    node.set_flags(ti2meta_flags(params.tile_index.get(node_id)));
                    set_children(&mut node, node_id);
                    metatile.set(node_id, node);
                }
            }
            continue;
        }

        let grid_size = Size2::new(bw * SAMPLES_PER_TILE + 1, bh * SAMPLES_PER_TILE + 1);

        debug!(
            metatile = %metatile.id(),
            view = %view,
            ancestor = %block.ancestor.subtree_root_id(),
            "processing metatile block"
        );

        // value is intentionally warped by an averaging DEM filter
        let dem = arsenal.warper.warp(
            &RasterRequest::new(
                Operation::ValueMinMax,
                params.dem_dataset,
                block.ancestor.srs().clone(),
                // add half pixel to warp in grid coordinates
                extents_plus_half_pixel(
                    &block.extents,
                    Size2::new(grid_size.width - 1, grid_size.height - 1),
                ),
                grid_size,
                Resampling::Dem,
            ),
            sink,
        )?;

        sink.check_aborted()?;

        if dem.size() != grid_size || dem.channels() != 3 {
            return Err(Error::InternalError(format!(
                "warper returned {}x{}x{} raster for a {}x{}x3 request",
                dem.size().width,
                dem.size().height,
                dem.channels(),
                grid_size.width,
                grid_size.height,
            )));
        }

        let es = block.extents.size();
        // grid step in the block SRS
        let gts = (
            es.width / f64::from(grid_size.width - 1),
            es.height / f64::from(grid_size.height - 1),
        );

        let sds = block.ancestor.srs();
        let sds_geoid = match params.geoid_grid {
            Some(grid) => sds.with_geoid(grid),
            None => sds.clone(),
        };

        let conv = CsConvertor::new(&sds_geoid, &frame.physical_srs)?;
        let nav_conv = CsConvertor::new(&sds_geoid, &frame.navigation_srs)?;
        let ge_conv = CsConvertor::new(&sds_geoid, sds)?;

        // supergrid position of the block within its subtree, for mask
        // queries
        let root = block.ancestor.subtree_root_id();
        let depth = tile_id.lod - root.lod;
        let local_x = u64::from(view.x_min) - (u64::from(root.x) << depth);
        let local_y = u64::from(view.y_min) - (u64::from(root.y) << depth);
        let mask_depth = depth + SAMPLES_PER_TILE_BIN_LOG;

        // fill the sample grid
        let sampler = ValueMinMaxSampler::new(&dem);
        let mut grid: Vec<Option<Sample>> =
            Vec::with_capacity((grid_size.width * grid_size.height) as usize);
        for j in 0..grid_size.height {
            let y = block.extents.ur.y - f64::from(j) * gts.1;
            for i in 0..grid_size.width {
                if let Some(mask) = params.mask {
                    let sx = local_x * u64::from(SAMPLES_PER_TILE) + u64::from(i);
                    let sy = local_y * u64::from(SAMPLES_PER_TILE) + u64::from(j);
                    if !mask.covered(mask_depth, sx, sy) {
                        grid.push(None);
                        continue;
                    }
                }

                let sample = sampler.get(i, j).and_then(|value| {
                    let x = block.extents.ll.x + f64::from(i) * gts.0;
                    Sample::build(x, y, &value, &conv, &nav_conv, &ge_conv)
                });
                grid.push(sample);
            }
        }

        fn sample_at(grid: &[Option<Sample>], width: u32, i: u32, j: u32) -> Option<&Sample> {
            grid[(j * width + i) as usize].as_ref()
        }
        let at = |i: u32, j: u32| sample_at(&grid, grid_size.width, i, j);

        // aggregate per node
        for j in 0..bh {
            for i in 0..bw {
                let node_id = TileId::new(tile_id.lod, view.x_min + i, view.y_min + j);

                let mut node = MetaNode::default();
                node.set_flags(ti2meta_flags(params.tile_index.get(node_id)));
                let mut geometry = node.geometry();
                let navtile = node.navtile();

                let mut height_range = HeightRange::empty();
                let mut te = Extents3::invalid();
                let mut geom_extents = GeomExtents::default();
                let mut area = 0.0;
                let mut triangle_count: u32 = 0;
                let mut surrogate_sum = 0.0;
                let mut surrogate_count: u32 = 0;

                for jj in 0..=SAMPLES_PER_TILE {
                    let yy = j * SAMPLES_PER_TILE + jj;
                    for ii in 0..=SAMPLES_PER_TILE {
                        let xx = i * SAMPLES_PER_TILE + ii;

                        let sample = at(xx, yy);
                        if let Some(sample) = sample {
                            // update by both minimum and maximum points
                            te.update(sample.min);
                            te.update(sample.max);
                            geom_extents.z.unite(&sample.z_range);
                            surrogate_sum += sample.surrogate;
                            surrogate_count += 1;

                            if navtile {
                                height_range.unite(&sample.height_range);
                            }
                        }

                        if geometry && ii > 0 && jj > 0 {
                            let (qa, triangles) = quad_area(
                                at(xx - 1, yy - 1).map(|s| &s.value),
                                at(xx, yy - 1).map(|s| &s.value),
                                sample.map(|s| &s.value),
                                at(xx - 1, yy).map(|s| &s.value),
                            );
                            area += qa;
                            triangle_count += triangles;
                        }
                    }
                }

                set_children(&mut node, node_id);
                node.extents = normalized_extents(frame, &te);

                if !height_range.is_empty() {
                    node.height_range = Some((
                        height_range.min.floor() as i32,
                        height_range.max.ceil() as i32,
                    ));
                }

                if triangle_count == 0 {
                    // no content despite the tileindex hint
                    geometry = false;
                    node.set_geometry(false);
                    node.set_navtile(false);
                    node.height_range = None;
                    node.geom_extents = GeomExtents::default();
                } else {
                    node.geom_extents = geom_extents;
                }

                if geometry {
                    node.credits = params.credits.clone();

                    match params.display_size {
                        Some(display_size) => {
                            node.set_apply_display_size(true);
                            node.display_size = Some(display_size);
                        }
                        None => {
                            node.set_apply_texel_size(true);
                            // each triangle covers half a sample pixel
                            let texture_area = (f64::from(triangle_count)
                                * f64::from(crate::calipers::TILE_SIZE)
                                * f64::from(crate::calipers::TILE_SIZE))
                                / (2.0 * f64::from(SAMPLES_PER_TILE * SAMPLES_PER_TILE));
                            node.texel_size = (area / texture_area).sqrt();
                        }
                    }

                    if surrogate_count > 0 {
                        node.geom_extents.surrogate =
                            Some(surrogate_sum / f64::from(surrogate_count));
                    }
                }

                metatile.set(node_id, node);
            }
        }
    }

    Ok(metatile)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sink::MemorySink;
    use crate::warper::RasterWarper;
    use std::sync::Arc;
    use std::sync::Mutex;

    /// Warper producing a flat DEM at a fixed elevation, or all-nodata.
    struct FlatWarper {
        elevation: f64,
        nodata: bool,
        requests: Mutex<Vec<RasterRequest>>,
    }

    impl FlatWarper {
        fn new(elevation: f64) -> Arc<Self> {
            Arc::new(Self {
                elevation,
                nodata: false,
                requests: Mutex::new(Vec::new()),
            })
        }

        fn nodata() -> Arc<Self> {
            Arc::new(Self {
                elevation: 0.0,
                nodata: true,
                requests: Mutex::new(Vec::new()),
            })
        }
    }

    impl RasterWarper for FlatWarper {
        fn warp(&self, request: &RasterRequest, _sink: &Sink) -> Result<Raster, Error> {
            self.requests.lock().unwrap().push(request.clone());
            let value = if self.nodata { -1e9 } else { self.elevation };
            Ok(Raster::filled(request.size, 3, value))
        }
    }

    fn test_setup(
        lod: u8,
    ) -> (
        crate::frame::ReferenceFrame,
        TileIndex,
        LodRange,
        TileRange,
        BTreeSet<u16>,
    ) {
        let frame = crate::frame::ReferenceFrame::webmercator();
        let lod_range = LodRange::new(lod, lod);
        let tile_range = TileRange::new(0, 0, (1 << lod) - 1, (1 << lod) - 1);
        let mut ti = TileIndex::new();
        ti.add_layer(lod, tile_range);
        ti.fill(
            lod,
            tile_range,
            ti_flags::MESH | ti_flags::WATERTIGHT | ti_flags::NAVTILE,
        );
        let mut credits = BTreeSet::new();
        credits.insert(42);
        (frame, ti, lod_range, tile_range, credits)
    }

    fn build(
        warper: Arc<dyn RasterWarper>,
        tile_id: TileId,
        frame: &crate::frame::ReferenceFrame,
        ti: &TileIndex,
        lod_range: LodRange,
        tile_range: TileRange,
        credits: &BTreeSet<u16>,
    ) -> Result<MetaTile, Error> {
        let sink = Sink::new(MemorySink::new());
        let arsenal = Arsenal::new(warper);
        metatile_from_dem(
            tile_id,
            &sink,
            &arsenal,
            &MetatileParams {
                frame,
                tile_index: ti,
                lod_range,
                tile_range,
                credits,
                dem_dataset: "dem/test",
                geoid_grid: None,
                mask: None,
                display_size: None,
            },
        )
    }

    #[test]
    fn test_watertight_metatile() {
        let (frame, ti, lod_range, tile_range, credits) = test_setup(2);
        let warper = FlatWarper::new(500.0);
        let mt = build(
            warper.clone(),
            TileId::new(2, 0, 0),
            &frame,
            &ti,
            lod_range,
            tile_range,
            &credits,
        )
        .unwrap();

        for y in 0..4 {
            for x in 0..4 {
                let node = mt.get(TileId::new(2, x, y)).expect("node must exist");
                assert!(node.geometry(), "tile {x},{y} lost geometry");
                assert!(node.navtile());
                assert!(node.apply_texel_size());
                assert!(node.texel_size > 0.0);
                assert!(node.extents.valid());
                assert_eq!(node.credits.iter().copied().collect::<Vec<_>>(), vec![42]);
                let hr = node.height_range.expect("height range");
                assert!(hr.0 <= 500 && hr.1 >= 500, "height range {hr:?}");
                let surrogate = node.geom_extents.surrogate.expect("surrogate");
                assert!((surrogate - 500.0).abs() < 1e-6, "surrogate {surrogate}");
            }
        }
    }

    #[test]
    fn test_nodata_collapse() {
        let (frame, ti, lod_range, tile_range, credits) = test_setup(2);
        let mt = build(
            FlatWarper::nodata(),
            TileId::new(2, 0, 0),
            &frame,
            &ti,
            lod_range,
            tile_range,
            &credits,
        )
        .unwrap();

        for y in 0..4 {
            for x in 0..4 {
                let node = mt.get(TileId::new(2, x, y)).expect("node must exist");
                assert!(!node.geometry());
                assert!(!node.navtile());
                assert!(node.height_range.is_none());
                assert!(!node.extents.valid());
                assert!(node.geom_extents.is_empty());
                assert!(node.credits.is_empty());
            }
        }
    }

    #[test]
    fn test_determinism() {
        let (frame, ti, lod_range, tile_range, credits) = test_setup(2);

        let mut outputs = Vec::new();
        for _ in 0..2 {
            let mt = build(
                FlatWarper::new(123.0),
                TileId::new(2, 0, 0),
                &frame,
                &ti,
                lod_range,
                tile_range,
                &credits,
            )
            .unwrap();
            let mut bytes = Vec::new();
            mt.save(&mut bytes).unwrap();
            outputs.push(bytes);
        }
        assert_eq!(outputs[0], outputs[1]);
    }

    #[test]
    fn test_texel_size_formula() {
        let (frame, ti, lod_range, tile_range, credits) = test_setup(2);
        let mt = build(
            FlatWarper::new(0.0),
            TileId::new(2, 0, 0),
            &frame,
            &ti,
            lod_range,
            tile_range,
            &credits,
        )
        .unwrap();

        let node = mt.get(TileId::new(2, 1, 1)).unwrap();
        // fully watertight grid: every interior vertex contributes 2 triangles
        let triangle_count = 2 * SAMPLES_PER_TILE * SAMPLES_PER_TILE;
        let texture_area = (f64::from(triangle_count)
            * f64::from(crate::calipers::TILE_SIZE)
            * f64::from(crate::calipers::TILE_SIZE))
            / (2.0 * f64::from(SAMPLES_PER_TILE * SAMPLES_PER_TILE));

        // flat tile area in physical space equals the tile extents area
        let info = frame.node_info(TileId::new(2, 1, 1)).unwrap();
        let s = info.extents().size();
        let area = s.width * s.height;

        let expected = (area / texture_area).sqrt();
        assert!(
            (node.texel_size - expected).abs() < 1e-6 * expected,
            "texel {} vs {}",
            node.texel_size,
            expected
        );
    }

    #[test]
    fn test_outside_range_is_not_found() {
        let (frame, ti, lod_range, tile_range, credits) = test_setup(2);
        // a metatile below the published LOD range has no blocks
        let err = build(
            FlatWarper::new(0.0),
            TileId::new(3, 0, 0),
            &frame,
            &ti,
            lod_range,
            tile_range,
            &credits,
        )
        .unwrap_err();
        assert!(matches!(err, Error::NotFound(_)));
    }

    #[test]
    fn test_abort_stops_before_warp() {
        let (frame, ti, lod_range, tile_range, credits) = test_setup(2);
        let warper = FlatWarper::new(0.0);

        let sink = Sink::new(MemorySink::new());
        sink.abort_handle()
            .store(true, std::sync::atomic::Ordering::Relaxed);
        let arsenal = Arsenal::new(warper.clone() as Arc<dyn RasterWarper>);
        let err = metatile_from_dem(
            TileId::new(2, 0, 0),
            &sink,
            &arsenal,
            &MetatileParams {
                frame: &frame,
                tile_index: &ti,
                lod_range,
                tile_range,
                credits: &credits,
                dem_dataset: "dem/test",
                geoid_grid: None,
                mask: None,
                display_size: None,
            },
        )
        .unwrap_err();
        assert!(matches!(err, Error::Aborted));
        assert!(warper.requests.lock().unwrap().is_empty());
    }

    #[test]
    fn test_display_size_override() {
        let (frame, ti, lod_range, tile_range, credits) = test_setup(2);
        let sink = Sink::new(MemorySink::new());
        let arsenal = Arsenal::new(FlatWarper::new(10.0) as Arc<dyn RasterWarper>);
        let mt = metatile_from_dem(
            TileId::new(2, 0, 0),
            &sink,
            &arsenal,
            &MetatileParams {
                frame: &frame,
                tile_index: &ti,
                lod_range,
                tile_range,
                credits: &credits,
                dem_dataset: "dem/test",
                geoid_grid: None,
                mask: None,
                display_size: Some(1024),
            },
        )
        .unwrap();

        let node = mt.get(TileId::new(2, 0, 0)).unwrap();
        assert!(node.apply_display_size());
        assert!(!node.apply_texel_size());
        assert_eq!(node.display_size, Some(1024));
        assert_eq!(node.texel_size, 0.0);
    }

    #[test]
    fn test_mask_drops_samples() {
        let (frame, ti, lod_range, tile_range, credits) = test_setup(2);
        let sink = Sink::new(MemorySink::new());
        let arsenal = Arsenal::new(FlatWarper::new(10.0) as Arc<dyn RasterWarper>);
        let mask = MaskTree::empty();
        let mt = metatile_from_dem(
            TileId::new(2, 0, 0),
            &sink,
            &arsenal,
            &MetatileParams {
                frame: &frame,
                tile_index: &ti,
                lod_range,
                tile_range,
                credits: &credits,
                dem_dataset: "dem/test",
                geoid_grid: None,
                mask: Some(&mask),
                display_size: None,
            },
        )
        .unwrap();

        // everything masked away behaves like nodata
        let node = mt.get(TileId::new(2, 0, 0)).unwrap();
        assert!(!node.geometry());
        assert!(!node.extents.valid());
    }
}
