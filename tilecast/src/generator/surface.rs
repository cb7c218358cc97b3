//! DEM-backed surface generator.
//!
//! Serves metatiles built from a warped DEM plus the thin per-tile
//! endpoints around them (2D mask, 2D metatile, credits, debug node,
//! navtile, a regular-grid mesh). Persists `tileset.conf` and
//! `tileset.index` next to `resource.json`; when both are present and
//! consistent the generator becomes ready without preparation.

use super::{
    Config, FileFlavor, Finder, Generator, GeneratorCore, GeneratorFactory, GeneratorKind,
    Params, TileFile,
};
use crate::error::Error;
use crate::frame::ReferenceFrame;
use crate::geo::srs::CsConvertor;
use crate::geo::{LodRange, Point3, Size2, TileId, TileRange};
use crate::mask::MaskTree;
use crate::metatile::builder::{metatile_from_dem, MetatileParams};
use crate::metatile::MetaTile;
use crate::resource::{Definition, SurfaceDemDef};
use crate::sink::{FileClass, FileInfo, Sink};
use crate::warper::{Arsenal, Operation, RasterRequest, Resampling};
use image::{DynamicImage, GrayImage, ImageFormat};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::io::Cursor;
use std::path::PathBuf;
use std::sync::{Arc, RwLock};
use tracing::{debug, info};

const CONFIG_FILE: &str = "tileset.conf";
const INDEX_FILE: &str = "tileset.index";

/// Samples per side of a generated mesh grid.
const MESH_SAMPLES: u32 = 128;

/// Vertices per side of a generated navtile.
const NAVTILE_SIZE: u32 = 65;

/// Persisted tileset properties.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TilesetProperties {
    id: String,
    reference_frame: String,
    credits: BTreeSet<u16>,
    lod_range: LodRange,
    tile_range: TileRange,
    revision: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    nominal_texel_size: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    merge_bottom_lod: Option<u8>,
}

/// Generator serving a DEM dataset as a surface.
pub struct SurfaceDem {
    core: GeneratorCore,
    frame: ReferenceFrame,
    definition: SurfaceDemDef,
    dem_dataset: String,
    mask: Option<MaskTree>,
    index: RwLock<Option<crate::tileindex::TileIndex>>,
    #[allow(dead_code)]
    finder: Finder,
}

impl SurfaceDem {
    pub fn new(params: Params, config: &Config, finder: Finder) -> Result<Arc<Self>, Error> {
        let frame = params.reference_frame()?;
        let core = GeneratorCore::new(params, config)?;

        // the core may have reverted to the saved definition; always read
        // the definition back from it
        let resource = core.resource();
        let Definition::SurfaceDem(definition) = resource.definition.clone() else {
            return Err(Error::InvalidConfiguration(format!(
                "resource <{}> does not match generator <{}>",
                resource.id,
                GeneratorKind::surface_dem()
            )));
        };

        let dem_dataset = core.absolute_dataset(config, &definition.dataset);
        let mask = match &definition.mask {
            Some(path) => load_mask(core.absolute_dataset(config, path).into()),
            None => None,
        };

        let generator = Arc::new(Self {
            core,
            frame,
            definition,
            dem_dataset,
            mask,
            index: RwLock::new(None),
            finder,
        });

        generator.load_files()?;
        Ok(generator)
    }

    fn config_path(&self) -> PathBuf {
        self.core.root().join(CONFIG_FILE)
    }

    fn index_path(&self) -> PathBuf {
        self.core.root().join(INDEX_FILE)
    }

    /// Reload persisted tileset files; when both exist the generator flips
    /// straight to ready. Missing or unreadable files just leave it
    /// unprepared.
    fn load_files(&self) -> Result<(), Error> {
        let config_path = self.config_path();
        let index_path = self.index_path();
        if !config_path.exists() || !index_path.exists() {
            debug!(resource = %self.core.id(), "generator not ready");
            return Ok(());
        }

        let loaded: Result<(TilesetProperties, crate::tileindex::TileIndex), Error> = (|| {
            let properties = serde_json::from_slice(&std::fs::read(&config_path)?)?;
            let index = serde_json::from_slice(&std::fs::read(&index_path)?)?;
            Ok((properties, index))
        })();

        let Ok((mut properties, index)) = loaded else {
            debug!(resource = %self.core.id(), "stale tileset files, needs prepare");
            return Ok(());
        };

        if self.update_properties(&mut properties) {
            // something changed in properties, re-save
            std::fs::write(&config_path, serde_json::to_vec_pretty(&properties)?)?;
        }

        *self.index.write().expect("surface poisoned") = Some(index);

        self.core.make_ready()?;
        Ok(())
    }

    /// Sync safely-changeable definition fields into loaded properties.
    fn update_properties(&self, properties: &mut TilesetProperties) -> bool {
        let mut changed = false;

        if properties.nominal_texel_size != self.definition.nominal_texel_size {
            properties.nominal_texel_size = self.definition.nominal_texel_size;
            changed = true;
        }
        if properties.merge_bottom_lod != self.definition.merge_bottom_lod {
            properties.merge_bottom_lod = self.definition.merge_bottom_lod;
            changed = true;
        }

        changed
    }

    /// Tileindex flags of one tile, or zero when not ready.
    fn index_flags(&self, tile: TileId) -> u8 {
        self.index
            .read()
            .expect("surface poisoned")
            .as_ref()
            .map(|index| index.get(tile))
            .unwrap_or(0)
    }

    fn build_metatile(
        &self,
        tile: TileId,
        sink: &Sink,
        arsenal: &Arsenal,
    ) -> Result<MetaTile, Error> {
        let resource = self.core.resource();
        let state = self.index.read().expect("surface poisoned");
        let index = state
            .as_ref()
            .ok_or_else(|| Error::Unavailable("tile index not loaded".to_string()))?;

        metatile_from_dem(
            tile,
            sink,
            arsenal,
            &MetatileParams {
                frame: &self.frame,
                tile_index: index,
                lod_range: resource.lod_range,
                tile_range: resource.tile_range,
                credits: &resource.credits,
                dem_dataset: &self.dem_dataset,
                geoid_grid: self.definition.geoid_grid.as_deref(),
                mask: self.mask.as_ref(),
                display_size: None,
            },
        )
    }

    fn generate_metatile(
        &self,
        tile: TileId,
        sink: &Sink,
        arsenal: &Arsenal,
    ) -> Result<(), Error> {
        sink.check_aborted()?;
        let metatile = self.build_metatile(tile, sink, arsenal)?;

        let mut out = Vec::new();
        metatile.save(&mut out)?;
        sink.content(out, FileInfo::new("application/json", FileClass::Data));
        Ok(())
    }

    /// Regular-grid mesh from a DEM warp. Simplification and skirting are
    /// the tileset machinery's business, not ours.
    fn generate_mesh(&self, tile: TileId, sink: &Sink, arsenal: &Arsenal) -> Result<(), Error> {
        let flags = self.index_flags(tile);
        if flags & crate::tileindex::flags::MESH == 0 {
            return Err(Error::NotFound("no mesh for this tile".to_string()));
        }

        let node = self
            .frame
            .node_info(tile)
            .ok_or_else(|| Error::NotFound("tile outside reference frame tree".to_string()))?;

        sink.check_aborted()?;

        let size = Size2::new(MESH_SAMPLES + 1, MESH_SAMPLES + 1);
        let dem = arsenal.warper.warp(
            &RasterRequest::new(
                Operation::Dem,
                &self.dem_dataset,
                node.srs().clone(),
                *node.extents(),
                size,
                Resampling::Dem,
            ),
            sink,
        )?;
        sink.check_aborted()?;

        let conv = CsConvertor::new(node.srs(), &self.frame.physical_srs)?;
        let extents = node.extents();
        let step = (
            extents.size().width / f64::from(MESH_SAMPLES),
            extents.size().height / f64::from(MESH_SAMPLES),
        );

        // vertices keyed by grid position; faces over fully valid quads
        let mut vertex_index = vec![u32::MAX; (size.width * size.height) as usize];
        let mut vertices: Vec<[f64; 3]> = Vec::new();
        for j in 0..size.height {
            let y = extents.ur.y - f64::from(j) * step.1;
            for i in 0..size.width {
                let h = dem.at(i, j)[0];
                if h < -1e6 {
                    continue;
                }
                let x = extents.ll.x + f64::from(i) * step.0;
                if let Ok(p) = conv.convert3(&Point3::new(x, y, h)) {
                    vertex_index[(j * size.width + i) as usize] = vertices.len() as u32;
                    vertices.push([p.x, p.y, p.z]);
                }
            }
        }

        let mut faces: Vec<[u32; 3]> = Vec::new();
        for j in 1..size.height {
            for i in 1..size.width {
                let v00 = vertex_index[((j - 1) * size.width + i - 1) as usize];
                let v10 = vertex_index[((j - 1) * size.width + i) as usize];
                let v01 = vertex_index[(j * size.width + i - 1) as usize];
                let v11 = vertex_index[(j * size.width + i) as usize];
                if v00 != u32::MAX && v10 != u32::MAX && v11 != u32::MAX && v01 != u32::MAX {
                    faces.push([v00, v10, v11]);
                    faces.push([v11, v01, v00]);
                }
            }
        }

        if vertices.is_empty() {
            return Err(Error::NotFound("no mesh for this tile".to_string()));
        }

        let mesh = serde_json::json!({
            "vertices": vertices,
            "faces": faces,
        });
        sink.content(
            serde_json::to_vec(&mesh)?,
            FileInfo::new("application/json", FileClass::Data),
        );
        Ok(())
    }

    fn generate_navtile(&self, tile: TileId, sink: &Sink, arsenal: &Arsenal) -> Result<(), Error> {
        let flags = self.index_flags(tile);
        if flags & crate::tileindex::flags::NAVTILE == 0 {
            return Err(Error::NotFound("no navtile for this tile".to_string()));
        }

        let node = self
            .frame
            .node_info(tile)
            .filter(|n| n.productive())
            .ok_or_else(|| Error::NotFound("tile outside reference frame tree".to_string()))?;

        sink.check_aborted()?;

        // height range comes from the governing metatile
        let metatile = self.build_metatile(tile, sink, arsenal)?;
        let metanode = metatile
            .get(tile)
            .ok_or_else(|| Error::NotFound("metatile node not found".to_string()))?;
        let height_range = metanode
            .height_range
            .ok_or_else(|| Error::NotFound("no navtile for this tile".to_string()))?;

        let size = Size2::new(NAVTILE_SIZE, NAVTILE_SIZE);
        let dem = arsenal.warper.warp(
            &RasterRequest::new(
                Operation::Dem,
                &self.dem_dataset,
                node.srs().clone(),
                *node.extents(),
                size,
                Resampling::Dem,
            ),
            sink,
        )?;
        sink.check_aborted()?;

        let nav_conv = CsConvertor::new(node.srs(), &self.frame.navigation_srs)?;
        let extents = node.extents();
        let step = (
            extents.size().width / f64::from(NAVTILE_SIZE - 1),
            extents.size().height / f64::from(NAVTILE_SIZE - 1),
        );

        let mut heights: Vec<Option<f64>> = Vec::with_capacity((size.width * size.height) as usize);
        for j in 0..size.height {
            let y = extents.ur.y - f64::from(j) * step.1;
            for i in 0..size.width {
                let h = dem.at(i, j)[0];
                if h < -1e6 {
                    heights.push(None);
                    continue;
                }
                let x = extents.ll.x + f64::from(i) * step.0;
                heights.push(nav_conv.convert3(&Point3::new(x, y, h)).ok().map(|p| p.z));
            }
        }

        let navtile = serde_json::json!({
            "heightRange": [height_range.0, height_range.1],
            "size": [size.width, size.height],
            "heights": heights,
        });
        sink.content(
            serde_json::to_vec(&navtile)?,
            FileInfo::new("application/json", FileClass::Data),
        );
        Ok(())
    }

    fn generate_mask(
        &self,
        tile: TileId,
        flavor: FileFlavor,
        sink: &Sink,
        arsenal: &Arsenal,
    ) -> Result<(), Error> {
        let debug = flavor == FileFlavor::Debug;
        let flags = self.index_flags(tile);

        if flags & crate::tileindex::flags::MESH == 0 {
            if debug {
                return Err(Error::EmptyDebugMask);
            }
            return Err(Error::NotFound("no mesh for this tile".to_string()));
        }

        let mask_size = crate::calipers::TILE_SIZE;
        let mut image = GrayImage::from_pixel(mask_size, mask_size, image::Luma([255u8]));

        if flags & crate::tileindex::flags::WATERTIGHT == 0 {
            // partial tile: derive the mask from warped sample validity
            let node = self
                .frame
                .node_info(tile)
                .ok_or_else(|| Error::NotFound("tile outside reference frame tree".to_string()))?;

            let raster = arsenal.warper.warp(
                &RasterRequest::new(
                    Operation::Mask,
                    &self.dem_dataset,
                    node.srs().clone(),
                    *node.extents(),
                    Size2::new(mask_size, mask_size),
                    Resampling::Nearest,
                ),
                sink,
            )?;
            sink.check_aborted()?;

            for (x, y, pixel) in image.enumerate_pixels_mut() {
                *pixel = if raster.at(x, y)[0] > 0.5 {
                    image::Luma([255u8])
                } else {
                    image::Luma([0u8])
                };
            }
        }

        let mut out = Cursor::new(Vec::new());
        DynamicImage::ImageLuma8(image)
            .write_to(&mut out, ImageFormat::Png)
            .map_err(|e| Error::InternalError(format!("png encoding failed: {e}")))?;
        sink.content(
            out.into_inner(),
            FileInfo::new("image/png", FileClass::Data),
        );
        Ok(())
    }

    /// PNG of per-tile index flags across the whole metatile.
    fn generate_meta2d(&self, tile: TileId, sink: &Sink) -> Result<(), Error> {
        let side = 1u32 << self.frame.meta_binary_order;
        let origin = tile.metatile_id(self.frame.meta_binary_order);

        let mut image = GrayImage::from_pixel(side, side, image::Luma([0u8]));
        for (x, y, pixel) in image.enumerate_pixels_mut() {
            let flags = self.index_flags(TileId::new(tile.lod, origin.x + x, origin.y + y));
            *pixel = image::Luma([flags]);
        }

        let mut out = Cursor::new(Vec::new());
        DynamicImage::ImageLuma8(image)
            .write_to(&mut out, ImageFormat::Png)
            .map_err(|e| Error::InternalError(format!("png encoding failed: {e}")))?;
        sink.content(
            out.into_inner(),
            FileInfo::new("image/png", FileClass::Data),
        );
        Ok(())
    }

    fn generate_credits(&self, sink: &Sink) -> Result<(), Error> {
        let resource = self.core.resource();
        let credits = serde_json::json!({ "credits": resource.credits });
        sink.content(
            serde_json::to_vec(&credits)?,
            FileInfo::new("application/json", FileClass::Data),
        );
        Ok(())
    }

    fn generate_debug_node(&self, tile: TileId, sink: &Sink) -> Result<(), Error> {
        let flags = self.index_flags(tile);
        let children: Vec<bool> = {
            let index = self.index.read().expect("surface poisoned");
            tile.children()
                .into_iter()
                .map(|child| {
                    index
                        .as_ref()
                        .map(|index| index.valid_subtree(child))
                        .unwrap_or(false)
                        && self.frame.valid(child)
                })
                .collect()
        };

        let debug = serde_json::json!({
            "tileId": format!("{tile}"),
            "flags": flags,
            "children": children,
        });
        sink.content(
            serde_json::to_vec(&debug)?,
            FileInfo::new("application/json", FileClass::Config),
        );
        Ok(())
    }
}

impl Generator for SurfaceDem {
    fn core(&self) -> &GeneratorCore {
        &self.core
    }

    fn map_config(&self, root: super::ResourceRoot) -> Result<super::MapConfig, Error> {
        self.core.check_ready()?;
        let resource = self.core.resource();
        Ok(super::MapConfig {
            reference_frame: resource.id.reference_frame.clone(),
            surfaces: vec![super::SurfaceEntry {
                id: resource.id.full_id(),
                revision: resource.revision,
                lod_range: resource.lod_range,
                tile_range: resource.tile_range,
                url: self.core.map_config_url(root),
            }],
            bound_layers: Vec::new(),
            credits: resource.credits,
        })
    }

    fn prepare(&self, _arsenal: &Arsenal) -> Result<(), Error> {
        let resource = self.core.resource();
        info!(resource = %resource.id, "preparing surface");

        // the dataset must at least be probeable
        let descriptor = crate::dataset::probe(std::path::Path::new(&self.dem_dataset))?;
        debug!(
            resource = %resource.id,
            bands = descriptor.bands,
            "dem dataset opened"
        );

        let properties = TilesetProperties {
            id: resource.id.full_id(),
            reference_frame: resource.id.reference_frame.clone(),
            credits: resource.credits.clone(),
            lod_range: resource.lod_range,
            tile_range: resource.tile_range,
            revision: resource.revision,
            nominal_texel_size: self.definition.nominal_texel_size,
            merge_bottom_lod: self.definition.merge_bottom_lod,
        };

        // dense index across the published range
        let mut index = crate::tileindex::TileIndex::new();
        for lod in resource.lod_range.iter() {
            let range = resource
                .tile_range
                .shifted_down(lod - resource.lod_range.min);
            index.add_layer(lod, range);
            index.fill(
                lod,
                range,
                crate::tileindex::flags::MESH
                    | crate::tileindex::flags::WATERTIGHT
                    | crate::tileindex::flags::NAVTILE,
            );
        }

        std::fs::write(self.config_path(), serde_json::to_vec_pretty(&properties)?)?;
        std::fs::write(self.index_path(), serde_json::to_vec(&index)?)?;

        *self.index.write().expect("surface poisoned") = Some(index);

        self.core.make_ready()
    }

    fn generate_tile(
        &self,
        tile: TileId,
        file: TileFile,
        flavor: FileFlavor,
        sink: &Sink,
        arsenal: &Arsenal,
    ) -> Result<(), Error> {
        self.core.check_ready()?;

        match file {
            TileFile::Meta => {
                if flavor == FileFlavor::Debug {
                    self.generate_debug_node(tile, sink)
                } else {
                    self.generate_metatile(tile, sink, arsenal)
                }
            }
            TileFile::Mesh => self.generate_mesh(tile, sink, arsenal),
            TileFile::Navtile => self.generate_navtile(tile, sink, arsenal),
            TileFile::Mask2d => self.generate_mask(tile, flavor, sink, arsenal),
            TileFile::Meta2d => self.generate_meta2d(tile, sink),
            TileFile::Credits => self.generate_credits(sink),
            TileFile::DebugNode => self.generate_debug_node(tile, sink),
            TileFile::Image => Err(Error::NotFound("no internal texture present".to_string())),
        }
    }
}

fn load_mask(path: PathBuf) -> Option<MaskTree> {
    // valid path but missing file means "no mask"
    let data = std::fs::read(&path).ok()?;
    serde_json::from_slice(&data).ok()
}

/// Factory for [`SurfaceDem`].
pub struct SurfaceDemFactory;

impl GeneratorFactory for SurfaceDemFactory {
    fn kind(&self) -> GeneratorKind {
        GeneratorKind::surface_dem()
    }

    fn create(
        &self,
        params: Params,
        config: &Config,
        finder: Finder,
    ) -> Result<Arc<dyn Generator>, Error> {
        Ok(SurfaceDem::new(params, config, finder)? as Arc<dyn Generator>)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::FrameRegistry;
    use crate::geo::{LodRange, TileRange};
    use crate::resource::{Resource, ResourceId};
    use crate::sink::MemorySink;
    use crate::warper::{Raster, RasterWarper};
    use std::path::Path;

    struct FlatWarper(f64);

    impl RasterWarper for FlatWarper {
        fn warp(&self, request: &RasterRequest, _sink: &Sink) -> Result<Raster, Error> {
            let channels = match request.operation {
                Operation::ValueMinMax => 3,
                _ => 1,
            };
            Ok(Raster::filled(request.size, channels, self.0))
        }
    }

    fn dem_resource() -> Resource {
        Resource::new(
            ResourceId::new("webmercator", "terrain", "flat"),
            LodRange::new(2, 3),
            TileRange::new(0, 0, 3, 3),
            Definition::SurfaceDem(SurfaceDemDef::new("dem/flat")),
        )
    }

    fn make_surface(dir: &Path) -> Arc<SurfaceDem> {
        let config = Config::new(dir);
        let params = Params::new(
            dem_resource(),
            Arc::new(FrameRegistry::with_defaults()),
        );
        SurfaceDem::new(params, &config, Finder::detached()).unwrap()
    }

    /// Prepare without the dataset probe by writing the tileset files the
    /// way prepare would and reloading.
    fn make_ready_surface(dir: &Path) -> Arc<SurfaceDem> {
        let surface = make_surface(dir);
        let resource = surface.core.resource();

        let properties = TilesetProperties {
            id: resource.id.full_id(),
            reference_frame: resource.id.reference_frame.clone(),
            credits: resource.credits.clone(),
            lod_range: resource.lod_range,
            tile_range: resource.tile_range,
            revision: resource.revision,
            nominal_texel_size: None,
            merge_bottom_lod: None,
        };
        let mut index = crate::tileindex::TileIndex::new();
        for lod in resource.lod_range.iter() {
            let range = resource
                .tile_range
                .shifted_down(lod - resource.lod_range.min);
            index.add_layer(lod, range);
            index.fill(
                lod,
                range,
                crate::tileindex::flags::MESH
                    | crate::tileindex::flags::WATERTIGHT
                    | crate::tileindex::flags::NAVTILE,
            );
        }
        std::fs::write(
            surface.config_path(),
            serde_json::to_vec_pretty(&properties).unwrap(),
        )
        .unwrap();
        std::fs::write(surface.index_path(), serde_json::to_vec(&index).unwrap()).unwrap();

        surface.load_files().unwrap();
        assert!(surface.core.ready());
        surface
    }

    #[test]
    fn test_fresh_surface_not_ready() {
        let dir = tempfile::tempdir().unwrap();
        let surface = make_surface(dir.path());
        assert!(!surface.core.ready());

        let sink = Sink::new(MemorySink::new());
        let arsenal = Arsenal::new(Arc::new(FlatWarper(100.0)));
        let err = surface
            .generate_tile(
                TileId::new(2, 0, 0),
                TileFile::Meta,
                FileFlavor::Regular,
                &sink,
                &arsenal,
            )
            .unwrap_err();
        assert!(matches!(err, Error::Unavailable(_)));
    }

    #[test]
    fn test_prepare_fails_without_dataset() {
        let dir = tempfile::tempdir().unwrap();
        let surface = make_surface(dir.path());
        let arsenal = Arsenal::new(Arc::new(FlatWarper(100.0)));
        assert!(surface.prepare(&arsenal).is_err());
        assert!(!surface.core.ready());
    }

    #[test]
    fn test_reload_from_persisted_files() {
        let dir = tempfile::tempdir().unwrap();
        make_ready_surface(dir.path());

        // a second instance picks the files up without preparation
        let surface = make_surface(dir.path());
        assert!(surface.core.ready());

        let mc = surface
            .map_config(crate::generator::ResourceRoot::None)
            .unwrap();
        assert_eq!(mc.surfaces.len(), 1);
        assert_eq!(mc.surfaces[0].id, "terrain/flat");
        assert_eq!(mc.surfaces[0].url, "");
    }

    #[test]
    fn test_generate_metatile() {
        let dir = tempfile::tempdir().unwrap();
        let surface = make_ready_surface(dir.path());

        let target = MemorySink::new();
        let sink = Sink::new(Arc::clone(&target) as Arc<dyn crate::sink::SinkTarget>);
        let arsenal = Arsenal::new(Arc::new(FlatWarper(250.0)));
        surface
            .generate_tile(
                TileId::new(2, 0, 0),
                TileFile::Meta,
                FileFlavor::Regular,
                &sink,
                &arsenal,
            )
            .unwrap();

        let contents = target.contents();
        assert_eq!(contents.len(), 1);
        assert_eq!(contents[0].1.content_type, "application/json");
        let metatile: MetaTile = serde_json::from_slice(&contents[0].0).unwrap();
        assert!(metatile.get(TileId::new(2, 0, 0)).unwrap().geometry());
    }

    #[test]
    fn test_generate_mask_watertight() {
        let dir = tempfile::tempdir().unwrap();
        let surface = make_ready_surface(dir.path());

        let target = MemorySink::new();
        let sink = Sink::new(Arc::clone(&target) as Arc<dyn crate::sink::SinkTarget>);
        let arsenal = Arsenal::new(Arc::new(FlatWarper(250.0)));
        surface
            .generate_tile(
                TileId::new(2, 1, 1),
                TileFile::Mask2d,
                FileFlavor::Regular,
                &sink,
                &arsenal,
            )
            .unwrap();

        let contents = target.contents();
        assert_eq!(contents[0].1.content_type, "image/png");
        // PNG signature
        assert_eq!(&contents[0].0[..4], &[0x89, b'P', b'N', b'G']);
    }

    #[test]
    fn test_generate_mask_missing_tile() {
        let dir = tempfile::tempdir().unwrap();
        let surface = make_ready_surface(dir.path());

        let sink = Sink::new(MemorySink::new());
        let arsenal = Arsenal::new(Arc::new(FlatWarper(250.0)));

        // outside the published range at lod 2
        let err = surface
            .generate_tile(
                TileId::new(4, 0, 0),
                TileFile::Mask2d,
                FileFlavor::Regular,
                &sink,
                &arsenal,
            )
            .unwrap_err();
        assert!(matches!(err, Error::NotFound(_)));

        let err = surface
            .generate_tile(
                TileId::new(4, 0, 0),
                TileFile::Mask2d,
                FileFlavor::Debug,
                &sink,
                &arsenal,
            )
            .unwrap_err();
        assert!(matches!(err, Error::EmptyDebugMask));
    }

    #[test]
    fn test_generate_mesh_and_navtile() {
        let dir = tempfile::tempdir().unwrap();
        let surface = make_ready_surface(dir.path());

        let target = MemorySink::new();
        let sink = Sink::new(Arc::clone(&target) as Arc<dyn crate::sink::SinkTarget>);
        let arsenal = Arsenal::new(Arc::new(FlatWarper(77.0)));

        surface
            .generate_tile(
                TileId::new(2, 2, 2),
                TileFile::Mesh,
                FileFlavor::Regular,
                &sink,
                &arsenal,
            )
            .unwrap();
        surface
            .generate_tile(
                TileId::new(2, 2, 2),
                TileFile::Navtile,
                FileFlavor::Regular,
                &sink,
                &arsenal,
            )
            .unwrap();

        let contents = target.contents();
        assert_eq!(contents.len(), 2);

        let mesh: serde_json::Value = serde_json::from_slice(&contents[0].0).unwrap();
        assert!(!mesh["vertices"].as_array().unwrap().is_empty());
        assert!(!mesh["faces"].as_array().unwrap().is_empty());

        let navtile: serde_json::Value = serde_json::from_slice(&contents[1].0).unwrap();
        assert_eq!(navtile["size"][0].as_u64().unwrap(), u64::from(NAVTILE_SIZE));
        assert_eq!(navtile["heightRange"][0].as_i64().unwrap(), 77);
    }

    #[test]
    fn test_generate_credits_and_debug() {
        let dir = tempfile::tempdir().unwrap();
        let surface = make_ready_surface(dir.path());

        let target = MemorySink::new();
        let sink = Sink::new(Arc::clone(&target) as Arc<dyn crate::sink::SinkTarget>);
        let arsenal = Arsenal::new(Arc::new(FlatWarper(0.0)));

        surface
            .generate_tile(
                TileId::new(2, 0, 0),
                TileFile::Credits,
                FileFlavor::Regular,
                &sink,
                &arsenal,
            )
            .unwrap();
        surface
            .generate_tile(
                TileId::new(2, 0, 0),
                TileFile::DebugNode,
                FileFlavor::Regular,
                &sink,
                &arsenal,
            )
            .unwrap();

        let contents = target.contents();
        let debug: serde_json::Value = serde_json::from_slice(&contents[1].0).unwrap();
        assert_eq!(debug["tileId"].as_str().unwrap(), "2-0-0");
        // lod-3 children exist in the index
        assert!(debug["children"][0].as_bool().unwrap());
    }
}
