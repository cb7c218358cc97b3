//! Patchwork TMS generator.
//!
//! Serves synthetic checkerboard tiles, each colored deterministically from
//! its tile id. Useful as a debugging bound layer; registered as a system
//! instance so every reference frame gets one without configuration.

use super::{
    Config, FileFlavor, Finder, Generator, GeneratorCore, GeneratorFactory, GeneratorKind,
    Params, TileFile,
};
use crate::error::Error;
use crate::geo::TileId;
use crate::resource::{Definition, RasterFormat, TmsRasterPatchworkDef};
use crate::sink::{FileClass, FileInfo, Sink};
use crate::warper::Arsenal;
use image::{DynamicImage, ImageFormat, Rgb, RgbImage};
use std::io::Cursor;
use std::sync::Arc;
use tracing::info;

/// Side of a served tile in pixels.
const TILE_SIZE: u32 = crate::calipers::TILE_SIZE;

/// Generator serving deterministic patchwork tiles.
pub struct TmsRasterPatchwork {
    core: GeneratorCore,
    definition: TmsRasterPatchworkDef,
}

impl TmsRasterPatchwork {
    pub fn new(params: Params, config: &Config, _finder: Finder) -> Result<Arc<Self>, Error> {
        let core = GeneratorCore::new(params, config)?;

        let resource = core.resource();
        let Definition::TmsRasterPatchwork(definition) = resource.definition.clone() else {
            return Err(Error::InvalidConfiguration(format!(
                "resource <{}> does not match generator <{}>",
                resource.id,
                GeneratorKind::tms_raster_patchwork()
            )));
        };

        Ok(Arc::new(Self { core, definition }))
    }

    /// Stable tile color from the tile id.
    fn tile_color(tile: TileId) -> Rgb<u8> {
        // FNV-style mixing; only stability matters here
        let mut h: u64 = 0xcbf2_9ce4_8422_2325;
        for value in [u64::from(tile.lod), u64::from(tile.x), u64::from(tile.y)] {
            h ^= value;
            h = h.wrapping_mul(0x0000_0100_0000_01b3);
        }
        Rgb([
            128 + (h & 0x7f) as u8,
            128 + ((h >> 8) & 0x7f) as u8,
            128 + ((h >> 16) & 0x7f) as u8,
        ])
    }

    fn generate_image(&self, tile: TileId, sink: &Sink) -> Result<(), Error> {
        sink.check_aborted()?;

        let color = Self::tile_color(tile);
        let border = Rgb([color.0[0] / 2, color.0[1] / 2, color.0[2] / 2]);

        let mut image = RgbImage::from_pixel(TILE_SIZE, TILE_SIZE, color);
        for i in 0..TILE_SIZE {
            image.put_pixel(i, 0, border);
            image.put_pixel(i, TILE_SIZE - 1, border);
            image.put_pixel(0, i, border);
            image.put_pixel(TILE_SIZE - 1, i, border);
        }

        let (format, content_type) = match self.definition.format {
            RasterFormat::Jpg => (ImageFormat::Jpeg, "image/jpeg"),
            RasterFormat::Png => (ImageFormat::Png, "image/png"),
        };

        let mut out = Cursor::new(Vec::new());
        DynamicImage::ImageRgb8(image)
            .write_to(&mut out, format)
            .map_err(|e| Error::InternalError(format!("image encoding failed: {e}")))?;
        sink.content(
            out.into_inner(),
            FileInfo::new(content_type, FileClass::Data),
        );
        Ok(())
    }

    fn generate_mask(&self, sink: &Sink) -> Result<(), Error> {
        // patchwork covers everything
        let image = image::GrayImage::from_pixel(TILE_SIZE, TILE_SIZE, image::Luma([255u8]));
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
}

impl Generator for TmsRasterPatchwork {
    fn core(&self) -> &GeneratorCore {
        &self.core
    }

    fn map_config(&self, root: super::ResourceRoot) -> Result<super::MapConfig, Error> {
        self.core.check_ready()?;
        let resource = self.core.resource();
        Ok(super::MapConfig {
            reference_frame: resource.id.reference_frame.clone(),
            surfaces: Vec::new(),
            bound_layers: vec![super::BoundLayerEntry {
                id: resource.id.full_id(),
                url: self.core.map_config_url(root),
            }],
            credits: resource.credits,
        })
    }

    fn prepare(&self, _arsenal: &Arsenal) -> Result<(), Error> {
        // synthetic content, nothing to index
        info!(resource = %self.core.id(), "preparing patchwork layer");
        self.core.make_ready()
    }

    fn generate_tile(
        &self,
        tile: TileId,
        file: TileFile,
        _flavor: FileFlavor,
        sink: &Sink,
        _arsenal: &Arsenal,
    ) -> Result<(), Error> {
        self.core.check_ready()?;

        match file {
            TileFile::Image => self.generate_image(tile, sink),
            TileFile::Mask2d => self.generate_mask(sink),
            TileFile::Credits => self.generate_credits(sink),
            _ => Err(Error::NotFound(format!(
                "file not served by <{}>",
                GeneratorKind::tms_raster_patchwork()
            ))),
        }
    }
}

/// Factory for [`TmsRasterPatchwork`]; a system instance per frame.
pub struct TmsRasterPatchworkFactory;

impl GeneratorFactory for TmsRasterPatchworkFactory {
    fn kind(&self) -> GeneratorKind {
        GeneratorKind::tms_raster_patchwork()
    }

    fn system_instance(&self) -> bool {
        true
    }

    fn create(
        &self,
        params: Params,
        config: &Config,
        finder: Finder,
    ) -> Result<Arc<dyn Generator>, Error> {
        Ok(TmsRasterPatchwork::new(params, config, finder)? as Arc<dyn Generator>)
    }
}
