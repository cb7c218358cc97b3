//! Source dataset descriptors.
//!
//! A [`Descriptor`] is an immutable snapshot of a geospatial raster: its
//! spatial reference, extents, raster size, band count and pixel type.
//! Descriptors are what the measurement and generation code consumes; the
//! heavy raster content itself never passes through this module.
//!
//! [`probe`] extracts a descriptor from a GeoTIFF on disk, reading only the
//! IFD metadata (dimensions, sample layout, pixel scale, tiepoint and the
//! geo-key directory).

use crate::geo::srs::SrsDef;
use crate::geo::{Extents2, Size2};
use std::fs::File;
use std::io::BufReader;
use std::path::Path;
use thiserror::Error;
use tiff::decoder::Decoder;
use tiff::tags::Tag;
use tracing::debug;

/// Pixel data type of a raster band.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum DataType {
    Byte,
    UInt16,
    Int16,
    UInt32,
    Int32,
    Float32,
    Float64,
}

impl DataType {
    /// True for the 8-bit unsigned type typical of imagery.
    pub fn is_byte(&self) -> bool {
        matches!(self, DataType::Byte)
    }
}

/// Snapshot of a source dataset.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct Descriptor {
    /// Spatial reference of the dataset.
    pub srs: SrsDef,
    /// Extents in `srs` units.
    pub extents: Extents2,
    /// Raster size in pixels.
    pub size: Size2,
    /// Number of bands.
    pub bands: usize,
    /// Pixel data type of the first band.
    pub data_type: DataType,
}

/// Errors raised while probing a dataset.
#[derive(Debug, Error)]
pub enum DatasetError {
    #[error("cannot open dataset {path}: {source}")]
    Open {
        path: String,
        source: std::io::Error,
    },

    #[error("cannot read dataset {path}: {message}")]
    Read { path: String, message: String },

    #[error("dataset {path} carries no georeferencing")]
    NotGeoreferenced { path: String },

    #[error("dataset {path} uses an unsupported spatial reference: {message}")]
    UnsupportedSrs { path: String, message: String },
}

// GeoTIFF private tags (OGC GeoTIFF 1.1).
const TAG_MODEL_PIXEL_SCALE: u16 = 33550;
const TAG_MODEL_TIEPOINT: u16 = 33922;
const TAG_GEO_KEY_DIRECTORY: u16 = 34735;

// Geo-keys carrying the coordinate system EPSG code.
const KEY_GEOGRAPHIC_TYPE: u32 = 2048;
const KEY_PROJECTED_CS_TYPE: u32 = 3072;

/// Probe a GeoTIFF file and build its [`Descriptor`].
pub fn probe(path: &Path) -> Result<Descriptor, DatasetError> {
    let path_display = path.display().to_string();

    let file = File::open(path).map_err(|source| DatasetError::Open {
        path: path_display.clone(),
        source,
    })?;

    let mut decoder = Decoder::new(BufReader::new(file)).map_err(|e| DatasetError::Read {
        path: path_display.clone(),
        message: e.to_string(),
    })?;

    let (width, height) = decoder.dimensions().map_err(|e| DatasetError::Read {
        path: path_display.clone(),
        message: e.to_string(),
    })?;

    let bands = tag_u32_vec(&mut decoder, Tag::SamplesPerPixel)
        .and_then(|v| v.first().copied())
        .unwrap_or(1) as usize;

    let bits = tag_u32_vec(&mut decoder, Tag::BitsPerSample)
        .and_then(|v| v.first().copied())
        .unwrap_or(8);

    // TIFF sample formats: 1 unsigned, 2 signed, 3 IEEE float
    let sample_format = tag_u32_vec(&mut decoder, Tag::SampleFormat)
        .and_then(|v| v.first().copied())
        .unwrap_or(1);

    let data_type = match (sample_format, bits) {
        (3, 64) => DataType::Float64,
        (3, _) => DataType::Float32,
        (2, 32) => DataType::Int32,
        (2, _) => DataType::Int16,
        (_, 32) => DataType::UInt32,
        (_, 16) => DataType::UInt16,
        _ => DataType::Byte,
    };

    let scale = tag_f64_vec(&mut decoder, Tag::Unknown(TAG_MODEL_PIXEL_SCALE));
    let tiepoint = tag_f64_vec(&mut decoder, Tag::Unknown(TAG_MODEL_TIEPOINT));

    let (scale, tiepoint) = match (scale, tiepoint) {
        (Some(s), Some(t)) if s.len() >= 2 && t.len() >= 6 => (s, t),
        _ => {
            return Err(DatasetError::NotGeoreferenced { path: path_display });
        }
    };

    // north-up rasters: tiepoint maps raster (i, j) to model (x, y)
    let ul_x = tiepoint[3] - tiepoint[0] * scale[0];
    let ul_y = tiepoint[4] + tiepoint[1] * scale[1];
    let extents = Extents2::new(
        ul_x,
        ul_y - f64::from(height) * scale[1],
        ul_x + f64::from(width) * scale[0],
        ul_y,
    );

    let srs = geo_key_epsg(&mut decoder)
        .ok_or_else(|| DatasetError::NotGeoreferenced {
            path: path_display.clone(),
        })
        .and_then(|code| {
            SrsDef::from_epsg(code).map_err(|e| DatasetError::UnsupportedSrs {
                path: path_display.clone(),
                message: e.to_string(),
            })
        })?;

    debug!(
        dataset = %path_display,
        width,
        height,
        bands,
        ?data_type,
        "probed dataset"
    );

    Ok(Descriptor {
        srs,
        extents,
        size: Size2::new(width, height),
        bands,
        data_type,
    })
}

/// Extract the coordinate-system EPSG code from the geo-key directory.
///
/// The directory is a flat array of 4-short records `(key, location, count,
/// value)`; keys with `location == 0` store their value inline. A projected
/// CS key wins over a plain geographic one.
fn geo_key_epsg<R: std::io::Read + std::io::Seek>(decoder: &mut Decoder<R>) -> Option<u32> {
    let dir = tag_u32_vec(decoder, Tag::Unknown(TAG_GEO_KEY_DIRECTORY))?;
    let mut geographic = None;
    let mut projected = None;

    for record in dir.chunks_exact(4).skip(1) {
        let (key, location, value) = (record[0], record[1], record[3]);
        if location != 0 {
            continue;
        }
        match key {
            KEY_GEOGRAPHIC_TYPE => geographic = Some(value),
            KEY_PROJECTED_CS_TYPE => projected = Some(value),
            _ => {}
        }
    }

    projected.or(geographic).filter(|&code| code < 32767)
}

fn tag_u32_vec<R: std::io::Read + std::io::Seek>(
    decoder: &mut Decoder<R>,
    tag: Tag,
) -> Option<Vec<u32>> {
    decoder
        .find_tag(tag)
        .ok()
        .flatten()
        .and_then(|value| value.into_u32_vec().ok())
}

fn tag_f64_vec<R: std::io::Read + std::io::Seek>(
    decoder: &mut Decoder<R>,
    tag: Tag,
) -> Option<Vec<f64>> {
    decoder
        .find_tag(tag)
        .ok()
        .flatten()
        .and_then(|value| value.into_f64_vec().ok())
}
