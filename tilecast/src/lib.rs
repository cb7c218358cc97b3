//! Tilecast - map-tile proxy core
//!
//! This library implements the core of an on-demand map-tile proxy:
//! measuring source datasets against a reference frame to pick publication
//! levels of detail ([`calipers`]), building metatiles from warped elevation
//! data ([`metatile`]), and orchestrating the set of live resource
//! generators with background reconciliation ([`generator`]).
//!
//! The HTTP surface, on-disk tile formats and the raster warping engine are
//! external collaborators; the library talks to them through the [`sink`]
//! and [`warper`] interfaces.

pub mod calipers;
pub mod dataset;
pub mod error;
pub mod frame;
pub mod generator;
pub mod geo;
pub mod logging;
pub mod mask;
pub mod metatile;
pub mod resource;
pub mod sink;
pub mod tileindex;
pub mod warper;

pub use error::Error;

/// Version of the tilecast library and CLI.
///
/// This is synchronized across all components in the workspace.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
