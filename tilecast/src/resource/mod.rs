//! Served resources and their definitions.
//!
//! A [`Resource`] binds an identity to a generator kind, a typed
//! [`Definition`] and publication ranges. Definitions know how to classify
//! their own diffs into a [`Changed`] level; the registry uses that
//! classification to decide between no-op, re-save, revision bump and full
//! replacement.

pub mod backend;

use crate::geo::{LodRange, TileRange};
use crate::sink::FileClassSettings;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

/// Unique key of a served resource.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ResourceId {
    pub reference_frame: String,
    pub group: String,
    pub id: String,
}

impl ResourceId {
    pub fn new(
        reference_frame: impl Into<String>,
        group: impl Into<String>,
        id: impl Into<String>,
    ) -> Self {
        Self {
            reference_frame: reference_frame.into(),
            group: group.into(),
            id: id.into(),
        }
    }

    /// `group/id` part, unique within a reference frame.
    pub fn full_id(&self) -> String {
        format!("{}/{}", self.group, self.id)
    }
}

impl fmt::Display for ResourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.reference_frame, self.group, self.id)
    }
}

/// Broad family of a generator.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum GeneratorType {
    /// 3D surfaces (meshes, metatiles, navtiles).
    Surface,
    /// 2D tile layers.
    Tms,
}

impl fmt::Display for GeneratorType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GeneratorType::Surface => write!(f, "surface"),
            GeneratorType::Tms => write!(f, "tms"),
        }
    }
}

/// Generator kind: family plus concrete driver.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct GeneratorKind {
    #[serde(rename = "type")]
    pub ty: GeneratorType,
    pub driver: String,
}

impl GeneratorKind {
    pub fn new(ty: GeneratorType, driver: impl Into<String>) -> Self {
        Self {
            ty,
            driver: driver.into(),
        }
    }

    pub fn surface_dem() -> Self {
        Self::new(GeneratorType::Surface, "surface-dem")
    }

    pub fn tms_raster_patchwork() -> Self {
        Self::new(GeneratorType::Tms, "tms-raster-patchwork")
    }
}

impl fmt::Display for GeneratorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.ty, self.driver)
    }
}

/// Severity of a definition diff, totally ordered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Changed {
    /// Nothing changed.
    No,
    /// Changed in a way existing data survives.
    Safely,
    /// Changed; bump the revision and re-publish.
    WithRevisionBump,
    /// Destructive change.
    Yes,
}

/// Raster output format of TMS drivers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RasterFormat {
    Jpg,
    Png,
}

/// Definition of a DEM-backed surface.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SurfaceDemDef {
    /// DEM dataset path, relative to the resource root.
    pub dataset: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub geoid_grid: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mask: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nominal_texel_size: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub merge_bottom_lod: Option<u8>,
}

impl SurfaceDemDef {
    pub fn new(dataset: impl Into<String>) -> Self {
        Self {
            dataset: dataset.into(),
            geoid_grid: None,
            mask: None,
            nominal_texel_size: None,
            merge_bottom_lod: None,
        }
    }

    fn changed(&self, other: &SurfaceDemDef) -> Changed {
        // data-driving fields first
        if self.dataset != other.dataset
            || self.geoid_grid != other.geoid_grid
            || self.mask != other.mask
        {
            return Changed::Yes;
        }

        // manually set tuning can change safely
        if self.nominal_texel_size != other.nominal_texel_size
            || self.merge_bottom_lod != other.merge_bottom_lod
        {
            return Changed::Safely;
        }

        Changed::No
    }
}

/// Definition of the patchwork debug TMS driver.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TmsRasterPatchworkDef {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mask: Option<String>,
    pub format: RasterFormat,
}

impl Default for TmsRasterPatchworkDef {
    fn default() -> Self {
        Self {
            mask: None,
            format: RasterFormat::Jpg,
        }
    }
}

impl TmsRasterPatchworkDef {
    fn changed(&self, other: &TmsRasterPatchworkDef) -> Changed {
        // non-safe changes first
        if self.mask != other.mask {
            return Changed::Yes;
        }
        if self.format != other.format {
            return Changed::Safely;
        }
        Changed::No
    }
}

/// Typed resource definition, tagged by driver name.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "driver", rename_all = "kebab-case")]
pub enum Definition {
    SurfaceDem(SurfaceDemDef),
    TmsRasterPatchwork(TmsRasterPatchworkDef),
}

impl Definition {
    pub fn kind(&self) -> GeneratorKind {
        match self {
            Definition::SurfaceDem(_) => GeneratorKind::surface_dem(),
            Definition::TmsRasterPatchwork(_) => GeneratorKind::tms_raster_patchwork(),
        }
    }

    /// Default definition for a generator kind, used by system instances.
    pub fn default_for(kind: &GeneratorKind) -> Option<Definition> {
        if *kind == GeneratorKind::tms_raster_patchwork() {
            return Some(Definition::TmsRasterPatchwork(
                TmsRasterPatchworkDef::default(),
            ));
        }
        None
    }

    /// Classify the diff against another definition. A driver mismatch is
    /// always destructive.
    pub fn changed(&self, other: &Definition) -> Changed {
        match (self, other) {
            (Definition::SurfaceDem(a), Definition::SurfaceDem(b)) => a.changed(b),
            (Definition::TmsRasterPatchwork(a), Definition::TmsRasterPatchwork(b)) => {
                a.changed(b)
            }
            _ => Changed::Yes,
        }
    }
}

/// A served resource.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Resource {
    pub id: ResourceId,
    pub generator: GeneratorKind,
    #[serde(default)]
    pub comment: String,
    /// Monotonically non-decreasing across observations of the same id.
    #[serde(default)]
    pub revision: u64,
    #[serde(default)]
    pub credits: BTreeSet<u16>,
    pub lod_range: LodRange,
    /// Tile range at `lod_range.min`.
    pub tile_range: TileRange,
    #[serde(default = "FileClassSettings::default")]
    pub file_class_settings: FileClassSettings,
    pub definition: Definition,
}

impl Resource {
    pub fn new(
        id: ResourceId,
        lod_range: LodRange,
        tile_range: TileRange,
        definition: Definition,
    ) -> Self {
        Self {
            id,
            generator: definition.kind(),
            comment: String::new(),
            revision: 0,
            credits: BTreeSet::new(),
            lod_range,
            tile_range,
            file_class_settings: FileClassSettings::default(),
            definition,
        }
    }

    /// Classify the diff between this resource and another observation of
    /// the same id. Revision and caching policy never count as changes.
    pub fn changed(&self, other: &Resource) -> Changed {
        if self.generator != other.generator {
            return Changed::Yes;
        }
        if self.lod_range != other.lod_range || self.tile_range != other.tile_range {
            return Changed::Yes;
        }

        let mut changed = self.definition.changed(&other.definition);
        if self.credits != other.credits {
            changed = changed.max(Changed::Safely);
        }
        changed
    }
}
