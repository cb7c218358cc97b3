//! Generators: runtime embodiments of resources.
//!
//! A generator owns the persisted state of one resource under
//! `<root>/<referenceFrame>/<group>/<id>/` and serves its files. The
//! [`GeneratorCore`] implements the shared lifecycle: fresh/stale detection
//! from `resource.json`, revision merging, freeze semantics and readiness.
//! Concrete drivers ([`surface`], [`tms`]) add preparation and file
//! generation on top.

pub mod registry;
pub mod surface;
pub mod tms;

use crate::error::Error;
use crate::geo::TileId;
use crate::resource::{Changed, GeneratorKind, GeneratorType, Resource, ResourceId};
use crate::sink::Sink;
use crate::warper::Arsenal;
use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, RwLock, Weak};
use std::time::{SystemTime, UNIX_EPOCH};
use tracing::{info, warn};

/// Name of the canonical saved definition inside a generator directory.
const RESOURCE_FILE: &str = "resource.json";

/// Registry-wide configuration shared by all generators.
#[derive(Debug, Clone)]
pub struct Config {
    /// Root of the per-generator directory tree.
    pub root: PathBuf,
    /// Base for resolving relative dataset paths.
    pub resource_root: PathBuf,
    /// Reconciliation period in seconds; 0 disables timed polling.
    pub resource_update_period: u64,
    /// Size of the preparation worker pool.
    pub prepare_workers: usize,
    /// Generator families whose destructive changes are ignored.
    pub frozen_types: BTreeSet<GeneratorType>,
}

impl Config {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        let root = root.into();
        let mut frozen_types = BTreeSet::new();
        // published surfaces freeze by default: replacing them breaks data
        // already handed out
        frozen_types.insert(GeneratorType::Surface);
        Self {
            resource_root: root.clone(),
            root,
            resource_update_period: 60,
            prepare_workers: 5,
            frozen_types,
        }
    }

    /// Freeze predicate for a generator family.
    pub fn freezes(&self, ty: GeneratorType) -> bool {
        self.frozen_types.contains(&ty)
    }
}

/// Parameters for creating one generator.
#[derive(Clone)]
pub struct Params {
    pub resource: Resource,
    /// Reference-frame catalogue the resource's frame is resolved from.
    pub frames: Arc<crate::frame::FrameRegistry>,
    /// System generators are autoregistered and never removed.
    pub system: bool,
    /// When set, this generator replaces the given entry once prepared.
    pub replace: Option<ResourceId>,
}

impl Params {
    pub fn new(resource: Resource, frames: Arc<crate::frame::FrameRegistry>) -> Self {
        Self {
            resource,
            frames,
            system: false,
            replace: None,
        }
    }

    /// Resolve this resource's reference frame.
    pub fn reference_frame(&self) -> Result<crate::frame::ReferenceFrame, Error> {
        self.frames
            .get(&self.resource.id.reference_frame)
            .cloned()
            .ok_or_else(|| {
                Error::InvalidConfiguration(format!(
                    "resource <{}> uses unknown reference frame",
                    self.resource.id
                ))
            })
    }
}

/// File kinds a generator can be asked for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TileFile {
    Meta,
    Mesh,
    Navtile,
    Mask2d,
    Meta2d,
    Credits,
    DebugNode,
    Image,
}

/// Variant of a file request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileFlavor {
    Regular,
    Raw,
    Debug,
}

/// How resource URLs inside a map configuration are rooted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResourceRoot {
    /// Paths relative to the resource itself.
    None,
    /// Paths rooted at the reference frame.
    ReferenceFrame,
}

/// Surface entry of a map configuration.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SurfaceEntry {
    pub id: String,
    pub revision: u64,
    pub lod_range: crate::geo::LodRange,
    pub tile_range: crate::geo::TileRange,
    pub url: String,
}

/// Bound-layer entry of a map configuration.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BoundLayerEntry {
    pub id: String,
    pub url: String,
}

/// Client-facing description of what a generator serves.
#[derive(Debug, Clone, Default, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MapConfig {
    pub reference_frame: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub surfaces: Vec<SurfaceEntry>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub bound_layers: Vec<BoundLayerEntry>,
    #[serde(default)]
    pub credits: std::collections::BTreeSet<u16>,
}

impl GeneratorCore {
    /// Root path for URLs inside a map configuration.
    pub fn map_config_url(&self, root: ResourceRoot) -> String {
        let resource = self.resource();
        match root {
            ResourceRoot::None => String::new(),
            ResourceRoot::ReferenceFrame => format!(
                "{}/{}/{}/",
                resource.generator.ty, resource.id.group, resource.id.id
            ),
        }
    }
}

/// Shared lifecycle state of a generator.
pub struct GeneratorCore {
    root: PathBuf,
    resource: RwLock<Resource>,
    saved: RwLock<Resource>,
    fresh: bool,
    change_enforced: AtomicBool,
    system: bool,
    ready: AtomicBool,
    ready_since: AtomicU64,
    replace: Option<ResourceId>,
}

impl GeneratorCore {
    /// Open or create the persisted state for `params.resource`.
    ///
    /// A missing `resource.json` marks the generator fresh. On reopen the
    /// incoming definition is diffed against the saved one: safe changes
    /// re-save, destructive changes either bump the revision or, for frozen
    /// families, revert to the saved definition (the incoming file-class
    /// settings always win).
    pub fn new(params: Params, config: &Config) -> Result<Self, Error> {
        let mut resource = params.resource;
        let root = config
            .root
            .join(&resource.id.reference_frame)
            .join(&resource.id.group)
            .join(&resource.id.id);

        let rfile = root.join(RESOURCE_FILE);
        let existed = rfile.exists();
        std::fs::create_dir_all(&root)?;

        let mut fresh = false;
        let mut change_enforced = false;
        let mut saved;

        if !existed || params.system {
            // new or forced new resource (system)
            fresh = true;
            saved = resource.clone();
        } else {
            saved = load_resource(&rfile)?;

            // merge revisions; a manually bumped incoming revision wins
            let revision = resource.revision.max(saved.revision);
            resource.revision = revision;
            saved.revision = revision;

            let freeze = config.freezes(saved.generator.ty);

            match saved.changed(&resource) {
                Changed::WithRevisionBump => {
                    resource.revision += 1;
                    change_enforced = true;
                    info!(
                        resource = %resource.id,
                        revision = resource.revision,
                        "bumped resource revision due to definition change"
                    );
                    save_resource(&rfile, &resource)?;
                    saved = resource.clone();
                }
                Changed::No | Changed::Safely => {
                    // nothing or something non-destructive changed, re-save
                    save_resource(&rfile, &resource)?;
                    saved = resource.clone();
                }
                Changed::Yes => {
                    if freeze {
                        warn!(
                            resource = %resource.id,
                            root = %root.display(),
                            "stored definition differs; using stored definition"
                        );
                        let file_class_settings = resource.file_class_settings.clone();
                        resource = saved.clone();
                        // caching policy is operator-controlled, not frozen
                        resource.file_class_settings = file_class_settings;
                    } else {
                        resource.revision += 1;
                        change_enforced = true;
                        warn!(
                            resource = %resource.id,
                            revision = resource.revision,
                            "stored definition differs; bumped revision (freezing disabled)"
                        );
                    }
                }
            }
        }

        Ok(Self {
            root,
            resource: RwLock::new(resource),
            saved: RwLock::new(saved),
            fresh,
            change_enforced: AtomicBool::new(change_enforced),
            system: params.system,
            ready: AtomicBool::new(false),
            ready_since: AtomicU64::new(0),
            replace: params.replace,
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Snapshot of the currently served resource.
    pub fn resource(&self) -> Resource {
        self.resource.read().expect("generator poisoned").clone()
    }

    /// Snapshot of the last persisted resource.
    pub fn saved_resource(&self) -> Resource {
        self.saved.read().expect("generator poisoned").clone()
    }

    pub fn id(&self) -> ResourceId {
        self.resource.read().expect("generator poisoned").id.clone()
    }

    pub fn kind(&self) -> GeneratorKind {
        self.resource
            .read()
            .expect("generator poisoned")
            .generator
            .clone()
    }

    pub fn reference_frame_id(&self) -> String {
        self.resource
            .read()
            .expect("generator poisoned")
            .id
            .reference_frame
            .clone()
    }

    pub fn system(&self) -> bool {
        self.system
    }

    pub fn fresh(&self) -> bool {
        self.fresh
    }

    pub fn replace(&self) -> Option<&ResourceId> {
        self.replace.as_ref()
    }

    pub fn ready(&self) -> bool {
        self.ready.load(Ordering::Acquire)
    }

    pub fn check_ready(&self) -> Result<(), Error> {
        if self.ready() {
            return Ok(());
        }
        Err(Error::Unavailable("generator not ready".to_string()))
    }

    /// Persist pending changes and flip to ready.
    pub fn make_ready(&self) -> Result<(), Error> {
        if self.fresh || self.change_enforced.swap(false, Ordering::AcqRel) {
            let resource = self.resource();
            save_resource(&self.root.join(RESOURCE_FILE), &resource)?;
            *self.saved.write().expect("generator poisoned") = resource;
        }

        self.ready.store(true, Ordering::Release);
        self.ready_since.store(usec_now(), Ordering::Release);

        let resource = self.resource();
        info!(resource = %resource.id, kind = %resource.generator, "ready to serve resource");
        Ok(())
    }

    /// True when the generator became ready after `timestamp`
    /// (microseconds since epoch).
    pub fn updated_since(&self, timestamp: u64) -> bool {
        self.ready_since.load(Ordering::Acquire) > timestamp
    }

    /// Classify an incoming observation against the served resource.
    pub fn changed(&self, incoming: &Resource) -> Changed {
        self.resource
            .read()
            .expect("generator poisoned")
            .changed(incoming)
    }

    /// Public path of this resource.
    pub fn url(&self) -> String {
        let resource = self.resource.read().expect("generator poisoned");
        format!(
            "/{}/{}/{}/{}/",
            resource.id.reference_frame,
            resource.generator.ty,
            resource.id.group,
            resource.id.id
        )
    }

    /// Resolve a dataset path against the resource root; URLs pass through.
    pub fn absolute_dataset(&self, config: &Config, path: &str) -> String {
        let lower = path.to_ascii_lowercase();
        if lower.starts_with("http:") || lower.starts_with("https:") || lower.starts_with("ftp:") {
            return path.to_string();
        }
        let p = Path::new(path);
        if p.is_absolute() {
            return path.to_string();
        }
        config.resource_root.join(p).to_string_lossy().into_owned()
    }
}

/// Microseconds since the epoch.
pub(crate) fn usec_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_micros() as u64
}

fn load_resource(path: &Path) -> Result<Resource, Error> {
    let data = std::fs::read(path)?;
    Ok(serde_json::from_slice(&data)?)
}

fn save_resource(path: &Path, resource: &Resource) -> Result<(), Error> {
    let data = serde_json::to_vec_pretty(resource)?;
    std::fs::write(path, data)?;
    Ok(())
}

/// Runtime embodiment of one resource.
pub trait Generator: Send + Sync {
    fn core(&self) -> &GeneratorCore;

    /// One-shot initialization performed off the request path. Must call
    /// [`GeneratorCore::make_ready`] on success.
    fn prepare(&self, arsenal: &Arsenal) -> Result<(), Error>;

    /// Client-facing description of the served resource.
    fn map_config(&self, root: ResourceRoot) -> Result<MapConfig, Error>;

    /// Serve one tile file into the sink.
    fn generate_tile(
        &self,
        tile: TileId,
        file: TileFile,
        flavor: FileFlavor,
        sink: &Sink,
        arsenal: &Arsenal,
    ) -> Result<(), Error>;
}

/// Lookup interface the registry exposes to generators, so one generator
/// may resolve another at serve time. Held weakly; re-resolve on each use.
pub trait GeneratorFinder: Send + Sync {
    fn find_generator(&self, ty: GeneratorType, id: &ResourceId) -> Option<Arc<dyn Generator>>;
}

/// Weak handle to a [`GeneratorFinder`].
#[derive(Clone)]
pub struct Finder(Weak<dyn GeneratorFinder>);

impl Finder {
    pub fn new(finder: Weak<dyn GeneratorFinder>) -> Self {
        Self(finder)
    }

    /// Finder that never resolves; for standalone generators and tests.
    pub fn detached() -> Self {
        struct Nothing;
        impl GeneratorFinder for Nothing {
            fn find_generator(
                &self,
                _ty: GeneratorType,
                _id: &ResourceId,
            ) -> Option<Arc<dyn Generator>> {
                None
            }
        }
        // the Arc dies immediately; upgrade always fails
        Self(Arc::downgrade(
            &(Arc::new(Nothing) as Arc<dyn GeneratorFinder>),
        ))
    }

    pub fn find(&self, ty: GeneratorType, id: &ResourceId) -> Option<Arc<dyn Generator>> {
        self.0.upgrade()?.find_generator(ty, id)
    }
}

/// Factory creating generators of one kind.
pub trait GeneratorFactory: Send + Sync {
    fn kind(&self) -> GeneratorKind;

    /// System factories get one instance per reference frame at startup.
    fn system_instance(&self) -> bool {
        false
    }

    fn create(
        &self,
        params: Params,
        config: &Config,
        finder: Finder,
    ) -> Result<Arc<dyn Generator>, Error>;
}

/// Explicitly assembled set of factories, built once at startup.
#[derive(Default, Clone)]
pub struct FactorySet {
    factories: BTreeMap<GeneratorKind, Arc<dyn GeneratorFactory>>,
}

impl FactorySet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, factory: Arc<dyn GeneratorFactory>) {
        self.factories.insert(factory.kind(), factory);
    }

    /// The factory set with all built-in drivers.
    pub fn with_builtins() -> Self {
        let mut set = Self::new();
        set.register(Arc::new(surface::SurfaceDemFactory));
        set.register(Arc::new(tms::TmsRasterPatchworkFactory));
        set
    }

    pub fn find(&self, kind: &GeneratorKind) -> Result<&Arc<dyn GeneratorFactory>, Error> {
        self.factories
            .get(kind)
            .ok_or_else(|| Error::UnknownGenerator(format!("generator type <{kind}>")))
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<dyn GeneratorFactory>> {
        self.factories.values()
    }

    /// Create a generator for `params.resource` through the matching
    /// factory.
    pub fn create(
        &self,
        params: Params,
        config: &Config,
        finder: Finder,
    ) -> Result<Arc<dyn Generator>, Error> {
        let kind = params.resource.generator.clone();
        if params.resource.definition.kind() != kind {
            return Err(Error::InvalidConfiguration(format!(
                "resource <{}> does not match generator <{kind}>",
                params.resource.id
            )));
        }
        self.find(&kind)?.create(params, config, finder)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geo::{LodRange, TileRange};
    use crate::resource::{Definition, SurfaceDemDef, TmsRasterPatchworkDef};
    use crate::sink::FileClass;

    fn dem_resource(dataset: &str) -> Resource {
        Resource::new(
            ResourceId::new("webmercator", "terrain", "alps"),
            LodRange::new(5, 14),
            TileRange::new(16, 10, 18, 12),
            Definition::SurfaceDem(SurfaceDemDef::new(dataset)),
        )
    }

    fn config(dir: &Path) -> Config {
        Config::new(dir)
    }

    fn params(resource: Resource) -> Params {
        Params::new(
            resource,
            Arc::new(crate::frame::FrameRegistry::with_defaults()),
        )
    }

    #[test]
    fn test_fresh_generator() {
        let dir = tempfile::tempdir().unwrap();
        let core = GeneratorCore::new(params(dem_resource("dem/alps")), &config(dir.path()))
            .unwrap();

        assert!(core.fresh());
        assert!(!core.ready());
        assert!(core.check_ready().is_err());
        assert!(!core.root().join(RESOURCE_FILE).exists());

        core.make_ready().unwrap();
        assert!(core.ready());
        assert!(core.root().join(RESOURCE_FILE).exists());
        assert!(core.updated_since(0));
    }

    #[test]
    fn test_reopen_unchanged() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = config(dir.path());

        let core = GeneratorCore::new(params(dem_resource("dem/alps")), &cfg).unwrap();
        core.make_ready().unwrap();

        let core = GeneratorCore::new(params(dem_resource("dem/alps")), &cfg).unwrap();
        assert!(!core.fresh());
        assert_eq!(core.resource().revision, 0);
    }

    #[test]
    fn test_reopen_destructive_frozen_reverts() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = config(dir.path());

        let core = GeneratorCore::new(params(dem_resource("dem/alps")), &cfg).unwrap();
        core.make_ready().unwrap();

        // destructive change with surface freezing on (the default)
        let mut incoming = dem_resource("dem/andes");
        incoming
            .file_class_settings
            .set_max_age(FileClass::Data, 123);
        let core = GeneratorCore::new(params(incoming), &cfg).unwrap();

        let served = core.resource();
        assert_eq!(
            served.definition,
            Definition::SurfaceDem(SurfaceDemDef::new("dem/alps"))
        );
        assert_eq!(served.revision, 0);
        // incoming caching policy always wins
        assert_eq!(served.file_class_settings.max_age(FileClass::Data), 123);
    }

    #[test]
    fn test_reopen_destructive_unfrozen_bumps() {
        let dir = tempfile::tempdir().unwrap();
        let mut cfg = config(dir.path());
        cfg.frozen_types.clear();

        let core = GeneratorCore::new(params(dem_resource("dem/alps")), &cfg).unwrap();
        core.make_ready().unwrap();

        let core = GeneratorCore::new(params(dem_resource("dem/andes")), &cfg).unwrap();
        let served = core.resource();
        assert_eq!(
            served.definition,
            Definition::SurfaceDem(SurfaceDemDef::new("dem/andes"))
        );
        assert_eq!(served.revision, 1);

        // not yet persisted; make_ready saves
        core.make_ready().unwrap();
        assert_eq!(core.saved_resource().revision, 1);
    }

    #[test]
    fn test_revision_merge_on_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = config(dir.path());

        let mut first = dem_resource("dem/alps");
        first.revision = 7;
        let core = GeneratorCore::new(params(first), &cfg).unwrap();
        core.make_ready().unwrap();

        // incoming with a lower revision: saved one wins
        let core = GeneratorCore::new(params(dem_resource("dem/alps")), &cfg).unwrap();
        assert_eq!(core.resource().revision, 7);
    }

    #[test]
    fn test_url() {
        let dir = tempfile::tempdir().unwrap();
        let core = GeneratorCore::new(params(dem_resource("dem/alps")), &config(dir.path()))
            .unwrap();
        assert_eq!(core.url(), "/webmercator/surface/terrain/alps/");
    }

    #[test]
    fn test_absolute_dataset() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = config(dir.path());
        let core =
            GeneratorCore::new(params(dem_resource("dem/alps")), &cfg).unwrap();

        assert_eq!(
            core.absolute_dataset(&cfg, "https://example.com/dem"),
            "https://example.com/dem"
        );
        assert_eq!(core.absolute_dataset(&cfg, "/abs/dem"), "/abs/dem");
        assert!(core
            .absolute_dataset(&cfg, "dem/alps")
            .ends_with("dem/alps"));
    }

    #[test]
    fn test_factory_set_mismatch() {
        let set = FactorySet::with_builtins();
        let mut resource = dem_resource("dem/alps");
        // declared kind does not match the typed definition
        resource.generator = GeneratorKind::tms_raster_patchwork();
        let dir = tempfile::tempdir().unwrap();
        let err = match set.create(
            params(resource),
            &config(dir.path()),
            Finder::detached(),
        ) {
            Err(e) => e,
            Ok(_) => panic!("expected create() to fail"),
        };
        assert!(matches!(err, Error::InvalidConfiguration(_)));
    }

    #[test]
    fn test_factory_set_unknown_kind() {
        let set = FactorySet::new();
        let err = match set.find(&GeneratorKind::surface_dem()) {
            Err(e) => e,
            Ok(_) => panic!("expected find() to fail"),
        };
        assert!(matches!(err, Error::UnknownGenerator(_)));
    }

    #[test]
    fn test_factory_set_builtins() {
        let set = FactorySet::with_builtins();
        assert!(set.find(&GeneratorKind::surface_dem()).is_ok());
        assert!(set.find(&GeneratorKind::tms_raster_patchwork()).is_ok());

        let system: Vec<_> = set.iter().filter(|f| f.system_instance()).collect();
        assert_eq!(system.len(), 1);
    }

    #[test]
    fn test_detached_finder() {
        let finder = Finder::detached();
        assert!(finder
            .find(
                GeneratorType::Surface,
                &ResourceId::new("webmercator", "terrain", "alps")
            )
            .is_none());
    }

    #[test]
    fn test_params_default_definition() {
        let def = Definition::default_for(&GeneratorKind::tms_raster_patchwork()).unwrap();
        assert_eq!(
            def,
            Definition::TmsRasterPatchwork(TmsRasterPatchworkDef::default())
        );
        assert!(Definition::default_for(&GeneratorKind::surface_dem()).is_none());
    }
}
