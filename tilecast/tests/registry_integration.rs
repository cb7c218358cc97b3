//! Integration tests for the generator registry.
//!
//! These cover the full reconciliation workflow against an in-memory
//! resource backend: initial load, freeze semantics, destructive
//! replacement with revision bumps, removal, system generators and
//! lookup availability.

use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tilecast::error::Error;
use tilecast::frame::FrameRegistry;
use tilecast::generator::registry::{Generators, SYSTEM_GROUP};
use tilecast::generator::{Config, FactorySet};
use tilecast::geo::{LodRange, TileRange};
use tilecast::resource::backend::MemoryResourceBackend;
use tilecast::resource::{
    Definition, GeneratorType, RasterFormat, Resource, ResourceId, TmsRasterPatchworkDef,
};
use tilecast::sink::Sink;
use tilecast::warper::{Arsenal, Raster, RasterRequest, RasterWarper};

// =============================================================================
// Test Helpers
// =============================================================================

struct StubWarper;

impl RasterWarper for StubWarper {
    fn warp(&self, request: &RasterRequest, _sink: &Sink) -> Result<Raster, Error> {
        Ok(Raster::filled(request.size, 3, 0.0))
    }
}

fn patchwork_resource(id: &str, format: RasterFormat, mask: Option<&str>) -> Resource {
    Resource::new(
        ResourceId::new("webmercator", "debug", id),
        LodRange::new(0, 10),
        TileRange::new(0, 0, 0, 0),
        Definition::TmsRasterPatchwork(TmsRasterPatchworkDef {
            mask: mask.map(str::to_string),
            format,
        }),
    )
}

fn registry(
    root: &Path,
    backend: Arc<MemoryResourceBackend>,
    freeze_tms: bool,
) -> Generators {
    let mut config = Config::new(root);
    // signal-driven reconciliation only
    config.resource_update_period = 0;
    config.prepare_workers = 2;
    if freeze_tms {
        config.frozen_types.insert(GeneratorType::Tms);
    }

    Generators::new(
        config,
        FactorySet::with_builtins(),
        Arc::new(FrameRegistry::with_defaults()),
        backend,
        Arsenal::new(Arc::new(StubWarper)),
    )
    .expect("registry construction")
}

fn wait_until(what: &str, mut condition: impl FnMut() -> bool) {
    let deadline = Instant::now() + Duration::from_secs(10);
    while Instant::now() < deadline {
        if condition() {
            return;
        }
        std::thread::sleep(Duration::from_millis(20));
    }
    panic!("timed out waiting for {what}");
}

fn wait_ready(generators: &Generators) {
    generators.update();
    wait_until("registry ready", || {
        generators.ready() && generators.preparing() == 0
    });
}

// =============================================================================
// Integration Tests
// =============================================================================

#[test]
fn test_lookups_unavailable_before_first_reconciliation() {
    let dir = tempfile::tempdir().unwrap();
    let backend = Arc::new(MemoryResourceBackend::new());
    let generators = registry(dir.path(), backend, false);

    let id = ResourceId::new("webmercator", "debug", "pw");
    assert!(matches!(
        generators.generator(GeneratorType::Tms, &id),
        Err(Error::Unavailable(_))
    ));
    assert!(matches!(
        generators.reference_frame("webmercator"),
        Err(Error::Unavailable(_))
    ));
}

#[test]
fn test_initial_load_and_lookups() {
    let dir = tempfile::tempdir().unwrap();
    let backend = Arc::new(MemoryResourceBackend::new());
    backend.set_resources([patchwork_resource("pw", RasterFormat::Jpg, None)]);

    let generators = registry(dir.path(), backend, false);
    generators.start().unwrap();
    wait_ready(&generators);

    let id = ResourceId::new("webmercator", "debug", "pw");
    let generator = generators
        .generator(GeneratorType::Tms, &id)
        .unwrap()
        .expect("generator must exist");
    assert!(generator.core().ready());

    // type mismatch yields nothing
    assert!(generators
        .generator(GeneratorType::Surface, &id)
        .unwrap()
        .is_none());

    assert!(generators.has(&id));
    assert!(generators.is_ready(&id));
    assert_eq!(generators.url(&id).unwrap(), "/webmercator/tms/debug/pw/");

    let groups = generators
        .list_groups("webmercator", GeneratorType::Tms)
        .unwrap();
    assert!(groups.contains(&"debug".to_string()));
    assert_eq!(
        generators
            .list_ids("webmercator", GeneratorType::Tms, "debug")
            .unwrap(),
        vec!["pw".to_string()]
    );

    let frame_generators = generators.reference_frame("webmercator").unwrap();
    // the configured resource plus the system patchwork
    assert!(frame_generators.len() >= 2);

    let stat = generators.stat();
    assert!(stat.contains("webmercator/debug/pw"));

    generators.stop();
}

#[test]
fn test_system_generator_autoregistered() {
    let dir = tempfile::tempdir().unwrap();
    let backend = Arc::new(MemoryResourceBackend::new());
    let generators = registry(dir.path(), backend, false);
    generators.start().unwrap();
    wait_ready(&generators);

    let id = ResourceId::new("webmercator", SYSTEM_GROUP, "tms-raster-patchwork");
    let generator = generators
        .generator(GeneratorType::Tms, &id)
        .unwrap()
        .expect("system generator must exist");
    assert!(generator.core().ready());
    assert!(generator.core().system());
    assert_eq!(
        generator.core().resource().comment,
        "autoregistered resource"
    );

    // an empty catalogue must not remove it
    generators.update();
    wait_until("reconciliation", || generators.preparing() == 0);
    std::thread::sleep(Duration::from_millis(50));
    assert!(generators.has(&id));

    generators.stop();
}

#[test]
fn test_destructive_replace_bumps_revision() {
    let dir = tempfile::tempdir().unwrap();
    let backend = Arc::new(MemoryResourceBackend::new());
    backend.set_resources([patchwork_resource("pw", RasterFormat::Jpg, None)]);

    let generators = registry(dir.path(), Arc::clone(&backend), false);
    generators.start().unwrap();
    wait_ready(&generators);

    let id = ResourceId::new("webmercator", "debug", "pw");
    let before = generators
        .generator(GeneratorType::Tms, &id)
        .unwrap()
        .unwrap()
        .core()
        .resource();
    assert_eq!(before.revision, 0);

    // destructive change: mask appears
    backend.set_resources([patchwork_resource("pw", RasterFormat::Jpg, Some("mask"))]);
    generators.update();

    wait_until("replacement served", || {
        let resource = generators
            .generator(GeneratorType::Tms, &id)
            .unwrap()
            .unwrap()
            .core()
            .resource();
        matches!(
            &resource.definition,
            Definition::TmsRasterPatchwork(def) if def.mask.is_some()
        )
    });

    let after = generators
        .generator(GeneratorType::Tms, &id)
        .unwrap()
        .unwrap()
        .core()
        .resource();
    assert_eq!(after.revision, before.revision + 1);

    generators.stop();
}

#[test]
fn test_lookup_never_empty_during_replace() {
    let dir = tempfile::tempdir().unwrap();
    let backend = Arc::new(MemoryResourceBackend::new());
    backend.set_resources([patchwork_resource("pw", RasterFormat::Jpg, None)]);

    let generators = registry(dir.path(), Arc::clone(&backend), false);
    generators.start().unwrap();
    wait_ready(&generators);

    let id = ResourceId::new("webmercator", "debug", "pw");

    backend.set_resources([patchwork_resource("pw", RasterFormat::Jpg, Some("mask"))]);
    generators.update();

    // at every observable moment exactly one generator serves the id
    let deadline = Instant::now() + Duration::from_secs(3);
    let mut saw_replacement = false;
    while Instant::now() < deadline {
        let generator = generators
            .generator(GeneratorType::Tms, &id)
            .unwrap()
            .expect("id must never disappear during replace");
        if let Definition::TmsRasterPatchwork(def) = &generator.core().resource().definition {
            if def.mask.is_some() {
                saw_replacement = true;
                break;
            }
        }
    }
    assert!(saw_replacement, "replacement never became visible");

    generators.stop();
}

#[test]
fn test_frozen_kind_keeps_saved_definition() {
    let dir = tempfile::tempdir().unwrap();
    let id = ResourceId::new("webmercator", "debug", "pw");

    // first run persists definition A
    {
        let backend = Arc::new(MemoryResourceBackend::new());
        backend.set_resources([patchwork_resource("pw", RasterFormat::Jpg, None)]);
        let generators = registry(dir.path(), backend, true);
        generators.start().unwrap();
        wait_ready(&generators);
        generators.stop();
    }

    // restart with a destructively changed definition B
    let backend = Arc::new(MemoryResourceBackend::new());
    backend.set_resources([patchwork_resource("pw", RasterFormat::Jpg, Some("mask"))]);
    let generators = registry(dir.path(), Arc::clone(&backend), true);
    generators.start().unwrap();
    wait_ready(&generators);

    let resource = generators
        .generator(GeneratorType::Tms, &id)
        .unwrap()
        .unwrap()
        .core()
        .resource();

    // stored definition wins, revision untouched
    assert!(matches!(
        &resource.definition,
        Definition::TmsRasterPatchwork(def) if def.mask.is_none()
    ));
    assert_eq!(resource.revision, 0);

    // further reconciliations with B must not replace either
    generators.update();
    wait_until("reconciliation", || generators.preparing() == 0);
    std::thread::sleep(Duration::from_millis(50));
    let resource = generators
        .generator(GeneratorType::Tms, &id)
        .unwrap()
        .unwrap()
        .core()
        .resource();
    assert!(matches!(
        &resource.definition,
        Definition::TmsRasterPatchwork(def) if def.mask.is_none()
    ));

    generators.stop();
}

#[test]
fn test_removed_resource_disappears() {
    let dir = tempfile::tempdir().unwrap();
    let backend = Arc::new(MemoryResourceBackend::new());
    backend.set_resources([patchwork_resource("pw", RasterFormat::Jpg, None)]);

    let generators = registry(dir.path(), Arc::clone(&backend), false);
    generators.start().unwrap();
    wait_ready(&generators);

    let id = ResourceId::new("webmercator", "debug", "pw");
    assert!(generators.has(&id));

    backend.set_resources([]);
    generators.update();
    wait_until("removal", || !generators.has(&id));

    assert!(generators
        .generator(GeneratorType::Tms, &id)
        .unwrap()
        .is_none());
    assert!(matches!(
        generators.url(&id),
        Err(Error::UnknownGenerator(_))
    ));

    generators.stop();
}

#[test]
fn test_failed_prepare_reports_and_removes() {
    let dir = tempfile::tempdir().unwrap();
    let backend = Arc::new(MemoryResourceBackend::new());

    // a surface resource whose dataset does not exist: prepare must fail
    let broken = Resource::new(
        ResourceId::new("webmercator", "terrain", "broken"),
        LodRange::new(2, 3),
        TileRange::new(0, 0, 3, 3),
        Definition::SurfaceDem(tilecast::resource::SurfaceDemDef::new("dem/missing")),
    );
    backend.set_resources([broken]);

    let generators = registry(dir.path(), Arc::clone(&backend), false);
    generators.start().unwrap();
    wait_ready(&generators);

    let id = ResourceId::new("webmercator", "terrain", "broken");
    wait_until("error reported", || !backend.reported_errors().is_empty());
    wait_until("broken generator removed", || !generators.has(&id));

    assert_eq!(backend.reported_errors()[0].0, id);

    generators.stop();
}

#[test]
fn test_update_timestamps() {
    let dir = tempfile::tempdir().unwrap();
    let backend = Arc::new(MemoryResourceBackend::new());
    let generators = registry(dir.path(), backend, false);

    assert!(!generators.updated_since(0));

    generators.start().unwrap();
    wait_ready(&generators);
    wait_until("first update recorded", || generators.updated_since(0));

    let id = ResourceId::new("webmercator", SYSTEM_GROUP, "tms-raster-patchwork");
    assert!(generators.resource_updated_since(&id, 0, false).unwrap());
    assert!(!generators
        .resource_updated_since(&ResourceId::new("webmercator", "x", "y"), 0, true)
        .unwrap());

    generators.stop();
}

#[test]
fn test_stop_is_idempotent_and_joins() {
    let dir = tempfile::tempdir().unwrap();
    let backend = Arc::new(MemoryResourceBackend::new());
    let generators = registry(dir.path(), backend, false);
    generators.start().unwrap();
    wait_ready(&generators);

    generators.stop();
    generators.stop();
    // drop runs stop once more through the Drop impl
}
