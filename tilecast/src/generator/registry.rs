//! Process-wide generator registry.
//!
//! Owns the set of live generators, reconciles it with the resource backend
//! (periodically and on demand), prepares new generators on a fixed worker
//! pool and services lookups. One mutex serializes all access to the
//! multi-indexed collection; preparation never holds it while running
//! generator code, and a replacement is swapped in only after its prepare
//! succeeds, so the old entry keeps serving until then.

use super::{usec_now, Config, FactorySet, Finder, Generator, GeneratorFinder, Params};
use crate::error::Error;
use crate::warper::Arsenal;
use crate::frame::FrameRegistry;
use crate::resource::backend::ResourceBackend;
use crate::resource::{Changed, Definition, GeneratorType, Resource, ResourceId};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{mpsc, Arc, Condvar, Mutex, OnceLock, Weak};
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// Group every system generator is registered under.
pub const SYSTEM_GROUP: &str = ".system";

/// Backoff after a failed backend load.
const ERROR_BACKOFF: Duration = Duration::from_secs(5);

/// Poll interval while waiting for pending preparations.
const PREPARE_POLL: Duration = Duration::from_millis(100);

/// The multi-indexed collection of live generators.
///
/// `by_id` is the primary store; the secondary indexes are maintained on
/// every mutation and only ever touched under the registry mutex.
#[derive(Default)]
struct Serving {
    by_id: BTreeMap<ResourceId, Arc<dyn Generator>>,
    by_type: BTreeMap<(String, GeneratorType), BTreeSet<ResourceId>>,
    by_group: BTreeMap<(String, GeneratorType, String), BTreeSet<ResourceId>>,
    by_frame: BTreeMap<String, BTreeSet<ResourceId>>,
}

impl Serving {
    fn keys(resource: &Resource) -> ((String, GeneratorType), (String, GeneratorType, String)) {
        let rf = resource.id.reference_frame.clone();
        let ty = resource.generator.ty;
        ((rf.clone(), ty), (rf, ty, resource.id.group.clone()))
    }

    fn insert(&mut self, generator: Arc<dyn Generator>) {
        let resource = generator.core().resource();
        let id = resource.id.clone();
        let (type_key, group_key) = Self::keys(&resource);

        self.by_type.entry(type_key).or_default().insert(id.clone());
        self.by_group
            .entry(group_key)
            .or_default()
            .insert(id.clone());
        self.by_frame
            .entry(id.reference_frame.clone())
            .or_default()
            .insert(id.clone());
        self.by_id.insert(id, generator);
    }

    /// Remove the entry for `id`, but only when it is still `identity`
    /// (a concurrent replacement must not be removed by a stale eraser).
    fn erase(&mut self, id: &ResourceId, identity: &Arc<dyn Generator>) {
        let Some(current) = self.by_id.get(id) else {
            return;
        };
        if !Arc::ptr_eq(current, identity) {
            return;
        }

        let resource = current.core().resource();
        let (type_key, group_key) = Self::keys(&resource);
        if let Some(set) = self.by_type.get_mut(&type_key) {
            set.remove(id);
        }
        if let Some(set) = self.by_group.get_mut(&group_key) {
            set.remove(id);
        }
        if let Some(set) = self.by_frame.get_mut(&id.reference_frame) {
            set.remove(id);
        }
        self.by_id.remove(id);
    }

    /// Swap the entry at `original` for `replacement` in one step.
    fn replace(&mut self, original: &ResourceId, replacement: Arc<dyn Generator>) {
        if let Some(current) = self.by_id.get(original).cloned() {
            self.erase(original, &current);
        }
        self.insert(replacement);
    }
}

struct Workers {
    handles: Vec<JoinHandle<()>>,
    sender: Option<mpsc::Sender<Arc<dyn Generator>>>,
    updater: Option<JoinHandle<()>>,
}

struct Inner {
    config: Config,
    factories: FactorySet,
    frames: Arc<FrameRegistry>,
    backend: Arc<dyn ResourceBackend>,
    arsenal: Arsenal,

    serving: Mutex<Serving>,

    running: AtomicBool,
    update_request: AtomicBool,
    ready: AtomicBool,
    preparing: AtomicUsize,
    last_update: AtomicU64,

    updater_lock: Mutex<()>,
    updater_cond: Condvar,

    workers: Mutex<Workers>,

    /// Weak back-reference to this registry as a finder; set once right
    /// after construction.
    weak_self: OnceLock<Weak<dyn GeneratorFinder>>,
}

/// Handle to the generator registry.
pub struct Generators {
    inner: Arc<Inner>,
}

impl Generators {
    /// Build the registry and register one system generator per reference
    /// frame for every factory flagged as a system instance.
    pub fn new(
        config: Config,
        factories: FactorySet,
        frames: Arc<FrameRegistry>,
        backend: Arc<dyn ResourceBackend>,
        arsenal: Arsenal,
    ) -> Result<Self, Error> {
        let inner = Arc::new(Inner {
            config,
            factories,
            frames,
            backend,
            arsenal,
            serving: Mutex::new(Serving::default()),
            running: AtomicBool::new(false),
            update_request: AtomicBool::new(false),
            ready: AtomicBool::new(false),
            preparing: AtomicUsize::new(0),
            last_update: AtomicU64::new(0),
            updater_lock: Mutex::new(()),
            updater_cond: Condvar::new(),
            workers: Mutex::new(Workers {
                handles: Vec::new(),
                sender: None,
                updater: None,
            }),
            weak_self: OnceLock::new(),
        });

        let as_finder: Arc<dyn GeneratorFinder> = Arc::clone(&inner) as _;
        let _ = inner.weak_self.set(Arc::downgrade(&as_finder));
        drop(as_finder);

        inner.register_system_generators()?;

        Ok(Self { inner })
    }

    /// Start the prepare pool and the reconciler.
    pub fn start(&self) -> Result<(), Error> {
        let inner = &self.inner;
        if inner.running.swap(true, Ordering::AcqRel) {
            return Ok(());
        }

        let (tx, rx) = mpsc::channel::<Arc<dyn Generator>>();
        let rx = Arc::new(Mutex::new(rx));

        {
            let mut workers = inner.workers.lock().expect("registry poisoned");
            workers.sender = Some(tx);

            for id in 1..=inner.config.prepare_workers {
                let inner = Arc::clone(inner);
                let rx = Arc::clone(&rx);
                let handle = thread::Builder::new()
                    .name(format!("prepare:{id}"))
                    .spawn(move || inner.worker(rx))?;
                workers.handles.push(handle);
            }

            let updater_inner = Arc::clone(inner);
            workers.updater = Some(
                thread::Builder::new()
                    .name("updater".to_string())
                    .spawn(move || updater_inner.updater())?,
            );
        }

        // system generators loaded from disk are ready already; the rest
        // need preparation
        let pending: Vec<_> = {
            let serving = inner.serving.lock().expect("registry poisoned");
            serving
                .by_id
                .values()
                .filter(|g| !g.core().ready())
                .cloned()
                .collect()
        };
        for generator in pending {
            inner.prepare(generator);
        }

        Ok(())
    }

    /// Stop everything: wake the reconciler, drain the pool, join all
    /// threads. In-flight prepares finish or fail naturally.
    pub fn stop(&self) {
        let inner = &self.inner;
        if !inner.running.swap(false, Ordering::AcqRel) {
            return;
        }

        let (handles, updater) = {
            let mut workers = inner.workers.lock().expect("registry poisoned");
            // closing the channel terminates the workers
            workers.sender = None;
            (
                std::mem::take(&mut workers.handles),
                workers.updater.take(),
            )
        };

        inner.updater_cond.notify_all();

        if let Some(updater) = updater {
            if updater.join().is_err() {
                warn!("updater thread panicked");
            }
        }
        for handle in handles {
            if handle.join().is_err() {
                warn!("prepare worker panicked");
            }
        }
    }

    /// Request an immediate reconciliation; returns the request timestamp
    /// (microseconds since epoch).
    pub fn update(&self) -> u64 {
        let start = usec_now();
        self.inner.update_request.store(true, Ordering::Release);
        self.inner.updater_cond.notify_one();
        start
    }

    /// True once the first reconciliation has completed.
    pub fn ready(&self) -> bool {
        self.inner.ready.load(Ordering::Acquire)
    }

    /// True when the last reconciliation finished after `timestamp`.
    pub fn updated_since(&self, timestamp: u64) -> bool {
        self.inner.last_update.load(Ordering::Acquire) > timestamp
    }

    /// Lookup by type and id; the stored generator type must match.
    pub fn generator(
        &self,
        ty: GeneratorType,
        id: &ResourceId,
    ) -> Result<Option<Arc<dyn Generator>>, Error> {
        self.inner.check_ready()?;

        let generator = {
            let serving = self.inner.serving.lock().expect("registry poisoned");
            serving.by_id.get(id).cloned()
        };

        Ok(generator.filter(|g| g.core().kind().ty == ty))
    }

    /// All ready generators of one reference frame.
    pub fn reference_frame(&self, reference_frame: &str) -> Result<Vec<Arc<dyn Generator>>, Error> {
        self.inner.check_ready()?;

        let serving = self.inner.serving.lock().expect("registry poisoned");
        let Some(ids) = serving.by_frame.get(reference_frame) else {
            return Ok(Vec::new());
        };
        Ok(ids
            .iter()
            .filter_map(|id| serving.by_id.get(id))
            .filter(|g| g.core().ready())
            .cloned()
            .collect())
    }

    /// Distinct groups of one type within a reference frame.
    pub fn list_groups(
        &self,
        reference_frame: &str,
        ty: GeneratorType,
    ) -> Result<Vec<String>, Error> {
        self.inner.check_ready()?;

        let serving = self.inner.serving.lock().expect("registry poisoned");
        let key = (reference_frame.to_string(), ty);
        let Some(ids) = serving.by_type.get(&key) else {
            return Ok(Vec::new());
        };
        let mut out: Vec<String> = Vec::new();
        for id in ids {
            if out.last().map(String::as_str) != Some(id.group.as_str()) {
                out.push(id.group.clone());
            }
        }
        Ok(out)
    }

    /// Resource ids of one group.
    pub fn list_ids(
        &self,
        reference_frame: &str,
        ty: GeneratorType,
        group: &str,
    ) -> Result<Vec<String>, Error> {
        self.inner.check_ready()?;

        let serving = self.inner.serving.lock().expect("registry poisoned");
        let key = (reference_frame.to_string(), ty, group.to_string());
        let Some(ids) = serving.by_group.get(&key) else {
            return Ok(Vec::new());
        };
        Ok(ids.iter().map(|id| id.id.clone()).collect())
    }

    pub fn has(&self, id: &ResourceId) -> bool {
        let serving = self.inner.serving.lock().expect("registry poisoned");
        serving.by_id.contains_key(id)
    }

    pub fn is_ready(&self, id: &ResourceId) -> bool {
        let serving = self.inner.serving.lock().expect("registry poisoned");
        serving
            .by_id
            .get(id)
            .map(|g| g.core().ready())
            .unwrap_or(false)
    }

    /// Public URL of a resource; unknown ids are an error.
    pub fn url(&self, id: &ResourceId) -> Result<String, Error> {
        let serving = self.inner.serving.lock().expect("registry poisoned");
        serving
            .by_id
            .get(id)
            .map(|g| g.core().url())
            .ok_or_else(|| Error::UnknownGenerator(id.to_string()))
    }

    /// Whether a resource became ready after `timestamp`. With `nothrow`,
    /// an unknown id reports `false` instead of failing.
    pub fn resource_updated_since(
        &self,
        id: &ResourceId,
        timestamp: u64,
        nothrow: bool,
    ) -> Result<bool, Error> {
        let serving = self.inner.serving.lock().expect("registry poisoned");
        match serving.by_id.get(id) {
            Some(generator) => Ok(generator.core().updated_since(timestamp)),
            None if nothrow => Ok(false),
            None => Err(Error::UnknownGenerator(id.to_string())),
        }
    }

    /// One line per generator, for monitoring handlers.
    pub fn stat(&self) -> String {
        let generators: Vec<Arc<dyn Generator>> = {
            let serving = self.inner.serving.lock().expect("registry poisoned");
            serving.by_id.values().cloned().collect()
        };

        let mut out = String::new();
        for generator in generators {
            let core = generator.core();
            let resource = core.resource();
            out.push_str(&format!(
                "<{}> (type <{}>){}\n",
                resource.id,
                resource.generator,
                if core.ready() { "" } else { " not ready" }
            ));
        }
        out
    }

    /// Number of queued or running preparations.
    pub fn preparing(&self) -> usize {
        self.inner.preparing.load(Ordering::Acquire)
    }

    /// Weak lookup handle for generators that resolve other generators at
    /// serve time.
    pub fn finder(&self) -> Finder {
        self.inner.finder()
    }
}

impl Drop for Generators {
    fn drop(&mut self) {
        self.stop();
    }
}

impl GeneratorFinder for Inner {
    fn find_generator(&self, ty: GeneratorType, id: &ResourceId) -> Option<Arc<dyn Generator>> {
        let serving = self.serving.lock().expect("registry poisoned");
        serving
            .by_id
            .get(id)
            .filter(|g| g.core().kind().ty == ty && g.core().ready())
            .cloned()
    }
}

impl Inner {
    fn running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    fn check_ready(&self) -> Result<(), Error> {
        if self.ready.load(Ordering::Acquire) {
            return Ok(());
        }
        Err(Error::Unavailable("server not ready".to_string()))
    }

    fn ensure_running(&self) -> Result<(), Error> {
        if self.running() {
            Ok(())
        } else {
            Err(Error::Aborted)
        }
    }

    fn finder(&self) -> Finder {
        Finder::new(
            self.weak_self
                .get()
                .expect("finder initialized at construction")
                .clone(),
        )
    }

    /// Instantiate one generator per reference frame for each factory
    /// flagged as a system instance.
    fn register_system_generators(&self) -> Result<(), Error> {
        for factory in self.factories.iter() {
            if !factory.system_instance() {
                continue;
            }
            let kind = factory.kind();

            let Some(definition) = Definition::default_for(&kind) else {
                warn!(%kind, "system factory has no default definition, skipping");
                continue;
            };

            for frame in self.frames.iter() {
                debug!(%kind, frame = %frame.id, "registering system generator");

                let mut resource = Resource::new(
                    ResourceId::new(frame.id.clone(), SYSTEM_GROUP, kind.driver.clone()),
                    crate::geo::LodRange::new(0, 22),
                    crate::geo::TileRange::new(0, 0, 0, 0),
                    definition.clone(),
                );
                resource.comment = "autoregistered resource".to_string();
                resource.file_class_settings =
                    self.backend.generic_config().file_class_settings.clone();

                let mut params = Params::new(resource, Arc::clone(&self.frames));
                params.system = true;

                let generator = self
                    .factories
                    .create(params, &self.config, self.finder())?;

                self.serving
                    .lock()
                    .expect("registry poisoned")
                    .insert(generator);
            }
        }
        Ok(())
    }

    /// Enqueue a generator for preparation on the worker pool.
    fn prepare(&self, generator: Arc<dyn Generator>) {
        self.preparing.fetch_add(1, Ordering::AcqRel);

        let sender = {
            let workers = self.workers.lock().expect("registry poisoned");
            workers.sender.clone()
        };

        match sender {
            Some(sender) if sender.send(generator).is_ok() => {}
            _ => {
                // pool not running; drop the task
                self.preparing.fetch_sub(1, Ordering::AcqRel);
            }
        }
    }

    /// Prepare-pool worker loop; exits when the channel closes.
    fn worker(&self, rx: Arc<Mutex<mpsc::Receiver<Arc<dyn Generator>>>>) {
        debug!("spawned prepare worker");
        loop {
            let task = {
                let rx = rx.lock().expect("registry poisoned");
                rx.recv()
            };
            let Ok(generator) = task else {
                debug!("terminated prepare worker");
                return;
            };

            let id = generator.core().id();
            match generator.prepare(&self.arsenal) {
                Ok(()) => {
                    if let Some(original) = generator.core().replace().cloned() {
                        self.replace_now(&original, Arc::clone(&generator));
                    }
                }
                Err(e) => {
                    warn!(
                        resource = %id,
                        error = %e,
                        "failed to prepare generator, removing from set of known generators"
                    );
                    self.backend.error(&id, &e.to_string());

                    let mut serving = self.serving.lock().expect("registry poisoned");
                    serving.erase(&id, &generator);
                }
            }
            self.preparing.fetch_sub(1, Ordering::AcqRel);
        }
    }

    /// Swap a prepared replacement in place of the original entry.
    fn replace_now(&self, original: &ResourceId, replacement: Arc<dyn Generator>) {
        let mut serving = self.serving.lock().expect("registry poisoned");
        serving.replace(original, replacement);
        info!(resource = %original, "replaced resource with new definition");
    }

    /// Reconciler thread body.
    fn updater(&self) {
        self.update_request.store(false, Ordering::Release);
        self.last_update.store(0, Ordering::Release);

        while self.running() {
            let mut sleep = Duration::from_secs(self.config.resource_update_period);

            let outcome = self
                .backend
                .load()
                .and_then(|resources| self.reconcile(resources));

            match outcome {
                Ok(()) => {
                    self.last_update.store(usec_now(), Ordering::Release);
                }
                Err(Error::Aborted) => {}
                Err(e) => {
                    error!(error = %e, "resource info update failed");
                    if self.config.resource_update_period > 0 {
                        sleep = ERROR_BACKOFF;
                    }
                }
            }

            self.wait_for_tick(sleep);
        }
    }

    /// Sleep until the next tick, an on-demand update or shutdown.
    fn wait_for_tick(&self, sleep: Duration) {
        let guard = self.updater_lock.lock().expect("registry poisoned");

        let wakeup = |inner: &Inner| {
            let requested = inner.update_request.swap(false, Ordering::AcqRel);
            !inner.running() || requested
        };

        if self.config.resource_update_period > 0 {
            let _guard = self
                .updater_cond
                .wait_timeout_while(guard, sleep, |_| !wakeup(self))
                .expect("registry poisoned");
        } else {
            // no timed polling: wait for a signal
            let _guard = self
                .updater_cond
                .wait_while(guard, |_| !wakeup(self))
                .expect("registry poisoned");
        }
    }

    /// One reconciliation cycle: diff the catalogue against the serving
    /// set and apply adds, removals and replacements.
    fn reconcile(&self, resources: BTreeMap<ResourceId, Resource>) -> Result<(), Error> {
        debug!("updating resources");

        let serving_snapshot: Vec<(ResourceId, Arc<dyn Generator>)> = {
            let serving = self.serving.lock().expect("registry poisoned");
            serving
                .by_id
                .iter()
                .map(|(id, generator)| (id.clone(), Arc::clone(generator)))
                .collect()
        };

        let mut to_add: Vec<Arc<dyn Generator>> = Vec::new();
        let mut to_remove: Vec<(ResourceId, Arc<dyn Generator>)> = Vec::new();
        let mut to_replace: Vec<Arc<dyn Generator>> = Vec::new();

        let mut add = |inner: &Inner, resource: &Resource| -> Result<(), Error> {
            inner.ensure_running()?;
            let params = Params::new(resource.clone(), Arc::clone(&inner.frames));
            match inner.factories.create(params, &inner.config, inner.finder()) {
                Ok(generator) => to_add.push(generator),
                Err(e) => {
                    error!(resource = %resource.id, error = %e, "failed to create generator");
                }
            }
            Ok(())
        };

        let mut replace = |inner: &Inner,
                           resource: &Resource,
                           original: &ResourceId|
         -> Result<(), Error> {
            inner.ensure_running()?;
            let mut params = Params::new(resource.clone(), Arc::clone(&inner.frames));
            params.replace = Some(original.clone());
            match inner.factories.create(params, &inner.config, inner.finder()) {
                Ok(generator) => to_replace.push(generator),
                Err(e) => {
                    error!(resource = %resource.id, error = %e, "failed to re-create generator");
                }
            }
            Ok(())
        };

        // ordered merge walk over both sets
        let mut incoming = resources.iter().peekable();
        let mut serving = serving_snapshot.iter().peekable();

        loop {
            match (incoming.peek(), serving.peek()) {
                (Some(&(res_id, resource)), Some(&(serv_id, generator))) => {
                    if res_id < serv_id {
                        add(self, resource)?;
                        incoming.next();
                    } else if serv_id < res_id {
                        if !generator.core().system() {
                            to_remove.push((serv_id.clone(), Arc::clone(generator)));
                        }
                        serving.next();
                    } else {
                        match generator.core().changed(resource) {
                            Changed::No => {}
                            Changed::Yes => {
                                if !self.config.freezes(resource.generator.ty) {
                                    replace(self, resource, serv_id)?;
                                }
                            }
                            Changed::Safely | Changed::WithRevisionBump => {
                                replace(self, resource, serv_id)?;
                            }
                        }
                        incoming.next();
                        serving.next();
                    }
                }
                (Some(&(_, resource)), None) => {
                    add(self, resource)?;
                    incoming.next();
                }
                (None, Some(&(serv_id, generator))) => {
                    if !generator.core().system() {
                        to_remove.push((serv_id.clone(), Arc::clone(generator)));
                    }
                    serving.next();
                }
                (None, None) => break,
            }
        }

        for generator in to_add {
            {
                let mut serving = self.serving.lock().expect("registry poisoned");
                serving.insert(Arc::clone(&generator));
            }
            if !generator.core().ready() {
                self.prepare(generator);
            }
        }

        for (id, generator) in to_remove {
            let mut serving = self.serving.lock().expect("registry poisoned");
            serving.erase(&id, &generator);
        }

        for generator in to_replace {
            if !generator.core().ready() {
                self.prepare(generator);
            } else if let Some(original) = generator.core().replace().cloned() {
                self.replace_now(&original, generator);
            }
        }

        debug!("resources updated");
        if !self.ready.swap(true, Ordering::AcqRel) {
            info!("ready to serve");
        }

        // wait until all pending resources are available
        while self.preparing.load(Ordering::Acquire) > 0 && self.running() {
            thread::sleep(PREPARE_POLL);
        }

        Ok(())
    }
}
