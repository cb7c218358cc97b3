//! Resource backends: where the catalogue of resources comes from.
//!
//! The registry reconciles its in-memory state against whatever the backend
//! reports. Backends are also the error channel for failed preparations so
//! the operator-facing side can surface them.

use super::{Resource, ResourceId};
use crate::error::Error;
use crate::sink::FileClassSettings;
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Mutex;
use tracing::{debug, warn};

/// Backend-wide configuration applied to every resource.
#[derive(Debug, Clone, Default)]
pub struct GenericConfig {
    pub file_class_settings: FileClassSettings,
}

/// Source of truth for the resource catalogue.
pub trait ResourceBackend: Send + Sync {
    /// Load the full catalogue, keyed and ordered by resource id.
    fn load(&self) -> Result<BTreeMap<ResourceId, Resource>, Error>;

    /// Report a resource-level failure back to the operator.
    fn error(&self, id: &ResourceId, message: &str);

    fn generic_config(&self) -> &GenericConfig;
}

/// Backend reading a JSON catalogue file (a flat list of resources).
pub struct FileResourceBackend {
    path: PathBuf,
    config: GenericConfig,
}

impl FileResourceBackend {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            config: GenericConfig::default(),
        }
    }
}

impl ResourceBackend for FileResourceBackend {
    fn load(&self) -> Result<BTreeMap<ResourceId, Resource>, Error> {
        let data = std::fs::read(&self.path)?;
        let resources: Vec<Resource> = serde_json::from_slice(&data)?;

        let mut map = BTreeMap::new();
        for mut resource in resources {
            resource.file_class_settings = self.config.file_class_settings.clone();
            if let Some(previous) = map.insert(resource.id.clone(), resource) {
                warn!(id = %previous.id, "duplicate resource in catalogue, keeping later entry");
            }
        }

        debug!(path = %self.path.display(), count = map.len(), "loaded resource catalogue");
        Ok(map)
    }

    fn error(&self, id: &ResourceId, message: &str) {
        warn!(resource = %id, message, "resource error");
    }

    fn generic_config(&self) -> &GenericConfig {
        &self.config
    }
}

/// In-memory backend for tests and embedding: the catalogue is swappable at
/// runtime and reported errors are recorded.
#[derive(Default)]
pub struct MemoryResourceBackend {
    resources: Mutex<BTreeMap<ResourceId, Resource>>,
    errors: Mutex<Vec<(ResourceId, String)>>,
    config: GenericConfig,
}

impl MemoryResourceBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the whole catalogue.
    pub fn set_resources(&self, resources: impl IntoIterator<Item = Resource>) {
        let map = resources
            .into_iter()
            .map(|r| (r.id.clone(), r))
            .collect::<BTreeMap<_, _>>();
        *self.resources.lock().expect("backend poisoned") = map;
    }

    pub fn reported_errors(&self) -> Vec<(ResourceId, String)> {
        self.errors.lock().expect("backend poisoned").clone()
    }
}

impl ResourceBackend for MemoryResourceBackend {
    fn load(&self) -> Result<BTreeMap<ResourceId, Resource>, Error> {
        Ok(self.resources.lock().expect("backend poisoned").clone())
    }

    fn error(&self, id: &ResourceId, message: &str) {
        warn!(resource = %id, message, "resource error");
        self.errors
            .lock()
            .expect("backend poisoned")
            .push((id.clone(), message.to_string()));
    }

    fn generic_config(&self) -> &GenericConfig {
        &self.config
    }
}
