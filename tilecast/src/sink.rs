//! Output sink for generated content.
//!
//! Generators never talk to the transport directly; they hand finished
//! payloads (or errors) to a [`Sink`]. The sink also carries the abort flag
//! used for cooperative cancellation: every warp boundary checks it via
//! [`Sink::check_aborted`] so an abandoned request stops paying for raster
//! work as soon as possible.

use crate::error::Error;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

/// Cache-relevant classification of served files.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FileClass {
    /// Mutable configuration (map configs, free layers).
    Config,
    /// Stable support files.
    File,
    /// Generated tile data.
    Data,
    /// Registry content.
    Registry,
    Unknown,
}

/// Per-class max-age policy, in seconds. Negative means "no caching".
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileClassSettings {
    max_ages: BTreeMap<FileClass, i64>,
}

impl Default for FileClassSettings {
    fn default() -> Self {
        let mut max_ages = BTreeMap::new();
        max_ages.insert(FileClass::Config, 60);
        max_ages.insert(FileClass::File, 3600);
        max_ages.insert(FileClass::Data, 604_800);
        max_ages.insert(FileClass::Registry, 3600);
        Self { max_ages }
    }
}

impl FileClassSettings {
    pub fn max_age(&self, class: FileClass) -> i64 {
        self.max_ages.get(&class).copied().unwrap_or(-1)
    }

    pub fn set_max_age(&mut self, class: FileClass, max_age: i64) {
        self.max_ages.insert(class, max_age);
    }
}

/// Metadata attached to a served payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileInfo {
    pub content_type: String,
    pub file_class: FileClass,
    /// Explicit max-age; when unset, the sink fills it from the attached
    /// [`FileClassSettings`].
    pub max_age: Option<i64>,
}

impl FileInfo {
    pub fn new(content_type: impl Into<String>, file_class: FileClass) -> Self {
        Self {
            content_type: content_type.into(),
            file_class,
            max_age: None,
        }
    }

    pub fn with_max_age(mut self, max_age: i64) -> Self {
        self.max_age = Some(max_age);
        self
    }
}

/// Receiving end of a sink; implemented by the transport layer.
pub trait SinkTarget: Send + Sync {
    fn content(&self, data: Vec<u8>, info: FileInfo);
    fn error(&self, err: Error);
}

/// Handle generators write through.
#[derive(Clone)]
pub struct Sink {
    target: Arc<dyn SinkTarget>,
    abort: Arc<AtomicBool>,
    file_class_settings: Option<FileClassSettings>,
}

impl Sink {
    pub fn new(target: Arc<dyn SinkTarget>) -> Self {
        Self {
            target,
            abort: Arc::new(AtomicBool::new(false)),
            file_class_settings: None,
        }
    }

    /// Attach the caching policy used to fill unset max ages.
    pub fn with_file_class_settings(mut self, settings: FileClassSettings) -> Self {
        self.file_class_settings = Some(settings);
        self
    }

    /// The abort flag; the transport layer sets it when the client goes
    /// away.
    pub fn abort_handle(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.abort)
    }

    /// Cooperative cancellation point.
    pub fn check_aborted(&self) -> Result<(), Error> {
        if self.abort.load(Ordering::Relaxed) {
            return Err(Error::Aborted);
        }
        Ok(())
    }

    /// Deliver a finished payload.
    pub fn content(&self, data: Vec<u8>, mut info: FileInfo) {
        if info.max_age.is_none() {
            info.max_age = Some(match &self.file_class_settings {
                Some(settings) => settings.max_age(info.file_class),
                None => -1,
            });
        }
        self.target.content(data, info);
    }

    /// Deliver a failure.
    pub fn error(&self, err: Error) {
        self.target.error(err);
    }
}

/// In-memory sink target collecting everything it receives.
#[derive(Default)]
pub struct MemorySink {
    contents: Mutex<Vec<(Vec<u8>, FileInfo)>>,
    errors: Mutex<Vec<Error>>,
}

impl MemorySink {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn contents(&self) -> Vec<(Vec<u8>, FileInfo)> {
        self.contents.lock().expect("sink poisoned").clone()
    }

    pub fn take_errors(&self) -> Vec<Error> {
        std::mem::take(&mut *self.errors.lock().expect("sink poisoned"))
    }
}

impl SinkTarget for MemorySink {
    fn content(&self, data: Vec<u8>, info: FileInfo) {
        self.contents.lock().expect("sink poisoned").push((data, info));
    }

    fn error(&self, err: Error) {
        self.errors.lock().expect("sink poisoned").push(err);
    }
}
