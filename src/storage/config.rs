use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use super::metrics::{InstrumentedStore, LatencySink};
use super::registry::{global, BackendType};
use super::store::Store;
use crate::error::Result;

/// Everything needed to obtain a store: which backend, where it lives and what it is called.
#[derive(Clone)]
pub struct StoreConfig {
    backend: BackendType,
    dir: PathBuf,
    name: String,
    sink: Option<Arc<dyn LatencySink>>,
}

impl StoreConfig {
    pub fn new(backend: BackendType, dir: impl AsRef<Path>, name: impl Into<String>) -> Self {
        Self {
            backend,
            dir: dir.as_ref().to_path_buf(),
            name: name.into(),
            sink: None,
        }
    }

    pub fn backend(&self) -> &BackendType {
        &self.backend
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn with_backend(mut self, backend: BackendType) -> Self {
        self.backend = backend;
        self
    }

    pub fn with_dir(mut self, dir: impl AsRef<Path>) -> Self {
        self.dir = dir.as_ref().to_path_buf();
        self
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Reports point operation latencies of the opened store to `sink`.
    pub fn with_latency_sink(mut self, sink: Arc<dyn LatencySink>) -> Self {
        self.sink = Some(sink);
        self
    }
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self::new(BackendType::MEMDB, ".", "store")
    }
}

impl fmt::Debug for StoreConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StoreConfig")
            .field("backend", &self.backend)
            .field("dir", &self.dir)
            .field("name", &self.name)
            .field("instrumented", &self.sink.is_some())
            .finish()
    }
}

/// Opens the store described by `config` through the global registry.
pub fn open_store(config: &StoreConfig) -> Result<Box<dyn Store>> {
    let store = global().open(&config.backend, &config.name, &config.dir)?;
    match &config.sink {
        Some(sink) => Ok(Box::new(InstrumentedStore::new(store, Arc::clone(sink)))),
        None => Ok(store),
    }
}
