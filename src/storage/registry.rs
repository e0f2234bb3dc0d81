use std::borrow::Cow;
use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;
use std::sync::OnceLock;

use parking_lot::RwLock;

use super::engine;
use super::store::Store;
use crate::error::{Error, Result};

/// The name a backend is registered under.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct BackendType(Cow<'static, str>);

impl BackendType {
    /// In-memory ordered map, mostly used for testing.
    pub const MEMDB: BackendType = BackendType(Cow::Borrowed("memdb"));
    /// Append-only log on local disk (feature `bitcask`).
    pub const BITCASK: BackendType = BackendType(Cow::Borrowed("bitcask"));
    /// LSM-tree engine (feature `fjall`).
    pub const FJALL: BackendType = BackendType(Cow::Borrowed("fjall"));
    /// Embedded engine (feature `sled`).
    pub const SLED: BackendType = BackendType(Cow::Borrowed("sled"));

    pub fn new(name: impl Into<Cow<'static, str>>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for BackendType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&'static str> for BackendType {
    fn from(name: &'static str) -> Self {
        Self::new(name)
    }
}

impl From<String> for BackendType {
    fn from(name: String) -> Self {
        Self::new(name)
    }
}

/// Opens a store called `name` under the storage root `dir`.
pub type Constructor = fn(name: &str, dir: &Path) -> Result<Box<dyn Store>>;

/// Maps backend names to their constructors.
///
/// Registration is append-once: the first constructor registered for a name wins and later
/// attempts are ignored, so a backend that initializes itself more than once is harmless.
#[derive(Default)]
pub struct Registry {
    constructors: RwLock<BTreeMap<BackendType, Constructor>>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns `false` if `backend` already had a constructor, which is left in place.
    pub fn register(&self, backend: BackendType, constructor: Constructor) -> bool {
        let mut constructors = self.constructors.write();
        if constructors.contains_key(&backend) {
            log::debug!("backend {backend} is already registered, ignoring");
            return false;
        }
        constructors.insert(backend, constructor);
        true
    }

    pub fn is_registered(&self, backend: &BackendType) -> bool {
        self.constructors.read().contains_key(backend)
    }

    /// The registered backend names, sorted.
    pub fn backends(&self) -> Vec<BackendType> {
        self.constructors.read().keys().cloned().collect()
    }

    pub fn open(
        &self,
        backend: &BackendType,
        name: &str,
        dir: impl AsRef<Path>,
    ) -> Result<Box<dyn Store>> {
        let constructor = self.constructors.read().get(backend).copied();
        let Some(constructor) = constructor else {
            return Err(Error::UnknownBackend {
                name: backend.to_string(),
                known: self.backends().iter().map(ToString::to_string).collect(),
            });
        };

        let dir = dir.as_ref();
        log::debug!("opening {backend} store {name} in {}", dir.display());
        constructor(name, dir).map_err(|e| Error::BackendInitFailed {
            backend: backend.clone(),
            source: Box::new(e),
        })
    }
}

impl fmt::Debug for Registry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Registry")
            .field("backends", &self.backends())
            .finish()
    }
}

static GLOBAL: OnceLock<Registry> = OnceLock::new();

/// The process-wide registry.
///
/// Every backend compiled in registers itself inside the one-time initializer, so registration
/// of the built-ins has completed before the first lookup returns.
pub fn global() -> &'static Registry {
    GLOBAL.get_or_init(|| {
        let registry = Registry::new();
        engine::register_builtin(&registry);
        registry
    })
}

/// Opens the store `name` with `backend`, resolved through the [global] registry.
pub fn new_store(
    name: &str,
    backend: &BackendType,
    dir: impl AsRef<Path>,
) -> Result<Box<dyn Store>> {
    global().open(backend, name, dir)
}
