//! Backend adapters. Each module translates the store contract into calls on one engine and
//! registers itself into the [`Registry`] when its cargo feature is enabled.

#[cfg(feature = "bitcask")]
pub mod bitcask;
#[cfg(feature = "fjall")]
pub mod fjall;
pub mod memory;
#[cfg(feature = "sled")]
pub mod sled;

use super::registry::Registry;

pub(crate) fn register_builtin(registry: &Registry) {
    memory::register(registry);
    #[cfg(feature = "bitcask")]
    bitcask::register(registry);
    #[cfg(feature = "fjall")]
    fjall::register(registry);
    #[cfg(feature = "sled")]
    sled::register(registry);
}

/// Where an on-disk engine keeps the store `name`.
#[cfg(any(feature = "bitcask", feature = "fjall", feature = "sled"))]
pub(crate) fn store_path(dir: &std::path::Path, name: &str) -> std::path::PathBuf {
    dir.join(format!("{name}.db"))
}
