//! A uniform key-value store contract over interchangeable storage engines.
//!
//! Engines are selected by name through the [`Registry`](storage::Registry). Which engines are
//! available depends on the enabled cargo features: `memdb` is always present, `bitcask` is on by
//! default, `fjall` and `sled` are opt-in.
//!
//! ```no_run
//! use kvdb::{new_store, BackendType};
//!
//! # fn main() -> kvdb::Result<()> {
//! let store = new_store("state", &BackendType::MEMDB, "/tmp")?;
//! store.set(b"key", Some(b"value"))?;
//! assert_eq!(store.get(b"key")?, Some(b"value".to_vec()));
//! store.close()?;
//! # Ok(())
//! # }
//! ```

pub mod error;
pub mod storage;

pub use error::{Error, Result};
pub use storage::{
    new_store, open_store, BackendType, Batch, BatchOp, Direction, KeyRange, KvIterator,
    Registry, Store, StoreConfig,
};
