pub mod batch;
pub mod config;
pub mod engine;
pub mod iter;
pub mod metrics;
pub mod registry;
pub mod store;

pub use self::batch::{Batch, BatchOp, BatchWriter, BufferedBatch};
pub use self::config::{open_store, StoreConfig};
pub use self::iter::{Direction, KeyRange, KvIterator, RangeIter, RecordSource};
pub use self::metrics::{InstrumentedStore, LatencySink, LogSink, Operation};
pub use self::registry::{global, new_store, BackendType, Constructor, Registry};
pub use self::store::{validate_key, validate_value, Store};
