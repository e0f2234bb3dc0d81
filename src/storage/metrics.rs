//! Optional latency reporting for point operations.
//!
//! [`InstrumentedStore`] times `get`, `set`, `set_sync`, `delete` and `delete_sync` on any store
//! and forwards each measurement to a [`LatencySink`]. The measurements are a side channel:
//! failing or missing sinks never change what the store returns.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

use super::batch::Batch;
use super::iter::{Direction, KeyRange, KvIterator, RecordSource};
use super::store::Store;
use crate::error::Result;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    Get,
    Set,
    SetSync,
    Delete,
    DeleteSync,
}

impl Operation {
    /// Metric-style name, e.g. `set_sync_duration_ns`.
    pub fn metric_name(&self) -> &'static str {
        match self {
            Operation::Get => "get_duration_ns",
            Operation::Set => "set_duration_ns",
            Operation::SetSync => "set_sync_duration_ns",
            Operation::Delete => "delete_duration_ns",
            Operation::DeleteSync => "delete_sync_duration_ns",
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.metric_name())
    }
}

pub trait LatencySink: Send + Sync {
    fn record(&self, op: Operation, elapsed: Duration);
}

/// Reports every measurement through `log` at trace level.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogSink;

impl LatencySink for LogSink {
    fn record(&self, op: Operation, elapsed: Duration) {
        log::trace!("{op} = {}", elapsed.as_nanos());
    }
}

/// Wraps a store and reports point operation latencies to a sink.
pub struct InstrumentedStore {
    inner: Box<dyn Store>,
    sink: Arc<dyn LatencySink>,
}

impl InstrumentedStore {
    pub fn new(inner: Box<dyn Store>, sink: Arc<dyn LatencySink>) -> Self {
        Self { inner, sink }
    }

    fn timed<T>(&self, op: Operation, f: impl FnOnce() -> T) -> T {
        let start = Instant::now();
        let out = f();
        self.sink.record(op, start.elapsed());
        out
    }
}

impl Store for InstrumentedStore {
    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        self.timed(Operation::Get, || self.inner.get(key))
    }

    fn set(&self, key: &[u8], value: Option<&[u8]>) -> Result<()> {
        self.timed(Operation::Set, || self.inner.set(key, value))
    }

    fn set_sync(&self, key: &[u8], value: Option<&[u8]>) -> Result<()> {
        self.timed(Operation::SetSync, || self.inner.set_sync(key, value))
    }

    fn delete(&self, key: &[u8]) -> Result<()> {
        self.timed(Operation::Delete, || self.inner.delete(key))
    }

    fn delete_sync(&self, key: &[u8]) -> Result<()> {
        self.timed(Operation::DeleteSync, || self.inner.delete_sync(key))
    }

    fn scan(&self, range: &KeyRange, direction: Direction) -> Result<RecordSource> {
        self.inner.scan(range, direction)
    }

    fn iterator(&self, start: Option<&[u8]>, end: Option<&[u8]>) -> Result<Box<dyn KvIterator>> {
        self.inner.iterator(start, end)
    }

    fn reverse_iterator(
        &self,
        start: Option<&[u8]>,
        end: Option<&[u8]>,
    ) -> Result<Box<dyn KvIterator>> {
        self.inner.reverse_iterator(start, end)
    }

    fn new_batch(&self) -> Result<Box<dyn Batch>> {
        self.inner.new_batch()
    }

    fn close(&self) -> Result<()> {
        self.inner.close()
    }

    fn stats(&self) -> HashMap<String, String> {
        self.inner.stats()
    }

    fn print(&self) {
        self.inner.print()
    }
}
