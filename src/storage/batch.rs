use std::sync::Arc;

use super::store::{validate_key, validate_value};
use crate::error::{Error, Result};

/// A pending write held by a batch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BatchOp {
    Set { key: Vec<u8>, value: Vec<u8> },
    Delete { key: Vec<u8> },
}

/// A group of writes applied atomically: after [`write`](Batch::write) either every operation
/// is visible or none is. Operations on the same key apply in the order they were added.
///
/// Once written or closed, the batch rejects everything with [`Error::BatchClosed`].
pub trait Batch {
    fn set(&mut self, key: &[u8], value: Option<&[u8]>) -> Result<()>;

    fn delete(&mut self, key: &[u8]) -> Result<()>;

    fn write(&mut self) -> Result<()>;

    /// Like [`write`](Batch::write), and the whole batch is on stable storage before this
    /// returns.
    fn write_sync(&mut self) -> Result<()>;

    /// Discards the batch. Safe to call more than once.
    fn close(&mut self) -> Result<()>;

    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// The engine side of a batch: applies a list of operations as one atomic unit.
pub trait BatchWriter: Send + Sync {
    fn write_ops(&self, ops: &[BatchOp], sync: bool) -> Result<()>;
}

/// A [`Batch`] that buffers operations in memory and hands them to its store's
/// [`BatchWriter`] on write.
pub struct BufferedBatch<W: BatchWriter + ?Sized> {
    writer: Arc<W>,
    // `None` once written or closed
    ops: Option<Vec<BatchOp>>,
}

impl<W: BatchWriter + ?Sized> BufferedBatch<W> {
    pub fn new(writer: Arc<W>) -> Self {
        Self {
            writer,
            ops: Some(Vec::new()),
        }
    }

    fn ops_mut(&mut self) -> Result<&mut Vec<BatchOp>> {
        self.ops.as_mut().ok_or(Error::BatchClosed)
    }

    /// A failed write leaves the batch open with its operations intact, so it can be retried or
    /// closed by the caller.
    fn commit(&mut self, sync: bool) -> Result<()> {
        let ops = self.ops.as_ref().ok_or(Error::BatchClosed)?;
        if !ops.is_empty() {
            self.writer.write_ops(ops, sync)?;
        }
        self.ops = None;
        Ok(())
    }
}

impl<W: BatchWriter + ?Sized> Batch for BufferedBatch<W> {
    fn set(&mut self, key: &[u8], value: Option<&[u8]>) -> Result<()> {
        let ops = self.ops_mut()?;
        validate_key(key)?;
        let value = validate_value(value)?;
        ops.push(BatchOp::Set {
            key: key.to_vec(),
            value: value.to_vec(),
        });
        Ok(())
    }

    fn delete(&mut self, key: &[u8]) -> Result<()> {
        let ops = self.ops_mut()?;
        validate_key(key)?;
        ops.push(BatchOp::Delete { key: key.to_vec() });
        Ok(())
    }

    fn write(&mut self) -> Result<()> {
        self.commit(false)
    }

    fn write_sync(&mut self) -> Result<()> {
        self.commit(true)
    }

    fn close(&mut self) -> Result<()> {
        self.ops = None;
        Ok(())
    }

    fn len(&self) -> usize {
        self.ops.as_ref().map_or(0, Vec::len)
    }
}
