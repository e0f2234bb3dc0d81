use std::ops::Bound;

use crate::error::{Error, Result};

/// Ordered records produced by a backend for a single scan.
pub type RecordSource = Box<dyn Iterator<Item = Result<(Vec<u8>, Vec<u8>)>>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Forward,
    Reverse,
}

/// A half-open key range `[start, end)`. `None` leaves that side unbounded.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct KeyRange {
    start: Option<Vec<u8>>,
    end: Option<Vec<u8>>,
}

impl KeyRange {
    /// An empty bound is ambiguous with "no bound" and is rejected.
    pub fn new(start: Option<&[u8]>, end: Option<&[u8]>) -> Result<Self> {
        if start.is_some_and(<[u8]>::is_empty) || end.is_some_and(<[u8]>::is_empty) {
            return Err(Error::InvalidKey);
        }

        Ok(Self {
            start: start.map(<[u8]>::to_vec),
            end: end.map(<[u8]>::to_vec),
        })
    }

    pub fn start(&self) -> Option<&[u8]> {
        self.start.as_deref()
    }

    pub fn end(&self) -> Option<&[u8]> {
        self.end.as_deref()
    }

    /// True when no key can fall in the range. Engines such as `BTreeMap` panic on inverted
    /// bounds, so backends check this before building their native range.
    pub fn is_empty(&self) -> bool {
        matches!((&self.start, &self.end), (Some(start), Some(end)) if start >= end)
    }

    pub fn contains(&self, key: &[u8]) -> bool {
        let after_start = self.start.as_deref().map_or(true, |start| key >= start);
        let before_end = self.end.as_deref().map_or(true, |end| key < end);
        after_start && before_end
    }

    /// Borrowed bounds, usable with `BTreeMap::range`.
    pub fn as_bounds(&self) -> (Bound<&[u8]>, Bound<&[u8]>) {
        let start = self.start.as_deref().map_or(Bound::Unbounded, Bound::Included);
        let end = self.end.as_deref().map_or(Bound::Unbounded, Bound::Excluded);
        (start, end)
    }

    /// Owned bounds, for engines whose range functions want `RangeBounds<K: AsRef<[u8]>>`.
    pub fn to_owned_bounds(&self) -> (Bound<Vec<u8>>, Bound<Vec<u8>>) {
        let start = self.start.clone().map_or(Bound::Unbounded, Bound::Included);
        let end = self.end.clone().map_or(Bound::Unbounded, Bound::Excluded);
        (start, end)
    }
}

/// A cursor over an ordered key range.
///
/// A fresh iterator is already positioned on its first record, or exhausted if the range holds
/// none. The typical loop is:
///
/// ```no_run
/// # fn walk(store: &dyn kvdb::Store) -> kvdb::Result<()> {
/// let mut iter = store.iterator(None, None)?;
/// while iter.valid() {
///     println!("{:?} => {:?}", iter.key()?, iter.value()?);
///     iter.next()?;
/// }
/// iter.close()?;
/// # Ok(())
/// # }
/// ```
///
/// An iterator is owned by one caller at a time.
pub trait KvIterator {
    /// The bounds this iterator was created with.
    fn domain(&self) -> (Option<&[u8]>, Option<&[u8]>);

    fn valid(&self) -> bool;

    /// Moves to the following record in iteration order.
    fn next(&mut self) -> Result<()>;

    fn key(&self) -> Result<&[u8]>;

    fn value(&self) -> Result<&[u8]>;

    /// Releases the underlying engine cursor. Safe to call more than once.
    fn close(&mut self) -> Result<()>;
}

enum State {
    Valid { key: Vec<u8>, value: Vec<u8> },
    Exhausted,
    Closed,
}

/// The cursor state machine shared by every backend. Backends only supply the ordered
/// [`RecordSource`]; bound enforcement and state transitions live here.
pub struct RangeIter {
    source: RecordSource,
    range: KeyRange,
    state: State,
}

impl RangeIter {
    /// `source` must already be ordered the way the caller wants to iterate.
    pub fn new(source: RecordSource, range: KeyRange) -> Result<Self> {
        let mut iter = Self {
            source,
            range,
            state: State::Exhausted,
        };
        iter.advance()?;
        Ok(iter)
    }

    fn advance(&mut self) -> Result<()> {
        self.state = match self.source.next() {
            Some(Ok((key, value))) if self.range.contains(&key) => State::Valid { key, value },
            // an engine handing back an out-of-range key means its scan is over
            Some(Ok(_)) | None => State::Exhausted,
            Some(Err(e)) => {
                self.state = State::Exhausted;
                return Err(e);
            }
        };
        Ok(())
    }
}

impl KvIterator for RangeIter {
    fn domain(&self) -> (Option<&[u8]>, Option<&[u8]>) {
        (self.range.start(), self.range.end())
    }

    fn valid(&self) -> bool {
        matches!(self.state, State::Valid { .. })
    }

    fn next(&mut self) -> Result<()> {
        match self.state {
            State::Valid { .. } => self.advance(),
            State::Exhausted => Err(Error::InvalidIteratorState),
            State::Closed => Err(Error::IteratorClosed),
        }
    }

    fn key(&self) -> Result<&[u8]> {
        match &self.state {
            State::Valid { key, .. } => Ok(key),
            State::Exhausted => Err(Error::InvalidIteratorState),
            State::Closed => Err(Error::IteratorClosed),
        }
    }

    fn value(&self) -> Result<&[u8]> {
        match &self.state {
            State::Valid { value, .. } => Ok(value),
            State::Exhausted => Err(Error::InvalidIteratorState),
            State::Closed => Err(Error::IteratorClosed),
        }
    }

    fn close(&mut self) -> Result<()> {
        if !matches!(self.state, State::Closed) {
            self.source = Box::new(std::iter::empty());
            self.state = State::Closed;
        }
        Ok(())
    }
}
