use crate::storage::BackendType;

type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The key is empty, or a range bound was given as an empty slice.
    #[error("key cannot be empty")]
    InvalidKey,

    #[error("value cannot be nil")]
    InvalidValue,

    #[error("store is closed")]
    StoreClosed,

    #[error("iterator is closed")]
    IteratorClosed,

    #[error("iterator is not positioned on a record")]
    InvalidIteratorState,

    #[error("batch has already been written or closed")]
    BatchClosed,

    #[error("unknown backend {name}, expected one of {}", .known.join(","))]
    UnknownBackend { name: String, known: Vec<String> },

    #[error("failed to initialize {backend} store")]
    BackendInitFailed {
        backend: BackendType,
        #[source]
        source: Box<Error>,
    },

    #[error("{backend} {op} failed: {source}")]
    Engine {
        backend: BackendType,
        op: &'static str,
        #[source]
        source: BoxError,
    },
}

impl Error {
    /// Wraps a failure reported by the underlying engine.
    pub fn engine(backend: BackendType, op: &'static str, source: impl Into<BoxError>) -> Self {
        let source = source.into();
        log::error!("{backend} {op} failed: {source}");
        Error::Engine { backend, op, source }
    }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_backend_lists_known_names() {
        let err = Error::UnknownBackend {
            name: "rocksdb".to_string(),
            known: vec!["bitcask".to_string(), "memdb".to_string()],
        };
        assert_eq!(
            err.to_string(),
            "unknown backend rocksdb, expected one of bitcask,memdb"
        );
    }

    #[test]
    fn engine_error_keeps_context() {
        let io = std::io::Error::new(std::io::ErrorKind::Other, "disk on fire");
        let err = Error::engine(BackendType::BITCASK, "set", io);
        assert_eq!(err.to_string(), "bitcask set failed: disk on fire");
        assert!(std::error::Error::source(&err).is_some());
    }
}
