//! Canonical error type for the pool-aware SQLite runtime.
//!
//! Mirrors the error kinds in the design spec's "Error handling design"
//! section as a closed `thiserror` sum, with `#[from]` conversions for the
//! native and I/O errors the crate actually encounters.

use std::io;
use thiserror::Error;

/// Canonical error type returned by every fallible operation in this crate.
#[derive(Error, Debug)]
pub enum Error {
    /// The pool or `DataSource` was closed (or a wait was interrupted).
    #[error("cancelled: {0}")]
    Cancelled(String),

    /// A blocking wait exceeded its budget.
    #[error("timeout waiting for {0}")]
    Timeout(String),

    /// A non-blocking borrow found no object available.
    #[error("pool capacity exhausted")]
    CapacityExhausted,

    /// `ObjectFactory::make_primary`/`make_object` failed.
    #[error("object factory failed: {0}")]
    Factory(#[source] Box<Error>),

    /// A non-OK SQLite return code, with the native and extended codes preserved.
    #[error("sqlite error ({code}/{extended_code}): {message}")]
    Native {
        code: i32,
        extended_code: i32,
        message: String,
    },

    /// SQLite error surfaced by `rusqlite` directly (auto-converts).
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// I/O error reading a key file or database path (auto-converts).
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// `DataSource`/`PoolConfig` constructor validation failed.
    #[error("invalid configuration for {field}: {reason}")]
    InvalidConfiguration { field: &'static str, reason: String },

    /// A caller misused the connection API (bad parameter binding, etc).
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// Operation attempted on an already-closed resource.
    #[error("already closed")]
    AlreadyClosed,

    /// An aggregate operation (e.g. closing every cached `DataSource`) hit
    /// more than one failure. `primary` is the first; the rest are attached
    /// as suppressed causes rather than discarded.
    #[error("{primary}{}", suppressed_suffix(suppressed))]
    Multiple {
        primary: Box<Error>,
        suppressed: Vec<Error>,
    },
}

fn suppressed_suffix(suppressed: &[Error]) -> String {
    if suppressed.is_empty() {
        String::new()
    } else {
        format!(" ({} suppressed)", suppressed.len())
    }
}

impl Error {
    /// Maps a raw SQLite result code (and optional extended code) to a [`Native`](Error::Native) error.
    #[must_use]
    pub fn from_native_code(code: i32, extended_code: i32, message: impl Into<String>) -> Self {
        Error::Native {
            code,
            extended_code,
            message: message.into(),
        }
    }

    /// True if this error represents the pool/datasource having been cancelled.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Error::Cancelled(_))
    }

    /// Folds a batch of per-item failures from an aggregate operation (e.g.
    /// closing every cached `DataSource`) into a single error: the first
    /// failure becomes the primary, the rest are attached as suppressed
    /// causes. Returns `None` if `errors` is empty.
    #[must_use]
    pub fn aggregate(mut errors: Vec<Error>) -> Option<Error> {
        if errors.is_empty() {
            return None;
        }
        let primary = errors.remove(0);
        if errors.is_empty() {
            Some(primary)
        } else {
            Some(Error::Multiple {
                primary: Box::new(primary),
                suppressed: errors,
            })
        }
    }
}

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cancelled_display() {
        let err = Error::Cancelled("pool closed".to_string());
        assert_eq!(format!("{err}"), "cancelled: pool closed");
        assert!(err.is_cancelled());
    }

    #[test]
    fn native_code_display() {
        let err = Error::from_native_code(1, 1555, "UNIQUE constraint failed");
        assert_eq!(
            format!("{err}"),
            "sqlite error (1/1555): UNIQUE constraint failed"
        );
    }

    #[test]
    fn aggregate_of_no_errors_is_none() {
        assert!(Error::aggregate(Vec::new()).is_none());
    }

    #[test]
    fn aggregate_of_one_error_is_returned_unwrapped() {
        let err = Error::aggregate(vec![Error::AlreadyClosed]).unwrap();
        assert!(matches!(err, Error::AlreadyClosed));
    }

    #[test]
    fn aggregate_of_many_errors_keeps_first_as_primary_and_rest_as_suppressed() {
        let err = Error::aggregate(vec![
            Error::AlreadyClosed,
            Error::CapacityExhausted,
            Error::Cancelled("x".to_string()),
        ])
        .unwrap();
        match err {
            Error::Multiple { primary, suppressed } => {
                assert!(matches!(*primary, Error::AlreadyClosed));
                assert_eq!(suppressed.len(), 2);
            }
            other => panic!("expected Multiple, got {other:?}"),
        }
    }

    #[test]
    fn invalid_configuration_display() {
        let err = Error::InvalidConfiguration {
            field: "poolSize",
            reason: "must be > 0".to_string(),
        };
        assert_eq!(
            format!("{err}"),
            "invalid configuration for poolSize: must be > 0"
        );
    }
}
