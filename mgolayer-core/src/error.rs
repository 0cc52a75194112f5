//! Error types and result types for collection operations.
//!
//! Every fallible operation in this crate returns [`MgoResult<T>`]. Failures raised by the
//! underlying driver are carried through unchanged inside [`MgoError::Driver`], keeping the
//! server code and error labels intact so callers can react to them.

use bson::error::Error as BsonError;
use serde_json::Error as SerdeJsonError;
use thiserror::Error;

/// Label attached by drivers to errors that should cause the whole transaction to be retried.
pub const TRANSIENT_TRANSACTION_ERROR: &str = "TransientTransactionError";

/// Label attached by drivers to commit errors whose outcome is unknown.
pub const UNKNOWN_TRANSACTION_COMMIT_RESULT: &str = "UnknownTransactionCommitResult";

/// Represents all possible errors that can occur when running operations through this layer.
#[derive(Error, Debug, Clone)]
pub enum MgoError {
    /// An operation expecting a matching document found none.
    #[error("No such documents")]
    NoSuchDocuments,
    /// A multi-insert was given an empty sequence of documents.
    #[error("Documents to insert must be a non-empty sequence")]
    NotValidSliceToInsert,
    /// The connected server is too old to run multi-document transactions.
    #[error("Transactions are not supported by the connected server")]
    TransactionNotSupported,
    /// Returned from a transaction callback to request that the transaction be run again.
    ///
    /// This is a control signal rather than a failure. It is only meaningful as the return
    /// value of a callback passed to [`Session::start_transaction`](crate::session::Session::start_transaction).
    #[error("Transaction retry requested")]
    TransactionRetry,
    /// The destination of a distinct query is not a sequence.
    #[error("Distinct destination must be a sequence")]
    QueryNotSlicePointer,
    /// The distinct values could not be decoded into the destination's element type.
    #[error("Distinct values are inconsistent with the destination element type")]
    QueryResultTypeInconsistent,
    /// The configured username cannot be used (contains `/` or is not valid percent-encoding).
    #[error("Unsupported username")]
    NotSupportedUsername,
    /// The configured password cannot be used (contains `:` or `/`, or is not valid percent-encoding).
    #[error("Unsupported password")]
    NotSupportedPassword,
    /// Serialization/deserialization error when converting between Rust values and BSON.
    #[error("Serialization error: {0}")]
    Serialization(String),
    /// A lifecycle hook rejected the operation.
    #[error("Hook error: {0}")]
    Hook(String),
    /// The caller's deadline expired before the driver call completed.
    #[error("Operation timed out")]
    Timeout,
    /// Error during driver initialization or connection setup.
    #[error("Initialization error: {0}")]
    Initialization(String),
    /// An error reported by the underlying driver.
    #[error(transparent)]
    Driver(#[from] DriverError),
}

impl MgoError {
    /// Returns `true` if this is a driver error carrying the given label.
    pub fn has_label(&self, label: &str) -> bool {
        match self {
            MgoError::Driver(err) => err.has_label(label),
            _ => false,
        }
    }
}

/// A specialized `Result` type for operations in this crate.
pub type MgoResult<T> = Result<T, MgoError>;

/// A failure reported by a [`Driver`](crate::driver::Driver) implementation.
///
/// Drivers translate their native errors into this shape so that server error codes and
/// labels such as [`TRANSIENT_TRANSACTION_ERROR`] survive the trip through the layer.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{message}")]
pub struct DriverError {
    /// Server error code, when the failure came from the server.
    pub code: Option<i32>,
    /// Human readable description.
    pub message: String,
    /// Error labels attached by the server or the driver.
    pub labels: Vec<String>,
}

impl DriverError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            code: None,
            message: message.into(),
            labels: Vec::new(),
        }
    }

    pub fn with_code(mut self, code: i32) -> Self {
        self.code = Some(code);
        self
    }

    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.labels.push(label.into());
        self
    }

    pub fn has_label(&self, label: &str) -> bool {
        self.labels.iter().any(|l| l == label)
    }
}

impl From<BsonError> for MgoError {
    fn from(err: BsonError) -> Self {
        MgoError::Serialization(err.to_string())
    }
}

impl From<SerdeJsonError> for MgoError {
    fn from(err: SerdeJsonError) -> Self {
        MgoError::Serialization(err.to_string())
    }
}
