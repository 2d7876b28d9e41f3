//! Error types for building and submitting operations.
//!
//! The split follows where a failure is detected: [`ConstructionError`] is
//! raised while an operation is being built and never reaches the device,
//! [`TransportError`] means a whole batch could not be delivered, and
//! [`DeviceError`] is an individual operation rejected inside a delivered batch.

use thiserror::Error;

/// A value, condition or mutation was rejected against the device schema.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ConstructionError {
    /// The database schema has no table with this name.
    #[error("unknown table '{0}'")]
    UnknownTable(String),

    /// The table schema has no column with this name.
    #[error("table '{table}' has no column '{column}'")]
    UnknownColumn {
        /// table searched
        table: String,
        /// missing column
        column: String,
    },

    /// Atom type does not match the column's declared type.
    #[error("column '{column}' expects {expected}, got {actual}")]
    TypeMismatch {
        /// offending column
        column: String,
        /// declared atomic type
        expected: String,
        /// type of the given atom
        actual: String,
    },

    /// Number of atoms (or pairs) is outside the column's min/max.
    #[error("column '{column}' holds {min}..{max} values, got {actual}")]
    Cardinality {
        /// offending column
        column: String,
        /// fewest values allowed
        min: usize,
        /// most values allowed, `unlimited` when unbounded
        max: String,
        /// values given
        actual: usize,
    },

    /// Atom is of the right type but violates an enum or range constraint.
    #[error("value {value} violates the constraint on column '{column}': {constraint}")]
    Constraint {
        /// offending column
        column: String,
        /// rejected atom
        value: String,
        /// the enum or range it fell outside of
        constraint: String,
    },

    /// Column cannot be written after insertion.
    #[error("column '{0}' is immutable")]
    ImmutableColumn(String),

    /// Mutator does not apply to the column's type.
    #[error("mutator '{mutator}' cannot be applied to column '{column}'")]
    InvalidMutator {
        /// offending column
        column: String,
        /// mutator wire name
        mutator: &'static str,
    },

    /// Condition function does not apply to the column's type.
    #[error("function '{function}' cannot be applied to column '{column}'")]
    InvalidFunction {
        /// offending column
        column: String,
        /// function wire name
        function: &'static str,
    },
}

/// The batch could not be delivered, or no usable reply came back.
///
/// No per-operation results exist when this is returned.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    /// There is no live session with the device.
    #[error("not connected: {0}")]
    NotConnected(String),

    /// The session dropped while the request was in flight.
    #[error("connection lost: {0}")]
    ConnectionLost(String),

    /// The device refused the request as a whole.
    #[error("request rejected: {0}")]
    Rejected(String),

    /// The reply could not be matched to the submitted batch.
    #[error("protocol error: {0}")]
    Protocol(String),
}

impl TransportError {
    /// Returns true when the session itself is gone and the caller should wait
    /// for the next connect event rather than resubmit.
    pub fn is_connection_loss(&self) -> bool {
        matches!(
            self,
            TransportError::NotConnected(_) | TransportError::ConnectionLost(_)
        )
    }
}

/// Error reported by the device for one operation of a delivered batch.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{error}{}", .details.as_deref().map(|d| format!(": {d}")).unwrap_or_default())]
pub struct DeviceError {
    /// Short error tag, e.g. `constraint violation`.
    pub error: String,
    /// Optional free-form explanation.
    pub details: Option<String>,
}

impl DeviceError {
    /// device error with an optional explanation
    pub fn new(error: impl Into<String>, details: Option<String>) -> Self {
        Self {
            error: error.into(),
            details,
        }
    }
}

/// JSON in OVSDB notation could not be decoded.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("malformed {what}: {detail}")]
pub struct DecodeError {
    /// kind of value being decoded
    pub what: &'static str,
    /// what was wrong with it
    pub detail: String,
}

impl DecodeError {
    pub(crate) fn new(what: &'static str, detail: impl Into<String>) -> Self {
        Self {
            what,
            detail: detail.into(),
        }
    }
}

impl From<DecodeError> for TransportError {
    fn from(err: DecodeError) -> Self {
        TransportError::Protocol(err.to_string())
    }
}

/// Any failure on the path from building a batch to reading its results.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum TransactError {
    /// the batch was never sent
    #[error(transparent)]
    Construction(#[from] ConstructionError),

    /// the batch was sent but no results came back
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// Operation `index` failed on the device; later operations did not run.
    #[error("operation {index} ({op}) failed: {source}")]
    Device {
        /// position in the batch
        index: usize,
        /// operation name
        op: &'static str,
        /// reported error
        source: DeviceError,
    },

    /// Every operation succeeded but the device could not commit the batch.
    #[error("commit failed: {0}")]
    Commit(DeviceError),
}

impl TransactError {
    /// Returns the device error carried by this failure, if any.
    pub fn device_error(&self) -> Option<&DeviceError> {
        match self {
            TransactError::Device { source, .. } => Some(source),
            TransactError::Commit(err) => Some(err),
            _ => None,
        }
    }
}
