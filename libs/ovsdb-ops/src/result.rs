//! Per-operation replies.

use serde_json::Value as Json;
use uuid::Uuid;

use crate::error::{DecodeError, DeviceError};
use crate::value::{Atom, Row, row_from_json};

/// Outcome of one operation in a delivered batch.
#[derive(Debug, Clone, PartialEq)]
pub enum OperationResult {
    /// Rows returned by a select.
    Rows(Vec<Row>),
    /// Number of rows touched by update, mutate or delete.
    Count(u64),
    /// UUID of a row created by insert.
    Uuid(Uuid),
    /// Success with no payload, e.g. a comment.
    Empty,
    /// The device rejected this operation.
    Error(DeviceError),
    /// An earlier operation failed so this one never ran.
    NotExecuted,
}

impl OperationResult {
    /// the device rejected this operation
    pub fn is_error(&self) -> bool {
        matches!(self, OperationResult::Error(_))
    }

    /// error reported for this operation
    pub fn error(&self) -> Option<&DeviceError> {
        match self {
            OperationResult::Error(err) => Some(err),
            _ => None,
        }
    }

    /// rows returned by a select
    pub fn rows(&self) -> Option<&[Row]> {
        match self {
            OperationResult::Rows(rows) => Some(rows),
            _ => None,
        }
    }

    /// rows touched by update, delete or mutate
    pub fn count(&self) -> Option<u64> {
        match self {
            OperationResult::Count(count) => Some(*count),
            _ => None,
        }
    }

    /// uuid assigned by an insert
    pub fn uuid(&self) -> Option<Uuid> {
        match self {
            OperationResult::Uuid(uuid) => Some(*uuid),
            _ => None,
        }
    }

    /// Decodes one element of a transact reply. `null` marks an operation
    /// the device did not execute.
    pub fn from_json(json: &Json) -> Result<Self, DecodeError> {
        let object = match json {
            Json::Null => return Ok(OperationResult::NotExecuted),
            Json::Object(object) => object,
            other => return Err(DecodeError::new("operation result", other.to_string())),
        };

        if let Some(error) = object.get("error") {
            let error = error
                .as_str()
                .ok_or_else(|| DecodeError::new("error", error.to_string()))?;
            let details = object
                .get("details")
                .and_then(Json::as_str)
                .map(str::to_owned);
            return Ok(OperationResult::Error(DeviceError::new(error, details)));
        }
        if let Some(rows) = object.get("rows") {
            let rows = rows
                .as_array()
                .ok_or_else(|| DecodeError::new("rows", rows.to_string()))?;
            return rows
                .iter()
                .map(row_from_json)
                .collect::<Result<Vec<_>, _>>()
                .map(OperationResult::Rows);
        }
        if let Some(count) = object.get("count") {
            return count
                .as_u64()
                .map(OperationResult::Count)
                .ok_or_else(|| DecodeError::new("count", count.to_string()));
        }
        if let Some(uuid) = object.get("uuid") {
            return match Atom::from_json(uuid)? {
                Atom::Uuid(uuid) => Ok(OperationResult::Uuid(uuid)),
                other => Err(DecodeError::new("uuid", other.to_string())),
            };
        }
        Ok(OperationResult::Empty)
    }
}
