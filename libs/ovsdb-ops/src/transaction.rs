//! Batches of operations and the positional results a device returns.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value as Json;
use tracing::{debug, trace};

use crate::error::{DeviceError, TransactError, TransportError};
use crate::operation::{Comment, Operation, Select};
use crate::result::OperationResult;
use crate::schema::DatabaseSchema;
use crate::value::Row;

/// Anything able to deliver a batch to a device.
///
/// On success the returned list is the device's raw reply: one entry per
/// operation, possibly followed by one commit error. Implementations must
/// fail with a [`TransportError`] rather than hang once the session is gone.
#[async_trait]
pub trait Transact: Send + Sync {
    /// Sends `operations` as one transaction on the database of `schema`.
    async fn transact(
        &self,
        schema: &DatabaseSchema,
        operations: Vec<Operation>,
    ) -> Result<Vec<OperationResult>, TransportError>;
}

#[async_trait]
impl<T: Transact + ?Sized> Transact for Arc<T> {
    async fn transact(
        &self,
        schema: &DatabaseSchema,
        operations: Vec<Operation>,
    ) -> Result<Vec<OperationResult>, TransportError> {
        (**self).transact(schema, operations).await
    }
}

/// An ordered, append-only batch of operations against one database.
#[derive(Debug, Clone)]
pub struct TransactionBuilder {
    schema: Arc<DatabaseSchema>,
    operations: Vec<Operation>,
}

impl TransactionBuilder {
    /// empty batch against `schema`
    pub fn new(schema: Arc<DatabaseSchema>) -> Self {
        Self {
            schema,
            operations: Vec::new(),
        }
    }

    /// schema operations are validated against
    pub fn schema(&self) -> &Arc<DatabaseSchema> {
        &self.schema
    }

    /// Appends an operation and returns its index in the batch.
    pub fn add(&mut self, operation: impl Into<Operation>) -> usize {
        self.operations.push(operation.into());
        self.operations.len() - 1
    }

    /// operations in submission order
    pub fn operations(&self) -> &[Operation] {
        &self.operations
    }

    /// number of operations
    pub fn len(&self) -> usize {
        self.operations.len()
    }

    /// nothing to submit
    pub fn is_empty(&self) -> bool {
        self.operations.is_empty()
    }

    /// `transact` request parameters: the database name followed by every
    /// operation object.
    pub fn to_params(&self) -> Json {
        let mut params = Vec::with_capacity(self.operations.len() + 1);
        params.push(Json::String(self.schema.name().to_owned()));
        params.extend(self.operations.iter().map(Operation::to_json));
        Json::Array(params)
    }

    /// Delivers the batch and aligns the reply with the submitted operations.
    ///
    /// The builder is consumed: a submitted batch cannot be extended.
    pub async fn submit<T: Transact + ?Sized>(
        self,
        target: &T,
    ) -> Result<TransactionResults, TransportError> {
        let names: Vec<&'static str> = self.operations.iter().map(Operation::name).collect();
        trace!(operations = ?names, database = self.schema.name(), "submitting transaction");
        let raw = target.transact(&self.schema, self.operations).await?;
        let results = TransactionResults::align(names, raw)?;
        debug!(
            operations = results.len(),
            failed = ?results.first_error().map(|(index, _)| index),
            commit_error = results.commit_error().is_some(),
            "transaction completed"
        );
        Ok(results)
    }
}

/// Per-operation outcomes, index-aligned with the submitted batch.
#[derive(Debug, Clone, PartialEq)]
pub struct TransactionResults {
    names: Vec<&'static str>,
    results: Vec<OperationResult>,
    commit_error: Option<DeviceError>,
}

impl TransactionResults {
    fn align(
        names: Vec<&'static str>,
        mut raw: Vec<OperationResult>,
    ) -> Result<Self, TransportError> {
        let expected = names.len();
        let mut commit_error = None;

        if raw.len() == expected + 1 {
            match raw.pop() {
                Some(OperationResult::Error(err)) => commit_error = Some(err),
                other => {
                    return Err(TransportError::Protocol(format!(
                        "unexpected trailing result {other:?}"
                    )));
                }
            }
        } else if raw.len() > expected {
            return Err(TransportError::Protocol(format!(
                "{} results for {expected} operations",
                raw.len()
            )));
        } else if raw.len() < expected {
            if !raw.iter().any(OperationResult::is_error) {
                return Err(TransportError::Protocol(format!(
                    "{} results for {expected} operations and no error",
                    raw.len()
                )));
            }
            raw.resize(expected, OperationResult::NotExecuted);
        }

        // nothing after a failed operation ran
        if let Some(failed) = raw.iter().position(OperationResult::is_error) {
            for result in &mut raw[failed + 1..] {
                *result = OperationResult::NotExecuted;
            }
        }

        Ok(Self {
            names,
            results: raw,
            commit_error,
        })
    }

    /// one result per submitted operation
    pub fn results(&self) -> &[OperationResult] {
        &self.results
    }

    /// owned form of [`results`](Self::results)
    pub fn into_results(self) -> Vec<OperationResult> {
        self.results
    }

    /// result of the operation at `index`
    pub fn get(&self, index: usize) -> Option<&OperationResult> {
        self.results.get(index)
    }

    /// equals the submitted batch length
    pub fn len(&self) -> usize {
        self.results.len()
    }

    /// the batch was empty
    pub fn is_empty(&self) -> bool {
        self.results.is_empty()
    }

    /// Rows returned by the operation at `index`, empty if it was not a select.
    pub fn rows(&self, index: usize) -> &[Row] {
        self.get(index)
            .and_then(OperationResult::rows)
            .unwrap_or_default()
    }

    /// Index and error of the first failed operation.
    pub fn first_error(&self) -> Option<(usize, &DeviceError)> {
        self.results
            .iter()
            .enumerate()
            .find_map(|(index, result)| result.error().map(|err| (index, err)))
    }

    /// Error reported after all operations succeeded.
    pub fn commit_error(&self) -> Option<&DeviceError> {
        self.commit_error.as_ref()
    }

    /// Turns the first per-operation or commit error into a [`TransactError`].
    pub fn check(self) -> Result<Self, TransactError> {
        if let Some((index, err)) = self.first_error() {
            return Err(TransactError::Device {
                index,
                op: self.names[index],
                source: err.clone(),
            });
        }
        if let Some(err) = self.commit_error {
            return Err(TransactError::Commit(err));
        }
        Ok(self)
    }
}

/// Reads the first row of `table`, selecting every column and tagging the
/// batch with `comment` for the device log.
///
/// An empty table is `Ok(None)`.
pub async fn select_singleton_row<T: Transact + ?Sized>(
    target: &T,
    schema: Arc<DatabaseSchema>,
    table: &str,
    comment: &str,
) -> Result<Option<Row>, TransactError> {
    let select = Select::new(schema.table(table)?).all_columns();
    let mut tx = TransactionBuilder::new(schema);
    let index = tx.add(select);
    tx.add(Comment::new(comment));

    let results = tx.submit(target).await?.check()?;
    Ok(results.rows(index).first().cloned())
}
