//! The closed set of operations a transaction can carry.
//!
//! Builders validate every value against the target table before it is
//! stored, so an [`Operation`] that exists is always well-formed for the
//! schema it was built from.

use std::sync::Arc;

use serde_json::{Map, Value as Json, json};

use crate::condition::{Condition, Function};
use crate::error::ConstructionError;
use crate::mutation::{Mutation, Mutator};
use crate::schema::{TableSchema, UUID_COLUMN, VERSION_COLUMN};
use crate::value::{Row, Value, row_to_json};

/// One protocol operation.
#[derive(Debug, Clone, PartialEq)]
pub enum Operation {
    /// `select`
    Select(Select),
    /// `insert`
    Insert(Insert),
    /// `update`
    Update(Update),
    /// `delete`
    Delete(Delete),
    /// `mutate`
    Mutate(Mutate),
    /// `comment`
    Comment(Comment),
}

impl Operation {
    /// Protocol name of the operation.
    pub fn name(&self) -> &'static str {
        match self {
            Operation::Select(_) => "select",
            Operation::Insert(_) => "insert",
            Operation::Update(_) => "update",
            Operation::Delete(_) => "delete",
            Operation::Mutate(_) => "mutate",
            Operation::Comment(_) => "comment",
        }
    }

    /// Target table, `None` for comments.
    pub fn table(&self) -> Option<&str> {
        match self {
            Operation::Select(op) => Some(op.table.name()),
            Operation::Insert(op) => Some(op.table.name()),
            Operation::Update(op) => Some(op.table.name()),
            Operation::Delete(op) => Some(op.table.name()),
            Operation::Mutate(op) => Some(op.table.name()),
            Operation::Comment(_) => None,
        }
    }

    /// Conditions of a conditional operation.
    pub fn conditions(&self) -> &[Condition] {
        match self {
            Operation::Select(op) => &op.conditions,
            Operation::Update(op) => &op.conditions,
            Operation::Delete(op) => &op.conditions,
            Operation::Mutate(op) => &op.conditions,
            Operation::Insert(_) | Operation::Comment(_) => &[],
        }
    }

    /// Encodes the operation as an RFC 7047 operation object.
    pub fn to_json(&self) -> Json {
        let mut object = Map::new();
        object.insert("op".into(), json!(self.name()));
        if let Some(table) = self.table() {
            object.insert("table".into(), json!(table));
        }
        if !matches!(self, Operation::Insert(_) | Operation::Comment(_)) {
            object.insert("where".into(), conditions_json(self.conditions()));
        }
        match self {
            Operation::Select(op) => {
                object.insert("columns".into(), json!(op.columns));
            }
            Operation::Insert(op) => {
                object.insert("row".into(), row_to_json(&op.row));
                if let Some(name) = &op.uuid_name {
                    object.insert("uuid-name".into(), json!(name));
                }
            }
            Operation::Update(op) => {
                object.insert("row".into(), row_to_json(&op.row));
            }
            Operation::Mutate(op) => {
                object.insert(
                    "mutations".into(),
                    Json::Array(op.mutations.iter().map(Mutation::to_json).collect()),
                );
            }
            Operation::Delete(_) => {}
            Operation::Comment(op) => {
                object.insert("comment".into(), json!(op.text));
            }
        }
        Json::Object(object)
    }
}

fn conditions_json(conditions: &[Condition]) -> Json {
    Json::Array(conditions.iter().map(Condition::to_json).collect())
}

/// Validates `value` for `column` of `table` and stores it in `row`.
fn set_column(
    table: &TableSchema,
    row: &mut Row,
    column: &str,
    value: Value,
    allow_immutable: bool,
) -> Result<(), ConstructionError> {
    let schema = table.column(column)?;
    let system = column == UUID_COLUMN || column == VERSION_COLUMN;
    if system || (!allow_immutable && !schema.is_mutable()) {
        return Err(ConstructionError::ImmutableColumn(column.to_owned()));
    }
    row.insert(column.to_owned(), schema.validate(value)?);
    Ok(())
}

macro_rules! conditional {
    ($op:ident) => {
        impl $op {
            /// Adds a condition; conditions are ANDed.
            pub fn add_condition(&mut self, condition: Condition) {
                self.conditions.push(condition);
            }

            /// Builder form of [`add_condition`](Self::add_condition).
            pub fn and_where(mut self, condition: Condition) -> Self {
                self.conditions.push(condition);
                self
            }

            /// Builds a condition on a column of this operation's table and adds it.
            pub fn where_column(
                self,
                column: &str,
                function: Function,
                value: impl Into<Value>,
            ) -> Result<Self, ConstructionError> {
                let condition = Condition::new(self.table.column(column)?, function, value)?;
                Ok(self.and_where(condition))
            }

            /// conditions added so far
            pub fn conditions(&self) -> &[Condition] {
                &self.conditions
            }

            /// target table
            pub fn table(&self) -> &Arc<TableSchema> {
                &self.table
            }
        }

        impl From<$op> for Operation {
            fn from(op: $op) -> Self {
                Operation::$op(op)
            }
        }
    };
}

/// Reads rows.
#[derive(Debug, Clone, PartialEq)]
pub struct Select {
    table: Arc<TableSchema>,
    columns: Vec<String>,
    conditions: Vec<Condition>,
}

conditional!(Select);

impl Select {
    /// Selects no columns yet; see [`column`](Self::column) and
    /// [`all_columns`](Self::all_columns).
    pub fn new(table: Arc<TableSchema>) -> Self {
        Self {
            table,
            columns: Vec::new(),
            conditions: Vec::new(),
        }
    }

    /// Adds `column` to the projection. Fails for unknown columns.
    pub fn column(mut self, column: &str) -> Result<Self, ConstructionError> {
        self.table.column(column)?;
        self.columns.push(column.to_owned());
        Ok(self)
    }

    /// Projects every column the table declares.
    pub fn all_columns(mut self) -> Self {
        self.columns = self.table.column_names();
        self
    }

    /// projected columns, in request order
    pub fn columns(&self) -> &[String] {
        &self.columns
    }
}

/// Adds a row.
#[derive(Debug, Clone, PartialEq)]
pub struct Insert {
    table: Arc<TableSchema>,
    row: Row,
    uuid_name: Option<String>,
}

impl Insert {
    /// empty row for `table`
    pub fn new(table: Arc<TableSchema>) -> Self {
        Self {
            table,
            row: Row::new(),
            uuid_name: None,
        }
    }

    /// Sets a column of the new row. Immutable columns may be set on insert.
    pub fn value(mut self, column: &str, value: impl Into<Value>) -> Result<Self, ConstructionError> {
        set_column(&self.table, &mut self.row, column, value.into(), true)?;
        Ok(self)
    }

    /// Names the new row so later operations of the batch can reference it.
    pub fn with_uuid_name(mut self, name: impl Into<String>) -> Self {
        self.uuid_name = Some(name.into());
        self
    }

    /// columns set so far
    pub fn row(&self) -> &Row {
        &self.row
    }

    /// batch-local name of the new row
    pub fn uuid_name(&self) -> Option<&str> {
        self.uuid_name.as_deref()
    }

    /// target table
    pub fn table(&self) -> &Arc<TableSchema> {
        &self.table
    }
}

impl From<Insert> for Operation {
    fn from(op: Insert) -> Self {
        Operation::Insert(op)
    }
}

/// Overwrites columns of matching rows.
#[derive(Debug, Clone, PartialEq)]
pub struct Update {
    table: Arc<TableSchema>,
    row: Row,
    conditions: Vec<Condition>,
}

conditional!(Update);

impl Update {
    /// update of `table` with no columns and no conditions
    pub fn new(table: Arc<TableSchema>) -> Self {
        Self {
            table,
            row: Row::new(),
            conditions: Vec::new(),
        }
    }

    /// Sets a column on the matching rows. Immutable columns are refused.
    pub fn value(mut self, column: &str, value: impl Into<Value>) -> Result<Self, ConstructionError> {
        set_column(&self.table, &mut self.row, column, value.into(), false)?;
        Ok(self)
    }

    /// columns to overwrite
    pub fn row(&self) -> &Row {
        &self.row
    }
}

/// Removes matching rows.
#[derive(Debug, Clone, PartialEq)]
pub struct Delete {
    table: Arc<TableSchema>,
    conditions: Vec<Condition>,
}

conditional!(Delete);

impl Delete {
    /// Without a condition every row of `table` is deleted.
    pub fn new(table: Arc<TableSchema>) -> Self {
        Self {
            table,
            conditions: Vec::new(),
        }
    }
}

/// Applies mutations to matching rows.
///
/// With no condition the mutations apply to every row of the table.
#[derive(Debug, Clone, PartialEq)]
pub struct Mutate {
    table: Arc<TableSchema>,
    mutations: Vec<Mutation>,
    conditions: Vec<Condition>,
}

conditional!(Mutate);

impl Mutate {
    /// mutate on `table`, see [`add_mutation`](Self::add_mutation)
    pub fn new(table: Arc<TableSchema>) -> Self {
        Self {
            table,
            mutations: Vec::new(),
            conditions: Vec::new(),
        }
    }

    /// Validates and normalizes `value` for `column`, then appends the
    /// mutation. On error nothing is appended.
    pub fn add_mutation(
        &mut self,
        column: &str,
        mutator: Mutator,
        value: impl Into<Value>,
    ) -> Result<&mut Self, ConstructionError> {
        let value = self
            .table
            .column(column)?
            .validate_mutation(mutator, value.into())?;
        self.mutations.push(Mutation {
            column: column.to_owned(),
            mutator,
            value,
        });
        Ok(self)
    }

    /// mutations in the order they apply
    pub fn mutations(&self) -> &[Mutation] {
        &self.mutations
    }
}

/// A note recorded in the device's log.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Comment {
    text: String,
}

impl Comment {
    /// comment carrying `text`
    pub fn new(text: impl Into<String>) -> Self {
        Self { text: text.into() }
    }

    /// comment body
    pub fn text(&self) -> &str {
        &self.text
    }
}

impl From<Comment> for Operation {
    fn from(op: Comment) -> Self {
        Operation::Comment(op)
    }
}

#[cfg(test)]
mod tests {
    use uuid::Uuid;

    use super::*;
    use crate::schema::{AtomicType, ColumnSchema, ColumnType};

    fn logical_switch() -> Arc<TableSchema> {
        Arc::new(TableSchema::new(
            "Logical_Switch",
            [
                ColumnSchema::new("name", ColumnType::scalar(AtomicType::String)),
                ColumnSchema::new("tunnel_key", ColumnType::optional(AtomicType::Integer)),
                ColumnSchema::new("other_config", ColumnType::map(AtomicType::String, AtomicType::String)),
                ColumnSchema::new("owner", ColumnType::scalar(AtomicType::String)).immutable(),
            ],
        ))
    }

    #[test]
    fn test_rejected_mutation_is_not_appended() {
        let mut mutate = Mutate::new(logical_switch());
        mutate
            .add_mutation("tunnel_key", Mutator::Sum, 1i64)
            .unwrap()
            .add_mutation("other_config", Mutator::Insert, Value::map([("k", "v")]))
            .unwrap();
        assert_eq!(mutate.mutations().len(), 2);

        let err = mutate
            .add_mutation("tunnel_key", Mutator::Sum, "one")
            .unwrap_err();
        assert!(matches!(err, ConstructionError::TypeMismatch { .. }));
        assert_eq!(mutate.mutations().len(), 2);

        assert!(mutate.add_mutation("missing", Mutator::Sum, 1i64).is_err());
        assert_eq!(mutate.mutations().len(), 2);
    }

    #[test]
    fn test_mutate_without_condition_targets_every_row() {
        let mut mutate = Mutate::new(logical_switch());
        mutate.add_mutation("tunnel_key", Mutator::Sum, 1i64).unwrap();
        assert!(mutate.conditions().is_empty());

        let json = Operation::from(mutate).to_json();
        assert_eq!(json["where"], serde_json::json!([]));
        assert_eq!(json["mutations"], serde_json::json!([["tunnel_key", "+=", 1]]));
    }

    #[test]
    fn test_conditions_are_anded() {
        let mut mutate = Mutate::new(logical_switch())
            .where_column("name", Function::Equals, "ls0")
            .unwrap();
        let table = mutate.table().clone();
        mutate.add_condition(
            Condition::new(table.column("tunnel_key").unwrap(), Function::GreaterThan, 10i64).unwrap(),
        );
        assert_eq!(mutate.conditions().len(), 2);
        assert_eq!(
            Operation::from(mutate).to_json()["where"],
            serde_json::json!([["name", "==", "ls0"], ["tunnel_key", ">", 10]])
        );
    }

    #[test]
    fn test_insert_and_update_validation() {
        let insert = Insert::new(logical_switch())
            .value("name", "ls0")
            .unwrap()
            .value("owner", "controller-1")
            .unwrap()
            .with_uuid_name("new_ls");
        let json = Operation::from(insert).to_json();
        assert_eq!(json["uuid-name"], "new_ls");
        assert_eq!(json["row"]["owner"], "controller-1");

        assert!(matches!(
            Update::new(logical_switch()).value("owner", "other"),
            Err(ConstructionError::ImmutableColumn(_))
        ));
        assert!(matches!(
            Insert::new(logical_switch()).value(UUID_COLUMN, Uuid::new_v4()),
            Err(ConstructionError::ImmutableColumn(_))
        ));
        assert!(Update::new(logical_switch()).value("tunnel_key", "5000").is_err());
    }

    #[test]
    fn test_select_columns() {
        let select = Select::new(logical_switch()).all_columns();
        assert!(select.columns().iter().any(|c| c == UUID_COLUMN));
        assert!(Select::new(logical_switch()).column("nope").is_err());

        let op = Operation::from(Comment::new("audit"));
        assert_eq!(op.table(), None);
        assert_eq!(op.to_json(), serde_json::json!({"op": "comment", "comment": "audit"}));
    }
}
