//! `where` clauses.

use serde_json::{Value as Json, json};

use crate::error::ConstructionError;
use crate::schema::ColumnSchema;
use crate::value::Value;

/// Relational function of a condition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Function {
    /// `<`
    LessThan,
    /// `<=`
    LessThanOrEqual,
    /// `==`
    Equals,
    /// `!=`
    NotEquals,
    /// `>=`
    GreaterThanOrEqual,
    /// `>`
    GreaterThan,
    /// every element of the value is in the column
    Includes,
    /// no element of the value is in the column
    Excludes,
}

impl Function {
    /// wire name
    pub fn as_str(&self) -> &'static str {
        match self {
            Function::LessThan => "<",
            Function::LessThanOrEqual => "<=",
            Function::Equals => "==",
            Function::NotEquals => "!=",
            Function::GreaterThanOrEqual => ">=",
            Function::GreaterThan => ">",
            Function::Includes => "includes",
            Function::Excludes => "excludes",
        }
    }

    /// `<`, `<=`, `>=` and `>` only apply to numeric scalars.
    pub fn is_ordering(&self) -> bool {
        matches!(
            self,
            Function::LessThan
                | Function::LessThanOrEqual
                | Function::GreaterThanOrEqual
                | Function::GreaterThan
        )
    }

    /// set functions, valid on any column type
    pub fn is_inclusion(&self) -> bool {
        matches!(self, Function::Includes | Function::Excludes)
    }
}

/// A single validated `column function value` clause. Clauses on one
/// operation are ANDed.
#[derive(Debug, Clone, PartialEq)]
pub struct Condition {
    column: String,
    function: Function,
    value: Value,
}

impl Condition {
    /// Checks `function` and `value` against `column`. Ordering functions
    /// need a numeric scalar column.
    pub fn new(
        column: &ColumnSchema,
        function: Function,
        value: impl Into<Value>,
    ) -> Result<Self, ConstructionError> {
        let value = column.validate_condition(function, value.into())?;
        Ok(Self {
            column: column.name().to_owned(),
            function,
            value,
        })
    }

    /// column name
    pub fn column(&self) -> &str {
        &self.column
    }

    /// relational function
    pub fn function(&self) -> Function {
        self.function
    }

    /// normalized right-hand side
    pub fn value(&self) -> &Value {
        &self.value
    }

    /// `[column, function, value]`
    pub fn to_json(&self) -> Json {
        json!([self.column, self.function.as_str(), self.value.to_json()])
    }
}
