//! Column mutations applied by `mutate` operations.

use serde_json::{Value as Json, json};

use crate::value::Value;

/// How a mutation combines its argument with the stored value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Mutator {
    /// `+=`
    Sum,
    /// `-=`
    Difference,
    /// `*=`
    Product,
    /// `/=`, integer division on integers
    Quotient,
    /// `%=`, integers only
    Remainder,
    /// Add elements to a set or pairs to a map.
    Insert,
    /// Remove elements from a set, or keys/pairs from a map.
    Delete,
}

impl Mutator {
    /// wire name
    pub fn as_str(&self) -> &'static str {
        match self {
            Mutator::Sum => "+=",
            Mutator::Difference => "-=",
            Mutator::Product => "*=",
            Mutator::Quotient => "/=",
            Mutator::Remainder => "%=",
            Mutator::Insert => "insert",
            Mutator::Delete => "delete",
        }
    }

    /// applies element-wise to numeric columns
    pub fn is_arithmetic(&self) -> bool {
        !matches!(self, Mutator::Insert | Mutator::Delete)
    }
}

/// A validated, normalized mutation. Only built through
/// [`Mutate::add_mutation`](crate::operation::Mutate::add_mutation).
#[derive(Debug, Clone, PartialEq)]
pub struct Mutation {
    pub(crate) column: String,
    pub(crate) mutator: Mutator,
    pub(crate) value: Value,
}

impl Mutation {
    /// mutated column
    pub fn column(&self) -> &str {
        &self.column
    }

    /// how the argument is combined
    pub fn mutator(&self) -> Mutator {
        self.mutator
    }

    /// normalized argument
    pub fn value(&self) -> &Value {
        &self.value
    }

    /// `[column, mutator, value]`
    pub fn to_json(&self) -> Json {
        json!([self.column, self.mutator.as_str(), self.value.to_json()])
    }
}
