//! Database, table and column schemas as advertised by a device.
//!
//! Every value that goes into an operation is checked here first. A column
//! schema knows its atomic key (and value, for maps) type plus the min/max
//! number of elements, and normalizes accepted values so that what is sent
//! matches what the device declared.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use serde_json::Value as Json;

use crate::condition::Function;
use crate::error::{ConstructionError, DecodeError};
use crate::mutation::Mutator;
use crate::value::{Atom, Value};

/// Row identity column present in every table.
pub const UUID_COLUMN: &str = "_uuid";
/// Row version column present in every table.
pub const VERSION_COLUMN: &str = "_version";

/// Scalar types a column can be built from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AtomicType {
    /// 64-bit signed
    Integer,
    /// IEEE double
    Real,
    /// `true` or `false`
    Boolean,
    /// UTF-8 text
    String,
    /// row reference
    Uuid,
}

impl AtomicType {
    /// name used in schema json
    pub fn name(&self) -> &'static str {
        match self {
            AtomicType::Integer => "integer",
            AtomicType::Real => "real",
            AtomicType::Boolean => "boolean",
            AtomicType::String => "string",
            AtomicType::Uuid => "uuid",
        }
    }

    /// inverse of [`name`](Self::name)
    pub fn from_name(name: &str) -> Option<Self> {
        Some(match name {
            "integer" => AtomicType::Integer,
            "real" => AtomicType::Real,
            "boolean" => AtomicType::Boolean,
            "string" => AtomicType::String,
            "uuid" => AtomicType::Uuid,
            _ => return None,
        })
    }

    fn is_numeric(&self) -> bool {
        matches!(self, AtomicType::Integer | AtomicType::Real)
    }
}

impl fmt::Display for AtomicType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// An atomic type plus its optional constraints.
#[derive(Debug, Clone, PartialEq)]
pub struct BaseType {
    /// scalar type of every atom
    pub atomic: AtomicType,
    /// Allowed values, when the column is an enumeration.
    pub enumeration: Option<Vec<Atom>>,
    /// inclusive lower bound for integers
    pub min_integer: Option<i64>,
    /// inclusive upper bound for integers
    pub max_integer: Option<i64>,
    /// longest string allowed, in characters
    pub max_length: Option<usize>,
    /// Table referenced by a uuid column.
    pub ref_table: Option<String>,
}

impl BaseType {
    /// unconstrained `atomic`
    pub fn new(atomic: AtomicType) -> Self {
        Self {
            atomic,
            enumeration: None,
            min_integer: None,
            max_integer: None,
            max_length: None,
            ref_table: None,
        }
    }

    /// restricts atoms to `values`
    pub fn with_enum<I, A>(mut self, values: I) -> Self
    where
        I: IntoIterator<Item = A>,
        A: Into<Atom>,
    {
        self.enumeration = Some(values.into_iter().map(Into::into).collect());
        self
    }

    /// inclusive integer bounds, `None` for open ends
    pub fn with_integer_range(mut self, min: Option<i64>, max: Option<i64>) -> Self {
        self.min_integer = min;
        self.max_integer = max;
        self
    }

    /// marks a uuid column as a reference into `table`
    pub fn with_ref_table(mut self, table: impl Into<String>) -> Self {
        self.ref_table = Some(table.into());
        self
    }

    /// Checks the atom's type only; a real column takes integers too.
    fn check_type(&self, column: &str, atom: Atom) -> Result<Atom, ConstructionError> {
        match (self.atomic, atom) {
            (AtomicType::Integer, atom @ Atom::Integer(_))
            | (AtomicType::Real, atom @ Atom::Real(_))
            | (AtomicType::Boolean, atom @ Atom::Boolean(_))
            | (AtomicType::String, atom @ Atom::String(_))
            | (AtomicType::Uuid, atom @ (Atom::Uuid(_) | Atom::NamedUuid(_))) => Ok(atom),
            (AtomicType::Real, Atom::Integer(i)) => Ok(Atom::Real(i as f64)),
            (expected, atom) => Err(ConstructionError::TypeMismatch {
                column: column.to_owned(),
                expected: expected.to_string(),
                actual: atom.type_name().to_owned(),
            }),
        }
    }

    /// Checks the atom's type and every declared constraint.
    fn validate(&self, column: &str, atom: Atom) -> Result<Atom, ConstructionError> {
        let atom = self.check_type(column, atom)?;
        let violation = |constraint: String| ConstructionError::Constraint {
            column: column.to_owned(),
            value: atom.to_string(),
            constraint,
        };
        if let Some(allowed) = &self.enumeration {
            if !allowed.contains(&atom) {
                let allowed = allowed.iter().map(Atom::to_string).collect::<Vec<_>>();
                return Err(violation(format!("one of [{}]", allowed.join(", "))));
            }
        }
        if let Atom::Integer(i) = atom {
            if self.min_integer.is_some_and(|min| i < min) || self.max_integer.is_some_and(|max| i > max) {
                return Err(violation(format!(
                    "range {}..={}",
                    self.min_integer.map(|v| v.to_string()).unwrap_or_default(),
                    self.max_integer.map(|v| v.to_string()).unwrap_or_default()
                )));
            }
        }
        if let (Atom::String(s), Some(max)) = (&atom, self.max_length) {
            if s.chars().count() > max {
                return Err(violation(format!("at most {max} characters")));
            }
        }
        Ok(atom)
    }
}

/// Type and cardinality of a column.
#[derive(Debug, Clone, PartialEq)]
pub struct ColumnType {
    /// atom type, or key type for maps
    pub key: BaseType,
    /// Present for map columns.
    pub value: Option<BaseType>,
    /// fewest elements
    pub min: usize,
    /// `None` means unlimited.
    pub max: Option<usize>,
}

impl ColumnType {
    /// Exactly one atom.
    pub fn scalar(atomic: AtomicType) -> Self {
        Self::from_base(BaseType::new(atomic), 1, Some(1))
    }

    /// Zero or one atom.
    pub fn optional(atomic: AtomicType) -> Self {
        Self::from_base(BaseType::new(atomic), 0, Some(1))
    }

    /// Any number of atoms.
    pub fn set(atomic: AtomicType) -> Self {
        Self::from_base(BaseType::new(atomic), 0, None)
    }

    /// Any number of key/value pairs.
    pub fn map(key: AtomicType, value: AtomicType) -> Self {
        Self {
            key: BaseType::new(key),
            value: Some(BaseType::new(value)),
            min: 0,
            max: None,
        }
    }

    /// non-map column of `key` holding `min..=max` atoms
    pub fn from_base(key: BaseType, min: usize, max: Option<usize>) -> Self {
        Self {
            key,
            value: None,
            min,
            max,
        }
    }

    /// has a value type
    pub fn is_map(&self) -> bool {
        self.value.is_some()
    }

    /// A column holding at most one atom.
    pub fn is_single(&self) -> bool {
        !self.is_map() && self.max == Some(1)
    }

    fn max_label(&self) -> String {
        self.max
            .map(|m| m.to_string())
            .unwrap_or_else(|| "unlimited".into())
    }
}

/// One column of a table.
#[derive(Debug, Clone, PartialEq)]
pub struct ColumnSchema {
    name: String,
    column_type: ColumnType,
    mutable: bool,
}

impl ColumnSchema {
    /// mutable column `name`
    pub fn new(name: impl Into<String>, column_type: ColumnType) -> Self {
        Self {
            name: name.into(),
            column_type,
            mutable: true,
        }
    }

    /// Only settable on insert.
    pub fn immutable(mut self) -> Self {
        self.mutable = false;
        self
    }

    /// column name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// declared type
    pub fn column_type(&self) -> &ColumnType {
        &self.column_type
    }

    /// update and mutate may write it
    pub fn is_mutable(&self) -> bool {
        self.mutable
    }

    fn cardinality_error(&self, actual: usize) -> ConstructionError {
        ConstructionError::Cardinality {
            column: self.name.clone(),
            min: self.column_type.min,
            max: self.column_type.max_label(),
            actual,
        }
    }

    fn check_count(&self, count: usize) -> Result<(), ConstructionError> {
        let ty = &self.column_type;
        if count < ty.min || ty.max.is_some_and(|max| count > max) {
            return Err(self.cardinality_error(count));
        }
        Ok(())
    }

    fn atoms(&self, value: Value) -> Result<Vec<Atom>, ConstructionError> {
        match value {
            Value::Atom(atom) => Ok(vec![atom]),
            Value::Set(atoms) => Ok(atoms),
            Value::Map(_) => Err(self.mismatch("set", "map")),
        }
    }

    fn pairs(&self, value: Value) -> Result<Vec<(Atom, Atom)>, ConstructionError> {
        match value {
            Value::Map(pairs) => Ok(pairs),
            Value::Set(atoms) if atoms.is_empty() => Ok(Vec::new()),
            other => Err(self.mismatch("map", other.kind())),
        }
    }

    fn mismatch(&self, expected: &str, actual: &str) -> ConstructionError {
        ConstructionError::TypeMismatch {
            column: self.name.clone(),
            expected: expected.to_owned(),
            actual: actual.to_owned(),
        }
    }

    fn validate_pairs(
        &self,
        pairs: Vec<(Atom, Atom)>,
        value_type: &BaseType,
    ) -> Result<Vec<(Atom, Atom)>, ConstructionError> {
        pairs
            .into_iter()
            .map(|(k, v)| {
                Ok((
                    self.column_type.key.validate(&self.name, k)?,
                    value_type.validate(&self.name, v)?,
                ))
            })
            .collect()
    }

    /// Validates a full column value and returns it in normalized form:
    /// single-atom columns yield [`Value::Atom`], other non-map columns a
    /// [`Value::Set`].
    pub fn validate(&self, value: Value) -> Result<Value, ConstructionError> {
        let ty = &self.column_type;
        if let Some(value_type) = &ty.value {
            let pairs = self.validate_pairs(self.pairs(value)?, value_type)?;
            self.check_count(pairs.len())?;
            return Ok(Value::Map(pairs));
        }

        let mut atoms = self
            .atoms(value)?
            .into_iter()
            .map(|atom| ty.key.validate(&self.name, atom))
            .collect::<Result<Vec<_>, _>>()?;
        self.check_count(atoms.len())?;
        if ty.is_single() && atoms.len() == 1 {
            if let Some(atom) = atoms.pop() {
                return Ok(Value::Atom(atom));
            }
        }
        Ok(Value::Set(atoms))
    }

    /// Validates the argument of a mutation on this column.
    ///
    /// Arithmetic mutators need an integer or real column and a single atom;
    /// `insert`/`delete` need a set or map column. Element counts are not
    /// checked here since the device applies them to the existing contents.
    pub fn validate_mutation(
        &self,
        mutator: Mutator,
        value: Value,
    ) -> Result<Value, ConstructionError> {
        if !self.mutable {
            return Err(ConstructionError::ImmutableColumn(self.name.clone()));
        }
        let ty = &self.column_type;
        let invalid = || ConstructionError::InvalidMutator {
            column: self.name.clone(),
            mutator: mutator.as_str(),
        };

        if mutator.is_arithmetic() {
            let numeric = match mutator {
                Mutator::Remainder => ty.key.atomic == AtomicType::Integer,
                _ => ty.key.atomic.is_numeric(),
            };
            if ty.is_map() || !numeric {
                return Err(invalid());
            }
            let atom = match value {
                Value::Atom(atom) => atom,
                Value::Set(mut atoms) if atoms.len() == 1 => atoms.remove(0),
                other => return Err(self.mismatch(ty.key.atomic.name(), other.kind())),
            };
            return Ok(Value::Atom(ty.key.check_type(&self.name, atom)?));
        }

        if ty.is_single() && ty.min == 1 {
            return Err(invalid());
        }
        match (&ty.value, mutator, value) {
            (Some(value_type), Mutator::Insert, value) => Ok(Value::Map(
                self.validate_pairs(self.pairs(value)?, value_type)?,
            )),
            (Some(value_type), Mutator::Delete, Value::Map(pairs)) => {
                Ok(Value::Map(self.validate_pairs(pairs, value_type)?))
            }
            (_, _, value) => {
                let atoms = self
                    .atoms(value)?
                    .into_iter()
                    .map(|atom| ty.key.validate(&self.name, atom))
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(Value::Set(atoms))
            }
        }
    }

    /// Validates the right-hand side of a condition on this column.
    pub fn validate_condition(
        &self,
        function: Function,
        value: Value,
    ) -> Result<Value, ConstructionError> {
        let ty = &self.column_type;
        if function.is_ordering() {
            if !ty.is_single() || !ty.key.atomic.is_numeric() {
                return Err(ConstructionError::InvalidFunction {
                    column: self.name.clone(),
                    function: function.as_str(),
                });
            }
            return self.validate(value);
        }
        if function.is_inclusion() {
            // includes/excludes compare against a subset, so only types matter.
            return match &ty.value {
                Some(value_type) => Ok(Value::Map(
                    self.validate_pairs(self.pairs(value)?, value_type)?,
                )),
                None => self
                    .atoms(value)?
                    .into_iter()
                    .map(|atom| ty.key.validate(&self.name, atom))
                    .collect::<Result<Vec<_>, _>>()
                    .map(Value::Set),
            };
        }
        self.validate(value)
    }
}

/// A table and its columns, including the implicit `_uuid` and `_version`.
#[derive(Debug, Clone, PartialEq)]
pub struct TableSchema {
    name: String,
    columns: BTreeMap<String, ColumnSchema>,
}

impl TableSchema {
    /// Table `name` with `columns`. `_uuid` and `_version` are added.
    pub fn new(name: impl Into<String>, columns: impl IntoIterator<Item = ColumnSchema>) -> Self {
        let mut all: BTreeMap<String, ColumnSchema> = columns
            .into_iter()
            .map(|column| (column.name.clone(), column))
            .collect();
        for implicit in [UUID_COLUMN, VERSION_COLUMN] {
            all.insert(
                implicit.to_owned(),
                ColumnSchema::new(implicit, ColumnType::scalar(AtomicType::Uuid)).immutable(),
            );
        }
        Self {
            name: name.into(),
            columns: all,
        }
    }

    /// table name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// column `name`, or [`ConstructionError::UnknownColumn`]
    pub fn column(&self, name: &str) -> Result<&ColumnSchema, ConstructionError> {
        self.columns
            .get(name)
            .ok_or_else(|| ConstructionError::UnknownColumn {
                table: self.name.clone(),
                column: name.to_owned(),
            })
    }

    /// Every column name, implicit ones included, in sorted order.
    pub fn column_names(&self) -> Vec<String> {
        self.columns.keys().cloned().collect()
    }

    /// columns sorted by name
    pub fn columns(&self) -> impl Iterator<Item = &ColumnSchema> {
        self.columns.values()
    }
}

/// A named database and its tables.
#[derive(Debug, Clone, PartialEq)]
pub struct DatabaseSchema {
    name: String,
    version: String,
    tables: BTreeMap<String, Arc<TableSchema>>,
}

impl DatabaseSchema {
    /// schema of database `name` at `version`
    pub fn new(
        name: impl Into<String>,
        version: impl Into<String>,
        tables: impl IntoIterator<Item = TableSchema>,
    ) -> Self {
        Self {
            name: name.into(),
            version: version.into(),
            tables: tables
                .into_iter()
                .map(|table| (table.name.clone(), Arc::new(table)))
                .collect(),
        }
    }

    /// database name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// schema version as reported by the device
    pub fn version(&self) -> &str {
        &self.version
    }

    /// Table `name`, shared so operations can hold it.
    pub fn table(&self, name: &str) -> Result<Arc<TableSchema>, ConstructionError> {
        self.tables
            .get(name)
            .cloned()
            .ok_or_else(|| ConstructionError::UnknownTable(name.to_owned()))
    }

    /// sorted
    pub fn table_names(&self) -> impl Iterator<Item = &str> {
        self.tables.keys().map(String::as_str)
    }

    /// Decodes a schema in the JSON form returned by `get_schema`.
    pub fn from_json(json: &Json) -> Result<Self, DecodeError> {
        let name = json["name"]
            .as_str()
            .ok_or_else(|| DecodeError::new("schema", "missing 'name'"))?;
        let version = json["version"].as_str().unwrap_or_default();
        let tables = json["tables"]
            .as_object()
            .ok_or_else(|| DecodeError::new("schema", "missing 'tables'"))?;

        let mut decoded = Vec::with_capacity(tables.len());
        for (table_name, table) in tables {
            let columns = table["columns"].as_object().ok_or_else(|| {
                DecodeError::new("table schema", format!("'{table_name}' has no columns"))
            })?;
            let mut table_columns = Vec::with_capacity(columns.len());
            for (column_name, column) in columns {
                let column_type = decode_column_type(&column["type"])?;
                let mut schema = ColumnSchema::new(column_name, column_type);
                if column["mutable"].as_bool() == Some(false) {
                    schema = schema.immutable();
                }
                table_columns.push(schema);
            }
            decoded.push(TableSchema::new(table_name, table_columns));
        }
        Ok(DatabaseSchema::new(name, version, decoded))
    }
}

fn decode_base_type(json: &Json) -> Result<BaseType, DecodeError> {
    if let Some(name) = json.as_str() {
        return AtomicType::from_name(name)
            .map(BaseType::new)
            .ok_or_else(|| DecodeError::new("base type", name));
    }
    let name = json["type"]
        .as_str()
        .ok_or_else(|| DecodeError::new("base type", json.to_string()))?;
    let mut base = AtomicType::from_name(name)
        .map(BaseType::new)
        .ok_or_else(|| DecodeError::new("base type", name))?;
    if !json["enum"].is_null() {
        base.enumeration = Some(match Value::from_json(&json["enum"])? {
            Value::Atom(atom) => vec![atom],
            Value::Set(atoms) => atoms,
            Value::Map(_) => return Err(DecodeError::new("enum", "map is not allowed")),
        });
    }
    base.min_integer = json["minInteger"].as_i64();
    base.max_integer = json["maxInteger"].as_i64();
    base.max_length = json["maxLength"].as_u64().map(|len| len as usize);
    base.ref_table = json["refTable"].as_str().map(str::to_owned);
    Ok(base)
}

fn decode_column_type(json: &Json) -> Result<ColumnType, DecodeError> {
    if json.is_string() {
        return Ok(ColumnType::from_base(decode_base_type(json)?, 1, Some(1)));
    }
    let key = decode_base_type(&json["key"])?;
    let value = match &json["value"] {
        Json::Null => None,
        value => Some(decode_base_type(value)?),
    };
    let min = json["min"].as_u64().unwrap_or(1) as usize;
    let max = match &json["max"] {
        Json::Null => Some(1),
        Json::String(s) if s == "unlimited" => None,
        other => Some(
            other
                .as_u64()
                .ok_or_else(|| DecodeError::new("column max", other.to_string()))?
                as usize,
        ),
    };
    Ok(ColumnType {
        key,
        value,
        min,
        max,
    })
}
