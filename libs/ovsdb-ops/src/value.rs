//! Column values in OVSDB notation.
//!
//! An [`Atom`] is a single scalar, a [`Value`] is what a column holds: one
//! atom, a set of atoms or a map of atom pairs. JSON conversion follows
//! RFC 7047 section 5.1 (`["set", [..]]`, `["map", [[k, v], ..]]`,
//! `["uuid", ".."]`, `["named-uuid", ".."]`).

use std::collections::BTreeMap;
use std::fmt;

use serde_json::{Value as Json, json};
use uuid::Uuid;

use crate::error::DecodeError;

/// A row as a column-name to value map.
pub type Row = BTreeMap<String, Value>;

/// A single scalar value.
#[derive(Debug, Clone, PartialEq)]
pub enum Atom {
    /// `integer`
    Integer(i64),
    /// `real`
    Real(f64),
    /// `boolean`
    Boolean(bool),
    /// `string`
    String(String),
    /// reference to an existing row
    Uuid(Uuid),
    /// Reference to a row inserted earlier in the same transaction.
    NamedUuid(String),
}

impl Atom {
    /// Name of the atomic type this atom carries, as used in schemas.
    pub fn type_name(&self) -> &'static str {
        match self {
            Atom::Integer(_) => "integer",
            Atom::Real(_) => "real",
            Atom::Boolean(_) => "boolean",
            Atom::String(_) => "string",
            Atom::Uuid(_) | Atom::NamedUuid(_) => "uuid",
        }
    }

    /// uuid of a [`Atom::Uuid`]; named uuids are not resolved
    pub fn as_uuid(&self) -> Option<Uuid> {
        match self {
            Atom::Uuid(uuid) => Some(*uuid),
            _ => None,
        }
    }

    /// text of a string atom
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Atom::String(s) => Some(s),
            _ => None,
        }
    }

    /// value of an integer atom
    pub fn as_integer(&self) -> Option<i64> {
        match self {
            Atom::Integer(i) => Some(*i),
            _ => None,
        }
    }

    /// OVSDB notation
    pub fn to_json(&self) -> Json {
        match self {
            Atom::Integer(i) => json!(i),
            Atom::Real(r) => json!(r),
            Atom::Boolean(b) => json!(b),
            Atom::String(s) => json!(s),
            Atom::Uuid(uuid) => json!(["uuid", uuid.to_string()]),
            Atom::NamedUuid(name) => json!(["named-uuid", name]),
        }
    }

    /// Decodes a bare scalar or a `["uuid", ..]`/`["named-uuid", ..]` pair.
    pub fn from_json(json: &Json) -> Result<Self, DecodeError> {
        match json {
            Json::Bool(b) => Ok(Atom::Boolean(*b)),
            Json::String(s) => Ok(Atom::String(s.clone())),
            Json::Number(n) => match n.as_i64() {
                Some(i) => Ok(Atom::Integer(i)),
                None => n
                    .as_f64()
                    .map(Atom::Real)
                    .ok_or_else(|| DecodeError::new("atom", format!("number {n} out of range"))),
            },
            Json::Array(pair) => match pair.as_slice() {
                [Json::String(tag), Json::String(id)] if tag == "uuid" => Uuid::parse_str(id)
                    .map(Atom::Uuid)
                    .map_err(|e| DecodeError::new("uuid", e.to_string())),
                [Json::String(tag), Json::String(name)] if tag == "named-uuid" => {
                    Ok(Atom::NamedUuid(name.clone()))
                }
                _ => Err(DecodeError::new("atom", json.to_string())),
            },
            _ => Err(DecodeError::new("atom", json.to_string())),
        }
    }
}

impl fmt::Display for Atom {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Atom::Integer(i) => write!(f, "{i}"),
            Atom::Real(r) => write!(f, "{r}"),
            Atom::Boolean(b) => write!(f, "{b}"),
            Atom::String(s) => write!(f, "{s:?}"),
            Atom::Uuid(uuid) => write!(f, "{uuid}"),
            Atom::NamedUuid(name) => write!(f, "@{name}"),
        }
    }
}

impl From<i64> for Atom {
    fn from(v: i64) -> Self {
        Atom::Integer(v)
    }
}

impl From<f64> for Atom {
    fn from(v: f64) -> Self {
        Atom::Real(v)
    }
}

impl From<bool> for Atom {
    fn from(v: bool) -> Self {
        Atom::Boolean(v)
    }
}

impl From<&str> for Atom {
    fn from(v: &str) -> Self {
        Atom::String(v.to_owned())
    }
}

impl From<String> for Atom {
    fn from(v: String) -> Self {
        Atom::String(v)
    }
}

impl From<Uuid> for Atom {
    fn from(v: Uuid) -> Self {
        Atom::Uuid(v)
    }
}

/// The contents of a column.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    /// single atom
    Atom(Atom),
    /// atoms of a set column
    Set(Vec<Atom>),
    /// key/value pairs of a map column
    Map(Vec<(Atom, Atom)>),
}

impl Value {
    /// set of `atoms`
    pub fn set<I, A>(atoms: I) -> Self
    where
        I: IntoIterator<Item = A>,
        A: Into<Atom>,
    {
        Value::Set(atoms.into_iter().map(Into::into).collect())
    }

    /// map of `pairs`
    pub fn map<I, K, V>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<Atom>,
        V: Into<Atom>,
    {
        Value::Map(
            pairs
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        )
    }

    /// clears an optional or set column
    pub fn empty_set() -> Self {
        Value::Set(Vec::new())
    }

    /// Number of atoms (or pairs) held.
    pub fn len(&self) -> usize {
        match self {
            Value::Atom(_) => 1,
            Value::Set(atoms) => atoms.len(),
            Value::Map(pairs) => pairs.len(),
        }
    }

    /// empty set or map
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// The single atom of a scalar, or of a one-element set.
    pub fn as_atom(&self) -> Option<&Atom> {
        match self {
            Value::Atom(atom) => Some(atom),
            Value::Set(atoms) if atoms.len() == 1 => atoms.first(),
            _ => None,
        }
    }

    /// see [`as_atom`](Self::as_atom)
    pub fn as_uuid(&self) -> Option<Uuid> {
        self.as_atom().and_then(Atom::as_uuid)
    }

    /// see [`as_atom`](Self::as_atom)
    pub fn as_str(&self) -> Option<&str> {
        self.as_atom().and_then(Atom::as_str)
    }

    /// Looks up `key` in a map value.
    pub fn get(&self, key: &Atom) -> Option<&Atom> {
        match self {
            Value::Map(pairs) => pairs.iter().find(|(k, _)| k == key).map(|(_, v)| v),
            _ => None,
        }
    }

    pub(crate) fn kind(&self) -> &'static str {
        match self {
            Value::Atom(atom) => atom.type_name(),
            Value::Set(_) => "set",
            Value::Map(_) => "map",
        }
    }

    /// OVSDB notation; a one-element set is written as its atom
    pub fn to_json(&self) -> Json {
        match self {
            Value::Atom(atom) => atom.to_json(),
            Value::Set(atoms) if atoms.len() == 1 => atoms[0].to_json(),
            Value::Set(atoms) => {
                json!(["set", atoms.iter().map(Atom::to_json).collect::<Vec<_>>()])
            }
            Value::Map(pairs) => json!([
                "map",
                pairs
                    .iter()
                    .map(|(k, v)| json!([k.to_json(), v.to_json()]))
                    .collect::<Vec<_>>()
            ]),
        }
    }

    /// Decodes an atom, a `["set", ..]` or a `["map", ..]`.
    pub fn from_json(json: &Json) -> Result<Self, DecodeError> {
        if let Json::Array(items) = json {
            match items.as_slice() {
                [Json::String(tag), Json::Array(atoms)] if tag == "set" => {
                    return atoms
                        .iter()
                        .map(Atom::from_json)
                        .collect::<Result<Vec<_>, _>>()
                        .map(Value::Set);
                }
                [Json::String(tag), Json::Array(pairs)] if tag == "map" => {
                    return pairs
                        .iter()
                        .map(|pair| match pair.as_array().map(Vec::as_slice) {
                            Some([k, v]) => Ok((Atom::from_json(k)?, Atom::from_json(v)?)),
                            _ => Err(DecodeError::new("map pair", pair.to_string())),
                        })
                        .collect::<Result<Vec<_>, _>>()
                        .map(Value::Map);
                }
                _ => {}
            }
        }
        Atom::from_json(json).map(Value::Atom)
    }
}

impl From<Atom> for Value {
    fn from(atom: Atom) -> Self {
        Value::Atom(atom)
    }
}

macro_rules! value_from_scalar {
    ($($ty:ty),*) => {
        $(
            impl From<$ty> for Value {
                fn from(v: $ty) -> Self {
                    Value::Atom(Atom::from(v))
                }
            }
        )*
    };
}

value_from_scalar!(i64, f64, bool, &str, String, Uuid);

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_json())
    }
}

/// Encodes a row as a JSON object.
pub fn row_to_json(row: &Row) -> Json {
    Json::Object(
        row.iter()
            .map(|(column, value)| (column.clone(), value.to_json()))
            .collect(),
    )
}

/// Decodes a JSON object into a row without consulting a schema.
pub fn row_from_json(json: &Json) -> Result<Row, DecodeError> {
    let object = json
        .as_object()
        .ok_or_else(|| DecodeError::new("row", json.to_string()))?;
    object
        .iter()
        .map(|(column, value)| Ok((column.clone(), Value::from_json(value)?)))
        .collect()
}
