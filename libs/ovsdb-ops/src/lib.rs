//! # ovsdb-ops
//!
//! Typed operation model for OVSDB-speaking devices (RFC 7047).
//!
//! This library provides:
//! - **Schemas** describing tables, column types and cardinality, decoded from
//!   the device's `get_schema` reply.
//! - **Operations** (select, insert, update, delete, mutate, comment) whose
//!   values, conditions and mutations are validated against the schema while
//!   they are built.
//! - **Transactions**: ordered batches submitted through the [`Transact`]
//!   trait, with results aligned to the submitted operations.
//!
//! ## Design Principles
//!
//! - Invalid values fail when an operation is built, never on submission.
//! - Results are positional: an error at index `i` means nothing after `i` ran.
//! - The transport is a trait; no RPC framing lives here.
//!
//! ## Example
//!
//! ```
//! use std::sync::Arc;
//! use ovsdb_ops::{AtomicType, ColumnSchema, ColumnType, DatabaseSchema, Insert, TableSchema, TransactionBuilder};
//!
//! let schema = DatabaseSchema::new(
//!     "hardware_vtep",
//!     "1.3.0",
//!     [TableSchema::new(
//!         "Logical_Switch",
//!         [ColumnSchema::new("name", ColumnType::scalar(AtomicType::String))],
//!     )],
//! );
//! let insert = Insert::new(schema.table("Logical_Switch")?).value("name", "ls0")?;
//! // unknown columns fail before anything is sent
//! assert!(Insert::new(schema.table("Logical_Switch")?).value("tunnel_key", 5i64).is_err());
//!
//! let mut tx = TransactionBuilder::new(Arc::new(schema));
//! assert_eq!(tx.add(insert), 0);
//! assert_eq!(tx.len(), 1);
//! # Ok::<(), ovsdb_ops::ConstructionError>(())
//! ```
#![warn(missing_docs, rust_2018_idioms)]

pub mod condition;
pub mod error;
pub mod mutation;
pub mod operation;
pub mod result;
pub mod schema;
pub mod transaction;
pub mod value;

pub use condition::{Condition, Function};
pub use error::{ConstructionError, DecodeError, DeviceError, TransactError, TransportError};
pub use mutation::{Mutation, Mutator};
pub use operation::{Comment, Delete, Insert, Mutate, Operation, Select, Update};
pub use result::OperationResult;
pub use schema::{
    AtomicType, BaseType, ColumnSchema, ColumnType, DatabaseSchema, TableSchema, UUID_COLUMN,
    VERSION_COLUMN,
};
pub use transaction::{Transact, TransactionBuilder, TransactionResults, select_singleton_row};
pub use value::{Atom, Row, Value};
