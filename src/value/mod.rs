//! Runtime values flowing through the graph.
//!
//! `Value` is a closed variant: scalars, records, tables and file
//! references. A new kind of value is a new variant here.

use crate::path::Segment;
use serde::ser::{SerializeMap, Serializer};
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;
use thiserror::Error;

pub mod file_ref;
pub mod schema;
pub mod table;

pub use crate::integrity::Checksum;
pub use file_ref::FileRef;
pub use schema::{validate_inputs, ModelValidator, RawInput, Schema, SchemaValidator, ValidationError};
pub use table::{EnumDomain, KeySpace, Table, TableError};

/// A validated root-model instance. Immutable once produced.
pub type ModelValue = Value;

#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Number(f64),
    Bool(bool),
    Text(String),
    Record(Record),
    Table(Table),
    File(FileRef),
}

/// The flat kind of a value, used to declare parameter and output shapes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ValueKind {
    #[default]
    Any,
    Number,
    Bool,
    Text,
    Record,
    Table,
    File,
}

impl ValueKind {
    pub fn accepts(self, value: &Value) -> bool {
        self == ValueKind::Any || self == value.kind()
    }
}

impl fmt::Display for ValueKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ValueKind::Any => "any",
            ValueKind::Number => "number",
            ValueKind::Bool => "bool",
            ValueKind::Text => "text",
            ValueKind::Record => "record",
            ValueKind::Table => "table",
            ValueKind::File => "file",
        };
        f.write_str(name)
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProjectionError {
    #[error("Attribute '{name}' not found")]
    MissingAttribute { name: String },
    #[error("Cannot apply '{segment}' to a {found} value")]
    WrongKind { segment: String, found: ValueKind },
    #[error(transparent)]
    Table(#[from] TableError),
}

/// Named fields of a structured value.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Record(BTreeMap<String, Value>);

impl Record {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.0.insert(name.into(), value.into());
        self
    }

    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<Value>) {
        self.0.insert(name.into(), value.into());
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.0.get(name)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl Value {
    pub fn kind(&self) -> ValueKind {
        match self {
            Value::Number(_) => ValueKind::Number,
            Value::Bool(_) => ValueKind::Bool,
            Value::Text(_) => ValueKind::Text,
            Value::Record(_) => ValueKind::Record,
            Value::Table(_) => ValueKind::Table,
            Value::File(_) => ValueKind::File,
        }
    }

    pub fn as_number(&self) -> Option<f64> {
        match self { Value::Number(n) => Some(*n), _ => None }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self { Value::Bool(b) => Some(*b), _ => None }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self { Value::Text(s) => Some(s), _ => None }
    }

    pub fn as_record(&self) -> Option<&Record> {
        match self { Value::Record(r) => Some(r), _ => None }
    }

    pub fn as_table(&self) -> Option<&Table> {
        match self { Value::Table(t) => Some(t), _ => None }
    }

    pub fn as_file(&self) -> Option<&FileRef> {
        match self { Value::File(f) => Some(f), _ => None }
    }

    /// Follows attribute and index segments down into this value.
    pub fn project(&self, segments: &[Segment]) -> Result<&Value, ProjectionError> {
        segments.iter().try_fold(self, |current, segment| match (current, segment) {
            (Value::Record(record), Segment::Attribute(name)) => record
                .get(name)
                .ok_or_else(|| ProjectionError::MissingAttribute { name: name.clone() }),
            (Value::Table(table), Segment::Index(key)) => Ok(table.get(key)?),
            (other, segment) => Err(ProjectionError::WrongKind {
                segment: segment.to_string(),
                found: other.kind(),
            }),
        })
    }

    /// Every file reference reachable inside this value, depth first.
    pub fn file_refs(&self) -> Vec<&FileRef> {
        let mut found = Vec::new();
        self.collect_file_refs(&mut found);
        found
    }

    fn collect_file_refs<'a>(&'a self, out: &mut Vec<&'a FileRef>) {
        match self {
            Value::File(f) => out.push(f),
            Value::Record(r) => r.0.values().for_each(|v| v.collect_file_refs(out)),
            Value::Table(t) => t.values().iter().for_each(|v| v.collect_file_refs(out)),
            Value::Number(_) | Value::Bool(_) | Value::Text(_) => {}
        }
    }
}

impl From<f64> for Value {
    fn from(n: f64) -> Self { Value::Number(n) }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self { Value::Bool(b) }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self { Value::Text(s.to_string()) }
}

impl From<String> for Value {
    fn from(s: String) -> Self { Value::Text(s) }
}

impl From<Record> for Value {
    fn from(r: Record) -> Self { Value::Record(r) }
}

impl From<Table> for Value {
    fn from(t: Table) -> Self { Value::Table(t) }
}

impl From<FileRef> for Value {
    fn from(f: FileRef) -> Self { Value::File(f) }
}

impl Serialize for Value {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Value::Number(n) => serializer.serialize_f64(*n),
            Value::Bool(b) => serializer.serialize_bool(*b),
            Value::Text(s) => serializer.serialize_str(s),
            Value::Record(r) => {
                let mut map = serializer.serialize_map(Some(r.len()))?;
                for (k, v) in r.iter() {
                    map.serialize_entry(k, v)?;
                }
                map.end()
            }
            Value::Table(t) => {
                let mut map = serializer.serialize_map(Some(t.len()))?;
                for (k, v) in t.iter() {
                    map.serialize_entry(&k.to_string(), v)?;
                }
                map.end()
            }
            Value::File(f) => f.serialize(serializer),
        }
    }
}
