//! The schema-validation boundary.
//!
//! The engine never validates raw data itself. It only needs some
//! `ModelValidator` to have turned every scope's `RawInput` into a typed
//! `ModelValue` beforehand. `Schema` is the stock validator: a structural
//! description of a root model checked against JSON-shaped raw data.

use super::{FileRef, KeySpace, ModelValue, Record, Table, Value, ValueKind};
use crate::config::EngineConfig;
use crate::integrity::Checksum;
use crate::path::{PathSyntaxError, ProjectPath, Segment, TableKey};
use std::collections::{BTreeMap, HashMap};
use std::path::PathBuf;
use std::sync::Arc;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("Invalid input at '{path}': {reason}")]
pub struct ValidationError {
    /// Where validation failed, e.g. `Power::$.design.area`.
    pub path: String,
    pub reason: String,
}

/// Untyped-at-rest data loaded for one scope's root model.
#[derive(Debug, Clone, PartialEq)]
pub struct RawInput {
    pub path: ProjectPath,
    pub data: serde_json::Value,
}

impl RawInput {
    pub fn new(scope: impl Into<String>, data: serde_json::Value) -> Result<Self, PathSyntaxError> {
        Ok(Self { path: ProjectPath::model(scope)?, data })
    }

    pub fn scope(&self) -> &str {
        self.path.scope()
    }
}

/// Turns raw input into a typed root-model value.
pub trait ModelValidator {
    fn validate(&self, raw: RawInput) -> Result<ModelValue, ValidationError>;
}

#[derive(Debug, Clone, PartialEq)]
pub enum Schema {
    Number,
    Bool,
    Text,
    File,
    Record(Vec<(String, Schema)>),
    Table(Arc<KeySpace>, Box<Schema>),
}

impl Schema {
    pub fn record<I, S>(fields: I) -> Self
    where
        I: IntoIterator<Item = (S, Schema)>,
        S: Into<String>,
    {
        Schema::Record(fields.into_iter().map(|(n, s)| (n.into(), s)).collect())
    }

    pub fn table(space: Arc<KeySpace>, value: Schema) -> Self {
        Schema::Table(space, Box::new(value))
    }

    pub fn kind(&self) -> ValueKind {
        match self {
            Schema::Number => ValueKind::Number,
            Schema::Bool => ValueKind::Bool,
            Schema::Text => ValueKind::Text,
            Schema::File => ValueKind::File,
            Schema::Record(_) => ValueKind::Record,
            Schema::Table(..) => ValueKind::Table,
        }
    }

    /// A placeholder instance used to scaffold input files. File references
    /// have no meaningful default, so any schema containing one yields `None`.
    pub fn default_value(&self) -> Option<Value> {
        match self {
            Schema::Number => Some(Value::Number(0.0)),
            Schema::Bool => Some(Value::Bool(false)),
            Schema::Text => Some(Value::Text(String::new())),
            Schema::File => None,
            Schema::Record(fields) => {
                let mut record = Record::new();
                for (name, schema) in fields {
                    record.insert(name.clone(), schema.default_value()?);
                }
                Some(Value::Record(record))
            }
            Schema::Table(space, value) => {
                Table::from_fn(space.clone(), |_| value.default_value().ok_or(())).ok().map(Value::Table)
            }
        }
    }

    /// Checks `raw` against this schema. Relative file paths are resolved
    /// against `base_dir` when one is given.
    pub fn validate(
        &self,
        at: &ProjectPath,
        raw: &serde_json::Value,
        base_dir: Option<&std::path::Path>,
    ) -> Result<Value, ValidationError> {
        use serde_json::Value as Json;

        let fail = |reason: String| ValidationError { path: at.to_string(), reason };
        let found = |raw: &Json| match raw {
            Json::Null => "null",
            Json::Bool(_) => "bool",
            Json::Number(_) => "number",
            Json::String(_) => "string",
            Json::Array(_) => "array",
            Json::Object(_) => "object",
        };

        match (self, raw) {
            (Schema::Number, Json::Number(n)) => n
                .as_f64()
                .map(Value::Number)
                .ok_or_else(|| fail(format!("number {} is not representable", n))),
            (Schema::Bool, Json::Bool(b)) => Ok(Value::Bool(*b)),
            (Schema::Text, Json::String(s)) => Ok(Value::Text(s.clone())),
            (Schema::File, Json::String(p)) => Ok(Value::File(resolve(FileRef::new(p), base_dir))),
            (Schema::File, Json::Object(obj)) => {
                let path = obj
                    .get("path")
                    .and_then(Json::as_str)
                    .ok_or_else(|| fail("file reference needs a 'path' string".into()))?;
                let mut file = FileRef::new(path);
                match obj.get("checksum") {
                    None | Some(Json::Null) => {}
                    Some(Json::String(sum)) => file = file.with_checksum(Checksum::from_recorded(sum.clone())),
                    Some(other) => return Err(fail(format!("checksum must be a string, found {}", found(other)))),
                }
                if let Some(extra) = obj.keys().find(|k| *k != "path" && *k != "checksum") {
                    return Err(fail(format!("unexpected field '{}' in file reference", extra)));
                }
                Ok(Value::File(resolve(file, base_dir)))
            }
            (Schema::Record(fields), Json::Object(obj)) => {
                if let Some(extra) = obj.keys().find(|k| !fields.iter().any(|(n, _)| n == *k)) {
                    return Err(fail(format!("unexpected field '{}'", extra)));
                }
                let mut record = Record::new();
                for (name, schema) in fields {
                    let child = at.join(Segment::attr(name.clone()).map_err(|e| fail(e.to_string()))?);
                    let raw_field = obj.get(name).ok_or_else(|| ValidationError {
                        path: child.to_string(),
                        reason: "missing field".into(),
                    })?;
                    record.insert(name.clone(), schema.validate(&child, raw_field, base_dir)?);
                }
                Ok(Value::Record(record))
            }
            (Schema::Table(space, value_schema), Json::Object(obj)) => {
                let mut entries = Vec::with_capacity(obj.len());
                for (raw_key, raw_value) in obj {
                    let key = TableKey::parse(raw_key).map_err(|e| fail(e.to_string()))?;
                    let child = at.join(Segment::Index(key.clone()));
                    entries.push((key, value_schema.validate(&child, raw_value, base_dir)?));
                }
                Table::from_entries(space.clone(), entries)
                    .map(Value::Table)
                    .map_err(|e| fail(e.to_string()))
            }
            (schema, other) => Err(fail(format!("expected {}, found {}", schema.kind(), found(other)))),
        }
    }
}

fn resolve(file: FileRef, base_dir: Option<&std::path::Path>) -> FileRef {
    match base_dir {
        Some(base) => file.resolved_against(base),
        None => file,
    }
}

/// Runs `validator` over every raw input, keyed by scope. All failures are
/// collected rather than stopping at the first.
pub fn validate_inputs<V, I>(validator: &V, inputs: I) -> Result<BTreeMap<String, ModelValue>, Vec<ValidationError>>
where
    V: ModelValidator + ?Sized,
    I: IntoIterator<Item = RawInput>,
{
    let mut models = BTreeMap::new();
    let mut errors = Vec::new();
    for raw in inputs {
        let scope = raw.scope().to_string();
        match validator.validate(raw) {
            Ok(value) => {
                models.insert(scope, value);
            }
            Err(e) => errors.push(e),
        }
    }
    if errors.is_empty() { Ok(models) } else { Err(errors) }
}

/// Validates each scope's raw input against a registered root-model schema.
#[derive(Debug, Clone, Default)]
pub struct SchemaValidator {
    schemas: HashMap<String, Schema>,
    base_dir: Option<PathBuf>,
}

impl SchemaValidator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_schema(mut self, scope: impl Into<String>, schema: Schema) -> Self {
        self.schemas.insert(scope.into(), schema);
        self
    }

    pub fn with_base_dir(mut self, base_dir: Option<PathBuf>) -> Self {
        self.base_dir = base_dir;
        self
    }

    /// A validator with no schemas yet, resolving file references against
    /// the configured input directory.
    pub fn from_config(config: &EngineConfig) -> Self {
        Self::new().with_base_dir(config.input_base_dir.clone())
    }
}

impl ModelValidator for SchemaValidator {
    fn validate(&self, raw: RawInput) -> Result<ModelValue, ValidationError> {
        let schema = self.schemas.get(raw.scope()).ok_or_else(|| ValidationError {
            path: raw.path.to_string(),
            reason: format!("no root model schema registered for scope '{}'", raw.scope()),
        })?;
        schema.validate(&raw.path, &raw.data, self.base_dir.as_deref())
    }
}
