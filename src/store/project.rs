//! The project aggregate: scopes, their root models and the calculations
//! and verifications declared against them.
//!
//! Everything here is plain declaration data built by the caller. Nothing is
//! resolved until `analysis::build_graph` runs.

use crate::path::{check_name, PathSyntaxError};
use crate::value::{
    validate_inputs, FileRef, ModelValidator, ModelValue, RawInput, Record, Table, TableError,
    ValidationError, Value, ValueKind,
};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use thiserror::Error;

/// Failure reported by a calculation or verification body.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BodyError {
    #[error("{0}")]
    Message(String),
    /// A table the body tried to build or read was invalid.
    #[error(transparent)]
    Table(#[from] TableError),
}

impl BodyError {
    pub fn new(message: impl Into<String>) -> Self {
        BodyError::Message(message.into())
    }
}

impl From<String> for BodyError {
    fn from(message: String) -> Self {
        BodyError::Message(message)
    }
}

impl From<&str> for BodyError {
    fn from(message: &str) -> Self {
        Self::new(message)
    }
}

/// The pure function behind a calculation or verification.
pub trait CalcBody: Send + Sync {
    fn call(&self, args: &Args) -> Result<Value, BodyError>;
}

impl<F> CalcBody for F
where
    F: Fn(&Args) -> Result<Value, BodyError> + Send + Sync,
{
    fn call(&self, args: &Args) -> Result<Value, BodyError> {
        self(args)
    }
}

/// Argument values bound to declared parameter names, in declaration order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Args {
    entries: Vec<(String, Value)>,
}

impl Args {
    pub fn new(entries: Vec<(String, Value)>) -> Self {
        Self { entries }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.entries.iter().map(|(n, v)| (n.as_str(), v))
    }

    pub fn get(&self, name: &str) -> Result<&Value, BodyError> {
        self.entries
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, v)| v)
            .ok_or_else(|| BodyError::new(format!("no parameter named '{}'", name)))
    }

    fn typed<'a, T>(&'a self, name: &str, kind: ValueKind, f: impl FnOnce(&'a Value) -> Option<T>) -> Result<T, BodyError> {
        let value = self.get(name)?;
        f(value).ok_or_else(|| BodyError::new(format!("parameter '{}' is {}, not {}", name, value.kind(), kind)))
    }

    pub fn number(&self, name: &str) -> Result<f64, BodyError> {
        self.typed(name, ValueKind::Number, Value::as_number)
    }

    pub fn bool(&self, name: &str) -> Result<bool, BodyError> {
        self.typed(name, ValueKind::Bool, Value::as_bool)
    }

    pub fn text(&self, name: &str) -> Result<&str, BodyError> {
        self.typed(name, ValueKind::Text, Value::as_text)
    }

    pub fn record(&self, name: &str) -> Result<&Record, BodyError> {
        self.typed(name, ValueKind::Record, Value::as_record)
    }

    pub fn table(&self, name: &str) -> Result<&Table, BodyError> {
        self.typed(name, ValueKind::Table, Value::as_table)
    }

    pub fn file(&self, name: &str) -> Result<&FileRef, BodyError> {
        self.typed(name, ValueKind::File, Value::as_file)
    }
}

/// One declared parameter: its name, the reference expression it reads and
/// the kind of value it expects.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Param {
    pub name: String,
    pub reference: String,
    /// Foreign scope the reference is resolved in, when declared apart from
    /// the expression itself.
    pub scope: Option<String>,
    pub kind: ValueKind,
}

impl Param {
    pub fn new(name: impl Into<String>, reference: impl Into<String>) -> Self {
        Self { name: name.into(), reference: reference.into(), scope: None, kind: ValueKind::Any }
    }

    pub fn from_scope(mut self, scope: impl Into<String>) -> Self {
        self.scope = Some(scope.into());
        self
    }

    pub fn of_kind(mut self, kind: ValueKind) -> Self {
        self.kind = kind;
        self
    }
}

#[derive(Clone)]
pub struct Calculation {
    pub name: String,
    pub params: Vec<Param>,
    pub output: ValueKind,
    /// Scopes imported by this calculation alone, on top of its scope's imports.
    pub imports: Vec<String>,
    /// Verifications (`?name` or `Scope::?name`) whose passing this
    /// calculation takes for granted.
    pub assumes: Vec<String>,
    pub body: Arc<dyn CalcBody>,
}

impl Calculation {
    pub fn new<F>(name: impl Into<String>, body: F) -> Self
    where
        F: Fn(&Args) -> Result<Value, BodyError> + Send + Sync + 'static,
    {
        Self::with_body(name, body)
    }

    pub fn with_body(name: impl Into<String>, body: impl CalcBody + 'static) -> Self {
        Self {
            name: name.into(),
            params: Vec::new(),
            output: ValueKind::Any,
            imports: Vec::new(),
            assumes: Vec::new(),
            body: Arc::new(body),
        }
    }

    pub fn param(self, name: impl Into<String>, reference: impl Into<String>) -> Self {
        self.with_param(Param::new(name, reference))
    }

    pub fn with_param(mut self, param: Param) -> Self {
        self.params.push(param);
        self
    }

    pub fn output(mut self, kind: ValueKind) -> Self {
        self.output = kind;
        self
    }

    pub fn import(mut self, scope: impl Into<String>) -> Self {
        self.imports.push(scope.into());
        self
    }

    pub fn assume(mut self, verification: impl Into<String>) -> Self {
        self.assumes.push(verification.into());
        self
    }
}

impl fmt::Debug for Calculation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Calculation")
            .field("name", &self.name)
            .field("params", &self.params)
            .field("output", &self.output)
            .field("imports", &self.imports)
            .field("assumes", &self.assumes)
            .finish_non_exhaustive()
    }
}

/// A terminal check. Its body returns a bool or a table of bools.
#[derive(Clone)]
pub struct Verification {
    pub name: String,
    pub params: Vec<Param>,
    pub imports: Vec<String>,
    pub assumes: Vec<String>,
    /// Expected to fail; a pass is then reported as unexpected.
    pub xfail: bool,
    pub body: Arc<dyn CalcBody>,
}

impl Verification {
    pub fn new<F>(name: impl Into<String>, body: F) -> Self
    where
        F: Fn(&Args) -> Result<Value, BodyError> + Send + Sync + 'static,
    {
        Self::with_body(name, body)
    }

    pub fn with_body(name: impl Into<String>, body: impl CalcBody + 'static) -> Self {
        Self {
            name: name.into(),
            params: Vec::new(),
            imports: Vec::new(),
            assumes: Vec::new(),
            xfail: false,
            body: Arc::new(body),
        }
    }

    pub fn param(self, name: impl Into<String>, reference: impl Into<String>) -> Self {
        self.with_param(Param::new(name, reference))
    }

    pub fn with_param(mut self, param: Param) -> Self {
        self.params.push(param);
        self
    }

    pub fn import(mut self, scope: impl Into<String>) -> Self {
        self.imports.push(scope.into());
        self
    }

    pub fn assume(mut self, verification: impl Into<String>) -> Self {
        self.assumes.push(verification.into());
        self
    }

    pub fn xfail(mut self) -> Self {
        self.xfail = true;
        self
    }
}

impl fmt::Debug for Verification {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Verification")
            .field("name", &self.name)
            .field("params", &self.params)
            .field("imports", &self.imports)
            .field("assumes", &self.assumes)
            .field("xfail", &self.xfail)
            .finish_non_exhaustive()
    }
}

/// A requirement owned by a scope.
///
/// Links are by reference text: verifications as `?name` or `Scope::?name`,
/// other requirements by id. Ids are unique across the whole project.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Requirement {
    pub id: String,
    pub description: String,
    pub verified_by: Vec<String>,
    /// Child requirements this one is broken down into.
    pub decomposed_into: Vec<String>,
    pub depends_on: Vec<String>,
}

impl Requirement {
    pub fn new(id: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            description: description.into(),
            verified_by: Vec::new(),
            decomposed_into: Vec::new(),
            depends_on: Vec::new(),
        }
    }

    pub fn verified_by(mut self, verification: impl Into<String>) -> Self {
        self.verified_by.push(verification.into());
        self
    }

    pub fn decomposed_into(mut self, child: impl Into<String>) -> Self {
        self.decomposed_into.push(child.into());
        self
    }

    pub fn depends_on(mut self, requirement: impl Into<String>) -> Self {
        self.depends_on.push(requirement.into());
        self
    }
}

#[derive(Debug, Clone)]
pub struct Scope {
    name: String,
    imports: Vec<String>,
    model: Option<ModelValue>,
    calculations: Vec<Calculation>,
    verifications: Vec<Verification>,
    requirements: Vec<Requirement>,
}

impl Scope {
    /// The name must be a plain identifier so that paths into the scope
    /// render and parse back.
    pub fn new(name: impl Into<String>) -> Result<Self, PathSyntaxError> {
        let name = name.into();
        check_name(&name, "scope name")?;
        Ok(Self {
            name,
            imports: Vec::new(),
            model: None,
            calculations: Vec::new(),
            verifications: Vec::new(),
            requirements: Vec::new(),
        })
    }

    pub fn import(mut self, scope: impl Into<String>) -> Self {
        self.imports.push(scope.into());
        self
    }

    pub fn model(mut self, value: impl Into<ModelValue>) -> Self {
        self.model = Some(value.into());
        self
    }

    pub fn calculation(mut self, calc: Calculation) -> Self {
        self.calculations.push(calc);
        self
    }

    pub fn verification(mut self, verification: Verification) -> Self {
        self.verifications.push(verification);
        self
    }

    pub fn requirement(mut self, requirement: Requirement) -> Self {
        self.requirements.push(requirement);
        self
    }

    pub fn set_model(&mut self, value: ModelValue) {
        self.model = Some(value);
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn imports(&self) -> &[String] {
        &self.imports
    }

    pub fn model_value(&self) -> Option<&ModelValue> {
        self.model.as_ref()
    }

    pub fn calculations(&self) -> &[Calculation] {
        &self.calculations
    }

    pub fn verifications(&self) -> &[Verification] {
        &self.verifications
    }

    pub fn requirements(&self) -> &[Requirement] {
        &self.requirements
    }
}

/// The explicit registry of everything declared for one system.
#[derive(Debug, Clone, Default)]
pub struct Project {
    name: String,
    scopes: Vec<Scope>,
}

impl Project {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into(), scopes: Vec::new() }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Scopes in declaration order. Duplicate names are reported by the
    /// graph builder.
    pub fn add_scope(&mut self, scope: Scope) -> &mut Self {
        self.scopes.push(scope);
        self
    }

    pub fn with_scope(mut self, scope: Scope) -> Self {
        self.scopes.push(scope);
        self
    }

    pub fn scopes(&self) -> &[Scope] {
        &self.scopes
    }

    pub fn scope(&self, name: &str) -> Option<&Scope> {
        self.scopes.iter().find(|s| s.name == name)
    }

    pub fn scope_mut(&mut self, name: &str) -> Option<&mut Scope> {
        self.scopes.iter_mut().find(|s| s.name == name)
    }

    /// Validates raw inputs and installs the resulting root models. Inputs for
    /// scopes the project does not declare are rejected.
    pub fn load_models<V, I>(&mut self, validator: &V, inputs: I) -> Result<(), Vec<ValidationError>>
    where
        V: ModelValidator + ?Sized,
        I: IntoIterator<Item = RawInput>,
    {
        let (known, unknown): (Vec<RawInput>, Vec<RawInput>) =
            inputs.into_iter().partition(|raw| self.scope(raw.scope()).is_some());

        let mut errors: Vec<ValidationError> = unknown
            .into_iter()
            .map(|raw| ValidationError {
                path: raw.path.to_string(),
                reason: format!("project has no scope named '{}'", raw.scope()),
            })
            .collect();

        let models: BTreeMap<String, ModelValue> = match validate_inputs(validator, known) {
            Ok(models) => models,
            Err(mut failed) => {
                errors.append(&mut failed);
                return Err(errors);
            }
        };
        if !errors.is_empty() {
            return Err(errors);
        }

        for (scope, value) in models {
            if let Some(s) = self.scope_mut(&scope) {
                s.set_model(value);
            }
        }
        Ok(())
    }
}
