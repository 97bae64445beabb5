//! Build-time errors. Any of these aborts graph construction before a single
//! node is evaluated.
use crate::path::PathSyntaxError;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum GraphError {
    #[error("{node}: parameter '{param}' has invalid syntax: {source}")]
    PathSyntax {
        node: String,
        param: String,
        #[source]
        source: PathSyntaxError,
    },
    #[error("{node}: parameter '{param}' names unknown scope '{scope}'")]
    UnknownScope { node: String, param: String, scope: String },
    #[error("Scope '{scope}' imports unknown scope '{import}'")]
    UnknownImport { scope: String, import: String },
    #[error("{node}: parameter '{param}' is ambiguous: {reason}")]
    AmbiguousReference { node: String, param: String, reason: String },
    #[error("{node}: parameter '{param}' is malformed: {reason}")]
    MalformedReference { node: String, param: String, reason: String },
    #[error("{node}: reference '{path}' does not name any node")]
    DanglingReference { node: String, path: String },
    #[error("Scope '{scope}' consumes from scope '{foreign_scope}' without importing it")]
    UnimportedScope { scope: String, foreign_scope: String },
    /// Each node consumes the next; the last consumes the first.
    #[error("Cyclic dependency: {}", render_cycle(cycle))]
    CyclicDependency { cycle: Vec<String> },
    #[error("'{path}' is declared more than once")]
    DuplicateDeclaration { path: String },
    #[error("{path}: {source}")]
    InvalidName {
        path: String,
        #[source]
        source: PathSyntaxError,
    },
    #[error("{node}: assumption '{reference}' is invalid: {reason}")]
    InvalidAssumption { node: String, reference: String, reason: String },
}

fn render_cycle(cycle: &[String]) -> String {
    match cycle.first() {
        Some(first) => format!("{} -> {}", cycle.join(" -> "), first),
        None => String::new(),
    }
}
