//! Dependency-graph evaluation for system-of-systems models.
//!
//! A [`Project`] is a set of named scopes. Each scope owns one validated root
//! model plus calculations and verifications that read from it, from each
//! other, or from the scopes it imports. [`build_graph`] resolves every
//! parameter reference into a DAG, and [`evaluate`] runs it once in
//! topological order, recording a value or a failure for every node and a
//! checksum for every external file consumed. Requirements declared in the
//! scopes are traced to the verifications that back them by
//! [`analysis::build_report`].

pub mod analysis;
pub mod compute;
pub mod config;
pub mod display;
pub mod integrity;
pub mod path;
pub mod store;
pub mod value;

#[cfg(test)]
pub(crate) mod testing;

pub use analysis::{build_graph, build_report, DependencyGraph, GraphError, TraceabilityReport};
pub use compute::{evaluate, evaluate_with, Engine, EvalError, EvaluationResult, QueryError};
pub use config::EngineConfig;
pub use path::{ProjectPath, Reference};
pub use store::{Args, BodyError, Calculation, Param, Project, Requirement, Scope, Verification};
pub use value::{FileRef, Record, Schema, SchemaValidator, Table, Value, ValueKind};
