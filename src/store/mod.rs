//! Declarations and the columnar node registry built from them.
pub mod project;
pub mod registry;
pub mod types;

pub use project::{Args, BodyError, CalcBody, Calculation, Param, Project, Requirement, Scope, Verification};
pub use registry::Registry;
pub use types::{NodeId, NodeKey, NodeKind, NodeMetadata};
