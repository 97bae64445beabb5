//! Static analysis: reference resolution, dependency-graph construction and
//! requirement traceability.
pub mod error;
pub mod graph;
pub mod resolve;
pub mod topology;
pub mod traceability;

pub use error::GraphError;
pub use graph::{build_graph, Binding, DependencyGraph};
pub use resolve::{resolve_reference, resolve_verification, ResolveError};
pub use traceability::{build_report, RequirementStatus, TraceError, TraceabilityReport};
