use crate::integrity::{Checksum, ChecksumError};
use crate::store::NodeId;
use crate::value::{ProjectionError, TableError, Value, ValueKind};
use std::path::PathBuf;
use thiserror::Error;

/// Why a node did not produce a value. Recorded in the node's slot; never
/// raised out of an evaluation pass.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum EvalError {
    #[error("No validated root model for scope '{scope}'")]
    MissingModel { scope: String },
    #[error("Upstream failure in: {}", failed.join(", "))]
    DependencyFailed { failed: Vec<String> },
    #[error("Parameter '{param}' cannot read '{path}': {source}")]
    Projection {
        param: String,
        path: String,
        #[source]
        source: ProjectionError,
    },
    #[error("Parameter '{param}' expects a {expected} value, got {found}")]
    ParameterKind { param: String, expected: ValueKind, found: ValueKind },
    #[error("Body failed: {message}")]
    Body { message: String },
    /// The body built or read an invalid table.
    #[error("Body failed: {0}")]
    Table(TableError),
    #[error("Output must be {expected}, got {found}")]
    OutputKind { expected: String, found: ValueKind },
    #[error(transparent)]
    Checksum(#[from] ChecksumError),
    #[error("External file '{}' changed: recorded {recorded}, now {actual}", path.display())]
    StaleFile { path: PathBuf, recorded: Checksum, actual: Checksum },
}

/// Per-node lifecycle: `Pending -> Running -> Succeeded | Failed`.
#[derive(Debug, Clone, Default, PartialEq)]
pub enum NodeState {
    #[default]
    Pending,
    Running,
    Succeeded(Value),
    Failed(EvalError),
}

impl NodeState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, NodeState::Succeeded(_) | NodeState::Failed(_))
    }

    pub fn value(&self) -> Option<&Value> {
        match self { NodeState::Succeeded(v) => Some(v), _ => None }
    }

    pub fn error(&self) -> Option<&EvalError> {
        match self { NodeState::Failed(e) => Some(e), _ => None }
    }
}

/// One state slot per node, indexed by `NodeId`.
#[derive(Debug, Clone, Default)]
pub struct Ledger {
    states: Vec<NodeState>,
}

impl Ledger {
    pub fn new(size: usize) -> Self {
        Self { states: vec![NodeState::Pending; size] }
    }

    pub fn len(&self) -> usize { self.states.len() }
    pub fn is_empty(&self) -> bool { self.states.is_empty() }

    pub fn get(&self, node_id: NodeId) -> &NodeState {
        &self.states[node_id.index()]
    }

    pub fn begin(&mut self, node_id: NodeId) {
        let slot = &mut self.states[node_id.index()];
        debug_assert_eq!(*slot, NodeState::Pending, "node {:?} started twice", node_id);
        *slot = NodeState::Running;
    }

    /// Moves a running node to its terminal state.
    pub fn complete(&mut self, node_id: NodeId, outcome: Result<Value, EvalError>) {
        let slot = &mut self.states[node_id.index()];
        debug_assert_eq!(*slot, NodeState::Running, "node {:?} completed without running", node_id);
        *slot = match outcome {
            Ok(v) => NodeState::Succeeded(v),
            Err(e) => NodeState::Failed(e),
        };
    }

    pub fn iter(&self) -> impl Iterator<Item = (NodeId, &NodeState)> {
        self.states.iter().enumerate().map(|(i, s)| (NodeId::new(i), s))
    }

    pub fn all_terminal(&self) -> bool {
        self.states.iter().all(NodeState::is_terminal)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_transitions() {
        let mut ledger = Ledger::new(2);
        assert_eq!(ledger.get(NodeId(0)), &NodeState::Pending);

        ledger.begin(NodeId(0));
        assert_eq!(ledger.get(NodeId(0)), &NodeState::Running);
        ledger.complete(NodeId(0), Ok(Value::from(1.0)));
        assert_eq!(ledger.get(NodeId(0)).value(), Some(&Value::from(1.0)));
        assert!(!ledger.all_terminal());

        ledger.begin(NodeId(1));
        ledger.complete(NodeId(1), Err(EvalError::Body { message: "boom".into() }));
        assert!(ledger.get(NodeId(1)).error().is_some());
        assert!(ledger.all_terminal());
    }
}
