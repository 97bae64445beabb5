//! The read-only outcome of one evaluation pass.

use super::ledger::{EvalError, Ledger, NodeState};
use crate::analysis::DependencyGraph;
use crate::integrity::{FileObservation, IntegritySet};
use crate::path::{ProjectPath, Root, TableKey};
use crate::store::{NodeId, NodeKey, NodeKind};
use crate::value::{ProjectionError, Value};
use serde::Serialize;
use serde_json::{Map, Value as Json};
use std::sync::Arc;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum QueryError {
    #[error("No node at '{0}'")]
    NodeNotFound(String),
    #[error("'{path}' failed: {source}")]
    Failed {
        path: String,
        #[source]
        source: EvalError,
    },
    #[error("Cannot read '{path}': {source}")]
    Projection {
        path: String,
        #[source]
        source: ProjectionError,
    },
    #[error("'{0}' was not evaluated")]
    NotEvaluated(String),
}

/// How a verification's outcome compares with what was expected of it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Verdict {
    Passed,
    Failed,
    ExpectedFailure,
    UnexpectedPass,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Outcome {
    /// The raw verdict: a bool or a table of bools.
    pub value: Value,
    /// True only if every cell of the verdict is true.
    pub passed: bool,
    pub xfail: bool,
}

impl Outcome {
    fn new(value: Value, xfail: bool) -> Self {
        Self { passed: all_true(&value), value, xfail }
    }

    pub fn verdict(&self) -> Verdict {
        match (self.passed, self.xfail) {
            (true, false) => Verdict::Passed,
            (false, false) => Verdict::Failed,
            (false, true) => Verdict::ExpectedFailure,
            (true, true) => Verdict::UnexpectedPass,
        }
    }

    /// Cells of a table verdict that are false.
    pub fn failed_keys(&self) -> Vec<TableKey> {
        match &self.value {
            Value::Table(t) => t.iter().filter(|(_, v)| v.as_bool() != Some(true)).map(|(k, _)| k).collect(),
            _ => Vec::new(),
        }
    }
}

fn all_true(verdict: &Value) -> bool {
    match verdict {
        Value::Bool(b) => *b,
        Value::Table(t) => t.values().iter().all(|v| v.as_bool() == Some(true)),
        _ => false,
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct VerificationSummary {
    pub passed: usize,
    pub failed: usize,
    pub expected_failures: usize,
    pub unexpected_passes: usize,
    /// Verifications that could not run at all.
    pub errored: usize,
}

impl VerificationSummary {
    pub fn total(&self) -> usize {
        self.passed + self.failed + self.expected_failures + self.unexpected_passes + self.errored
    }

    /// No failure, no unexpected pass and no error.
    pub fn is_ok(&self) -> bool {
        self.failed == 0 && self.unexpected_passes == 0 && self.errored == 0
    }
}

#[derive(Debug, Clone)]
pub struct EvaluationResult {
    graph: Arc<DependencyGraph>,
    ledger: Ledger,
    xfail: Vec<bool>,
    integrity: IntegritySet,
    observations: Vec<FileObservation>,
}

impl EvaluationResult {
    pub(crate) fn new(
        graph: Arc<DependencyGraph>,
        ledger: Ledger,
        xfail: Vec<bool>,
        integrity: IntegritySet,
        observations: Vec<FileObservation>,
    ) -> Self {
        Self { graph, ledger, xfail, integrity, observations }
    }

    pub fn graph(&self) -> &DependencyGraph {
        &self.graph
    }

    pub fn ledger(&self) -> &Ledger {
        &self.ledger
    }

    pub fn state(&self, key: &NodeKey) -> Option<&NodeState> {
        self.graph.node_id(key).map(|id| self.ledger.get(id))
    }

    /// Path -> checksum of every external file consumed in this pass.
    pub fn integrity(&self) -> &IntegritySet {
        &self.integrity
    }

    /// Every distinct (file, checksum, recorded checksum) seen, ordered by path.
    pub fn observations(&self) -> &[FileObservation] {
        &self.observations
    }

    fn node_value(&self, key: &NodeKey) -> Result<&Value, QueryError> {
        let id = self.graph.node_id(key).ok_or_else(|| QueryError::NodeNotFound(key.to_string()))?;
        match self.ledger.get(id) {
            NodeState::Succeeded(v) => Ok(v),
            NodeState::Failed(e) => Err(QueryError::Failed { path: key.to_string(), source: e.clone() }),
            NodeState::Pending | NodeState::Running => Err(QueryError::NotEvaluated(key.to_string())),
        }
    }

    /// Any value in the project: a node output or something inside it.
    pub fn get(&self, path: &ProjectPath) -> Result<&Value, QueryError> {
        let value = self.node_value(&NodeKey::producing(path))?;
        value
            .project(path.segments())
            .map_err(|source| QueryError::Projection { path: path.to_string(), source })
    }

    /// A value inside a scope's root model, e.g. `Power::$.solar_panel_area`.
    pub fn get_model_value(&self, path: &ProjectPath) -> Result<&Value, QueryError> {
        if path.root() != &Root::Model {
            return Err(QueryError::NodeNotFound(path.to_string()));
        }
        self.get(path)
    }

    pub fn get_calc_value(&self, scope: &str, calc: &str) -> Result<&Value, QueryError> {
        self.node_value(&NodeKey::calculation(scope, calc))
    }

    pub fn get_verification_outcome(&self, scope: &str, name: &str) -> Result<Outcome, QueryError> {
        let key = NodeKey::verification(scope, name);
        let value = self.node_value(&key)?;
        let xfail = self.graph.node_id(&key).map(|id| self.xfail[id.index()]).unwrap_or(false);
        Ok(Outcome::new(value.clone(), xfail))
    }

    /// Failed nodes in evaluation order.
    pub fn failures(&self) -> Vec<(&NodeKey, &EvalError)> {
        self.graph
            .topological_order()
            .iter()
            .filter_map(|&id| self.ledger.get(id).error().map(|e| (self.graph.key(id), e)))
            .collect()
    }

    pub fn verification_summary(&self) -> VerificationSummary {
        let mut summary = VerificationSummary::default();
        for id in self.verification_ids() {
            match self.ledger.get(id) {
                NodeState::Succeeded(v) => match Outcome::new(v.clone(), self.xfail[id.index()]).verdict() {
                    Verdict::Passed => summary.passed += 1,
                    Verdict::Failed => summary.failed += 1,
                    Verdict::ExpectedFailure => summary.expected_failures += 1,
                    Verdict::UnexpectedPass => summary.unexpected_passes += 1,
                },
                _ => summary.errored += 1,
            }
        }
        summary
    }

    /// Nodes that assume a verification which did not pass in this pass,
    /// each paired with that verification. Expected failures count as unmet.
    pub fn unmet_assumptions(&self) -> Vec<(&NodeKey, &NodeKey)> {
        let mut unmet = Vec::new();
        for &id in self.graph.topological_order() {
            for &assumed in self.graph.assumptions(id) {
                if !self.ledger.get(assumed).value().is_some_and(all_true) {
                    unmet.push((self.graph.key(id), self.graph.key(assumed)));
                }
            }
        }
        unmet
    }

    fn verification_ids(&self) -> impl Iterator<Item = NodeId> + '_ {
        self.graph.node_ids().filter(|&id| self.graph.kind(id) == NodeKind::Verification)
    }

    /// Succeeded values grouped by scope:
    /// `{scope: {model, calc: {name: value}, verification: {name: value}}}`.
    pub fn to_json(&self) -> Result<Json, serde_json::Error> {
        let mut root = Map::new();
        for &id in self.graph.topological_order() {
            let NodeState::Succeeded(value) = self.ledger.get(id) else {
                continue;
            };
            let key = self.graph.key(id);
            let scope = root
                .entry(key.scope.clone())
                .or_insert_with(|| Json::Object(Map::new()));
            let Json::Object(scope) = scope else {
                continue;
            };
            let value = serde_json::to_value(value)?;
            let section = match key.kind {
                NodeKind::Model => {
                    scope.insert("model".into(), value);
                    continue;
                }
                NodeKind::Calculation => "calc",
                NodeKind::Verification => "verification",
            };
            if let Json::Object(entries) = scope.entry(section).or_insert_with(|| Json::Object(Map::new())) {
                entries.insert(key.name.clone(), value);
            }
        }
        Ok(Json::Object(root))
    }
}
