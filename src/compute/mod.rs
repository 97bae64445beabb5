//! Evaluation of a built dependency graph.
pub mod engine;
pub mod ledger;
pub mod result;

pub use engine::{evaluate, evaluate_with, Engine};
pub use ledger::{EvalError, Ledger, NodeState};
pub use result::{EvaluationResult, Outcome, QueryError, Verdict, VerificationSummary};
