//! Executes a dependency graph.
//!
//! Nodes run in topological order, each exactly once. A node whose producers
//! did not all succeed fails with `DependencyFailed` without running its body.
//! With `parallel` enabled, the nodes of one wave run on the rayon pool and
//! their results are merged in wave order once the whole wave completes.

use super::ledger::{EvalError, Ledger, NodeState};
use super::result::EvaluationResult;
use crate::analysis::{build_graph, DependencyGraph, GraphError};
use crate::config::EngineConfig;
use crate::integrity::{ChecksumCache, FileObservation, IntegritySet};
use crate::store::{Args, BodyError, CalcBody, NodeId, NodeKind, Project};
use crate::value::{Value, ValueKind};
use log::{debug, info};
use rayon::prelude::*;
use std::sync::Arc;

/// What a node's output must look like.
#[derive(Clone, Copy)]
enum OutputCheck {
    Kind(ValueKind),
    Verdict,
}

/// Per-node evaluation outcome plus the files it read.
type NodeRun = (Result<Value, EvalError>, Vec<FileObservation>);

pub struct Engine<'p> {
    project: &'p Project,
    graph: Arc<DependencyGraph>,
    config: EngineConfig,
}

impl<'p> Engine<'p> {
    /// Builds the project's graph. Structural errors surface here, before any
    /// node runs.
    pub fn new(project: &'p Project, config: EngineConfig) -> Result<Self, GraphError> {
        let graph = build_graph(project)?;
        Ok(Self { project, graph: Arc::new(graph), config })
    }

    pub fn graph(&self) -> &DependencyGraph {
        &self.graph
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Runs one full evaluation pass. Per-node failures are recorded in the
    /// result, never returned.
    pub fn run(&self) -> EvaluationResult {
        info!(
            "evaluating project '{}': {} nodes ({})",
            self.project.name(),
            self.graph.len(),
            if self.config.parallel { "parallel" } else { "sequential" }
        );

        let cache = ChecksumCache::new(self.config.checksum_buffer_size);
        let mut ledger = Ledger::new(self.graph.len());
        let mut observations = Vec::new();

        if self.config.parallel {
            for wave in self.graph.waves() {
                wave.iter().for_each(|&id| ledger.begin(id));
                let runs: Vec<(NodeId, NodeRun)> = wave
                    .par_iter()
                    .map(|&id| (id, self.evaluate_node(id, &ledger, &cache)))
                    .collect();
                for (id, (outcome, mut seen)) in runs {
                    self.complete(&mut ledger, id, outcome);
                    observations.append(&mut seen);
                }
            }
        } else {
            for &id in self.graph.topological_order() {
                ledger.begin(id);
                let (outcome, mut seen) = self.evaluate_node(id, &ledger, &cache);
                self.complete(&mut ledger, id, outcome);
                observations.append(&mut seen);
            }
        }

        observations.sort();
        observations.dedup_by(|a, b| a.path == b.path && a.checksum == b.checksum && a.recorded == b.recorded);
        let mut integrity = IntegritySet::new();
        for obs in &observations {
            integrity.insert(obs.path.to_string_lossy(), obs.checksum.clone());
        }

        let xfail = self
            .graph
            .node_ids()
            .map(|id| {
                let meta = self.graph.meta(id);
                meta.key.kind == NodeKind::Verification
                    && self.project.scopes()[meta.scope_index as usize].verifications()[meta.order as usize].xfail
            })
            .collect();

        let result = EvaluationResult::new(self.graph.clone(), ledger, xfail, integrity, observations);
        info!(
            "evaluation finished: {} nodes, {} failed, {} external files",
            self.graph.len(),
            result.failures().len(),
            result.integrity().len()
        );
        result
    }

    fn complete(&self, ledger: &mut Ledger, id: NodeId, outcome: Result<Value, EvalError>) {
        match &outcome {
            Ok(_) => debug!("{}: succeeded", self.graph.key(id)),
            Err(e) => debug!("{}: failed: {}", self.graph.key(id), e),
        }
        ledger.complete(id, outcome);
    }

    fn evaluate_node(&self, id: NodeId, ledger: &Ledger, cache: &ChecksumCache) -> NodeRun {
        let meta = self.graph.meta(id);
        let scope = &self.project.scopes()[meta.scope_index as usize];
        let order = meta.order as usize;
        match meta.key.kind {
            NodeKind::Model => {
                let value = scope
                    .model_value()
                    .cloned()
                    .ok_or_else(|| EvalError::MissingModel { scope: scope.name().to_string() });
                (value, Vec::new())
            }
            NodeKind::Calculation => {
                let calc = &scope.calculations()[order];
                self.run_body(id, calc.body.as_ref(), OutputCheck::Kind(calc.output), ledger, cache)
            }
            NodeKind::Verification => {
                let verification = &scope.verifications()[order];
                self.run_body(id, verification.body.as_ref(), OutputCheck::Verdict, ledger, cache)
            }
        }
    }

    fn run_body(
        &self,
        id: NodeId,
        body: &dyn CalcBody,
        check: OutputCheck,
        ledger: &Ledger,
        cache: &ChecksumCache,
    ) -> NodeRun {
        let mut seen = Vec::new();
        let outcome = self
            .gather_args(id, ledger, cache, &mut seen)
            .and_then(|args| body.call(&args).map_err(body_failure))
            .and_then(|value| check_output(check, value));
        (outcome, seen)
    }

    fn gather_args(
        &self,
        id: NodeId,
        ledger: &Ledger,
        cache: &ChecksumCache,
        seen: &mut Vec<FileObservation>,
    ) -> Result<Args, EvalError> {
        let bindings = self.graph.bindings(id);

        // 1. Every producer must have succeeded.
        let mut failed: Vec<String> = Vec::new();
        for b in bindings {
            if !matches!(ledger.get(b.producer), NodeState::Succeeded(_)) {
                let name = self.graph.key(b.producer).to_string();
                if !failed.contains(&name) {
                    failed.push(name);
                }
            }
        }
        if !failed.is_empty() {
            return Err(EvalError::DependencyFailed { failed });
        }

        // 2. Project each argument out of its producer's value.
        let mut entries = Vec::with_capacity(bindings.len());
        for b in bindings {
            let NodeState::Succeeded(full) = ledger.get(b.producer) else {
                continue;
            };
            let value = full.project(b.source.segments()).map_err(|source| EvalError::Projection {
                param: b.param.clone(),
                path: b.source.to_string(),
                source,
            })?;
            if !b.kind.accepts(value) {
                return Err(EvalError::ParameterKind { param: b.param.clone(), expected: b.kind, found: value.kind() });
            }

            // 3. Checksum every external file the argument carries.
            for file in value.file_refs() {
                let checksum = cache.checksum(file)?;
                let obs = FileObservation::observe(file, checksum);
                let stale = obs.is_stale();
                seen.push(obs.clone());
                if stale && self.config.fail_on_stale_files {
                    return Err(EvalError::StaleFile {
                        path: obs.path,
                        recorded: obs.recorded.unwrap_or_else(|| obs.checksum.clone()),
                        actual: obs.checksum,
                    });
                }
            }
            entries.push((b.param.clone(), value.clone()));
        }
        Ok(Args::new(entries))
    }
}

fn body_failure(e: BodyError) -> EvalError {
    match e {
        BodyError::Message(message) => EvalError::Body { message },
        BodyError::Table(e) => EvalError::Table(e),
    }
}

fn check_output(check: OutputCheck, value: Value) -> Result<Value, EvalError> {
    let ok = match check {
        OutputCheck::Kind(kind) => kind.accepts(&value),
        OutputCheck::Verdict => match &value {
            Value::Bool(_) => true,
            Value::Table(t) => t.values().iter().all(|v| matches!(v, Value::Bool(_))),
            _ => false,
        },
    };
    if ok {
        return Ok(value);
    }
    let expected = match check {
        OutputCheck::Kind(kind) => kind.to_string(),
        OutputCheck::Verdict => "bool or a table of bool".to_string(),
    };
    Err(EvalError::OutputKind { expected, found: value.kind() })
}

/// Builds the graph of `project` and evaluates it with default settings.
pub fn evaluate(project: &Project) -> Result<EvaluationResult, GraphError> {
    evaluate_with(project, &EngineConfig::default())
}

pub fn evaluate_with(project: &Project, config: &EngineConfig) -> Result<EvaluationResult, GraphError> {
    Ok(Engine::new(project, config.clone())?.run())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compute::{QueryError, Verdict};
    use crate::integrity::Checksum;
    use crate::path::{ProjectPath, TableKey};
    use crate::store::{Calculation, NodeKey, Param, Scope, Verification};
    use crate::testing::satellite;
    use crate::value::{EnumDomain, FileRef, KeySpace, Record, Table, TableError};
    use std::io::Write;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn number(result: &EvaluationResult, path: &str) -> f64 {
        result.get(&ProjectPath::parse(path).unwrap()).unwrap().as_number().unwrap()
    }

    #[test]
    fn test_satellite_scenario() {
        let result = evaluate(&satellite()).unwrap();
        assert!(result.failures().is_empty());
        assert_eq!(number(&result, "Power::@calculate_solar_panel.power_generated"), 2722.0);
        assert_eq!(number(&result, "Power::@calculate_solar_panel.heat_generated"), 10888.0);
        assert_eq!(number(&result, "Thermal::@calculate_temperature.temperature"), 108.88);

        let outcome = result.get_verification_outcome("Thermal", "temperature_within_limits").unwrap();
        assert_eq!(outcome.verdict(), Verdict::Passed);
    }

    #[test]
    fn test_failure_propagates_without_calling_dependents() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let project = Project::new("p").with_scope(
            Scope::new("S")
                .unwrap()
                .model(Record::new().with("x", 1.0))
                .calculation(Calculation::new("a", |_| Err("sensor table missing".into())).param("x", "$.x"))
                .calculation(Calculation::new("b", move |_| {
                    counter.fetch_add(1, Ordering::SeqCst);
                    panic!("body of a dependent must not run");
                }).param("a", "@a"))
                .calculation(Calculation::new("c", |_| panic!("never")).param("b", "@b.value"))
                .verification(Verification::new("v", |_| panic!("never")).param("c", "@c")),
        );

        let result = evaluate(&project).unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 0);

        assert_eq!(
            result.get_calc_value("S", "a").unwrap_err(),
            QueryError::Failed {
                path: "S::@a".into(),
                source: EvalError::Body { message: "sensor table missing".into() }
            }
        );
        let QueryError::Failed { source, .. } = result.get_calc_value("S", "c").unwrap_err() else {
            panic!("expected a recorded failure");
        };
        assert_eq!(source, EvalError::DependencyFailed { failed: vec!["S::@b".into()] });
        assert!(result.get_verification_outcome("S", "v").is_err());
        assert_eq!(result.failures().len(), 4);
    }

    #[test]
    fn test_projection_failure_blames_the_consumer() {
        let project = Project::new("p").with_scope(
            Scope::new("S")
                .unwrap()
                .model(Record::new().with("x", 1.0))
                .calculation(Calculation::new("a", |_| Ok(Record::new().with("y", 2.0).into())))
                .calculation(Calculation::new("b", |a| Ok(a.get("v")?.clone())).param("v", "@a.z")),
        );
        let result = evaluate(&project).unwrap();
        assert!(result.get_calc_value("S", "a").is_ok());
        let QueryError::Failed { source, .. } = result.get_calc_value("S", "b").unwrap_err() else {
            panic!("expected a recorded failure");
        };
        assert!(matches!(source, EvalError::Projection { ref param, .. } if param == "v"));
    }

    #[test]
    fn test_missing_model_fails_the_model_node() {
        let project = Project::new("p")
            .with_scope(Scope::new("S").unwrap().calculation(Calculation::new("a", |_| Ok(Value::from(1.0))).param("x", "$.x")));
        let result = evaluate(&project).unwrap();
        assert!(matches!(
            result.get_model_value(&ProjectPath::model("S").unwrap()),
            Err(QueryError::Failed { source: EvalError::MissingModel { .. }, .. })
        ));
        assert!(result.get_calc_value("S", "a").is_err());
    }

    #[test]
    fn test_kinds_are_enforced() {
        let project = Project::new("p").with_scope(
            Scope::new("S")
                .unwrap()
                .model(Record::new().with("x", 1.0).with("label", "panel"))
                .calculation(Calculation::new("wrong_output", |_| Ok(Value::from("text"))).output(ValueKind::Number))
                .calculation(
                    Calculation::new("typed", |a| Ok(Value::from(a.number("x")?)))
                        .with_param(Param::new("x", "$.label").of_kind(ValueKind::Number)),
                )
                .verification(Verification::new("not_a_verdict", |_| Ok(Value::from(1.0)))),
        );
        let result = evaluate(&project).unwrap();
        let failure = |calc: &str| match result.get_calc_value("S", calc) {
            Err(QueryError::Failed { source, .. }) => source,
            other => panic!("unexpected: {other:?}"),
        };
        assert!(matches!(failure("wrong_output"), EvalError::OutputKind { .. }));
        assert!(matches!(failure("typed"), EvalError::ParameterKind { found: ValueKind::Text, .. }));
        assert!(result.get_verification_outcome("S", "not_a_verdict").is_err());
    }

    #[test]
    fn test_table_verdicts() {
        let modes = KeySpace::single(EnumDomain::new("Mode", ["nominal", "safe"]).unwrap()).unwrap();
        let budget = Table::from_entries(modes, [("nominal", Value::from(30.0)), ("safe", Value::from(5.0))]).unwrap();
        let project = Project::new("p").with_scope(
            Scope::new("Power")
                .unwrap()
                .model(Record::new().with("consumption", budget).with("generation", 20.0))
                .verification(
                    Verification::new("power_budget", |a| {
                        let generation = a.number("generation")?;
                        Ok(a.table("consumption")?.map(|_, v| match v.as_number() {
                            Some(c) => Ok(Value::Bool(c <= generation)),
                            None => Err("consumption must be numeric"),
                        })?.into())
                    })
                    .param("consumption", "$.consumption")
                    .param("generation", "$.generation")
                    .xfail(),
                ),
        );
        let result = evaluate(&project).unwrap();
        let outcome = result.get_verification_outcome("Power", "power_budget").unwrap();
        assert!(!outcome.passed);
        assert_eq!(outcome.failed_keys(), vec![TableKey::single("nominal").unwrap()]);
        assert_eq!(outcome.verdict(), Verdict::ExpectedFailure);

        let summary = result.verification_summary();
        assert_eq!(summary.expected_failures, 1);
        assert!(summary.is_ok());
    }

    fn file_project(path: &std::path::Path, recorded: Option<Checksum>) -> Project {
        let mut file = FileRef::new(path);
        if let Some(sum) = recorded {
            file = file.with_checksum(sum);
        }
        Project::new("p").with_scope(
            Scope::new("Thermal")
                .unwrap()
                .model(Record::new().with("coefficients", file))
                .calculation(Calculation::new("load", |a| Ok(Value::from(a.file("f")?.path().to_string_lossy().to_string()))).param("f", "$.coefficients"))
                .calculation(Calculation::new("load_again", |_| Ok(Value::from(true))).param("f", "$.coefficients")),
        )
    }

    #[test]
    fn test_checksums_are_stable_and_track_edits() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(b"k = 0.01\n").unwrap();
        let project = file_project(file.path(), None);
        let key = file.path().to_string_lossy().to_string();

        let first = evaluate(&project).unwrap();
        let second = evaluate(&project).unwrap();
        assert_eq!(first.integrity().len(), 1);
        assert_eq!(first.integrity(), second.integrity());
        assert_eq!(first.observations().len(), 1);

        std::fs::write(file.path(), b"k = 0.02\n").unwrap();
        let third = evaluate(&project).unwrap();
        assert_ne!(first.integrity().get(&key), third.integrity().get(&key));
        assert_eq!(third.integrity().compare(first.integrity()).changed, vec![key]);
    }

    #[test]
    fn test_stale_files_warn_or_fail() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(b"v2").unwrap();
        let project = file_project(file.path(), Some(Checksum::of_bytes(b"v1")));

        let lenient = evaluate(&project).unwrap();
        assert!(lenient.failures().is_empty());
        assert!(lenient.observations()[0].is_stale());

        let strict = EngineConfig { fail_on_stale_files: true, ..EngineConfig::default() };
        let result = evaluate_with(&project, &strict).unwrap();
        assert!(matches!(
            result.get_calc_value("Thermal", "load"),
            Err(QueryError::Failed { source: EvalError::StaleFile { .. }, .. })
        ));
    }

    #[test]
    fn test_missing_file_fails_the_consumer() {
        let dir = tempfile::tempdir().unwrap();
        let project = file_project(&dir.path().join("absent.csv"), None);
        let result = evaluate(&project).unwrap();
        assert!(result.get_model_value(&ProjectPath::model("Thermal").unwrap()).is_ok());
        assert!(matches!(
            result.get_calc_value("Thermal", "load"),
            Err(QueryError::Failed { source: EvalError::Checksum(_), .. })
        ));
    }

    #[test]
    fn test_incomplete_table_keeps_its_structure() {
        let project = Project::new("p").with_scope(
            Scope::new("Attitude").unwrap().model(Record::new()).calculation(Calculation::new("inertia", |_| {
                let axes = KeySpace::single(EnumDomain::new("Axis", ["x", "y", "z"])?)?;
                Ok(Table::from_entries(axes, [("x", Value::from(1.2)), ("y", Value::from(0.9))])?.into())
            })),
        );
        let result = evaluate(&project).unwrap();
        let NodeState::Failed(error) = result.state(&NodeKey::calculation("Attitude", "inertia")).unwrap() else {
            panic!("expected a recorded failure");
        };
        assert_eq!(error, &EvalError::Table(TableError::IncompleteTable { missing: vec!["z".into()] }));
        assert_eq!(error.to_string(), "Body failed: Table is missing keys: z");
    }

    #[test]
    fn test_parallel_matches_sequential() {
        let parallel = EngineConfig { parallel: true, ..EngineConfig::default() };
        let a = evaluate(&satellite()).unwrap();
        let b = evaluate_with(&satellite(), &parallel).unwrap();
        assert_eq!(a.to_json().unwrap(), b.to_json().unwrap());

        // Failures, file reads and table verdicts spread over several waves.
        let dir = tempfile::tempdir().unwrap();
        let coefficients = dir.path().join("coefficients.csv");
        std::fs::write(&coefficients, b"k = 0.01\n").unwrap();
        let modes = KeySpace::single(EnumDomain::new("Mode", ["nominal", "safe"]).unwrap()).unwrap();
        let budget = Table::from_entries(modes, [("nominal", Value::from(30.0)), ("safe", Value::from(5.0))]).unwrap();
        let mut thermal = Scope::new("Thermal")
            .unwrap()
            .model(
                Record::new()
                    .with("coefficients", FileRef::new(&coefficients).with_checksum(Checksum::of_bytes(b"old")))
                    .with("missing", FileRef::new(dir.path().join("absent.csv")))
                    .with("budget", budget),
            )
            .calculation(Calculation::new("sensor", |_| Err("no telemetry".into())))
            .calculation(Calculation::new("missing", |_| Ok(Value::from(0.0))).param("f", "$.missing"))
            .verification(
                Verification::new("budget_ok", |a| {
                    Ok(a.table("budget")?.map(|_, v| Ok::<_, &str>(Value::Bool(v.as_number() < Some(10.0))))?.into())
                })
                .param("budget", "$.budget"),
            );
        for i in 0..8 {
            let load = Calculation::new(format!("load_{}", i), |a| Ok(Value::from(a.file("f")?.path().is_absolute())))
                .param("f", "$.coefficients");
            let fused = Calculation::new(format!("fused_{}", i), |_| Ok(Value::from(1.0)))
                .param("s", "@sensor")
                .param("l", format!("@load_{}", i));
            thermal = thermal.calculation(load).calculation(fused);
        }
        let project = Project::new("p").with_scope(thermal);

        let a = evaluate(&project).unwrap();
        let b = evaluate_with(&project, &parallel).unwrap();
        assert_eq!(a.failures().len(), 10);
        assert_eq!(a.failures(), b.failures());
        assert_eq!(a.to_json().unwrap(), b.to_json().unwrap());
        assert_eq!(a.integrity(), b.integrity());
        assert_eq!(a.observations(), b.observations());
        assert!(b.observations()[0].is_stale());
        assert_eq!(
            a.get_verification_outcome("Thermal", "budget_ok").unwrap(),
            b.get_verification_outcome("Thermal", "budget_ok").unwrap()
        );
    }

    #[test]
    fn test_structural_errors_stop_before_evaluation() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let project = Project::new("p").with_scope(
            Scope::new("S")
                .unwrap()
                .calculation(Calculation::new("a", move |_| {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Ok(Value::from(1.0))
                }))
                .calculation(Calculation::new("b", |_| Ok(Value::from(1.0))).param("x", "@c"))
                .calculation(Calculation::new("c", |_| Ok(Value::from(1.0))).param("x", "@b")),
        );
        assert!(matches!(evaluate(&project), Err(GraphError::CyclicDependency { .. })));
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }
}
