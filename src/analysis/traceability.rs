//! Requirement traceability.
//!
//! Requirements are declared in scopes and linked to the verifications that
//! back them, to the child requirements they break down into, and to the
//! requirements they depend on. A report walks that structure and rolls each
//! requirement's status up from its own verification results and from every
//! requirement it relies on. The worst status wins.

use super::resolve::resolve_verification;
use super::topology::find_cycle_by;
use crate::compute::{EvaluationResult, NodeState};
use crate::store::{NodeKey, Project, Requirement};
use crate::value::Value;
use log::debug;
use serde::Serialize;
use std::collections::{HashMap, VecDeque};
use std::fmt;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TraceError {
    #[error("Requirement '{id}' is declared in both '{first}' and '{second}'")]
    DuplicateRequirement { id: String, first: String, second: String },
    #[error("Requirement '{requirement}' links unknown requirement '{id}'")]
    UnknownRequirement { requirement: String, id: String },
    #[error("Requirement '{requirement}' cannot be verified by '{reference}': {reason}")]
    InvalidVerification { requirement: String, reference: String, reason: String },
    /// Each requirement relies on the next; the last relies on the first.
    #[error("Circular dependency detected in requirements: {}", render_cycle(cycle))]
    CircularDependency { cycle: Vec<String> },
}

fn render_cycle(cycle: &[String]) -> String {
    match cycle.first() {
        Some(first) => format!("{} -> {}", cycle.join(" -> "), first),
        None => String::new(),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RequirementStatus {
    /// Every verification linked directly to the requirement passed.
    Verified,
    /// No verification of its own, but everything it relies on holds.
    Satisfied,
    NotVerified,
    Failed,
}

impl RequirementStatus {
    /// Failed is 2, not verified is 1, verified and satisfied are 0.
    pub fn severity(self) -> u8 {
        match self {
            RequirementStatus::Failed => 2,
            RequirementStatus::NotVerified => 1,
            RequirementStatus::Verified | RequirementStatus::Satisfied => 0,
        }
    }

    /// The more severe of the two; `self` on a tie.
    pub fn worst(self, other: Self) -> Self {
        if other.severity() > self.severity() { other } else { self }
    }
}

impl fmt::Display for RequirementStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            RequirementStatus::Verified => "VERIFIED",
            RequirementStatus::Satisfied => "SATISFIED",
            RequirementStatus::NotVerified => "NOT_VERIFIED",
            RequirementStatus::Failed => "FAILED",
        };
        f.write_str(s)
    }
}

/// One checked verdict. A table verification yields one per key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct VerificationResult {
    /// e.g. `Power::?power_budget`
    pub verification: String,
    /// The table cell this verdict belongs to, e.g. `nominal`.
    pub key: Option<String>,
    pub passed: bool,
    /// Reported only; expected failures still fail their requirement.
    pub xfail: bool,
}

impl VerificationResult {
    /// `Power::?power_budget[nominal]` for a table cell, the bare
    /// verification otherwise.
    pub fn name(&self) -> String {
        match &self.key {
            Some(key) => format!("{}[{}]", self.verification, key),
            None => self.verification.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TraceEntry {
    pub id: String,
    pub scope: String,
    pub description: String,
    pub status: RequirementStatus,
    /// 0 for a top-level requirement, parent depth + 1 for a child.
    pub depth: usize,
    pub verification_results: Vec<VerificationResult>,
    /// Linked verifications, table cells included once evaluated.
    pub linked_verifications: Vec<String>,
    pub children: Vec<String>,
    pub depends_on: Vec<String>,
}

/// Requirements in pre-order: each top-level requirement followed by its
/// decomposition. A requirement decomposing more than one parent appears
/// under each of them, and is counted each time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TraceabilityReport {
    pub project: String,
    pub entries: Vec<TraceEntry>,
    pub verified: usize,
    pub satisfied: usize,
    pub failed: usize,
    pub not_verified: usize,
}

impl TraceabilityReport {
    pub fn total(&self) -> usize {
        self.entries.len()
    }

    pub fn entry(&self, id: &str) -> Option<&TraceEntry> {
        self.entries.iter().find(|e| e.id == id)
    }
}

/// A requirement with its links resolved to indices.
struct Node<'a> {
    scope: &'a str,
    requirement: &'a Requirement,
    verifications: Vec<(NodeKey, bool)>,
    children: Vec<usize>,
    depends_on: Vec<usize>,
}

/// Traces every requirement in `project`. Without `result` nothing counts as
/// verified yet: only the structure is reported.
pub fn build_report(project: &Project, result: Option<&EvaluationResult>) -> Result<TraceabilityReport, TraceError> {
    let nodes = link(project)?;

    let edges: Vec<Vec<usize>> =
        nodes.iter().map(|n| n.children.iter().chain(&n.depends_on).copied().collect()).collect();
    if let Some(cycle) = find_cycle_by(nodes.len(), |n, i| edges[n].get(i).copied()) {
        let cycle = cycle.into_iter().map(|i| nodes[i].requirement.id.clone()).collect();
        return Err(TraceError::CircularDependency { cycle });
    }

    let results: Vec<Vec<VerificationResult>> = nodes
        .iter()
        .map(|n| n.verifications.iter().flat_map(|(key, xfail)| verdicts(key, *xfail, result)).collect())
        .collect();
    let statuses = roll_up(&nodes, &edges, &results);

    let mut report = TraceabilityReport {
        project: project.name().to_string(),
        entries: Vec::new(),
        verified: 0,
        satisfied: 0,
        failed: 0,
        not_verified: 0,
    };

    let mut is_child = vec![false; nodes.len()];
    nodes.iter().flat_map(|n| &n.children).for_each(|&c| is_child[c] = true);
    let mut stack: Vec<(usize, usize)> = (0..nodes.len()).rev().filter(|&i| !is_child[i]).map(|i| (i, 0)).collect();
    while let Some((i, depth)) = stack.pop() {
        let node = &nodes[i];
        let status = statuses[i];
        match status {
            RequirementStatus::Verified => report.verified += 1,
            RequirementStatus::Satisfied => report.satisfied += 1,
            RequirementStatus::Failed => report.failed += 1,
            RequirementStatus::NotVerified => report.not_verified += 1,
        }
        report.entries.push(TraceEntry {
            id: node.requirement.id.clone(),
            scope: node.scope.to_string(),
            description: node.requirement.description.clone(),
            status,
            depth,
            verification_results: results[i].clone(),
            linked_verifications: linked(&node.verifications, result),
            children: node.children.iter().map(|&c| nodes[c].requirement.id.clone()).collect(),
            depends_on: node.depends_on.iter().map(|&d| nodes[d].requirement.id.clone()).collect(),
        });
        stack.extend(node.children.iter().rev().map(|&c| (c, depth + 1)));
    }

    debug!(
        "traced {} requirements of '{}': {} verified, {} satisfied, {} failed, {} not verified",
        report.total(),
        report.project,
        report.verified,
        report.satisfied,
        report.failed,
        report.not_verified
    );
    Ok(report)
}

fn link(project: &Project) -> Result<Vec<Node<'_>>, TraceError> {
    let declared: Vec<(&str, &Requirement)> = project
        .scopes()
        .iter()
        .flat_map(|s| s.requirements().iter().map(move |r| (s.name(), r)))
        .collect();

    let mut index: HashMap<&str, usize> = HashMap::with_capacity(declared.len());
    for (i, (scope, r)) in declared.iter().enumerate() {
        if let Some(&first) = index.get(r.id.as_str()) {
            return Err(TraceError::DuplicateRequirement {
                id: r.id.clone(),
                first: declared[first].0.to_string(),
                second: scope.to_string(),
            });
        }
        index.insert(&r.id, i);
    }

    declared
        .iter()
        .map(|&(scope, requirement)| {
            let lookup = |id: &String| {
                index.get(id.as_str()).copied().ok_or_else(|| TraceError::UnknownRequirement {
                    requirement: requirement.id.clone(),
                    id: id.clone(),
                })
            };
            let verifications = requirement
                .verified_by
                .iter()
                .map(|reference| find_verification(project, scope, requirement, reference))
                .collect::<Result<_, _>>()?;
            Ok(Node {
                scope,
                requirement,
                verifications,
                children: requirement.decomposed_into.iter().map(lookup).collect::<Result<_, _>>()?,
                depends_on: requirement.depends_on.iter().map(lookup).collect::<Result<_, _>>()?,
            })
        })
        .collect()
}

/// The verification's node key and its xfail flag.
fn find_verification(
    project: &Project,
    scope: &str,
    requirement: &Requirement,
    reference: &str,
) -> Result<(NodeKey, bool), TraceError> {
    let invalid = |reason: String| TraceError::InvalidVerification {
        requirement: requirement.id.clone(),
        reference: reference.to_string(),
        reason,
    };
    let path = resolve_verification(reference, scope).map_err(|e| invalid(e.to_string()))?;
    let key = NodeKey::producing(&path);
    project
        .scope(&key.scope)
        .and_then(|s| s.verifications().iter().find(|v| v.name == key.name))
        .map(|v| (key.clone(), v.xfail))
        .ok_or_else(|| invalid(format!("'{}' is not declared", path)))
}

/// Verdicts of one verification in `result`. A verification that failed to
/// run counts as one failed verdict; one that was never evaluated gives none.
fn verdicts(key: &NodeKey, xfail: bool, result: Option<&EvaluationResult>) -> Vec<VerificationResult> {
    let Some(state) = result.and_then(|r| r.state(key)) else {
        return Vec::new();
    };
    let verdict = |cell: Option<String>, passed: bool| VerificationResult {
        verification: key.to_string(),
        key: cell,
        passed,
        xfail,
    };
    match state {
        NodeState::Succeeded(Value::Table(t)) => {
            t.iter().map(|(k, v)| verdict(Some(k.to_string()), v.as_bool() == Some(true))).collect()
        }
        NodeState::Succeeded(v) => vec![verdict(None, v.as_bool() == Some(true))],
        NodeState::Failed(_) => vec![verdict(None, false)],
        NodeState::Pending | NodeState::Running => Vec::new(),
    }
}

fn linked(verifications: &[(NodeKey, bool)], result: Option<&EvaluationResult>) -> Vec<String> {
    let mut names = Vec::new();
    for (key, _) in verifications {
        let base = key.to_string();
        if let Some(NodeState::Succeeded(Value::Table(t))) = result.and_then(|r| r.state(key)) {
            let cells: Vec<String> = t.iter().map(|(k, _)| format!("{}[{}]", base, k)).collect();
            names.push(base);
            names.extend(cells);
        } else {
            names.push(base);
        }
    }
    names
}

/// Status of every requirement, leaves first. `edges` must be acyclic.
fn roll_up(nodes: &[Node<'_>], edges: &[Vec<usize>], results: &[Vec<VerificationResult>]) -> Vec<RequirementStatus> {
    let mut statuses = vec![RequirementStatus::NotVerified; nodes.len()];
    let mut waiting: Vec<usize> = edges.iter().map(Vec::len).collect();
    let mut relied_on_by: Vec<Vec<usize>> = vec![Vec::new(); nodes.len()];
    for (i, targets) in edges.iter().enumerate() {
        for &t in targets {
            relied_on_by[t].push(i);
        }
    }

    let mut ready: VecDeque<usize> = (0..nodes.len()).filter(|&i| waiting[i] == 0).collect();
    while let Some(i) = ready.pop_front() {
        let own = own_status(nodes[i].requirement, &results[i]);
        statuses[i] = edges[i].iter().fold(own, |acc, &t| acc.worst(statuses[t]));
        for &r in &relied_on_by[i] {
            waiting[r] -= 1;
            if waiting[r] == 0 {
                ready.push_back(r);
            }
        }
    }
    statuses
}

fn own_status(requirement: &Requirement, results: &[VerificationResult]) -> RequirementStatus {
    if !results.is_empty() {
        if results.iter().all(|r| r.passed) {
            RequirementStatus::Verified
        } else {
            RequirementStatus::Failed
        }
    } else if requirement.verified_by.is_empty()
        && (!requirement.decomposed_into.is_empty() || !requirement.depends_on.is_empty())
    {
        RequirementStatus::Satisfied
    } else {
        RequirementStatus::NotVerified
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compute::evaluate;
    use crate::store::{Args, Scope, Verification};
    use crate::value::{EnumDomain, KeySpace, Record, Table};
    use rstest::rstest;

    fn holds(v: bool) -> Verification {
        Verification::new(if v { "holds" } else { "breaks" }, move |_: &Args| Ok(Value::Bool(v)))
    }

    /// Power's budget fails in nominal mode; everything else passes.
    fn mission() -> Project {
        let modes = KeySpace::single(EnumDomain::new("Mode", ["nominal", "safe"]).unwrap()).unwrap();
        let consumption =
            Table::from_entries(modes, [("nominal", Value::from(30.0)), ("safe", Value::from(5.0))]).unwrap();
        let power = Scope::new("Power")
            .unwrap()
            .model(Record::new().with("consumption", consumption).with("generation", 20.0))
            .verification(
                Verification::new("power_budget", |a: &Args| {
                    let generation = a.number("generation")?;
                    Ok(a.table("consumption")?
                        .map(|_, v| Ok::<_, &str>(Value::Bool(v.as_number().is_some_and(|c| c <= generation))))?
                        .into())
                })
                .param("consumption", "$.consumption")
                .param("generation", "$.generation"),
            )
            .verification(Verification::new("bus_voltage", |_: &Args| Ok(Value::Bool(true))))
            .requirement(Requirement::new("PWR-1", "Power budget closes in every mode").verified_by("?power_budget"))
            .requirement(Requirement::new("PWR-2", "Bus voltage is regulated").verified_by("?bus_voltage"));
        let thermal = Scope::new("Thermal")
            .unwrap()
            .model(Record::new())
            .verification(Verification::new("radiator_sized", |_: &Args| Ok(Value::Bool(true))))
            .requirement(
                Requirement::new("THM-1", "Radiator rejects dissipated heat")
                    .verified_by("?radiator_sized")
                    .depends_on("PWR-2"),
            )
            .requirement(
                Requirement::new("SYS-1", "Spacecraft survives every mode")
                    .decomposed_into("PWR-1")
                    .decomposed_into("THM-1"),
            )
            .requirement(Requirement::new("SYS-2", "Spacecraft is operable").depends_on("THM-1"))
            .requirement(Requirement::new("OPS-1", "Operations manual is written"));
        Project::new("mission").with_scope(power).with_scope(thermal)
    }

    fn rows(report: &TraceabilityReport) -> Vec<(&str, usize, RequirementStatus)> {
        report.entries.iter().map(|e| (e.id.as_str(), e.depth, e.status)).collect()
    }

    #[test]
    fn test_statuses_roll_up_from_evaluation() {
        use RequirementStatus::*;

        let project = mission();
        let result = evaluate(&project).unwrap();
        let report = build_report(&project, Some(&result)).unwrap();

        assert_eq!(
            rows(&report),
            vec![
                ("PWR-2", 0, Verified),
                ("SYS-1", 0, Failed),
                ("PWR-1", 1, Failed),
                ("THM-1", 1, Verified),
                ("SYS-2", 0, Satisfied),
                ("OPS-1", 0, NotVerified),
            ]
        );
        assert_eq!((report.verified, report.satisfied, report.failed, report.not_verified), (2, 1, 2, 1));
        assert_eq!(report.total(), 6);

        let budget = report.entry("PWR-1").unwrap();
        assert_eq!(budget.scope, "Power");
        assert_eq!(
            budget.linked_verifications,
            vec!["Power::?power_budget", "Power::?power_budget[nominal]", "Power::?power_budget[safe]"]
        );
        let verdicts: Vec<(String, bool)> = budget.verification_results.iter().map(|r| (r.name(), r.passed)).collect();
        assert_eq!(
            verdicts,
            vec![("Power::?power_budget[nominal]".into(), false), ("Power::?power_budget[safe]".into(), true)]
        );
        assert_eq!(report.entry("SYS-1").unwrap().children, vec!["PWR-1", "THM-1"]);
    }

    #[test]
    fn test_without_evaluation_nothing_is_verified() {
        let report = build_report(&mission(), None).unwrap();
        assert_eq!(report.not_verified, 6);
        assert!(report.entries.iter().all(|e| e.verification_results.is_empty()));
        assert_eq!(report.entry("PWR-1").unwrap().linked_verifications, vec!["Power::?power_budget"]);
        assert_eq!(report.entry("SYS-1").unwrap().depth, 0);
    }

    #[test]
    fn test_failed_and_expected_failures_count_against_the_requirement() {
        let project = Project::new("p").with_scope(
            Scope::new("S")
                .unwrap()
                .model(Record::new())
                .verification(holds(false).xfail())
                .verification(holds(true))
                .verification(Verification::new("broken", |_: &Args| Err("no data".into())))
                .requirement(Requirement::new("KNOWN", "known issue").verified_by("?breaks"))
                .requirement(Requirement::new("ERR", "errored").verified_by("?holds").verified_by("S::?broken"))
                .requirement(Requirement::new("OK", "passes").verified_by("S::?holds")),
        );
        let result = evaluate(&project).unwrap();
        let report = build_report(&project, Some(&result)).unwrap();

        let known = report.entry("KNOWN").unwrap();
        assert_eq!(known.status, RequirementStatus::Failed);
        assert!(known.verification_results[0].xfail);
        let errored = report.entry("ERR").unwrap();
        assert_eq!(errored.status, RequirementStatus::Failed);
        assert_eq!(errored.verification_results.len(), 2);
        assert_eq!(report.entry("OK").unwrap().status, RequirementStatus::Verified);
    }

    #[test]
    fn test_dependency_cycle_is_rejected() {
        let project = Project::new("p").with_scope(
            Scope::new("S")
                .unwrap()
                .requirement(Requirement::new("a", "first").depends_on("b"))
                .requirement(Requirement::new("b", "second").depends_on("a")),
        );
        let err = build_report(&project, None).unwrap_err();
        assert_eq!(err, TraceError::CircularDependency { cycle: vec!["a".into(), "b".into()] });
        assert_eq!(err.to_string(), "Circular dependency detected in requirements: a -> b -> a");

        // A child depending on its own parent is a loop too.
        let project = Project::new("p").with_scope(
            Scope::new("S")
                .unwrap()
                .requirement(Requirement::new("parent", "p").decomposed_into("child"))
                .requirement(Requirement::new("child", "c").depends_on("parent")),
        );
        assert!(matches!(build_report(&project, None), Err(TraceError::CircularDependency { .. })));
    }

    #[test]
    fn test_duplicate_ids_are_rejected_across_scopes() {
        let project = Project::new("p")
            .with_scope(Scope::new("Power").unwrap().requirement(Requirement::new("REQ-1", "a")))
            .with_scope(Scope::new("Thermal").unwrap().requirement(Requirement::new("REQ-1", "b")));
        assert_eq!(
            build_report(&project, None).unwrap_err(),
            TraceError::DuplicateRequirement { id: "REQ-1".into(), first: "Power".into(), second: "Thermal".into() }
        );
    }

    #[rstest]
    #[case::unknown_child(Requirement::new("R", "r").decomposed_into("R-9"))]
    #[case::unknown_dependency(Requirement::new("R", "r").depends_on("R-9"))]
    #[case::undeclared_verification(Requirement::new("R", "r").verified_by("?missing"))]
    #[case::not_a_verification(Requirement::new("R", "r").verified_by("$.mass"))]
    #[case::unknown_scope(Requirement::new("R", "r").verified_by("Orbit::?holds"))]
    fn test_broken_links_are_rejected(#[case] requirement: Requirement) {
        let project = Project::new("p").with_scope(Scope::new("S").unwrap().verification(holds(true)).requirement(requirement));
        assert!(matches!(
            build_report(&project, None),
            Err(TraceError::UnknownRequirement { .. } | TraceError::InvalidVerification { .. })
        ));
    }

    #[rstest]
    #[case(RequirementStatus::Verified, RequirementStatus::Failed, RequirementStatus::Failed)]
    #[case(RequirementStatus::NotVerified, RequirementStatus::Failed, RequirementStatus::Failed)]
    #[case(RequirementStatus::Failed, RequirementStatus::NotVerified, RequirementStatus::Failed)]
    #[case(RequirementStatus::Satisfied, RequirementStatus::NotVerified, RequirementStatus::NotVerified)]
    #[case(RequirementStatus::Satisfied, RequirementStatus::Verified, RequirementStatus::Satisfied)]
    #[case(RequirementStatus::Verified, RequirementStatus::Satisfied, RequirementStatus::Verified)]
    fn test_worst_status_wins(
        #[case] own: RequirementStatus,
        #[case] other: RequirementStatus,
        #[case] expected: RequirementStatus,
    ) {
        assert_eq!(own.worst(other), expected);
    }

    #[test]
    fn test_report_serializes() {
        let project = mission();
        let result = evaluate(&project).unwrap();
        let json = serde_json::to_value(build_report(&project, Some(&result)).unwrap()).unwrap();
        assert_eq!(json["project"], "mission");
        assert_eq!(json["entries"][0]["status"], "verified");
        assert_eq!(json["failed"], 2);
    }
}
