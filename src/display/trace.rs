use crate::analysis::{Binding, DependencyGraph};
use crate::compute::{EvaluationResult, NodeState};
use crate::store::NodeId;
use crate::value::Value;
use std::collections::HashMap;
use std::fmt::Write;

/// Renders the dependency tree below `target`, each node annotated with its
/// computed value or failure cause.
pub fn format_trace(graph: &DependencyGraph, result: &EvaluationResult, target: NodeId) -> String {
    let mut tracer = Tracer { graph, result, visited_at_level: HashMap::new(), output: String::new() };

    if target.index() < graph.len() {
        let _ = writeln!(tracer.output, "TRACE for '{}':", graph.key(target));
        let _ = writeln!(tracer.output, "--------------------------------------------------");
        tracer.trace_node(target, 1, "", None);
    } else {
        let _ = writeln!(tracer.output, "Error: Invalid Node ID {:?}", target);
    }
    tracer.output
}

struct Tracer<'a> {
    graph: &'a DependencyGraph,
    result: &'a EvaluationResult,
    visited_at_level: HashMap<NodeId, usize>,
    output: String,
}

impl<'a> Tracer<'a> {
    fn trace_node(&mut self, node_id: NodeId, level: usize, prefix: &str, via: Option<&Binding>) {
        let graph = self.graph;
        let via_str = via.map(|b| self.format_binding(b)).unwrap_or_default();
        let key = graph.key(node_id);

        if let Some(&first_seen) = self.visited_at_level.get(&node_id) {
            let _ = writeln!(self.output, "{}{} -> (Ref to L{}){}", prefix, key, first_seen, via_str);
            return;
        }
        self.visited_at_level.insert(node_id, level);

        let state = self.format_state(node_id);
        let _ = writeln!(self.output, "{}[L{}] {}{}{}", prefix, level, key, state, via_str);

        let bindings = graph.bindings(node_id);
        let stem = build_child_stem(prefix);
        for (i, binding) in bindings.iter().enumerate() {
            let connector = if i == bindings.len() - 1 { "`--" } else { "|--" };
            let full_prefix = format!("{}{} ", stem, connector);
            self.trace_node(binding.producer, level + 1, &full_prefix, Some(binding));
        }
    }

    fn format_state(&self, id: NodeId) -> String {
        match self.result.ledger().get(id) {
            NodeState::Succeeded(v) => format!(" = {}", format_value(v)),
            NodeState::Failed(e) => format!(" [Err: {}]", e),
            NodeState::Pending | NodeState::Running => " [?]".to_string(),
        }
    }

    /// `  (as heat: .heat_generated = 10888.000)`
    fn format_binding(&self, b: &Binding) -> String {
        let sub: String = b.source.segments().iter().map(|s| s.to_string()).collect();
        if sub.is_empty() {
            return format!("  (as {})", b.param);
        }
        let value = match self.result.get(&b.source) {
            Ok(v) => format_value(v),
            Err(_) => "?".to_string(),
        };
        format!("  (as {}: {} = {})", b.param, sub, value)
    }
}

fn format_value(value: &Value) -> String {
    match value {
        Value::Number(n) => format!("{:.3}", n),
        Value::Bool(b) => b.to_string(),
        Value::Text(s) => format!("{:?}", s),
        Value::Record(r) => {
            let fields: Vec<String> = r.iter().map(|(k, v)| format!("{}: {}", k, format_value(v))).collect();
            format!("{{{}}}", fields.join(", "))
        }
        Value::Table(t) => {
            let cells: Vec<String> = t.iter().map(|(k, v)| format!("{}: {}", k, format_value(v))).collect();
            format!("[{}]", cells.join(", "))
        }
        Value::File(f) => format!("file({})", f.path().display()),
    }
}

fn build_child_stem(current_prefix: &str) -> String {
    current_prefix.replace("`-- ", "    ").replace("|-- ", "|   ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compute::evaluate;
    use crate::store::{Calculation, NodeKey, Project, Scope};
    use crate::testing::satellite;

    #[test]
    fn test_trace_of_cross_scope_calculation() {
        let result = evaluate(&satellite()).unwrap();
        let graph = result.graph();
        let target = graph.node_id(&NodeKey::verification("Thermal", "temperature_within_limits")).unwrap();

        let trace = format_trace(graph, &result, target);
        let lines: Vec<&str> = trace.lines().collect();
        assert_eq!(lines[0], "TRACE for 'Thermal::?temperature_within_limits':");
        assert_eq!(lines[2], "[L1] Thermal::?temperature_within_limits = true");
        assert_eq!(
            lines[3],
            "`-- [L2] Thermal::@calculate_temperature = {temperature: 108.880}  (as temperature: .temperature = 108.880)"
        );
        assert_eq!(
            lines[4],
            "    |-- [L3] Power::@calculate_solar_panel = {heat_generated: 10888.000, power_generated: 2722.000}  (as heat: .heat_generated = 10888.000)"
        );
        assert_eq!(
            lines[5],
            "    |   |-- [L4] Power::$ = {solar_panel_area: 10.000, solar_panel_efficiency: 0.200}  (as area: .solar_panel_area = 10.000)"
        );
        assert_eq!(lines[6], "    |   `-- Power::$ -> (Ref to L4)  (as efficiency: .solar_panel_efficiency = 0.200)");
        assert_eq!(
            lines[7],
            "    `-- [L3] Thermal::$ = {thermal_coefficient: 0.010}  (as coefficient: .thermal_coefficient = 0.010)"
        );
        assert_eq!(lines.len(), 8);
    }

    #[test]
    fn test_trace_shows_failures() {
        let project = Project::new("p").with_scope(
            Scope::new("S")
                .unwrap()
                .model(crate::value::Record::new())
                .calculation(Calculation::new("a", |_| Err("no telemetry".into())))
                .calculation(Calculation::new("b", |_| Ok(Value::from(1.0))).param("a", "@a")),
        );
        let result = evaluate(&project).unwrap();
        let b = result.graph().node_id(&NodeKey::calculation("S", "b")).unwrap();
        let trace = format_trace(result.graph(), &result, b);
        assert!(trace.contains("[L1] S::@b [Err: Upstream failure in: S::@a]"));
        assert!(trace.contains("`-- [L2] S::@a [Err: Body failed: no telemetry]  (as a)"));
    }
}
