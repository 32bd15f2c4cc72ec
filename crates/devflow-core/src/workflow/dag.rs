//! Step graph analysis.
//!
//! Two edge sets matter: `connections.inputs` (a step waits for these) and
//! `connections.outputs` (a finished step enqueues these). Input edges must be
//! acyclic or the steps on the cycle can never become ready. Output edges
//! decide which steps can be reached from the roots at all.

use std::collections::{HashMap, HashSet};

use devflow_types::workflow::{Workflow, WorkflowStep};
use petgraph::algo::toposort;
use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::visit::Dfs;

use super::definition::WorkflowError;

// ---------------------------------------------------------------------------
// Input graph
// ---------------------------------------------------------------------------

/// Verify that input dependencies form a DAG.
///
/// Unknown input references are ignored here; structural validation reports
/// them separately.
pub fn check_input_cycles(steps: &[WorkflowStep]) -> Result<(), WorkflowError> {
    let (graph, _index) = build_graph(steps, |step| {
        step.connections
            .inputs
            .iter()
            .map(|input| (input.as_str(), step.id.as_str()))
            .collect()
    });

    toposort(&graph, None).map_err(|cycle| {
        let node_id = graph[cycle.node_id()];
        WorkflowError::CycleDetected(format!("input cycle involving step '{node_id}'"))
    })?;

    Ok(())
}

/// Map from a step ID to the steps that list it as an input.
pub fn dependents(steps: &[WorkflowStep]) -> HashMap<&str, Vec<&str>> {
    let mut map: HashMap<&str, Vec<&str>> = HashMap::new();
    for step in steps {
        for input in &step.connections.inputs {
            map.entry(input.as_str()).or_default().push(step.id.as_str());
        }
    }
    map
}

// ---------------------------------------------------------------------------
// Output graph
// ---------------------------------------------------------------------------

/// Steps that no chain of output connections from a root step can enqueue.
///
/// Returned in declaration order.
pub fn unreachable_steps(workflow: &Workflow) -> Vec<&str> {
    let (graph, index) = build_graph(&workflow.steps, |step| {
        step.connections
            .outputs
            .iter()
            .map(|conn| (step.id.as_str(), conn.target_step_id.as_str()))
            .collect()
    });

    let mut reached: HashSet<NodeIndex> = HashSet::new();
    for root in workflow.root_steps() {
        let Some(&start) = index.get(root.id.as_str()) else {
            continue;
        };
        let mut dfs = Dfs::new(&graph, start);
        while let Some(node) = dfs.next(&graph) {
            reached.insert(node);
        }
    }

    workflow
        .steps
        .iter()
        .filter(|s| {
            index
                .get(s.id.as_str())
                .is_none_or(|idx| !reached.contains(idx))
        })
        .map(|s| s.id.as_str())
        .collect()
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// Build a graph with one node per step and the edges produced by `edges`.
///
/// Edges naming an unknown step are dropped. Duplicate step IDs keep the
/// first node.
fn build_graph<'a, F>(
    steps: &'a [WorkflowStep],
    edges: F,
) -> (DiGraph<&'a str, ()>, HashMap<&'a str, NodeIndex>)
where
    F: Fn(&'a WorkflowStep) -> Vec<(&'a str, &'a str)>,
{
    let mut graph = DiGraph::<&str, ()>::new();
    let mut index: HashMap<&str, NodeIndex> = HashMap::new();
    for step in steps {
        index
            .entry(step.id.as_str())
            .or_insert_with(|| graph.add_node(step.id.as_str()));
    }

    for step in steps {
        for (from, to) in edges(step) {
            if let (Some(&a), Some(&b)) = (index.get(from), index.get(to)) {
                graph.add_edge(a, b, ());
            }
        }
    }

    (graph, index)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
