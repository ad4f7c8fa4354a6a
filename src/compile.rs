use crate::error::GraphError;
use crate::plan::{BuildManifest, CanonicalOrder, DependencyGraph, Node};
use crate::types::IndicatorDefinition;
use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap};
use std::sync::Arc;
use std::time::Instant;
use tracing::debug;

pub trait Planner {
    fn build(
        &self,
        definitions: &[IndicatorDefinition],
    ) -> Result<(DependencyGraph, BuildManifest), GraphError>;
}

/// Builds the dependency graph and its canonical order.
///
/// Nodes get ids in first-reference order: each definition's own node first,
/// then its dependencies. Ties in the topological sort are broken by ascending
/// id, so the order is a pure function of the definition list.
#[derive(Debug, Default)]
pub struct GraphBuilder;

impl Planner for GraphBuilder {
    fn build(
        &self,
        definitions: &[IndicatorDefinition],
    ) -> Result<(DependencyGraph, BuildManifest), GraphError> {
        let started_at = Instant::now();
        let mut arena = NodeArena::default();

        for definition in definitions {
            let node_id = arena.define(definition)?;
            for dependency in definition.dependencies() {
                let dep_id = arena.get_or_create(dependency);
                arena.add_edge(dep_id, node_id);
            }
        }

        let order = topological_order(&arena)?;
        let NodeArena {
            nodes,
            dependents,
            dependencies,
            ..
        } = arena;
        let graph = DependencyGraph::new(nodes, dependents, dependencies, order);

        let defined_count = graph.nodes.iter().filter(|n| n.defined).count();
        let computed_count = graph.nodes.iter().filter(|n| !n.is_pass_through()).count();
        let manifest = BuildManifest {
            node_count: graph.len(),
            defined_count,
            raw_field_count: graph.len() - defined_count,
            computed_count,
            edge_count: graph.edge_count(),
            build_time_us: started_at.elapsed().as_micros() as u64,
        };
        debug!(target: "indicator_graph::compile", "{}", manifest.summary_line());
        Ok((graph, manifest))
    }
}

#[derive(Debug, Default)]
struct NodeArena {
    nodes: Vec<Node>,
    dependents: Vec<Vec<usize>>,
    dependencies: Vec<Vec<usize>>,
    by_name: HashMap<String, usize>,
}

impl NodeArena {
    fn get_or_create(&mut self, name: &str) -> usize {
        if let Some(&node_id) = self.by_name.get(name) {
            return node_id;
        }
        let node_id = self.nodes.len();
        self.nodes.push(Node {
            node_id,
            definition: Arc::new(IndicatorDefinition::pass_through(name)),
            defined: false,
        });
        self.dependents.push(Vec::new());
        self.dependencies.push(Vec::new());
        self.by_name.insert(name.to_string(), node_id);
        node_id
    }

    /// Attaches a definition to its node, which may already exist as an
    /// auto-created dependency placeholder.
    fn define(&mut self, definition: &IndicatorDefinition) -> Result<usize, GraphError> {
        let node_id = self.get_or_create(&definition.name);
        let node = &mut self.nodes[node_id];
        if node.defined {
            return Err(GraphError::DuplicateName {
                name: definition.name.clone(),
            });
        }
        node.definition = Arc::new(definition.clone());
        node.defined = true;
        Ok(node_id)
    }

    fn add_edge(&mut self, from: usize, to: usize) {
        if self.dependents[from].contains(&to) {
            return;
        }
        self.dependents[from].push(to);
        self.dependencies[to].push(from);
    }
}

fn topological_order(arena: &NodeArena) -> Result<CanonicalOrder, GraphError> {
    let node_count = arena.nodes.len();
    let mut in_degree: Vec<usize> = arena.dependencies.iter().map(Vec::len).collect();
    let mut ready: BinaryHeap<Reverse<usize>> = in_degree
        .iter()
        .enumerate()
        .filter_map(|(node_id, &deg)| (deg == 0).then_some(Reverse(node_id)))
        .collect();

    let mut order = Vec::with_capacity(node_count);
    while let Some(Reverse(node_id)) = ready.pop() {
        order.push(node_id);
        for &dependent in &arena.dependents[node_id] {
            in_degree[dependent] -= 1;
            if in_degree[dependent] == 0 {
                ready.push(Reverse(dependent));
            }
        }
    }

    if order.len() < node_count {
        let unresolved: Vec<bool> = in_degree.iter().map(|&deg| deg > 0).collect();
        let nodes = (0..node_count)
            .filter(|&node_id| unresolved[node_id] && reaches_itself(arena, &unresolved, node_id))
            .map(|node_id| arena.nodes[node_id].name().to_string())
            .collect();
        return Err(GraphError::Cycle { nodes });
    }
    Ok(CanonicalOrder::new(order))
}

/// Whether `start` lies on a cycle. Nodes merely downstream of a cycle are
/// also left unresolved by the sort, so only the loop members are reported.
fn reaches_itself(arena: &NodeArena, unresolved: &[bool], start: usize) -> bool {
    let mut seen = vec![false; unresolved.len()];
    let mut stack = vec![start];
    while let Some(node_id) = stack.pop() {
        for &next in &arena.dependents[node_id] {
            if next == start {
                return true;
            }
            if unresolved[next] && !seen[next] {
                seen[next] = true;
                stack.push(next);
            }
        }
    }
    false
}
