use crate::error::GraphError;
use crate::types::{IndicatorDefinition, RowBuffer};
use std::collections::HashMap;
use std::sync::Arc;

/// A vertex of the dependency graph.
///
/// `node_id` is assigned at build time in first-reference order and doubles as
/// the node's slot in every [`RowBuffer`].
#[derive(Debug, Clone, PartialEq)]
pub struct Node {
    pub node_id: usize,
    pub definition: Arc<IndicatorDefinition>,
    /// False when the node was auto-created from a dependency reference only.
    pub defined: bool,
}

impl Node {
    #[inline]
    pub fn name(&self) -> &str {
        &self.definition.name
    }

    #[inline]
    pub fn is_pass_through(&self) -> bool {
        self.definition.is_pass_through()
    }
}

/// Global evaluation order shared read-only by all instrument graphs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CanonicalOrder(Arc<[usize]>);

impl CanonicalOrder {
    pub(crate) fn new(order: Vec<usize>) -> Self {
        Self(Arc::from(order.into_boxed_slice()))
    }

    #[inline]
    pub fn as_slice(&self) -> &[usize] {
        &self.0
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Position of each node id within the order.
    pub fn positions(&self) -> Vec<usize> {
        let mut positions = vec![0; self.0.len()];
        for (pos, &node_id) in self.0.iter().enumerate() {
            positions[node_id] = pos;
        }
        positions
    }
}

/// Validated, acyclic indicator graph. Immutable once built.
#[derive(Debug, Clone, PartialEq)]
pub struct DependencyGraph {
    pub nodes: Vec<Node>,
    /// `dependents[a]` holds every `b` with an edge `a -> b`.
    pub dependents: Vec<Vec<usize>>,
    /// `dependencies[b]` holds every `a` with an edge `a -> b`.
    pub dependencies: Vec<Vec<usize>>,
    pub order: CanonicalOrder,
    names: Arc<[String]>,
    index: Arc<HashMap<String, usize>>,
}

impl DependencyGraph {
    pub(crate) fn new(
        nodes: Vec<Node>,
        dependents: Vec<Vec<usize>>,
        dependencies: Vec<Vec<usize>>,
        order: CanonicalOrder,
    ) -> Self {
        let names: Arc<[String]> = nodes
            .iter()
            .map(|node| node.name().to_string())
            .collect::<Vec<_>>()
            .into();
        let index = Arc::new(
            names
                .iter()
                .cloned()
                .enumerate()
                .map(|(idx, name)| (name, idx))
                .collect::<HashMap<_, _>>(),
        );
        Self {
            nodes,
            dependents,
            dependencies,
            order,
            names,
            index,
        }
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn node_id(&self, name: &str) -> Result<usize, GraphError> {
        self.index
            .get(name)
            .copied()
            .ok_or_else(|| GraphError::UnknownIndicator {
                name: name.to_string(),
            })
    }

    pub fn node(&self, name: &str) -> Result<&Node, GraphError> {
        Ok(&self.nodes[self.node_id(name)?])
    }

    pub fn edge_count(&self) -> usize {
        self.dependents.iter().map(Vec::len).sum()
    }

    /// Node names in canonical evaluation order.
    pub fn ordered_names(&self) -> Vec<&str> {
        self.order
            .as_slice()
            .iter()
            .map(|&id| self.nodes[id].name())
            .collect()
    }

    /// Empty row sharing this graph's slot schema.
    pub fn new_row(&self) -> RowBuffer {
        RowBuffer::with_shared_schema(self.names.clone(), self.index.clone())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct BuildManifest {
    pub node_count: usize,
    /// Nodes backed by an explicit definition.
    pub defined_count: usize,
    /// Nodes created from a dependency reference only (raw fields).
    pub raw_field_count: usize,
    pub computed_count: usize,
    pub edge_count: usize,
    /// End-to-end build latency in microseconds.
    pub build_time_us: u64,
}

impl BuildManifest {
    #[inline]
    pub fn summary_line(&self) -> String {
        format!(
            "nodes={} defined={} raw_fields={} computed={} edges={} build_us={}",
            self.node_count,
            self.defined_count,
            self.raw_field_count,
            self.computed_count,
            self.edge_count,
            self.build_time_us
        )
    }
}
