use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use std::fmt::Debug;
use std::hash::Hash;

use petgraph::{
    graph::{DiGraph, NodeIndex},
    visit::Dfs,
};
use tracing::{instrument, trace};

#[derive(thiserror::Error, Debug, PartialEq, Eq)]
pub enum Error {
    #[error("at least one root is required")]
    NoRoots,

    #[error("unknown node {0}")]
    UnknownNode(String),
}

/// A directed graph from orderable ids to values, allowing parallel edges.
///
/// Every `add_edge` call records one more edge between the two nodes, so the
/// number of times a child is contained in a parent is preserved. This is
/// what [DirectedGraph::traverse_unique_edges] uses to revisit diamond-shaped
/// containment the right number of times while still terminating on cycles.
pub struct DirectedGraph<I, V> {
    // Node weights are (id, value). Edges point from parents to children.
    graph: DiGraph<(I, V), ()>,

    // A lookup table from id to node index.
    id_to_node_ix: HashMap<I, NodeIndex>,
}

impl<I, V> Default for DirectedGraph<I, V> {
    fn default() -> Self {
        Self {
            graph: Default::default(),
            id_to_node_ix: Default::default(),
        }
    }
}

impl<I, V> DirectedGraph<I, V>
where
    I: Ord + Hash + Clone + Debug,
{
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts a node. Inserting an id that is already present keeps the
    /// existing value and returns false.
    pub fn insert(&mut self, id: I, value: V) -> bool {
        if self.id_to_node_ix.contains_key(&id) {
            return false;
        }
        let ix = self.graph.add_node((id.clone(), value));
        self.id_to_node_ix.insert(id, ix);
        true
    }

    pub fn contains(&self, id: &I) -> bool {
        self.id_to_node_ix.contains_key(id)
    }

    pub fn get(&self, id: &I) -> Option<&V> {
        self.id_to_node_ix.get(id).map(|ix| &self.graph[*ix].1)
    }

    pub fn len(&self) -> usize {
        self.graph.node_count()
    }

    pub fn is_empty(&self) -> bool {
        self.graph.node_count() == 0
    }

    /// Records one more edge from `from` to `to`, returning how many edges
    /// now connect the two.
    pub fn add_edge(&mut self, from: &I, to: &I) -> Result<usize, Error> {
        let from_ix = self.node_ix(from)?;
        let to_ix = self.node_ix(to)?;
        self.graph.add_edge(from_ix, to_ix, ());
        Ok(self.graph.edges_connecting(from_ix, to_ix).count())
    }

    pub fn edge_count(&self, from: &I, to: &I) -> usize {
        match (self.id_to_node_ix.get(from), self.id_to_node_ix.get(to)) {
            (Some(from_ix), Some(to_ix)) => self.graph.edges_connecting(*from_ix, *to_ix).count(),
            _ => 0,
        }
    }

    /// Returns the distinct children of a node in ascending id order, along
    /// with the number of edges leading to each.
    pub fn children(&self, id: &I) -> Result<Vec<(&I, usize)>, Error> {
        let ix = self.node_ix(id)?;
        Ok(self
            .sorted_children(ix)
            .into_iter()
            .map(|(child_ix, count)| (&self.graph[child_ix].0, count))
            .collect())
    }

    /// Returns true if `id` can reach itself by following edges.
    pub fn is_in_cycle(&self, id: &I) -> Result<bool, Error> {
        let ix = self.node_ix(id)?;

        // Start from the successors rather than the node itself, so reaching
        // it again means a path back exists.
        let mut dfs = Dfs::empty(&self.graph);
        dfs.stack.extend(self.graph.neighbors(ix));

        while let Some(nx) = dfs.next(&self.graph) {
            if nx == ix {
                return Ok(true);
            }
        }
        Ok(false)
    }

    /// Breadth-first traversal calling `visitor` for every node reachable
    /// from `roots`.
    ///
    /// Roots are visited first. When a node is expanded, each child is queued
    /// once per recorded edge, but only the first time that (parent, child)
    /// edge is expanded. A node reachable through N distinct inbound edges is
    /// therefore visited N times, and a cycle is walked around at most once
    /// per edge. Self-loops on roots are ignored. Children are expanded in
    /// ascending id order. The first visitor error is returned immediately.
    #[instrument(level = "trace", skip_all, fields(roots = roots.len()))]
    pub fn traverse_unique_edges<F, E>(&self, roots: &[I], mut visitor: F) -> Result<(), E>
    where
        F: FnMut(&I, &V) -> Result<(), E>,
        E: From<Error>,
    {
        if roots.is_empty() {
            return Err(Error::NoRoots.into());
        }

        let root_ixs = roots
            .iter()
            .map(|id| self.node_ix(id))
            .collect::<Result<Vec<_>, _>>()?;

        let mut expanded_edges: HashSet<(NodeIndex, NodeIndex)> = HashSet::new();
        let mut queue: VecDeque<NodeIndex> = VecDeque::new();

        for ix in &root_ixs {
            let (id, value) = &self.graph[*ix];
            visitor(id, value)?;
        }
        for ix in &root_ixs {
            self.expand(*ix, true, &mut expanded_edges, &mut queue);
        }

        while let Some(ix) = queue.pop_front() {
            let (id, value) = &self.graph[ix];
            trace!(node = ?id, "visiting");
            visitor(id, value)?;
            self.expand(ix, false, &mut expanded_edges, &mut queue);
        }

        Ok(())
    }

    fn expand(
        &self,
        ix: NodeIndex,
        is_root: bool,
        expanded_edges: &mut HashSet<(NodeIndex, NodeIndex)>,
        queue: &mut VecDeque<NodeIndex>,
    ) {
        for (child_ix, count) in self.sorted_children(ix) {
            if is_root && child_ix == ix {
                continue;
            }
            if expanded_edges.insert((ix, child_ix)) {
                queue.extend(std::iter::repeat(child_ix).take(count));
            }
        }
    }

    fn sorted_children(&self, ix: NodeIndex) -> Vec<(NodeIndex, usize)> {
        let mut children: BTreeMap<&I, (NodeIndex, usize)> = BTreeMap::new();
        for child_ix in self.graph.neighbors(ix) {
            children
                .entry(&self.graph[child_ix].0)
                .or_insert((child_ix, 0))
                .1 += 1;
        }
        children.into_values().collect()
    }

    fn node_ix(&self, id: &I) -> Result<NodeIndex, Error> {
        self.id_to_node_ix
            .get(id)
            .copied()
            .ok_or_else(|| Error::UnknownNode(format!("{:?}", id)))
    }
}
