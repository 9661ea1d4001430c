use std::collections::{HashMap, VecDeque};

use ahash::AHashMap;
use smallvec::SmallVec;

use flowgraph_core::{EdgeCategory, NodeId};

use crate::topology::TopologyDatabase;

bitflags::bitflags! {
    /// A selection of [`EdgeCategory`] variants that participate in a given
    /// traversal. The primary traversal mask is `DATA_FLOW` only (feedback edges are
    /// excluded); an "alternate mask" can record a
    /// secondary hierarchy for user queries without affecting scheduling.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct EdgeCategoryMask: u8 {
        const MESSAGE         = 0b0001;
        const DOMAIN_SPECIFIC = 0b0010;
        const DATA_FLOW       = 0b0100;
        const FEEDBACK        = 0b1000;
    }
}

impl EdgeCategoryMask {
    pub fn contains_category(self, category: EdgeCategory) -> bool {
        let bit = match category {
            EdgeCategory::Message => Self::MESSAGE,
            EdgeCategory::DomainSpecific => Self::DOMAIN_SPECIFIC,
            EdgeCategory::DataFlow => Self::DATA_FLOW,
            EdgeCategory::Feedback => Self::FEEDBACK,
        };
        self.contains(bit)
    }
}

/// The mask used to build the traversal order kernels are scheduled by.
/// Feedback edges are deliberately excluded: they read the previous
/// tick's value and so do not constrain this tick's ordering.
pub const SCHEDULING_MASK: EdgeCategoryMask = EdgeCategoryMask::DATA_FLOW;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortStrategy {
    /// Kahn's algorithm seeded by leaves (no in-edges); produces a
    /// maximally-parallel level ordering.
    GlobalBreadthFirst,
    /// Iterative DFS from each leaf; orphans first, then one connected
    /// island at a time.
    LocalDepthFirst,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GroupError {
    /// The number of nodes the sort managed to emit was less than the
    /// group's size; a data-flow/feedback cycle exists among the
    /// remainder.
    Cycles,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GroupState {
    Fresh,
    Sorted,
    Valid,
    CyclesDetected,
}

/// One maximal connected island under the traversal mask, sorted and
/// indexed for O(1) parent/child walks during scheduling.
#[derive(Debug, Clone)]
pub struct TraversalGroup {
    pub ordered_traversal: Vec<NodeId>,
    /// Indices into `ordered_traversal` with no outgoing mask edge (sinks).
    pub roots: Vec<usize>,
    /// Indices into `ordered_traversal` with no incoming mask edge (sources).
    pub leaves: Vec<usize>,
    /// Per-node (by index into `ordered_traversal`) list of parent indices.
    pub parent_table: Vec<SmallVec<[usize; 4]>>,
    /// Per-node (by index into `ordered_traversal`) list of child indices.
    pub child_table: Vec<SmallVec<[usize; 4]>>,
    pub errors: Vec<GroupError>,
    pub state: GroupState,
}

impl TraversalGroup {
    pub fn is_ready(&self) -> bool {
        matches!(self.state, GroupState::Valid | GroupState::CyclesDetected)
    }

    pub fn has_cycle(&self) -> bool {
        self.errors.contains(&GroupError::Cycles)
    }

    pub fn position_of(&self, node: NodeId) -> Option<usize> {
        self.ordered_traversal.iter().position(|&n| n == node)
    }
}

/// The topologically sorted, grouped view of a graph, rebuilt whenever the
/// topology database's version changes. Holds the construction
/// version so callers can check staleness in O(1).
pub struct TraversalCache {
    groups: Vec<TraversalGroup>,
    version: u64,
}

impl TraversalCache {
    pub fn empty() -> Self {
        Self {
            groups: Vec::new(),
            version: u64::MAX,
        }
    }

    pub fn version(&self) -> u64 {
        self.version
    }

    pub fn groups(&self) -> &[TraversalGroup] {
        &self.groups
    }

    pub fn is_stale(&self, topology_version: u64) -> bool {
        self.version != topology_version
    }

    /// Rebuild the cache from scratch. A delta path that reuses
    /// unaffected groups is an optimization this implementation does not
    /// attempt.
    pub fn rebuild<T>(
        &mut self,
        topology: &TopologyDatabase<T>,
        mask: EdgeCategoryMask,
        strategy: SortStrategy,
    ) {
        self.groups = build_groups(topology, mask, strategy);
        self.version = topology.version();
    }
}

impl Default for TraversalCache {
    fn default() -> Self {
        Self::empty()
    }
}

/// Minimal union-find over a dense `0..n` index space.
struct UnionFind {
    parent: Vec<usize>,
}

impl UnionFind {
    fn new(n: usize) -> Self {
        Self {
            parent: (0..n).collect(),
        }
    }

    fn find(&mut self, x: usize) -> usize {
        if self.parent[x] != x {
            self.parent[x] = self.find(self.parent[x]);
        }
        self.parent[x]
    }

    fn union(&mut self, a: usize, b: usize) {
        let ra = self.find(a);
        let rb = self.find(b);
        if ra != rb {
            self.parent[ra] = rb;
        }
    }
}

fn build_groups<T>(
    topology: &TopologyDatabase<T>,
    mask: EdgeCategoryMask,
    strategy: SortStrategy,
) -> Vec<TraversalGroup> {
    let live: Vec<NodeId> = topology.nodes().map(|(id, _)| id).collect();
    let mut index_of: AHashMap<NodeId, usize> = AHashMap::with_capacity(live.len());
    for (i, &id) in live.iter().enumerate() {
        index_of.insert(id, i);
    }

    let mut uf = UnionFind::new(live.len());
    // Adjacency restricted to the mask, in dense-index space.
    let mut out_adj: Vec<Vec<usize>> = vec![Vec::new(); live.len()];

    for (i, &id) in live.iter().enumerate() {
        let Ok(outgoing) = topology.outgoing(id) else {
            continue;
        };
        for edge in outgoing {
            if !mask.contains_category(edge.category) {
                continue;
            }
            let Some(&j) = index_of.get(&edge.dst_node) else {
                continue;
            };
            out_adj[i].push(j);
            uf.union(i, j);
        }
    }

    let mut by_root: HashMap<usize, Vec<usize>> = HashMap::new();
    for i in 0..live.len() {
        let r = uf.find(i);
        by_root.entry(r).or_default().push(i);
    }

    let mut groups = Vec::with_capacity(by_root.len());
    for (_, members) in by_root {
        groups.push(build_group(&members, &live, &out_adj, strategy));
    }
    groups
}

fn build_group(
    members: &[usize],
    live: &[NodeId],
    out_adj: &[Vec<usize>],
    strategy: SortStrategy,
) -> TraversalGroup {
    let local_of: AHashMap<usize, usize> = members
        .iter()
        .enumerate()
        .map(|(local, &global)| (global, local))
        .collect();
    let n = members.len();

    // Local adjacency, reindexed 0..n within this group.
    let mut local_out: Vec<Vec<usize>> = vec![Vec::new(); n];
    let mut local_in: Vec<Vec<usize>> = vec![Vec::new(); n];
    for (local, &global) in members.iter().enumerate() {
        for &succ in &out_adj[global] {
            if let Some(&succ_local) = local_of.get(&succ) {
                local_out[local].push(succ_local);
                local_in[succ_local].push(local);
            }
        }
    }

    let emitted = match strategy {
        SortStrategy::GlobalBreadthFirst => kahn_sort(&local_out, &local_in),
        SortStrategy::LocalDepthFirst => dfs_sort(&local_out, &local_in),
    };

    let mut errors = Vec::new();
    let state;
    let ordered_local: Vec<usize> = if emitted.len() < n {
        errors.push(GroupError::Cycles);
        state = GroupState::CyclesDetected;
        // Deterministic fallback ordering: emitted nodes first (a valid
        // partial topological prefix), then the remaining cyclic nodes in
        // local-index order, so the order is at least stable across
        // rebuilds of an unchanged cyclic group.
        let mut seen: Vec<bool> = vec![false; n];
        let mut order = emitted.clone();
        for &i in &emitted {
            seen[i] = true;
        }
        for i in 0..n {
            if !seen[i] {
                order.push(i);
            }
        }
        order
    } else {
        state = GroupState::Valid;
        emitted
    };

    let ordered_traversal: Vec<NodeId> = ordered_local.iter().map(|&i| live[members[i]]).collect();

    // position[local_group_index] -> index into ordered_traversal.
    let mut position = vec![0usize; n];
    for (pos, &local) in ordered_local.iter().enumerate() {
        position[local] = pos;
    }

    let mut parent_table: Vec<SmallVec<[usize; 4]>> = vec![SmallVec::new(); n];
    let mut child_table: Vec<SmallVec<[usize; 4]>> = vec![SmallVec::new(); n];
    let mut roots = Vec::new();
    let mut leaves = Vec::new();

    for local in 0..n {
        let pos = position[local];
        for &parent_local in &local_in[local] {
            parent_table[pos].push(position[parent_local]);
        }
        for &child_local in &local_out[local] {
            child_table[pos].push(position[child_local]);
        }
        if local_out[local].is_empty() {
            roots.push(pos);
        }
        if local_in[local].is_empty() {
            leaves.push(pos);
        }
    }
    roots.sort_unstable();
    leaves.sort_unstable();

    TraversalGroup {
        ordered_traversal,
        roots,
        leaves,
        parent_table,
        child_table,
        errors,
        state,
    }
}

/// Kahn's algorithm: BFS seeded by in-degree-0 nodes (leaves).
fn kahn_sort(local_out: &[Vec<usize>], local_in: &[Vec<usize>]) -> Vec<usize> {
    let n = local_out.len();
    let mut in_degree: Vec<usize> = local_in.iter().map(|p| p.len()).collect();
    let mut queue: VecDeque<usize> = (0..n).filter(|&i| in_degree[i] == 0).collect();
    let mut order = Vec::with_capacity(n);

    while let Some(node) = queue.pop_front() {
        order.push(node);
        for &succ in &local_out[node] {
            in_degree[succ] -= 1;
            if in_degree[succ] == 0 {
                queue.push_back(succ);
            }
        }
    }
    order
}

/// Iterative DFS from each leaf (no in-edges); orphans are visited first
/// because they are also leaves with no out-edges and sort first in
/// insertion order.
///
/// Tracks each node's color (white/gray/black) rather than a plain
/// visited bit: a node reachable from a leaf can still sit on a cycle
/// (e.g. a leaf feeding into a back-edge loop), and a plain visited bit
/// would let the DFS walk straight through it and report it as emitted.
/// A back edge to a gray node marks every node between it and the top of
/// the stack as cyclic, so they are excluded from the returned order and
/// the caller's `emitted.len() < n` check still catches the cycle.
fn dfs_sort(local_out: &[Vec<usize>], local_in: &[Vec<usize>]) -> Vec<usize> {
    #[derive(Clone, Copy, PartialEq, Eq)]
    enum Color {
        White,
        Gray,
        Black,
    }

    let n = local_out.len();
    let mut color = vec![Color::White; n];
    let mut cyclic = vec![false; n];
    let mut post_order = Vec::with_capacity(n);

    let leaves: Vec<usize> = (0..n).filter(|&i| local_in[i].is_empty()).collect();

    for &start in &leaves {
        if color[start] != Color::White {
            continue;
        }
        let mut stack: Vec<(usize, usize)> = vec![(start, 0)];
        color[start] = Color::Gray;

        while let Some(&mut (node, ref mut next_child)) = stack.last_mut() {
            if *next_child < local_out[node].len() {
                let child = local_out[node][*next_child];
                *next_child += 1;
                match color[child] {
                    Color::White => {
                        color[child] = Color::Gray;
                        stack.push((child, 0));
                    }
                    Color::Gray => {
                        // Back edge: `child` is an ancestor still on the
                        // stack, so everything from it to the top of the
                        // stack forms a cycle.
                        for &(ancestor, _) in stack.iter().rev() {
                            cyclic[ancestor] = true;
                            if ancestor == child {
                                break;
                            }
                        }
                    }
                    Color::Black => {}
                }
            } else {
                color[node] = Color::Black;
                post_order.push(node);
                stack.pop();
            }
        }
    }

    // Any node unreached from a leaf lies entirely within a cycle (no
    // leaf precedes it under the mask); a node marked `cyclic` above was
    // reached but sits on a back edge. Either way it is excluded here, so
    // the caller's `emitted.len() < n` check catches both cases.
    post_order.reverse();
    post_order.retain(|&node| !cyclic[node]);
    post_order
}
