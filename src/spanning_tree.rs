use std::io::Write;

use fnv::FnvHashMap;
use log::trace;

use crate::bidirected::{VariationGraph, VertexEnd};
use crate::bracket::{Bracket, BracketList, BracketPool};
use crate::error::{AwaError, Result};

/// How a spanning-tree vertex was first reached: through its left or
/// right side, or a synthetic vertex with no graph counterpart.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VertexType {
    Left,
    Right,
    Dummy,
}

impl From<VertexEnd> for VertexType {
    fn from(end: VertexEnd) -> Self {
        match end {
            VertexEnd::Left => VertexType::Left,
            VertexEnd::Right => VertexType::Right,
        }
    }
}

/// Provenance of a spanning-tree edge: `Black` edges are backed by a
/// graph edge, `Gray` ones are synthesized by the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EdgeColor {
    Black,
    Gray,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackEdgeType {
    Ordinary,
    Capping,
    Simplifying,
}

/// An edge of the spanning tree, addressed by kind and arena index.
/// Tree edges and back edges share one id space but live in disjoint
/// arenas.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EdgeRef {
    Tree(usize),
    Back(usize),
}

/// A vertex of the spanning tree.
#[derive(Debug, Clone)]
pub struct TreeVertex {
    dfs_num: usize,
    name: u64,
    ty: VertexType,
    parent_edge: Option<usize>,
    children: Vec<usize>,
    ibe: Vec<usize>,
    obe: Vec<usize>,
    hi: Option<usize>,
    null: bool,
}

impl TreeVertex {
    fn new(dfs_num: usize, name: u64, ty: VertexType) -> Self {
        TreeVertex {
            dfs_num,
            name,
            ty,
            parent_edge: None,
            children: Vec::new(),
            ibe: Vec::new(),
            obe: Vec::new(),
            hi: None,
            null: true,
        }
    }

    pub fn dfs_num(&self) -> usize {
        self.dfs_num
    }

    pub fn name(&self) -> u64 {
        self.name
    }

    pub fn vertex_type(&self) -> VertexType {
        self.ty
    }

    pub fn is_dummy(&self) -> bool {
        self.ty == VertexType::Dummy
    }

    /// Lowest dfs number reachable from this vertex's subtree via a
    /// single back edge. None until the engine has processed the vertex.
    pub fn hi(&self) -> Option<usize> {
        self.hi
    }

    /// Index of the tree edge to the parent; None for the root.
    pub fn parent_edge(&self) -> Option<usize> {
        self.parent_edge
    }

    /// Child tree-edge indices in DFS discovery order.
    pub fn children(&self) -> &[usize] {
        &self.children
    }

    /// Back edges arriving here (this vertex is the target).
    pub fn ibe(&self) -> &[usize] {
        &self.ibe
    }

    /// Back edges leaving here (this vertex is the source).
    pub fn obe(&self) -> &[usize] {
        &self.obe
    }

    pub fn is_leaf(&self) -> bool {
        self.children.is_empty()
    }

    /// True until the vertex is first touched by a tree edge.
    pub fn is_null(&self) -> bool {
        self.null
    }
}

#[derive(Debug, Clone)]
pub struct TreeEdge {
    id: usize,
    parent: usize,
    child: usize,
    color: EdgeColor,
    class: Option<usize>,
}

impl TreeEdge {
    pub fn id(&self) -> usize {
        self.id
    }

    pub fn parent(&self) -> usize {
        self.parent
    }

    pub fn child(&self) -> usize {
        self.child
    }

    pub fn color(&self) -> EdgeColor {
        self.color
    }

    pub fn class(&self) -> Option<usize> {
        self.class
    }

    pub fn set_class(&mut self, class: usize) {
        self.class = Some(class);
    }
}

#[derive(Debug, Clone)]
pub struct BackEdge {
    id: usize,
    src: usize,
    tgt: usize,
    ty: BackEdgeType,
    color: EdgeColor,
    class: Option<usize>,
}

impl BackEdge {
    pub fn id(&self) -> usize {
        self.id
    }

    pub fn src(&self) -> usize {
        self.src
    }

    pub fn tgt(&self) -> usize {
        self.tgt
    }

    pub fn edge_type(&self) -> BackEdgeType {
        self.ty
    }

    pub fn color(&self) -> EdgeColor {
        self.color
    }

    pub fn is_capping(&self) -> bool {
        self.ty == BackEdgeType::Capping
    }

    pub fn is_simplifying(&self) -> bool {
        self.ty == BackEdgeType::Simplifying
    }

    pub fn is_self_loop(&self) -> bool {
        self.src == self.tgt
    }

    pub fn class(&self) -> Option<usize> {
        self.class
    }

    pub fn is_class_defined(&self) -> bool {
        self.class.is_some()
    }

    pub fn set_class(&mut self, class: usize) {
        self.class = Some(class);
    }
}

/// A rooted DFS spanning tree of one connected component, with the back
/// edges, per-vertex bracket lists, and id maps the cycle-equivalence
/// engine runs over.
///
/// Vertices are stored in preorder, so a vertex's arena index is its dfs
/// number when the tree is built by `from_component`; `dfs_order` keeps
/// the mapping explicit for trees assembled by hand.
#[derive(Debug, Clone, Default)]
pub struct Tree {
    vertices: Vec<TreeVertex>,
    tree_edges: Vec<TreeEdge>,
    back_edges: Vec<BackEdge>,
    bracket_lists: Vec<Option<BracketList>>,
    pool: BracketPool,
    root: usize,
    dfs_order: Vec<usize>,
    be_id_to_idx: FnvHashMap<usize, usize>,
    edge_id_map: FnvHashMap<usize, EdgeRef>,
    edge_to_graph: FnvHashMap<usize, usize>,
    graph_to_edge: FnvHashMap<usize, EdgeRef>,
    class_counter: usize,
}

impl Tree {
    pub fn new() -> Self {
        Default::default()
    }

    pub fn with_capacity(size: usize) -> Self {
        let mut t = Tree::new();
        t.vertices.reserve(size);
        t.tree_edges.reserve(size);
        t.back_edges.reserve(size);
        t.bracket_lists.reserve(size);
        t.dfs_order.reserve(size);
        t.pool = BracketPool::with_capacity(size);
        t
    }

    pub fn size(&self) -> usize {
        self.vertices.len()
    }

    pub fn tree_edge_count(&self) -> usize {
        self.tree_edges.len()
    }

    pub fn back_edge_count(&self) -> usize {
        self.back_edges.len()
    }

    pub fn vertex(&self, v: usize) -> &TreeVertex {
        &self.vertices[v]
    }

    pub fn root_idx(&self) -> usize {
        self.root
    }

    pub fn is_root(&self, v: usize) -> bool {
        !self.vertices[v].is_null() && self.vertices[v].parent_edge().is_none()
    }

    pub fn is_leaf(&self, v: usize) -> bool {
        self.vertices[v].is_leaf()
    }

    /// The vertex holding a given dfs number.
    pub fn vertex_at_dfs(&self, dfs_num: usize) -> usize {
        self.dfs_order[dfs_num]
    }

    pub fn hi(&self, v: usize) -> Option<usize> {
        self.vertices[v].hi()
    }

    pub fn set_hi(&mut self, v: usize, hi: usize) {
        self.vertices[v].hi = Some(hi);
    }

    /// Append a vertex; its dfs number is its insertion rank.
    pub fn add_vertex(&mut self, name: u64, ty: VertexType) -> usize {
        let idx = self.vertices.len();
        self.vertices.push(TreeVertex::new(idx, name, ty));
        self.bracket_lists.push(None);
        self.dfs_order.push(idx);
        idx
    }

    fn next_edge_id(&self) -> usize {
        self.tree_edges.len() + self.back_edges.len()
    }

    /// Add a tree edge from `parent` to `child`. `graph_edge` is the
    /// index of the graph edge it was classified from, used to report
    /// classes back onto the source graph.
    pub fn add_tree_edge(
        &mut self,
        parent: usize,
        child: usize,
        graph_edge: Option<usize>,
        color: EdgeColor,
    ) -> usize {
        let edge_idx = self.tree_edges.len();
        let id = self.next_edge_id();
        self.tree_edges.push(TreeEdge {
            id,
            parent,
            child,
            color,
            class: None,
        });

        self.edge_id_map.insert(id, EdgeRef::Tree(edge_idx));
        if let Some(g_idx) = graph_edge {
            self.edge_to_graph.insert(id, g_idx);
            self.graph_to_edge.insert(g_idx, EdgeRef::Tree(edge_idx));
        }

        self.vertices[parent].null = false;
        self.vertices[child].null = false;
        self.vertices[parent].children.push(edge_idx);
        self.vertices[child].parent_edge = Some(edge_idx);

        edge_idx
    }

    /// Add a back edge from `src` down in the tree to `tgt`. Capping and
    /// simplifying edges have no graph counterpart and never enter the
    /// graph-edge maps.
    pub fn add_back_edge(
        &mut self,
        src: usize,
        tgt: usize,
        graph_edge: Option<usize>,
        ty: BackEdgeType,
        color: EdgeColor,
    ) -> usize {
        let be_idx = self.back_edges.len();
        let id = self.next_edge_id();
        self.back_edges.push(BackEdge {
            id,
            src,
            tgt,
            ty,
            color,
            class: None,
        });

        self.edge_id_map.insert(id, EdgeRef::Back(be_idx));
        if ty == BackEdgeType::Ordinary {
            if let Some(g_idx) = graph_edge {
                self.edge_to_graph.insert(id, g_idx);
                self.graph_to_edge.insert(g_idx, EdgeRef::Back(be_idx));
            }
        }

        self.vertices[src].obe.push(be_idx);
        self.vertices[tgt].ibe.push(be_idx);
        self.be_id_to_idx.insert(id, be_idx);

        be_idx
    }

    pub fn tree_edge(&self, edge_idx: usize) -> &TreeEdge {
        &self.tree_edges[edge_idx]
    }

    pub fn tree_edges(&self) -> &[TreeEdge] {
        &self.tree_edges
    }

    pub fn back_edge(&self, be_idx: usize) -> &BackEdge {
        &self.back_edges[be_idx]
    }

    pub fn back_edge_mut(&mut self, be_idx: usize) -> &mut BackEdge {
        &mut self.back_edges[be_idx]
    }

    pub fn back_edges(&self) -> &[BackEdge] {
        &self.back_edges
    }

    pub fn back_edge_by_id(&self, id: usize) -> Result<&BackEdge> {
        let be_idx = self.be_id_to_idx.get(&id).ok_or_else(|| {
            AwaError::InternalInvariant(format!("unknown back edge id {}", id))
        })?;
        Ok(&self.back_edges[*be_idx])
    }

    pub fn back_edge_by_id_mut(&mut self, id: usize) -> Result<&mut BackEdge> {
        let be_idx = *self.be_id_to_idx.get(&id).ok_or_else(|| {
            AwaError::InternalInvariant(format!("unknown back edge id {}", id))
        })?;
        Ok(&mut self.back_edges[be_idx])
    }

    pub fn edge_ref(&self, edge_id: usize) -> Option<EdgeRef> {
        self.edge_id_map.get(&edge_id).copied()
    }

    /// The graph edge an edge id was classified from, if any.
    pub fn graph_edge_of(&self, edge_id: usize) -> Option<usize> {
        self.edge_to_graph.get(&edge_id).copied()
    }

    /// The tree-side counterpart of a graph edge.
    pub fn edge_of_graph_edge(&self, graph_edge: usize) -> Option<EdgeRef> {
        self.graph_to_edge.get(&graph_edge).copied()
    }

    /// Child vertex indices in DFS discovery order.
    pub fn children(&self, v: usize) -> Vec<usize> {
        self.vertices[v]
            .children()
            .iter()
            .map(|&e_idx| self.tree_edges[e_idx].child())
            .collect()
    }

    pub fn parent(&self, v: usize) -> Option<usize> {
        self.vertices[v]
            .parent_edge()
            .map(|e_idx| self.tree_edges[e_idx].parent())
    }

    /// The tree edge from a vertex's parent to it.
    pub fn incoming_edge_mut(&mut self, v: usize) -> Result<&mut TreeEdge> {
        let e_idx = self.vertices[v].parent_edge().ok_or_else(|| {
            AwaError::InternalInvariant(format!(
                "vertex '{}' has no parent edge",
                self.vertices[v].name()
            ))
        })?;
        Ok(&mut self.tree_edges[e_idx])
    }

    pub fn ibe_idxs(&self, v: usize) -> Vec<usize> {
        self.vertices[v].ibe().to_vec()
    }

    pub fn obe_idxs(&self, v: usize) -> Vec<usize> {
        self.vertices[v].obe().to_vec()
    }

    /// Fresh equivalence class id from the run-scoped counter.
    pub fn new_class(&mut self) -> usize {
        let c = self.class_counter;
        self.class_counter += 1;
        c
    }

    pub fn class_count(&self) -> usize {
        self.class_counter
    }

    // bracket list operations
    // -----------------------

    pub fn list_size(&self, v: usize) -> usize {
        self.bracket_lists[v].map_or(0, |l| l.size())
    }

    pub fn bracket_pool(&self) -> &BracketPool {
        &self.pool
    }

    /// Splice the child's bracket list in front of the parent's. The
    /// child's handle is emptied and must not be used again.
    pub fn concat_bracket_lists(&mut self, parent: usize, child: usize) {
        if let Some(mut child_list) = self.bracket_lists[child].take() {
            let mut parent_list = self.bracket_lists[parent].take().unwrap_or_default();
            parent_list.concat(&mut self.pool, &mut child_list);
            self.bracket_lists[parent] = Some(parent_list);
        }
    }

    /// Delete the bracket of a back edge from a vertex's list.
    pub fn del_bracket(&mut self, v: usize, be_idx: usize) -> Result<()> {
        let be_id = self.back_edges[be_idx].id();
        let mut list = match self.bracket_lists[v].take() {
            Some(list) => list,
            None => {
                return Err(AwaError::InternalInvariant(format!(
                    "delete bracket for back edge id {} at vertex '{}': no bracket list",
                    be_id,
                    self.vertices[v].name()
                )))
            }
        };
        let res = list.delete(&mut self.pool, be_id).map_err(|_| {
            AwaError::InternalInvariant(format!(
                "delete bracket for back edge id {} at vertex '{}': no such bracket",
                be_id,
                self.vertices[v].name()
            ))
        });
        self.bracket_lists[v] = Some(list);
        res
    }

    /// Push a bracket for a back edge onto a vertex's list, creating the
    /// list on first use.
    pub fn push_bracket(&mut self, v: usize, be_idx: usize) -> Result<()> {
        let be_id = self.back_edges[be_idx].id();
        let mut list = self.bracket_lists[v].take().unwrap_or_default();
        let res = list.push(&mut self.pool, be_id);
        self.bracket_lists[v] = Some(list);
        res
    }

    pub fn top_bracket(&self, v: usize) -> Result<&Bracket> {
        let list = self.bracket_lists[v].as_ref().ok_or_else(|| {
            AwaError::InternalInvariant(format!(
                "top of bracket list at vertex '{}': no bracket list",
                self.vertices[v].name()
            ))
        })?;
        list.top(&self.pool)
    }

    pub fn top_bracket_mut(&mut self, v: usize) -> Result<&mut Bracket> {
        let list = self.bracket_lists[v].ok_or_else(|| {
            AwaError::InternalInvariant(format!(
                "top of bracket list at vertex '{}': no bracket list",
                self.vertices[v].name()
            ))
        })?;
        list.top_mut(&mut self.pool)
    }

    // construction and validation
    // ---------------------------

    /// Build the spanning tree of one connected component by DFS from
    /// its first vertex.
    ///
    /// The DFS simulates recursion with an explicit frame stack, so every
    /// non-tree edge joins a vertex to one of its ancestors and is
    /// recorded as a back edge from the deeper endpoint. Adjacency is
    /// walked left side first, then right, each in edge-index order,
    /// which makes the construction deterministic.
    pub fn from_component(graph: &VariationGraph) -> Result<Tree> {
        let n = graph.size();
        if n == 0 {
            return Err(AwaError::InvalidInput("empty component".to_string()));
        }

        // per-vertex adjacency: (graph edge, neighbor, side entered)
        let adjacency: Vec<Vec<(usize, usize, VertexEnd)>> = (0..n)
            .map(|v| {
                let vertex = graph.vertex(v);
                vertex
                    .edges_left()
                    .iter()
                    .chain(vertex.edges_right())
                    .map(|&e_idx| {
                        let sv = graph.edge(e_idx).other_vertex(v);
                        (e_idx, sv.vertex, sv.side)
                    })
                    .collect()
            })
            .collect();

        let mut tree = Tree::with_capacity(n);
        let mut graph_to_tree: Vec<Option<usize>> = vec![None; n];
        let mut edge_used = vec![false; graph.edge_count()];

        let root = 0;
        let root_t = tree.add_vertex(graph.idx_to_id(root), VertexType::Left);
        tree.vertices[root_t].null = false;
        tree.root = root_t;
        graph_to_tree[root] = Some(root_t);

        // frames: (graph vertex, tree vertex, adjacency cursor)
        let mut stack: Vec<(usize, usize, usize)> = vec![(root, root_t, 0)];

        while let Some(frame) = stack.last_mut() {
            let (g_v, t_v, cursor) = *frame;
            if cursor >= adjacency[g_v].len() {
                stack.pop();
                continue;
            }
            frame.2 += 1;

            let (e_idx, g_u, u_side) = adjacency[g_v][cursor];
            if edge_used[e_idx] {
                continue;
            }
            edge_used[e_idx] = true;

            match graph_to_tree[g_u] {
                Some(t_u) => {
                    trace!("back edge {} -> {}", t_v, t_u);
                    tree.add_back_edge(
                        t_v,
                        t_u,
                        Some(e_idx),
                        BackEdgeType::Ordinary,
                        EdgeColor::Black,
                    );
                }
                None => {
                    let t_u = tree.add_vertex(graph.idx_to_id(g_u), u_side.into());
                    graph_to_tree[g_u] = Some(t_u);
                    tree.add_tree_edge(t_v, t_u, Some(e_idx), EdgeColor::Black);
                    stack.push((g_u, t_u, 0));
                }
            }
        }

        if tree.size() != n {
            return Err(AwaError::InvalidInput(format!(
                "component is not connected: reached {} of {} vertices",
                tree.size(),
                n
            )));
        }

        Ok(tree)
    }

    /// Check the structural preconditions the engine relies on.
    pub fn validate(&self) -> Result<()> {
        let n = self.size();

        let mut seen = vec![false; n];
        for v in &self.vertices {
            if v.dfs_num() >= n || seen[v.dfs_num()] {
                return Err(AwaError::InvalidInput(format!(
                    "dfs numbers are not a permutation of [0, {})",
                    n
                )));
            }
            seen[v.dfs_num()] = true;
        }

        let mut roots = 0;
        for (idx, v) in self.vertices.iter().enumerate() {
            match v.parent_edge() {
                None => {
                    roots += 1;
                    if v.is_null() && n > 1 {
                        return Err(AwaError::InvalidInput(format!(
                            "vertex '{}' was never attached to the tree",
                            v.name()
                        )));
                    }
                    if v.dfs_num() != 0 {
                        return Err(AwaError::InvalidInput(format!(
                            "root '{}' does not hold dfs number 0",
                            v.name()
                        )));
                    }
                }
                Some(e_idx) => {
                    let e = &self.tree_edges[e_idx];
                    if e.child() != idx {
                        return Err(AwaError::InvalidInput(format!(
                            "parent edge of '{}' does not point back at it",
                            v.name()
                        )));
                    }
                    if self.vertices[e.parent()].dfs_num() >= v.dfs_num() {
                        return Err(AwaError::InvalidInput(format!(
                            "tree edge {} does not descend in dfs order",
                            e.id()
                        )));
                    }
                }
            }
        }
        if roots != 1 {
            return Err(AwaError::InvalidInput(format!(
                "expected one root, found {}",
                roots
            )));
        }

        for be in &self.back_edges {
            if be.src() >= n || be.tgt() >= n {
                return Err(AwaError::InvalidInput(format!(
                    "back edge {} references a vertex outside the component",
                    be.id()
                )));
            }
            if self.vertices[be.tgt()].dfs_num() > self.vertices[be.src()].dfs_num() {
                return Err(AwaError::InvalidInput(format!(
                    "back edge {} does not point up the tree",
                    be.id()
                )));
            }
        }

        Ok(())
    }

    /// Render the tree in DOT: tree edges solid and labelled `id class`,
    /// back edges dotted, capping red, simplifying blue.
    pub fn output_dot<W: Write>(&self, mut out: W) -> std::io::Result<()> {
        writeln!(out, "graph G {{")?;
        writeln!(out, "\trankdir = LR;")?;
        writeln!(out, "\tnode [shape = circle];")?;

        for (idx, v) in self.vertices.iter().enumerate() {
            let side = match v.vertex_type() {
                VertexType::Left => "-",
                VertexType::Right => "+",
                VertexType::Dummy => ".",
            };
            writeln!(
                out,
                "\t{} [label = \"{} ({}{})\"];",
                idx,
                idx,
                v.name(),
                side
            )?;
        }

        for e in &self.tree_edges {
            let class = match e.class() {
                Some(c) => c.to_string(),
                None => "\u{2205}".to_string(),
            };
            writeln!(
                out,
                "\t{} -- {} [label=\"{} {}\"];",
                e.parent(),
                e.child(),
                e.id(),
                class
            )?;
        }

        for be in &self.back_edges {
            let class = match be.class() {
                Some(c) => c.to_string(),
                None => String::new(),
            };
            let color = match be.edge_type() {
                BackEdgeType::Capping => "red",
                BackEdgeType::Simplifying => "blue",
                BackEdgeType::Ordinary => "black",
            };
            writeln!(
                out,
                "\t{} -- {} [label=\"{} {}\" style=\"dotted\" color=\"{}\"];",
                be.src(),
                be.tgt(),
                be.id(),
                class,
                color
            )?;
        }

        writeln!(out, "}}")
    }
}
