use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::io::Write;

use bstr::ByteSlice;
use fnv::FnvHashMap;
use log::warn;

use gfa::gfa::{Orientation as GfaOrientation, GFA};

use crate::error::{AwaError, Result};

/// One of the two sides of a bidirected vertex. An edge attaches to a
/// specific side of each of its endpoints.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum VertexEnd {
    Left,
    Right,
}

impl VertexEnd {
    #[inline]
    pub fn opposite(&self) -> Self {
        match self {
            VertexEnd::Left => VertexEnd::Right,
            VertexEnd::Right => VertexEnd::Left,
        }
    }
}

impl fmt::Display for VertexEnd {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            VertexEnd::Left => write!(f, "l"),
            VertexEnd::Right => write!(f, "r"),
        }
    }
}

/// Traversal orientation of a vertex. Forward enters the left side and
/// leaves the right side; reverse mirrors that.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Orientation {
    Forward,
    Reverse,
}

impl Orientation {
    /// The side through which an outgoing traversal leaves the vertex.
    #[inline]
    pub fn exit_side(&self) -> VertexEnd {
        match self {
            Orientation::Forward => VertexEnd::Right,
            Orientation::Reverse => VertexEnd::Left,
        }
    }

    /// The side through which an incoming traversal enters the vertex.
    #[inline]
    pub fn entry_side(&self) -> VertexEnd {
        self.exit_side().opposite()
    }
}

impl fmt::Display for Orientation {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Orientation::Forward => write!(f, "+"),
            Orientation::Reverse => write!(f, "-"),
        }
    }
}

/// A (side, vertex index) pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SideVertex {
    pub side: VertexEnd,
    pub vertex: usize,
}

impl SideVertex {
    #[inline]
    pub fn new(side: VertexEnd, vertex: usize) -> Self {
        SideVertex { side, vertex }
    }
}

/// A (vertex index, orientation) pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct OrientedVertex {
    pub vertex: usize,
    pub orientation: Orientation,
}

impl OrientedVertex {
    #[inline]
    pub fn new(vertex: usize, orientation: Orientation) -> Self {
        OrientedVertex {
            vertex,
            orientation,
        }
    }
}

impl fmt::Display for OrientedVertex {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}{}", self.vertex, self.orientation)
    }
}

/// Membership of a vertex in a path: which path, and at which step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PathInfo {
    pub path_id: u64,
    pub step_index: usize,
}

/// A haplotype path through the graph. Steps are stored as
/// (external vertex id, orientation) pairs so they survive component
/// splitting unchanged.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Path {
    pub id: u64,
    pub name: String,
    pub is_circular: bool,
    pub steps: Vec<(u64, Orientation)>,
}

/// A vertex of the bidirected graph: an immutable label, a stable
/// external id, and one set of incident edge indices per side.
#[derive(Debug, Clone, Default)]
pub struct Vertex {
    label: String,
    id: u64,
    edges_l: BTreeSet<usize>,
    edges_r: BTreeSet<usize>,
    paths: Vec<PathInfo>,
    is_reversed: bool,
}

impl Vertex {
    pub fn new(label: &str, id: u64) -> Self {
        Vertex {
            label: label.to_string(),
            id,
            edges_l: BTreeSet::new(),
            edges_r: BTreeSet::new(),
            paths: Vec::new(),
            is_reversed: false,
        }
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn edges_left(&self) -> &BTreeSet<usize> {
        &self.edges_l
    }

    pub fn edges_right(&self) -> &BTreeSet<usize> {
        &self.edges_r
    }

    pub fn edges_on(&self, side: VertexEnd) -> &BTreeSet<usize> {
        match side {
            VertexEnd::Left => &self.edges_l,
            VertexEnd::Right => &self.edges_r,
        }
    }

    pub fn paths(&self) -> &[PathInfo] {
        &self.paths
    }

    pub fn is_reversed(&self) -> bool {
        self.is_reversed
    }

    pub fn toggle_reversed(&mut self) -> bool {
        self.is_reversed = !self.is_reversed;
        self.is_reversed
    }

    /// A tip has at least one side with no incident edges.
    pub fn is_tip(&self) -> bool {
        self.edges_l.is_empty() || self.edges_r.is_empty()
    }

    /// The bare side of a tip. An isolated vertex reports its left side.
    pub fn tip_end(&self) -> Option<VertexEnd> {
        if self.edges_l.is_empty() {
            Some(VertexEnd::Left)
        } else if self.edges_r.is_empty() {
            Some(VertexEnd::Right)
        } else {
            None
        }
    }

    pub fn add_edge(&mut self, edge_idx: usize, side: VertexEnd) {
        match side {
            VertexEnd::Left => self.edges_l.insert(edge_idx),
            VertexEnd::Right => self.edges_r.insert(edge_idx),
        };
    }

    pub fn clear_edges(&mut self) {
        self.edges_l.clear();
        self.edges_r.clear();
    }

    pub fn add_path(&mut self, path_id: u64, step_index: usize) {
        self.paths.push(PathInfo {
            path_id,
            step_index,
        });
    }
}

/// An edge of the bidirected graph: an unordered pair of
/// (vertex, side) attachments. Self-loops are permitted.
#[derive(Debug, Clone)]
pub struct Edge {
    v1: usize,
    v1_end: VertexEnd,
    v2: usize,
    v2_end: VertexEnd,
    eq_class: Option<usize>,
    refs: BTreeSet<u64>,
}

impl Edge {
    pub fn new(v1: usize, v1_end: VertexEnd, v2: usize, v2_end: VertexEnd) -> Self {
        Edge {
            v1,
            v1_end,
            v2,
            v2_end,
            eq_class: None,
            refs: BTreeSet::new(),
        }
    }

    pub fn endpoints(&self) -> (usize, VertexEnd, usize, VertexEnd) {
        (self.v1, self.v1_end, self.v2, self.v2_end)
    }

    /// The endpoint on the far side from `vertex_idx`. For a self-loop
    /// this returns the first attachment.
    pub fn other_vertex(&self, vertex_idx: usize) -> SideVertex {
        if self.v1 == vertex_idx {
            SideVertex::new(self.v2_end, self.v2)
        } else {
            SideVertex::new(self.v1_end, self.v1)
        }
    }

    pub fn is_self_loop(&self) -> bool {
        self.v1 == self.v2
    }

    pub fn eq_class(&self) -> Option<usize> {
        self.eq_class
    }

    pub fn set_eq_class(&mut self, class: usize) {
        self.eq_class = Some(class);
    }

    pub fn refs(&self) -> &BTreeSet<u64> {
        &self.refs
    }

    pub fn add_ref(&mut self, ref_id: u64) {
        self.refs.insert(ref_id);
    }
}

impl fmt::Display for Edge {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "{{Edge {}{} {}{}}}",
            self.v1, self.v1_end, self.v2, self.v2_end
        )
    }
}

/// A bidirected sequence graph with haplotype paths.
///
/// Vertices are addressed by dense index internally and by a stable
/// external id at the boundary; the two are linked by a bidirectional
/// map kept consistent by `add_vertex`.
#[derive(Debug, Clone, Default)]
pub struct VariationGraph {
    vertices: Vec<Vertex>,
    edges: Vec<Edge>,
    paths: BTreeMap<u64, Path>,
    haplotype_starts: BTreeSet<SideVertex>,
    haplotype_ends: BTreeSet<SideVertex>,
    id_to_idx: FnvHashMap<u64, usize>,
}

impl VariationGraph {
    pub fn new() -> Self {
        Default::default()
    }

    pub fn with_capacity(vertex_count: usize, edge_count: usize) -> Self {
        let mut g = VariationGraph::new();
        g.vertices.reserve(vertex_count);
        g.edges.reserve(edge_count);
        g
    }

    pub fn size(&self) -> usize {
        self.vertices.len()
    }

    pub fn edge_count(&self) -> usize {
        self.edges.len()
    }

    pub fn path_count(&self) -> usize {
        self.paths.len()
    }

    pub fn vertex(&self, idx: usize) -> &Vertex {
        &self.vertices[idx]
    }

    pub fn vertex_mut(&mut self, idx: usize) -> &mut Vertex {
        &mut self.vertices[idx]
    }

    pub fn edge(&self, idx: usize) -> &Edge {
        &self.edges[idx]
    }

    pub fn edge_mut(&mut self, idx: usize) -> &mut Edge {
        &mut self.edges[idx]
    }

    pub fn edges(&self) -> &[Edge] {
        &self.edges
    }

    /// Resolve an external vertex id to its dense index.
    pub fn vertex_idx(&self, id: u64) -> Result<usize> {
        self.id_to_idx
            .get(&id)
            .copied()
            .ok_or_else(|| AwaError::NotFound(format!("vertex '{}'", id)))
    }

    pub fn idx_to_id(&self, idx: usize) -> u64 {
        self.vertices[idx].id()
    }

    pub fn add_vertex(&mut self, vertex: Vertex) -> usize {
        let idx = self.vertices.len();
        self.id_to_idx.insert(vertex.id(), idx);
        self.vertices.push(vertex);
        idx
    }

    /// Add an edge between two vertices given by dense index.
    pub fn add_edge(
        &mut self,
        v1: usize,
        v1_end: VertexEnd,
        v2: usize,
        v2_end: VertexEnd,
    ) -> usize {
        let edge_idx = self.edges.len();
        self.edges.push(Edge::new(v1, v1_end, v2, v2_end));
        self.vertices[v1].add_edge(edge_idx, v1_end);
        self.vertices[v2].add_edge(edge_idx, v2_end);
        edge_idx
    }

    /// Add an edge between two vertices given by external id.
    pub fn add_edge_by_id(
        &mut self,
        v1_id: u64,
        v1_end: VertexEnd,
        v2_id: u64,
        v2_end: VertexEnd,
    ) -> Result<usize> {
        let v1 = self.vertex_idx(v1_id)?;
        let v2 = self.vertex_idx(v2_id)?;
        Ok(self.add_edge(v1, v1_end, v2, v2_end))
    }

    pub fn add_path(&mut self, path: Path) -> Result<()> {
        if self.paths.contains_key(&path.id) {
            return Err(AwaError::InvalidGraph(format!(
                "path id {} already exists",
                path.id
            )));
        }
        self.paths.insert(path.id, path);
        Ok(())
    }

    pub fn path(&self, path_id: u64) -> Result<&Path> {
        self.paths
            .get(&path_id)
            .ok_or_else(|| AwaError::NotFound(format!("path {}", path_id)))
    }

    pub fn paths(&self) -> impl Iterator<Item = &Path> {
        self.paths.values()
    }

    pub fn add_haplotype_start(&mut self, sv: SideVertex) {
        self.haplotype_starts.insert(sv);
    }

    pub fn add_haplotype_end(&mut self, sv: SideVertex) {
        self.haplotype_ends.insert(sv);
    }

    pub fn haplotype_start_nodes(&self) -> &BTreeSet<SideVertex> {
        &self.haplotype_starts
    }

    pub fn haplotype_end_nodes(&self) -> &BTreeSet<SideVertex> {
        &self.haplotype_ends
    }

    /// All (side, vertex) pairs where the side carries no edges. An
    /// isolated vertex contributes its left side only.
    pub fn tips(&self) -> BTreeSet<SideVertex> {
        let mut tips = BTreeSet::new();
        for (idx, v) in self.vertices.iter().enumerate() {
            if v.edges_left().is_empty() && v.edges_right().is_empty() {
                tips.insert(SideVertex::new(VertexEnd::Left, idx));
            } else if let Some(side) = v.tip_end() {
                tips.insert(SideVertex::new(side, idx));
            }
        }
        tips
    }

    /// Tips that are not a haplotype start or end.
    pub fn orphan_tips(&self) -> BTreeSet<SideVertex> {
        let mut orphans = self.tips();
        for sv in &self.haplotype_starts {
            orphans.remove(sv);
        }
        for sv in &self.haplotype_ends {
            orphans.remove(sv);
        }
        orphans
    }

    /// Haplotype starts that are also tips.
    pub fn graph_start_nodes(&self) -> BTreeSet<SideVertex> {
        let tips = self.tips();
        self.haplotype_starts
            .intersection(&tips)
            .copied()
            .collect()
    }

    /// Haplotype ends that are also tips.
    pub fn graph_end_nodes(&self) -> BTreeSet<SideVertex> {
        let tips = self.tips();
        self.haplotype_ends.intersection(&tips).copied().collect()
    }

    /// The vertices adjacent through one side of a vertex.
    pub fn adj_vertices(&self, vertex_idx: usize, side: VertexEnd) -> Vec<SideVertex> {
        self.vertices[vertex_idx]
            .edges_on(side)
            .iter()
            .map(|&e_idx| self.edges[e_idx].other_vertex(vertex_idx))
            .collect()
    }

    /// Neighbors reachable by continuing an oriented traversal out of a
    /// vertex. Forward leaves through the right side; a neighbor entered
    /// on its left side is traversed forward.
    pub fn outgoing_neighbours(&self, ov: OrientedVertex) -> BTreeSet<OrientedVertex> {
        let mut neighbours = BTreeSet::new();
        let side = ov.orientation.exit_side();
        for &e_idx in self.vertices[ov.vertex].edges_on(side) {
            let SideVertex { side, vertex } = self.edges[e_idx].other_vertex(ov.vertex);
            let o = match side {
                VertexEnd::Left => Orientation::Forward,
                VertexEnd::Right => Orientation::Reverse,
            };
            neighbours.insert(OrientedVertex::new(vertex, o));
        }
        neighbours
    }

    /// Neighbors from which an oriented traversal can arrive at a vertex.
    pub fn incoming_neighbours(&self, ov: OrientedVertex) -> BTreeSet<OrientedVertex> {
        let mut neighbours = BTreeSet::new();
        let side = ov.orientation.entry_side();
        for &e_idx in self.vertices[ov.vertex].edges_on(side) {
            let SideVertex { side, vertex } = self.edges[e_idx].other_vertex(ov.vertex);
            let o = match side {
                VertexEnd::Right => Orientation::Forward,
                VertexEnd::Left => Orientation::Reverse,
            };
            neighbours.insert(OrientedVertex::new(vertex, o));
        }
        neighbours
    }

    /// The single edge joining two oriented vertices. Anything other
    /// than exactly one shared edge is a malformed graph.
    pub fn shared_edge_idx(&self, src: OrientedVertex, snk: OrientedVertex) -> Result<usize> {
        let src_edges = self.vertices[src.vertex].edges_on(src.orientation.exit_side());
        let snk_edges = self.vertices[snk.vertex].edges_on(snk.orientation.entry_side());

        let shared: Vec<usize> = src_edges.intersection(snk_edges).copied().collect();
        match shared.as_slice() {
            [e_idx] => Ok(*e_idx),
            _ => Err(AwaError::InvalidGraph(format!(
                "expected one shared edge between {} and {} but found {}",
                src,
                snk,
                shared.len()
            ))),
        }
    }

    pub fn shared_edge(&self, src: OrientedVertex, snk: OrientedVertex) -> Result<&Edge> {
        Ok(&self.edges[self.shared_edge_idx(src, snk)?])
    }

    pub fn shared_edge_mut(
        &mut self,
        src: OrientedVertex,
        snk: OrientedVertex,
    ) -> Result<&mut Edge> {
        let e_idx = self.shared_edge_idx(src, snk)?;
        Ok(&mut self.edges[e_idx])
    }

    /// Check that every consecutive step pair of every path is joined by
    /// an edge whose attachments agree with the step orientations.
    pub fn validate_paths(&self) -> Result<()> {
        for path in self.paths.values() {
            for (i, window) in path.steps.windows(2).enumerate() {
                let (id1, o1) = window[0];
                let (id2, o2) = window[1];
                let v1 = self.vertex_idx(id1)?;
                let v2 = self.vertex_idx(id2)?;
                let src = OrientedVertex::new(v1, o1);
                let snk = OrientedVertex::new(v2, o2);
                if self.shared_edge_idx(src, snk).is_err() {
                    return Err(AwaError::InvalidGraph(format!(
                        "path '{}' is not valid at steps {} ({}{}) and {} ({}{})",
                        path.name,
                        i,
                        id1,
                        o1,
                        i + 1,
                        id2,
                        o2
                    )));
                }
            }
        }
        Ok(())
    }

    /// Split the graph into its weakly connected components.
    ///
    /// Each component is a fresh graph with dense local indices; external
    /// ids, paths, and haplotype endpoints carry over. Every edge lands in
    /// exactly one component. A path spanning two components is a loading
    /// error.
    pub fn componentize(&self) -> Result<Vec<VariationGraph>> {
        let n = self.size();
        let mut visited = vec![false; n];
        let mut components: Vec<VariationGraph> = Vec::new();
        let mut path_owner: FnvHashMap<u64, usize> = FnvHashMap::default();

        for seed in 0..n {
            if visited[seed] {
                continue;
            }

            // grow one component with an iterative DFS over both sides
            let mut members: Vec<usize> = Vec::new();
            let mut stack = vec![seed];
            visited[seed] = true;
            while let Some(v) = stack.pop() {
                members.push(v);
                let vertex = &self.vertices[v];
                for &e_idx in vertex.edges_left().iter().chain(vertex.edges_right()) {
                    let adj = self.edges[e_idx].other_vertex(v).vertex;
                    if !visited[adj] {
                        visited[adj] = true;
                        stack.push(adj);
                    }
                }
            }
            members.sort_unstable();

            let mut comp = VariationGraph::with_capacity(members.len(), 0);
            let mut old_to_new: FnvHashMap<usize, usize> = FnvHashMap::default();
            let mut comp_edges: BTreeSet<usize> = BTreeSet::new();
            let mut comp_paths: BTreeSet<u64> = BTreeSet::new();

            for &old_idx in &members {
                let mut v = self.vertices[old_idx].clone();
                v.clear_edges();
                let new_idx = comp.add_vertex(v);
                old_to_new.insert(old_idx, new_idx);

                let vertex = &self.vertices[old_idx];
                for &e_idx in vertex.edges_left().iter().chain(vertex.edges_right()) {
                    comp_edges.insert(e_idx);
                }
                for info in vertex.paths() {
                    comp_paths.insert(info.path_id);
                }

                for &side in &[VertexEnd::Left, VertexEnd::Right] {
                    let sv = SideVertex::new(side, old_idx);
                    if self.haplotype_starts.contains(&sv) {
                        comp.add_haplotype_start(SideVertex::new(side, new_idx));
                    }
                    if self.haplotype_ends.contains(&sv) {
                        comp.add_haplotype_end(SideVertex::new(side, new_idx));
                    }
                }
            }

            for &e_idx in &comp_edges {
                let (v1, v1_end, v2, v2_end) = self.edges[e_idx].endpoints();
                comp.add_edge(old_to_new[&v1], v1_end, old_to_new[&v2], v2_end);
            }

            for path_id in comp_paths {
                if let Some(&owner) = path_owner.get(&path_id) {
                    return Err(AwaError::InvalidGraph(format!(
                        "path {} spans components {} and {}",
                        path_id,
                        owner,
                        components.len()
                    )));
                }
                path_owner.insert(path_id, components.len());
                comp.add_path(self.paths[&path_id].clone())?;
            }

            components.push(comp);
        }

        Ok(components)
    }

    /// Build a variation graph from a parsed GFA 1.0 file.
    ///
    /// Segments become vertices, links become edges attached to the sides
    /// their orientations imply, and paths are recorded both as step
    /// sequences and as per-vertex memberships; the first and last step of
    /// each path register haplotype endpoints.
    pub fn from_gfa(gfa: &GFA<usize, ()>) -> Result<VariationGraph> {
        let mut graph =
            VariationGraph::with_capacity(gfa.segments.len(), gfa.links.len());

        for segment in &gfa.segments {
            let id = segment.name as u64;
            if graph.vertex_idx(id).is_ok() {
                return Err(AwaError::InvalidGraph(format!(
                    "duplicate segment '{}'",
                    id
                )));
            }
            let label = segment.sequence.to_str_lossy();
            graph.add_vertex(Vertex::new(&label, id));
        }

        for link in &gfa.links {
            let from_end = match link.from_orient {
                GfaOrientation::Forward => VertexEnd::Right,
                GfaOrientation::Backward => VertexEnd::Left,
            };
            let to_end = match link.to_orient {
                GfaOrientation::Forward => VertexEnd::Left,
                GfaOrientation::Backward => VertexEnd::Right,
            };
            graph.add_edge_by_id(
                link.from_segment as u64,
                from_end,
                link.to_segment as u64,
                to_end,
            )?;
        }

        for (path_id, gfa_path) in gfa.paths.iter().enumerate() {
            let path_id = path_id as u64;
            let name = gfa_path.path_name.to_str_lossy().into_owned();
            let mut steps: Vec<(u64, Orientation)> = Vec::new();

            for (step_index, (seg, orient)) in gfa_path.iter().enumerate() {
                let id = seg as u64;
                let o = match orient {
                    GfaOrientation::Forward => Orientation::Forward,
                    GfaOrientation::Backward => Orientation::Reverse,
                };
                steps.push((id, o));
                let v_idx = graph.vertex_idx(id)?;
                graph.vertex_mut(v_idx).add_path(path_id, step_index);
            }

            if steps.is_empty() {
                warn!("path '{}' has no steps, skipping", name);
                continue;
            }

            let (first_id, first_o) = steps[0];
            let first_idx = graph.vertex_idx(first_id)?;
            graph.add_haplotype_start(SideVertex::new(first_o.entry_side(), first_idx));

            let (last_id, last_o) = steps[steps.len() - 1];
            let last_idx = graph.vertex_idx(last_id)?;
            graph.add_haplotype_end(SideVertex::new(last_o.exit_side(), last_idx));

            graph.add_path(Path {
                id: path_id,
                name,
                is_circular: false,
                steps,
            })?;
        }

        Ok(graph)
    }

    /// Render the graph in DOT, labelling edges with their equivalence
    /// classes where assigned.
    pub fn output_dot<W: Write>(&self, mut out: W) -> std::io::Result<()> {
        writeln!(out, "graph G {{")?;
        writeln!(out, "\trankdir=LR;")?;
        writeln!(out, "\tnode [shape=record];")?;

        for (idx, v) in self.vertices.iter().enumerate() {
            writeln!(out, "\t{} [label=\"{} ({})\"];", idx, v.id(), idx)?;
        }

        for e in &self.edges {
            let class = match e.eq_class() {
                Some(c) => c.to_string(),
                None => String::new(),
            };
            writeln!(
                out,
                "\t{} -- {} [label=\"{}\"];",
                e.v1, e.v2, class
            )?;
        }

        writeln!(out, "}}")
    }
}
