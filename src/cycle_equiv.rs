use std::sync::atomic::{AtomicBool, Ordering};

use log::{debug, info};
use rayon::prelude::*;
use rustc_hash::FxHashSet;
use serde::{Deserialize, Serialize};

use crate::bidirected::VariationGraph;
use crate::error::{AwaError, Result};
use crate::spanning_tree::{BackEdgeType, EdgeColor, Tree};

/// Cooperative cancellation flag, checked by the engine between
/// vertices. Wrap in an `Arc` to share with a canceller.
#[derive(Debug, Default)]
pub struct CancelToken {
    flag: AtomicBool,
}

impl CancelToken {
    pub fn new() -> Self {
        Default::default()
    }

    pub fn cancel(&self) {
        self.flag.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::Relaxed)
    }
}

/// Per-vertex annotations produced by one engine run.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EquivReport {
    /// Lowest dfs number reachable from each vertex's subtree via one
    /// back edge; None only for an isolated root.
    pub hi: Vec<Option<usize>>,
    /// Bracket-list size when each vertex's iteration closed; zero for
    /// the root.
    pub final_list_sizes: Vec<usize>,
    /// Vertices at which a hairpin region opened.
    pub opened_hairpin: Vec<bool>,
    /// Vertices recorded as the final boundary of a closed hairpin.
    pub closed_hairpin: Vec<bool>,
    /// Number of equivalence classes assigned.
    pub class_count: usize,
}

impl EquivReport {
    fn new(size: usize) -> Self {
        EquivReport {
            hi: vec![None; size],
            final_list_sizes: vec![0; size],
            opened_hairpin: vec![false; size],
            closed_hairpin: vec![false; size],
            class_count: 0,
        }
    }
}

/// One reported equivalence-class assignment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct EdgeClass {
    pub edge_id: usize,
    pub graph_edge: Option<usize>,
    pub class: usize,
}

/// State of the hairpin detector inside the reverse walk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum HairpinState {
    Outside,
    Inside { boundary: usize },
}

/// Assign a cycle-equivalence class to every tree edge and non-capping
/// back edge of a spanning tree.
///
/// Two edges end up in the same class iff they belong to exactly the
/// same set of simple cycles of the underlying graph. The pass walks the
/// tree once in reverse DFS order, maintaining per-vertex bracket lists
/// and synthesizing capping and simplifying back edges where the bracket
/// stack needs them.
pub fn cycle_equivalence(tree: &mut Tree) -> Result<EquivReport> {
    let token = CancelToken::new();
    cycle_equivalence_cancellable(tree, &token)
}

pub fn cycle_equivalence_cancellable(
    tree: &mut Tree,
    cancel: &CancelToken,
) -> Result<EquivReport> {
    tree.validate()?;

    let n = tree.size();
    let mut report = EquivReport::new(n);
    let mut hairpin = HairpinState::Outside;

    // articulation skip for hi2; nothing populates this set here
    let articulated: FxHashSet<usize> = FxHashSet::default();

    for rank in (0..n).rev() {
        if cancel.is_cancelled() {
            return Err(AwaError::Cancelled);
        }

        let v = tree.vertex_at_dfs(rank);

        // a hairpin in progress ends when the walk leaves its region
        // through a leaf of another subtree
        if let HairpinState::Inside { boundary } = hairpin {
            if tree.is_leaf(v) && !tree.is_root(v) {
                debug!(
                    "hairpin boundary end at '{}'",
                    tree.vertex(boundary).name()
                );
                report.closed_hairpin[boundary] = true;
                hairpin = HairpinState::Outside;
            }
        }

        // (a) hi values
        // -------------
        let mut hi_0: Option<usize> = None;
        for be_idx in tree.obe_idxs(v) {
            let tgt = tree.back_edge(be_idx).tgt();
            let d = tree.vertex(tgt).dfs_num();
            hi_0 = Some(hi_0.map_or(d, |h| h.min(d)));
        }

        let children = tree.children(v);
        let mut hi_and_child: Vec<(usize, usize)> = Vec::with_capacity(children.len());
        for &c in &children {
            if let Some(h) = tree.hi(c) {
                hi_and_child.push((h, c));
            }
        }
        hi_and_child.sort_unstable();

        let hi_1 = hi_and_child.first().map(|&(h, _)| h);

        // hi of the second-lowest child still reaching above v
        let mut hi_2: Option<usize> = None;
        for &(h, c) in hi_and_child.iter().skip(1) {
            if h < rank && !articulated.contains(&c) {
                hi_2 = Some(h);
                break;
            }
        }

        let hi_v = match (hi_0, hi_1) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, None) => a,
            (None, b) => b,
        };
        if let Some(h) = hi_v {
            tree.set_hi(v, h);
        }

        // (b) merge the children's bracket lists
        // --------------------------------------
        for &c in &children {
            tree.concat_bracket_lists(v, c);
        }

        // (c) retire back edges ending here; first arrival fixes the
        // class of any unclassed non-capping edge
        // -----------------------------------------------------------
        for be_idx in tree.ibe_idxs(v) {
            let be = tree.back_edge(be_idx);
            let self_loop = be.is_self_loop();
            let capping = be.is_capping();
            let class_defined = be.is_class_defined();

            // a self-loop opens and closes at the same vertex and never
            // holds a bracket
            if !self_loop {
                tree.del_bracket(v, be_idx)?;
            }
            if !capping && !class_defined {
                let class = tree.new_class();
                tree.back_edge_mut(be_idx).set_class(class);
            }
        }

        // (d) open brackets for back edges leaving here
        // ---------------------------------------------
        for be_idx in tree.obe_idxs(v) {
            if !tree.back_edge(be_idx).is_self_loop() {
                tree.push_bracket(v, be_idx)?;
            }
        }

        // (e) capping back edge, keeping the stack honest where two
        // upward-reaching subtrees reconverge
        // ----------------------------------------------------------
        let needs_cap = match (hi_2, hi_0) {
            (Some(h2), Some(h0)) => h2 < h0,
            (Some(_), None) => true,
            _ => false,
        };
        if needs_cap {
            let dest = tree.vertex_at_dfs(hi_2.unwrap());
            let be_idx =
                tree.add_back_edge(v, dest, None, BackEdgeType::Capping, EdgeColor::Gray);
            tree.push_bracket(v, be_idx)?;
        }

        // (f) empty list: the vertex bounds a region with no covering
        // back edge
        // -----------------------------------------------------------
        if tree.list_size(v) == 0 {
            if tree.is_root(v) {
                // the root's empty list is the normal end state; if a
                // hairpin is open it reaches the root
                if let HairpinState::Inside { .. } = hairpin {
                    hairpin = HairpinState::Inside { boundary: v };
                }
            } else {
                let root = tree.root_idx();
                let be_idx = tree.add_back_edge(
                    v,
                    root,
                    None,
                    BackEdgeType::Simplifying,
                    EdgeColor::Gray,
                );
                tree.push_bracket(v, be_idx)?;
                let root_dfs = tree.vertex(root).dfs_num();
                tree.set_hi(v, root_dfs);

                if !tree.vertex(v).is_dummy() {
                    debug!("hairpin boundary start at '{}'", tree.vertex(v).name());
                    report.opened_hairpin[v] = true;
                    hairpin = HairpinState::Inside { boundary: v };
                }
            }
        } else if let HairpinState::Inside { .. } = hairpin {
            let top_id = tree.top_bracket(v)?.back_edge_id();
            if tree.back_edge_by_id(top_id)?.is_simplifying() {
                hairpin = HairpinState::Inside { boundary: v };
            }
        }

        // (g) class for the tree edge into v
        // ----------------------------------
        if !tree.is_root(v) {
            let size = tree.list_size(v);
            let (top_id, recent_size, recent_class) = {
                let b = tree.top_bracket(v)?;
                (b.back_edge_id(), b.recent_size(), b.recent_class())
            };

            let class = if recent_size != Some(size) {
                let class = tree.new_class();
                let b = tree.top_bracket_mut(v)?;
                b.set_recent_size(size);
                b.set_recent_class(class);
                class
            } else {
                recent_class.ok_or_else(|| {
                    AwaError::InternalInvariant(format!(
                        "top bracket at vertex '{}' has a recent size but no class",
                        tree.vertex(v).name()
                    ))
                })?
            };

            tree.incoming_edge_mut(v)?.set_class(class);

            // a sole bracket is cycle-equivalent to the tree edge under it
            if size == 1 {
                tree.back_edge_by_id_mut(top_id)?.set_class(class);
            }
        }

        report.final_list_sizes[v] = tree.list_size(v);
        report.hi[v] = tree.hi(v);
    }

    if let HairpinState::Inside { boundary } = hairpin {
        debug!(
            "hairpin boundary end at '{}'",
            tree.vertex(boundary).name()
        );
        report.closed_hairpin[boundary] = true;
    }

    report.class_count = tree.class_count();
    Ok(report)
}

/// The classes the engine reports: every tree edge and every non-capping
/// back edge that received one. Capping edges are internal and filtered
/// here even when the fusion rule touched them.
pub fn edge_classes(tree: &Tree) -> Vec<EdgeClass> {
    let mut classes = Vec::new();
    for e in tree.tree_edges() {
        if let Some(class) = e.class() {
            classes.push(EdgeClass {
                edge_id: e.id(),
                graph_edge: tree.graph_edge_of(e.id()),
                class,
            });
        }
    }
    for be in tree.back_edges() {
        if be.is_capping() {
            continue;
        }
        if let Some(class) = be.class() {
            classes.push(EdgeClass {
                edge_id: be.id(),
                graph_edge: tree.graph_edge_of(be.id()),
                class,
            });
        }
    }
    classes
}

/// Copy assigned classes back onto the source graph's edges. Capping and
/// simplifying edges have no graph counterpart and are skipped.
pub fn apply_classes(tree: &Tree, graph: &mut VariationGraph) {
    for ec in edge_classes(tree) {
        if let Some(g_idx) = ec.graph_edge {
            graph.edge_mut(g_idx).set_eq_class(ec.class);
        }
    }
}

/// The result of running the engine over one connected component.
pub struct ComponentDecomposition {
    pub graph: VariationGraph,
    pub tree: Tree,
    pub report: EquivReport,
}

/// Split a graph into components and run the engine once per component,
/// in parallel. Class ids are scoped to a component.
pub fn decompose(graph: &VariationGraph) -> Result<Vec<ComponentDecomposition>> {
    let token = CancelToken::new();
    decompose_cancellable(graph, &token)
}

pub fn decompose_cancellable(
    graph: &VariationGraph,
    cancel: &CancelToken,
) -> Result<Vec<ComponentDecomposition>> {
    let components = graph.componentize()?;
    info!("decomposing {} component(s)", components.len());

    components
        .into_par_iter()
        .map(|mut comp| {
            let mut tree = Tree::from_component(&comp)?;
            let report = cycle_equivalence_cancellable(&mut tree, cancel)?;
            apply_classes(&tree, &mut comp);
            Ok(ComponentDecomposition {
                graph: comp,
                tree,
                report,
            })
        })
        .collect()
}

// ----------------------------------- TESTS -------------------------------
#[cfg(test)]
mod tests {
    use super::*;
    use crate::bidirected::{Vertex, VertexEnd};
    use crate::spanning_tree::VertexType;

    use std::collections::BTreeSet;

    fn linear_graph(ids: &[u64]) -> VariationGraph {
        let mut g = VariationGraph::new();
        for &id in ids {
            g.add_vertex(Vertex::new("A", id));
        }
        for w in 0..ids.len() - 1 {
            g.add_edge(w, VertexEnd::Right, w + 1, VertexEnd::Left);
        }
        g
    }

    fn triangle() -> VariationGraph {
        let mut g = linear_graph(&[1, 2, 3]);
        g.add_edge(2, VertexEnd::Right, 0, VertexEnd::Left);
        g
    }

    /// Brute-force cycle equivalence over a petgraph mirror: enumerate
    /// every simple cycle as an edge set, then compare per-edge cycle
    /// memberships.
    fn brute_force_classes(g: &VariationGraph) -> Vec<BTreeSet<usize>> {
        use petgraph::graph::{NodeIndex, UnGraph};
        use petgraph::visit::EdgeRef as _;

        let mut pg: UnGraph<(), usize> = UnGraph::new_undirected();
        let nodes: Vec<NodeIndex> = (0..g.size()).map(|_| pg.add_node(())).collect();
        for (e_idx, e) in g.edges().iter().enumerate() {
            let (v1, _, v2, _) = e.endpoints();
            pg.add_edge(nodes[v1], nodes[v2], e_idx);
        }

        // every simple path target -> source closed by the edge itself
        // forms a simple cycle; a set of edge indices identifies it
        fn paths(
            pg: &UnGraph<(), usize>,
            current: NodeIndex,
            goal: NodeIndex,
            banned_edge: petgraph::graph::EdgeIndex,
            visited: &mut Vec<NodeIndex>,
            used: &mut Vec<usize>,
            out: &mut BTreeSet<BTreeSet<usize>>,
            closing: usize,
        ) {
            if current == goal {
                let mut cycle: BTreeSet<usize> = used.iter().copied().collect();
                cycle.insert(closing);
                out.insert(cycle);
                return;
            }
            for edge in pg.edges(current) {
                if edge.id() == banned_edge {
                    continue;
                }
                let next = if edge.source() == current {
                    edge.target()
                } else {
                    edge.source()
                };
                if visited.contains(&next) {
                    continue;
                }
                visited.push(next);
                used.push(*edge.weight());
                paths(pg, next, goal, banned_edge, visited, used, out, closing);
                used.pop();
                visited.pop();
            }
        }

        let mut cycles: BTreeSet<BTreeSet<usize>> = BTreeSet::new();
        for edge in pg.edge_references() {
            let e_idx = *edge.weight();
            if edge.source() == edge.target() {
                let mut cycle = BTreeSet::new();
                cycle.insert(e_idx);
                cycles.insert(cycle);
                continue;
            }
            let mut visited = vec![edge.target()];
            let mut used = Vec::new();
            paths(
                &pg,
                edge.target(),
                edge.source(),
                edge.id(),
                &mut visited,
                &mut used,
                &mut cycles,
                e_idx,
            );
        }

        let cycles: Vec<BTreeSet<usize>> = cycles.into_iter().collect();
        (0..g.edge_count())
            .map(|e_idx| {
                cycles
                    .iter()
                    .enumerate()
                    .filter(|(_, c)| c.contains(&e_idx))
                    .map(|(i, _)| i)
                    .collect()
            })
            .collect()
    }

    /// Check that classes agree with brute-forced cycle sets. Only
    /// meaningful when every edge lies on at least one cycle.
    fn assert_matches_brute_force(g: &VariationGraph) {
        let decomp = decompose(g).unwrap();
        assert_eq!(decomp.len(), 1);
        let comp = &decomp[0].graph;

        let memberships = brute_force_classes(comp);
        for m in &memberships {
            assert!(!m.is_empty(), "graph has an edge on no cycle");
        }

        for i in 0..comp.edge_count() {
            for j in 0..comp.edge_count() {
                let same_class = comp.edge(i).eq_class() == comp.edge(j).eq_class();
                let same_cycles = memberships[i] == memberships[j];
                assert_eq!(
                    same_class, same_cycles,
                    "edges {} and {} disagree with brute force",
                    i, j
                );
            }
        }
    }

    fn classes_of(g: &VariationGraph) -> Vec<usize> {
        g.edges()
            .iter()
            .map(|e| e.eq_class().expect("edge left unclassed"))
            .collect()
    }

    #[test]
    fn scenario_single_cycle() {
        let g = triangle();
        let decomp = decompose(&g).unwrap();
        let comp = &decomp[0];

        let classes = classes_of(&comp.graph);
        assert!(classes.iter().all(|&c| c == classes[0]));

        // every vertex of the cycle reaches the root via one back edge
        assert_eq!(comp.report.hi, vec![Some(0), Some(0), Some(0)]);
        assert_eq!(comp.report.final_list_sizes[comp.tree.root_idx()], 0);
        assert!(!comp.report.opened_hairpin.iter().any(|&b| b));

        assert_matches_brute_force(&g);
    }

    #[test]
    fn scenario_two_bubbles_in_series() {
        // s -> {a, b} -> t -> {u, v} -> w
        let mut g = VariationGraph::new();
        for id in 1..=7 {
            g.add_vertex(Vertex::new("A", id));
        }
        let (s, a, b, t, u, v, w) = (0, 1, 2, 3, 4, 5, 6);
        let first = [
            g.add_edge(s, VertexEnd::Right, a, VertexEnd::Left),
            g.add_edge(s, VertexEnd::Right, b, VertexEnd::Left),
            g.add_edge(a, VertexEnd::Right, t, VertexEnd::Left),
            g.add_edge(b, VertexEnd::Right, t, VertexEnd::Left),
        ];
        let second = [
            g.add_edge(t, VertexEnd::Right, u, VertexEnd::Left),
            g.add_edge(t, VertexEnd::Right, v, VertexEnd::Left),
            g.add_edge(u, VertexEnd::Right, w, VertexEnd::Left),
            g.add_edge(v, VertexEnd::Right, w, VertexEnd::Left),
        ];

        let decomp = decompose(&g).unwrap();
        let comp = &decomp[0].graph;

        let class_x = comp.edge(first[0]).eq_class().unwrap();
        for &e in &first {
            assert_eq!(comp.edge(e).eq_class(), Some(class_x));
        }
        let class_y = comp.edge(second[0]).eq_class().unwrap();
        for &e in &second {
            assert_eq!(comp.edge(e).eq_class(), Some(class_y));
        }
        assert_ne!(class_x, class_y);

        assert_matches_brute_force(&g);
    }

    #[test]
    fn scenario_nested_bubble() {
        // outer cycle s-a ... t-b-s with an inner bubble a -> {p, q} -> t
        let mut g = VariationGraph::new();
        for id in 1..=6 {
            g.add_vertex(Vertex::new("A", id));
        }
        let (s, a, p, q, t, b) = (0, 1, 2, 3, 4, 5);
        let outer_sa = g.add_edge(s, VertexEnd::Right, a, VertexEnd::Left);
        let corridor = [
            g.add_edge(a, VertexEnd::Right, p, VertexEnd::Left),
            g.add_edge(p, VertexEnd::Right, t, VertexEnd::Left),
        ];
        let inner = [
            g.add_edge(a, VertexEnd::Right, q, VertexEnd::Left),
            g.add_edge(q, VertexEnd::Right, t, VertexEnd::Left),
        ];
        let outer_tb = g.add_edge(t, VertexEnd::Right, b, VertexEnd::Left);
        let outer_bs = g.add_edge(b, VertexEnd::Right, s, VertexEnd::Left);

        let decomp = decompose(&g).unwrap();
        let comp = &decomp[0].graph;

        let outer_class = comp.edge(outer_sa).eq_class().unwrap();
        assert_eq!(comp.edge(outer_tb).eq_class(), Some(outer_class));
        assert_eq!(comp.edge(outer_bs).eq_class(), Some(outer_class));

        let inner_class = comp.edge(inner[0]).eq_class().unwrap();
        assert_eq!(comp.edge(inner[1]).eq_class(), Some(inner_class));

        let corridor_class = comp.edge(corridor[0]).eq_class().unwrap();
        assert_eq!(comp.edge(corridor[1]).eq_class(), Some(corridor_class));

        assert_ne!(outer_class, inner_class);
        assert_ne!(outer_class, corridor_class);
        assert_ne!(inner_class, corridor_class);

        assert_matches_brute_force(&g);
    }

    #[test]
    fn capping_edge_keeps_reconverging_subtrees_honest() {
        // hand-built tree where t has two children reaching above it:
        //   s - a - p - t - {q, b};  q -> a and b -> s as back edges
        let mut t = Tree::new();
        let s = t.add_vertex(1, VertexType::Left);
        let a = t.add_vertex(2, VertexType::Left);
        let p = t.add_vertex(3, VertexType::Left);
        let tt = t.add_vertex(4, VertexType::Left);
        let q = t.add_vertex(5, VertexType::Left);
        let b = t.add_vertex(6, VertexType::Left);
        let e_sa = t.add_tree_edge(s, a, None, EdgeColor::Black);
        let e_ap = t.add_tree_edge(a, p, None, EdgeColor::Black);
        let e_pt = t.add_tree_edge(p, tt, None, EdgeColor::Black);
        let e_tq = t.add_tree_edge(tt, q, None, EdgeColor::Black);
        let e_tb = t.add_tree_edge(tt, b, None, EdgeColor::Black);
        let be_qa = t.add_back_edge(q, a, None, BackEdgeType::Ordinary, EdgeColor::Black);
        let be_bs = t.add_back_edge(b, s, None, BackEdgeType::Ordinary, EdgeColor::Black);

        cycle_equivalence(&mut t).unwrap();

        // the second upward-reaching child forces one capping edge t -> a
        let capping: Vec<_> = t
            .back_edges()
            .iter()
            .filter(|be| be.is_capping())
            .collect();
        assert_eq!(capping.len(), 1);
        assert_eq!(capping[0].src(), tt);
        assert_eq!(capping[0].tgt(), a);

        // capping edges never reach the report
        let capping_id = capping[0].id();
        assert!(edge_classes(&t).iter().all(|ec| ec.edge_id != capping_id));

        // outer region, inner region, and the corridor between them
        let outer = t.tree_edge(e_sa).class().unwrap();
        assert_eq!(t.tree_edge(e_tb).class(), Some(outer));
        assert_eq!(t.back_edge(be_bs).class(), Some(outer));

        let inner = t.tree_edge(e_tq).class().unwrap();
        assert_eq!(t.back_edge(be_qa).class(), Some(inner));

        let corridor = t.tree_edge(e_ap).class().unwrap();
        assert_eq!(t.tree_edge(e_pt).class(), Some(corridor));

        assert_ne!(outer, inner);
        assert_ne!(outer, corridor);
        assert_ne!(inner, corridor);
    }

    #[test]
    fn scenario_self_loop() {
        let mut g = VariationGraph::new();
        g.add_vertex(Vertex::new("A", 1));
        g.add_edge(0, VertexEnd::Right, 0, VertexEnd::Left);

        let decomp = decompose(&g).unwrap();
        let comp = &decomp[0];

        assert_eq!(comp.tree.back_edge_count(), 1);
        assert!(comp.tree.back_edge(0).is_class_defined());
        assert_eq!(comp.graph.edge(0).eq_class(), Some(0));
        assert_eq!(comp.report.hi[0], Some(0));
        assert_eq!(comp.report.final_list_sizes[0], 0);

        assert_matches_brute_force(&g);
    }

    #[test]
    fn scenario_hairpin() {
        // a bare path: tips at both ends, no covering back edge
        let g = linear_graph(&[1, 2, 3, 4]);

        let decomp = decompose(&g).unwrap();
        let comp = &decomp[0];

        // one simplifying edge from the far tip to the root
        let simplifying: Vec<_> = comp
            .tree
            .back_edges()
            .iter()
            .filter(|be| be.is_simplifying())
            .collect();
        assert_eq!(simplifying.len(), 1);
        assert_eq!(simplifying[0].src(), 3);
        assert_eq!(simplifying[0].tgt(), comp.tree.root_idx());

        // boundary start at the tip, end at the root
        assert!(comp.report.opened_hairpin[3]);
        assert!(comp.report.closed_hairpin[comp.tree.root_idx()]);
        assert_eq!(comp.report.opened_hairpin.iter().filter(|&&b| b).count(), 1);
        assert_eq!(comp.report.closed_hairpin.iter().filter(|&&b| b).count(), 1);

        // the whole region shares one class, fused onto the
        // simplifying edge
        let classes = classes_of(&comp.graph);
        assert!(classes.iter().all(|&c| c == classes[0]));
        assert_eq!(simplifying[0].class(), Some(classes[0]));
    }

    #[test]
    fn scenario_two_components() {
        let mut g = VariationGraph::new();
        for id in 1..=6 {
            g.add_vertex(Vertex::new("A", id));
        }
        for base in &[0usize, 3] {
            let b = *base;
            g.add_edge(b, VertexEnd::Right, b + 1, VertexEnd::Left);
            g.add_edge(b + 1, VertexEnd::Right, b + 2, VertexEnd::Left);
            g.add_edge(b + 2, VertexEnd::Right, b, VertexEnd::Left);
        }

        let decomp = decompose(&g).unwrap();
        assert_eq!(decomp.len(), 2);

        for comp in &decomp {
            assert_eq!(comp.report.class_count, 1);
            let classes = classes_of(&comp.graph);
            assert!(classes.iter().all(|&c| c == 0));
        }
    }

    #[test]
    fn figure_eight_splits_lobes() {
        // two triangles sharing one vertex; the lobes' cycles are
        // disjoint so their edges must not share a class
        let mut g = VariationGraph::new();
        for id in 1..=5 {
            g.add_vertex(Vertex::new("A", id));
        }
        let (a, b, c, d, e) = (0, 1, 2, 3, 4);
        let lobe1 = [
            g.add_edge(a, VertexEnd::Right, b, VertexEnd::Left),
            g.add_edge(b, VertexEnd::Right, c, VertexEnd::Left),
            g.add_edge(c, VertexEnd::Right, a, VertexEnd::Left),
        ];
        let lobe2 = [
            g.add_edge(a, VertexEnd::Right, d, VertexEnd::Left),
            g.add_edge(d, VertexEnd::Right, e, VertexEnd::Left),
            g.add_edge(e, VertexEnd::Right, a, VertexEnd::Left),
        ];

        let decomp = decompose(&g).unwrap();
        let comp = &decomp[0].graph;

        let c1 = comp.edge(lobe1[0]).eq_class().unwrap();
        let c2 = comp.edge(lobe2[0]).eq_class().unwrap();
        assert!(lobe1.iter().all(|&e| comp.edge(e).eq_class() == Some(c1)));
        assert!(lobe2.iter().all(|&e| comp.edge(e).eq_class() == Some(c2)));
        assert_ne!(c1, c2);

        assert_matches_brute_force(&g);
    }

    #[test]
    fn hand_built_triangle_tree() {
        // the spanning tree of scenario A, assembled directly:
        // root a, tree edges a-b and b-c, back edge c-a
        let mut t = Tree::new();
        let a = t.add_vertex(1, VertexType::Left);
        let b = t.add_vertex(2, VertexType::Left);
        let c = t.add_vertex(3, VertexType::Left);
        t.add_tree_edge(a, b, None, EdgeColor::Black);
        t.add_tree_edge(b, c, None, EdgeColor::Black);
        t.add_back_edge(c, a, None, BackEdgeType::Ordinary, EdgeColor::Black);

        let report = cycle_equivalence(&mut t).unwrap();

        assert_eq!(report.hi, vec![Some(0), Some(0), Some(0)]);
        assert_eq!(report.class_count, 1);
        assert_eq!(t.tree_edge(0).class(), Some(0));
        assert_eq!(t.tree_edge(1).class(), Some(0));
        assert_eq!(t.back_edge(0).class(), Some(0));
    }

    #[test]
    fn dummy_vertex_never_opens_a_hairpin() {
        let mut t = Tree::new();
        let root = t.add_vertex(1, VertexType::Left);
        let x = t.add_vertex(2, VertexType::Left);
        let d = t.add_vertex(0, VertexType::Dummy);
        t.add_tree_edge(root, x, None, EdgeColor::Black);
        t.add_tree_edge(x, d, None, EdgeColor::Black);

        let report = cycle_equivalence(&mut t).unwrap();

        // the dummy still gets a simplifying edge to keep the stack
        // non-empty, but no hairpin is recorded for it
        assert!(t.back_edges().iter().any(|be| be.is_simplifying()));
        assert!(!report.opened_hairpin[d]);
    }

    #[test]
    fn every_tree_edge_is_classed() {
        let mut g = linear_graph(&[1, 2, 3, 4, 5]);
        g.add_edge(2, VertexEnd::Right, 0, VertexEnd::Left);
        g.add_edge(4, VertexEnd::Right, 2, VertexEnd::Left);

        let decomp = decompose(&g).unwrap();
        let tree = &decomp[0].tree;
        assert!(tree.tree_edges().iter().all(|e| e.class().is_some()));
    }

    #[test]
    fn brackets_balance_out() {
        let mut g = linear_graph(&[1, 2, 3, 4, 5]);
        g.add_edge(2, VertexEnd::Right, 0, VertexEnd::Left);
        g.add_edge(4, VertexEnd::Right, 2, VertexEnd::Left);
        g.add_edge(4, VertexEnd::Right, 0, VertexEnd::Left);

        let decomp = decompose(&g).unwrap();
        let pool = decomp[0].tree.bracket_pool();
        assert!(pool.allocated() > 0);
        assert_eq!(pool.live(), 0);
    }

    #[test]
    fn hi_bounds_hold_at_termination() {
        let mut g = linear_graph(&[1, 2, 3, 4, 5, 6]);
        g.add_edge(3, VertexEnd::Right, 1, VertexEnd::Left);
        g.add_edge(5, VertexEnd::Right, 0, VertexEnd::Left);

        let decomp = decompose(&g).unwrap();
        let tree = &decomp[0].tree;

        for v in 0..tree.size() {
            let hi = match tree.hi(v) {
                Some(h) => h,
                None => continue,
            };
            for c in tree.children(v) {
                assert!(hi <= tree.hi(c).unwrap());
            }
            for be_idx in tree.obe_idxs(v) {
                let be = tree.back_edge(be_idx);
                if be.is_simplifying() || be.is_capping() {
                    continue;
                }
                assert!(hi <= tree.vertex(be.tgt()).dfs_num());
            }
        }
    }

    #[test]
    fn identical_runs_are_bit_identical() {
        let mut g = VariationGraph::new();
        for id in 1..=7 {
            g.add_vertex(Vertex::new("A", id));
        }
        g.add_edge(0, VertexEnd::Right, 1, VertexEnd::Left);
        g.add_edge(0, VertexEnd::Right, 2, VertexEnd::Left);
        g.add_edge(1, VertexEnd::Right, 3, VertexEnd::Left);
        g.add_edge(2, VertexEnd::Right, 3, VertexEnd::Left);
        g.add_edge(3, VertexEnd::Right, 4, VertexEnd::Left);
        g.add_edge(4, VertexEnd::Right, 5, VertexEnd::Left);
        g.add_edge(5, VertexEnd::Right, 6, VertexEnd::Left);
        g.add_edge(6, VertexEnd::Right, 3, VertexEnd::Left);

        let first = decompose(&g).unwrap();
        let second = decompose(&g).unwrap();

        assert_eq!(first.len(), second.len());
        for (x, y) in first.iter().zip(second.iter()) {
            assert_eq!(x.report, y.report);
            let cx: Vec<_> = x.graph.edges().iter().map(|e| e.eq_class()).collect();
            let cy: Vec<_> = y.graph.edges().iter().map(|e| e.eq_class()).collect();
            assert_eq!(cx, cy);
        }
    }

    #[test]
    fn cancellation_is_observed() {
        let g = triangle();
        let mut tree = Tree::from_component(&g).unwrap();
        let token = CancelToken::new();
        token.cancel();
        assert_eq!(
            cycle_equivalence_cancellable(&mut tree, &token),
            Err(AwaError::Cancelled)
        );
    }

    #[test]
    fn malformed_tree_is_rejected_up_front() {
        // the tree edge runs against dfs order
        let mut t = Tree::new();
        let a = t.add_vertex(1, VertexType::Left);
        let b = t.add_vertex(2, VertexType::Left);
        t.add_tree_edge(b, a, None, EdgeColor::Black);

        assert!(matches!(
            cycle_equivalence(&mut t),
            Err(AwaError::InvalidInput(_))
        ));
    }
}
