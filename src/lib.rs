//! # awa
//!
//! Decomposition of bidirected pangenome variation graphs into
//! cycle-equivalence classes.
//!
//! A graph is split into weakly connected components, each component is
//! spanned by a DFS tree, and a single reverse-DFS pass assigns every
//! tree edge and back edge an equivalence class such that two edges
//! share a class iff they lie on exactly the same set of simple cycles.
//! Regions with no covering back edge (hairpins) are detected along the
//! way.
//!
//! ```
//! use awa::bidirected::{VariationGraph, Vertex, VertexEnd};
//! use awa::cycle_equiv::decompose;
//!
//! let mut graph = VariationGraph::new();
//! for id in 1..=3 {
//!     graph.add_vertex(Vertex::new("A", id));
//! }
//! graph.add_edge(0, VertexEnd::Right, 1, VertexEnd::Left);
//! graph.add_edge(1, VertexEnd::Right, 2, VertexEnd::Left);
//! graph.add_edge(2, VertexEnd::Right, 0, VertexEnd::Left);
//!
//! let components = decompose(&graph).unwrap();
//! assert_eq!(components[0].report.class_count, 1);
//! ```

pub mod bidirected;
pub mod bracket;
pub mod cycle_equiv;
pub mod error;
pub mod spanning_tree;

pub use crate::bidirected::VariationGraph;
pub use crate::cycle_equiv::{
    decompose, decompose_cancellable, CancelToken, ComponentDecomposition, EquivReport,
};
pub use crate::error::{AwaError, Result};
pub use crate::spanning_tree::Tree;
