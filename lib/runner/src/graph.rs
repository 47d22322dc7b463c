//! The runtime picture of a graph: nodes and edges resolved to indices,
//! with the pipe and process state the engine mutates while pumping.
//!
//! Built once by [`crate::build::build_graph`], then only the runtime
//! fields (`pid`, `ended`, counters, pipe lists) change.

use manifold_graph::{EdgeId, NodeId, PortName};

use crate::engine::SinkRef;
use crate::fabric::PipeId;

/// Index of a node in the graph
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NodeIdx(pub(crate) usize);

impl From<NodeIdx> for usize {
	fn from(value: NodeIdx) -> Self {
		value.0
	}
}

/// Index of an edge in the graph
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct EdgeIdx(pub(crate) usize);

impl From<EdgeIdx> for usize {
	fn from(value: EdgeIdx) -> Self {
		value.0
	}
}

/// A child process to run, and every pipe attached to it
#[derive(Debug)]
pub struct Node {
	pub id: NodeId,

	/// The command string, tokenized just before fork
	pub cmd: String,

	/// Pipes this node reads from, in creation order
	pub in_pipes: Vec<PipeId>,

	/// Pipes this node writes into, in creation order
	pub out_pipes: Vec<PipeId>,

	/// Edges whose bytes originate at this node
	pub listening_edges: Vec<EdgeIdx>,

	/// Writable-handler handles registered on this node's input pipes.
	/// Used at teardown to cancel pending writes once this consumer dies.
	pub(crate) sink_refs: Vec<SinkRef>,

	/// Set after fork
	pub pid: Option<libc::pid_t>,

	/// Set by the reaper
	pub ended: bool,
}

/// One directed byte channel between two nodes
#[derive(Debug)]
pub struct Edge {
	pub id: EdgeId,

	pub from: NodeIdx,
	pub from_port: PortName,

	pub to: NodeIdx,
	pub to_port: PortName,

	/// Total bytes delivered on this channel so far.
	/// Graphs can move many GiB; signed 64-bit, never decreasing.
	pub bytes_spliced: i64,
}

/// The whole runtime graph
#[derive(Debug, Default)]
pub struct Graph {
	pub(crate) nodes: Vec<Node>,
	pub(crate) edges: Vec<Edge>,
}

impl Graph {
	pub fn node(&self, idx: NodeIdx) -> &Node {
		&self.nodes[idx.0]
	}

	pub fn node_mut(&mut self, idx: NodeIdx) -> &mut Node {
		&mut self.nodes[idx.0]
	}

	pub fn edge(&self, idx: EdgeIdx) -> &Edge {
		&self.edges[idx.0]
	}

	pub fn edge_mut(&mut self, idx: EdgeIdx) -> &mut Edge {
		&mut self.edges[idx.0]
	}

	pub fn len_nodes(&self) -> usize {
		self.nodes.len()
	}

	pub fn len_edges(&self) -> usize {
		self.edges.len()
	}

	pub fn iter_nodes(&self) -> impl Iterator<Item = &Node> {
		self.nodes.iter()
	}

	pub fn iter_nodes_idx(&self) -> impl Iterator<Item = (NodeIdx, &Node)> {
		self.nodes.iter().enumerate().map(|(i, n)| (NodeIdx(i), n))
	}

	pub fn iter_edges(&self) -> impl Iterator<Item = &Edge> {
		self.edges.iter()
	}

	pub fn node_by_id(&self, id: &NodeId) -> Option<NodeIdx> {
		self.nodes.iter().position(|n| &n.id == id).map(NodeIdx)
	}

	pub fn node_by_pid(&self, pid: libc::pid_t) -> Option<NodeIdx> {
		self.nodes
			.iter()
			.position(|n| n.pid == Some(pid))
			.map(NodeIdx)
	}
}
