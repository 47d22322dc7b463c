//! The edge builder: materialize a validated [`GraphSpec`] into runtime
//! nodes, edges, and the pipe fabric.
//!
//! Edges that read the same port of the same node share one output pipe;
//! the engine later fans its contents out by duplication. Symmetrically,
//! edges that feed the same port of the same node share one input pipe.

use tracing::debug;

use manifold_graph::GraphSpec;

use crate::errors::BuildError;
use crate::fabric::Fabric;
use crate::graph::{Edge, EdgeIdx, Graph, Node, NodeIdx};

/// Walk the edge list and wire up pipes.
///
/// Insertion order is preserved everywhere: pipes appear on a node in the
/// order the edges that need them appear in the file.
pub fn build_graph(spec: &GraphSpec) -> Result<(Graph, Fabric), BuildError> {
	let mut nodes: Vec<Node> = Vec::with_capacity(spec.nodes.len());
	for n in &spec.nodes {
		if !n.is_exec() {
			return Err(BuildError::UnsupportedNodeKind {
				node: n.id.clone(),
				kind: n.kind.to_string(),
			});
		}
		let cmd = n.cmd.clone().ok_or_else(|| BuildError::MissingCommand {
			node: n.id.clone(),
		})?;

		nodes.push(Node {
			id: n.id.clone(),
			cmd,
			in_pipes: Vec::new(),
			out_pipes: Vec::new(),
			listening_edges: Vec::new(),
			sink_refs: Vec::new(),
			pid: None,
			ended: false,
		});
	}

	let find_node = |id: &manifold_graph::NodeId| -> Option<NodeIdx> {
		nodes.iter().position(|n| &n.id == id).map(NodeIdx)
	};

	let mut edges: Vec<Edge> = Vec::with_capacity(spec.edges.len());
	for e in &spec.edges {
		let from = find_node(&e.from.node).ok_or_else(|| BuildError::MissingNode {
			edge: e.id.clone(),
			node: e.from.node.clone(),
		})?;
		let to = find_node(&e.to.node).ok_or_else(|| BuildError::MissingNode {
			edge: e.id.clone(),
			node: e.to.node.clone(),
		})?;

		edges.push(Edge {
			id: e.id.clone(),
			from,
			from_port: e.from.port.clone(),
			to,
			to_port: e.to.port.clone(),
			bytes_spliced: 0,
		});
	}

	let mut fabric = Fabric::new();
	for (i, edge) in edges.iter().enumerate() {
		let edge_idx = EdgeIdx(i);
		let from = usize::from(edge.from);
		let to = usize::from(edge.to);

		match fabric.find_by_port(&nodes[from].out_pipes, &edge.from_port) {
			Some(pipe) => fabric.get_mut(pipe).add_edge(edge_idx),
			None => {
				let pipe = fabric
					.create(edge.from_port.clone(), edge_idx)
					.map_err(BuildError::CreatePipe)?;
				nodes[from].out_pipes.push(pipe);
			}
		}

		match fabric.find_by_port(&nodes[to].in_pipes, &edge.to_port) {
			Some(pipe) => fabric.get_mut(pipe).add_edge(edge_idx),
			None => {
				let pipe = fabric
					.create(edge.to_port.clone(), edge_idx)
					.map_err(BuildError::CreatePipe)?;
				nodes[to].in_pipes.push(pipe);
			}
		}

		nodes[from].listening_edges.push(edge_idx);
	}

	debug!(
		message = "graph wired",
		nodes = nodes.len(),
		edges = edges.len(),
		pipes = fabric.len()
	);

	Ok((Graph { nodes, edges }, fabric))
}
