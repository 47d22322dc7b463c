//! Errors produced while wiring and running a graph

use manifold_graph::{EdgeId, NodeId, PortName, TokenizeError};
use thiserror::Error;

/// An error we encounter while turning a parsed graph into pipes and
/// runtime records
#[derive(Debug, Error)]
pub enum BuildError {
	/// An edge endpoint names a node that is not in the graph
	#[error("edge `{edge}` references node `{node}`, which does not exist")]
	MissingNode { edge: EdgeId, node: NodeId },

	/// Only EXEC nodes have an engine side
	#[error("node `{node}` has unsupported kind `{kind}`")]
	UnsupportedNodeKind { node: NodeId, kind: String },

	#[error("node `{node}` has no command")]
	MissingCommand { node: NodeId },

	#[error("could not create a pipe")]
	CreatePipe(#[source] std::io::Error),
}

/// An error we encounter while launching children or pumping bytes
#[derive(Debug, Error)]
pub enum RuntimeError {
	#[error("could not open /dev/null")]
	OpenDevNull(#[source] std::io::Error),

	#[error("could not install signal handling")]
	InstallSignals(#[source] std::io::Error),

	#[error("could not prepare pump state for node `{node}`")]
	RegisterNode {
		node: NodeId,

		#[source]
		source: std::io::Error,
	},

	/// Wiring invariant broken: an edge with no pipe on its destination
	#[error("no input pipe carries edge `{edge}` into node `{node}`")]
	NoPipeForEdge { edge: EdgeId, node: NodeId },

	#[error("command of node `{node}` is invalid")]
	BadCommand {
		node: NodeId,

		#[source]
		source: TokenizeError,
	},

	#[error("command of node `{node}` is empty")]
	EmptyCommand { node: NodeId },

	#[error("port `{port}` of node `{node}` cannot be substituted")]
	BadPort { node: NodeId, port: PortName },

	/// Two pipes tried to claim the same standard stream of one node
	#[error("node `{node}` has more than one pipe on its standard {stream}")]
	StdioConflict { node: NodeId, stream: &'static str },

	#[error("argv of node `{node}` cannot be passed to exec")]
	BadArgv {
		node: NodeId,

		#[source]
		source: std::io::Error,
	},

	#[error("fork failed for node `{node}`")]
	Fork {
		node: NodeId,

		#[source]
		source: std::io::Error,
	},

	/// The loop itself failed; there is no way to keep pumping
	#[error("poll failed")]
	Poll(#[source] std::io::Error),
}
