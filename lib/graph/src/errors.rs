//! Errors produced while loading and checking a graph file

use std::path::PathBuf;
use thiserror::Error;

use crate::labels::{EdgeId, NodeId, PortName};

/// An error we encounter while reading a graph file
#[derive(Debug, Error)]
pub enum GraphLoadError {
	/// We could not read the file at all
	#[error("could not read graph file `{path}`")]
	Io {
		path: PathBuf,

		#[source]
		source: std::io::Error,
	},

	/// The file was not the JSON document we expect
	#[error("could not parse graph json")]
	Json(#[from] serde_json::Error),
}

/// An error we encounter while splitting an edge endpoint string
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum EndpointParseError {
	/// More than one `:` in one endpoint
	#[error("endpoint `{endpoint}` has more than one port delimiter")]
	MultipleDelimiters { endpoint: String },

	/// Nothing before the `:`
	#[error("endpoint `{endpoint}` has an empty node id")]
	EmptyNode { endpoint: String },

	/// A `:` with nothing after it
	#[error("endpoint `{endpoint}` has an empty port name")]
	EmptyPort { endpoint: String },
}

/// An error we encounter while tokenizing a node's command string
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TokenizeError {
	/// A quote block was opened and never closed
	#[error("command has an unbalanced quote")]
	UnbalancedQuote,
}

/// An error we encounter while substituting text in a command token
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ReplaceError {
	/// Searching for an empty pattern never terminates usefully
	#[error("cannot replace an empty pattern")]
	EmptyPattern,
}

/// A reason we reject a graph before running it
#[derive(Debug, Error)]
pub enum ValidateError {
	#[error("graph has no nodes")]
	NoNodes,

	#[error("graph has no edges")]
	NoEdges,

	/// Ids and ports are single tokens; whitespace is never valid in them
	#[error("{what} `{value}` contains whitespace")]
	WhitespaceInField { what: &'static str, value: String },

	#[error("node id `{id}` is declared more than once")]
	DuplicateNodeId { id: NodeId },

	#[error("edge id `{id}` is declared more than once")]
	DuplicateEdgeId { id: EdgeId },

	/// An edge endpoint names a node that is not in the graph
	#[error("edge `{edge}` references node `{node}`, which does not exist")]
	MissingNode { edge: EdgeId, node: NodeId },

	/// The launcher needs a unique substitution site for every named port
	#[error("port `{port}` does not occur in the command of node `{node}`")]
	PortNotInCommand { node: NodeId, port: PortName },

	/// Same launcher constraint, violated the other way
	#[error("port `{port}` occurs {count} times in the command of node `{node}`")]
	PortAmbiguous {
		node: NodeId,
		port: PortName,
		count: usize,
	},

	#[error("node `{node}` is not referenced by any edge")]
	NodeNotReferenced { node: NodeId },

	/// Only EXEC nodes can run; file-backed kinds are reserved but not wired up
	#[error("node `{node}` has unsupported kind `{kind}`")]
	UnsupportedNodeKind { node: NodeId, kind: String },

	#[error("node `{node}` is EXEC but has no cmd")]
	MissingCommand { node: NodeId },

	#[error("node `{node}` is not EXEC but has a cmd")]
	UnexpectedCommand { node: NodeId },

	/// `subtype` may only be `DUMMY`, and only on a `RAFILE` node
	#[error("node `{node}` has an invalid subtype")]
	BadSubtype { node: NodeId },

	/// `name` must be present exactly on file-backed kinds
	#[error("node `{node}` has an invalid name field")]
	BadName { node: NodeId },

	#[error("command of node `{node}` is invalid")]
	InvalidCommand {
		node: NodeId,

		#[source]
		source: TokenizeError,
	},
}
