//! A user-provided process-graph description

use serde::Deserialize;
use smartstring::{LazyCompact, SmartString};
use std::{fmt::Display, path::Path, str::FromStr};

use crate::{
	errors::{EndpointParseError, GraphLoadError},
	labels::{EdgeId, NodeId, PortName},
};

/// The only node kind the runner can execute
pub const EXEC_KIND: &str = "EXEC";

/// One side of an edge: a node, plus the port on that node the edge attaches
/// to. The textual form is `nodeid` or `nodeid:PORT`; a missing port means
/// the node's standard stream.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(try_from = "String")]
pub struct Endpoint {
	pub node: NodeId,
	pub port: PortName,
}

impl FromStr for Endpoint {
	type Err = EndpointParseError;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		let mut parts = s.split(':');
		let node = parts.next().unwrap_or("");

		let port = match parts.next() {
			None => PortName::stdio(),
			Some(port) => {
				if parts.next().is_some() {
					return Err(EndpointParseError::MultipleDelimiters {
						endpoint: s.into(),
					});
				}
				if port.is_empty() {
					return Err(EndpointParseError::EmptyPort { endpoint: s.into() });
				}
				PortName::new(port)
			}
		};

		if node.is_empty() {
			return Err(EndpointParseError::EmptyNode { endpoint: s.into() });
		}

		Ok(Self {
			node: NodeId::new(node),
			port,
		})
	}
}

impl TryFrom<String> for Endpoint {
	type Error = EndpointParseError;

	fn try_from(value: String) -> Result<Self, Self::Error> {
		value.parse()
	}
}

impl Display for Endpoint {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		if self.port.is_stdio() {
			write!(f, "{}", self.node)
		} else {
			write!(f, "{}:{}", self.node, self.port)
		}
	}
}

/// A description of one node in a graph
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct NodeSpec {
	/// This node's unique id
	pub id: NodeId,

	/// What kind of node this is. `EXEC` runs a child process;
	/// `RAFILE` and the other `*FILE` kinds are reserved.
	#[serde(rename = "type")]
	pub kind: SmartString<LazyCompact>,

	/// The command to run. Required exactly when `kind` is `EXEC`.
	#[serde(default)]
	pub cmd: Option<String>,

	/// Reserved for file-backed kinds
	#[serde(default)]
	pub subtype: Option<SmartString<LazyCompact>>,

	/// Reserved for file-backed kinds
	#[serde(default)]
	pub name: Option<String>,
}

impl NodeSpec {
	/// Is this a runnable child-process node?
	pub fn is_exec(&self) -> bool {
		self.kind.as_str() == EXEC_KIND
	}

	/// Is this one of the reserved file-backed kinds?
	pub fn is_reserved_file_kind(&self) -> bool {
		self.kind.ends_with("FILE")
	}
}

/// A description of one directed byte-stream channel
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct EdgeSpec {
	/// This edge's unique id
	pub id: EdgeId,

	/// Where bytes come from
	pub from: Endpoint,

	/// Where bytes go
	pub to: Endpoint,
}

/// A parsed (but not yet validated) process graph
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct GraphSpec {
	pub nodes: Vec<NodeSpec>,
	pub edges: Vec<EdgeSpec>,
}

impl GraphSpec {
	/// Parse a graph from a JSON string
	pub fn from_json_str(json: &str) -> Result<Self, GraphLoadError> {
		let spec: Self = serde_json::from_str(json)?;
		Ok(spec)
	}

	/// Read and parse a graph file
	pub fn load_from_file(path: &Path) -> Result<Self, GraphLoadError> {
		let text = std::fs::read_to_string(path).map_err(|source| GraphLoadError::Io {
			path: path.into(),
			source,
		})?;
		Self::from_json_str(&text)
	}

	/// Find a node by id. Linear scan; graphs are small.
	pub fn node(&self, id: &NodeId) -> Option<&NodeSpec> {
		self.nodes.iter().find(|n| &n.id == id)
	}
}
