//! Id types used throughout a process graph

use serde::{Deserialize, Serialize};
use smartstring::{LazyCompact, SmartString};
use std::fmt::Display;

/// A graph node's id
#[derive(Debug, Hash, PartialEq, Eq, Clone, Serialize, Deserialize, PartialOrd, Ord)]
pub struct NodeId(SmartString<LazyCompact>);

impl NodeId {
	/// Make a new node id
	pub fn new(id: &str) -> Self {
		Self(id.into())
	}

	/// get the id
	pub fn id(&self) -> &SmartString<LazyCompact> {
		&self.0
	}

	pub fn as_str(&self) -> &str {
		&self.0
	}
}

impl Display for NodeId {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		self.0.fmt(f)
	}
}

impl From<String> for NodeId {
	fn from(value: String) -> Self {
		Self::new(&value)
	}
}

/// A graph edge's id
#[derive(Debug, Hash, PartialEq, Eq, Clone, Serialize, Deserialize, PartialOrd, Ord)]
pub struct EdgeId(SmartString<LazyCompact>);

impl EdgeId {
	/// Make a new edge id
	pub fn new(id: &str) -> Self {
		Self(id.into())
	}

	/// get the id
	pub fn id(&self) -> &SmartString<LazyCompact> {
		&self.0
	}

	pub fn as_str(&self) -> &str {
		&self.0
	}
}

impl Display for EdgeId {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		self.0.fmt(f)
	}
}

impl From<String> for EdgeId {
	fn from(value: String) -> Self {
		Self::new(&value)
	}
}

/// A named attachment point inside a node's command string.
///
/// The special name `-` stands for the node's standard stream:
/// stdout when the port is on an edge's `from` side, stdin on the `to` side.
#[derive(Debug, Hash, PartialEq, Eq, Clone, Serialize, Deserialize, PartialOrd, Ord)]
pub struct PortName(SmartString<LazyCompact>);

impl PortName {
	/// The sentinel port that maps to a standard stream
	pub const STDIO: &'static str = "-";

	/// Make a new port name
	pub fn new(id: &str) -> Self {
		Self(id.into())
	}

	/// The port that means "use the process's standard stream"
	pub fn stdio() -> Self {
		Self::new(Self::STDIO)
	}

	/// get the name
	pub fn id(&self) -> &SmartString<LazyCompact> {
		&self.0
	}

	pub fn as_str(&self) -> &str {
		&self.0
	}

	/// Does this port stand for a standard stream?
	pub fn is_stdio(&self) -> bool {
		self.0.as_str() == Self::STDIO
	}
}

impl Display for PortName {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		self.0.fmt(f)
	}
}

impl From<String> for PortName {
	fn from(value: String) -> Self {
		Self::new(&value)
	}
}
