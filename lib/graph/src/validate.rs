//! Graph validation. Everything here runs before a single pipe or process
//! is created; a graph that passes is safe to hand to the runner.

use itertools::Itertools;
use std::collections::HashSet;

use crate::{
	cmd::tokenize,
	errors::ValidateError,
	labels::NodeId,
	spec::{GraphSpec, NodeSpec},
};

fn reject_whitespace(what: &'static str, value: &str) -> Result<(), ValidateError> {
	if value.chars().any(|c| c.is_whitespace()) {
		return Err(ValidateError::WhitespaceInField {
			what,
			value: value.into(),
		});
	}
	Ok(())
}

fn check_node_shape(node: &NodeSpec) -> Result<(), ValidateError> {
	reject_whitespace("node id", node.id.as_str())?;
	reject_whitespace("node type", &node.kind)?;
	if let Some(subtype) = &node.subtype {
		reject_whitespace("node subtype", subtype)?;
	}

	// cmd is present exactly on EXEC nodes
	match (&node.cmd, node.is_exec()) {
		(None, true) => {
			return Err(ValidateError::MissingCommand {
				node: node.id.clone(),
			})
		}
		(Some(_), false) => {
			return Err(ValidateError::UnexpectedCommand {
				node: node.id.clone(),
			})
		}
		_ => {}
	}

	// subtype may only be DUMMY, and only on a RAFILE node
	if let Some(subtype) = &node.subtype {
		if !(subtype.as_str() == "DUMMY" && node.kind.as_str() == "RAFILE") {
			return Err(ValidateError::BadSubtype {
				node: node.id.clone(),
			});
		}
	}

	// name is present exactly on file-backed kinds
	if node.name.is_some() != node.is_reserved_file_kind() {
		return Err(ValidateError::BadName {
			node: node.id.clone(),
		});
	}

	if let Some(cmd) = &node.cmd {
		// Unbalanced quotes would otherwise only surface after fork
		tokenize(cmd).map_err(|source| ValidateError::InvalidCommand {
			node: node.id.clone(),
			source,
		})?;
	}

	// The file-backed kinds have no engine side yet; reject them here
	// rather than letting the build fail later.
	if !node.is_exec() {
		return Err(ValidateError::UnsupportedNodeKind {
			node: node.id.clone(),
			kind: node.kind.to_string(),
		});
	}

	Ok(())
}

/// Check a parsed graph against every rule the runner depends on.
///
/// Returns the first violation found.
pub fn validate(spec: &GraphSpec) -> Result<(), ValidateError> {
	if spec.nodes.is_empty() {
		return Err(ValidateError::NoNodes);
	}
	if spec.edges.is_empty() {
		return Err(ValidateError::NoEdges);
	}

	for node in &spec.nodes {
		check_node_shape(node)?;
	}

	if let Some(id) = spec.nodes.iter().map(|n| &n.id).duplicates().next() {
		return Err(ValidateError::DuplicateNodeId { id: id.clone() });
	}
	if let Some(id) = spec.edges.iter().map(|e| &e.id).duplicates().next() {
		return Err(ValidateError::DuplicateEdgeId { id: id.clone() });
	}

	let mut referenced: HashSet<&NodeId> = HashSet::new();
	for edge in &spec.edges {
		reject_whitespace("edge id", edge.id.as_str())?;

		for endpoint in [&edge.from, &edge.to] {
			reject_whitespace("endpoint node", endpoint.node.as_str())?;
			reject_whitespace("endpoint port", endpoint.port.as_str())?;

			let node = spec.node(&endpoint.node).ok_or(ValidateError::MissingNode {
				edge: edge.id.clone(),
				node: endpoint.node.clone(),
			})?;

			// Every named port needs exactly one substitution site in the
			// command it belongs to.
			if !endpoint.port.is_stdio() {
				if let Some(cmd) = &node.cmd {
					let count = cmd.matches(endpoint.port.as_str()).count();
					if count == 0 {
						return Err(ValidateError::PortNotInCommand {
							node: node.id.clone(),
							port: endpoint.port.clone(),
						});
					}
					if count > 1 {
						return Err(ValidateError::PortAmbiguous {
							node: node.id.clone(),
							port: endpoint.port.clone(),
							count,
						});
					}
				}
			}

			referenced.insert(&endpoint.node);
		}
	}

	for node in &spec.nodes {
		if !referenced.contains(&node.id) {
			return Err(ValidateError::NodeNotReferenced {
				node: node.id.clone(),
			});
		}
	}

	Ok(())
}
