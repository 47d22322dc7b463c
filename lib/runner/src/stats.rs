//! Byte-counter reporting.
//!
//! Stdout belongs to this stream: one JSON object per line, edge id to
//! running byte count. All diagnostics go to stderr through `tracing`.

use std::io::Write;

use crate::graph::Graph;

/// Serialize the current counters as a single JSON object.
pub fn stats_line(graph: &Graph) -> String {
	let mut counters = serde_json::Map::new();
	for edge in graph.iter_edges() {
		counters.insert(
			edge.id.to_string(),
			serde_json::Value::from(edge.bytes_spliced),
		);
	}
	serde_json::Value::Object(counters).to_string()
}

/// Write one counters line to stdout, flushed immediately so a reporter on
/// the far side of a pipe sees it on time.
pub fn emit(graph: &Graph) {
	let mut out = std::io::stdout().lock();
	let _ = writeln!(out, "{}", stats_line(graph));
	let _ = out.flush();
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::build::build_graph;
	use manifold_graph::GraphSpec;

	#[test]
	fn stats_line_round_trips_as_json() {
		let spec = GraphSpec::from_json_str(
			r#"{
				"nodes": [
					{"id": "A", "type": "EXEC", "cmd": "seq 1 3"},
					{"id": "B", "type": "EXEC", "cmd": "cat"},
					{"id": "C", "type": "EXEC", "cmd": "cat"}
				],
				"edges": [
					{"id": "ab", "from": "A", "to": "B"},
					{"id": "ac", "from": "A", "to": "C"}
				]
			}"#,
		)
		.unwrap();
		let (mut graph, _fabric) = build_graph(&spec).unwrap();

		let parsed: serde_json::Value = serde_json::from_str(&stats_line(&graph)).unwrap();
		let object = parsed.as_object().unwrap();
		assert_eq!(object.len(), 2);
		assert_eq!(object["ab"], 0);
		assert_eq!(object["ac"], 0);

		graph.edges[1].bytes_spliced = 4096;
		let parsed: serde_json::Value = serde_json::from_str(&stats_line(&graph)).unwrap();
		assert_eq!(parsed.as_object().unwrap()["ac"], 4096);
	}
}
