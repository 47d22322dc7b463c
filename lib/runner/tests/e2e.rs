//! End-to-end runs with real child processes.
//!
//! The reaper waits on any child (`waitpid(-1)`), so two engines pumping in
//! one test process would steal each other's exits. Every test here takes
//! the same lock.

use std::fs;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use manifold_graph::{validate, GraphSpec};
use manifold_runner::{build_graph, Engine};

static PUMP_LOCK: Mutex<()> = Mutex::new(());

fn run_to_completion(json: &str) -> Engine {
	let spec = GraphSpec::from_json_str(json).unwrap();
	validate(&spec).unwrap();
	let (graph, fabric) = build_graph(&spec).unwrap();
	let mut engine = Engine::new(graph, fabric).unwrap();
	engine.spawn().unwrap();
	engine.run(Duration::from_secs(3600)).unwrap();
	engine
}

fn edge_bytes(engine: &Engine, id: &str) -> i64 {
	engine
		.graph()
		.iter_edges()
		.find(|e| e.id.as_str() == id)
		.unwrap()
		.bytes_spliced
}

#[test]
fn copies_a_file_bit_for_bit() {
	let _guard = PUMP_LOCK.lock().unwrap();
	let dir = tempfile::tempdir().unwrap();
	let input = dir.path().join("in.bin");
	let output = dir.path().join("out.bin");

	let payload: Vec<u8> = (0..1024 * 1024).map(|i| (i % 251) as u8).collect();
	fs::write(&input, &payload).unwrap();

	let json = format!(
		r#"{{
			"nodes": [
				{{"id": "read", "type": "EXEC", "cmd": "cat {src}"}},
				{{"id": "save", "type": "EXEC", "cmd": "sh -c 'cat > {dst}'"}}
			],
			"edges": [{{"id": "copy", "from": "read", "to": "save"}}]
		}}"#,
		src = input.display(),
		dst = output.display(),
	);

	let engine = run_to_completion(&json);

	assert_eq!(fs::read(&output).unwrap(), payload);
	assert_eq!(edge_bytes(&engine, "copy"), payload.len() as i64);
	assert!(engine.graph().iter_nodes().all(|n| n.ended));
}

#[test]
fn short_stream_counts_every_byte() {
	let _guard = PUMP_LOCK.lock().unwrap();

	// `hi` plus a newline; the consumer just swallows it
	let engine = run_to_completion(
		r#"{
			"nodes": [
				{"id": "say", "type": "EXEC", "cmd": "echo hi"},
				{"id": "eat", "type": "EXEC", "cmd": "cat"}
			],
			"edges": [{"id": "e", "from": "say", "to": "eat"}]
		}"#,
	);

	assert_eq!(edge_bytes(&engine, "e"), 3);
	assert!(engine.graph().iter_nodes().all(|n| n.ended));
}

#[test]
fn fan_out_delivers_identical_streams() {
	let _guard = PUMP_LOCK.lock().unwrap();
	let dir = tempfile::tempdir().unwrap();
	let out_a = dir.path().join("a.txt");
	let out_b = dir.path().join("b.txt");

	let json = format!(
		r#"{{
			"nodes": [
				{{"id": "gen", "type": "EXEC", "cmd": "seq 1 10000"}},
				{{"id": "left", "type": "EXEC", "cmd": "sh -c 'cat > {a}'"}},
				{{"id": "right", "type": "EXEC", "cmd": "sh -c 'cat > {b}'"}}
			],
			"edges": [
				{{"id": "to_left", "from": "gen", "to": "left"}},
				{{"id": "to_right", "from": "gen", "to": "right"}}
			]
		}}"#,
		a = out_a.display(),
		b = out_b.display(),
	);

	let engine = run_to_completion(&json);

	let expected: String = (1..=10000).map(|i| format!("{}\n", i)).collect();
	assert_eq!(fs::read_to_string(&out_a).unwrap(), expected);
	assert_eq!(fs::read_to_string(&out_b).unwrap(), expected);

	assert_eq!(edge_bytes(&engine, "to_left"), expected.len() as i64);
	assert_eq!(edge_bytes(&engine, "to_right"), expected.len() as i64);
}

#[test]
fn failed_exec_cascades_eof() {
	let _guard = PUMP_LOCK.lock().unwrap();
	let dir = tempfile::tempdir().unwrap();
	let output = dir.path().join("out.txt");

	let json = format!(
		r#"{{
			"nodes": [
				{{"id": "bad", "type": "EXEC", "cmd": "/definitely/not/a/binary"}},
				{{"id": "sink", "type": "EXEC", "cmd": "sh -c 'cat > {dst}'"}}
			],
			"edges": [{{"id": "e", "from": "bad", "to": "sink"}}]
		}}"#,
		dst = output.display(),
	);

	let engine = run_to_completion(&json);

	// the sink saw immediate EOF and wrote nothing
	assert_eq!(fs::read(&output).unwrap(), b"");
	assert_eq!(edge_bytes(&engine, "e"), 0);
	assert!(engine.graph().iter_nodes().all(|n| n.ended));
}

#[test]
fn named_port_reaches_downstream() {
	let _guard = PUMP_LOCK.lock().unwrap();
	let dir = tempfile::tempdir().unwrap();
	let output = dir.path().join("out.txt");

	let json = format!(
		r#"{{
			"nodes": [
				{{"id": "gen", "type": "EXEC", "cmd": "echo hello"}},
				{{"id": "sink", "type": "EXEC", "cmd": "sh -c 'cat _P_ > {dst}'"}}
			],
			"edges": [{{"id": "e", "from": "gen", "to": "sink:_P_"}}]
		}}"#,
		dst = output.display(),
	);

	let engine = run_to_completion(&json);

	assert_eq!(fs::read_to_string(&output).unwrap(), "hello\n");
	assert_eq!(edge_bytes(&engine, "e"), 6);
}

#[test]
fn sigint_breaks_the_loop() {
	let _guard = PUMP_LOCK.lock().unwrap();

	let spec = GraphSpec::from_json_str(
		r#"{
			"nodes": [
				{"id": "slow", "type": "EXEC", "cmd": "sleep 5"},
				{"id": "sink", "type": "EXEC", "cmd": "sh -c 'cat > /dev/null'"}
			],
			"edges": [{"id": "e", "from": "slow", "to": "sink"}]
		}"#,
	)
	.unwrap();
	validate(&spec).unwrap();
	let (graph, fabric) = build_graph(&spec).unwrap();
	let mut engine = Engine::new(graph, fabric).unwrap();
	engine.spawn().unwrap();

	let raiser = std::thread::spawn(|| {
		std::thread::sleep(Duration::from_millis(300));
		signal_hook::low_level::raise(signal_hook::consts::SIGINT).unwrap();
	});

	let started = Instant::now();
	engine.run(Duration::from_secs(3600)).unwrap();
	assert!(started.elapsed() < Duration::from_secs(4));
	raiser.join().unwrap();

	// Kill and reap what is still running, so no other test's reaper
	// stumbles over these children later.
	for node in engine.graph().iter_nodes() {
		if let (Some(pid), false) = (node.pid, node.ended) {
			let _ = manifold_runner::sys::kill(pid, libc::SIGKILL);
			let _ = manifold_runner::sys::waitpid(pid);
		}
	}
}
