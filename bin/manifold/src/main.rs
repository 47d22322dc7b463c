use clap::Parser;
use std::path::PathBuf;
use std::time::Duration;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use manifold_graph::{validate, GraphSpec};
use manifold_runner::{build_graph, Engine};

const DEFAULT_STATS_INTERVAL_MS: u64 = 1000;

/// Run a graph of processes connected by pipes
#[derive(Debug, Parser)]
#[command(version, about, long_about = None)]
struct Args {
	/// File containing the json definition of a process graph
	#[arg(short, long)]
	file: Option<PathBuf>,

	/// Same as --file, as a positional argument
	graph: Option<PathBuf>,

	/// Milliseconds between stats dumps to stdout.
	/// Zero or unparseable values fall back to the default.
	#[arg(short, long, default_value_t = DEFAULT_STATS_INTERVAL_MS.to_string())]
	interval: String,
}

fn main() {
	let args = Args::parse();

	// Stdout carries the stats stream; every diagnostic goes to stderr.
	tracing_subscriber::fmt()
		.with_env_filter(
			EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
		)
		.with_writer(std::io::stderr)
		.without_time()
		.init();

	let Some(path) = args.file.or(args.graph) else {
		error!(message = "a file containing a process graph must be specified; see --help");
		std::process::exit(1);
	};

	let interval_ms = args
		.interval
		.parse::<u64>()
		.ok()
		.filter(|&ms| ms != 0)
		.unwrap_or(DEFAULT_STATS_INTERVAL_MS);

	let spec = match GraphSpec::load_from_file(&path) {
		Ok(spec) => spec,
		Err(error) => {
			error!(message = "could not load graph", ?path, %error);
			std::process::exit(1);
		}
	};

	if let Err(error) = validate(&spec) {
		error!(message = "invalid graph", ?path, %error);
		std::process::exit(1);
	}

	let (graph, fabric) = match build_graph(&spec) {
		Ok(built) => built,
		Err(error) => {
			error!(message = "could not wire up graph", %error);
			std::process::exit(1);
		}
	};

	let mut engine = match Engine::new(graph, fabric) {
		Ok(engine) => engine,
		Err(error) => {
			error!(message = "could not start engine", %error);
			std::process::exit(1);
		}
	};

	if let Err(error) = engine.spawn() {
		error!(message = "could not launch graph", %error);
		std::process::exit(1);
	}

	info!(
		message = "graph running",
		nodes = engine.graph().len_nodes(),
		edges = engine.graph().len_edges(),
	);

	let result = engine.run(Duration::from_millis(interval_ms));

	// Whatever happened, report how far every edge got.
	engine.emit_stats();

	if let Err(error) = result {
		error!(message = "runner failed", %error);
		std::process::exit(1);
	}
}
