//! The event engine: a single-threaded poll loop that moves bytes between
//! pipes with splice and tee, driven purely by fd readiness.
//!
//! Each source pipe gets one readable handler. Each (source pipe,
//! destination pipe) pair gets one writable handler. The readable handler
//! never moves bytes itself; it opens a cycle by arming the writable
//! handlers. With one destination, the writable handler splices directly.
//! With several, each one tees the same source bytes into its own
//! destination, and the last of them to run discards the common prefix all
//! destinations have accepted (the watermark) into `/dev/null` — tee does
//! not consume from the source, so nothing is lost and nobody is skipped,
//! and the slowest consumer bounds consumption.

use std::io;
use std::os::unix::io::RawFd;
use std::time::{Duration, Instant};
use tracing::{debug, error, info};

use crate::errors::RuntimeError;
use crate::fabric::{Fabric, PipeId};
use crate::graph::{EdgeIdx, Graph, NodeIdx};
use crate::launch;
use crate::reap::SignalPipe;
use crate::stats;
use crate::sys;

/// Upper bound on bytes moved by one splice or tee call.
/// 64 KiB matches the default pipe buffer; any page-multiple works.
const SPLICE_CHUNK: usize = 64 * 1024;

const READ_READY: i16 = sys::POLLIN | sys::POLLHUP | sys::POLLERR;
const WRITE_READY: i16 = sys::POLLOUT | sys::POLLHUP | sys::POLLERR;

/// EAGAIN means "nothing this round"; EINTR means "try again later".
/// Neither ends a stream.
fn benign(e: &io::Error) -> bool {
	matches!(
		e.kind(),
		io::ErrorKind::WouldBlock | io::ErrorKind::Interrupted
	)
}

/// Handle to a writable handler, stored on the destination node so the
/// reaper can cancel it when that consumer dies.
#[derive(Debug, Clone, Copy)]
pub(crate) struct SinkRef {
	pub(crate) source: usize,
	pub(crate) sink: usize,
}

/// Writable-handler state for one destination pipe of one source
#[derive(Debug)]
pub(crate) struct Sink {
	/// The destination pipe this handler writes into
	pub(crate) pipe: PipeId,

	/// Every edge delivered by this (source, destination) pair
	pub(crate) edges: Vec<EdgeIdx>,

	/// Bytes duplicated into this destination and not yet discarded from
	/// the source. Only meaningful while fanning out.
	pub(crate) bytes_written: u64,

	/// Has this handler run in the current cycle?
	pub(crate) visited: bool,

	/// Is this handler waiting for its fd in the poll set?
	pub(crate) armed: bool,
}

/// Readable-handler state for one source pipe
#[derive(Debug)]
pub(crate) struct Source {
	/// The source pipe this handler reads readiness from
	pub(crate) pipe: PipeId,

	/// The node this pipe belongs to
	pub(crate) node: NodeIdx,

	/// One slot per destination pipe. A freed slot means that consumer is
	/// gone for good.
	pub(crate) sinks: Vec<Option<Sink>>,

	/// Least byte count every live destination has accepted this cycle;
	/// safe to discard that much from the source.
	pub(crate) watermark: u64,

	pub(crate) read_armed: bool,

	/// Set once the source pipe is closed and this handler is done forever
	pub(crate) retired: bool,
}

#[derive(Debug, Clone, Copy)]
enum Token {
	Wake,
	Readable(usize),
	Writable(usize, usize),
}

/// The runner: owns the graph, the fabric, all handler state, and the loop.
pub struct Engine {
	pub(crate) graph: Graph,
	pub(crate) fabric: Fabric,
	pub(crate) sources: Vec<Source>,
	pub(crate) signals: SignalPipe,
	pub(crate) dev_null: RawFd,

	/// Children reaped so far
	pub(crate) exited: usize,

	/// Interrupt requested; stop dispatching
	pub(crate) loop_break: bool,

	/// All children have terminated; finish normally
	pub(crate) loop_exit: bool,
}

impl Engine {
	pub fn new(graph: Graph, fabric: Fabric) -> Result<Self, RuntimeError> {
		let dev_null = sys::open_dev_null().map_err(RuntimeError::OpenDevNull)?;
		let signals = SignalPipe::install().map_err(RuntimeError::InstallSignals)?;

		Ok(Self {
			graph,
			fabric,
			sources: Vec::new(),
			signals,
			dev_null,
			exited: 0,
			loop_break: false,
			loop_exit: false,
		})
	}

	pub fn graph(&self) -> &Graph {
		&self.graph
	}

	/// Fork and exec every node. Handler state is registered before each
	/// fork so the parent side of every pipe is accounted for.
	pub fn spawn(&mut self) -> Result<(), RuntimeError> {
		launch::spawn_all(self)
	}

	/// Write the current edge counters to stdout as one JSON line.
	pub fn emit_stats(&self) {
		stats::emit(&self.graph);
	}

	/// Install readable/writable handler state for one node's output pipes,
	/// and switch the fds the parent pumps to nonblocking mode.
	pub(crate) fn register_node_sources(&mut self, idx: NodeIdx) -> Result<(), RuntimeError> {
		let node_id = self.graph.node(idx).id.clone();
		let out_pipes = self.graph.node(idx).out_pipes.clone();

		for pipe_id in out_pipes {
			sys::set_nonblocking(self.fabric.get(pipe_id).read_fd()).map_err(|source| {
				RuntimeError::RegisterNode {
					node: node_id.clone(),
					source,
				}
			})?;

			let src_i = self.sources.len();
			let mut sinks: Vec<Option<Sink>> = Vec::new();

			for edge_idx in self.fabric.get(pipe_id).edges().to_vec() {
				let dest_idx = self.graph.edge(edge_idx).to;
				let to_pipe = self
					.fabric
					.find_by_edge(&self.graph.node(dest_idx).in_pipes, edge_idx)
					.ok_or_else(|| RuntimeError::NoPipeForEdge {
						edge: self.graph.edge(edge_idx).id.clone(),
						node: self.graph.node(dest_idx).id.clone(),
					})?;

				// Edges sharing source and destination pipes share one
				// handler; its deliveries count on all of them.
				if let Some(existing) = sinks.iter_mut().flatten().find(|s| s.pipe == to_pipe) {
					existing.edges.push(edge_idx);
					continue;
				}

				sys::set_nonblocking(self.fabric.get(to_pipe).write_fd()).map_err(|source| {
					RuntimeError::RegisterNode {
						node: node_id.clone(),
						source,
					}
				})?;

				let sink_i = sinks.len();
				sinks.push(Some(Sink {
					pipe: to_pipe,
					edges: vec![edge_idx],
					bytes_written: 0,
					visited: false,
					armed: false,
				}));
				self.graph.node_mut(dest_idx).sink_refs.push(SinkRef {
					source: src_i,
					sink: sink_i,
				});
			}

			self.sources.push(Source {
				pipe: pipe_id,
				node: idx,
				sinks,
				watermark: u64::MAX,
				read_armed: true,
				retired: false,
			});
		}

		Ok(())
	}

	/// Pump until every child has been reaped or an interrupt arrives.
	///
	/// Emits a stats line at every `stats_interval` boundary.
	pub fn run(&mut self, stats_interval: Duration) -> Result<(), RuntimeError> {
		let mut next_tick = Instant::now() + stats_interval;

		while !(self.loop_break || self.loop_exit) {
			let now = Instant::now();
			while next_tick <= now {
				stats::emit(&self.graph);
				next_tick += stats_interval;
			}

			let mut fds = vec![sys::PollFd::new(self.signals.fd(), sys::POLLIN)];
			let mut tokens = vec![Token::Wake];
			for (i, source) in self.sources.iter().enumerate() {
				if source.retired {
					continue;
				}
				let from = self.fabric.get(source.pipe);
				if source.read_armed && from.read_open() {
					fds.push(sys::PollFd::new(from.read_fd(), sys::POLLIN));
					tokens.push(Token::Readable(i));
				}
				for (j, slot) in source.sinks.iter().enumerate() {
					let Some(sink) = slot else { continue };
					let to = self.fabric.get(sink.pipe);
					if sink.armed && to.write_open() {
						fds.push(sys::PollFd::new(to.write_fd(), sys::POLLOUT));
						tokens.push(Token::Writable(i, j));
					}
				}
			}

			let timeout = next_tick.saturating_duration_since(Instant::now());
			let timeout_ms = timeout.as_millis().min(i32::MAX as u128) as i32;

			match sys::poll(&mut fds, timeout_ms) {
				Ok(0) => continue,
				Ok(_) => {}
				Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
				Err(e) => return Err(RuntimeError::Poll(e)),
			}

			// Signals first: the reaper may cancel handlers that this same
			// poll round reported as ready.
			if fds[0].ready(READ_READY) {
				self.signals.drain();
				if self.signals.take_sigint() {
					info!(message = "interrupted; breaking out of the loop");
					self.loop_break = true;
					continue;
				}
				if self.signals.take_sigchld() {
					self.reap();
				}
			}

			let ready: Vec<Token> = tokens
				.iter()
				.zip(fds.iter())
				.skip(1)
				.filter(|(token, fd)| match token {
					Token::Readable(_) => fd.ready(READ_READY),
					Token::Writable(..) => fd.ready(WRITE_READY),
					Token::Wake => false,
				})
				.map(|(token, _)| *token)
				.collect();

			for token in ready {
				match token {
					Token::Readable(i) => self.dispatch_readable(i),
					Token::Writable(i, j) => self.dispatch_writable(i, j),
					Token::Wake => {}
				}
			}
		}

		Ok(())
	}

	/// Consume one readable readiness event, if it is still wanted.
	fn dispatch_readable(&mut self, src_i: usize) {
		let source = &mut self.sources[src_i];
		if !source.read_armed {
			return;
		}
		source.read_armed = false;
		if source.retired || !self.fabric.get(source.pipe).read_open() {
			return;
		}
		self.readable_handler(src_i);
	}

	/// Consume one writable readiness event, if it is still wanted.
	fn dispatch_writable(&mut self, src_i: usize, sink_i: usize) {
		{
			let Some(sink) = self.sources[src_i].sinks[sink_i].as_mut() else {
				return;
			};
			if !sink.armed {
				return;
			}
			sink.armed = false;
		}

		let source_open = self.fabric.get(self.sources[src_i].pipe).read_open();
		let sink_open = self.sources[src_i].sinks[sink_i]
			.as_ref()
			.is_some_and(|s| self.fabric.get(s.pipe).write_open());
		if !source_open || !sink_open {
			return;
		}

		self.writable_handler(src_i, sink_i);
	}

	/// Open a cycle: reset per-cycle scratch, arm every live writable
	/// handler, and drop the ones whose consumer has gone away. Closes the
	/// source once no consumer is left.
	fn readable_handler(&mut self, src_i: usize) {
		let Engine {
			sources,
			fabric,
			graph,
			..
		} = self;
		let source = &mut sources[src_i];

		source.watermark = u64::MAX;
		for sink in source.sinks.iter_mut().flatten() {
			sink.visited = false;
		}

		let mut any_open = false;
		for slot in source.sinks.iter_mut() {
			let Some(sink) = slot else { continue };
			if fabric.get(sink.pipe).write_open() {
				any_open = true;
				sink.armed = true;
			} else {
				debug!(
					message = "consumer gone; dropping its writable handler",
					node = %graph.node(source.node).id,
				);
				*slot = None;
			}
		}

		if !any_open {
			debug!(
				message = "no consumers left; closing source pipe",
				node = %graph.node(source.node).id,
			);
			let _ = fabric.get_mut(source.pipe).close_read();
			source.retired = true;
		}
	}

	fn writable_handler(&mut self, src_i: usize, sink_i: usize) {
		let fan_out = self.sources[src_i].sinks.len();
		let mut got_eof = false;
		let mut last = true;

		if fan_out == 1 {
			got_eof = self.write_single(src_i);
		} else {
			self.write_multiple(src_i, sink_i);

			// Not the last handler of the cycle while any live destination
			// has yet to run; the source must not be consumed before then.
			{
				let Engine {
					sources, fabric, ..
				} = self;
				for sink in sources[src_i].sinks.iter().flatten() {
					if fabric.get(sink.pipe).write_open() && !sink.visited {
						last = false;
						break;
					}
				}
			}

			if last {
				got_eof = self.drain_watermark(src_i);
			}
		}

		if last {
			if got_eof {
				self.close_cycle(src_i);
			} else {
				let source = &mut self.sources[src_i];
				if !source.retired && self.fabric.get(source.pipe).read_open() {
					source.read_armed = true;
				}
			}
		}
	}

	/// Fan-out degree 1: move bytes straight from source to destination.
	/// Returns true on end of stream.
	fn write_single(&mut self, src_i: usize) -> bool {
		let Engine {
			sources,
			fabric,
			graph,
			..
		} = self;
		let source = &mut sources[src_i];
		let Some(sink) = source.sinks[0].as_mut() else {
			return true;
		};
		if !fabric.get(sink.pipe).write_open() {
			return true;
		}

		let from_fd = fabric.get(source.pipe).read_fd();
		let to_fd = fabric.get(sink.pipe).write_fd();
		match sys::splice(from_fd, to_fd, SPLICE_CHUNK) {
			Ok(0) => true,
			Ok(n) => {
				for &e in &sink.edges {
					graph.edge_mut(e).bytes_spliced += n as i64;
				}
				false
			}
			Err(e) if benign(&e) => false,
			Err(e) => {
				error!(
					message = "splice failed; closing destination",
					edge = %graph.edge(sink.edges[0]).id,
					?e,
				);
				let _ = fabric.get_mut(sink.pipe).close_write();
				true
			}
		}
	}

	/// Fan-out degree > 1: duplicate source bytes into this destination
	/// without consuming them, and fold this destination into the cycle's
	/// watermark.
	fn write_multiple(&mut self, src_i: usize, sink_i: usize) {
		let Engine {
			sources,
			fabric,
			graph,
			..
		} = self;
		let source = &mut sources[src_i];
		let from_fd = fabric.get(source.pipe).read_fd();

		let contributes;
		{
			let Some(sink) = source.sinks[sink_i].as_mut() else {
				return;
			};

			let mut open = fabric.get(sink.pipe).write_open();
			if open && sink.bytes_written == 0 {
				match sys::tee(from_fd, fabric.get(sink.pipe).write_fd(), SPLICE_CHUNK) {
					// Nothing left to duplicate; the drain below turns this
					// into end-of-stream for the whole fan-out set.
					Ok(0) => {}
					Ok(n) => {
						sink.bytes_written = n as u64;
						for &e in &sink.edges {
							graph.edge_mut(e).bytes_spliced += n as i64;
						}
					}
					Err(e) if benign(&e) => {}
					Err(e) => {
						error!(
							message = "tee failed; closing destination",
							edge = %graph.edge(sink.edges[0]).id,
							?e,
						);
						let _ = fabric.get_mut(sink.pipe).close_write();
						open = false;
					}
				}
			}

			sink.visited = true;
			contributes = open.then_some(sink.bytes_written);
		}

		if let Some(bytes) = contributes {
			if bytes < source.watermark {
				source.watermark = bytes;
			}
		}
	}

	/// Last writable handler of a fan-out cycle: every live destination has
	/// accepted at least `watermark` bytes, so that prefix can be discarded
	/// from the source. Returns true on end of stream.
	fn drain_watermark(&mut self, src_i: usize) -> bool {
		let Engine {
			sources,
			fabric,
			dev_null,
			graph,
			..
		} = self;
		let source = &mut sources[src_i];
		let from_fd = fabric.get(source.pipe).read_fd();

		match sys::splice(from_fd, *dev_null, source.watermark as usize) {
			Ok(0) => true,
			Ok(n) => {
				for sink in source.sinks.iter_mut().flatten() {
					sink.bytes_written = sink.bytes_written.saturating_sub(n as u64);
				}
				false
			}
			Err(e) if benign(&e) => false,
			Err(e) => {
				error!(
					message = "discarding fanned-out bytes failed; closing stream",
					node = %graph.node(source.node).id,
					?e,
				);
				true
			}
		}
	}

	/// End of stream: close the source's read side and every destination's
	/// write side, releasing EOF downstream.
	fn close_cycle(&mut self, src_i: usize) {
		let Engine {
			sources,
			fabric,
			graph,
			..
		} = self;
		let source = &mut sources[src_i];

		debug!(
			message = "stream ended; closing pipes",
			node = %graph.node(source.node).id,
		);
		let _ = fabric.get_mut(source.pipe).close_read();
		for sink in source.sinks.iter().flatten() {
			let _ = fabric.get_mut(sink.pipe).close_write();
		}
	}
}

impl Drop for Engine {
	fn drop(&mut self) {
		let _ = sys::close(self.dev_null);
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::build::build_graph;
	use manifold_graph::{GraphSpec, NodeId};

	fn write_bytes(fd: RawFd, bytes: &[u8]) {
		let n = unsafe { libc::write(fd, bytes.as_ptr() as *const libc::c_void, bytes.len()) };
		assert_eq!(n, bytes.len() as isize);
	}

	fn read_bytes(fd: RawFd) -> Vec<u8> {
		let mut buf = [0u8; 4096];
		let n = unsafe { libc::read(fd, buf.as_mut_ptr() as *mut libc::c_void, buf.len()) };
		assert!(n >= 0);
		buf[..n as usize].to_vec()
	}

	fn engine_for(json: &str) -> Engine {
		let spec = GraphSpec::from_json_str(json).unwrap();
		let (graph, fabric) = build_graph(&spec).unwrap();
		Engine::new(graph, fabric).unwrap()
	}

	#[test]
	fn single_destination_cycle_moves_bytes() {
		let mut engine = engine_for(
			r#"{
				"nodes": [
					{"id": "A", "type": "EXEC", "cmd": "echo hi"},
					{"id": "B", "type": "EXEC", "cmd": "cat"}
				],
				"edges": [{"id": "ab", "from": "A", "to": "B"}]
			}"#,
		);
		let a = engine.graph().node_by_id(&NodeId::new("A")).unwrap();
		engine.register_node_sources(a).unwrap();
		assert_eq!(engine.sources.len(), 1);
		assert_eq!(engine.sources[0].sinks.len(), 1);

		let src_pipe = engine.sources[0].pipe;
		write_bytes(engine.fabric.get(src_pipe).write_fd(), b"hi\n");

		engine.dispatch_readable(0);
		assert!(engine.sources[0].sinks[0].as_ref().unwrap().armed);

		engine.dispatch_writable(0, 0);
		assert_eq!(engine.graph().iter_edges().next().unwrap().bytes_spliced, 3);
		assert!(engine.sources[0].read_armed);

		let dest_pipe = engine.sources[0].sinks[0].as_ref().unwrap().pipe;
		assert_eq!(read_bytes(engine.fabric.get(dest_pipe).read_fd()), b"hi\n");

		// producer goes away; next cycle sees EOF and closes both pipes
		engine.fabric.get_mut(src_pipe).close_write().unwrap();
		engine.dispatch_readable(0);
		engine.dispatch_writable(0, 0);
		assert!(!engine.fabric.get(src_pipe).read_open());
		assert!(!engine.fabric.get(dest_pipe).write_open());
	}

	#[test]
	fn fan_out_duplicates_bytes_and_drains_watermark() {
		let mut engine = engine_for(
			r#"{
				"nodes": [
					{"id": "A", "type": "EXEC", "cmd": "seq 1 10"},
					{"id": "B", "type": "EXEC", "cmd": "cat"},
					{"id": "C", "type": "EXEC", "cmd": "cat"}
				],
				"edges": [
					{"id": "ab", "from": "A", "to": "B"},
					{"id": "ac", "from": "A", "to": "C"}
				]
			}"#,
		);
		let a = engine.graph().node_by_id(&NodeId::new("A")).unwrap();
		engine.register_node_sources(a).unwrap();
		assert_eq!(engine.sources.len(), 1);
		assert_eq!(engine.sources[0].sinks.len(), 2);

		let src_pipe = engine.sources[0].pipe;
		write_bytes(engine.fabric.get(src_pipe).write_fd(), b"abcd");

		engine.dispatch_readable(0);
		engine.dispatch_writable(0, 0);

		// halfway through the cycle nothing is consumed from the source yet
		assert!(!engine.sources[0].sinks[1].as_ref().unwrap().visited);

		engine.dispatch_writable(0, 1);

		// the watermark was fully drained
		let min_left = engine.sources[0]
			.sinks
			.iter()
			.flatten()
			.map(|s| s.bytes_written)
			.min();
		assert_eq!(min_left, Some(0));

		// every destination saw the same bytes, every edge counted them
		for sink in engine.sources[0].sinks.iter().flatten() {
			assert_eq!(read_bytes(engine.fabric.get(sink.pipe).read_fd()), b"abcd");
		}
		for edge in engine.graph().iter_edges() {
			assert_eq!(edge.bytes_spliced, 4);
		}
		assert!(engine.sources[0].read_armed);

		// producer exits: the next cycle propagates EOF everywhere
		engine.fabric.get_mut(src_pipe).close_write().unwrap();
		engine.dispatch_readable(0);
		engine.dispatch_writable(0, 0);
		engine.dispatch_writable(0, 1);

		assert!(!engine.fabric.get(src_pipe).read_open());
		for sink in engine.sources[0].sinks.iter().flatten() {
			assert!(!engine.fabric.get(sink.pipe).write_open());
		}
	}

	#[test]
	fn dead_consumers_retire_the_source() {
		let mut engine = engine_for(
			r#"{
				"nodes": [
					{"id": "A", "type": "EXEC", "cmd": "seq 1 10"},
					{"id": "B", "type": "EXEC", "cmd": "cat"},
					{"id": "C", "type": "EXEC", "cmd": "cat"}
				],
				"edges": [
					{"id": "ab", "from": "A", "to": "B"},
					{"id": "ac", "from": "A", "to": "C"}
				]
			}"#,
		);
		let a = engine.graph().node_by_id(&NodeId::new("A")).unwrap();
		engine.register_node_sources(a).unwrap();

		// both consumers die before the next cycle
		let dests: Vec<PipeId> = engine.sources[0]
			.sinks
			.iter()
			.flatten()
			.map(|s| s.pipe)
			.collect();
		for d in dests {
			engine.fabric.get_mut(d).close_both().unwrap();
		}

		write_bytes(
			engine.fabric.get(engine.sources[0].pipe).write_fd(),
			b"unwanted",
		);
		engine.dispatch_readable(0);

		assert!(engine.sources[0].retired);
		assert!(engine.sources[0].sinks.iter().all(|s| s.is_none()));
		assert!(!engine.fabric.get(engine.sources[0].pipe).read_open());
	}

	#[test]
	fn edges_sharing_both_pipes_share_one_sink() {
		let mut engine = engine_for(
			r#"{
				"nodes": [
					{"id": "A", "type": "EXEC", "cmd": "echo hi"},
					{"id": "B", "type": "EXEC", "cmd": "cat"}
				],
				"edges": [
					{"id": "e1", "from": "A", "to": "B"},
					{"id": "e2", "from": "A", "to": "B"}
				]
			}"#,
		);
		let a = engine.graph().node_by_id(&NodeId::new("A")).unwrap();
		engine.register_node_sources(a).unwrap();

		// one handler, both edges counted by it
		assert_eq!(engine.sources[0].sinks.len(), 1);
		assert_eq!(engine.sources[0].sinks[0].as_ref().unwrap().edges.len(), 2);

		write_bytes(engine.fabric.get(engine.sources[0].pipe).write_fd(), b"xyz");
		engine.dispatch_readable(0);
		engine.dispatch_writable(0, 0);

		for edge in engine.graph().iter_edges() {
			assert_eq!(edge.bytes_spliced, 3);
		}
	}
}
