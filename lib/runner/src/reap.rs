//! Signal plumbing and the child reaper.
//!
//! Signals never touch graph state directly: the handlers installed here
//! only set a flag and write one byte into a wake pipe that sits in the
//! poll set. The loop drains the pipe and acts on the flags from its own
//! thread, where mutating everything is safe.

use std::io;
use std::os::unix::io::RawFd;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, error, trace};

use signal_hook::consts::{SIGCHLD, SIGINT};
use signal_hook::low_level::pipe;
use signal_hook::SigId;

use crate::engine::Engine;
use crate::sys;

/// Self-pipe plus flags for the two signals the runner cares about
pub(crate) struct SignalPipe {
	read_fd: RawFd,
	write_fd: RawFd,

	sigint: Arc<AtomicBool>,
	sigchld: Arc<AtomicBool>,

	sig_ids: Vec<SigId>,
}

impl SignalPipe {
	pub(crate) fn install() -> io::Result<Self> {
		let (read_fd, write_fd) = sys::pipe()?;
		// The write happens in signal context; it must never block.
		sys::set_nonblocking(read_fd)?;
		sys::set_nonblocking(write_fd)?;
		sys::set_cloexec(read_fd)?;
		sys::set_cloexec(write_fd)?;

		let sigint = Arc::new(AtomicBool::new(false));
		let sigchld = Arc::new(AtomicBool::new(false));

		// Flags register before the pipe: when the wake byte is readable,
		// the matching flag is already set.
		let mut sig_ids = Vec::new();
		sig_ids.push(signal_hook::flag::register(SIGINT, sigint.clone())?);
		sig_ids.push(signal_hook::flag::register(SIGCHLD, sigchld.clone())?);
		sig_ids.push(pipe::register_raw(SIGINT, write_fd)?);
		sig_ids.push(pipe::register_raw(SIGCHLD, write_fd)?);

		Ok(Self {
			read_fd,
			write_fd,
			sigint,
			sigchld,
			sig_ids,
		})
	}

	/// The fd the poll loop watches
	pub(crate) fn fd(&self) -> RawFd {
		self.read_fd
	}

	/// Throw away queued wake bytes
	pub(crate) fn drain(&self) {
		let mut buf = [0u8; 64];
		loop {
			let n = unsafe {
				libc::read(self.read_fd, buf.as_mut_ptr() as *mut libc::c_void, buf.len())
			};
			if n <= 0 {
				break;
			}
		}
	}

	pub(crate) fn take_sigint(&self) -> bool {
		self.sigint.swap(false, Ordering::SeqCst)
	}

	pub(crate) fn take_sigchld(&self) -> bool {
		self.sigchld.swap(false, Ordering::SeqCst)
	}
}

impl Drop for SignalPipe {
	fn drop(&mut self) {
		// Unhook before closing, so no handler ever writes into a
		// recycled fd number.
		for id in self.sig_ids.drain(..) {
			signal_hook::low_level::unregister(id);
		}
		let _ = sys::close(self.write_fd);
		let _ = sys::close(self.read_fd);
	}
}

impl Engine {
	/// Drain every terminated child.
	///
	/// Signal delivery coalesces, so one wake byte may stand for several
	/// exits; loop until the kernel has nothing more for us.
	pub(crate) fn reap(&mut self) {
		loop {
			match sys::waitpid_any_nohang() {
				Err(e) if e.raw_os_error() == Some(libc::ECHILD) => {
					trace!(message = "waited for a child, but all have already terminated");
					return;
				}
				Err(e) => {
					error!(message = "unexpected error while waiting for a child", ?e);
					break;
				}
				Ok(None) => {
					trace!(message = "no more terminated children this round");
					break;
				}
				Ok(Some((pid, status))) => match status {
					sys::ExitStatus::Exited(code) => {
						debug!(message = "child exited", pid, code);
						self.close_node(pid);
					}
					// Killed by SIGPIPE means the downstream consumer went
					// away first; for a process graph that is a normal end.
					sys::ExitStatus::Signaled(sig) if sig == libc::SIGPIPE => {
						debug!(message = "child ended by SIGPIPE", pid);
						self.close_node(pid);
					}
					sys::ExitStatus::Signaled(sig) => {
						debug!(message = "child killed by unexpected signal", pid, sig);
						break;
					}
					sys::ExitStatus::Other(raw) => {
						error!(message = "child changed state unexpectedly", pid, raw);
						break;
					}
				},
			}
		}
	}

	/// Tear down one terminated node: release its pipes so EOF travels to
	/// everyone up- and downstream of it.
	fn close_node(&mut self, pid: libc::pid_t) {
		self.exited += 1;

		let Some(idx) = self.graph.node_by_pid(pid) else {
			error!(message = "reaped a child with no matching node", pid);
			return;
		};
		debug!(
			message = "closing terminated node",
			nth = self.exited,
			node = %self.graph.node(idx).id,
			pid,
		);

		{
			let Engine { graph, fabric, .. } = self;
			let node = graph.node_mut(idx);

			// The child no longer reads: both sides of its input pipes go.
			for &p in &node.in_pipes {
				let _ = fabric.get_mut(p).close_both();
			}

			node.ended = true;

			// The child was the only producer on its output pipes; closing
			// our write copies releases EOF to the consumers.
			for &p in &node.out_pipes {
				let _ = fabric.get_mut(p).close_write();
			}
		}

		// Writes still queued toward this node are pointless now. Cancel
		// them and wake the paired readable handler, which will see the
		// closed destination and cascade the teardown.
		let refs = self.graph.node(idx).sink_refs.clone();
		for r in refs {
			let source = &mut self.sources[r.source];
			let was_armed = match source.sinks[r.sink].as_mut() {
				Some(sink) if sink.armed => {
					sink.armed = false;
					true
				}
				_ => false,
			};
			if was_armed {
				debug!(
					message = "cancelled pending write into terminated node",
					node = %self.graph.node(idx).id,
				);
				if !source.retired && self.fabric.get(source.pipe).read_open() {
					source.read_armed = true;
				}
			}
		}

		for edge in self.graph.iter_edges() {
			if edge.to == idx {
				debug!(
					message = "edge finished",
					edge = %edge.id,
					bytes = edge.bytes_spliced,
				);
			}
		}

		if self.exited >= self.graph.len_nodes() {
			self.loop_exit = true;
		}
	}
}
