//! The pipe fabric: every OS pipe the runner creates, in one arena.
//!
//! Pipes are referred to by [`PipeId`] everywhere — nodes, engine state, and
//! handlers never hold fds of their own. Each side of a pipe carries its own
//! open flag, so closing is idempotent no matter which teardown path gets
//! there first.

use std::io;
use std::os::unix::io::RawFd;
use tracing::debug;

use manifold_graph::PortName;

use crate::graph::EdgeIdx;
use crate::sys;

/// Index of a pipe in the fabric
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PipeId(pub(crate) usize);

impl From<PipeId> for usize {
	fn from(value: PipeId) -> Self {
		value.0
	}
}

/// One OS pipe plus the bookkeeping the runner needs around it
#[derive(Debug)]
pub struct PipeChannel {
	read_fd: RawFd,
	read_open: bool,

	write_fd: RawFd,
	write_open: bool,

	/// The port this pipe is attached to on its owning node
	port: PortName,

	/// Every edge that shares this pipe. More than one entry means the
	/// bytes in here serve several logical channels at once.
	edges: Vec<EdgeIdx>,
}

impl PipeChannel {
	pub fn read_fd(&self) -> RawFd {
		self.read_fd
	}

	pub fn write_fd(&self) -> RawFd {
		self.write_fd
	}

	pub fn read_open(&self) -> bool {
		self.read_open
	}

	pub fn write_open(&self) -> bool {
		self.write_open
	}

	pub fn port(&self) -> &PortName {
		&self.port
	}

	pub fn edges(&self) -> &[EdgeIdx] {
		&self.edges
	}

	pub(crate) fn add_edge(&mut self, edge: EdgeIdx) {
		self.edges.push(edge);
	}

	pub fn carries_edge(&self, edge: EdgeIdx) -> bool {
		self.edges.contains(&edge)
	}

	/// Close the read side if it is still open. Safe to call again.
	pub fn close_read(&mut self) -> io::Result<()> {
		if !self.read_open {
			return Ok(());
		}
		match sys::close(self.read_fd) {
			Ok(()) => {
				self.read_open = false;
				Ok(())
			}
			Err(e) => {
				debug!(
					message = "closing pipe read fd failed",
					fd = self.read_fd,
					?e
				);
				Err(e)
			}
		}
	}

	/// Close the write side if it is still open. Safe to call again.
	pub fn close_write(&mut self) -> io::Result<()> {
		if !self.write_open {
			return Ok(());
		}
		match sys::close(self.write_fd) {
			Ok(()) => {
				self.write_open = false;
				Ok(())
			}
			Err(e) => {
				debug!(
					message = "closing pipe write fd failed",
					fd = self.write_fd,
					?e
				);
				Err(e)
			}
		}
	}

	/// Close whichever sides are still open.
	pub fn close_both(&mut self) -> io::Result<()> {
		let read = self.close_read();
		let write = self.close_write();
		read.and(write)
	}
}

/// Arena of every pipe in the graph
#[derive(Debug, Default)]
pub struct Fabric {
	pipes: Vec<PipeChannel>,
}

impl Fabric {
	pub fn new() -> Self {
		Self { pipes: Vec::new() }
	}

	/// Create an OS pipe attached to `port`, carrying `edge`.
	pub fn create(&mut self, port: PortName, edge: EdgeIdx) -> io::Result<PipeId> {
		let (read_fd, write_fd) = sys::pipe()?;
		debug!(message = "created pipe", read_fd, write_fd, %port);

		self.pipes.push(PipeChannel {
			read_fd,
			read_open: true,
			write_fd,
			write_open: true,
			port,
			edges: vec![edge],
		});
		Ok(PipeId(self.pipes.len() - 1))
	}

	pub fn get(&self, id: PipeId) -> &PipeChannel {
		&self.pipes[id.0]
	}

	pub fn get_mut(&mut self, id: PipeId) -> &mut PipeChannel {
		&mut self.pipes[id.0]
	}

	pub fn len(&self) -> usize {
		self.pipes.len()
	}

	pub fn is_empty(&self) -> bool {
		self.pipes.is_empty()
	}

	/// Among `ids`, the pipe attached to `port`, if one exists yet.
	pub fn find_by_port(&self, ids: &[PipeId], port: &PortName) -> Option<PipeId> {
		ids.iter().copied().find(|&id| self.get(id).port() == port)
	}

	/// Among `ids`, the pipe that carries `edge`.
	pub fn find_by_edge(&self, ids: &[PipeId], edge: EdgeIdx) -> Option<PipeId> {
		ids.iter().copied().find(|&id| self.get(id).carries_edge(edge))
	}

	/// Close every side of every pipe that is still open.
	pub fn close_all(&mut self) -> io::Result<()> {
		let mut result = Ok(());
		for pipe in &mut self.pipes {
			if let Err(e) = pipe.close_both() {
				result = Err(e);
			}
		}
		result
	}

	/// The forked child's fd-hygiene pass: close every pipe fd we inherited,
	/// without touching bookkeeping or emitting events. The dup2'd standard
	/// streams survive because they live at 0/1 by the time this runs.
	pub(crate) fn close_inherited(&self) {
		for pipe in &self.pipes {
			let _ = sys::close(pipe.read_fd);
			let _ = sys::close(pipe.write_fd);
		}
	}
}

impl Drop for Fabric {
	fn drop(&mut self) {
		let _ = self.close_all();
	}
}
