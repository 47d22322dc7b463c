//! The child launcher: turn each node into a running process.
//!
//! Everything that allocates — tokenizing, port substitution, building the
//! C argv — happens before fork. The child itself only dup2s, closes fds,
//! and execs.

use std::ffi::CString;
use std::os::unix::io::RawFd;
use tracing::debug;

use manifold_graph::{replace_all, tokenize};

use crate::engine::Engine;
use crate::errors::RuntimeError;
use crate::graph::NodeIdx;
use crate::sys;

/// Exit status a child reports when it never reached exec, or exec failed
const EXEC_FAILURE: i32 = 127;

/// Everything a forked child needs, assembled in the parent
pub(crate) struct ChildPlan {
	argv: Vec<CString>,

	/// Read end to install as fd 0, if a `-` input pipe claimed stdin
	stdin_fd: Option<RawFd>,

	/// Write end to install as fd 1, if a `-` output pipe claimed stdout
	stdout_fd: Option<RawFd>,
}

/// Register pump handlers and fork every connected node, in declaration
/// order. Handlers go in first so the parent side of each pipe is wired
/// before the child exists.
pub(crate) fn spawn_all(engine: &mut Engine) -> Result<(), RuntimeError> {
	for i in 0..engine.graph.len_nodes() {
		let idx = NodeIdx(i);

		{
			let node = engine.graph.node(idx);
			if node.in_pipes.is_empty() && node.out_pipes.is_empty() {
				debug!(message = "node has no pipes; not launching", node = %node.id);
				continue;
			}
		}

		engine.register_node_sources(idx)?;
		let plan = prepare(engine, idx)?;

		let node_id = engine.graph.node(idx).id.clone();
		match sys::fork() {
			Err(source) => {
				return Err(RuntimeError::Fork {
					node: node_id,
					source,
				})
			}
			Ok(0) => exec_child(engine, plan),
			Ok(pid) => {
				debug!(message = "launched node", node = %node_id, pid);
				let node = engine.graph.node_mut(idx);
				node.pid = Some(pid);
				node.ended = false;
			}
		}
	}
	Ok(())
}

/// Build a node's argv: tokenize the command, claim standard streams for
/// `-` ports, and rewrite every named port into a `/proc` fd path the
/// exec'd program can open.
pub(crate) fn prepare(engine: &Engine, idx: NodeIdx) -> Result<ChildPlan, RuntimeError> {
	let node = engine.graph.node(idx);

	let mut tokens = tokenize(&node.cmd).map_err(|source| RuntimeError::BadCommand {
		node: node.id.clone(),
		source,
	})?;
	if tokens.is_empty() {
		return Err(RuntimeError::EmptyCommand {
			node: node.id.clone(),
		});
	}

	// Children resolve port paths through this process's fd table.
	let runner_pid = sys::getpid();

	let mut stdout_fd = None;
	let mut stdin_fd = None;

	for &p in &node.out_pipes {
		let pipe = engine.fabric.get(p);
		if pipe.port().is_stdio() {
			if stdout_fd.is_some() {
				return Err(RuntimeError::StdioConflict {
					node: node.id.clone(),
					stream: "output",
				});
			}
			stdout_fd = Some(pipe.write_fd());
		} else {
			let path = format!("/proc/{}/fd/{}", runner_pid, pipe.write_fd());
			for token in tokens.iter_mut() {
				*token = replace_all(token, pipe.port().as_str(), &path).map_err(|_| {
					RuntimeError::BadPort {
						node: node.id.clone(),
						port: pipe.port().clone(),
					}
				})?;
			}
		}
	}

	for &p in &node.in_pipes {
		let pipe = engine.fabric.get(p);
		if pipe.port().is_stdio() {
			if stdin_fd.is_some() {
				return Err(RuntimeError::StdioConflict {
					node: node.id.clone(),
					stream: "input",
				});
			}
			stdin_fd = Some(pipe.read_fd());
		} else {
			let path = format!("/proc/{}/fd/{}", runner_pid, pipe.read_fd());
			for token in tokens.iter_mut() {
				*token = replace_all(token, pipe.port().as_str(), &path).map_err(|_| {
					RuntimeError::BadPort {
						node: node.id.clone(),
						port: pipe.port().clone(),
					}
				})?;
			}
		}
	}

	let argv = sys::cstring_argv(&tokens).map_err(|source| RuntimeError::BadArgv {
		node: node.id.clone(),
		source,
	})?;

	Ok(ChildPlan {
		argv,
		stdin_fd,
		stdout_fd,
	})
}

/// The child side of fork. Never returns; any failure ends the child with
/// a status the parent reaps like every other termination.
fn exec_child(engine: &Engine, plan: ChildPlan) -> ! {
	if let Some(fd) = plan.stdout_fd {
		if sys::dup2(fd, libc::STDOUT_FILENO).is_err() {
			sys::_exit(EXEC_FAILURE);
		}
	}
	if let Some(fd) = plan.stdin_fd {
		if sys::dup2(fd, libc::STDIN_FILENO).is_err() {
			sys::_exit(EXEC_FAILURE);
		}
	}

	// The load-bearing hygiene pass: every pipe fd in the whole graph gets
	// closed in this child. One leaked write end would keep a reader from
	// ever seeing EOF. The dup2'd streams survive at fds 0 and 1.
	engine.fabric.close_inherited();

	if plan.stdin_fd.is_none() {
		let _ = sys::close(libc::STDIN_FILENO);
	}
	if plan.stdout_fd.is_none() {
		let _ = sys::close(libc::STDOUT_FILENO);
	}

	if sys::reset_sigpipe().is_err() {
		sys::_exit(EXEC_FAILURE);
	}

	let _ = sys::execvp(&plan.argv);
	sys::_exit(EXEC_FAILURE);
}
