//! Thin safe wrappers around the libc calls the runner is built on.
//!
//! Everything here translates the C convention (negative return, errno) into
//! `io::Result`. No policy lives in this module; callers decide what EAGAIN,
//! EOF, or a dead child mean.

use std::convert::Infallible;
use std::ffi::CString;
use std::io::{Error, Result};
use std::os::unix::io::RawFd;
use std::ptr;

fn check_err<T: Ord + Default>(num: T) -> Result<T> {
	if num < T::default() {
		return Err(Error::last_os_error());
	}
	Ok(num)
}

/// Create an OS pipe. Both fds are returned raw; ownership is the caller's.
pub fn pipe() -> Result<(RawFd, RawFd)> {
	let mut fds = [0 as libc::c_int; 2];
	check_err(unsafe { libc::pipe(fds.as_mut_ptr()) })?;
	Ok((fds[0], fds[1]))
}

pub fn close(fd: RawFd) -> Result<()> {
	check_err(unsafe { libc::close(fd) })?;
	Ok(())
}

pub fn dup2(oldfd: RawFd, newfd: RawFd) -> Result<()> {
	check_err(unsafe { libc::dup2(oldfd, newfd) })?;
	Ok(())
}

pub fn fork() -> Result<libc::pid_t> {
	check_err(unsafe { libc::fork() })
}

pub fn getpid() -> libc::pid_t {
	unsafe { libc::getpid() }
}

pub fn kill(pid: libc::pid_t, signal: libc::c_int) -> Result<()> {
	check_err(unsafe { libc::kill(pid, signal) })?;
	Ok(())
}

pub fn _exit(status: i32) -> ! {
	unsafe { libc::_exit(status as libc::c_int) }
}

fn to_cstring(s: &str) -> Result<CString> {
	CString::new(s.as_bytes()).map_err(|_| Error::from_raw_os_error(libc::EINVAL))
}

/// Exec `argv[0]`, searching PATH. Returns only on failure.
pub fn execvp(argv: &[CString]) -> Result<Infallible> {
	let mut argv_ptr: Vec<*const libc::c_char> = argv.iter().map(|a| a.as_ptr()).collect();
	argv_ptr.push(ptr::null());

	check_err(unsafe { libc::execvp(argv_ptr[0], argv_ptr.as_ptr()) })?;
	unreachable!("execvp returned success")
}

/// Build the C argv for [`execvp`]. Embedded NUL bytes are EINVAL.
pub fn cstring_argv(tokens: &[String]) -> Result<Vec<CString>> {
	tokens.iter().map(|t| to_cstring(t)).collect()
}

pub fn set_nonblocking(fd: RawFd) -> Result<()> {
	let flags = check_err(unsafe { libc::fcntl(fd, libc::F_GETFL) })?;
	check_err(unsafe { libc::fcntl(fd, libc::F_SETFL, flags | libc::O_NONBLOCK) })?;
	Ok(())
}

pub fn set_cloexec(fd: RawFd) -> Result<()> {
	let flags = check_err(unsafe { libc::fcntl(fd, libc::F_GETFD) })?;
	check_err(unsafe { libc::fcntl(fd, libc::F_SETFD, flags | libc::FD_CLOEXEC) })?;
	Ok(())
}

/// Open the write-only null sink used to discard fanned-out bytes.
pub fn open_dev_null() -> Result<RawFd> {
	check_err(unsafe {
		libc::open(
			b"/dev/null\0".as_ptr() as *const libc::c_char,
			libc::O_WRONLY | libc::O_NONBLOCK | libc::O_CLOEXEC,
		)
	})
}

/// Move up to `max` bytes from one pipe to another (or to `/dev/null`)
/// without a userspace copy, advancing both sides. Nonblocking.
pub fn splice(from: RawFd, to: RawFd, max: usize) -> Result<usize> {
	let n = check_err(unsafe {
		libc::splice(
			from,
			ptr::null_mut(),
			to,
			ptr::null_mut(),
			max,
			libc::SPLICE_F_NONBLOCK,
		)
	})?;
	Ok(n as usize)
}

/// Duplicate up to `max` bytes from one pipe into another without consuming
/// them from the source. Nonblocking.
pub fn tee(from: RawFd, to: RawFd, max: usize) -> Result<usize> {
	let n = check_err(unsafe { libc::tee(from, to, max, libc::SPLICE_F_NONBLOCK) })?;
	Ok(n as usize)
}

/// How a reaped child ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitStatus {
	Exited(i32),
	Signaled(i32),
	Other(i32),
}

fn decode_exit_status(status: libc::c_int) -> ExitStatus {
	if libc::WIFEXITED(status) {
		ExitStatus::Exited(libc::WEXITSTATUS(status))
	} else if libc::WIFSIGNALED(status) {
		ExitStatus::Signaled(libc::WTERMSIG(status))
	} else {
		ExitStatus::Other(status)
	}
}

/// Reap one terminated child, without blocking.
///
/// `Ok(None)` means children exist but none have terminated.
pub fn waitpid_any_nohang() -> Result<Option<(libc::pid_t, ExitStatus)>> {
	let mut status = 0 as libc::c_int;
	let pid = check_err(unsafe { libc::waitpid(-1, &mut status, libc::WNOHANG) })?;
	if pid == 0 {
		return Ok(None);
	}
	Ok(Some((pid, decode_exit_status(status))))
}

/// Wait for one specific child. Blocks.
pub fn waitpid(pid: libc::pid_t) -> Result<ExitStatus> {
	let mut status = 0 as libc::c_int;
	check_err(unsafe { libc::waitpid(pid, &mut status, 0) })?;
	Ok(decode_exit_status(status))
}

/// Undo the Rust runtime's SIGPIPE ignore and clear the signal mask.
///
/// Children must inherit the default disposition: the lifecycle protocol
/// counts a child killed by SIGPIPE as a clean termination, which only
/// happens if SIGPIPE actually kills it.
pub fn reset_sigpipe() -> Result<()> {
	unsafe {
		let mut set = std::mem::MaybeUninit::<libc::sigset_t>::uninit();
		check_err(libc::sigemptyset(set.as_mut_ptr()))?;
		check_err(libc::pthread_sigmask(
			libc::SIG_SETMASK,
			set.as_ptr(),
			ptr::null_mut(),
		))?;
		if libc::signal(libc::SIGPIPE, libc::SIG_DFL) == libc::SIG_ERR {
			return Err(Error::last_os_error());
		}
	}
	Ok(())
}

pub use libc::{POLLERR, POLLHUP, POLLIN, POLLOUT};

#[repr(transparent)]
pub struct PollFd(libc::pollfd);

impl PollFd {
	pub fn new(fd: RawFd, events: i16) -> PollFd {
		PollFd(libc::pollfd {
			fd,
			events,
			revents: 0,
		})
	}

	/// Did poll flag any of `mask` on this fd?
	pub fn ready(&self, mask: i16) -> bool {
		self.0.revents & mask != 0
	}
}

pub fn poll(fds: &mut [PollFd], timeout_ms: i32) -> Result<usize> {
	let cnt = check_err(unsafe {
		libc::poll(
			fds.as_mut_ptr() as *mut libc::pollfd,
			fds.len() as libc::nfds_t,
			timeout_ms,
		)
	})?;
	Ok(cnt as usize)
}
