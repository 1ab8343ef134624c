//! POSIX bits of child control: graceful termination and signal decoding.

use std::os::unix::process::ExitStatusExt;
use std::process::{Child, ExitStatus};
use std::time::{Duration, Instant};

/// How long a child gets between SIGTERM and SIGKILL.
const TERM_GRACE: Duration = Duration::from_millis(500);

/// SIGTERM first so the child can clean up its outputs; SIGKILL if it
/// lingers past the grace period.
pub fn terminate(child: &mut Child) {
    let pid = child.id() as libc::pid_t;
    unsafe { libc::kill(pid, libc::SIGTERM) };
    let begin = Instant::now();
    while begin.elapsed() < TERM_GRACE {
        match child.try_wait() {
            Ok(Some(_)) => return,
            _ => std::thread::sleep(Duration::from_millis(10)),
        }
    }
    unsafe { libc::kill(pid, libc::SIGKILL) };
}

pub fn signal_of(status: &ExitStatus) -> Option<i32> {
    status.signal()
}
