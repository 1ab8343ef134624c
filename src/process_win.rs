//! Windows bits of child control. There is no graceful signal to send;
//! TerminateProcess (via std) is the only lever.

use std::process::{Child, ExitStatus};

pub fn terminate(child: &mut Child) {
    let _ = child.kill();
}

pub fn signal_of(_status: &ExitStatus) -> Option<i32> {
    None
}
