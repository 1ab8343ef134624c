//! Build progress reporting, for display to the user.

use crate::command::Command;
use crate::error::{FailReason, SkipReason};
use crate::work::StateCounts;
use std::io::Write;

/// Trait for build progress notifications, driven by the executor.
pub trait Progress {
    /// Called as commands move between build states.
    fn update(&mut self, counts: &StateCounts);

    /// Called when a command is handed to the runner.
    fn task_started(&mut self, cmd: &Command);

    /// Called when a command succeeds; `stdout` holds its captured console
    /// output, if any.
    fn task_finished(&mut self, cmd: &Command, stdout: &[u8]);

    /// Called when a command is resolved without running.
    fn task_skipped(&mut self, cmd: &Command, reason: SkipReason);

    /// Called when a command fails, with its captured stderr.
    fn failed(&mut self, cmd: &Command, reason: &FailReason, stderr: &[u8]);

    /// A line of output outside the per-task flow (e.g. warnings).
    fn log(&mut self, msg: &str);
}

/// Plain console reporting: silent on success unless verbose, one stable
/// block per failure.
#[derive(Default)]
pub struct ConsoleProgress {
    verbose: bool,
}

impl ConsoleProgress {
    pub fn new(verbose: bool) -> Self {
        ConsoleProgress { verbose }
    }
}

impl Progress for ConsoleProgress {
    fn update(&mut self, _counts: &StateCounts) {}

    fn task_started(&mut self, cmd: &Command) {
        if self.verbose {
            println!(
                "{} {}",
                cmd.resolved_program().display(),
                cmd.effective_args().join(" ")
            );
        } else {
            println!("{}", cmd.display_name());
        }
    }

    fn task_finished(&mut self, cmd: &Command, stdout: &[u8]) {
        if !cmd.silent && !stdout.is_empty() {
            let _ = std::io::stdout().write_all(stdout);
        }
    }

    fn task_skipped(&mut self, cmd: &Command, reason: SkipReason) {
        if self.verbose {
            println!("{}: {}", cmd.display_name(), reason);
        }
    }

    fn failed(&mut self, cmd: &Command, reason: &FailReason, stderr: &[u8]) {
        println!(
            "failed: {} {}: {}",
            cmd.resolved_program().display(),
            cmd.effective_args().join(" "),
            reason
        );
        if !stderr.is_empty() {
            let _ = std::io::stdout().write_all(stderr);
            if !stderr.ends_with(b"\n") {
                println!();
            }
        }
    }

    fn log(&mut self, msg: &str) {
        println!("{}", msg);
    }
}
