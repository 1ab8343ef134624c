//! Runs dispatched commands, potentially in parallel. Unaware of the build
//! graph, pools, or outdatedness; just task execution with a concurrency cap.

use crate::error::FailReason;
use crate::graph::CommandId;
use crate::process::{self, ChildSpec, ExecOutcome};
use std::path::PathBuf;
use std::sync::mpsc;
use std::time::Instant;

/// Work shipped to a runner thread.
pub enum Task {
    Child(ChildSpec),
    Copy { from: PathBuf, to: PathBuf },
}

pub struct FinishedTask {
    pub id: CommandId,
    pub span: (Instant, Instant),
    pub result: Result<ExecOutcome, FailReason>,
}

fn run_task(task: Task) -> Result<ExecOutcome, FailReason> {
    match task {
        Task::Child(spec) => process::run_child(&spec),
        Task::Copy { from, to } => {
            std::fs::copy(&from, &to)?;
            Ok(ExecOutcome::in_process())
        }
    }
}

/// Executes tasks on anonymous threads, at most `parallelism` in flight.
/// Results come back over a channel in completion order.
pub struct Runner {
    finished_send: mpsc::Sender<FinishedTask>,
    finished_recv: mpsc::Receiver<FinishedTask>,
    running: usize,
    parallelism: usize,
}

impl Runner {
    pub fn new(parallelism: usize) -> Self {
        let (tx, rx) = mpsc::channel();
        Runner {
            finished_send: tx,
            finished_recv: rx,
            running: 0,
            parallelism: parallelism.max(1),
        }
    }

    pub fn can_start_more(&self) -> bool {
        self.running < self.parallelism
    }

    pub fn is_running(&self) -> bool {
        self.running > 0
    }

    pub fn start(&mut self, id: CommandId, task: Task) {
        let tx = self.finished_send.clone();
        std::thread::spawn(move || {
            let start = Instant::now();
            let result = run_task(task);
            let finish = Instant::now();
            // The send only fails if the receiver is gone, i.e. shutdown.
            let _ = tx.send(FinishedTask {
                id,
                span: (start, finish),
                result,
            });
        });
        self.running += 1;
    }

    /// Waits for any task to complete. May block for a long time.
    pub fn wait(&mut self) -> FinishedTask {
        let task = self.finished_recv.recv().expect("runner channel closed");
        self.running -= 1;
        task
    }
}
