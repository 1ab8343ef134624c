//! Support code for executor end-to-end tests.

mod basic;
mod cancel;
mod fingerprint;
mod pools;
mod strict_order;

use bx::command::Command;
use bx::context::ExecContext;
use bx::error::{FailReason, SkipReason};
use bx::graph::Plan;
use bx::progress::Progress;
use bx::store::FileStore;
use bx::work::{BuildResult, Options, StateCounts, Work};
use std::path::PathBuf;

/// Manages a temporary directory commands run inside.
pub struct TestSpace {
    dir: tempfile::TempDir,
}

impl TestSpace {
    pub fn new() -> anyhow::Result<Self> {
        Ok(TestSpace {
            dir: tempfile::tempdir()?,
        })
    }

    pub fn path(&self, name: &str) -> PathBuf {
        self.dir.path().join(name)
    }

    pub fn write(&self, name: &str, content: &str) -> std::io::Result<()> {
        std::fs::write(self.path(name), content)
    }

    pub fn read(&self, name: &str) -> std::io::Result<Vec<u8>> {
        std::fs::read(self.path(name))
    }

    pub fn exists(&self, name: &str) -> bool {
        self.path(name).exists()
    }

    pub fn ctx(&self) -> anyhow::Result<ExecContext> {
        ExecContext::rooted(self.dir.path())
    }
}

/// Implementation of Progress that prints nothing.
pub struct NoProgress;

impl Progress for NoProgress {
    fn update(&mut self, _counts: &StateCounts) {}
    fn task_started(&mut self, _cmd: &Command) {}
    fn task_finished(&mut self, _cmd: &Command, _stdout: &[u8]) {}
    fn task_skipped(&mut self, _cmd: &Command, _reason: SkipReason) {}
    fn failed(&mut self, _cmd: &Command, _reason: &FailReason, _stderr: &[u8]) {}
    fn log(&mut self, _msg: &str) {}
}

/// A command running `script` through the shell.
pub fn sh(space: &TestSpace, script: &str) -> Command {
    let mut cmd = Command::new("/bin/sh");
    cmd.args = vec!["-c".into(), script.into()];
    cmd.cwd = space.dir.path().to_path_buf();
    cmd
}

/// A command that writes `out` (and declares it).
pub fn touch(space: &TestSpace, out: &str) -> Command {
    let mut cmd = sh(space, &format!("touch {}", out));
    cmd.add_output(space.path(out));
    cmd
}

pub fn run(plan: &mut Plan, store: &FileStore) -> BuildResult {
    run_with(plan, store, Options::default())
}

pub fn run_with(plan: &mut Plan, store: &FileStore, options: Options) -> BuildResult {
    Work::new(plan, store, &mut NoProgress, options).run()
}
