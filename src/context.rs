//! Execution context: the process-level inputs the engine needs, passed in
//! explicitly rather than read from global state.

use std::path::PathBuf;

pub struct ExecContext {
    /// Directory command cwds are resolved against.
    pub cwd: PathBuf,
    /// Directories searched when a program is given as a bare name.
    pub path_dirs: Vec<PathBuf>,
    /// Hardware concurrency hint; seeds the executor's worker count via
    /// `Options::from_context`, and callers may override it per run.
    pub parallelism: usize,
}

impl ExecContext {
    pub fn from_env() -> anyhow::Result<ExecContext> {
        let cwd = std::env::current_dir()?;
        let path_dirs = match std::env::var_os("PATH") {
            Some(path) => std::env::split_paths(&path).collect(),
            None => Vec::new(),
        };
        let parallelism = std::thread::available_parallelism()
            .map(usize::from)
            .unwrap_or(1);
        Ok(ExecContext {
            cwd,
            path_dirs,
            parallelism,
        })
    }

    /// A context rooted at a specific directory, for callers that manage
    /// their own working tree.
    pub fn rooted(cwd: impl Into<PathBuf>) -> anyhow::Result<ExecContext> {
        let mut ctx = ExecContext::from_env()?;
        ctx.cwd = cwd.into();
        Ok(ctx)
    }
}
