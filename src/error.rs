//! Error taxonomy, split by the phase that can produce each failure.
//! Failures during execution are per-command values carried in the build
//! result rather than early returns.

use std::path::PathBuf;

/// Plan construction errors; nothing has executed when these surface.
#[derive(Debug, thiserror::Error)]
pub enum PlanError {
    #[error("dependency cycle: {}", .0.join(" -> "))]
    Cyclic(Vec<String>),
    #[error("output {path:?} declared by both {first:?} and {second:?}")]
    DuplicateOutput {
        path: String,
        first: String,
        second: String,
    },
    #[error("{command:?} declares {path:?} as both {roles}")]
    OverlappingPaths {
        command: String,
        path: String,
        roles: &'static str,
    },
    #[error("prepare {command:?}: {source}")]
    Prepare {
        command: String,
        #[source]
        source: PrepareError,
    },
}

/// Per-command failures during the prepare phase.
#[derive(Debug, thiserror::Error)]
pub enum PrepareError {
    #[error("program {0:?} not found")]
    ProgramNotFound(String),
    #[error("response file {path:?}: {source}")]
    ResponseFileIo {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Why a command that was dispatched did not succeed.
#[derive(Debug, thiserror::Error)]
pub enum FailReason {
    #[error("spawn failed: {0}")]
    Spawn(String),
    #[error("exited with code {0}")]
    NonZeroExit(i32),
    #[error("killed by signal {0}")]
    Signal(i32),
    #[error("timed out")]
    Timeout,
    #[error("declared output {0:?} missing after successful exit")]
    OutputMissing(PathBuf),
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
}

/// Why a command did not execute at all.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    /// Outputs exist and nothing it depends on changed.
    UpToDate,
    /// Something upstream failed, so its inputs cannot be trusted.
    UpstreamFailed,
    /// The build stopped (failure or cancellation) before it was dispatched.
    Drained,
}

impl std::fmt::Display for SkipReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            SkipReason::UpToDate => "up to date",
            SkipReason::UpstreamFailed => "skipped due to upstream failure",
            SkipReason::Drained => "not started",
        };
        f.write_str(s)
    }
}

/// Signature store I/O; best-effort, callers degrade to an empty store.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("not a signature store (bad magic)")]
    BadMagic,
    #[error("signature store schema {found} unsupported (expected {expected})")]
    VersionMismatch { found: u32, expected: u32 },
    #[error("truncated signature store")]
    Truncated,
    #[error(transparent)]
    Io(#[from] std::io::Error),
}
