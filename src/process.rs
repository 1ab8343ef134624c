//! Child process execution: redirections, environment assembly, deadline
//! enforcement, and exit decoding. Knows nothing about the build graph.

use crate::error::FailReason;
use std::fs::File;
use std::io::Read;
use std::path::PathBuf;
use std::process::{Child, ExitStatus, Stdio};
use std::time::{Duration, Instant};

#[cfg(unix)]
use crate::process_posix as platform;
#[cfg(windows)]
use crate::process_win as platform;

/// Everything needed to spawn one child, owned so it can cross into a
/// runner thread.
pub struct ChildSpec {
    pub program: PathBuf,
    pub args: Vec<String>,
    pub env: Vec<(String, String)>,
    pub cwd: PathBuf,
    pub stdin: Option<PathBuf>,
    pub stdout: Option<PathBuf>,
    pub stderr: Option<PathBuf>,
    pub timeout: Option<Duration>,
}

#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub enum Termination {
    Success,
    Exit(i32),
    Signal(i32),
    Timeout,
}

pub struct ExecOutcome {
    pub termination: Termination,
    pub pid: Option<u32>,
    pub exit_code: Option<i32>,
    /// Captured only when the stream was not redirected to a file.
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
}

impl ExecOutcome {
    /// An outcome for work done in-process (no child involved).
    pub fn in_process() -> Self {
        ExecOutcome {
            termination: Termination::Success,
            pid: None,
            exit_code: None,
            stdout: Vec::new(),
            stderr: Vec::new(),
        }
    }
}

fn reader_thread(
    stream: Option<impl Read + Send + 'static>,
) -> Option<std::thread::JoinHandle<Vec<u8>>> {
    stream.map(|mut s| {
        std::thread::spawn(move || {
            let mut buf = Vec::new();
            let _ = s.read_to_end(&mut buf);
            buf
        })
    })
}

/// Spawns the child, pumps its unredirected streams, and waits, enforcing
/// the deadline if one is set. The child's environment is the inherited one
/// with the declared variables layered on top.
pub fn run_child(spec: &ChildSpec) -> Result<ExecOutcome, FailReason> {
    let mut cmd = std::process::Command::new(&spec.program);
    cmd.args(&spec.args).current_dir(&spec.cwd);
    for (k, v) in &spec.env {
        cmd.env(k, v);
    }

    cmd.stdin(match &spec.stdin {
        Some(path) => Stdio::from(File::open(path)?),
        None => Stdio::null(),
    });
    cmd.stdout(match &spec.stdout {
        Some(path) => Stdio::from(File::create(path)?),
        None => Stdio::piped(),
    });
    cmd.stderr(match &spec.stderr {
        Some(path) => Stdio::from(File::create(path)?),
        None => Stdio::piped(),
    });

    let mut child = cmd
        .spawn()
        .map_err(|err| FailReason::Spawn(format!("{}: {}", spec.program.display(), err)))?;
    let pid = child.id();

    let stdout_pump = reader_thread(child.stdout.take());
    let stderr_pump = reader_thread(child.stderr.take());

    let (status, timed_out) = wait_with_deadline(&mut child, spec.timeout)?;

    let join = |pump: Option<std::thread::JoinHandle<Vec<u8>>>| {
        pump.map(|t| t.join().unwrap_or_default()).unwrap_or_default()
    };
    let termination = if timed_out {
        Termination::Timeout
    } else {
        decode_status(status)
    };

    Ok(ExecOutcome {
        termination,
        pid: Some(pid),
        exit_code: status.code(),
        stdout: join(stdout_pump),
        stderr: join(stderr_pump),
    })
}

fn wait_with_deadline(
    child: &mut Child,
    timeout: Option<Duration>,
) -> Result<(ExitStatus, bool), FailReason> {
    let Some(limit) = timeout else {
        return Ok((child.wait()?, false));
    };
    let start = Instant::now();
    loop {
        if let Some(status) = child.try_wait()? {
            return Ok((status, false));
        }
        if start.elapsed() >= limit {
            platform::terminate(child);
            return Ok((child.wait()?, true));
        }
        std::thread::sleep(Duration::from_millis(10));
    }
}

fn decode_status(status: ExitStatus) -> Termination {
    if status.success() {
        return Termination::Success;
    }
    if let Some(sig) = platform::signal_of(&status) {
        return Termination::Signal(sig);
    }
    Termination::Exit(status.code().unwrap_or(-1))
}
