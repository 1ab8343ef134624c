//! A command: one unit of externally observable work (a process to spawn, or
//! an in-process file copy) with declared inputs and outputs.
//!
//! Commands are built by the caller, mutated only during the prepare phase
//! (program resolution, path absolutization, response-file generation), and
//! sealed with a fingerprint before execution.

use crate::context::ExecContext;
use crate::error::PrepareError;
use crate::graph::{CommandId, PoolId};
use crate::hash::{Fingerprint, FingerprintBuilder};
use crate::norm;
use crate::smallmap::SmallMap;
use crate::store::FileStore;
use std::path::{Path, PathBuf};
use std::time::Instant;

/// Command lines longer than this get routed through a response file when
/// the policy allows it.
#[cfg(windows)]
pub const CMDLINE_LIMIT: usize = 8_000;
#[cfg(not(windows))]
pub const CMDLINE_LIMIT: usize = 32_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RspPolicy {
    #[default]
    Never,
    IfTooLong,
    Always,
}

/// How a command's failure affects its dependents. Used when an upstream may
/// legitimately not produce its outputs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MaybeUnused {
    /// Failure blocks dependents (the normal case).
    #[default]
    No,
    /// Failure does not block a dependent whose own declared inputs all
    /// exist on disk.
    IfInputsPresent,
    /// Failure never blocks dependents.
    Always,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CommandKind {
    /// Spawn the program; stdout goes to the console unless silenced or
    /// redirected.
    #[default]
    Spawn,
    /// Spawn the program and write its captured stdout to the sole output.
    Capture,
    /// Copy inputs[0] to outputs[0] without spawning anything.
    CopyFile,
}

#[derive(Debug, Clone, Default)]
pub struct Redirects {
    pub stdin: Option<PathBuf>,
    pub stdout: Option<PathBuf>,
    pub stderr: Option<PathBuf>,
}

/// Response file materialized during prepare, so the fingerprint covers its
/// contents and a stale file on disk can never go unnoticed.
#[derive(Debug, Clone)]
pub struct RspFile {
    pub path: PathBuf,
    pub content: String,
}

/// Observable runtime state, stamped by the executor.
#[derive(Debug, Clone, Default)]
pub struct RunState {
    pub executed: bool,
    pub t_begin: Option<Instant>,
    pub t_end: Option<Instant>,
    pub exit_code: Option<i32>,
    pub pid: Option<u32>,
}

pub struct Command {
    pub kind: CommandKind,
    pub program: PathBuf,
    pub args: Vec<String>,
    pub env: SmallMap<String, String>,
    pub cwd: PathBuf,
    pub inputs: Vec<PathBuf>,
    /// Byproducts: created during execution, cleaned afterwards, never
    /// tracked for outdatedness.
    pub intermediates: Vec<PathBuf>,
    pub outputs: Vec<PathBuf>,
    pub redirects: Redirects,
    pub rsp_policy: RspPolicy,
    /// Serialization barrier rank: everything with a lower rank completes
    /// before anything with a higher rank begins.
    pub strict_order: i32,
    pub pool: Option<PoolId>,
    pub always_run: bool,
    pub silent: bool,
    pub record_inputs_mtime: bool,
    pub remove_outputs_before_execution: bool,
    pub maybe_unused: MaybeUnused,
    pub deps: Vec<CommandId>,
    /// Short display name; derived from the first output when unset.
    pub desc: Option<String>,
    /// Extra directories searched before PATH when resolving a bare program
    /// name.
    pub extra_path_dirs: Vec<PathBuf>,

    pub state: RunState,
    resolved: Option<PathBuf>,
    rsp_file: Option<RspFile>,
    fingerprint: Option<Fingerprint>,
    prepared: bool,
}

impl Command {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Command {
            kind: CommandKind::default(),
            program: program.into(),
            args: Vec::new(),
            env: SmallMap::new(),
            cwd: PathBuf::from("."),
            inputs: Vec::new(),
            intermediates: Vec::new(),
            outputs: Vec::new(),
            redirects: Redirects::default(),
            rsp_policy: RspPolicy::default(),
            strict_order: 0,
            pool: None,
            always_run: false,
            silent: false,
            record_inputs_mtime: false,
            remove_outputs_before_execution: false,
            maybe_unused: MaybeUnused::default(),
            deps: Vec::new(),
            desc: None,
            extra_path_dirs: Vec::new(),
            state: RunState::default(),
            resolved: None,
            rsp_file: None,
            fingerprint: None,
            prepared: false,
        }
    }

    pub fn add_input(&mut self, path: impl Into<PathBuf>) {
        self.inputs.push(path.into());
    }

    pub fn add_output(&mut self, path: impl Into<PathBuf>) {
        self.outputs.push(path.into());
    }

    pub fn add_intermediate(&mut self, path: impl Into<PathBuf>) {
        self.intermediates.push(path.into());
    }

    pub fn depend_on(&mut self, id: CommandId) {
        self.deps.push(id);
    }

    pub fn prepared(&self) -> bool {
        self.prepared
    }

    /// The sealed fingerprint. Panics if called before prepare; the executor
    /// only ever sees prepared commands.
    pub fn fingerprint(&self) -> Fingerprint {
        self.fingerprint.expect("fingerprint queried before prepare")
    }

    pub fn resolved_program(&self) -> &Path {
        self.resolved.as_deref().expect("program resolved in prepare")
    }

    pub fn rsp_file(&self) -> Option<&RspFile> {
        self.rsp_file.as_ref()
    }

    /// Deterministic dispatch key: barrier rank first, fingerprint as the
    /// tie-break.
    pub fn ordering_rank(&self) -> (i32, u64) {
        (self.strict_order, self.fingerprint().0)
    }

    pub fn display_name(&self) -> String {
        if let Some(desc) = &self.desc {
            return desc.clone();
        }
        let named_after = self
            .outputs
            .first()
            .map(|p| p.as_path())
            .unwrap_or(self.program.as_path());
        named_after.file_name().map_or_else(
            || named_after.to_string_lossy().into_owned(),
            |n| n.to_string_lossy().into_owned(),
        )
    }

    /// Output path spellings used everywhere outputs are compared or hashed:
    /// normalized, then byte-sorted.
    pub fn normalized_outputs(&self) -> Vec<String> {
        let mut outs: Vec<String> = self.outputs.iter().map(|p| norm::key_for(p)).collect();
        outs.sort();
        outs
    }

    /// The store key carrying this command's fingerprint between runs.
    pub fn primary_output_key(&self) -> Option<PathBuf> {
        self.normalized_outputs().into_iter().next().map(PathBuf::from)
    }

    fn cmdline_len(&self) -> usize {
        self.program.as_os_str().len()
            + self.args.iter().map(|a| a.len() + 1).sum::<usize>()
    }

    pub fn needs_response_file(&self) -> bool {
        match self.rsp_policy {
            RspPolicy::Never => false,
            RspPolicy::Always => true,
            RspPolicy::IfTooLong => self.cmdline_len() > CMDLINE_LIMIT,
        }
    }

    /// The argument subset routed through the response file: everything but
    /// argv[0], one per line, quote-protected.
    pub fn response_file_contents(&self) -> String {
        let mut content = String::new();
        for arg in &self.args {
            content.push_str(&quote_arg(arg));
            content.push('\n');
        }
        content
    }

    fn response_file_path(&self) -> PathBuf {
        match self.outputs.first() {
            Some(out) => PathBuf::from(format!("{}.rsp", out.display())),
            None => self.cwd.join(format!("{}.rsp", self.display_name())),
        }
    }

    /// Arguments actually passed to the child: the declared args, or a
    /// single @file reference when a response file is in play.
    pub fn effective_args(&self) -> Vec<String> {
        match &self.rsp_file {
            Some(rsp) => vec![format!("@{}", rsp.path.display())],
            None => self.args.clone(),
        }
    }

    /// Resolves the program, absolutizes declared paths, creates parent
    /// directories, materializes the response file, and seals the
    /// fingerprint. Idempotent; the second call is a no-op.
    pub fn prepare(&mut self, ctx: &ExecContext, store: &FileStore) -> Result<(), PrepareError> {
        if self.prepared {
            return Ok(());
        }

        if self.cwd.is_relative() {
            self.cwd = ctx.cwd.join(&self.cwd);
        }
        self.absolutize_paths();

        // A command with no declared outputs has nothing to check against.
        if self.outputs.is_empty() {
            self.always_run = true;
        }

        let resolved = match self.kind {
            CommandKind::CopyFile => self.program.clone(),
            _ => resolve_program(&self.program, &self.cwd, ctx, &self.extra_path_dirs)
                .ok_or_else(|| {
                    PrepareError::ProgramNotFound(self.program.display().to_string())
                })?,
        };

        for path in self.outputs.iter().chain(self.intermediates.iter()) {
            create_parent_dirs(path)?;
        }
        for path in [&self.redirects.stdout, &self.redirects.stderr]
            .into_iter()
            .flatten()
        {
            create_parent_dirs(path)?;
        }

        if self.needs_response_file() {
            let path = self.response_file_path();
            let content = self.response_file_contents();
            create_parent_dirs(&path)
                .and_then(|()| std::fs::write(&path, &content).map_err(PrepareError::Io))
                .map_err(|err| match err {
                    PrepareError::Io(source) => PrepareError::ResponseFileIo {
                        path: path.clone(),
                        source,
                    },
                    other => other,
                })?;
            self.rsp_file = Some(RspFile { path, content });
        }

        let strong = match self.kind {
            CommandKind::CopyFile => 0,
            _ => store.get_strong(&resolved)?,
        };
        self.fingerprint = Some(self.compute_fingerprint(store, &resolved, strong)?);
        self.resolved = Some(resolved);
        self.prepared = true;
        Ok(())
    }

    fn absolutize_paths(&mut self) {
        let cwd = self.cwd.clone();
        let fix = |p: &mut PathBuf| {
            if p.is_relative() {
                *p = cwd.join(&*p);
            }
        };
        self.inputs.iter_mut().for_each(fix);
        self.intermediates.iter_mut().for_each(fix);
        self.outputs.iter_mut().for_each(fix);
        for slot in [
            &mut self.redirects.stdin,
            &mut self.redirects.stdout,
            &mut self.redirects.stderr,
        ] {
            if let Some(p) = slot {
                if p.is_relative() {
                    *p = cwd.join(&*p);
                }
            }
        }
    }

    fn compute_fingerprint(
        &self,
        store: &FileStore,
        resolved: &Path,
        program_strong: u64,
    ) -> Result<Fingerprint, PrepareError> {
        let mut b = FingerprintBuilder::default();
        b.write_str(&resolved.to_string_lossy());
        for arg in &self.args {
            b.write_str(arg);
        }
        b.separator();
        for (k, v) in self.env.sorted_entries() {
            b.write_str(k);
            b.write_str(v);
        }
        b.separator();
        b.write_str(&norm::key_for(&self.cwd));
        for out in self.normalized_outputs() {
            b.write_str(&out);
        }
        b.separator();
        for slot in [
            &self.redirects.stdin,
            &self.redirects.stdout,
            &self.redirects.stderr,
        ] {
            match slot {
                Some(p) => b.write_str(&norm::key_for(p)),
                None => b.write_u8(0),
            }
        }
        b.separator();
        b.write_u8(match self.rsp_policy {
            RspPolicy::Never => 0,
            RspPolicy::IfTooLong => 1,
            RspPolicy::Always => 2,
        });
        if self.record_inputs_mtime {
            let mut ins: Vec<&PathBuf> = self.inputs.iter().collect();
            ins.sort_by_key(|p| norm::key_for(p));
            for input in ins {
                b.write_str(&norm::key_for(input));
                let mtime_ns = store
                    .probe(input)?
                    .map(|stamp| stamp.mtime_ns)
                    .unwrap_or(0);
                b.write_u64(mtime_ns);
            }
        }
        b.separator();
        b.write_u64(program_strong);
        Ok(b.finish())
    }

    /// Removes byproducts after a successful run. Best-effort.
    pub fn clean(&self) {
        for path in &self.intermediates {
            let _ = std::fs::remove_file(path);
        }
        if let Some(rsp) = &self.rsp_file {
            let _ = std::fs::remove_file(&rsp.path);
        }
    }
}

fn create_parent_dirs(path: &Path) -> Result<(), PrepareError> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    Ok(())
}

/// Quote-protects a single response-file argument.
fn quote_arg(arg: &str) -> String {
    if !arg.is_empty() && !arg.chars().any(|c| c.is_whitespace() || c == '"') {
        return arg.to_string();
    }
    let mut quoted = String::with_capacity(arg.len() + 2);
    quoted.push('"');
    for c in arg.chars() {
        if c == '"' || c == '\\' {
            quoted.push('\\');
        }
        quoted.push(c);
    }
    quoted.push('"');
    quoted
}

fn resolve_program(
    program: &Path,
    cwd: &Path,
    ctx: &ExecContext,
    extra_dirs: &[PathBuf],
) -> Option<PathBuf> {
    if program.is_absolute() {
        return program.is_file().then(|| program.to_path_buf());
    }
    if program.components().count() > 1 {
        let candidate = cwd.join(program);
        return candidate.is_file().then_some(candidate);
    }
    for dir in extra_dirs.iter().chain(ctx.path_dirs.iter()) {
        let candidate = dir.join(program);
        if candidate.is_file() {
            return Some(candidate);
        }
        #[cfg(windows)]
        {
            let exe = candidate.with_extension("exe");
            if exe.is_file() {
                return Some(exe);
            }
        }
    }
    None
}
