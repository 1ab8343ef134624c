//! The outdatedness oracle: decides whether a command must run, given its
//! fingerprint and the signature store.
//!
//! The fingerprint comparison catches argument/environment/toolchain drift;
//! the mtime comparison catches source edits between runs without re-hashing
//! anything.

use crate::command::Command;
use crate::store::FileStore;
use std::io;
use std::path::PathBuf;

/// Why a command must run, or proof that it need not.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outdated {
    /// Declared always-run (or declares no outputs to check).
    AlwaysRuns,
    /// A declared output does not exist.
    MissingOutput(PathBuf),
    /// The stored fingerprint differs from the command's sealed one.
    FingerprintChanged,
    /// An input is newer than the oldest output (or has disappeared).
    InputChanged(PathBuf),
    UpToDate,
}

impl Outdated {
    pub fn must_run(&self) -> bool {
        *self != Outdated::UpToDate
    }
}

/// The decision procedure, in order: always-run, missing outputs, stored
/// fingerprint, then input-vs-output mtimes.
pub fn check(cmd: &Command, store: &FileStore) -> io::Result<Outdated> {
    if cmd.always_run || cmd.outputs.is_empty() {
        return Ok(Outdated::AlwaysRuns);
    }

    let mut oldest_output: Option<u64> = None;
    for out in &cmd.outputs {
        match store.probe(out)? {
            None => return Ok(Outdated::MissingOutput(out.clone())),
            Some(stamp) => {
                oldest_output =
                    Some(oldest_output.map_or(stamp.mtime_ns, |m| m.min(stamp.mtime_ns)));
            }
        }
    }
    let oldest_output = oldest_output.unwrap_or(0);

    let primary = cmd
        .primary_output_key()
        .expect("outputs checked non-empty above");
    if store.last_fingerprint_for(&primary) != Some(cmd.fingerprint()) {
        return Ok(Outdated::FingerprintChanged);
    }

    for input in &cmd.inputs {
        match store.probe(input)? {
            // An input that vanished counts as changed; the run will surface
            // the real problem.
            None => return Ok(Outdated::InputChanged(input.clone())),
            Some(stamp) if stamp.mtime_ns > oldest_output => {
                return Ok(Outdated::InputChanged(input.clone()));
            }
            Some(_) => {}
        }
    }

    Ok(Outdated::UpToDate)
}
