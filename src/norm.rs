//! Lexical path normalization.
//!
//! Output paths are compared and hashed by name, so the same file reached via
//! "foo//bar", "foo/./bar" or "foo/baz/../bar" must collapse to one spelling.
//! Purely lexical: never touches the disk.

use std::path::Path;

/// Whether the platform's filesystems are case-insensitive by default.
#[cfg(any(windows, target_os = "macos"))]
const FOLD_CASE: bool = true;
#[cfg(not(any(windows, target_os = "macos")))]
const FOLD_CASE: bool = false;

fn is_sep(c: char) -> bool {
    c == '/' || c == '\\'
}

/// Removes "." components and folds ".." into their parent where possible.
/// "foo/./bar" => "foo/bar", "foo/baz/../bar" => "foo/bar".
pub fn normalize(path: &str) -> String {
    let absolute = path.chars().next().map(is_sep).unwrap_or(false);
    let mut parts: Vec<&str> = Vec::new();
    for part in path.split(is_sep) {
        match part {
            "" | "." => {}
            ".." => match parts.last() {
                Some(&last) if last != ".." => {
                    parts.pop();
                }
                _ if absolute => {}
                _ => parts.push(".."),
            },
            _ => parts.push(part),
        }
    }
    let mut out = String::with_capacity(path.len());
    if absolute {
        out.push('/');
    }
    out.push_str(&parts.join("/"));
    if out.is_empty() {
        out.push('.');
    }
    out
}

/// Normalized spelling used as a map key: lexically normalized, and
/// case-folded on platforms whose filesystems ignore case.
pub fn key_for(path: &Path) -> String {
    let norm = normalize(&path.to_string_lossy());
    if FOLD_CASE {
        norm.to_ascii_lowercase()
    } else {
        norm
    }
}
