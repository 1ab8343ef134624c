//! Command fingerprints.
//!
//! A single 64-bit hash over a command's externally observable attributes is
//! recorded per build and compared on the next run to detect drift in
//! arguments, environment, or the tool binary itself. The hasher is seeded
//! with fixed keys, so values are stable across processes.

use std::hash::Hasher;

/// Identifies one semantic configuration of a command; compared against the
/// stored value to decide whether the command is up to date.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash, PartialOrd, Ord)]
pub struct Fingerprint(pub u64);

impl std::fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:016x}", self.0)
    }
}

const UNIT_SEPARATOR: u8 = 0x1F;

/// Accumulates the canonical attribute tuple, with separators between fields
/// so adjacent strings cannot alias ("ab","c" vs "a","bc").
pub struct FingerprintBuilder(std::collections::hash_map::DefaultHasher);

impl Default for FingerprintBuilder {
    fn default() -> Self {
        FingerprintBuilder(std::collections::hash_map::DefaultHasher::new())
    }
}

impl FingerprintBuilder {
    pub fn write_str(&mut self, s: &str) {
        self.0.write(s.as_bytes());
        self.separator();
    }

    pub fn write_u64(&mut self, n: u64) {
        self.0.write_u64(n);
    }

    pub fn write_u8(&mut self, n: u8) {
        self.0.write_u8(n);
    }

    pub fn separator(&mut self) {
        self.0.write_u8(UNIT_SEPARATOR);
    }

    pub fn finish(self) -> Fingerprint {
        Fingerprint(self.0.finish())
    }
}
