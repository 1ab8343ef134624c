//! The file signature store: last observed (mtime, size, content hash) per
//! path, plus the fingerprint of the command that produced it. Persisted
//! across runs so a second build can skip unchanged work.
//!
//! Paths are keyed by their normalized spelling. The map is sharded: probes
//! for different paths contend only within a shard, and a given path's record
//! is only ever observed at-or-after its latest refresh within a run.

use crate::error::StoreError;
use crate::hash::Fingerprint;
use crate::norm;
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::fs::File;
use std::hash::Hasher;
use std::io::{self, BufReader, BufWriter, Read, Write};
use std::path::Path;
use std::sync::Mutex;
use std::time::UNIX_EPOCH;

const MAGIC: &[u8; 4] = b"bxdb";
const VERSION: u32 = 1;
const SHARDS: usize = 16;

/// Cheap stat-derived view of a file. Mtime is portable: nanoseconds since
/// the Unix epoch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Stamp {
    pub mtime_ns: u64,
    pub size: u64,
}

#[derive(Debug, Clone, Default)]
struct Entry {
    /// None means the path was observed absent.
    stamp: Option<Stamp>,
    /// Whether stamp reflects a stat made during this run, as opposed to one
    /// loaded from disk.
    probed: bool,
    strong: Option<u64>,
    last_fp: Option<Fingerprint>,
}

pub struct FileStore {
    shards: Vec<Mutex<HashMap<String, Entry>>>,
}

impl Default for FileStore {
    fn default() -> Self {
        FileStore::new()
    }
}

fn stat(path: &Path) -> io::Result<Option<Stamp>> {
    match std::fs::metadata(path) {
        Ok(meta) => {
            let mtime_ns = meta
                .modified()?
                .duration_since(UNIX_EPOCH)
                .map(|d| d.as_nanos() as u64)
                .unwrap_or(0);
            Ok(Some(Stamp {
                mtime_ns,
                size: meta.len(),
            }))
        }
        Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(None),
        Err(err) => Err(err),
    }
}

fn hash_file(path: &Path) -> io::Result<u64> {
    let mut f = File::open(path)?;
    let mut hasher = Sha256::new();
    io::copy(&mut f, &mut hasher)?;
    let digest = hasher.finalize();
    Ok(u64::from_le_bytes(digest[..8].try_into().unwrap()))
}

impl FileStore {
    pub fn new() -> Self {
        FileStore {
            shards: (0..SHARDS).map(|_| Mutex::new(HashMap::new())).collect(),
        }
    }

    fn shard(&self, key: &str) -> &Mutex<HashMap<String, Entry>> {
        let mut h = std::collections::hash_map::DefaultHasher::new();
        h.write(key.as_bytes());
        &self.shards[h.finish() as usize % SHARDS]
    }

    /// Stat-only view of a path, memoized for the run. Returns None for a
    /// path observed absent.
    pub fn probe(&self, path: &Path) -> io::Result<Option<Stamp>> {
        let key = norm::key_for(path);
        let mut map = self.shard(&key).lock().unwrap();
        let entry = map.entry(key).or_default();
        if entry.probed {
            return Ok(entry.stamp);
        }
        let stamp = stat(path)?;
        if stamp != entry.stamp {
            // The file changed since the stored record; any content hash
            // carried over from a previous run no longer applies.
            entry.strong = None;
        }
        entry.stamp = stamp;
        entry.probed = true;
        Ok(stamp)
    }

    /// Content hash of a path, computed on demand and memoized until the
    /// next refresh.
    pub fn get_strong(&self, path: &Path) -> io::Result<u64> {
        self.probe(path)?;
        let key = norm::key_for(path);
        let mut map = self.shard(&key).lock().unwrap();
        let entry = map.entry(key).or_default();
        if let Some(h) = entry.strong {
            return Ok(h);
        }
        let h = hash_file(path)?;
        entry.strong = Some(h);
        Ok(h)
    }

    /// Re-stats a path after it has been written. Later probes observe the
    /// refreshed record, never the pre-refresh one.
    pub fn refresh(&self, path: &Path) -> io::Result<Option<Stamp>> {
        let stamp = stat(path)?;
        let key = norm::key_for(path);
        let mut map = self.shard(&key).lock().unwrap();
        let entry = map.entry(key).or_default();
        entry.stamp = stamp;
        entry.probed = true;
        entry.strong = None;
        Ok(stamp)
    }

    pub fn last_fingerprint_for(&self, path: &Path) -> Option<Fingerprint> {
        let key = norm::key_for(path);
        let map = self.shard(&key).lock().unwrap();
        map.get(&key).and_then(|e| e.last_fp)
    }

    pub fn set_fingerprint(&self, path: &Path, fp: Fingerprint) {
        let key = norm::key_for(path);
        let mut map = self.shard(&key).lock().unwrap();
        map.entry(key).or_default().last_fp = Some(fp);
    }

    /// Serializes every present-file record, sorted by path for a stable
    /// byte layout.
    pub fn save(&self, path: &Path) -> Result<(), StoreError> {
        let mut records: Vec<(String, Entry)> = Vec::new();
        for shard in &self.shards {
            let map = shard.lock().unwrap();
            for (key, entry) in map.iter() {
                if entry.stamp.is_some() {
                    records.push((key.clone(), entry.clone()));
                }
            }
        }
        records.sort_by(|a, b| a.0.cmp(&b.0));

        let mut w = BufWriter::new(File::create(path)?);
        w.write_all(MAGIC)?;
        w.write_all(&VERSION.to_le_bytes())?;
        for (key, entry) in records {
            let stamp = entry.stamp.unwrap();
            w.write_all(&(key.len() as u32).to_le_bytes())?;
            w.write_all(key.as_bytes())?;
            w.write_all(&stamp.mtime_ns.to_le_bytes())?;
            w.write_all(&stamp.size.to_le_bytes())?;
            write_opt_u64(&mut w, entry.strong)?;
            write_opt_u64(&mut w, entry.last_fp.map(|fp| fp.0))?;
        }
        w.flush()?;
        Ok(())
    }

    pub fn load(path: &Path) -> Result<FileStore, StoreError> {
        let mut r = BufReader::new(File::open(path)?);
        let mut magic = [0u8; 4];
        r.read_exact(&mut magic)?;
        if magic != *MAGIC {
            return Err(StoreError::BadMagic);
        }
        let version = read_u32(&mut r)?;
        if version != VERSION {
            return Err(StoreError::VersionMismatch {
                found: version,
                expected: VERSION,
            });
        }

        let store = FileStore::new();
        loop {
            let mut len_buf = [0u8; 4];
            match r.read_exact(&mut len_buf) {
                Ok(()) => {}
                Err(err) if err.kind() == io::ErrorKind::UnexpectedEof => break,
                Err(err) => return Err(err.into()),
            }
            let len = u32::from_le_bytes(len_buf) as usize;
            let mut name = vec![0u8; len];
            read_record_part(&mut r, &mut name)?;
            let key = String::from_utf8_lossy(&name).into_owned();
            let mtime_ns = read_u64(&mut r)?;
            let size = read_u64(&mut r)?;
            let strong = read_opt_u64(&mut r)?;
            let last_fp = read_opt_u64(&mut r)?.map(Fingerprint);
            let mut map = store.shard(&key).lock().unwrap();
            map.insert(
                key,
                Entry {
                    stamp: Some(Stamp { mtime_ns, size }),
                    probed: false,
                    strong,
                    last_fp,
                },
            );
        }
        Ok(store)
    }

    /// Loads a store if one exists, falling back to an empty store on any
    /// failure. The error, if any, is returned for the caller to report.
    pub fn open_best_effort(path: &Path) -> (FileStore, Option<StoreError>) {
        match FileStore::load(path) {
            Ok(store) => (store, None),
            Err(StoreError::Io(err)) if err.kind() == io::ErrorKind::NotFound => {
                (FileStore::new(), None)
            }
            Err(err) => (FileStore::new(), Some(err)),
        }
    }
}

fn write_opt_u64(w: &mut impl Write, val: Option<u64>) -> io::Result<()> {
    match val {
        Some(n) => {
            w.write_all(&[1])?;
            w.write_all(&n.to_le_bytes())
        }
        None => w.write_all(&[0]),
    }
}

fn read_record_part(r: &mut impl Read, buf: &mut [u8]) -> Result<(), StoreError> {
    r.read_exact(buf).map_err(|err| {
        if err.kind() == io::ErrorKind::UnexpectedEof {
            StoreError::Truncated
        } else {
            StoreError::Io(err)
        }
    })
}

fn read_u32(r: &mut impl Read) -> Result<u32, StoreError> {
    let mut buf = [0u8; 4];
    read_record_part(r, &mut buf)?;
    Ok(u32::from_le_bytes(buf))
}

fn read_u64(r: &mut impl Read) -> Result<u64, StoreError> {
    let mut buf = [0u8; 8];
    read_record_part(r, &mut buf)?;
    Ok(u64::from_le_bytes(buf))
}

fn read_opt_u64(r: &mut impl Read) -> Result<Option<u64>, StoreError> {
    let mut tag = [0u8; 1];
    read_record_part(r, &mut tag)?;
    match tag[0] {
        0 => Ok(None),
        _ => Ok(Some(read_u64(r)?)),
    }
}
