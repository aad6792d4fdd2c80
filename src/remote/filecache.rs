//! Local content cache for remote files.
//!
//! Remote opens are download-then-reopen: the whole object is written to a
//! backing file under the cache root, then handed back as an ordinary
//! file handle. Entries are keyed by `(scheme, path)`; a failed download
//! removes its partial entry.

use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::PathBuf;

use rustc_hash::FxHashMap;
use tracing::{debug, trace};

/// How a cached file is reopened.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum FileMode {
    Read,
    Write,
}

/// A cache entry still being filled. Either `reopen` promotes it to the
/// index or `remove` discards it.
pub struct CacheSlot {
    key: String,
    path: PathBuf,
    file: File,
}

/// Download cache keyed by `(scheme, path)`.
pub struct FileCache {
    root: PathBuf,
    index: FxHashMap<String, PathBuf>,
    next_id: u64,
}

impl FileCache {
    pub fn new(root: PathBuf) -> io::Result<Self> {
        fs::create_dir_all(&root)?;
        Ok(Self {
            root,
            index: FxHashMap::default(),
            next_id: 0,
        })
    }

    fn key(scheme: &str, path: &str) -> String {
        format!("{scheme}{path}")
    }

    /// Whether `(scheme, path)` currently has a finished entry.
    pub fn contains(&self, scheme: &str, path: &str) -> bool {
        self.index.contains_key(&Self::key(scheme, path))
    }

    /// Open a cached file. A miss returns `None`; opening for write
    /// invalidates any entry so the caller re-downloads.
    pub fn open(&mut self, scheme: &str, path: &str, mode: FileMode) -> Option<File> {
        let key = Self::key(scheme, path);
        if mode == FileMode::Write {
            if let Some(stale) = self.index.remove(&key) {
                let _ = fs::remove_file(stale);
            }
            return None;
        }
        let backing = self.index.get(&key)?;
        match File::open(backing) {
            Ok(file) => {
                trace!(key = %key, "cache hit");
                Some(file)
            }
            Err(_) => {
                self.index.remove(&key);
                None
            }
        }
    }

    /// Start a new entry for `(scheme, path)`, replacing any existing one.
    pub fn create(&mut self, scheme: &str, path: &str) -> io::Result<CacheSlot> {
        let key = Self::key(scheme, path);
        if let Some(stale) = self.index.remove(&key) {
            let _ = fs::remove_file(stale);
        }
        let backing = self.root.join(format!("fc{:08}", self.next_id));
        self.next_id += 1;
        let file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(&backing)?;
        debug!(key = %key, backing = %backing.display(), "cache entry created");
        Ok(CacheSlot {
            key,
            path: backing,
            file,
        })
    }

    /// Append a downloaded block to an in-progress entry.
    pub fn write(slot: &mut CacheSlot, data: &[u8]) -> io::Result<usize> {
        slot.file.write_all(data)?;
        Ok(data.len())
    }

    /// Discard an in-progress entry and its backing file.
    pub fn remove(&mut self, slot: CacheSlot) {
        debug!(key = %slot.key, "cache entry removed");
        drop(slot.file);
        let _ = fs::remove_file(slot.path);
    }

    /// Finish an entry: index it and hand back a handle in `mode`.
    pub fn reopen(&mut self, slot: CacheSlot, mode: FileMode) -> io::Result<File> {
        slot.file.sync_all()?;
        drop(slot.file);
        let file = match mode {
            FileMode::Read => File::open(&slot.path)?,
            FileMode::Write => OpenOptions::new().read(true).write(true).open(&slot.path)?,
        };
        self.index.insert(slot.key, slot.path);
        Ok(file)
    }
}
