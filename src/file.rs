//! Host-file registry: the set of files owned by one dataset.
//!
//! Files are created lazily from chunk-file specs, opened on demand, and
//! kept under a small open-stream cap with least-recently-used eviction.
//! Temporary files (used to break repositioning cycles) are allocated here
//! as well; they are flagged external so the allocator never places chunks
//! in them, and flagged temp so they are unlinked once destroyed.

use std::fs::{File, OpenOptions};
use std::sync::atomic::{AtomicU32, Ordering};

use crate::error::{fail, notify, MriError, Result};
use crate::types::{OpenMode, MAX_OPEN_FILES};

/// Handle to a registry entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FileId(pub(crate) usize);

static TMP_COUNTER: AtomicU32 = AtomicU32::new(0);

/// One host file.
#[derive(Debug)]
pub(crate) struct FileEntry {
    pub path: String,
    pub stream: Option<File>,
    pub writable: bool,
    /// LRU stamp; 0 means the file has never been opened.
    pub last_use: u64,
    /// Never repositioned or truncated by the engine.
    pub external: bool,
    /// Unlinked when destroyed (cycle-breaking scratch files).
    pub temp: bool,
    /// Scratch mark for the post-reposition sweep.
    pub used: bool,
}

/// Registry of the host files of one dataset.
pub(crate) struct FileRegistry {
    entries: Vec<Option<FileEntry>>,
    n_open: usize,
    access_counter: u64,
    /// Canonical dataset file name chunk-file specs resolve against.
    base: String,
    mode: OpenMode,
}

impl FileRegistry {
    pub fn new(base: String, mode: OpenMode) -> FileRegistry {
        FileRegistry { entries: Vec::new(), n_open: 0, access_counter: 1, base, mode }
    }

    /// Resolves `spec` against the dataset name and returns the matching
    /// entry, creating one on first sight.
    pub fn get_or_create(&mut self, spec: &str) -> FileId {
        let path = resolve_chunk_path(&self.base, spec);
        self.get_or_create_resolved(path)
    }

    fn get_or_create_resolved(&mut self, path: String) -> FileId {
        for (i, entry) in self.entries.iter().enumerate() {
            if let Some(e) = entry {
                if e.path == path {
                    return FileId(i);
                }
            }
        }
        self.entries.push(Some(FileEntry {
            path,
            stream: None,
            writable: false,
            last_use: 0,
            external: false,
            temp: false,
            used: true,
        }));
        FileId(self.entries.len() - 1)
    }

    /// Creates a fresh scratch file entry under `$MRI_TMP_DIR` (default
    /// `/tmp`), named by pid and a process-wide counter.
    pub fn create_temp(&mut self) -> Result<FileId> {
        let dir = std::env::var("MRI_TMP_DIR").unwrap_or_else(|_| "/tmp".to_string());
        let dir = if dir.starts_with('/') {
            dir
        } else {
            let cwd = std::env::current_dir()
                .map_err(|e| MriError::io("current directory", e))?;
            format!("{}/{}", cwd.display(), dir)
        };
        let n = TMP_COUNTER.fetch_add(1, Ordering::Relaxed);
        let path = format!("{}/mri{}.{}", dir, std::process::id(), n);
        let id = self.get_or_create_resolved(path);
        let entry = self.entry_mut(id);
        entry.external = true;
        entry.temp = true;
        Ok(id)
    }

    /// Live entry ids, in creation order.
    pub fn ids(&self) -> Vec<FileId> {
        self.entries
            .iter()
            .enumerate()
            .filter(|(_, e)| e.is_some())
            .map(|(i, _)| FileId(i))
            .collect()
    }

    pub fn entry(&self, id: FileId) -> &FileEntry {
        self.entries[id.0].as_ref().expect("file entry is live")
    }

    pub fn entry_mut(&mut self, id: FileId) -> &mut FileEntry {
        self.entries[id.0].as_mut().expect("file entry is live")
    }

    pub fn path(&self, id: FileId) -> &str {
        &self.entry(id).path
    }

    /// Open stream of an already-opened file.
    pub fn stream(&mut self, id: FileId) -> Result<&mut File> {
        match self.entries[id.0].as_mut().and_then(|e| e.stream.as_mut()) {
            Some(f) => Ok(f),
            None => fail(MriError::Internal("file stream is not open".into())),
        }
    }

    /// Bumps the LRU stamp of an open file.
    pub fn touch(&mut self, id: FileId) {
        let stamp = self.next_stamp();
        self.entry_mut(id).last_use = stamp;
    }

    fn next_stamp(&mut self) -> u64 {
        let s = self.access_counter;
        self.access_counter += 1;
        s
    }

    /// Opens (or re-opens, when promoting to read-write) the file. Returns
    /// the ids of any files whose streams were closed to make room; the
    /// caller must mark chunks hosted by those files not-ready.
    pub fn open(&mut self, id: FileId, for_write: bool) -> Result<Vec<FileId>> {
        if for_write && self.mode == OpenMode::Read {
            return fail(MriError::State(
                "attempt to write a file in a read-only dataset".into(),
            ));
        }

        let mut closed = Vec::new();

        if self.entry(id).stream.is_some() {
            if self.entry(id).writable || !for_write {
                self.touch(id);
                return Ok(closed);
            }
            // Open read-only but a writable stream is needed: re-open.
            notify(4, format!("re-opening {} for writing", self.path(id)));
            self.entry_mut(id).stream = None;
            self.n_open -= 1;
            closed.push(id);
        }

        if self.n_open >= MAX_OPEN_FILES {
            let lru = self
                .entries
                .iter()
                .enumerate()
                .filter_map(|(i, e)| e.as_ref().map(|e| (i, e)))
                .filter(|(_, e)| e.stream.is_some())
                .min_by_key(|(_, e)| e.last_use)
                .map(|(i, _)| FileId(i));
            match lru {
                Some(lru) => {
                    self.close(lru);
                    closed.push(lru);
                }
                None => return fail(MriError::Internal("open-file count out of sync".into())),
            }
        }

        let never_opened = self.entry(id).last_use == 0;
        let path = self.entry(id).path.clone();
        let stream = if !for_write {
            File::open(&path)
        } else if self.mode == OpenMode::Write && never_opened {
            // First open of a file in a fresh dataset starts it empty.
            OpenOptions::new()
                .read(true)
                .write(true)
                .create(true)
                .truncate(true)
                .open(&path)
        } else {
            OpenOptions::new()
                .read(true)
                .write(true)
                .open(&path)
                .or_else(|_| {
                    OpenOptions::new().read(true).write(true).create(true).open(&path)
                })
        };
        let stream = match stream {
            Ok(f) => f,
            Err(e) => return fail(MriError::io(path, e)),
        };

        let stamp = self.next_stamp();
        let entry = self.entry_mut(id);
        entry.stream = Some(stream);
        entry.writable = for_write;
        entry.last_use = stamp;
        self.n_open += 1;
        Ok(closed)
    }

    /// Closes the stream if open. Returns true if a stream was closed (the
    /// caller must then mark the file's chunks not-ready).
    pub fn close(&mut self, id: FileId) -> bool {
        let entry = self.entry_mut(id);
        if entry.stream.take().is_some() {
            self.n_open -= 1;
            true
        } else {
            false
        }
    }

    /// Closes, unlinks, and drops the entry.
    pub fn destroy(&mut self, id: FileId) {
        self.close(id);
        if let Some(entry) = self.entries[id.0].take() {
            notify(4, format!("unlinking {}", entry.path));
            let _ = std::fs::remove_file(&entry.path);
        }
    }

    /// Drops all streams (dataset teardown). Nothing is unlinked.
    pub fn close_all(&mut self) {
        for entry in self.entries.iter_mut().flatten() {
            if entry.stream.take().is_some() {
                self.n_open -= 1;
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Chunk-file name resolution
// ---------------------------------------------------------------------------

/// Resolves a chunk-file spec `spec` against the dataset file name `base`:
///
/// - empty → the dataset file itself;
/// - leading `.` → the dataset name with its extension replaced
///   (`scan.mri` + `.dat` → `scan.dat`);
/// - a bare name while the dataset path has a directory → that directory
///   plus the name;
/// - anything else verbatim.
pub(crate) fn resolve_chunk_path(base: &str, spec: &str) -> String {
    if spec.is_empty() {
        return base.to_string();
    }
    if spec.starts_with('.') {
        let stem = match base.rfind('.') {
            Some(dot) => &base[..dot],
            None => base,
        };
        return format!("{}{}", stem, spec);
    }
    if !spec.contains('/') {
        if let Some(slash) = base.rfind('/') {
            return format!("{}{}", &base[..slash + 1], spec);
        }
    }
    spec.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write as _;
    use tempfile::TempDir;

    #[test]
    fn chunk_path_resolution_rules() {
        assert_eq!(resolve_chunk_path("scan.mri", ""), "scan.mri");
        assert_eq!(resolve_chunk_path("scan.mri", ".dat"), "scan.dat");
        assert_eq!(resolve_chunk_path("data/scan.mri", ".1.dat"), "data/scan.1.dat");
        assert_eq!(resolve_chunk_path("data/scan.mri", "other.bin"), "data/other.bin");
        assert_eq!(resolve_chunk_path("scan.mri", "other.bin"), "other.bin");
        assert_eq!(resolve_chunk_path("data/scan.mri", "/abs/raw.bin"), "/abs/raw.bin");
    }

    #[test]
    fn same_spec_returns_same_entry() {
        let mut reg = FileRegistry::new("scan.mri".into(), OpenMode::Write);
        let a = reg.get_or_create(".dat");
        let b = reg.get_or_create(".dat");
        let c = reg.get_or_create("");
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(reg.path(a), "scan.dat");
    }

    #[test]
    fn lru_eviction_keeps_the_cap() {
        let dir = TempDir::new().unwrap();
        let base = format!("{}/t.mri", dir.path().display());
        let mut reg = FileRegistry::new(base, OpenMode::Write);
        let mut ids = Vec::new();
        for i in 0..MAX_OPEN_FILES + 2 {
            let id = reg.get_or_create(&format!(".{}.dat", i));
            reg.open(id, true).unwrap();
            ids.push(id);
        }
        let open_count = ids.iter().filter(|&&id| reg.entry(id).stream.is_some()).count();
        assert_eq!(open_count, MAX_OPEN_FILES);
        // The two oldest streams were the ones evicted.
        assert!(reg.entry(ids[0]).stream.is_none());
        assert!(reg.entry(ids[1]).stream.is_none());
    }

    #[test]
    fn write_mode_truncates_only_on_first_open() {
        let dir = TempDir::new().unwrap();
        let base = format!("{}/t.mri", dir.path().display());
        let mut reg = FileRegistry::new(base.clone(), OpenMode::Write);
        let id = reg.get_or_create("");
        reg.open(id, true).unwrap();
        reg.stream(id).unwrap().write_all(b"abcd").unwrap();
        reg.close(id);
        reg.open(id, true).unwrap();
        assert_eq!(std::fs::metadata(&base).unwrap().len(), 4);
    }

    #[test]
    fn temp_files_are_external_and_unlinked_on_destroy() {
        let dir = TempDir::new().unwrap();
        std::env::set_var("MRI_TMP_DIR", dir.path());
        let mut reg = FileRegistry::new("t.mri".into(), OpenMode::Write);
        let id = reg.create_temp().unwrap();
        assert!(reg.entry(id).external);
        assert!(reg.entry(id).temp);
        let path = reg.path(id).to_string();
        reg.open(id, true).unwrap();
        reg.stream(id).unwrap().write_all(b"x").unwrap();
        reg.destroy(id);
        assert!(!std::path::Path::new(&path).exists());
    }
}
