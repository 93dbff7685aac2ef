// Host storage primitives: a raw string key-value backend with a capacity quota.
// File-backed origins lock and rewrite the whole entry map per call, so a
// single get/set/remove is atomic across processes; sequences of calls are not.
use std::collections::BTreeMap;
use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use fs2::FileExt;
use libc::{EACCES, EPERM};

use crate::core::error::{Error, ErrorKind};

pub const DEFAULT_QUOTA_BYTES: usize = 5 * 1024 * 1024;

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct Quota {
    pub max_bytes: usize,
}

impl Quota {
    pub fn new(max_bytes: usize) -> Self {
        Self { max_bytes }
    }

    fn check(
        &self,
        entries: &BTreeMap<String, String>,
        key: &str,
        raw: &str,
    ) -> Result<(), Error> {
        let current = usage(entries);
        let replaced = entries
            .get(key)
            .map(|old| key.len() + old.len())
            .unwrap_or(0);
        let next = current - replaced + key.len() + raw.len();
        if next > self.max_bytes {
            return Err(Error::new(ErrorKind::QuotaExceeded)
                .with_message(format!(
                    "write needs {next} bytes, quota is {}",
                    self.max_bytes
                ))
                .with_key(key));
        }
        Ok(())
    }
}

impl Default for Quota {
    fn default() -> Self {
        Self::new(DEFAULT_QUOTA_BYTES)
    }
}

/// Bytes charged against the quota: every key plus its raw value.
pub fn usage(entries: &BTreeMap<String, String>) -> usize {
    entries.iter().map(|(key, raw)| key.len() + raw.len()).sum()
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum BackendKind {
    Memory,
    File,
}

/// The synchronous key-value primitive of one storage origin.
pub trait StorageBackend: Send {
    fn kind(&self) -> BackendKind;
    fn get(&self, key: &str) -> Result<Option<String>, Error>;
    fn set(&mut self, key: &str, raw: &str) -> Result<(), Error>;
    fn remove(&mut self, key: &str) -> Result<(), Error>;
    fn snapshot(&self) -> Result<BTreeMap<String, String>, Error>;
}

#[derive(Clone, Debug, Default)]
pub struct MemoryBackend {
    entries: BTreeMap<String, String>,
    quota: Quota,
}

impl MemoryBackend {
    pub fn new(quota: Quota) -> Self {
        Self {
            entries: BTreeMap::new(),
            quota,
        }
    }
}

impl StorageBackend for MemoryBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Memory
    }

    fn get(&self, key: &str) -> Result<Option<String>, Error> {
        Ok(self.entries.get(key).cloned())
    }

    fn set(&mut self, key: &str, raw: &str) -> Result<(), Error> {
        self.quota.check(&self.entries, key, raw)?;
        self.entries.insert(key.to_string(), raw.to_string());
        Ok(())
    }

    fn remove(&mut self, key: &str) -> Result<(), Error> {
        self.entries.remove(key);
        Ok(())
    }

    fn snapshot(&self) -> Result<BTreeMap<String, String>, Error> {
        Ok(self.entries.clone())
    }
}

/// One origin persisted as a JSON object file mapping keys to raw strings.
#[derive(Debug)]
pub struct FileBackend {
    path: PathBuf,
    lock_path: PathBuf,
    quota: Quota,
}

impl FileBackend {
    /// Open (creating if needed) the origin file at `path`.
    ///
    /// Any failure to prepare the file is reported as `Unavailable` so the
    /// adapter can substitute the in-memory fallback.
    pub fn open(path: impl AsRef<Path>, quota: Quota) -> Result<Self, Error> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent().filter(|parent| !parent.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(|err| unavailable(&path, err))?;
        }
        let mut lock_name = path.as_os_str().to_os_string();
        lock_name.push(".lock");
        let backend = Self {
            lock_path: PathBuf::from(lock_name),
            path,
            quota,
        };
        let _lock = backend.lock().map_err(|err| {
            Error::new(ErrorKind::Unavailable)
                .with_message("origin lock is not usable")
                .with_path(&backend.path)
                .with_source(err)
        })?;
        if !backend.path.exists() {
            backend.write_entries(&BTreeMap::new())?;
        }
        backend.read_entries()?;
        Ok(backend)
    }

    fn lock(&self) -> Result<OriginLock, Error> {
        let file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .read(true)
            .write(true)
            .open(&self.lock_path)
            .map_err(|err| {
                Error::new(ErrorKind::Io)
                    .with_path(&self.lock_path)
                    .with_source(err)
            })?;
        file.lock_exclusive().map_err(|err| {
            Error::new(lock_error_kind(&err))
                .with_message("failed to lock origin")
                .with_path(&self.lock_path)
                .with_source(err)
        })?;
        Ok(OriginLock { file })
    }

    fn read_entries(&self) -> Result<BTreeMap<String, String>, Error> {
        let text = match fs::read_to_string(&self.path) {
            Ok(text) => text,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(BTreeMap::new()),
            Err(err) => {
                return Err(Error::new(ErrorKind::Io)
                    .with_path(&self.path)
                    .with_source(err));
            }
        };
        if text.trim().is_empty() {
            return Ok(BTreeMap::new());
        }
        serde_json::from_str(&text).map_err(|err| {
            Error::new(ErrorKind::Decode)
                .with_message("origin file is not a key/value object")
                .with_path(&self.path)
                .with_source(err)
        })
    }

    fn write_entries(&self, entries: &BTreeMap<String, String>) -> Result<(), Error> {
        let mut tmp_name = self.path.as_os_str().to_os_string();
        tmp_name.push(".tmp");
        let tmp_path = PathBuf::from(tmp_name);
        let body = serde_json::to_vec(entries).map_err(|err| {
            Error::new(ErrorKind::Internal)
                .with_message("failed to encode origin entries")
                .with_source(err)
        })?;
        let mut file = File::create(&tmp_path)
            .map_err(|err| Error::new(ErrorKind::Io).with_path(&tmp_path).with_source(err))?;
        file.write_all(&body)
            .map_err(|err| Error::new(ErrorKind::Io).with_path(&tmp_path).with_source(err))?;
        file.sync_all()
            .map_err(|err| Error::new(ErrorKind::Io).with_path(&tmp_path).with_source(err))?;
        fs::rename(&tmp_path, &self.path)
            .map_err(|err| Error::new(ErrorKind::Io).with_path(&self.path).with_source(err))
    }
}

impl StorageBackend for FileBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::File
    }

    fn get(&self, key: &str) -> Result<Option<String>, Error> {
        let _lock = self.lock()?;
        Ok(self.read_entries()?.remove(key))
    }

    fn set(&mut self, key: &str, raw: &str) -> Result<(), Error> {
        let _lock = self.lock()?;
        let mut entries = self.read_entries()?;
        self.quota.check(&entries, key, raw)?;
        entries.insert(key.to_string(), raw.to_string());
        self.write_entries(&entries)
    }

    fn remove(&mut self, key: &str) -> Result<(), Error> {
        let _lock = self.lock()?;
        let mut entries = self.read_entries()?;
        if entries.remove(key).is_none() {
            return Ok(());
        }
        self.write_entries(&entries)
    }

    fn snapshot(&self) -> Result<BTreeMap<String, String>, Error> {
        let _lock = self.lock()?;
        self.read_entries()
    }
}

struct OriginLock {
    file: File,
}

impl Drop for OriginLock {
    fn drop(&mut self) {
        let _ = self.file.unlock();
    }
}

fn unavailable(path: &Path, err: io::Error) -> Error {
    Error::new(ErrorKind::Unavailable)
        .with_message("origin directory is not writable")
        .with_path(path)
        .with_source(err)
}

fn lock_error_kind(err: &io::Error) -> ErrorKind {
    let errno = err.raw_os_error().unwrap_or_default();
    if errno == EACCES || errno == EPERM {
        return ErrorKind::Unavailable;
    }
    match err.kind() {
        io::ErrorKind::PermissionDenied => ErrorKind::Unavailable,
        _ => ErrorKind::Io,
    }
}

#[cfg(test)]
mod tests {
    use super::{FileBackend, MemoryBackend, Quota, StorageBackend, lock_error_kind, usage};
    use crate::core::error::ErrorKind;

    #[test]
    fn memory_backend_set_get_remove() {
        let mut backend = MemoryBackend::new(Quota::default());
        assert_eq!(backend.get("k").expect("get"), None);
        backend.set("k", "1").expect("set");
        assert_eq!(backend.get("k").expect("get"), Some("1".to_string()));
        backend.remove("k").expect("remove");
        backend.remove("k").expect("remove again");
        assert_eq!(backend.get("k").expect("get"), None);
    }

    #[test]
    fn quota_failure_leaves_prior_value() {
        let mut backend = MemoryBackend::new(Quota::new(8));
        backend.set("k", "\"ab\"").expect("set");
        let err = backend.set("k", "\"abcdefgh\"").expect_err("quota");
        assert_eq!(err.kind(), ErrorKind::QuotaExceeded);
        assert_eq!(err.key(), Some("k"));
        assert_eq!(backend.get("k").expect("get"), Some("\"ab\"".to_string()));
    }

    #[test]
    fn quota_charges_replacement_not_sum() {
        let mut backend = MemoryBackend::new(Quota::new(6));
        backend.set("k", "12345").expect("fits");
        backend.set("k", "54321").expect("replacement fits");
        assert_eq!(usage(&backend.snapshot().expect("snapshot")), 6);
    }

    #[test]
    fn file_backend_persists_across_reopen() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("origins").join("app.json");
        let mut backend = FileBackend::open(&path, Quota::default()).expect("open");
        backend.set("session", "{\"user\":\"ana\"}").expect("set");
        backend.set("peers", "[]").expect("set");
        backend.remove("peers").expect("remove");

        let reopened = FileBackend::open(&path, Quota::default()).expect("reopen");
        assert_eq!(
            reopened.get("session").expect("get"),
            Some("{\"user\":\"ana\"}".to_string())
        );
        assert_eq!(reopened.get("peers").expect("get"), None);
        assert_eq!(reopened.snapshot().expect("snapshot").len(), 1);
    }

    #[test]
    fn file_backend_sees_writes_from_other_handles() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("app.json");
        let mut first = FileBackend::open(&path, Quota::default()).expect("open");
        let second = FileBackend::open(&path, Quota::default()).expect("open");
        first.set("k", "true").expect("set");
        assert_eq!(second.get("k").expect("get"), Some("true".to_string()));
    }

    #[test]
    fn file_backend_quota_is_enforced() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("app.json");
        let mut backend = FileBackend::open(&path, Quota::new(4)).expect("open");
        let err = backend.set("key", "12").expect_err("quota");
        assert_eq!(err.kind(), ErrorKind::QuotaExceeded);
        assert_eq!(backend.get("key").expect("get"), None);
    }

    #[test]
    fn unwritable_origin_is_unavailable() {
        let dir = tempfile::tempdir().expect("tempdir");
        let blocker = dir.path().join("blocker");
        std::fs::write(&blocker, b"file").expect("write");
        let err = FileBackend::open(blocker.join("app.json"), Quota::default()).expect_err("err");
        assert_eq!(err.kind(), ErrorKind::Unavailable);
    }

    #[test]
    fn lock_errors_map_to_expected_kinds() {
        let err = std::io::Error::from_raw_os_error(libc::EACCES);
        assert_eq!(lock_error_kind(&err), ErrorKind::Unavailable);

        let err = std::io::Error::from_raw_os_error(libc::EPERM);
        assert_eq!(lock_error_kind(&err), ErrorKind::Unavailable);

        let err = std::io::Error::from_raw_os_error(libc::EBADF);
        assert_eq!(lock_error_kind(&err), ErrorKind::Io);
    }
}
