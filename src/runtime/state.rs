// State stores
//
// Every piece of process-wide mutable state (lock files, the alias map, the
// resolution cache) goes through `StateStore`. The filesystem store relies on
// atomic create (hard link of a fully written temp file), atomic replace
// (rename) and a per-key `fs2` sidecar lock serializing mutations; the memory
// store backs unit tests.

use crate::errors::Result;
use fs2::FileExt;
use std::collections::BTreeMap;
use std::fs::{self, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

/// Callback used by [`StateStore::update`]: receives the current contents
/// (if any) and returns the replacement.
pub type UpdateFn<'a> = dyn FnMut(Option<&[u8]>) -> Result<Vec<u8>> + 'a;

/// Key/value persistence with the atomic primitives the runtime needs
pub trait StateStore: Send + Sync {
    /// Create `key` only if it does not exist. Returns `false` when it already
    /// exists. Readers never observe partially written contents.
    fn create_exclusive(&self, key: &str, contents: &[u8]) -> Result<bool>;

    fn read(&self, key: &str) -> Result<Option<Vec<u8>>>;

    /// Remove `key`. Returns `false` if it was already gone.
    fn remove(&self, key: &str) -> Result<bool>;

    /// Remove `key` only if its contents still equal `expected`.
    fn remove_if_unchanged(&self, key: &str, expected: &[u8]) -> Result<bool>;

    /// Read-modify-write `key` while excluding other writers.
    fn update(&self, key: &str, apply: &mut UpdateFn<'_>) -> Result<()>;

    /// All keys currently present, sorted
    fn keys(&self) -> Result<Vec<String>>;
}

/// Directory-backed store: one `<key>.json` file per key
pub struct FsStateStore {
    root: PathBuf,
}

static TEMP_COUNTER: AtomicU64 = AtomicU64::new(0);

impl FsStateStore {
    pub fn new(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        fs::create_dir_all(&root)?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn path_for(&self, key: &str) -> PathBuf {
        self.root.join(format!("{}.json", key))
    }

    /// Unique hidden sibling path (never listed by `keys`)
    fn scratch_path(&self, key: &str, tag: &str) -> PathBuf {
        let n = TEMP_COUNTER.fetch_add(1, Ordering::SeqCst);
        self.root
            .join(format!(".{}.{}.{}.{}", key, tag, std::process::id(), n))
    }

    /// Exclusive lock on the `.<key>.lock` sidecar, held until the file drops.
    /// Every mutation of `<key>.json` happens under it, so a compare-and-delete
    /// never races a create.
    fn lock_key(&self, key: &str) -> Result<fs::File> {
        let lock_file = OpenOptions::new()
            .create(true)
            .write(true)
            .open(self.root.join(format!(".{}.lock", key)))?;
        lock_file.lock_exclusive()?;
        Ok(lock_file)
    }

    fn write_scratch(&self, key: &str, contents: &[u8]) -> Result<PathBuf> {
        let tmp = self.scratch_path(key, "tmp");
        let mut file = OpenOptions::new().write(true).create_new(true).open(&tmp)?;
        file.write_all(contents)?;
        file.sync_all()?;
        Ok(tmp)
    }
}

impl StateStore for FsStateStore {
    fn create_exclusive(&self, key: &str, contents: &[u8]) -> Result<bool> {
        let tmp = self.write_scratch(key, contents)?;
        let _guard = self.lock_key(key)?;
        let outcome = match fs::hard_link(&tmp, self.path_for(key)) {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == ErrorKind::AlreadyExists => Ok(false),
            Err(e) => Err(e.into()),
        };
        let _ = fs::remove_file(&tmp);
        outcome
    }

    fn read(&self, key: &str) -> Result<Option<Vec<u8>>> {
        match fs::read(self.path_for(key)) {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn remove(&self, key: &str) -> Result<bool> {
        let _guard = self.lock_key(key)?;
        match fs::remove_file(self.path_for(key)) {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    fn remove_if_unchanged(&self, key: &str, expected: &[u8]) -> Result<bool> {
        let _guard = self.lock_key(key)?;
        match self.read(key)? {
            Some(current) if current == expected => {
                fs::remove_file(self.path_for(key))?;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    fn update(&self, key: &str, apply: &mut UpdateFn<'_>) -> Result<()> {
        // Blocks until other writers are done
        let _guard = self.lock_key(key)?;

        let current = self.read(key)?;
        let next = apply(current.as_deref())?;

        // Write atomically (write to temp, then rename)
        let tmp = self.write_scratch(key, &next)?;
        fs::rename(&tmp, self.path_for(key))?;
        Ok(())
    }

    fn keys(&self) -> Result<Vec<String>> {
        let mut keys = Vec::new();
        for entry in fs::read_dir(&self.root)? {
            let name = entry?.file_name();
            let Some(name) = name.to_str() else { continue };
            if name.starts_with('.') {
                continue;
            }
            if let Some(key) = name.strip_suffix(".json") {
                keys.push(key.to_string());
            }
        }
        keys.sort();
        Ok(keys)
    }
}

/// In-memory store for tests
#[derive(Default)]
pub struct MemoryStateStore {
    entries: Mutex<BTreeMap<String, Vec<u8>>>,
}

impl MemoryStateStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn entries(&self) -> std::sync::MutexGuard<'_, BTreeMap<String, Vec<u8>>> {
        // A panicking test thread must not wedge the others
        self.entries.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl StateStore for MemoryStateStore {
    fn create_exclusive(&self, key: &str, contents: &[u8]) -> Result<bool> {
        let mut entries = self.entries();
        if entries.contains_key(key) {
            return Ok(false);
        }
        entries.insert(key.to_string(), contents.to_vec());
        Ok(true)
    }

    fn read(&self, key: &str) -> Result<Option<Vec<u8>>> {
        Ok(self.entries().get(key).cloned())
    }

    fn remove(&self, key: &str) -> Result<bool> {
        Ok(self.entries().remove(key).is_some())
    }

    fn remove_if_unchanged(&self, key: &str, expected: &[u8]) -> Result<bool> {
        let mut entries = self.entries();
        match entries.get(key) {
            Some(current) if current.as_slice() == expected => {
                entries.remove(key);
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    fn update(&self, key: &str, apply: &mut UpdateFn<'_>) -> Result<()> {
        let mut entries = self.entries();
        let next = apply(entries.get(key).map(|v| v.as_slice()))?;
        entries.insert(key.to_string(), next);
        Ok(())
    }

    fn keys(&self) -> Result<Vec<String>> {
        Ok(self.entries().keys().cloned().collect())
    }
}
