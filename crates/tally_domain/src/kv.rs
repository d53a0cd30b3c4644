use std::collections::HashMap;
use std::fs;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use notify::{EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use parking_lot::RwLock;

use crate::error::StoreError;

/// Byte-valued storage addressed by string keys.
///
/// Each `set` replaces its key atomically. Nothing spans multiple keys: a
/// reader racing two writes may see one updated and the other stale.
pub trait KeyValueStore: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError>;
    fn set(&self, key: &str, value: &[u8]) -> Result<(), StoreError>;
    fn remove(&self, key: &str) -> Result<(), StoreError>;
}

/// Process-local store. Nothing written here is visible to other processes.
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: RwLock<HashMap<String, Vec<u8>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl KeyValueStore for MemoryStore {
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError> {
        Ok(self.entries.read().get(key).cloned())
    }

    fn set(&self, key: &str, value: &[u8]) -> Result<(), StoreError> {
        self.entries.write().insert(key.to_string(), value.to_vec());
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<(), StoreError> {
        self.entries.write().remove(key);
        Ok(())
    }
}

/// One file per key inside a directory, shared by every process that opens it.
#[derive(Debug, Clone)]
pub struct DirectoryStore {
    root: PathBuf,
}

impl DirectoryStore {
    pub fn open(root: impl AsRef<Path>) -> Result<Self, StoreError> {
        let root = root.as_ref().to_path_buf();
        fs::create_dir_all(&root).map_err(|source| StoreError::Unavailable {
            path: root.clone(),
            source,
        })?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn path_for(&self, key: &str) -> PathBuf {
        self.root.join(file_name_for(key))
    }

    /// Invoke `on_change` with the key name whenever another writer replaces
    /// or removes a key. The watch stops when the returned handle is dropped.
    pub fn watch<F>(&self, on_change: F) -> Result<KeyWatcher, StoreError>
    where
        F: Fn(&str) + Send + 'static,
    {
        let mut watcher = notify::recommended_watcher(move |res: notify::Result<notify::Event>| {
            let event = match res {
                Ok(event) => event,
                Err(err) => {
                    tracing::warn!(%err, "shared area watch error");
                    return;
                }
            };
            if !matches!(
                event.kind,
                EventKind::Create(_) | EventKind::Modify(_) | EventKind::Remove(_)
            ) {
                return;
            }
            for path in &event.paths {
                let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
                    continue;
                };
                if is_temp_file(name) {
                    continue;
                }
                tracing::debug!(key = name, kind = ?event.kind, "shared key changed");
                on_change(name);
            }
        })?;
        watcher.watch(&self.root, RecursiveMode::NonRecursive)?;
        Ok(KeyWatcher { _inner: watcher })
    }
}

impl KeyValueStore for DirectoryStore {
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError> {
        match fs::read(self.path_for(key)) {
            Ok(bytes) => Ok(Some(bytes)),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(None),
            Err(source) => Err(StoreError::Io {
                key: key.to_string(),
                source,
            }),
        }
    }

    fn set(&self, key: &str, value: &[u8]) -> Result<(), StoreError> {
        let name = file_name_for(key);
        let io_err = |source: std::io::Error| StoreError::Io {
            key: key.to_string(),
            source,
        };
        // Unique per write, so concurrent writers never share a temp file.
        let mut temp = tempfile::Builder::new()
            .prefix(&format!(".{name}{TEMP_MARKER}"))
            .tempfile_in(&self.root)
            .map_err(io_err)?;
        temp.write_all(value).map_err(io_err)?;
        temp.as_file().sync_all().map_err(io_err)?;
        temp.persist(self.root.join(&name))
            .map_err(|err| io_err(err.error))?;
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<(), StoreError> {
        match fs::remove_file(self.path_for(key)) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(()),
            Err(source) => Err(StoreError::Io {
                key: key.to_string(),
                source,
            }),
        }
    }
}

/// Keeps a [`DirectoryStore::watch`] subscription alive.
pub struct KeyWatcher {
    _inner: RecommendedWatcher,
}

/// Handle to the shared namespace, or to its process-local stand-in.
#[derive(Clone)]
pub struct SharedArea {
    store: Arc<dyn KeyValueStore>,
    directory: Option<DirectoryStore>,
}

impl SharedArea {
    /// Open the shared directory. When it can't be prepared the area degrades
    /// to an in-memory store: the app keeps working, the widget stops syncing.
    pub fn open(root: impl AsRef<Path>) -> Self {
        match DirectoryStore::open(root) {
            Ok(directory) => Self {
                store: Arc::new(directory.clone()),
                directory: Some(directory),
            },
            Err(err) => {
                tracing::warn!(%err, "shared area unavailable, using process-local store");
                Self::local()
            }
        }
    }

    pub fn local() -> Self {
        Self {
            store: Arc::new(MemoryStore::new()),
            directory: None,
        }
    }

    pub fn from_store(store: Arc<dyn KeyValueStore>) -> Self {
        Self {
            store,
            directory: None,
        }
    }

    pub fn is_shared(&self) -> bool {
        self.directory.is_some()
    }

    pub fn store(&self) -> Arc<dyn KeyValueStore> {
        Arc::clone(&self.store)
    }

    pub fn directory(&self) -> Option<&DirectoryStore> {
        self.directory.as_ref()
    }
}

fn file_name_for(key: &str) -> String {
    key.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_') {
                c
            } else {
                '_'
            }
        })
        .collect()
}

const TEMP_MARKER: &str = ".tmp-";

fn is_temp_file(name: &str) -> bool {
    name.starts_with('.') && name.contains(TEMP_MARKER)
}

#[cfg(test)]
mod tests {
    use std::sync::mpsc;
    use std::thread;
    use std::time::Duration;

    use super::*;
    use crate::store::HABITS_KEY;
    use tempfile::tempdir;

    #[test]
    fn directory_store_replaces_and_removes_keys() {
        let temp = tempdir().unwrap();
        let store = DirectoryStore::open(temp.path().join("shared")).unwrap();

        assert_eq!(store.get("tally.habits.v2").unwrap(), None);
        store.set("tally.habits.v2", b"[1]").unwrap();
        store.set("tally.habits.v2", b"[1,2]").unwrap();
        assert_eq!(store.get("tally.habits.v2").unwrap(), Some(b"[1,2]".to_vec()));

        store.remove("tally.habits.v2").unwrap();
        store.remove("tally.habits.v2").unwrap();
        assert_eq!(store.get("tally.habits.v2").unwrap(), None);
    }

    #[test]
    fn directory_store_leaves_no_temp_files() {
        let temp = tempdir().unwrap();
        let store = DirectoryStore::open(temp.path()).unwrap();
        store.set("a/b", b"x").unwrap();
        let names: Vec<String> = fs::read_dir(temp.path())
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, vec!["a_b".to_string()]);
    }

    #[test]
    fn concurrent_writers_to_one_key_do_not_collide() {
        let temp = tempdir().unwrap();
        let store = Arc::new(DirectoryStore::open(temp.path()).unwrap());
        let writers: Vec<_> = (0..8u8)
            .map(|n| {
                let store = Arc::clone(&store);
                thread::spawn(move || {
                    for _ in 0..20 {
                        store.set("tally.habits.v2", &[n; 64]).unwrap();
                    }
                })
            })
            .collect();
        for writer in writers {
            writer.join().unwrap();
        }

        let value = store.get("tally.habits.v2").unwrap().unwrap();
        assert_eq!(value.len(), 64);
        assert!(value.iter().all(|b| *b == value[0]));
        let leftovers = fs::read_dir(temp.path())
            .unwrap()
            .filter(|e| is_temp_file(&e.as_ref().unwrap().file_name().to_string_lossy()))
            .count();
        assert_eq!(leftovers, 0);
    }

    #[test]
    fn watch_reports_keys_written_by_another_store() {
        let temp = tempdir().unwrap();
        let watched = DirectoryStore::open(temp.path()).unwrap();
        let writer = DirectoryStore::open(temp.path()).unwrap();

        let (tx, rx) = mpsc::channel::<String>();
        let _watcher = watched
            .watch(move |key| {
                let _ = tx.send(key.to_string());
            })
            .unwrap();

        writer.set(HABITS_KEY, b"[]").unwrap();

        let mut seen = Vec::new();
        loop {
            match rx.recv_timeout(Duration::from_secs(5)) {
                Ok(key) if key == HABITS_KEY => break,
                Ok(key) => seen.push(key),
                Err(err) => panic!("no change event for {HABITS_KEY}: {err}; saw {seen:?}"),
            }
        }
        assert!(seen.iter().all(|key| !is_temp_file(key)), "temp files leaked: {seen:?}");
    }

    #[test]
    fn temp_file_names_are_recognised() {
        assert!(is_temp_file(".tally.habits.v2.tmp-Ab12Cd"));
        assert!(!is_temp_file("tally.habits.v2"));
        assert!(!is_temp_file(".hidden"));
    }

    #[test]
    fn shared_area_falls_back_when_directory_cannot_be_created() {
        let temp = tempdir().unwrap();
        let blocker = temp.path().join("file");
        fs::write(&blocker, b"not a dir").unwrap();

        let area = SharedArea::open(blocker.join("shared"));
        assert!(!area.is_shared());
        area.store().set("k", b"v").unwrap();
        assert_eq!(area.store().get("k").unwrap(), Some(b"v".to_vec()));
    }
}
