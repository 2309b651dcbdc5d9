use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use serde::{de::DeserializeOwned, Deserialize, Serialize};

use crate::{error::StoreError, notifications::NotificationId, task::Task};

pub const TASKS_KEY: &str = "tasks";
pub const BINDINGS_KEY: &str = "scheduledAlarms";
pub const ALARM_METADATA_KEY: &str = "alarms";

/// Opaque string key-value storage. Values are whole JSON documents.
pub trait KeyValueStore: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<String>, StoreError>;
    fn set(&self, key: &str, value: &str) -> Result<(), StoreError>;
    fn remove(&self, key: &str) -> Result<(), StoreError>;
}

#[derive(Debug, Default)]
pub struct MemoryStore {
    values: RwLock<HashMap<String, String>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl KeyValueStore for MemoryStore {
    fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        Ok(self.values.read().get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> Result<(), StoreError> {
        self.values.write().insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<(), StoreError> {
        self.values.write().remove(key);
        Ok(())
    }
}

/// Stores each key as `<root>/<key>.json`.
#[derive(Debug, Clone)]
pub struct FileStore {
    root: PathBuf,
}

impl FileStore {
    pub fn open(root: impl AsRef<Path>) -> Result<Self, StoreError> {
        let root = root.as_ref().to_path_buf();
        fs::create_dir_all(&root).map_err(|source| StoreError::Io {
            key: root.display().to_string(),
            source,
        })?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn path_for(&self, key: &str) -> PathBuf {
        self.root.join(format!("{key}.json"))
    }
}

impl KeyValueStore for FileStore {
    fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        match fs::read_to_string(self.path_for(key)) {
            Ok(contents) => Ok(Some(contents)),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(source) => Err(StoreError::Io {
                key: key.to_string(),
                source,
            }),
        }
    }

    fn set(&self, key: &str, value: &str) -> Result<(), StoreError> {
        let target = self.path_for(key);
        let staging = self.root.join(format!(".{key}.json.tmp"));
        let io_err = |source| StoreError::Io {
            key: key.to_string(),
            source,
        };
        fs::write(&staging, value).map_err(io_err)?;
        fs::rename(&staging, &target).map_err(io_err)
    }

    fn remove(&self, key: &str) -> Result<(), StoreError> {
        match fs::remove_file(self.path_for(key)) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(source) => Err(StoreError::Io {
                key: key.to_string(),
                source,
            }),
        }
    }
}

/// What the scheduler recorded when it armed a trigger.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct AlarmMetadata {
    pub notification_id: NotificationId,
    pub fire_at: DateTime<Utc>,
    pub armed_at: DateTime<Utc>,
}

/// Typed access to the task list, the task→notification bindings and the
/// alarm metadata map.
///
/// Every mutation is a whole-value read-modify-write. Mutations are
/// serialized through one writer lock, so callers in the same process never
/// overwrite each other's changes.
pub struct TaskStore {
    backend: Box<dyn KeyValueStore>,
    writer: Mutex<()>,
}

impl TaskStore {
    pub fn new(backend: Box<dyn KeyValueStore>) -> Self {
        Self {
            backend,
            writer: Mutex::new(()),
        }
    }

    pub fn in_memory() -> Self {
        Self::new(Box::new(MemoryStore::new()))
    }

    /// `None` when no task list was ever written.
    pub fn load_tasks_raw(&self) -> Result<Option<Vec<Task>>, StoreError> {
        self.read_json(TASKS_KEY)
    }

    pub fn load_tasks(&self) -> Result<Vec<Task>, StoreError> {
        Ok(self.load_tasks_raw()?.unwrap_or_default())
    }

    pub fn task(&self, task_id: &str) -> Result<Option<Task>, StoreError> {
        Ok(self
            .load_tasks()?
            .into_iter()
            .find(|task| task.id == task_id))
    }

    pub fn save_tasks(&self, tasks: &[Task]) -> Result<(), StoreError> {
        let _guard = self.writer.lock();
        self.write_json(TASKS_KEY, &tasks)
    }

    /// Applies `apply` to the stored task list and writes the result back.
    pub fn update_tasks<T>(
        &self,
        apply: impl FnOnce(&mut Vec<Task>) -> T,
    ) -> Result<T, StoreError> {
        let _guard = self.writer.lock();
        let mut tasks: Vec<Task> = self.read_json(TASKS_KEY)?.unwrap_or_default();
        let outcome = apply(&mut tasks);
        self.write_json(TASKS_KEY, &tasks)?;
        Ok(outcome)
    }

    pub fn bindings(&self) -> Result<BTreeMap<String, NotificationId>, StoreError> {
        Ok(self.read_json(BINDINGS_KEY)?.unwrap_or_default())
    }

    pub fn binding(&self, task_id: &str) -> Result<Option<NotificationId>, StoreError> {
        Ok(self.bindings()?.remove(task_id))
    }

    pub fn alarm_metadata(&self, task_id: &str) -> Result<Option<AlarmMetadata>, StoreError> {
        let mut all: BTreeMap<String, AlarmMetadata> =
            self.read_json(ALARM_METADATA_KEY)?.unwrap_or_default();
        Ok(all.remove(task_id))
    }

    /// Records the binding and its metadata for `task_id`, replacing any previous entry.
    pub fn bind(&self, task_id: &str, metadata: AlarmMetadata) -> Result<(), StoreError> {
        let _guard = self.writer.lock();
        let mut bindings: BTreeMap<String, NotificationId> =
            self.read_json(BINDINGS_KEY)?.unwrap_or_default();
        bindings.insert(task_id.to_string(), metadata.notification_id.clone());
        self.write_json(BINDINGS_KEY, &bindings)?;

        let mut all: BTreeMap<String, AlarmMetadata> =
            self.read_json(ALARM_METADATA_KEY)?.unwrap_or_default();
        all.insert(task_id.to_string(), metadata);
        self.write_json(ALARM_METADATA_KEY, &all)
    }

    pub fn unbind(&self, task_id: &str) -> Result<(), StoreError> {
        let _guard = self.writer.lock();
        let mut bindings: BTreeMap<String, NotificationId> =
            self.read_json(BINDINGS_KEY)?.unwrap_or_default();
        if bindings.remove(task_id).is_some() {
            self.write_json(BINDINGS_KEY, &bindings)?;
        }

        let mut all: BTreeMap<String, AlarmMetadata> =
            self.read_json(ALARM_METADATA_KEY)?.unwrap_or_default();
        if all.remove(task_id).is_some() {
            self.write_json(ALARM_METADATA_KEY, &all)?;
        }
        Ok(())
    }

    pub fn clear_bindings(&self) -> Result<(), StoreError> {
        let _guard = self.writer.lock();
        self.backend.remove(BINDINGS_KEY)?;
        self.backend.remove(ALARM_METADATA_KEY)
    }

    fn read_json<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>, StoreError> {
        let Some(raw) = self.backend.get(key)? else {
            return Ok(None);
        };
        serde_json::from_str(&raw)
            .map(Some)
            .map_err(|source| StoreError::Serde {
                key: key.to_string(),
                source,
            })
    }

    fn write_json<T: Serialize + ?Sized>(&self, key: &str, value: &T) -> Result<(), StoreError> {
        let raw = serde_json::to_string(value).map_err(|source| StoreError::Serde {
            key: key.to_string(),
            source,
        })?;
        self.backend.set(key, &raw)
    }
}

/// Memory store that can be told to fail every read or every write.
#[cfg(test)]
pub(crate) struct UnreliableStore {
    inner: MemoryStore,
    fail_reads: bool,
    fail_writes: bool,
}

#[cfg(test)]
impl UnreliableStore {
    pub(crate) fn failing_reads(inner: MemoryStore) -> Self {
        Self {
            inner,
            fail_reads: true,
            fail_writes: false,
        }
    }

    pub(crate) fn failing_writes(inner: MemoryStore) -> Self {
        Self {
            inner,
            fail_reads: false,
            fail_writes: true,
        }
    }

    fn io_error(key: &str, what: &str) -> StoreError {
        StoreError::Io {
            key: key.to_string(),
            source: std::io::Error::new(std::io::ErrorKind::Other, what.to_string()),
        }
    }
}

#[cfg(test)]
impl KeyValueStore for UnreliableStore {
    fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        if self.fail_reads {
            return Err(Self::io_error(key, "read failed"));
        }
        self.inner.get(key)
    }

    fn set(&self, key: &str, value: &str) -> Result<(), StoreError> {
        if self.fail_writes {
            return Err(Self::io_error(key, "disk full"));
        }
        self.inner.set(key, value)
    }

    fn remove(&self, key: &str) -> Result<(), StoreError> {
        if self.fail_writes {
            return Err(Self::io_error(key, "disk full"));
        }
        self.inner.remove(key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use tempfile::tempdir;

    fn metadata(id: &str) -> AlarmMetadata {
        let at = Utc.with_ymd_and_hms(2025, 10, 20, 9, 0, 0).unwrap();
        AlarmMetadata {
            notification_id: NotificationId::from(id),
            fire_at: at,
            armed_at: at,
        }
    }

    #[test]
    fn bind_and_unbind_keep_maps_in_step() {
        let store = TaskStore::in_memory();
        store.bind("1", metadata("n-1")).unwrap();
        store.bind("2", metadata("n-2")).unwrap();
        store.bind("1", metadata("n-3")).unwrap();

        assert_eq!(store.bindings().unwrap().len(), 2);
        assert_eq!(
            store.binding("1").unwrap(),
            Some(NotificationId::from("n-3"))
        );
        assert_eq!(
            store.alarm_metadata("1").unwrap().unwrap().notification_id,
            NotificationId::from("n-3")
        );

        store.unbind("1").unwrap();
        assert!(store.binding("1").unwrap().is_none());
        assert!(store.alarm_metadata("1").unwrap().is_none());
        assert!(store.binding("2").unwrap().is_some());

        store.clear_bindings().unwrap();
        assert!(store.bindings().unwrap().is_empty());
    }

    #[test]
    fn file_store_persists_across_instances() {
        let temp = tempdir().expect("tempdir");
        let now = Utc::now();
        {
            let store = TaskStore::new(Box::new(FileStore::open(temp.path()).unwrap()));
            assert!(store.load_tasks_raw().unwrap().is_none());
            store
                .update_tasks(|tasks| tasks.push(Task::new("1", "Read", now)))
                .unwrap();
            store.bind("1", metadata("n-1")).unwrap();
        }

        let reopened = TaskStore::new(Box::new(FileStore::open(temp.path()).unwrap()));
        let tasks = reopened.load_tasks().unwrap();
        assert_eq!(tasks.len(), 1);
        assert_eq!(tasks[0].title, "Read");
        assert_eq!(
            reopened.binding("1").unwrap(),
            Some(NotificationId::from("n-1"))
        );
        assert!(temp.path().join("scheduledAlarms.json").exists());
    }

    #[test]
    fn bindings_are_stored_as_plain_id_map() {
        let backend = MemoryStore::new();
        backend.set(BINDINGS_KEY, r#"{"1":"abc"}"#).unwrap();
        let store = TaskStore::new(Box::new(backend));
        assert_eq!(
            store.binding("1").unwrap(),
            Some(NotificationId::from("abc"))
        );
    }

    #[test]
    fn corrupt_value_reports_key() {
        let backend = MemoryStore::new();
        backend.set(TASKS_KEY, "not json").unwrap();
        let store = TaskStore::new(Box::new(backend));
        let err = store.load_tasks().unwrap_err();
        assert!(matches!(err, StoreError::Serde { ref key, .. } if key == TASKS_KEY));
    }

    #[test]
    fn unreliable_store_surfaces_io_errors() {
        let store = TaskStore::new(Box::new(UnreliableStore::failing_writes(MemoryStore::new())));
        assert!(store.load_tasks().unwrap().is_empty());
        let err = store.bind("1", metadata("n-1")).unwrap_err();
        assert!(matches!(err, StoreError::Io { ref key, .. } if key == BINDINGS_KEY));

        let store = TaskStore::new(Box::new(UnreliableStore::failing_reads(MemoryStore::new())));
        assert!(matches!(store.load_tasks(), Err(StoreError::Io { .. })));
    }
}
