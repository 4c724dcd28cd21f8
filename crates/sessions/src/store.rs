//! Durable fingerprint → session map backed by `sessions.json`.
//!
//! Every read-modify-write holds an exclusive advisory lock on
//! `sessions.json.lock`, and the map is replaced through a sibling temp file
//! plus rename. The methods are blocking; async callers go through
//! `spawn_blocking`.

use std::{
    collections::BTreeMap,
    fs::{self, File, OpenOptions},
    io,
    path::{Path, PathBuf},
};

use {
    relaygate_common::time::now_ms,
    serde::{Deserialize, Serialize},
    tracing::{debug, warn},
};

use crate::fingerprint::Fingerprint;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("session store I/O on {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("failed to encode session map: {0}")]
    Encode(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, StoreError>;

fn io_err(path: &Path) -> impl FnOnce(io::Error) -> StoreError + '_ {
    move |source| StoreError::Io {
        path: path.to_path_buf(),
        source,
    }
}

/// One agent session and the history prefix it currently represents.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionRecord {
    pub session_id: String,
    pub history_fingerprint: Fingerprint,
    pub title: String,
    pub workspace_dir: PathBuf,
    pub created_at: u64,
    pub updated_at: u64,
    /// Successfully committed turns; `0` means the session never received context.
    #[serde(default)]
    pub turns: u32,
}

impl SessionRecord {
    pub fn new(
        session_id: impl Into<String>,
        history_fingerprint: Fingerprint,
        title: impl Into<String>,
        workspace_dir: PathBuf,
    ) -> Self {
        let now = now_ms();
        Self {
            session_id: session_id.into(),
            history_fingerprint,
            title: title.into(),
            workspace_dir,
            created_at: now,
            updated_at: now,
            turns: 0,
        }
    }

    /// Whether the next turn has to replay the full history.
    pub fn needs_priming(&self) -> bool {
        self.turns == 0
    }
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct StoreFile {
    #[serde(default)]
    sessions: BTreeMap<Fingerprint, SessionRecord>,
}

/// Handle to the on-disk session map. Cheap to clone.
#[derive(Debug, Clone)]
pub struct SessionStore {
    path: PathBuf,
    lock_path: PathBuf,
}

impl SessionStore {
    /// Open the store, creating the parent directory. A missing or corrupt
    /// map is not an error; it reads as empty.
    pub fn open(path: impl Into<PathBuf>, lock_path: impl Into<PathBuf>) -> Result<Self> {
        let store = Self {
            path: path.into(),
            lock_path: lock_path.into(),
        };
        if let Some(parent) = store.path.parent()
            && !parent.as_os_str().is_empty()
        {
            fs::create_dir_all(parent).map_err(io_err(parent))?;
        }
        Ok(store)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn lock_path(&self) -> &Path {
        &self.lock_path
    }

    /// Exact fingerprint match.
    pub fn get(&self, fingerprint: &Fingerprint) -> Result<Option<SessionRecord>> {
        self.read(|file| file.sessions.get(fingerprint).cloned())
    }

    /// Most recently updated record carrying `session_id`.
    pub fn find_by_session_id(&self, session_id: &str) -> Result<Option<SessionRecord>> {
        self.read(|file| {
            file.sessions
                .values()
                .filter(|r| r.session_id == session_id)
                .max_by_key(|r| r.updated_at)
                .cloned()
        })
    }

    /// Insert `record` under its fingerprint unless one is already stored.
    ///
    /// Returns the stored record and whether it was inserted by this call.
    pub fn insert_if_absent(&self, record: SessionRecord) -> Result<(SessionRecord, bool)> {
        self.modify(|file| {
            if let Some(existing) = file.sessions.get(&record.history_fingerprint) {
                return (false, (existing.clone(), false));
            }
            file.sessions
                .insert(record.history_fingerprint.clone(), record.clone());
            (true, (record, true))
        })
    }

    /// Move `record` to `next` after a successful turn.
    ///
    /// The previous key is removed only while it still points at this
    /// session; if another turn already advanced it, the old entry stays
    /// and the session is additionally stored under `next`.
    pub fn commit(&self, record: &SessionRecord, next: Fingerprint) -> Result<SessionRecord> {
        self.modify(|file| {
            let prev = &record.history_fingerprint;
            let owned = file
                .sessions
                .get(prev)
                .is_some_and(|current| current.session_id == record.session_id);
            let stored = if owned {
                file.sessions.remove(prev)
            } else {
                None
            };

            let mut updated = stored.unwrap_or_else(|| record.clone());
            updated.turns = updated.turns.max(record.turns).saturating_add(1);
            updated.history_fingerprint = next.clone();
            updated.updated_at = now_ms();
            file.sessions.insert(next, updated.clone());
            (true, updated)
        })
    }

    /// All records, most recently updated first.
    pub fn list(&self) -> Result<Vec<SessionRecord>> {
        self.read(|file| {
            let mut records: Vec<_> = file.sessions.values().cloned().collect();
            records.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
            records
        })
    }

    pub fn len(&self) -> Result<usize> {
        self.read(|file| file.sessions.len())
    }

    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }

    /// Empty the map and remove the lock artifact. Returns the number of
    /// records dropped.
    pub fn clear_all(&self) -> Result<usize> {
        let removed = self.modify(|file| {
            let n = file.sessions.len();
            file.sessions.clear();
            (true, n)
        })?;
        match fs::remove_file(&self.lock_path) {
            Ok(()) => {},
            Err(e) if e.kind() == io::ErrorKind::NotFound => {},
            Err(e) => return Err(io_err(&self.lock_path)(e)),
        }
        debug!(removed, path = %self.path.display(), "session map cleared");
        Ok(removed)
    }

    // ── Locked access ───────────────────────────────────────────────────

    fn read<T>(&self, f: impl FnOnce(&StoreFile) -> T) -> Result<T> {
        self.modify(|file| (false, f(file)))
    }

    /// Run `f` under the exclusive file lock. `f` returns whether the map
    /// changed and must be written back.
    fn modify<T>(&self, f: impl FnOnce(&mut StoreFile) -> (bool, T)) -> Result<T> {
        let lock_file = self.open_lock_file()?;
        let mut lock = fd_lock::RwLock::new(lock_file);
        let _guard = lock.write().map_err(io_err(&self.lock_path))?;

        let mut file = self.load();
        let (dirty, out) = f(&mut file);
        if dirty {
            self.save(&file)?;
        }
        Ok(out)
    }

    fn open_lock_file(&self) -> Result<File> {
        if let Some(parent) = self.lock_path.parent()
            && !parent.as_os_str().is_empty()
        {
            fs::create_dir_all(parent).map_err(io_err(parent))?;
        }
        OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .truncate(false)
            .open(&self.lock_path)
            .map_err(io_err(&self.lock_path))
    }

    fn load(&self) -> StoreFile {
        let data = match fs::read_to_string(&self.path) {
            Ok(data) => data,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return StoreFile::default(),
            Err(e) => {
                warn!(path = %self.path.display(), error = %e, "unreadable session map, treating as empty");
                return StoreFile::default();
            },
        };
        if data.trim().is_empty() {
            return StoreFile::default();
        }
        match serde_json::from_str(&data) {
            Ok(file) => file,
            Err(e) => {
                warn!(path = %self.path.display(), error = %e, "corrupt session map, treating as empty");
                StoreFile::default()
            },
        }
    }

    fn save(&self, file: &StoreFile) -> Result<()> {
        let data = serde_json::to_string_pretty(file)?;
        let mut tmp = self.path.clone().into_os_string();
        tmp.push(".tmp");
        let tmp = PathBuf::from(tmp);
        fs::write(&tmp, data).map_err(io_err(&tmp))?;
        fs::rename(&tmp, &self.path).map_err(io_err(&self.path))
    }
}

#[cfg(test)]
mod tests {
    use {
        super::*,
        crate::fingerprint::{fingerprint, next_fingerprint},
        relaygate_common::ChatMessage,
        std::sync::Arc,
    };

    fn temp_store() -> (tempfile::TempDir, SessionStore) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sessions.json");
        let store = SessionStore::open(&path, dir.path().join("sessions.json.lock")).unwrap();
        (dir, store)
    }

    fn record(id: &str, fp: &Fingerprint) -> SessionRecord {
        SessionRecord::new(id, fp.clone(), "title", PathBuf::from(format!("/ws/{id}")))
    }

    #[test]
    fn insert_then_get() {
        let (_dir, store) = temp_store();
        let fp = fingerprint(&[]);
        assert!(store.get(&fp).unwrap().is_none());

        let (stored, inserted) = store.insert_if_absent(record("s1", &fp)).unwrap();
        assert!(inserted);
        assert_eq!(stored.session_id, "s1");
        assert_eq!(store.get(&fp).unwrap().unwrap().session_id, "s1");
    }

    #[test]
    fn second_insert_returns_existing() {
        let (_dir, store) = temp_store();
        let fp = fingerprint(&[]);
        store.insert_if_absent(record("s1", &fp)).unwrap();
        let (stored, inserted) = store.insert_if_absent(record("s2", &fp)).unwrap();
        assert!(!inserted);
        assert_eq!(stored.session_id, "s1");
        assert_eq!(store.len().unwrap(), 1);
    }

    #[test]
    fn commit_replaces_key_and_counts_turns() {
        let (_dir, store) = temp_store();
        let msgs = vec![ChatMessage::user("Hello!")];
        let prev = fingerprint(&[]);
        let (rec, _) = store.insert_if_absent(record("s1", &prev)).unwrap();

        let next = next_fingerprint(&msgs, "Hi");
        let committed = store.commit(&rec, next.clone()).unwrap();
        assert_eq!(committed.turns, 1);
        assert_eq!(committed.history_fingerprint, next);
        assert!(store.get(&prev).unwrap().is_none());
        assert_eq!(store.get(&next).unwrap().unwrap().session_id, "s1");
        assert_eq!(store.len().unwrap(), 1);
    }

    #[test]
    fn commit_branches_when_previous_key_moved_on() {
        let (_dir, store) = temp_store();
        let prev = fingerprint(&[ChatMessage::user("a")]);
        let (rec, _) = store.insert_if_absent(record("s1", &prev)).unwrap();

        let b1 = fingerprint(&[ChatMessage::user("b1")]);
        let b2 = fingerprint(&[ChatMessage::user("b2")]);
        store.commit(&rec, b1.clone()).unwrap();
        // Second turn started from the same snapshot.
        store.commit(&rec, b2.clone()).unwrap();

        assert_eq!(store.get(&b1).unwrap().unwrap().session_id, "s1");
        assert_eq!(store.get(&b2).unwrap().unwrap().session_id, "s1");
        assert!(store.get(&prev).unwrap().is_none());
    }

    #[test]
    fn commit_keeps_foreign_entry_under_previous_key() {
        let (_dir, store) = temp_store();
        let prev = fingerprint(&[ChatMessage::user("a")]);
        let stale = record("s-old", &prev);
        store.insert_if_absent(record("s-new", &prev)).unwrap();

        let next = fingerprint(&[ChatMessage::user("b")]);
        store.commit(&stale, next.clone()).unwrap();
        assert_eq!(store.get(&prev).unwrap().unwrap().session_id, "s-new");
        assert_eq!(store.get(&next).unwrap().unwrap().session_id, "s-old");
    }

    #[test]
    fn corrupt_file_reads_as_empty_and_is_overwritten() {
        let (_dir, store) = temp_store();
        fs::write(store.path(), "{ not json").unwrap();
        assert_eq!(store.len().unwrap(), 0);

        let fp = fingerprint(&[]);
        store.insert_if_absent(record("s1", &fp)).unwrap();
        let raw = fs::read_to_string(store.path()).unwrap();
        let value: serde_json::Value = serde_json::from_str(&raw).unwrap();
        assert_eq!(value["sessions"][fp.as_str()]["session_id"], "s1");
        assert_eq!(value["sessions"][fp.as_str()]["turns"], 0);
    }

    #[test]
    fn persists_across_handles() {
        let (dir, store) = temp_store();
        let fp = fingerprint(&[]);
        store.insert_if_absent(record("s1", &fp)).unwrap();

        let reopened = SessionStore::open(
            dir.path().join("sessions.json"),
            dir.path().join("sessions.json.lock"),
        )
        .unwrap();
        assert_eq!(
            reopened.find_by_session_id("s1").unwrap().unwrap().history_fingerprint,
            fp
        );
        assert!(reopened.find_by_session_id("missing").unwrap().is_none());
    }

    #[test]
    fn list_orders_by_recent_update() {
        let (_dir, store) = temp_store();
        let a = fingerprint(&[ChatMessage::user("a")]);
        let b = fingerprint(&[ChatMessage::user("b")]);
        let mut older = record("older", &a);
        older.updated_at = 1;
        let mut newer = record("newer", &b);
        newer.updated_at = 2;
        store.insert_if_absent(older).unwrap();
        store.insert_if_absent(newer).unwrap();

        let ids: Vec<_> = store
            .list()
            .unwrap()
            .into_iter()
            .map(|r| r.session_id)
            .collect();
        assert_eq!(ids, vec!["newer", "older"]);
    }

    #[test]
    fn clear_all_empties_map_and_removes_lock() {
        let (_dir, store) = temp_store();
        store
            .insert_if_absent(record("s1", &fingerprint(&[])))
            .unwrap();
        assert!(store.lock_path().exists());

        assert_eq!(store.clear_all().unwrap(), 1);
        assert!(store.is_empty().unwrap());
        // `is_empty` re-creates the lock file; clear again to check removal.
        store.clear_all().unwrap();
        assert!(!store.lock_path().exists());
    }

    #[test]
    fn concurrent_inserts_have_single_winner() {
        let (_dir, store) = temp_store();
        let store = Arc::new(store);
        let fp = fingerprint(&[ChatMessage::user("race")]);

        let handles: Vec<_> = (0..8)
            .map(|i| {
                let store = Arc::clone(&store);
                let fp = fp.clone();
                std::thread::spawn(move || {
                    store
                        .insert_if_absent(record(&format!("s{i}"), &fp))
                        .unwrap()
                })
            })
            .collect();
        let results: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();

        assert_eq!(results.iter().filter(|(_, inserted)| *inserted).count(), 1);
        let winner = &results.iter().find(|(_, inserted)| *inserted).unwrap().0;
        assert!(results.iter().all(|(r, _)| r.session_id == winner.session_id));
    }
}
