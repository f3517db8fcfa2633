use std::collections::HashMap;
use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::RwLock;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{ClientRecord, FileRecord, StateError};

/// Name of the snapshot file under the upload root.
const STATE_FILE_NAME: &str = "state.json";

#[derive(Debug, Default, Serialize, Deserialize)]
struct Snapshot {
    clients: HashMap<String, ClientRecord>,
    /// file_id -> client_id, rebuilt on load.
    #[serde(skip)]
    index: HashMap<String, String>,
}

impl Snapshot {
    fn rebuild_index(&mut self) {
        self.index.clear();
        for (client_id, client) in &self.clients {
            for file_id in client.files.keys() {
                self.index.insert(file_id.clone(), client_id.clone());
            }
        }
    }

    fn file(&self, file_id: &str) -> Option<&FileRecord> {
        let client_id = self.index.get(file_id)?;
        self.clients.get(client_id)?.files.get(file_id)
    }

    fn file_mut(&mut self, file_id: &str) -> Option<&mut FileRecord> {
        let client_id = self.index.get(file_id)?.clone();
        self.clients.get_mut(&client_id)?.files.get_mut(file_id)
    }
}

/// Durable mapping of `file_id -> FileRecord`, grouped per client.
///
/// All mutations happen under one write lock that also covers the snapshot
/// rewrite, so the on-disk snapshot never runs ahead of (or behind) memory.
/// Mutations are durable before the mutating call returns.
///
/// The exception is [`update_completion`](Self::update_completion): the
/// appended bytes in the data file *are* that counter's durability, so it
/// only updates memory. [`open`](Self::open) re-derives it by stat.
pub struct StateStore {
    inner: RwLock<Snapshot>,
    upload_root: PathBuf,
    state_path: PathBuf,
}

impl StateStore {
    /// Opens (or creates) a store rooted at `upload_root`.
    ///
    /// A corrupt snapshot file drops the unreadable parts and continues;
    /// losing a record only costs the client a re-upload.
    pub fn open(upload_root: impl Into<PathBuf>) -> Result<Self, StateError> {
        let upload_root = upload_root.into();
        fs::create_dir_all(&upload_root)?;
        // Records carry absolute paths; normalize the root once here.
        let upload_root = upload_root.canonicalize()?;
        let state_path = upload_root.join(STATE_FILE_NAME);

        let mut snapshot = load_snapshot(&state_path);
        snapshot.rebuild_index();
        recover_completion(&mut snapshot);

        Ok(Self {
            inner: RwLock::new(snapshot),
            upload_root,
            state_path,
        })
    }

    /// Directory under which all upload data files live.
    pub fn upload_root(&self) -> &Path {
        &self.upload_root
    }

    /// Allocates a new file record and its (empty) data file.
    pub fn create(
        &self,
        client_id: &str,
        name: &str,
        size: u64,
    ) -> Result<FileRecord, StateError> {
        let id = Uuid::new_v4().to_string();
        let dir = self.upload_root.join(client_id);
        fs::create_dir_all(&dir)?;
        let path = dir.join(&id);
        File::create(&path)?;

        let record = FileRecord {
            id: id.clone(),
            client_id: client_id.to_string(),
            original_name: name.to_string(),
            original_size: size,
            path,
            crced_bytes: 0,
            completion_in_bytes: 0,
        };

        let mut inner = self.inner.write().unwrap();
        inner
            .clients
            .entry(client_id.to_string())
            .or_insert_with(|| ClientRecord::new(client_id))
            .files
            .insert(id.clone(), record.clone());
        inner.index.insert(id.clone(), client_id.to_string());
        self.persist(&inner)?;

        tracing::debug!(file_id = %id, client_id, name, size, "file record created");
        Ok(record)
    }

    /// Returns a copy of the record, if known.
    pub fn get(&self, file_id: &str) -> Option<FileRecord> {
        self.inner.read().unwrap().file(file_id).cloned()
    }

    /// Returns copies of all records belonging to `client_id`.
    pub fn client_files(&self, client_id: &str) -> Vec<FileRecord> {
        let inner = self.inner.read().unwrap();
        inner
            .clients
            .get(client_id)
            .map(|c| c.files.values().cloned().collect())
            .unwrap_or_default()
    }

    /// Advances the CRC-validated prefix. Monotonic; durable on return.
    pub fn update_crced_bytes(&self, file_id: &str, new_value: u64) -> Result<(), StateError> {
        let mut inner = self.inner.write().unwrap();
        let record = inner
            .file_mut(file_id)
            .ok_or_else(|| StateError::UnknownFile(file_id.to_string()))?;
        if new_value < record.crced_bytes {
            return Err(StateError::NonMonotonicUpdate {
                field: "crced_bytes",
                current: record.crced_bytes,
                requested: new_value,
            });
        }
        record.crced_bytes = new_value;
        self.persist(&inner)
    }

    /// Advances the on-disk length counter. Monotonic; memory only, since
    /// the appended bytes themselves are the durable representation.
    pub fn update_completion(&self, file_id: &str, new_value: u64) -> Result<(), StateError> {
        let mut inner = self.inner.write().unwrap();
        let record = inner
            .file_mut(file_id)
            .ok_or_else(|| StateError::UnknownFile(file_id.to_string()))?;
        if new_value < record.completion_in_bytes {
            return Err(StateError::NonMonotonicUpdate {
                field: "completion_in_bytes",
                current: record.completion_in_bytes,
                requested: new_value,
            });
        }
        record.completion_in_bytes = new_value;
        Ok(())
    }

    /// Rolls both counters back to `safe_offset` and truncates the data
    /// file to match. The only sanctioned way to decrease either counter.
    pub fn rollback_to(&self, file_id: &str, safe_offset: u64) -> Result<(), StateError> {
        let mut inner = self.inner.write().unwrap();
        let record = inner
            .file_mut(file_id)
            .ok_or_else(|| StateError::UnknownFile(file_id.to_string()))?;

        let file = OpenOptions::new().write(true).open(&record.path)?;
        file.set_len(safe_offset)?;
        file.sync_all()?;

        record.completion_in_bytes = safe_offset;
        record.crced_bytes = record.crced_bytes.min(safe_offset);
        let crced = record.crced_bytes;
        self.persist(&inner)?;

        tracing::debug!(file_id, safe_offset, crced_bytes = crced, "rolled back");
        Ok(())
    }

    /// Deletes the record and its data file.
    pub fn remove(&self, file_id: &str) -> Result<(), StateError> {
        let mut inner = self.inner.write().unwrap();
        let client_id = inner
            .index
            .remove(file_id)
            .ok_or_else(|| StateError::UnknownFile(file_id.to_string()))?;
        let record = inner
            .clients
            .get_mut(&client_id)
            .and_then(|c| c.files.remove(file_id));
        if let Some(record) = record {
            if let Err(e) = fs::remove_file(&record.path) {
                // The record is already gone from memory; a missing data
                // file is not worth failing the call over.
                tracing::warn!(file_id, error = %e, "could not delete data file");
            }
        }
        self.persist(&inner)
    }

    /// Removes all records and data files for one client.
    pub fn clear_client(&self, client_id: &str) -> Result<(), StateError> {
        let mut inner = self.inner.write().unwrap();
        if let Some(client) = inner.clients.remove(client_id) {
            for record in client.files.values() {
                let _ = fs::remove_file(&record.path);
            }
        }
        inner.index.retain(|_, c| c != client_id);
        let _ = fs::remove_dir(self.upload_root.join(client_id));
        self.persist(&inner)
    }

    /// Wipes all state and data files. Admin/test use.
    pub fn clear(&self) -> Result<(), StateError> {
        let mut inner = self.inner.write().unwrap();
        for client in inner.clients.values() {
            for record in client.files.values() {
                let _ = fs::remove_file(&record.path);
            }
            let _ = fs::remove_dir(self.upload_root.join(&client.client_id));
        }
        inner.clients.clear();
        inner.index.clear();
        self.persist(&inner)
    }

    /// Rewrites the snapshot file: temp file, fsync, atomic rename.
    fn persist(&self, snapshot: &Snapshot) -> Result<(), StateError> {
        let bytes = serde_json::to_vec_pretty(snapshot)?;
        let tmp_path = self.state_path.with_extension("json.tmp");
        let mut tmp = File::create(&tmp_path)?;
        tmp.write_all(&bytes)?;
        tmp.sync_all()?;
        fs::rename(&tmp_path, &self.state_path)?;
        Ok(())
    }
}

/// Reads the snapshot, tolerating a corrupt file or corrupt records.
fn load_snapshot(state_path: &Path) -> Snapshot {
    let raw = match fs::read(state_path) {
        Ok(raw) => raw,
        // First boot.
        Err(_) => return Snapshot::default(),
    };

    let value: serde_json::Value = match serde_json::from_slice(&raw) {
        Ok(value) => value,
        Err(e) => {
            tracing::error!(path = %state_path.display(), error = %e, "state snapshot unreadable, starting empty");
            return Snapshot::default();
        }
    };

    let mut snapshot = Snapshot::default();
    let Some(clients) = value.get("clients").and_then(|c| c.as_object()) else {
        tracing::error!(path = %state_path.display(), "state snapshot has no client map, starting empty");
        return snapshot;
    };

    for (client_id, client_value) in clients {
        let mut client = ClientRecord::new(client_id.clone());
        let files = client_value
            .get("files")
            .and_then(|f| f.as_object())
            .cloned()
            .unwrap_or_default();
        for (file_id, file_value) in files {
            match serde_json::from_value::<FileRecord>(file_value) {
                Ok(record) => {
                    client.files.insert(file_id, record);
                }
                Err(e) => {
                    tracing::warn!(client_id, file_id, error = %e, "dropping unreadable file record");
                }
            }
        }
        snapshot.clients.insert(client_id.clone(), client);
    }
    snapshot
}

/// Re-derives `completion_in_bytes` from the data files.
///
/// A record whose file vanished resets to zero (the client starts over); a
/// file shorter than the recorded `crced_bytes` clamps the validated prefix
/// down to what is actually there.
fn recover_completion(snapshot: &mut Snapshot) {
    for client in snapshot.clients.values_mut() {
        for record in client.files.values_mut() {
            match fs::metadata(&record.path) {
                Ok(meta) => {
                    record.completion_in_bytes = meta.len();
                    if record.crced_bytes > record.completion_in_bytes {
                        tracing::warn!(
                            file_id = %record.id,
                            crced = record.crced_bytes,
                            on_disk = record.completion_in_bytes,
                            "data file shorter than validated prefix, clamping"
                        );
                        record.crced_bytes = record.completion_in_bytes;
                    }
                }
                Err(_) => {
                    tracing::warn!(file_id = %record.id, path = %record.path.display(), "data file missing, resetting counters");
                    record.completion_in_bytes = 0;
                    record.crced_bytes = 0;
                }
            }
        }
    }
}
