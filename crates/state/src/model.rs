use std::collections::HashMap;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Persistent record of one file being uploaded.
///
/// `completion_in_bytes` is skipped during serialization: the data file on
/// disk is its durability, and the store re-derives it by stat at load.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileRecord {
    /// Server-generated identifier, unique per server lifetime.
    pub id: String,
    /// Owner of this upload.
    pub client_id: String,
    /// Client-supplied name.
    pub original_name: String,
    /// Total size announced at prepare time. Immutable.
    pub original_size: u64,
    /// Absolute path where the bytes accumulate.
    pub path: PathBuf,
    /// Prefix length validated against a client-declared CRC.
    pub crced_bytes: u64,
    /// Current on-disk length. Always >= `crced_bytes`.
    #[serde(skip)]
    pub completion_in_bytes: u64,
}

impl FileRecord {
    /// Returns `true` once every announced byte has been CRC-validated.
    pub fn is_complete(&self) -> bool {
        self.crced_bytes == self.original_size
    }

    /// Bytes written to disk but not yet covered by a matching CRC.
    pub fn unchecked_bytes(&self) -> u64 {
        self.completion_in_bytes - self.crced_bytes
    }
}

/// All files belonging to one client.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ClientRecord {
    pub client_id: String,
    pub files: HashMap<String, FileRecord>,
}

impl ClientRecord {
    pub fn new(client_id: impl Into<String>) -> Self {
        Self {
            client_id: client_id.into(),
            files: HashMap::new(),
        }
    }
}
