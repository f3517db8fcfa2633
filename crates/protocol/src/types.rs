use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// Point-in-time state of one pending upload, as reported to clients.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileStateSnapshot {
    pub file_id: String,
    pub original_name: String,
    pub original_size: u64,
    /// Current on-disk length.
    pub completion_in_bytes: u64,
    /// Prefix length validated against a client-declared CRC.
    pub crced_bytes: u64,
    /// Requested rate override, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rate_kb: Option<u64>,
    /// Observed throughput over the last scheduler tick.
    #[serde(default)]
    pub instant_rate_bytes: u64,
}

impl FileStateSnapshot {
    /// Validated progress as a percentage in `[0, 100]`.
    pub fn percent_complete(&self) -> f32 {
        if self.original_size == 0 {
            return 0.0;
        }
        self.crced_bytes as f32 / self.original_size as f32 * 100.0
    }

    /// Returns `true` once every byte has been CRC-validated.
    pub fn is_complete(&self) -> bool {
        self.crced_bytes == self.original_size
    }
}

/// Snapshot of all pending uploads for one client.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadStateSnapshot {
    pub pending_files: HashMap<String, FileStateSnapshot>,
}
