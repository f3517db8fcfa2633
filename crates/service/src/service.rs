use std::io::SeekFrom;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tokio::fs::File;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncSeekExt};

use chunkstream_crc::{buffered_crc, digests_match};
use chunkstream_limiter::{LimiterSettings, RateLimiter, RateLimiterConfig};
use chunkstream_processor::{ChunkProcessor, CompletionListener, ProcessorSettings};
use chunkstream_protocol::{FileStateSnapshot, UploadStateSnapshot};
use chunkstream_state::{FileRecord, StateStore};

use crate::UploadError;

/// Construction-time settings for the [`UploadService`].
#[derive(Debug, Clone)]
pub struct ServiceSettings {
    /// Directory for data files and the state snapshot.
    pub upload_root: PathBuf,
    /// Rate limiter scheduling period.
    pub tick_period: Duration,
    /// Idle window before an upload configuration is evicted.
    pub idle_timeout: Duration,
    /// Upper bound on how long a paused worker stays parked. `None` parks
    /// indefinitely.
    pub max_pause: Option<Duration>,
}

impl ServiceSettings {
    pub fn new(upload_root: impl Into<PathBuf>) -> Self {
        let limiter = LimiterSettings::default();
        Self {
            upload_root: upload_root.into(),
            tick_period: limiter.tick_period,
            idle_timeout: limiter.idle_timeout,
            max_pause: None,
        }
    }
}

/// The upload service core.
///
/// Owns the persistent state store, the rate limiter (whose ticker task is
/// started on construction) and the chunk processor. One instance serves
/// all clients.
pub struct UploadService {
    store: Arc<StateStore>,
    limiter: Arc<RateLimiter>,
    processor: ChunkProcessor,
}

impl UploadService {
    /// Opens the store under `settings.upload_root`, recovers any previous
    /// state and starts the rate limiter ticker.
    pub fn start(settings: ServiceSettings) -> Result<Self, UploadError> {
        let store = Arc::new(StateStore::open(&settings.upload_root)?);
        let limiter = RateLimiter::new(LimiterSettings {
            tick_period: settings.tick_period,
            idle_timeout: settings.idle_timeout,
        });
        limiter.start();
        let processor = ChunkProcessor::with_settings(
            Arc::clone(&store),
            Arc::clone(&limiter),
            ProcessorSettings {
                max_pause: settings.max_pause,
            },
        );
        tracing::info!(upload_root = %settings.upload_root.display(), "upload service started");
        Ok(Self {
            store,
            limiter,
            processor,
        })
    }

    /// Stops the rate limiter ticker. In-flight workers finish their
    /// current burst and then park forever, so cancel pending uploads
    /// first if a clean stop matters.
    pub fn shutdown(&self) {
        self.limiter.shutdown();
    }

    /// Registers a new upload and returns its file id.
    pub fn prepare_upload(
        &self,
        client_id: &str,
        size: u64,
        name: &str,
    ) -> Result<String, UploadError> {
        if client_id.trim().is_empty() {
            return Err(UploadError::MissingParameter("client_id"));
        }
        if size == 0 {
            return Err(UploadError::MissingParameter("size"));
        }
        if name.trim().is_empty() {
            return Err(UploadError::MissingParameter("name"));
        }
        let record = self.store.create(client_id, name, size)?;
        tracing::info!(file_id = %record.id, client_id, name, size, "upload prepared");
        Ok(record.id)
    }

    /// Hands one chunk to the asynchronous processor.
    ///
    /// Parameter validation fails synchronously; everything after that
    /// reaches `listener` exactly once.
    pub fn process<R>(
        &self,
        file_id: &str,
        declared_crc_hex: &str,
        input: R,
        listener: CompletionListener,
    ) -> Result<(), UploadError>
    where
        R: AsyncRead + Send + Unpin + 'static,
    {
        if file_id.trim().is_empty() {
            return Err(UploadError::MissingParameter("file_id"));
        }
        if declared_crc_hex.trim().is_empty() {
            return Err(UploadError::MissingParameter("declared_crc_hex"));
        }
        self.processor
            .process(file_id, declared_crc_hex, input, listener);
        Ok(())
    }

    /// Reconciles the unchecked byte range after a disconnect.
    ///
    /// `input` must yield the client's copy of the bytes in
    /// `[crced_bytes, completion_in_bytes)`. If its digest matches the
    /// on-disk range, the validated prefix advances over the gap; if not,
    /// the file is truncated back to `crced_bytes` and the client re-sends
    /// from there.
    pub async fn verify_crc_of_unchecked_part<R>(
        &self,
        file_id: &str,
        input: R,
    ) -> Result<(), UploadError>
    where
        R: AsyncRead + Unpin,
    {
        let record = self.require_record(file_id)?;
        let gap = record.unchecked_bytes();

        let supplied = buffered_crc(input).await?;

        let mut file = File::open(&record.path).await?;
        file.seek(SeekFrom::Start(record.crced_bytes)).await?;
        let on_disk = buffered_crc(file.take(gap)).await?;

        if supplied.bytes_read == gap && digests_match(&supplied.hex, &on_disk.hex) {
            self.store
                .update_crced_bytes(file_id, record.completion_in_bytes)?;
            tracing::info!(
                file_id,
                bytes = gap,
                "unchecked range reconciled, validated prefix advanced"
            );
            Ok(())
        } else {
            self.store.rollback_to(file_id, record.crced_bytes)?;
            tracing::warn!(
                file_id,
                bytes = gap,
                "unchecked range did not match, truncated back"
            );
            Err(UploadError::InvalidCrc)
        }
    }

    /// Validated progress in `[0, 100]`.
    pub fn get_progress(&self, file_id: &str) -> Result<f32, UploadError> {
        Ok(self.file_state(file_id)?.percent_complete())
    }

    /// Snapshot of one file's state.
    pub fn file_state(&self, file_id: &str) -> Result<FileStateSnapshot, UploadError> {
        let record = self.require_record(file_id)?;
        Ok(self.snapshot_of(&record))
    }

    /// Snapshot of all of a client's pending uploads. Fully validated
    /// files are no longer pending and are left out; their records stay
    /// queryable via [`file_state`](Self::file_state) until removed.
    pub fn get_config(&self, client_id: &str) -> UploadStateSnapshot {
        let mut snapshot = UploadStateSnapshot::default();
        for record in self.store.client_files(client_id) {
            let state = self.snapshot_of(&record);
            if state.is_complete() {
                continue;
            }
            snapshot.pending_files.insert(record.id.clone(), state);
        }
        snapshot
    }

    pub fn pause_file(&self, file_id: &str) -> Result<(), UploadError> {
        self.require_record(file_id)?;
        self.limiter.registry().pause(file_id);
        tracing::debug!(file_id, "upload paused");
        Ok(())
    }

    pub fn resume_file(&self, file_id: &str) -> Result<(), UploadError> {
        self.require_record(file_id)?;
        self.limiter.registry().resume(file_id);
        tracing::debug!(file_id, "upload resumed");
        Ok(())
    }

    /// Cancels an upload and deletes its partial file.
    ///
    /// If a worker is mid-chunk it observes the flag at its next loop
    /// iteration and performs the cleanup itself; otherwise the cleanup
    /// happens here.
    pub fn cancel_file(&self, file_id: &str) -> Result<(), UploadError> {
        self.require_record(file_id)?;
        let worker_active = match self.limiter.registry().peek(file_id) {
            Some(config) => {
                config.mark_cancel();
                config.is_processing()
            }
            None => false,
        };
        if !worker_active {
            self.store.remove(file_id)?;
            if let Some(config) = self.limiter.registry().peek(file_id) {
                config.reset();
            }
        }
        tracing::info!(file_id, worker_active, "upload cancelled");
        Ok(())
    }

    /// Sets the desired rate for one upload, in KB/s.
    pub fn set_upload_rate(&self, file_id: &str, kb: u64) -> Result<(), UploadError> {
        self.require_record(file_id)?;
        self.limiter.registry().assign_rate(file_id, Some(kb));
        tracing::debug!(file_id, kb, "upload rate assigned");
        Ok(())
    }

    /// Observed throughput in bytes/second over the last scheduler tick.
    pub fn upload_rate(&self, file_id: &str) -> u64 {
        self.limiter
            .registry()
            .peek(file_id)
            .map(|config| config.instant_rate_bytes())
            .unwrap_or(0)
    }

    /// Rough time to finish at the current rate. `None` while idle.
    pub fn estimated_remaining(&self, file_id: &str) -> Result<Option<Duration>, UploadError> {
        let record = self.require_record(file_id)?;
        let rate = self.upload_rate(file_id);
        if rate == 0 {
            return Ok(None);
        }
        let remaining = record.original_size - record.crced_bytes;
        Ok(Some(Duration::from_secs_f64(
            remaining as f64 / rate as f64,
        )))
    }

    /// Runtime-tunable global rate thresholds.
    pub fn rate_config(&self) -> &RateLimiterConfig {
        self.limiter.config()
    }

    /// Removes one client's records and data files.
    pub fn clear_client(&self, client_id: &str) -> Result<(), UploadError> {
        self.store.clear_client(client_id)?;
        Ok(())
    }

    /// Wipes all state. Admin/test use.
    pub fn clear(&self) -> Result<(), UploadError> {
        self.store.clear()?;
        Ok(())
    }

    fn require_record(&self, file_id: &str) -> Result<FileRecord, UploadError> {
        self.store
            .get(file_id)
            .ok_or_else(|| UploadError::IncorrectRequest(format!("unknown file: {file_id}")))
    }

    fn snapshot_of(&self, record: &FileRecord) -> FileStateSnapshot {
        let config = self.limiter.registry().peek(&record.id);
        FileStateSnapshot {
            file_id: record.id.clone(),
            original_name: record.original_name.clone(),
            original_size: record.original_size,
            completion_in_bytes: record.completion_in_bytes,
            crced_bytes: record.crced_bytes,
            rate_kb: config.as_ref().and_then(|c| c.desired_rate_kb()),
            instant_rate_bytes: config
                .as_ref()
                .map(|c| c.instant_rate_bytes())
                .unwrap_or(0),
        }
    }
}
