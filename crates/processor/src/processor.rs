use std::io::SeekFrom;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::fs::OpenOptions;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncSeekExt, AsyncWriteExt};

use chunkstream_crc::{digests_match, CrcAccumulator};
use chunkstream_limiter::{RateLimiter, UploadProcessingConfiguration};
use chunkstream_state::{FileRecord, StateStore};

use crate::{CompletionListener, ProcessError};

/// Size of the reusable read/write buffer. A burst never moves more than
/// this many bytes, whatever the current allowance.
pub const WRITE_BUFFER_SIZE: usize = 16 * 1024;

/// Construction-time settings for the [`ChunkProcessor`].
#[derive(Debug, Clone, Default)]
pub struct ProcessorSettings {
    /// Upper bound on how long a worker stays parked on `paused` before it
    /// gives up the chunk. `None` (the default) parks indefinitely.
    pub max_pause: Option<Duration>,
}

/// The per-chunk write pipeline.
///
/// `process` validates the request, claims the file (at most one worker per
/// file id, enforced here) and spawns a worker task that drains the input
/// under rate-limiter control. All outcomes, validation failures included,
/// reach the caller through the completion listener, exactly once per
/// call.
pub struct ChunkProcessor {
    store: Arc<StateStore>,
    limiter: Arc<RateLimiter>,
    settings: ProcessorSettings,
}

impl ChunkProcessor {
    pub fn new(store: Arc<StateStore>, limiter: Arc<RateLimiter>) -> Self {
        Self::with_settings(store, limiter, ProcessorSettings::default())
    }

    pub fn with_settings(
        store: Arc<StateStore>,
        limiter: Arc<RateLimiter>,
        settings: ProcessorSettings,
    ) -> Self {
        Self {
            store,
            limiter,
            settings,
        }
    }

    /// Processes one inbound chunk for `file_id`.
    ///
    /// `declared_crc_hex` must be the CRC-32 of exactly the bytes `input`
    /// will yield. Must be called from within a tokio runtime with the
    /// rate limiter's ticker running; the worker parks on tick signals.
    pub fn process<R>(
        &self,
        file_id: &str,
        declared_crc_hex: &str,
        input: R,
        listener: CompletionListener,
    ) where
        R: AsyncRead + Send + Unpin + 'static,
    {
        let record = match self.store.get(file_id) {
            Some(record) => record,
            None => {
                return deliver(
                    listener,
                    Err(ProcessError::IncorrectRequest(format!(
                        "unknown file: {file_id}"
                    ))),
                );
            }
        };
        if record.is_complete() {
            return deliver(
                listener,
                Err(ProcessError::IncorrectRequest(format!(
                    "upload already complete: {file_id}"
                ))),
            );
        }

        let config = self.limiter.registry().get(file_id);
        config.set_client_id(&record.client_id);
        if !config.try_begin_processing() {
            return deliver(
                listener,
                Err(ProcessError::IncorrectRequest(format!(
                    "a chunk is already being processed for file: {file_id}"
                ))),
            );
        }

        let store = Arc::clone(&self.store);
        let limiter = Arc::clone(&self.limiter);
        let declared = declared_crc_hex.to_string();
        let max_pause = self.settings.max_pause;
        tokio::spawn(async move {
            let file_id = record.id.clone();
            let outcome = write_chunk(
                &store,
                &limiter,
                &config,
                record,
                &declared,
                input,
                max_pause,
            )
            .await;
            config.end_processing();
            match &outcome {
                Ok(()) => tracing::debug!(file_id = %file_id, "chunk accepted"),
                Err(e) => tracing::debug!(file_id = %file_id, error = %e, "chunk processing ended"),
            }
            listener(outcome);
        });
    }
}

/// Hands a pre-spawn failure to the listener from a task of its own, so
/// the listener always runs off the caller's stack.
fn deliver(listener: CompletionListener, outcome: Result<(), ProcessError>) {
    tokio::spawn(async move {
        listener(outcome);
    });
}

/// The worker loop for one chunk.
///
/// Exit paths and their on-disk effects:
/// - declared CRC matches at EOF: fsync, promote `crced_bytes`.
/// - declared CRC mismatch at EOF: truncate back to `crced_bytes`.
/// - read error: keep appended bytes, counters untouched (reconciliation
///   advances or truncates them later).
/// - cancel flag: delete file and record.
async fn write_chunk<R>(
    store: &StateStore,
    limiter: &RateLimiter,
    config: &UploadProcessingConfiguration,
    record: FileRecord,
    declared_crc_hex: &str,
    mut input: R,
    max_pause: Option<Duration>,
) -> Result<(), ProcessError>
where
    R: AsyncRead + Send + Unpin,
{
    let mut file = OpenOptions::new().write(true).open(&record.path).await?;
    file.seek(SeekFrom::Start(record.completion_in_bytes)).await?;

    let mut completion = record.completion_in_bytes;
    let mut crc = CrcAccumulator::new();
    let mut buf = vec![0u8; WRITE_BUFFER_SIZE];
    let mut paused_since: Option<Instant> = None;

    loop {
        if config.is_cancelled() {
            drop(file);
            store.remove(&record.id)?;
            config.reset();
            tracing::info!(file_id = %record.id, "upload cancelled, partial file deleted");
            return Err(ProcessError::Cancelled);
        }

        if config.is_paused() {
            let since = *paused_since.get_or_insert_with(Instant::now);
            if let Some(max) = max_pause {
                if since.elapsed() > max {
                    return Err(ProcessError::PauseTimeout);
                }
            }
            limiter.wait_for_tick().await;
            continue;
        }
        paused_since = None;

        let window = config.allowance().min(buf.len() as i64);
        if window <= 0 {
            limiter.wait_for_tick().await;
            continue;
        }

        // The tick arm makes a stalled read interruptible: every tick the
        // loop re-checks cancel and pause.
        let n = tokio::select! {
            result = input.read(&mut buf[..window as usize]) => match result {
                Ok(n) => n,
                Err(e) => {
                    tracing::warn!(file_id = %record.id, error = %e, "request body failed mid-chunk");
                    return Err(ProcessError::StreamDisconnected(e));
                }
            },
            _ = limiter.wait_for_tick() => continue,
        };

        if n == 0 {
            let computed = crc.finalize();
            if digests_match(&computed.hex, declared_crc_hex) {
                file.sync_all().await?;
                store.update_crced_bytes(&record.id, completion)?;
                if completion == record.original_size {
                    config.reset();
                    tracing::info!(file_id = %record.id, size = completion, "upload complete");
                }
                return Ok(());
            }
            drop(file);
            let safe = store
                .get(&record.id)
                .map(|r| r.crced_bytes)
                .unwrap_or(0);
            store.rollback_to(&record.id, safe)?;
            return Err(ProcessError::InvalidCrc {
                declared: declared_crc_hex.to_string(),
                computed: computed.hex,
            });
        }

        if completion + n as u64 > record.original_size {
            return Err(ProcessError::IncorrectRequest(format!(
                "chunk exceeds announced size of {} bytes",
                record.original_size
            )));
        }

        crc.update(&buf[..n]);
        file.write_all(&buf[..n]).await?;
        completion += n as u64;
        store.update_completion(&record.id, completion)?;
        config.consume(n as u64);
    }
}
