use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::{Duration, Instant};

/// Ephemeral control block for one active upload.
///
/// Shared between the scheduler (which assigns allowances once per tick),
/// the worker draining the request body (which consumes them), and external
/// callers toggling `paused`/`cancel`. Everything is atomics or tiny
/// mutex-guarded fields; there is no lock ordering to get wrong.
#[derive(Debug)]
pub struct UploadProcessingConfiguration {
    /// Bytes the worker may still consume this tick. May briefly observe
    /// values <= 0 when a burst overshoots; the scheduler replaces (not
    /// tops up) the value on the next tick.
    allowance: AtomicI64,
    /// What the scheduler handed out at the last tick, for consumption
    /// accounting.
    last_assigned: AtomicI64,
    /// Requested rate override in KB/s. `None` falls back to the default.
    desired_rate_kb: Mutex<Option<u64>>,
    paused: AtomicBool,
    cancel: AtomicBool,
    /// Hard one-processor-per-file guard.
    processing: AtomicBool,
    /// Observed throughput in bytes/second over the previous tick.
    instant_rate_bytes: AtomicU64,
    /// Owner, learned when a worker first picks the upload up. Per-client
    /// aggregation skips entries that have not been claimed yet.
    client_id: Mutex<Option<String>>,
    last_access: Mutex<Instant>,
}

impl Default for UploadProcessingConfiguration {
    fn default() -> Self {
        Self {
            allowance: AtomicI64::new(0),
            last_assigned: AtomicI64::new(0),
            desired_rate_kb: Mutex::new(None),
            paused: AtomicBool::new(false),
            cancel: AtomicBool::new(false),
            processing: AtomicBool::new(false),
            instant_rate_bytes: AtomicU64::new(0),
            client_id: Mutex::new(None),
            last_access: Mutex::new(Instant::now()),
        }
    }
}

impl UploadProcessingConfiguration {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn allowance(&self) -> i64 {
        self.allowance.load(Ordering::Acquire)
    }

    /// Removes `bytes` from the current allowance.
    pub fn consume(&self, bytes: u64) {
        self.allowance.fetch_sub(bytes as i64, Ordering::AcqRel);
    }

    /// Replaces the allowance with this tick's credit. Leftover credit from
    /// the previous tick is discarded to bound burstiness.
    pub(crate) fn assign_allowance(&self, bytes: i64) {
        self.allowance.store(bytes, Ordering::Release);
        self.last_assigned.store(bytes, Ordering::Release);
    }

    /// Folds the previous tick's consumption into `instant_rate_bytes`
    /// (normalized to bytes/second). Called by the scheduler right before
    /// it reassigns allowances.
    pub(crate) fn observe_consumption(&self, tick_ms: u64) {
        let assigned = self.last_assigned.load(Ordering::Acquire);
        let remaining = self.allowance.load(Ordering::Acquire).max(0);
        let consumed = (assigned - remaining).max(0) as u64;
        let per_second = if tick_ms == 0 {
            0
        } else {
            consumed * 1000 / tick_ms
        };
        self.instant_rate_bytes.store(per_second, Ordering::Release);
    }

    pub fn instant_rate_bytes(&self) -> u64 {
        self.instant_rate_bytes.load(Ordering::Acquire)
    }

    pub fn desired_rate_kb(&self) -> Option<u64> {
        *self.desired_rate_kb.lock().unwrap()
    }

    pub fn assign_rate(&self, kb: Option<u64>) {
        *self.desired_rate_kb.lock().unwrap() = kb;
    }

    pub fn is_paused(&self) -> bool {
        self.paused.load(Ordering::Acquire)
    }

    pub fn pause(&self) {
        self.paused.store(true, Ordering::Release);
    }

    pub fn resume(&self) {
        self.paused.store(false, Ordering::Release);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.load(Ordering::Acquire)
    }

    pub fn mark_cancel(&self) {
        self.cancel.store(true, Ordering::Release);
    }

    /// Clears `paused` and `cancel`. The rate override survives a reset.
    pub fn reset(&self) {
        self.paused.store(false, Ordering::Release);
        self.cancel.store(false, Ordering::Release);
    }

    /// Claims the upload for a worker. Returns `false` if another worker
    /// already holds it.
    pub fn try_begin_processing(&self) -> bool {
        self.processing
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    pub fn end_processing(&self) {
        self.processing.store(false, Ordering::Release);
    }

    pub fn is_processing(&self) -> bool {
        self.processing.load(Ordering::Acquire)
    }

    pub fn client_id(&self) -> Option<String> {
        self.client_id.lock().unwrap().clone()
    }

    pub fn set_client_id(&self, client_id: &str) {
        *self.client_id.lock().unwrap() = Some(client_id.to_string());
    }

    pub(crate) fn touch(&self) {
        *self.last_access.lock().unwrap() = Instant::now();
    }

    pub(crate) fn idle_for(&self) -> Duration {
        self.last_access.lock().unwrap().elapsed()
    }
}
