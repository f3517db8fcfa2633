//! End-to-end upload scenarios: chunked transfers, CRC failures,
//! disconnect/reconcile/resume, pause windows and rate budgets.

use std::path::PathBuf;
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Duration;

use rand::RngCore;
use tempfile::TempDir;
use tokio::io::{AsyncRead, ReadBuf};

use chunkstream_crc::CrcAccumulator;
use chunkstream_service::{
    oneshot_listener, ProcessError, ServiceSettings, UploadError, UploadService,
};

const TICK: Duration = Duration::from_millis(20);
const WAIT: Duration = Duration::from_secs(5);

fn start_service(dir: &TempDir) -> UploadService {
    let mut settings = ServiceSettings::new(dir.path().join("uploads"));
    settings.tick_period = TICK;
    UploadService::start(settings).unwrap()
}

fn crc_hex(data: &[u8]) -> String {
    let mut acc = CrcAccumulator::new();
    acc.update(data);
    acc.finalize().hex
}

fn random_bytes(len: usize) -> Vec<u8> {
    let mut data = vec![0u8; len];
    rand::thread_rng().fill_bytes(&mut data);
    data
}

/// Where the service puts the data file for `file_id`.
fn data_path(dir: &TempDir, client_id: &str, file_id: &str) -> PathBuf {
    dir.path().join("uploads").join(client_id).join(file_id)
}

/// Pushes one chunk and awaits its outcome.
async fn push_chunk(
    service: &UploadService,
    file_id: &str,
    data: &[u8],
) -> Result<(), ProcessError> {
    push_chunk_with_crc(service, file_id, &crc_hex(data), data).await
}

async fn push_chunk_with_crc(
    service: &UploadService,
    file_id: &str,
    declared_crc: &str,
    data: &[u8],
) -> Result<(), ProcessError> {
    let (listener, rx) = oneshot_listener();
    service
        .process(file_id, declared_crc, std::io::Cursor::new(data.to_vec()), listener)
        .unwrap();
    tokio::time::timeout(WAIT, rx)
        .await
        .expect("listener should fire within the timeout")
        .expect("listener must not be dropped")
}

/// Serves bytes until `fail_at`, then fails like a dropped connection.
struct FailingReader {
    data: Vec<u8>,
    pos: usize,
    fail_at: usize,
}

impl FailingReader {
    fn new(data: Vec<u8>, fail_at: usize) -> Self {
        Self {
            data,
            pos: 0,
            fail_at,
        }
    }
}

impl AsyncRead for FailingReader {
    fn poll_read(
        self: Pin<&mut Self>,
        _cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<std::io::Result<()>> {
        let this = self.get_mut();
        if this.pos >= this.fail_at {
            return Poll::Ready(Err(std::io::Error::new(
                std::io::ErrorKind::BrokenPipe,
                "stream ended unexpectedly",
            )));
        }
        let end = this.data.len().min(this.fail_at);
        let n = buf.remaining().min(end - this.pos);
        buf.put_slice(&this.data[this.pos..this.pos + n]);
        this.pos += n;
        Poll::Ready(Ok(()))
    }
}

#[tokio::test]
async fn invalid_crc_on_first_chunk() {
    let dir = TempDir::new().unwrap();
    let service = start_service(&dir);

    let content: Vec<u8> = (0..9u8).collect();
    let file_id = service.prepare_upload("c1", 9, "archive.part").unwrap();

    let outcome = push_chunk_with_crc(&service, &file_id, "lala", &content[0..3]).await;
    assert!(matches!(outcome, Err(ProcessError::InvalidCrc { .. })));

    let state = service.file_state(&file_id).unwrap();
    assert_eq!(state.crced_bytes, 0);
    assert_eq!(state.completion_in_bytes, 0);
    assert_eq!(
        std::fs::metadata(data_path(&dir, "c1", &file_id)).unwrap().len(),
        0
    );
    service.shutdown();
}

#[tokio::test]
async fn sequential_three_chunk_upload() {
    let dir = TempDir::new().unwrap();
    let service = start_service(&dir);

    let content: Vec<u8> = (0..9u8).collect();
    let file_id = service.prepare_upload("c1", 9, "archive.part").unwrap();
    assert_eq!(service.get_progress(&file_id).unwrap(), 0.0);

    let expected_progress = [100.0 * 3.0 / 9.0, 100.0 * 5.0 / 9.0, 100.0];
    for (part, expected) in [&content[0..3], &content[3..5], &content[5..9]]
        .iter()
        .zip(expected_progress)
    {
        push_chunk(&service, &file_id, part).await.unwrap();
        let progress = service.get_progress(&file_id).unwrap();
        assert!(
            (progress - expected).abs() < 0.01,
            "expected progress {expected}, got {progress}"
        );
    }

    let on_disk = std::fs::read(data_path(&dir, "c1", &file_id)).unwrap();
    assert_eq!(on_disk, content);
    service.shutdown();
}

#[tokio::test]
async fn stream_disconnection_reconcile_and_resume() {
    let dir = TempDir::new().unwrap();
    let service = start_service(&dir);

    let content = random_bytes(96 * 1024);
    let file_id = service
        .prepare_upload("c1", content.len() as u64, "big.bin")
        .unwrap();

    // The whole file in one chunk, but the stream dies partway through.
    let (listener, rx) = oneshot_listener();
    service
        .process(
            &file_id,
            &crc_hex(&content),
            FailingReader::new(content.clone(), 64 * 1024),
            listener,
        )
        .unwrap();
    let outcome = tokio::time::timeout(WAIT, rx).await.unwrap().unwrap();
    assert!(matches!(outcome, Err(ProcessError::StreamDisconnected(_))));

    let state = service.file_state(&file_id).unwrap();
    assert!(state.crced_bytes < state.completion_in_bytes);
    let (crced, completion) = (state.crced_bytes as usize, state.completion_in_bytes as usize);

    // Reconcile the gap with the client's copy of those bytes.
    service
        .verify_crc_of_unchecked_part(&file_id, std::io::Cursor::new(content[crced..completion].to_vec()))
        .await
        .unwrap();
    let state = service.file_state(&file_id).unwrap();
    assert_eq!(state.crced_bytes as usize, completion);

    // Resume from where the server got to.
    push_chunk(&service, &file_id, &content[completion..])
        .await
        .unwrap();
    assert_eq!(service.get_progress(&file_id).unwrap(), 100.0);

    let on_disk = std::fs::read(data_path(&dir, "c1", &file_id)).unwrap();
    assert_eq!(crc_hex(&on_disk), crc_hex(&content));
    service.shutdown();
}

#[tokio::test]
async fn tampered_reconcile_truncates_back() {
    let dir = TempDir::new().unwrap();
    let service = start_service(&dir);

    let content = random_bytes(96 * 1024);
    let file_id = service
        .prepare_upload("c1", content.len() as u64, "big.bin")
        .unwrap();

    let (listener, rx) = oneshot_listener();
    service
        .process(
            &file_id,
            &crc_hex(&content),
            FailingReader::new(content.clone(), 64 * 1024),
            listener,
        )
        .unwrap();
    let outcome = tokio::time::timeout(WAIT, rx).await.unwrap().unwrap();
    assert!(matches!(outcome, Err(ProcessError::StreamDisconnected(_))));

    let state = service.file_state(&file_id).unwrap();
    let (crced, completion) = (state.crced_bytes as usize, state.completion_in_bytes as usize);
    assert!(crced < completion);

    // Supply ten bytes short of the real gap: the digests cannot match.
    let outcome = service
        .verify_crc_of_unchecked_part(
            &file_id,
            std::io::Cursor::new(content[crced..completion - 10].to_vec()),
        )
        .await;
    assert!(matches!(outcome, Err(UploadError::InvalidCrc)));

    // Everything unvalidated was thrown away.
    let state = service.file_state(&file_id).unwrap();
    assert_eq!(state.completion_in_bytes as usize, crced);
    assert_eq!(state.crced_bytes as usize, crced);
    assert_eq!(
        std::fs::metadata(data_path(&dir, "c1", &file_id)).unwrap().len() as usize,
        crced
    );
    service.shutdown();
}

#[tokio::test]
async fn pause_holds_disk_length_then_completes() {
    let dir = TempDir::new().unwrap();
    let service = start_service(&dir);

    const SLICE: usize = 64 * 1024;
    let content = random_bytes(8 * SLICE);
    let file_id = service
        .prepare_upload("c1", content.len() as u64, "big.bin")
        .unwrap();
    service.set_upload_rate(&file_id, 102_400).unwrap();

    let path = data_path(&dir, "c1", &file_id);
    for (i, slice) in content.chunks(SLICE).enumerate() {
        if i == 4 {
            service.pause_file(&file_id).unwrap();
            let length = std::fs::metadata(&path).unwrap().len();

            // Kick off the next chunk while paused; nothing may land.
            let (listener, rx) = oneshot_listener();
            service
                .process(
                    &file_id,
                    &crc_hex(slice),
                    std::io::Cursor::new(slice.to_vec()),
                    listener,
                )
                .unwrap();
            tokio::time::sleep(Duration::from_millis(200)).await;
            assert_eq!(std::fs::metadata(&path).unwrap().len(), length);

            service.resume_file(&file_id).unwrap();
            tokio::time::timeout(WAIT, rx).await.unwrap().unwrap().unwrap();
            continue;
        }
        push_chunk(&service, &file_id, slice).await.unwrap();
    }

    assert_eq!(service.get_progress(&file_id).unwrap(), 100.0);
    let on_disk = std::fs::read(&path).unwrap();
    assert_eq!(crc_hex(&on_disk), crc_hex(&content));
    service.shutdown();
}

#[tokio::test]
async fn concurrent_uploads_respect_rate_budgets() {
    let dir = TempDir::new().unwrap();
    let service = std::sync::Arc::new(start_service(&dir));

    const SIZE: usize = 192 * 1024;
    let content_a = random_bytes(SIZE);
    let content_b = random_bytes(SIZE);
    let id_a = service.prepare_upload("c1", SIZE as u64, "a.bin").unwrap();
    let id_b = service.prepare_upload("c2", SIZE as u64, "b.bin").unwrap();

    let (listener_a, rx_a) = oneshot_listener();
    service
        .process(&id_a, &crc_hex(&content_a), std::io::Cursor::new(content_a.clone()), listener_a)
        .unwrap();
    let (listener_b, rx_b) = oneshot_listener();
    service
        .process(&id_b, &crc_hex(&content_b), std::io::Cursor::new(content_b.clone()), listener_b)
        .unwrap();

    // Default budget: 1024 KB/s per request. Sample observed rates while
    // the transfers run; allow generous slack for tick jitter.
    let per_request_budget = 1024 * 1024;
    let budget_with_slack = per_request_budget * 2;
    let sampler = {
        let service = std::sync::Arc::clone(&service);
        let (id_a, id_b) = (id_a.clone(), id_b.clone());
        tokio::spawn(async move {
            for _ in 0..6 {
                tokio::time::sleep(TICK * 2).await;
                for id in [&id_a, &id_b] {
                    let rate = service.upload_rate(id);
                    assert!(
                        rate <= budget_with_slack,
                        "instant rate {rate} exceeds per-request budget"
                    );
                }
            }
        })
    };

    tokio::time::timeout(WAIT, rx_a).await.unwrap().unwrap().unwrap();
    tokio::time::timeout(WAIT, rx_b).await.unwrap().unwrap().unwrap();
    sampler.await.unwrap();

    // Rate limiting actually throttled: 192 KiB at ~1 MB/s cannot finish
    // instantly, so both files must be complete and intact.
    for (id, client, content) in [(&id_a, "c1", &content_a), (&id_b, "c2", &content_b)] {
        assert_eq!(service.get_progress(id).unwrap(), 100.0);
        let on_disk = std::fs::read(data_path(&dir, client, id)).unwrap();
        assert_eq!(&on_disk, content);
    }
    service.shutdown();
}

#[tokio::test]
async fn cancel_mid_upload_is_terminal() {
    let dir = TempDir::new().unwrap();
    let service = start_service(&dir);

    let content = random_bytes(256 * 1024);
    let file_id = service
        .prepare_upload("c1", content.len() as u64, "doomed.bin")
        .unwrap();
    // Keep the transfer slow enough to cancel mid-flight.
    service.set_upload_rate(&file_id, 64).unwrap();

    let (listener, rx) = oneshot_listener();
    service
        .process(
            &file_id,
            &crc_hex(&content),
            std::io::Cursor::new(content),
            listener,
        )
        .unwrap();

    tokio::time::sleep(TICK * 3).await;
    service.cancel_file(&file_id).unwrap();

    let outcome = tokio::time::timeout(WAIT, rx).await.unwrap().unwrap();
    assert!(matches!(outcome, Err(ProcessError::Cancelled)));
    assert!(matches!(
        service.get_progress(&file_id),
        Err(UploadError::IncorrectRequest(_))
    ));
    assert!(std::fs::metadata(data_path(&dir, "c1", &file_id)).is_err());
    service.shutdown();
}

#[tokio::test]
async fn progress_survives_restart() {
    let dir = TempDir::new().unwrap();
    let content = random_bytes(32 * 1024);

    let file_id = {
        let service = start_service(&dir);
        let file_id = service
            .prepare_upload("c1", (content.len() * 2) as u64, "half.bin")
            .unwrap();
        push_chunk(&service, &file_id, &content).await.unwrap();
        service.shutdown();
        file_id
    };

    let service = start_service(&dir);
    let state = service.file_state(&file_id).unwrap();
    assert_eq!(state.crced_bytes as usize, content.len());
    assert_eq!(state.completion_in_bytes as usize, content.len());
    assert_eq!(state.original_name, "half.bin");

    // And the upload can finish after the restart.
    push_chunk(&service, &file_id, &content).await.unwrap();
    assert_eq!(service.get_progress(&file_id).unwrap(), 100.0);
    service.shutdown();
}
