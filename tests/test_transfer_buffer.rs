//! Transfer buffer handshake tests

use std::sync::Arc;
use std::time::Duration;

use contrast_remediation::core::transfer_buffer::{MAGIC, VERSION};
use contrast_remediation::{TransferBuffer, TransferState};

const POLL: Duration = Duration::from_micros(200);

fn populated(capacity: usize) -> Arc<TransferBuffer> {
    let buffer = Arc::new(TransferBuffer::new(capacity).unwrap());
    buffer
        .populate(
            &[(1, 2), (3, 4), (70_000, 5)],
            &[255, 128, 0],
            &[0, 1, 1],
            &[[10, 20, 30], [200, 100, 50]],
        )
        .unwrap();
    buffer
}

#[test]
fn test_populate_round_trip() {
    let buffer = populated(16);
    let header = buffer.header();

    assert_eq!(header.magic, MAGIC);
    assert_eq!(&header.magic.to_le_bytes(), b"ESDT");
    assert_eq!(header.version, VERSION);
    assert_eq!(header.pixel_count, 3);
    assert_eq!(header.region_count, 2);
    assert_eq!(header.flags, 0);
    for offset in [
        header.coords_offset,
        header.coverage_offset,
        header.region_ids_offset,
        header.colours_offset,
        header.output_offset,
    ] {
        assert_eq!(offset % 4, 0);
    }

    assert_eq!(buffer.read_coords(), vec![(1, 2), (3, 4), (70_000, 5)]);
    assert_eq!(buffer.read_coverage(), vec![255, 128, 0]);
    assert_eq!(buffer.read_region_ids(), vec![0, 1, 1]);
    assert_eq!(buffer.read_colours(), vec![[10, 20, 30], [200, 100, 50]]);
}

#[test]
fn test_capacity_overflow_names_the_capacity() {
    let buffer = populated(3);
    let coords = vec![(0, 0); 4];
    let err = buffer
        .populate(&coords, &[0; 4], &[0; 4], &[[0, 0, 0]])
        .unwrap_err();

    assert_eq!(err.category(), "capacity_overflow");
    let message = err.to_string();
    assert!(message.contains("pixel capacity"), "{message}");
    assert!(message.contains('4') && message.contains('3'), "{message}");

    // Rejected before any write.
    assert_eq!(buffer.read_coords(), vec![(1, 2), (3, 4), (70_000, 5)]);

    let colours = vec![[0u8; 3]; 257];
    let err = buffer.populate(&[], &[], &[], &colours).unwrap_err();
    assert!(err.to_string().contains("region capacity"));
}

#[test]
fn test_mismatched_lengths_rejected() {
    let buffer = TransferBuffer::new(8).unwrap();
    let err = buffer
        .populate(&[(0, 0), (1, 0)], &[1], &[0, 0], &[[0, 0, 0]])
        .unwrap_err();
    assert_eq!(err.category(), "validation");

    let err = buffer
        .populate(&[(0, 0)], &[1], &[3], &[[0, 0, 0]])
        .unwrap_err();
    assert_eq!(err.category(), "validation");
}

#[tokio::test]
async fn test_full_handshake() {
    let buffer = populated(16);
    buffer.submit().unwrap();
    assert_eq!(buffer.state(), TransferState::Ready);
    assert!(buffer.submit().is_err());
    assert_eq!(buffer.read_output().unwrap_err().category(), "state");

    let worker = {
        let buffer = Arc::clone(&buffer);
        tokio::task::spawn_blocking(move || {
            let mut guard = buffer.begin_compute().unwrap();
            let out: Vec<[u8; 3]> = guard
                .coverage()
                .iter()
                .map(|&c| [c, c, c])
                .collect();
            std::thread::sleep(Duration::from_millis(5));
            guard.write_output(&out).unwrap();
            guard.complete();
        })
    };

    buffer
        .wait_for_completion(Duration::from_secs(2), POLL)
        .await
        .unwrap();
    worker.await.unwrap();

    assert_eq!(buffer.state(), TransferState::Complete);
    assert_eq!(
        buffer.read_output().unwrap(),
        vec![[255, 255, 255], [128, 128, 128], [0, 0, 0]]
    );

    buffer.reset().unwrap();
    assert_eq!(buffer.state(), TransferState::Idle);
    assert_eq!(buffer.header().pixel_count, 0);
    assert_eq!(buffer.pixel_capacity(), 16);
}

#[tokio::test]
async fn test_timeout_is_distinct_from_failure() {
    let buffer = populated(16);
    buffer.submit().unwrap();

    let err = buffer
        .wait_for_completion(Duration::from_millis(10), POLL)
        .await
        .unwrap_err();
    assert_eq!(err.category(), "timeout");
    // Still handed to the backend; the orchestrator may not overwrite it.
    assert!(buffer.reset().is_err());

    let guard = buffer.begin_compute().unwrap();
    guard.fail("synthetic");
    let err = buffer
        .wait_for_completion(Duration::from_millis(10), POLL)
        .await
        .unwrap_err();
    assert_eq!(err.category(), "compute_failed");
    assert_eq!(buffer.state(), TransferState::Error);
}

#[tokio::test]
async fn test_dropped_guard_raises_error() {
    let buffer = populated(16);
    buffer.submit().unwrap();
    drop(buffer.begin_compute().unwrap());
    assert_eq!(buffer.state(), TransferState::Error);

    // ERROR is terminal for the frame; a new populate starts over.
    buffer
        .populate(&[(0, 0)], &[255], &[0], &[[0, 0, 0]])
        .unwrap();
    assert_eq!(buffer.state(), TransferState::Idle);
}

#[test]
fn test_populate_after_complete_clears_flags() {
    let buffer = populated(16);
    buffer.submit().unwrap();
    let mut guard = buffer.begin_compute().unwrap();
    guard.write_output(&[[1, 2, 3], [4, 5, 6], [7, 8, 9]]).unwrap();
    guard.complete();
    assert_eq!(buffer.state(), TransferState::Complete);
    assert_eq!(buffer.header().flags, 0x04);

    // The next frame is populated without an explicit reset.
    buffer
        .populate(&[(7, 7)], &[128], &[0], &[[9, 9, 9]])
        .unwrap();
    assert_eq!(buffer.state(), TransferState::Idle);
    assert_eq!(buffer.header().flags, 0);
    assert_eq!(buffer.header().pixel_count, 1);
    assert_eq!(buffer.read_coords(), vec![(7, 7)]);
    buffer.submit().unwrap();
    assert_eq!(buffer.state(), TransferState::Ready);
}

#[tokio::test]
async fn test_wait_without_submit() {
    let buffer = populated(16);
    let err = buffer
        .wait_for_completion(Duration::from_millis(10), POLL)
        .await
        .unwrap_err();
    assert_eq!(err.category(), "state");
}
