//! Integration tests for the packet queue under concurrent use.
//!
//! One producer thread and one consumer thread share a `PacketQueue`, the
//! same way the device callback and the writer thread do during capture.

use std::sync::Arc;
use std::thread;
use std::time::Duration;

use bmdcapture_lib::mux::{StreamInfo, StreamSpec};
use bmdcapture_lib::recorder::{spawn_writer_thread, TerminationState};
use bmdcapture_lib::types::{StreamKind, WriteFailurePolicy};
use bmdcapture_lib::{
    Dequeued, Muxer, MuxError, Packet, PacketQueue, StopReason, TerminationCoordinator,
};
use crossbeam_channel::RecvTimeoutError;
use rand::Rng;

const JOIN_TIMEOUT: Duration = Duration::from_secs(30);

/// Runs `f` on a thread and waits at most `timeout` for its result.
fn run_bounded<T: Send + 'static>(timeout: Duration, f: impl FnOnce() -> T + Send + 'static) -> T {
    let (tx, rx) = crossbeam_channel::bounded(1);
    thread::spawn(move || {
        let _ = tx.send(f());
    });
    match rx.recv_timeout(timeout) {
        Ok(value) => value,
        Err(RecvTimeoutError::Timeout) => panic!("Timed out after {:?}, likely deadlock", timeout),
        Err(RecvTimeoutError::Disconnected) => panic!("Worker thread panicked"),
    }
}

/// Muxer that only counts what it is given.
#[derive(Default)]
struct CountingMuxer {
    packets: u64,
}

impl Muxer for CountingMuxer {
    fn add_stream(&mut self, _spec: StreamSpec) -> Result<usize, MuxError> {
        Ok(0)
    }
    fn streams(&self) -> &[StreamInfo] {
        &[]
    }
    fn write_header(&mut self) -> Result<(), MuxError> {
        Ok(())
    }
    fn write_interleaved_packet(&mut self, _packet: &Packet) -> Result<(), MuxError> {
        self.packets += 1;
        Ok(())
    }
    fn write_trailer(&mut self) -> Result<(), MuxError> {
        Ok(())
    }
    fn close(&mut self) -> Result<(), MuxError> {
        Ok(())
    }
}

// =============================================================================
// Concurrent stress
// =============================================================================

#[test]
fn test_stress_hundred_thousand_puts_arrive_in_order() {
    const COUNT: i64 = 100_000;

    let queue = Arc::new(PacketQueue::new());

    let consumer_queue = Arc::clone(&queue);
    let consumer = thread::spawn(move || {
        let mut received = 0i64;
        let mut bytes = 0u64;
        loop {
            match consumer_queue.get(true) {
                Dequeued::Packet(packet) => {
                    assert_eq!(packet.pts(), received, "Packet out of order");
                    bytes += packet.payload_size() as u64;
                    received += 1;
                }
                Dequeued::Flush => break,
                other => panic!("Unexpected {:?}", other),
            }
        }
        (received, bytes)
    });

    let producer_queue = Arc::clone(&queue);
    let produced_bytes = run_bounded(JOIN_TIMEOUT, move || {
        let mut rng = rand::thread_rng();
        let mut bytes = 0u64;
        for i in 0..COUNT {
            let size = rng.gen_range(0..=4096);
            let kind = if i % 2 == 0 { StreamKind::Video } else { StreamKind::Audio };
            let packet = Packet::new(kind, (i % 2) as usize, vec![0u8; size])
                .with_timestamps(i, i, 1);
            bytes += size as u64;
            producer_queue.put(packet).unwrap();
        }
        producer_queue.put_flush();
        bytes
    });

    let (received, consumed_bytes) =
        run_bounded(JOIN_TIMEOUT, move || consumer.join().unwrap());

    assert_eq!(received, COUNT);
    assert_eq!(consumed_bytes, produced_bytes);
    assert_eq!(queue.size(), 0);
    assert_eq!(queue.get(false), Dequeued::Flush);
}

#[test]
fn test_size_never_drifts_under_concurrent_drain() {
    let queue = Arc::new(PacketQueue::new());

    let consumer_queue = Arc::clone(&queue);
    let consumer = thread::spawn(move || {
        while let Dequeued::Packet(_) = consumer_queue.get(true) {}
    });

    for i in 0..10_000 {
        queue
            .put(Packet::new(StreamKind::Video, 0, vec![1; (i % 97) as usize]))
            .unwrap();
    }
    queue.put_flush();

    run_bounded(JOIN_TIMEOUT, move || consumer.join().unwrap());
    assert_eq!(queue.size(), 0);
}

// =============================================================================
// Shutdown
// =============================================================================

#[test]
fn test_flush_after_stop_request_releases_writer() {
    let queue = Arc::new(PacketQueue::new());
    let coordinator = Arc::new(TerminationCoordinator::new());

    let writer = spawn_writer_thread(
        Arc::clone(&queue),
        Box::new(CountingMuxer::default()),
        WriteFailurePolicy::BestEffort,
        Arc::clone(&coordinator),
    )
    .unwrap();

    for i in 0..500 {
        queue
            .put(Packet::new(StreamKind::Video, 0, vec![0; 1024]).with_timestamps(i, i, 1))
            .unwrap();
    }

    assert!(coordinator.request_stop(StopReason::FrameLimit { frames: 500 }));
    coordinator.begin_draining();
    queue.put_flush();

    let outcome = run_bounded(JOIN_TIMEOUT, move || writer.join().unwrap());
    assert_eq!(outcome.stats.packets_written, 500);
    assert_eq!(queue.size(), 0);

    coordinator.mark_stopped();
    assert!(matches!(
        coordinator.state(),
        TerminationState::Stopped {
            reason: StopReason::FrameLimit { frames: 500 }
        }
    ));
}

#[test]
fn test_idle_writer_exits_on_flush_marker() {
    let queue = Arc::new(PacketQueue::new());
    let coordinator = Arc::new(TerminationCoordinator::new());

    let writer = spawn_writer_thread(
        Arc::clone(&queue),
        Box::new(CountingMuxer::default()),
        WriteFailurePolicy::BestEffort,
        coordinator,
    )
    .unwrap();

    thread::sleep(Duration::from_millis(20));
    queue.put_flush();

    let outcome = run_bounded(JOIN_TIMEOUT, move || writer.join().unwrap());
    assert_eq!(outcome.stats.packets_written, 0);
}

#[test]
fn test_fatal_teardown_discards_queued_packets() {
    let queue = Arc::new(PacketQueue::new());
    for i in 0..10 {
        queue
            .put(Packet::new(StreamKind::Audio, 1, vec![0; 16]).with_timestamps(i, i, 1))
            .unwrap();
    }

    queue.abort();
    assert_eq!(queue.flush(), 10);
    assert_eq!(queue.size(), 0);
    assert_eq!(queue.get(true), Dequeued::Aborted);
}
