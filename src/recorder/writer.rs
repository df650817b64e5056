use std::io;
use std::sync::Arc;
use std::thread::JoinHandle;

use serde::Serialize;

use super::coordinator::TerminationCoordinator;
use super::state::StopReason;
use crate::capture::{Dequeued, PacketQueue};
use crate::errors::MuxError;
use crate::mux::Muxer;
use crate::types::WriteFailurePolicy;

/// RAII guard making sure an abnormal writer exit cannot strand the session.
///
/// On drop, if not marked as completed:
/// 1. Requests a fatal stop so the controller wakes up
/// 2. Aborts the queue so nothing waits on a consumer that is gone
///
/// This runs on panic as well as on early return.
pub struct WriterGuard {
    queue: Arc<PacketQueue>,
    coordinator: Arc<TerminationCoordinator>,
    completed: bool,
}

impl WriterGuard {
    pub fn new(queue: Arc<PacketQueue>, coordinator: Arc<TerminationCoordinator>) -> Self {
        Self {
            queue,
            coordinator,
            completed: false,
        }
    }

    /// Prevents cleanup on drop. Call once the loop has exited normally.
    pub fn mark_completed(&mut self) {
        self.completed = true;
    }
}

impl Drop for WriterGuard {
    fn drop(&mut self) {
        if self.completed {
            return;
        }

        tracing::warn!(target: "capture", "[WRITER] WriterGuard dropping without completion, aborting queue");
        self.coordinator.request_stop(StopReason::Fatal(
            "writer thread exited unexpectedly".to_string(),
        ));
        self.queue.abort();
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WriterStats {
    pub packets_written: u64,
    pub bytes_written: u64,
    pub write_failures: u64,
}

/// Result from the writer thread. The muxer is handed back so the trailer
/// is written by the joining thread.
pub struct WriterOutcome {
    pub muxer: Box<dyn Muxer>,
    pub stats: WriterStats,
    /// Set when the `Abort` policy stopped the loop.
    pub error: Option<MuxError>,
}

/// Spawns a thread that drains `queue` into `muxer` until it sees the flush
/// marker or the queue is aborted.
pub fn spawn_writer_thread(
    queue: Arc<PacketQueue>,
    muxer: Box<dyn Muxer>,
    policy: WriteFailurePolicy,
    coordinator: Arc<TerminationCoordinator>,
) -> io::Result<JoinHandle<WriterOutcome>> {
    std::thread::Builder::new()
        .name("capture-writer".to_string())
        .spawn(move || run_writer(queue, muxer, policy, coordinator))
}

fn run_writer(
    queue: Arc<PacketQueue>,
    mut muxer: Box<dyn Muxer>,
    policy: WriteFailurePolicy,
    coordinator: Arc<TerminationCoordinator>,
) -> WriterOutcome {
    let mut guard = WriterGuard::new(Arc::clone(&queue), Arc::clone(&coordinator));
    let mut stats = WriterStats::default();
    let mut error = None;

    tracing::debug!(target: "capture", "[WRITER] Started ({:?} on write failure)", policy);

    loop {
        let packet = match queue.get(true) {
            Dequeued::Packet(packet) => packet,
            Dequeued::Flush => {
                tracing::info!(target: "capture", "[WRITER] Flush marker reached, queue drained");
                break;
            }
            Dequeued::Aborted => {
                tracing::info!(target: "capture", "[WRITER] Queue aborted, exiting without draining");
                break;
            }
            // Blocking get does not report empty.
            Dequeued::Empty => continue,
        };

        match muxer.write_interleaved_packet(&packet) {
            Ok(()) => {
                stats.packets_written += 1;
                stats.bytes_written += packet.payload_size() as u64;
            }
            Err(e) => {
                stats.write_failures += 1;
                match policy {
                    WriteFailurePolicy::BestEffort => {
                        tracing::warn!(target: "capture",
                            "[WRITER] Failed to write {} packet (pts {}): {}",
                            packet.stream_kind(), packet.pts(), e);
                    }
                    WriteFailurePolicy::Abort => {
                        tracing::error!(target: "capture",
                            "[WRITER] Failed to write {} packet (pts {}), aborting: {}",
                            packet.stream_kind(), packet.pts(), e);
                        coordinator.request_stop(StopReason::Fatal(format!("write failed: {}", e)));
                        error = Some(e);
                        break;
                    }
                }
            }
        }
    }

    guard.mark_completed();
    tracing::info!(target: "capture",
        "[WRITER] Finished: {} packets, {} bytes, {} write failures",
        stats.packets_written, stats.bytes_written, stats.write_failures);

    WriterOutcome {
        muxer,
        stats,
        error,
    }
}
