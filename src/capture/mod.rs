pub mod device;
pub mod packet;
pub mod producer;
pub mod queue;

pub use device::{
    AudioInputPacket, CaptureDevice, InputCallback, StreamGuard, TestPatternDevice,
    TestPatternOptions, VideoInputFrame,
};
pub use packet::Packet;
pub use producer::{CaptureLimits, CaptureProducer};
pub use queue::{Dequeued, PacketQueue};

use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};

/// Counters kept by the producer.
///
/// Only the device delivery thread writes them; relaxed atomics let the
/// session read a snapshot once the device has stopped.
#[derive(Debug, Default)]
pub struct CaptureStats {
    video_frames: AtomicU64,
    audio_blocks: AtomicU64,
    no_signal_frames: AtomicU64,
    packets_queued: AtomicU64,
    bytes_queued: AtomicU64,
}

impl CaptureStats {
    pub(crate) fn record_video(&self, no_signal: bool) -> u64 {
        if no_signal {
            self.no_signal_frames.fetch_add(1, Ordering::Relaxed);
        }
        self.video_frames.fetch_add(1, Ordering::Relaxed) + 1
    }

    pub(crate) fn record_audio(&self) {
        self.audio_blocks.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_queued(&self, bytes: usize) {
        self.packets_queued.fetch_add(1, Ordering::Relaxed);
        self.bytes_queued.fetch_add(bytes as u64, Ordering::Relaxed);
    }

    pub fn no_signal_frames(&self) -> u64 {
        self.no_signal_frames.load(Ordering::Relaxed)
    }

    pub fn snapshot(&self) -> CaptureStatsSnapshot {
        CaptureStatsSnapshot {
            video_frames: self.video_frames.load(Ordering::Relaxed),
            audio_blocks: self.audio_blocks.load(Ordering::Relaxed),
            no_signal_frames: self.no_signal_frames.load(Ordering::Relaxed),
            packets_queued: self.packets_queued.load(Ordering::Relaxed),
            bytes_queued: self.bytes_queued.load(Ordering::Relaxed),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CaptureStatsSnapshot {
    pub video_frames: u64,
    pub audio_blocks: u64,
    /// Frames flagged by the device as having no input signal.
    pub no_signal_frames: u64,
    pub packets_queued: u64,
    pub bytes_queued: u64,
}
