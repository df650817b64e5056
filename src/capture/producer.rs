//! CaptureProducer - the device callback.
//!
//! Runs on the device delivery thread. Copies each arrival into an owned
//! `Packet`, stamps it in its stream's time base and enqueues it. It never
//! blocks beyond the queue lock and never drops an arrival on its own; the
//! only flow control is asking the coordinator to stop.

use std::sync::Arc;

use super::device::{AudioInputPacket, InputCallback, VideoInputFrame};
use super::packet::Packet;
use super::queue::PacketQueue;
use super::CaptureStats;
use crate::errors::CaptureError;
use crate::mux::StreamInfo;
use crate::recorder::{StopReason, TerminationCoordinator};
use crate::types::{InputFormat, Rational, StreamKind, PROGRESS_INTERVAL_FRAMES};

const BYTES_PER_MIB: f64 = 1024.0 * 1024.0;

/// Operator-chosen stop conditions. `None` means unbounded.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct CaptureLimits {
    pub max_frames: Option<u64>,
    pub max_queue_bytes: Option<u64>,
    /// Log a progress line every `PROGRESS_INTERVAL_FRAMES` video frames.
    pub verbose: bool,
}

#[derive(Clone, Copy, Debug)]
struct StreamTarget {
    index: usize,
    time_base: Rational,
}

impl StreamTarget {
    fn find(streams: &[StreamInfo], kind: StreamKind) -> Result<Self, CaptureError> {
        streams
            .iter()
            .find(|s| s.kind == kind)
            .map(|s| Self {
                index: s.index,
                time_base: s.time_base,
            })
            .ok_or_else(|| CaptureError::invalid_config(format!("output has no {} stream", kind)))
    }
}

pub struct CaptureProducer {
    queue: Arc<PacketQueue>,
    coordinator: Arc<TerminationCoordinator>,
    video: StreamTarget,
    audio: StreamTarget,
    format: InputFormat,
    limits: CaptureLimits,
    stats: Arc<CaptureStats>,
    /// Set after a fatal error; later arrivals are ignored.
    failed: bool,
}

impl CaptureProducer {
    /// `streams` must contain one video and one audio stream.
    pub fn new(
        queue: Arc<PacketQueue>,
        coordinator: Arc<TerminationCoordinator>,
        streams: &[StreamInfo],
        format: InputFormat,
        limits: CaptureLimits,
    ) -> Result<Self, CaptureError> {
        Ok(Self {
            queue,
            coordinator,
            video: StreamTarget::find(streams, StreamKind::Video)?,
            audio: StreamTarget::find(streams, StreamKind::Audio)?,
            format,
            limits,
            stats: Arc::new(CaptureStats::default()),
            failed: false,
        })
    }

    pub fn stats(&self) -> Arc<CaptureStats> {
        Arc::clone(&self.stats)
    }

    /// Handles one device tick: the video frame first, then the audio block.
    ///
    /// Termination criteria are evaluated only after a video frame. A tick
    /// that carries audio alone never triggers a stop, so a source without
    /// video runs until interrupted.
    pub fn process(
        &mut self,
        video: Option<&dyn VideoInputFrame>,
        audio: Option<&dyn AudioInputPacket>,
    ) -> Result<(), CaptureError> {
        if let Some(frame) = video {
            let frame_number = self.handle_video(frame)?;
            if let Some(reason) = self.check_termination(frame_number) {
                self.coordinator.request_stop(reason);
            }
        }

        if let Some(block) = audio {
            self.handle_audio(block)?;
        }

        Ok(())
    }

    /// Enqueues one video frame and returns its 1-based frame number.
    fn handle_video(&mut self, frame: &dyn VideoInputFrame) -> Result<u64, CaptureError> {
        let no_signal = frame.has_no_input_source();
        let frame_number = self.stats.record_video(no_signal);

        if no_signal {
            let dropped = self.stats.no_signal_frames();
            tracing::warn!(target: "capture",
                "[PRODUCER] Frame received (#{}) - No input signal detected - Total dropped {}",
                frame_number, dropped);
        }

        let size = frame.row_bytes() * frame.height() as usize;
        let bytes = frame.bytes();
        if bytes.len() < size {
            return Err(CaptureError::BufferTooShort {
                expected: size,
                actual: bytes.len(),
            });
        }

        let tb = self.video.time_base;
        let (time, duration) = frame.stream_time(tb.den);
        let pts = time / tb.num;

        let packet = Packet::copy_from(StreamKind::Video, self.video.index, &bytes[..size])?
            .with_timestamps(pts, pts, duration / tb.num)
            .keyframe(true);
        self.queue.put(packet)?;
        self.stats.record_queued(size);

        if self.progress_due(frame_number) {
            tracing::info!(target: "capture",
                "[PRODUCER] Frame received (#{}) - Valid ({}B) - QSize {:.2} MiB - Dropped {}",
                frame_number, size, self.queue.size() as f64 / BYTES_PER_MIB,
                self.stats.no_signal_frames());
        }

        Ok(frame_number)
    }

    fn handle_audio(&mut self, block: &dyn AudioInputPacket) -> Result<(), CaptureError> {
        self.stats.record_audio();

        let sample_frames = block.sample_frame_count();
        let size = sample_frames * self.format.audio_frame_bytes();
        let bytes = block.bytes();
        if bytes.len() < size {
            return Err(CaptureError::BufferTooShort {
                expected: size,
                actual: bytes.len(),
            });
        }

        let tb = self.audio.time_base;
        let pts = block.packet_time(tb.den) / tb.num;
        let duration = (sample_frames as i128 * tb.den as i128
            / (self.format.sample_rate as i128 * tb.num as i128)) as i64;

        let packet = Packet::copy_from(StreamKind::Audio, self.audio.index, &bytes[..size])?
            .with_timestamps(pts, pts, duration)
            .keyframe(true);
        self.queue.put(packet)?;
        self.stats.record_queued(size);
        Ok(())
    }

    fn progress_due(&self, frame_number: u64) -> bool {
        self.limits.verbose && frame_number % PROGRESS_INTERVAL_FRAMES == 0
    }

    /// Frame count first, then the memory ceiling.
    fn check_termination(&self, frame_number: u64) -> Option<StopReason> {
        if let Some(max_frames) = self.limits.max_frames {
            if frame_number >= max_frames {
                return Some(StopReason::FrameLimit {
                    frames: frame_number,
                });
            }
        }

        if let Some(max_bytes) = self.limits.max_queue_bytes {
            let queued_bytes = self.queue.size();
            if queued_bytes > max_bytes {
                return Some(StopReason::MemoryLimit { queued_bytes });
            }
        }

        None
    }
}

impl InputCallback for CaptureProducer {
    fn frame_arrived(
        &mut self,
        video: Option<&dyn VideoInputFrame>,
        audio: Option<&dyn AudioInputPacket>,
    ) {
        if self.failed {
            return;
        }

        if let Err(e) = self.process(video, audio) {
            self.failed = true;
            tracing::error!(target: "capture", "[PRODUCER] Capture failed: {}", e);
            self.coordinator.request_stop(StopReason::Fatal(e.to_string()));
        }
    }
}
