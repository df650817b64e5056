//! Capture session lifecycle.
//!
//! `CaptureSession` owns every resource of one run: the device, the output
//! muxer, the packet queue and the termination coordinator. `run` wires them
//! together, blocks until something asks to stop, then tears down in the
//! order the termination state machine dictates.

pub mod coordinator;
pub mod state;
pub mod writer;

pub use coordinator::TerminationCoordinator;
pub use state::{SideEffect, StopReason, TerminationState};
pub use writer::{spawn_writer_thread, WriterGuard, WriterOutcome, WriterStats};

use std::path::Path;
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Instant;

use serde::Serialize;

use crate::capture::{
    CaptureDevice, CaptureLimits, CaptureProducer, CaptureStatsSnapshot, PacketQueue, StreamGuard,
};
use crate::errors::CaptureError;
use crate::mux::{open_output, Muxer, SessionInfo, StreamSpec};
use crate::types::WriteFailurePolicy;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct SessionOptions {
    pub limits: CaptureLimits,
    pub write_policy: WriteFailurePolicy,
    /// Bytes charged per queued packet on top of its payload.
    pub queue_entry_overhead: u64,
}

/// Summary of a finished capture.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CaptureReport {
    pub session: SessionInfo,
    pub stop_reason: StopReason,
    pub elapsed_secs: f64,
    /// Time from the stop request until the writer had drained and exited.
    pub drain_secs: f64,
    pub capture: CaptureStatsSnapshot,
    pub writer: WriterStats,
    /// Packets dropped from the queue by a fatal teardown.
    pub discarded_packets: usize,
}

pub struct CaptureSession {
    info: SessionInfo,
    device: Box<dyn CaptureDevice>,
    muxer: Box<dyn Muxer>,
    queue: Arc<PacketQueue>,
    coordinator: Arc<TerminationCoordinator>,
    options: SessionOptions,
}

impl CaptureSession {
    pub fn new(
        info: SessionInfo,
        device: Box<dyn CaptureDevice>,
        muxer: Box<dyn Muxer>,
        options: SessionOptions,
    ) -> Self {
        Self {
            info,
            device,
            muxer,
            queue: Arc::new(PacketQueue::with_entry_overhead(options.queue_entry_overhead)),
            coordinator: Arc::new(TerminationCoordinator::new()),
            options,
        }
    }

    /// Opens `path` as the output container and builds a session around it.
    pub fn open(
        device: Box<dyn CaptureDevice>,
        path: &Path,
        format_hint: Option<&str>,
        options: SessionOptions,
    ) -> Result<Self, CaptureError> {
        let info = SessionInfo::new();
        let muxer = open_output(path, format_hint, info)?;
        Ok(Self::new(info, device, muxer, options))
    }

    pub fn info(&self) -> SessionInfo {
        self.info
    }

    /// Handle for external stop requests, such as an interrupt handler.
    pub fn coordinator(&self) -> Arc<TerminationCoordinator> {
        Arc::clone(&self.coordinator)
    }

    /// Captures until a stop is requested, then drains and finalizes.
    pub fn run(self) -> Result<CaptureReport, CaptureError> {
        let CaptureSession {
            info,
            mut device,
            mut muxer,
            queue,
            coordinator,
            options,
        } = self;

        let format = device.input_format();
        tracing::info!(target: "capture",
            "[SESSION] Starting session {}: {} {}x{}, {} channels, {} bit audio",
            info.id, format.mode.name, format.mode.width, format.mode.height,
            format.audio_channels.count(), format.sample_depth.bits());

        muxer.add_stream(StreamSpec::video(&format.mode))?;
        muxer.add_stream(StreamSpec::audio(&format))?;
        muxer.write_header()?;

        let producer = CaptureProducer::new(
            Arc::clone(&queue),
            Arc::clone(&coordinator),
            muxer.streams(),
            format,
            options.limits,
        )?;
        let capture_stats = producer.stats();

        let mut writer = Some(
            spawn_writer_thread(
                Arc::clone(&queue),
                muxer,
                options.write_policy,
                Arc::clone(&coordinator),
            )
            .map_err(|e| CaptureError::Fatal(format!("failed to spawn writer thread: {}", e)))?,
        );

        let mut stream = match StreamGuard::start(device.as_mut(), Box::new(producer)) {
            Ok(stream) => Some(stream),
            Err(e) => {
                tracing::error!(target: "capture", "[SESSION] Failed to start device: {}", e);
                queue.abort();
                if let Some(handle) = writer.take() {
                    if let Err(join_error) = join_writer(handle) {
                        tracing::warn!(target: "capture", "[SESSION] {} while releasing writer after device failure", join_error);
                    }
                }
                return Err(e.into());
            }
        };

        let started = Instant::now();
        let reason = coordinator.wait_for_stop();
        tracing::info!(target: "capture", "[SESSION] Stopping after {:.2}s: {}",
            started.elapsed().as_secs_f64(), reason);

        let mut outcome = None;
        let mut discarded_packets = 0;
        let mut teardown_error: Option<CaptureError> = None;

        for effect in coordinator.begin_draining() {
            match effect {
                SideEffect::StopDevice => {
                    if let Some(stream) = stream.take() {
                        if let Err(e) = stream.stop() {
                            tracing::warn!(target: "capture", "[SESSION] Failed to stop device: {}", e);
                            teardown_error.get_or_insert(e.into());
                        }
                    }
                }
                SideEffect::InjectFlush => {
                    tracing::debug!(target: "capture", "[SESSION] Draining {} queued bytes", queue.size());
                    queue.put_flush();
                }
                SideEffect::AbortQueue => {
                    queue.abort();
                    discarded_packets = queue.flush();
                    if discarded_packets > 0 {
                        tracing::warn!(target: "capture", "[SESSION] Discarded {} queued packets", discarded_packets);
                    }
                }
                SideEffect::JoinWriter => {
                    if let Some(handle) = writer.take() {
                        match join_writer(handle) {
                            Ok(result) => outcome = Some(result),
                            Err(e) => {
                                teardown_error.get_or_insert(e);
                            }
                        }
                    }
                }
                SideEffect::NotifyController | SideEffect::FinalizeOutput => {}
            }
        }

        let drain_secs = coordinator
            .state()
            .requested_at()
            .map_or(0.0, |at| at.elapsed().as_secs_f64());
        tracing::info!(target: "capture", "[SESSION] Writer released {:.3}s after stop request", drain_secs);

        let mut writer_stats = WriterStats::default();
        for effect in coordinator.mark_stopped() {
            if effect != SideEffect::FinalizeOutput {
                continue;
            }
            let Some(result) = outcome.take() else {
                continue;
            };

            writer_stats = result.stats;
            if let Some(e) = result.error {
                teardown_error.get_or_insert(e.into());
            }
            if let Err(e) = finalize_output(result.muxer) {
                if reason.is_fatal() {
                    tracing::warn!(target: "capture", "[SESSION] Trailer not written after fatal stop: {}", e);
                } else {
                    teardown_error.get_or_insert(e);
                }
            }
        }

        let report = CaptureReport {
            session: info,
            stop_reason: reason.clone(),
            elapsed_secs: started.elapsed().as_secs_f64(),
            drain_secs,
            capture: capture_stats.snapshot(),
            writer: writer_stats,
            discarded_packets,
        };
        tracing::info!(target: "capture",
            "[SESSION] Stopped: {} video frames, {} audio blocks, {} dropped, {} packets written",
            report.capture.video_frames, report.capture.audio_blocks,
            report.capture.no_signal_frames, report.writer.packets_written);

        if let StopReason::Fatal(msg) = reason {
            return Err(CaptureError::Fatal(msg));
        }
        match teardown_error {
            Some(e) => Err(e),
            None => Ok(report),
        }
    }
}

fn join_writer(handle: JoinHandle<WriterOutcome>) -> Result<WriterOutcome, CaptureError> {
    handle.join().map_err(|_| {
        tracing::error!(target: "capture", "[SESSION] Writer thread panicked");
        CaptureError::WriterPanicked
    })
}

fn finalize_output(mut muxer: Box<dyn Muxer>) -> Result<(), CaptureError> {
    muxer.write_trailer()?;
    muxer.close()?;
    Ok(())
}
