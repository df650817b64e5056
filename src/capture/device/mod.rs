//! Boundary between the capture core and a capture card.
//!
//! A device delivers arrivals on its own thread by calling the registered
//! `InputCallback`. The callback is registered once per session through
//! `start_streams` and released by `stop_streams`; there is no shared
//! ownership of it.

pub mod test_pattern;

pub use test_pattern::{display_modes, TestPatternDevice, TestPatternOptions};

use crate::errors::DeviceError;
use crate::types::{DisplayMode, InputFormat};

/// A video frame as handed over by the device. Valid only for the duration
/// of the callback.
pub trait VideoInputFrame {
    fn width(&self) -> u32;
    fn height(&self) -> u32;
    fn row_bytes(&self) -> usize;
    fn bytes(&self) -> &[u8];
    /// Frame start time and duration, expressed in units of `1 / time_scale`.
    fn stream_time(&self, time_scale: i64) -> (i64, i64);
    /// Set when the card sees no input signal on its connector.
    fn has_no_input_source(&self) -> bool;
}

/// An audio block as handed over by the device. Valid only for the duration
/// of the callback.
pub trait AudioInputPacket {
    fn sample_frame_count(&self) -> usize;
    fn bytes(&self) -> &[u8];
    /// Block start time, expressed in units of `1 / time_scale`.
    fn packet_time(&self, time_scale: i64) -> i64;
}

/// Receives arrivals on the device's delivery thread.
///
/// Implementations must return quickly: the device drops frames if a
/// callback stalls.
pub trait InputCallback: Send {
    fn frame_arrived(
        &mut self,
        video: Option<&dyn VideoInputFrame>,
        audio: Option<&dyn AudioInputPacket>,
    );

    fn format_changed(&mut self, mode: &DisplayMode) {
        tracing::info!(target: "capture", "[DEVICE] Input format changed to {}", mode.name);
    }
}

pub trait CaptureDevice {
    fn input_format(&self) -> InputFormat;

    /// Begins delivery to `callback`.
    fn start_streams(&mut self, callback: Box<dyn InputCallback>) -> Result<(), DeviceError>;

    /// Ends delivery. When this returns no further callbacks are made and the
    /// callback registered by `start_streams` has been dropped.
    fn stop_streams(&mut self) -> Result<(), DeviceError>;
}

/// Stops the device on drop unless `stop()` was already called.
pub struct StreamGuard<'a> {
    device: &'a mut dyn CaptureDevice,
    stopped: bool,
}

impl<'a> StreamGuard<'a> {
    pub fn start(
        device: &'a mut dyn CaptureDevice,
        callback: Box<dyn InputCallback>,
    ) -> Result<Self, DeviceError> {
        device.start_streams(callback)?;
        Ok(Self {
            device,
            stopped: false,
        })
    }

    pub fn stop(mut self) -> Result<(), DeviceError> {
        self.stopped = true;
        self.device.stop_streams()
    }
}

impl Drop for StreamGuard<'_> {
    fn drop(&mut self) {
        if self.stopped {
            return;
        }

        tracing::warn!(target: "capture", "[DEVICE] StreamGuard dropped while streaming, stopping device");
        if let Err(e) = self.device.stop_streams() {
            tracing::warn!(target: "capture", "[DEVICE] Failed to stop streams: {}", e);
        }
    }
}
