//! Queued capture pipeline: a device callback enqueues timestamped packets,
//! a writer thread drains them into a container, and a termination
//! coordinator decides when to stop and tears everything down in order.

pub mod capture;
pub mod errors;
pub mod logging;
pub mod mux;
pub mod recorder;
pub mod settings;
pub mod shared;
pub mod types;

pub use capture::{
    CaptureDevice, CaptureLimits, CaptureProducer, Dequeued, Packet, PacketQueue,
    TestPatternDevice, TestPatternOptions,
};
pub use errors::{CaptureError, DeviceError, MuxError, QueueError};
pub use mux::{open_output, Muxer, OutputFormat, SessionInfo};
pub use recorder::{
    CaptureReport, CaptureSession, SessionOptions, StopReason, TerminationCoordinator,
};
