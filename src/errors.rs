use thiserror::Error;

/// Errors from the packet queue.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum QueueError {
    #[error("Failed to allocate {0} bytes for a queued packet")]
    Allocation(usize),
}

/// Errors from the capture device.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum DeviceError {
    #[error("Failed to start streams: {0}")]
    StartFailed(String),
    #[error("Failed to stop streams: {0}")]
    StopFailed(String),
    #[error("Invalid display mode {0}")]
    InvalidMode(usize),
    #[error("Device is already streaming")]
    AlreadyStreaming,
}

/// Errors from the output muxer.
#[derive(Error, Debug)]
pub enum MuxError {
    #[error("Output I/O failed: {0}")]
    Io(#[from] std::io::Error),
    #[error("Unable to guess output format for '{0}', please specify it explicitly")]
    UnknownFormat(String),
    #[error("Failed to write header: {0}")]
    HeaderFailed(String),
    #[error("Stream rejected: {0}")]
    StreamRejected(String),
    #[error("Failed to serialize stream table: {0}")]
    Serialize(#[from] serde_json::Error),
    #[error("Output is not open for writing")]
    NotOpen,
    #[error("Output is unusable after an earlier write failure")]
    Broken,
}

/// Top-level error type for capture operations.
#[derive(Error, Debug)]
pub enum CaptureError {
    #[error(transparent)]
    Queue(#[from] QueueError),
    #[error(transparent)]
    Device(#[from] DeviceError),
    #[error(transparent)]
    Mux(#[from] MuxError),
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
    #[error("Device buffer holds {actual} bytes, packet needs {expected}")]
    BufferTooShort { expected: usize, actual: usize },
    #[error("Writer thread panicked")]
    WriterPanicked,
    #[error("Capture aborted: {0}")]
    Fatal(String),
}

impl CaptureError {
    pub fn invalid_config(msg: impl Into<String>) -> Self {
        CaptureError::InvalidConfig(msg.into())
    }

    /// Returns true if the error came from opening or initializing the output.
    pub fn is_output_error(&self) -> bool {
        matches!(self, CaptureError::Mux(_))
    }
}
