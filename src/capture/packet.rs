use crate::errors::QueueError;
use crate::types::StreamKind;

/// One timestamped unit of captured media: a video frame or an audio block.
///
/// The payload is owned and never shared. A packet is moved from the producer
/// into the queue, out to the writer and finally into the muxer; it is not
/// `Clone`, so there is exactly one owner at every step.
#[derive(Debug, PartialEq, Eq)]
pub struct Packet {
    stream_kind: StreamKind,
    stream_index: usize,
    payload: Vec<u8>,
    pts: i64,
    dts: i64,
    duration: i64,
    is_keyframe: bool,
}

impl Packet {
    pub fn new(stream_kind: StreamKind, stream_index: usize, payload: Vec<u8>) -> Self {
        Self {
            stream_kind,
            stream_index,
            payload,
            pts: 0,
            dts: 0,
            duration: 0,
            is_keyframe: false,
        }
    }

    /// Duplicates device-owned memory into a new packet.
    ///
    /// The device reclaims `bytes` as soon as its callback returns, so the copy
    /// is the only valid owner afterwards. Allocation is fallible: running out
    /// of memory surfaces as `QueueError::Allocation` instead of aborting.
    pub fn copy_from(
        stream_kind: StreamKind,
        stream_index: usize,
        bytes: &[u8],
    ) -> Result<Self, QueueError> {
        let mut payload = Vec::new();
        payload
            .try_reserve_exact(bytes.len())
            .map_err(|_| QueueError::Allocation(bytes.len()))?;
        payload.extend_from_slice(bytes);
        Ok(Self::new(stream_kind, stream_index, payload))
    }

    pub fn with_timestamps(mut self, pts: i64, dts: i64, duration: i64) -> Self {
        self.pts = pts;
        self.dts = dts;
        self.duration = duration;
        self
    }

    pub fn keyframe(mut self, is_keyframe: bool) -> Self {
        self.is_keyframe = is_keyframe;
        self
    }

    pub fn stream_kind(&self) -> StreamKind {
        self.stream_kind
    }

    pub fn stream_index(&self) -> usize {
        self.stream_index
    }

    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    pub fn payload_size(&self) -> usize {
        self.payload.len()
    }

    pub fn pts(&self) -> i64 {
        self.pts
    }

    pub fn dts(&self) -> i64 {
        self.dts
    }

    pub fn duration(&self) -> i64 {
        self.duration
    }

    pub fn is_keyframe(&self) -> bool {
        self.is_keyframe
    }

    pub fn into_payload(self) -> Vec<u8> {
        self.payload
    }
}
