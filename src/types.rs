use serde::{Deserialize, Serialize};
use std::fmt;

/// Audio sample rate delivered by the capture input, in Hz.
pub const AUDIO_SAMPLE_RATE: u32 = 48_000;

/// Verbose progress is reported every this many video frames.
pub const PROGRESS_INTERVAL_FRAMES: u64 = 25;

pub const BYTES_PER_GIB: u64 = 1024 * 1024 * 1024;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StreamKind {
    Video,
    Audio,
}

impl fmt::Display for StreamKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StreamKind::Video => write!(f, "video"),
            StreamKind::Audio => write!(f, "audio"),
        }
    }
}

/// A rational number, used for time bases and frame rates.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Rational {
    pub num: i64,
    pub den: i64,
}

impl Rational {
    pub const fn new(num: i64, den: i64) -> Self {
        Self { num, den }
    }
}

impl fmt::Display for Rational {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.num, self.den)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(try_from = "u32", into = "u32")]
pub enum AudioChannels {
    #[default]
    Stereo,
    Eight,
    Sixteen,
}

impl AudioChannels {
    pub fn count(&self) -> u32 {
        match self {
            AudioChannels::Stereo => 2,
            AudioChannels::Eight => 8,
            AudioChannels::Sixteen => 16,
        }
    }
}

impl TryFrom<u32> for AudioChannels {
    type Error = String;

    fn try_from(value: u32) -> Result<Self, Self::Error> {
        match value {
            2 => Ok(AudioChannels::Stereo),
            8 => Ok(AudioChannels::Eight),
            16 => Ok(AudioChannels::Sixteen),
            other => Err(format!(
                "Audio channels must be either 2, 8 or 16 (got {})",
                other
            )),
        }
    }
}

impl From<AudioChannels> for u32 {
    fn from(channels: AudioChannels) -> Self {
        channels.count()
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(try_from = "u32", into = "u32")]
pub enum SampleDepth {
    #[default]
    Bits16,
    Bits32,
}

impl SampleDepth {
    pub fn bits(&self) -> u32 {
        match self {
            SampleDepth::Bits16 => 16,
            SampleDepth::Bits32 => 32,
        }
    }

    pub fn bytes(&self) -> usize {
        (self.bits() / 8) as usize
    }
}

impl TryFrom<u32> for SampleDepth {
    type Error = String;

    fn try_from(value: u32) -> Result<Self, Self::Error> {
        match value {
            16 => Ok(SampleDepth::Bits16),
            32 => Ok(SampleDepth::Bits32),
            other => Err(format!(
                "Audio sample depth must be either 16 bits or 32 bits (got {})",
                other
            )),
        }
    }
}

impl From<SampleDepth> for u32 {
    fn from(depth: SampleDepth) -> Self {
        depth.bits()
    }
}

/// What the writer does when the muxer rejects a packet.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum WriteFailurePolicy {
    /// Log, count and keep draining.
    #[default]
    BestEffort,
    /// First failure stops the capture.
    Abort,
}

/// A video input mode: raster size and frame cadence.
///
/// The frame rate is `time_scale / frame_duration` frames per second, so the
/// natural video time base is `frame_duration / time_scale`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DisplayMode {
    pub name: &'static str,
    pub width: u32,
    pub height: u32,
    pub frame_duration: i64,
    pub time_scale: i64,
}

impl DisplayMode {
    pub fn time_base(&self) -> Rational {
        Rational::new(self.frame_duration, self.time_scale)
    }

    pub fn frames_per_second(&self) -> f64 {
        self.time_scale as f64 / self.frame_duration as f64
    }

    /// UYVY 4:2:2 packs two pixels into four bytes.
    pub fn row_bytes(&self) -> usize {
        self.width as usize * 2
    }

    pub fn frame_bytes(&self) -> usize {
        self.row_bytes() * self.height as usize
    }
}

/// Everything the core needs to know about what the device delivers.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct InputFormat {
    pub mode: DisplayMode,
    pub audio_channels: AudioChannels,
    pub sample_depth: SampleDepth,
    pub sample_rate: u32,
}

impl InputFormat {
    /// Bytes occupied by one interleaved audio sample frame.
    pub fn audio_frame_bytes(&self) -> usize {
        self.audio_channels.count() as usize * self.sample_depth.bytes()
    }
}
