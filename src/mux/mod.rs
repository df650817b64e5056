//! Output containers.
//!
//! The writer thread only sees `dyn Muxer`. Concrete containers are chosen
//! by `open_output` from the output path and an optional format hint.

pub mod framed;
pub mod raw;

pub use framed::{FramedMuxer, FramedReader, FramedRecord};
pub use raw::RawMuxer;

use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::capture::Packet;
use crate::errors::MuxError;
use crate::types::{DisplayMode, InputFormat, Rational, StreamKind};

/// Output paths that mean "write to standard output".
const STDOUT_PATHS: [&str; 2] = ["-", "pipe:1"];

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Codec {
    /// 8-bit 4:2:2, Cb Y0 Cr Y1.
    RawVideoUyvy422,
    PcmS16Le,
    PcmS32Le,
}

#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum StreamParams {
    #[serde(rename_all = "camelCase")]
    Video {
        width: u32,
        height: u32,
        frame_rate: Rational,
    },
    #[serde(rename_all = "camelCase")]
    Audio {
        sample_rate: u32,
        channels: u32,
        bits_per_sample: u32,
    },
}

/// What the caller asks the muxer to create.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct StreamSpec {
    pub kind: StreamKind,
    pub codec: Codec,
    pub time_base: Rational,
    pub params: StreamParams,
}

impl StreamSpec {
    /// Raw UYVY video in the mode's native time base, one tick per frame.
    pub fn video(mode: &DisplayMode) -> Self {
        Self {
            kind: StreamKind::Video,
            codec: Codec::RawVideoUyvy422,
            time_base: mode.time_base(),
            params: StreamParams::Video {
                width: mode.width,
                height: mode.height,
                frame_rate: Rational::new(mode.time_scale, mode.frame_duration),
            },
        }
    }

    /// Interleaved little-endian PCM in a `1 / sample_rate` time base.
    pub fn audio(format: &InputFormat) -> Self {
        let codec = match format.sample_depth.bits() {
            32 => Codec::PcmS32Le,
            _ => Codec::PcmS16Le,
        };
        Self {
            kind: StreamKind::Audio,
            codec,
            time_base: Rational::new(1, format.sample_rate as i64),
            params: StreamParams::Audio {
                sample_rate: format.sample_rate,
                channels: format.audio_channels.count(),
                bits_per_sample: format.sample_depth.bits(),
            },
        }
    }
}

/// A stream as registered with a muxer.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StreamInfo {
    pub index: usize,
    pub kind: StreamKind,
    pub codec: Codec,
    pub time_base: Rational,
    pub params: StreamParams,
}

impl StreamInfo {
    pub fn from_spec(index: usize, spec: StreamSpec) -> Self {
        Self {
            index,
            kind: spec.kind,
            codec: spec.codec,
            time_base: spec.time_base,
            params: spec.params,
        }
    }
}

/// Identity of one capture run, recorded by containers that carry metadata.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionInfo {
    pub id: Uuid,
    pub created_at: DateTime<Utc>,
}

impl SessionInfo {
    pub fn new() -> Self {
        Self {
            id: Uuid::new_v4(),
            created_at: Utc::now(),
        }
    }
}

impl Default for SessionInfo {
    fn default() -> Self {
        Self::new()
    }
}

pub trait Muxer: Send {
    /// Registers a stream and returns its index. Only valid before the header.
    fn add_stream(&mut self, spec: StreamSpec) -> Result<usize, MuxError>;

    fn streams(&self) -> &[StreamInfo];

    fn write_header(&mut self) -> Result<(), MuxError>;

    /// Writes one packet. Packets arrive in capture order across all streams.
    fn write_interleaved_packet(&mut self, packet: &Packet) -> Result<(), MuxError>;

    fn write_trailer(&mut self) -> Result<(), MuxError>;

    /// Flushes and releases the underlying storage.
    fn close(&mut self) -> Result<(), MuxError>;
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum OutputFormat {
    Framed,
    Raw,
}

impl OutputFormat {
    pub fn name(&self) -> &'static str {
        match self {
            OutputFormat::Framed => "bmdc",
            OutputFormat::Raw => "raw",
        }
    }

    fn from_name(name: &str) -> Option<Self> {
        match name.to_ascii_lowercase().as_str() {
            "bmdc" | "framed" => Some(OutputFormat::Framed),
            "raw" | "rawvideo" => Some(OutputFormat::Raw),
            _ => None,
        }
    }

    /// An explicit hint wins; otherwise the extension decides.
    pub fn guess(path: &Path, hint: Option<&str>) -> Result<Self, MuxError> {
        if let Some(hint) = hint {
            return Self::from_name(hint).ok_or_else(|| MuxError::UnknownFormat(hint.to_string()));
        }

        let extension = path
            .extension()
            .and_then(|ext| ext.to_str())
            .map(|ext| ext.to_ascii_lowercase());

        match extension.as_deref() {
            Some("bmdc") => Ok(OutputFormat::Framed),
            Some("uyvy" | "yuv" | "raw") => Ok(OutputFormat::Raw),
            _ => Err(MuxError::UnknownFormat(path.display().to_string())),
        }
    }
}

pub(crate) fn is_stdout_path(path: &Path) -> bool {
    path.to_str()
        .map(|p| STDOUT_PATHS.contains(&p))
        .unwrap_or(false)
}

/// Opens `path` for buffered writing, or stdout for `-` / `pipe:1`.
pub(crate) fn open_sink(path: &Path) -> Result<Box<dyn Write + Send>, MuxError> {
    if is_stdout_path(path) {
        return Ok(Box::new(BufWriter::new(io::stdout())));
    }
    let file = File::create(path)?;
    Ok(Box::new(BufWriter::new(file)))
}

/// Sibling path for raw audio: `<path>.pcm`.
pub(crate) fn pcm_sibling(path: &Path) -> PathBuf {
    let mut name = path.as_os_str().to_os_string();
    name.push(".pcm");
    PathBuf::from(name)
}

/// Opens the output container. Fails if the format cannot be determined or
/// the path cannot be created.
pub fn open_output(
    path: &Path,
    format_hint: Option<&str>,
    session: SessionInfo,
) -> Result<Box<dyn Muxer>, MuxError> {
    let format = OutputFormat::guess(path, format_hint)?;
    tracing::info!(target: "capture", "[MUXER] Opening {:?} as {}", path, format.name());

    match format {
        OutputFormat::Framed => Ok(Box::new(FramedMuxer::create(path, session)?)),
        OutputFormat::Raw => Ok(Box::new(RawMuxer::create(path)?)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{AudioChannels, SampleDepth, AUDIO_SAMPLE_RATE};

    const PAL: DisplayMode = DisplayMode {
        name: "PAL",
        width: 720,
        height: 576,
        frame_duration: 1000,
        time_scale: 25000,
    };

    #[test]
    fn test_guess_from_extension() {
        assert_eq!(
            OutputFormat::guess(Path::new("out.bmdc"), None).unwrap(),
            OutputFormat::Framed
        );
        assert_eq!(
            OutputFormat::guess(Path::new("out.UYVY"), None).unwrap(),
            OutputFormat::Raw
        );
        assert_eq!(
            OutputFormat::guess(Path::new("/tmp/a.yuv"), None).unwrap(),
            OutputFormat::Raw
        );
    }

    #[test]
    fn test_hint_overrides_extension() {
        assert_eq!(
            OutputFormat::guess(Path::new("out.yuv"), Some("bmdc")).unwrap(),
            OutputFormat::Framed
        );
        assert_eq!(
            OutputFormat::guess(Path::new("-"), Some("raw")).unwrap(),
            OutputFormat::Raw
        );
    }

    #[test]
    fn test_unknown_format_is_rejected() {
        assert!(matches!(
            OutputFormat::guess(Path::new("out.mkv"), None),
            Err(MuxError::UnknownFormat(_))
        ));
        assert!(matches!(
            OutputFormat::guess(Path::new("-"), None),
            Err(MuxError::UnknownFormat(_))
        ));
        assert!(matches!(
            OutputFormat::guess(Path::new("out.bmdc"), Some("mp4")),
            Err(MuxError::UnknownFormat(_))
        ));
    }

    #[test]
    fn test_stdout_paths() {
        assert!(is_stdout_path(Path::new("-")));
        assert!(is_stdout_path(Path::new("pipe:1")));
        assert!(!is_stdout_path(Path::new("pipe:2")));
        assert!(!is_stdout_path(Path::new("out.bmdc")));
    }

    #[test]
    fn test_pcm_sibling_appends_extension() {
        assert_eq!(
            pcm_sibling(Path::new("/tmp/capture.uyvy")),
            PathBuf::from("/tmp/capture.uyvy.pcm")
        );
    }

    #[test]
    fn test_stream_specs_follow_input_format() {
        let format = InputFormat {
            mode: PAL,
            audio_channels: AudioChannels::Eight,
            sample_depth: SampleDepth::Bits32,
            sample_rate: AUDIO_SAMPLE_RATE,
        };

        let video = StreamSpec::video(&PAL);
        assert_eq!(video.time_base, Rational::new(1000, 25000));
        assert_eq!(video.codec, Codec::RawVideoUyvy422);

        let audio = StreamSpec::audio(&format);
        assert_eq!(audio.time_base, Rational::new(1, 48_000));
        assert_eq!(audio.codec, Codec::PcmS32Le);
        assert_eq!(
            audio.params,
            StreamParams::Audio {
                sample_rate: 48_000,
                channels: 8,
                bits_per_sample: 32
            }
        );
    }
}
