//! Raw dump: video payloads back-to-back in the output file, audio payloads
//! back-to-back in `<output>.pcm`. No timestamps are kept.

use std::io::Write;
use std::path::{Path, PathBuf};

use super::{is_stdout_path, open_sink, pcm_sibling, Muxer, StreamInfo, StreamSpec};
use crate::capture::Packet;
use crate::errors::MuxError;
use crate::types::StreamKind;

pub struct RawMuxer {
    video_path: PathBuf,
    video: Option<Box<dyn Write + Send>>,
    audio: Option<Box<dyn Write + Send>>,
    streams: Vec<StreamInfo>,
    header_written: bool,
}

impl RawMuxer {
    pub fn create(path: &Path) -> Result<Self, MuxError> {
        Ok(Self {
            video_path: path.to_path_buf(),
            video: Some(open_sink(path)?),
            audio: None,
            streams: Vec::new(),
            header_written: false,
        })
    }

    fn has_stream(&self, kind: StreamKind) -> bool {
        self.streams.iter().any(|s| s.kind == kind)
    }
}

impl Muxer for RawMuxer {
    fn add_stream(&mut self, spec: StreamSpec) -> Result<usize, MuxError> {
        if self.header_written {
            return Err(MuxError::StreamRejected(
                "streams cannot be added after the header".to_string(),
            ));
        }
        if self.has_stream(spec.kind) {
            return Err(MuxError::StreamRejected(format!(
                "raw output carries a single {} stream",
                spec.kind
            )));
        }

        if spec.kind == StreamKind::Audio {
            if is_stdout_path(&self.video_path) {
                return Err(MuxError::StreamRejected(
                    "raw output to stdout cannot carry audio, use a file path".to_string(),
                ));
            }
            let audio_path = pcm_sibling(&self.video_path);
            tracing::info!(target: "capture", "[MUXER] Writing raw audio to {:?}", audio_path);
            self.audio = Some(open_sink(&audio_path)?);
        }

        let index = self.streams.len();
        self.streams.push(StreamInfo::from_spec(index, spec));
        Ok(index)
    }

    fn streams(&self) -> &[StreamInfo] {
        &self.streams
    }

    fn write_header(&mut self) -> Result<(), MuxError> {
        if self.header_written {
            return Err(MuxError::HeaderFailed("header already written".to_string()));
        }
        if self.video.is_none() {
            return Err(MuxError::NotOpen);
        }
        // Raw output has no header bytes.
        self.header_written = true;
        Ok(())
    }

    fn write_interleaved_packet(&mut self, packet: &Packet) -> Result<(), MuxError> {
        if !self.header_written {
            return Err(MuxError::NotOpen);
        }
        let stream = self
            .streams
            .get(packet.stream_index())
            .ok_or_else(|| {
                MuxError::StreamRejected(format!("unknown stream #{}", packet.stream_index()))
            })?;

        let sink = match stream.kind {
            StreamKind::Video => self.video.as_mut(),
            StreamKind::Audio => self.audio.as_mut(),
        };
        sink.ok_or(MuxError::NotOpen)?.write_all(packet.payload())?;
        Ok(())
    }

    fn write_trailer(&mut self) -> Result<(), MuxError> {
        if !self.header_written {
            return Err(MuxError::NotOpen);
        }
        for sink in [self.video.as_mut(), self.audio.as_mut()].into_iter().flatten() {
            sink.flush()?;
        }
        Ok(())
    }

    fn close(&mut self) -> Result<(), MuxError> {
        let video = self.video.take().ok_or(MuxError::NotOpen)?;
        for mut sink in [Some(video), self.audio.take()].into_iter().flatten() {
            sink.flush()?;
        }
        Ok(())
    }
}
