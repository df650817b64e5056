//! The `bmdc` container: a self-describing interleaved packet stream.
//!
//! ```text
//! "BMDCAP01"
//! u32 header_len, header JSON { session, streams }
//! repeated: u16 stream, u16 flags, i64 pts, i64 dts, i64 duration, u32 len, payload
//! end:      u16 0xFFFF, u16 0, i64 0, i64 0, i64 0, u32 len, trailer JSON
//! ```
//!
//! All integers are little-endian.

use std::io::{self, Read, Write};
use std::path::Path;

use serde::{Deserialize, Serialize};

use super::{open_sink, Muxer, SessionInfo, StreamInfo, StreamSpec};
use crate::capture::Packet;
use crate::errors::MuxError;

pub const MAGIC: &[u8; 8] = b"BMDCAP01";

const END_OF_STREAM: u16 = u16::MAX;
const FLAG_KEYFRAME: u16 = 0x0001;
const RECORD_HEADER_LEN: usize = 2 + 2 + 8 + 8 + 8 + 4;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FramedHeader {
    pub session: SessionInfo,
    pub streams: Vec<StreamInfo>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FramedTrailer {
    /// Indexed by stream.
    pub packet_counts: Vec<u64>,
    pub payload_bytes: u64,
}

pub struct FramedMuxer {
    sink: Option<Box<dyn Write + Send>>,
    session: SessionInfo,
    streams: Vec<StreamInfo>,
    packet_counts: Vec<u64>,
    payload_bytes: u64,
    header_written: bool,
    trailer_written: bool,
    /// Set once a sink write fails. Nothing more is appended after that, so
    /// the output stays a readable prefix.
    broken: bool,
}

impl FramedMuxer {
    pub fn create(path: &Path, session: SessionInfo) -> Result<Self, MuxError> {
        Ok(Self::from_writer(open_sink(path)?, session))
    }

    pub fn from_writer(sink: Box<dyn Write + Send>, session: SessionInfo) -> Self {
        Self {
            sink: Some(sink),
            session,
            streams: Vec::new(),
            packet_counts: Vec::new(),
            payload_bytes: 0,
            header_written: false,
            trailer_written: false,
            broken: false,
        }
    }

    fn sink(&mut self) -> Result<&mut Box<dyn Write + Send>, MuxError> {
        self.sink.as_mut().ok_or(MuxError::NotOpen)
    }

    /// Writes `bytes` in one call, marking the output broken on failure.
    fn append(&mut self, bytes: &[u8]) -> Result<(), MuxError> {
        if self.broken {
            return Err(MuxError::Broken);
        }
        if let Err(e) = self.sink()?.write_all(bytes) {
            self.broken = true;
            tracing::error!(target: "capture", "[MUXER] Write failed, no further records will be appended: {}", e);
            return Err(e.into());
        }
        Ok(())
    }

    fn write_record(
        &mut self,
        stream: u16,
        flags: u16,
        timestamps: [i64; 3],
        payload: &[u8],
    ) -> Result<(), MuxError> {
        let len = u32::try_from(payload.len()).map_err(|_| {
            MuxError::StreamRejected(format!("packet of {} bytes is too large", payload.len()))
        })?;

        let mut record = Vec::with_capacity(RECORD_HEADER_LEN + payload.len());
        record.extend_from_slice(&stream.to_le_bytes());
        record.extend_from_slice(&flags.to_le_bytes());
        for timestamp in timestamps {
            record.extend_from_slice(&timestamp.to_le_bytes());
        }
        record.extend_from_slice(&len.to_le_bytes());
        record.extend_from_slice(payload);

        self.append(&record)
    }
}

impl Muxer for FramedMuxer {
    fn add_stream(&mut self, spec: StreamSpec) -> Result<usize, MuxError> {
        if self.header_written {
            return Err(MuxError::StreamRejected(
                "streams cannot be added after the header".to_string(),
            ));
        }
        let index = self.streams.len();
        if index >= END_OF_STREAM as usize {
            return Err(MuxError::StreamRejected("too many streams".to_string()));
        }

        self.streams.push(StreamInfo::from_spec(index, spec));
        self.packet_counts.push(0);
        tracing::debug!(target: "capture", "[MUXER] Added {} stream #{} ({:?}, tb {})",
            spec.kind, index, spec.codec, spec.time_base);
        Ok(index)
    }

    fn streams(&self) -> &[StreamInfo] {
        &self.streams
    }

    fn write_header(&mut self) -> Result<(), MuxError> {
        if self.header_written {
            return Err(MuxError::HeaderFailed("header already written".to_string()));
        }
        if self.streams.is_empty() {
            return Err(MuxError::HeaderFailed("no streams registered".to_string()));
        }

        let header = FramedHeader {
            session: self.session,
            streams: self.streams.clone(),
        };
        let json = serde_json::to_vec(&header)?;
        let len = u32::try_from(json.len())
            .map_err(|_| MuxError::HeaderFailed("stream table too large".to_string()))?;

        let mut prelude = Vec::with_capacity(MAGIC.len() + 4 + json.len());
        prelude.extend_from_slice(MAGIC);
        prelude.extend_from_slice(&len.to_le_bytes());
        prelude.extend_from_slice(&json);
        self.append(&prelude)?;

        self.header_written = true;
        tracing::info!(target: "capture", "[MUXER] Header written, {} streams, session {}",
            self.streams.len(), self.session.id);
        Ok(())
    }

    fn write_interleaved_packet(&mut self, packet: &Packet) -> Result<(), MuxError> {
        if !self.header_written || self.trailer_written {
            return Err(MuxError::NotOpen);
        }
        let index = packet.stream_index();
        if index >= self.streams.len() {
            return Err(MuxError::StreamRejected(format!("unknown stream #{}", index)));
        }

        let flags = if packet.is_keyframe() { FLAG_KEYFRAME } else { 0 };
        self.write_record(
            index as u16,
            flags,
            [packet.pts(), packet.dts(), packet.duration()],
            packet.payload(),
        )?;

        self.packet_counts[index] += 1;
        self.payload_bytes += packet.payload_size() as u64;
        Ok(())
    }

    fn write_trailer(&mut self) -> Result<(), MuxError> {
        if !self.header_written || self.trailer_written {
            return Err(MuxError::NotOpen);
        }

        let trailer = FramedTrailer {
            packet_counts: self.packet_counts.clone(),
            payload_bytes: self.payload_bytes,
        };
        let json = serde_json::to_vec(&trailer)?;
        self.write_record(END_OF_STREAM, 0, [0, 0, 0], &json)?;
        self.sink()?.flush()?;

        self.trailer_written = true;
        tracing::info!(target: "capture", "[MUXER] Trailer written: packets per stream {:?}",
            trailer.packet_counts);
        Ok(())
    }

    fn close(&mut self) -> Result<(), MuxError> {
        match self.sink.take() {
            Some(mut sink) => {
                sink.flush()?;
                Ok(())
            }
            None => Err(MuxError::NotOpen),
        }
    }
}

#[derive(Debug, PartialEq, Eq)]
pub enum FramedRecord {
    Packet {
        stream_index: usize,
        is_keyframe: bool,
        pts: i64,
        dts: i64,
        duration: i64,
        payload: Vec<u8>,
    },
    End(FramedTrailer),
}

/// Reads back a `bmdc` stream.
pub struct FramedReader<R: Read> {
    reader: R,
    header: FramedHeader,
    finished: bool,
}

impl<R: Read> FramedReader<R> {
    pub fn new(mut reader: R) -> Result<Self, MuxError> {
        let mut magic = [0u8; 8];
        reader.read_exact(&mut magic)?;
        if &magic != MAGIC {
            return Err(MuxError::HeaderFailed("not a bmdc stream".to_string()));
        }

        let mut len = [0u8; 4];
        reader.read_exact(&mut len)?;
        let json = read_len(&mut reader, u32::from_le_bytes(len))?;
        let header = serde_json::from_slice(&json)?;

        Ok(Self {
            reader,
            header,
            finished: false,
        })
    }

    pub fn header(&self) -> &FramedHeader {
        &self.header
    }

    /// Returns the next record, or `None` once the end marker has been read
    /// or the stream ends cleanly on a record boundary without one.
    pub fn next_record(&mut self) -> Result<Option<FramedRecord>, MuxError> {
        if self.finished {
            return Ok(None);
        }

        let mut header = [0u8; RECORD_HEADER_LEN];
        if !read_or_eof(&mut self.reader, &mut header)? {
            self.finished = true;
            return Ok(None);
        }

        let stream = u16::from_le_bytes([header[0], header[1]]);
        let flags = u16::from_le_bytes([header[2], header[3]]);
        let field = |at: usize| {
            let mut bytes = [0u8; 8];
            bytes.copy_from_slice(&header[at..at + 8]);
            i64::from_le_bytes(bytes)
        };
        let (pts, dts, duration) = (field(4), field(12), field(20));
        let len = u32::from_le_bytes([header[28], header[29], header[30], header[31]]);
        let payload = read_len(&mut self.reader, len)?;

        if stream == END_OF_STREAM {
            self.finished = true;
            return Ok(Some(FramedRecord::End(serde_json::from_slice(&payload)?)));
        }

        Ok(Some(FramedRecord::Packet {
            stream_index: stream as usize,
            is_keyframe: flags & FLAG_KEYFRAME != 0,
            pts,
            dts,
            duration,
            payload,
        }))
    }
}

/// Reads exactly `len` bytes. The buffer grows with the data actually
/// present, so a corrupt length cannot force a huge allocation up front.
fn read_len<R: Read>(reader: &mut R, len: u32) -> Result<Vec<u8>, MuxError> {
    let mut buf = Vec::new();
    Read::take(&mut *reader, u64::from(len)).read_to_end(&mut buf)?;
    if buf.len() != len as usize {
        return Err(io::Error::from(io::ErrorKind::UnexpectedEof).into());
    }
    Ok(buf)
}

/// Fills `buf`, returning false if the reader was already at EOF.
fn read_or_eof<R: Read>(reader: &mut R, buf: &mut [u8]) -> Result<bool, MuxError> {
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]) {
            Ok(0) if filled == 0 => return Ok(false),
            Ok(0) => return Err(io::Error::from(io::ErrorKind::UnexpectedEof).into()),
            Ok(n) => filled += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e.into()),
        }
    }
    Ok(true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{AudioChannels, DisplayMode, InputFormat, SampleDepth, StreamKind};
    use std::fs::File;
    use std::io::BufReader;
    use std::sync::{Arc, Mutex};
    use tempfile::TempDir;

    const NTSC: DisplayMode = DisplayMode {
        name: "NTSC",
        width: 720,
        height: 486,
        frame_duration: 1001,
        time_scale: 30000,
    };

    fn format() -> InputFormat {
        InputFormat {
            mode: NTSC,
            audio_channels: AudioChannels::Stereo,
            sample_depth: SampleDepth::Bits16,
            sample_rate: 48_000,
        }
    }

    fn open_with_streams(path: &Path) -> FramedMuxer {
        let mut muxer = FramedMuxer::create(path, SessionInfo::new()).unwrap();
        assert_eq!(muxer.add_stream(StreamSpec::video(&NTSC)).unwrap(), 0);
        assert_eq!(muxer.add_stream(StreamSpec::audio(&format())).unwrap(), 1);
        muxer
    }

    #[test]
    fn test_write_and_read_back() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("out.bmdc");

        let mut muxer = open_with_streams(&path);
        muxer.write_header().unwrap();
        muxer
            .write_interleaved_packet(
                &Packet::new(StreamKind::Video, 0, vec![1, 2, 3])
                    .with_timestamps(0, 0, 1)
                    .keyframe(true),
            )
            .unwrap();
        muxer
            .write_interleaved_packet(
                &Packet::new(StreamKind::Audio, 1, vec![9; 8]).with_timestamps(0, 0, 2),
            )
            .unwrap();
        muxer.write_trailer().unwrap();
        muxer.close().unwrap();

        let mut reader = FramedReader::new(BufReader::new(File::open(&path).unwrap())).unwrap();
        assert_eq!(reader.header().streams.len(), 2);
        assert_eq!(reader.header().streams[0].kind, StreamKind::Video);

        assert_eq!(
            reader.next_record().unwrap(),
            Some(FramedRecord::Packet {
                stream_index: 0,
                is_keyframe: true,
                pts: 0,
                dts: 0,
                duration: 1,
                payload: vec![1, 2, 3],
            })
        );
        assert!(matches!(
            reader.next_record().unwrap(),
            Some(FramedRecord::Packet { stream_index: 1, is_keyframe: false, .. })
        ));
        assert_eq!(
            reader.next_record().unwrap(),
            Some(FramedRecord::End(FramedTrailer {
                packet_counts: vec![1, 1],
                payload_bytes: 11,
            }))
        );
        assert_eq!(reader.next_record().unwrap(), None);
    }

    #[test]
    fn test_missing_trailer_reads_to_clean_eof() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("partial.bmdc");

        let mut muxer = open_with_streams(&path);
        muxer.write_header().unwrap();
        muxer
            .write_interleaved_packet(&Packet::new(StreamKind::Video, 0, vec![0; 4]))
            .unwrap();
        muxer.close().unwrap();

        let mut reader = FramedReader::new(File::open(&path).unwrap()).unwrap();
        assert!(matches!(reader.next_record().unwrap(), Some(FramedRecord::Packet { .. })));
        assert_eq!(reader.next_record().unwrap(), None);
    }

    #[test]
    fn test_packet_before_header_is_rejected() {
        let dir = TempDir::new().unwrap();
        let mut muxer = open_with_streams(&dir.path().join("out.bmdc"));

        let result = muxer.write_interleaved_packet(&Packet::new(StreamKind::Video, 0, vec![0]));
        assert!(matches!(result, Err(MuxError::NotOpen)));
    }

    #[test]
    fn test_unknown_stream_is_rejected() {
        let dir = TempDir::new().unwrap();
        let mut muxer = open_with_streams(&dir.path().join("out.bmdc"));
        muxer.write_header().unwrap();

        let result = muxer.write_interleaved_packet(&Packet::new(StreamKind::Audio, 5, vec![0]));
        assert!(matches!(result, Err(MuxError::StreamRejected(_))));
    }

    #[test]
    fn test_add_stream_after_header_is_rejected() {
        let dir = TempDir::new().unwrap();
        let mut muxer = open_with_streams(&dir.path().join("out.bmdc"));
        muxer.write_header().unwrap();

        assert!(matches!(
            muxer.add_stream(StreamSpec::video(&NTSC)),
            Err(MuxError::StreamRejected(_))
        ));
    }

    #[test]
    fn test_header_requires_streams() {
        let dir = TempDir::new().unwrap();
        let mut muxer =
            FramedMuxer::create(&dir.path().join("empty.bmdc"), SessionInfo::new()).unwrap();

        assert!(matches!(muxer.write_header(), Err(MuxError::HeaderFailed(_))));
    }

    #[test]
    fn test_bad_magic() {
        let result = FramedReader::new(&b"NOTBMDC0\0\0\0\0"[..]);
        assert!(matches!(result, Err(MuxError::HeaderFailed(_))));
    }

    /// Sink whose `fail_on`-th write call fails without writing anything.
    struct FlakySink {
        data: Arc<Mutex<Vec<u8>>>,
        calls: usize,
        fail_on: usize,
    }

    impl Write for FlakySink {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.calls += 1;
            if self.calls == self.fail_on {
                return Err(io::Error::new(io::ErrorKind::Other, "disk full"));
            }
            self.data.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }
        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn test_failed_write_leaves_readable_prefix() {
        let data = Arc::new(Mutex::new(Vec::new()));
        let sink = FlakySink {
            data: Arc::clone(&data),
            calls: 0,
            // Call 1 is the header, calls 2 and 3 the first two packets.
            fail_on: 3,
        };
        let mut muxer = FramedMuxer::from_writer(Box::new(sink), SessionInfo::new());
        muxer.add_stream(StreamSpec::video(&NTSC)).unwrap();
        muxer.write_header().unwrap();

        let results: Vec<bool> = (0..4)
            .map(|i| {
                let packet = Packet::new(StreamKind::Video, 0, vec![i as u8; 16])
                    .with_timestamps(i, i, 1);
                muxer.write_interleaved_packet(&packet).is_ok()
            })
            .collect();
        assert_eq!(results, vec![true, false, false, false]);
        assert!(matches!(muxer.write_trailer(), Err(MuxError::Broken)));

        let bytes = data.lock().unwrap().clone();
        let mut reader = FramedReader::new(&bytes[..]).unwrap();
        assert!(matches!(
            reader.next_record().unwrap(),
            Some(FramedRecord::Packet { pts: 0, .. })
        ));
        assert_eq!(reader.next_record().unwrap(), None);
    }

    #[test]
    fn test_oversized_length_is_truncation_not_allocation() {
        let mut bytes = MAGIC.to_vec();
        bytes.extend_from_slice(&u32::MAX.to_le_bytes());
        bytes.extend_from_slice(b"{}");

        let result = FramedReader::new(&bytes[..]);
        assert!(matches!(result, Err(MuxError::Io(e)) if e.kind() == io::ErrorKind::UnexpectedEof));
    }

    #[test]
    fn test_truncated_payload_is_an_error() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("out.bmdc");
        let mut muxer = open_with_streams(&path);
        muxer.write_header().unwrap();
        muxer
            .write_interleaved_packet(&Packet::new(StreamKind::Video, 0, vec![7; 64]))
            .unwrap();
        muxer.close().unwrap();

        let mut bytes = std::fs::read(&path).unwrap();
        bytes.truncate(bytes.len() - 10);

        let mut reader = FramedReader::new(&bytes[..]).unwrap();
        assert!(matches!(reader.next_record(), Err(MuxError::Io(_))));
    }

    #[test]
    fn test_close_twice() {
        let dir = TempDir::new().unwrap();
        let mut muxer = open_with_streams(&dir.path().join("out.bmdc"));
        muxer.close().unwrap();
        assert!(matches!(muxer.close(), Err(MuxError::NotOpen)));
    }
}
