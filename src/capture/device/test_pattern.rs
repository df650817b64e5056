//! Synthetic capture device producing UYVY colour bars and a 1 kHz tone.
//!
//! Delivers one tick per frame period on its own thread, exactly like a card
//! would: each tick carries a video frame and the audio block covering the
//! same interval. Audio block sizes follow the mode cadence (NTSC alternates
//! 1601/1602 samples) because sample positions are accumulated exactly.

use std::f64::consts::PI;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender, TryRecvError};

use super::{AudioInputPacket, CaptureDevice, InputCallback, VideoInputFrame};
use crate::errors::DeviceError;
use crate::types::{AudioChannels, DisplayMode, InputFormat, SampleDepth, AUDIO_SAMPLE_RATE};

const DISPLAY_MODES: &[DisplayMode] = &[
    DisplayMode { name: "NTSC", width: 720, height: 486, frame_duration: 1001, time_scale: 30000 },
    DisplayMode { name: "NTSC 23.98", width: 720, height: 486, frame_duration: 1001, time_scale: 24000 },
    DisplayMode { name: "PAL", width: 720, height: 576, frame_duration: 1000, time_scale: 25000 },
    DisplayMode { name: "HD 1080p 23.98", width: 1920, height: 1080, frame_duration: 1001, time_scale: 24000 },
    DisplayMode { name: "HD 1080p 24", width: 1920, height: 1080, frame_duration: 1000, time_scale: 24000 },
    DisplayMode { name: "HD 1080p 25", width: 1920, height: 1080, frame_duration: 1000, time_scale: 25000 },
    DisplayMode { name: "HD 1080p 29.97", width: 1920, height: 1080, frame_duration: 1001, time_scale: 30000 },
    DisplayMode { name: "HD 1080p 30", width: 1920, height: 1080, frame_duration: 1000, time_scale: 30000 },
    DisplayMode { name: "HD 1080i 50", width: 1920, height: 1080, frame_duration: 1000, time_scale: 25000 },
    DisplayMode { name: "HD 1080i 59.94", width: 1920, height: 1080, frame_duration: 1001, time_scale: 30000 },
    DisplayMode { name: "HD 1080i 60", width: 1920, height: 1080, frame_duration: 1000, time_scale: 30000 },
    DisplayMode { name: "HD 720p 50", width: 1280, height: 720, frame_duration: 1000, time_scale: 50000 },
    DisplayMode { name: "HD 720p 59.94", width: 1280, height: 720, frame_duration: 1001, time_scale: 60000 },
    DisplayMode { name: "HD 720p 60", width: 1280, height: 720, frame_duration: 1000, time_scale: 60000 },
];

/// Display modes the test pattern device can run in, indexed as on the CLI.
pub fn display_modes() -> &'static [DisplayMode] {
    DISPLAY_MODES
}

/// 75% colour bars as (Y, U, V).
const BARS: [(u8, u8, u8); 8] = [
    (180, 128, 128),
    (162, 44, 142),
    (131, 156, 44),
    (112, 72, 58),
    (84, 184, 198),
    (65, 100, 212),
    (35, 212, 114),
    (16, 128, 128),
];

const TONE_HZ: f64 = 1000.0;

#[derive(Clone, Copy, Debug)]
pub struct TestPatternOptions {
    /// Pace ticks at the mode's frame rate. When false, ticks are delivered
    /// back to back.
    pub realtime: bool,
    /// Flag every frame as having no input source and deliver black.
    pub no_signal: bool,
    pub deliver_video: bool,
    pub deliver_audio: bool,
}

impl Default for TestPatternOptions {
    fn default() -> Self {
        Self {
            realtime: true,
            no_signal: false,
            deliver_video: true,
            deliver_audio: true,
        }
    }
}

pub struct TestPatternDevice {
    format: InputFormat,
    options: TestPatternOptions,
    stop_tx: Option<Sender<()>>,
    delivery_handle: Option<JoinHandle<()>>,
}

impl TestPatternDevice {
    pub fn new(
        mode_index: usize,
        audio_channels: AudioChannels,
        sample_depth: SampleDepth,
        options: TestPatternOptions,
    ) -> Result<Self, DeviceError> {
        let mode = *DISPLAY_MODES
            .get(mode_index)
            .ok_or(DeviceError::InvalidMode(mode_index))?;

        Ok(Self::with_mode(mode, audio_channels, sample_depth, options))
    }

    pub fn with_mode(
        mode: DisplayMode,
        audio_channels: AudioChannels,
        sample_depth: SampleDepth,
        options: TestPatternOptions,
    ) -> Self {
        Self {
            format: InputFormat {
                mode,
                audio_channels,
                sample_depth,
                sample_rate: AUDIO_SAMPLE_RATE,
            },
            options,
            stop_tx: None,
            delivery_handle: None,
        }
    }
}

impl CaptureDevice for TestPatternDevice {
    fn input_format(&self) -> InputFormat {
        self.format
    }

    fn start_streams(&mut self, callback: Box<dyn InputCallback>) -> Result<(), DeviceError> {
        if self.delivery_handle.is_some() {
            return Err(DeviceError::AlreadyStreaming);
        }

        let (stop_tx, stop_rx) = crossbeam_channel::bounded::<()>(1);
        let format = self.format;
        let options = self.options;

        let handle = std::thread::Builder::new()
            .name("test-pattern-delivery".to_string())
            .spawn(move || delivery_loop(callback, format, options, stop_rx))
            .map_err(|e| DeviceError::StartFailed(e.to_string()))?;

        tracing::info!(target: "capture",
            "[DEVICE] Test pattern streaming: {} {}x{} @ {:.2}fps, realtime={}",
            format.mode.name, format.mode.width, format.mode.height,
            format.mode.frames_per_second(), options.realtime);

        self.stop_tx = Some(stop_tx);
        self.delivery_handle = Some(handle);
        Ok(())
    }

    fn stop_streams(&mut self) -> Result<(), DeviceError> {
        let Some(handle) = self.delivery_handle.take() else {
            return Ok(());
        };

        if let Some(stop_tx) = self.stop_tx.take() {
            let _ = stop_tx.try_send(());
        }

        handle
            .join()
            .map_err(|_| DeviceError::StopFailed("delivery thread panicked".to_string()))?;

        tracing::info!(target: "capture", "[DEVICE] Test pattern stopped");
        Ok(())
    }
}

impl Drop for TestPatternDevice {
    fn drop(&mut self) {
        if let Err(e) = self.stop_streams() {
            tracing::warn!(target: "capture", "[DEVICE] {}", e);
        }
    }
}

struct PatternFrame<'a> {
    mode: &'a DisplayMode,
    bytes: &'a [u8],
    index: u64,
    no_signal: bool,
}

impl VideoInputFrame for PatternFrame<'_> {
    fn width(&self) -> u32 {
        self.mode.width
    }

    fn height(&self) -> u32 {
        self.mode.height
    }

    fn row_bytes(&self) -> usize {
        self.mode.row_bytes()
    }

    fn bytes(&self) -> &[u8] {
        self.bytes
    }

    fn stream_time(&self, time_scale: i64) -> (i64, i64) {
        let duration = rescale(self.mode.frame_duration as i128, time_scale, self.mode.time_scale);
        let time = rescale(
            self.index as i128 * self.mode.frame_duration as i128,
            time_scale,
            self.mode.time_scale,
        );
        (time, duration)
    }

    fn has_no_input_source(&self) -> bool {
        self.no_signal
    }
}

struct PatternAudio<'a> {
    bytes: &'a [u8],
    sample_frames: usize,
    start_sample: u64,
    sample_rate: u32,
}

impl AudioInputPacket for PatternAudio<'_> {
    fn sample_frame_count(&self) -> usize {
        self.sample_frames
    }

    fn bytes(&self) -> &[u8] {
        self.bytes
    }

    fn packet_time(&self, time_scale: i64) -> i64 {
        rescale(self.start_sample as i128, time_scale, self.sample_rate as i64)
    }
}

/// `value * scale / base`, rounded down.
fn rescale(value: i128, scale: i64, base: i64) -> i64 {
    (value * scale as i128 / base as i128) as i64
}

/// Total audio sample frames elapsed at the start of video frame `index`.
fn samples_before_frame(mode: &DisplayMode, sample_rate: u32, index: u64) -> u64 {
    (index as u128 * mode.frame_duration as u128 * sample_rate as u128 / mode.time_scale as u128)
        as u64
}

/// Time from the first tick to tick `index`, exact to the nanosecond.
fn tick_offset(mode: &DisplayMode, index: u64) -> Duration {
    let nanos = index as u128 * mode.frame_duration as u128 * 1_000_000_000
        / mode.time_scale as u128;
    Duration::from_nanos(u64::try_from(nanos).unwrap_or(u64::MAX))
}

fn paint_bars(frame: &mut [u8], mode: &DisplayMode, offset: u64, no_signal: bool) {
    let row_bytes = mode.row_bytes();
    let bar_width = (mode.width as usize / BARS.len()).max(1);

    for row in frame.chunks_exact_mut(row_bytes) {
        for (pair, pixels) in row.chunks_exact_mut(4).enumerate() {
            let (y, u, v) = if no_signal {
                (16, 128, 128)
            } else {
                let x = (pair * 2 + offset as usize) % mode.width as usize;
                BARS[(x / bar_width).min(BARS.len() - 1)]
            };
            pixels.copy_from_slice(&[u, y, v, y]);
        }
    }
}

fn fill_tone(buffer: &mut Vec<u8>, format: &InputFormat, start_sample: u64, sample_frames: usize) {
    let channels = format.audio_channels.count() as usize;
    buffer.clear();
    buffer.reserve(sample_frames * format.audio_frame_bytes());

    for n in 0..sample_frames {
        let t = (start_sample + n as u64) as f64 / format.sample_rate as f64;
        let level = 0.25 * (2.0 * PI * TONE_HZ * t).sin();

        for channel in 0..channels {
            let sample = if channel < 2 { level } else { 0.0 };
            match format.sample_depth {
                SampleDepth::Bits16 => {
                    buffer.extend_from_slice(&((sample * i16::MAX as f64) as i16).to_le_bytes())
                }
                SampleDepth::Bits32 => {
                    buffer.extend_from_slice(&((sample * i32::MAX as f64) as i32).to_le_bytes())
                }
            }
        }
    }
}

fn delivery_loop(
    mut callback: Box<dyn InputCallback>,
    format: InputFormat,
    options: TestPatternOptions,
    stop_rx: Receiver<()>,
) {
    let mode = format.mode;
    let mut frame = vec![0u8; mode.frame_bytes()];
    let mut audio = Vec::new();
    let started = Instant::now();

    callback.format_changed(&mode);

    let mut index: u64 = 0;
    loop {
        if options.realtime {
            let deadline = started + tick_offset(&mode, index);
            let wait = deadline.saturating_duration_since(Instant::now());
            match stop_rx.recv_timeout(wait) {
                Err(RecvTimeoutError::Timeout) => {}
                Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
            }
        } else {
            match stop_rx.try_recv() {
                Err(TryRecvError::Empty) => {}
                Ok(()) | Err(TryRecvError::Disconnected) => break,
            }
        }

        let video = if options.deliver_video {
            paint_bars(&mut frame, &mode, index * 4, options.no_signal);
            Some(PatternFrame {
                mode: &mode,
                bytes: &frame,
                index,
                no_signal: options.no_signal,
            })
        } else {
            None
        };

        let audio_packet = if options.deliver_audio {
            let start_sample = samples_before_frame(&mode, format.sample_rate, index);
            let end_sample = samples_before_frame(&mode, format.sample_rate, index + 1);
            let sample_frames = (end_sample - start_sample) as usize;
            fill_tone(&mut audio, &format, start_sample, sample_frames);
            Some(PatternAudio {
                bytes: &audio,
                sample_frames,
                start_sample,
                sample_rate: format.sample_rate,
            })
        } else {
            None
        };

        callback.frame_arrived(
            video.as_ref().map(|v| v as &dyn VideoInputFrame),
            audio_packet.as_ref().map(|a| a as &dyn AudioInputPacket),
        );

        index += 1;
    }

    tracing::debug!(target: "capture", "[DEVICE] Delivery loop exiting after {} ticks", index);
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    #[derive(Default)]
    struct Recorded {
        video_times: Vec<(i64, i64)>,
        audio_samples: Vec<usize>,
        audio_bytes: Vec<usize>,
        no_signal: Vec<bool>,
    }

    struct RecordingCallback(Arc<Mutex<Recorded>>);

    impl InputCallback for RecordingCallback {
        fn frame_arrived(
            &mut self,
            video: Option<&dyn VideoInputFrame>,
            audio: Option<&dyn AudioInputPacket>,
        ) {
            let mut recorded = self.0.lock().unwrap();
            if let Some(video) = video {
                recorded.video_times.push(video.stream_time(30000));
                recorded.no_signal.push(video.has_no_input_source());
                assert_eq!(video.bytes().len(), video.row_bytes() * video.height() as usize);
            }
            if let Some(audio) = audio {
                recorded.audio_samples.push(audio.sample_frame_count());
                recorded.audio_bytes.push(audio.bytes().len());
            }
        }
    }

    fn run_unpaced(options: TestPatternOptions, ticks: usize) -> Recorded {
        let recorded = Arc::new(Mutex::new(Recorded::default()));
        let mut device = TestPatternDevice::new(
            0,
            AudioChannels::Stereo,
            SampleDepth::Bits16,
            TestPatternOptions {
                realtime: false,
                ..options
            },
        )
        .unwrap();

        device
            .start_streams(Box::new(RecordingCallback(Arc::clone(&recorded))))
            .unwrap();

        let deadline = Instant::now() + Duration::from_secs(10);
        loop {
            let seen = {
                let r = recorded.lock().unwrap();
                r.video_times.len().max(r.audio_samples.len())
            };
            if seen >= ticks || Instant::now() > deadline {
                break;
            }
            std::thread::sleep(Duration::from_millis(1));
        }
        device.stop_streams().unwrap();

        Arc::try_unwrap(recorded)
            .ok()
            .expect("callback dropped after stop")
            .into_inner()
            .unwrap()
    }

    #[test]
    fn test_invalid_mode_index_is_rejected() {
        let result = TestPatternDevice::new(
            display_modes().len(),
            AudioChannels::Stereo,
            SampleDepth::Bits16,
            TestPatternOptions::default(),
        );
        assert!(matches!(result, Err(DeviceError::InvalidMode(_))));
    }

    #[test]
    fn test_ntsc_stream_time_advances_by_frame_duration() {
        let recorded = run_unpaced(TestPatternOptions::default(), 5);

        assert!(recorded.video_times.len() >= 5);
        for (i, (time, duration)) in recorded.video_times.iter().take(5).enumerate() {
            assert_eq!(*duration, 1001);
            assert_eq!(*time, i as i64 * 1001);
        }
    }

    #[test]
    fn test_ntsc_audio_cadence_alternates_1601_1602() {
        let recorded = run_unpaced(TestPatternOptions::default(), 5);

        assert_eq!(&recorded.audio_samples[..5], &[1601, 1602, 1601, 1602, 1602]);
        for (samples, bytes) in recorded.audio_samples.iter().zip(&recorded.audio_bytes) {
            assert_eq!(*bytes, samples * 4);
        }
    }

    #[test]
    fn test_no_signal_flag_is_reported() {
        let recorded = run_unpaced(
            TestPatternOptions {
                no_signal: true,
                ..TestPatternOptions::default()
            },
            3,
        );

        assert!(recorded.no_signal.iter().all(|flag| *flag));
    }

    #[test]
    fn test_audio_only_delivery() {
        let recorded = run_unpaced(
            TestPatternOptions {
                deliver_video: false,
                ..TestPatternOptions::default()
            },
            3,
        );

        assert!(recorded.video_times.is_empty());
        assert!(recorded.audio_samples.len() >= 3);
    }

    #[test]
    fn test_tick_offset_follows_mode_cadence() {
        let pal = DISPLAY_MODES[2];
        assert_eq!(tick_offset(&pal, 0), Duration::ZERO);
        assert_eq!(tick_offset(&pal, 25), Duration::from_secs(1));

        let ntsc = DISPLAY_MODES[0];
        assert_eq!(tick_offset(&ntsc, 30_000), Duration::from_secs(1001));

        // Past 2^32 ticks the offset keeps growing.
        let far = u32::MAX as u64 + 10;
        assert!(tick_offset(&pal, far) > tick_offset(&pal, u32::MAX as u64));
        assert_eq!(tick_offset(&pal, far), Duration::from_millis(far * 40));
    }

    #[test]
    fn test_starting_twice_is_rejected() {
        let mut device = TestPatternDevice::new(
            2,
            AudioChannels::Stereo,
            SampleDepth::Bits16,
            TestPatternOptions::default(),
        )
        .unwrap();
        let recorded = Arc::new(Mutex::new(Recorded::default()));

        device
            .start_streams(Box::new(RecordingCallback(Arc::clone(&recorded))))
            .unwrap();
        let second = device.start_streams(Box::new(RecordingCallback(recorded)));

        assert_eq!(second, Err(DeviceError::AlreadyStreaming));
        device.stop_streams().unwrap();
    }
}
