//! bmdcapture command-line interface
//!
//! Captures video and audio from a capture device into a container file or
//! a pipe, e.g. `bmdcapture -m 2 -F bmdc -f pipe:1 | consumer`.

mod exit_codes;

use std::path::PathBuf;

use bmdcapture_lib::capture::device::display_modes;
use bmdcapture_lib::logging::{init_logging, LoggingOptions};
use bmdcapture_lib::settings::{load_config, CaptureConfig};
use bmdcapture_lib::shared::paths::get_log_dir;
use bmdcapture_lib::types::{AudioChannels, SampleDepth, WriteFailurePolicy, BYTES_PER_GIB};
use bmdcapture_lib::{CaptureError, CaptureSession, StopReason, TestPatternDevice};
use clap::Parser;
use exit_codes::ExitCode;

/// bmdcapture - capture video and audio to a file
#[derive(Parser, Debug)]
#[command(name = "bmdcapture")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Display mode index (see --list-modes)
    #[arg(short, long)]
    mode: Option<usize>,

    /// List the available display modes and exit
    #[arg(long)]
    list_modes: bool,

    /// Output file, or `-` / `pipe:1` for stdout
    #[arg(short = 'f', long)]
    output: Option<PathBuf>,

    /// Output format: bmdc, raw (guessed from the file extension if omitted)
    #[arg(short = 'F', long)]
    format: Option<String>,

    /// Audio channels: 2, 8 or 16
    #[arg(short, long)]
    channels: Option<u32>,

    /// Audio sample depth in bits: 16 or 32
    #[arg(short, long)]
    sample_depth: Option<u32>,

    /// Number of video frames to capture (default is unlimited)
    #[arg(short = 'n', long)]
    frames: Option<u64>,

    /// Maximum queue size in GiB, 0 for no limit (default is 1)
    #[arg(short = 'M', long)]
    memory_limit: Option<u64>,

    /// Be verbose (progress every 25 frames, debug logging)
    #[arg(short, long)]
    verbose: bool,

    /// Simulate a missing input signal
    #[arg(long)]
    no_signal: bool,

    /// Deliver frames at the mode's frame rate
    #[arg(long, conflicts_with = "unpaced")]
    realtime: bool,

    /// Deliver frames as fast as they can be consumed
    #[arg(long)]
    unpaced: bool,

    /// Stop the capture on the first failed write
    #[arg(long)]
    strict_writes: bool,

    /// JSON config file (CLI flags take precedence)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Also write daily rolling log files to this directory
    #[arg(long)]
    log_dir: Option<PathBuf>,

    /// Also write daily rolling log files to the default data directory
    #[arg(long, conflicts_with = "log_dir")]
    log_files: bool,
}

impl Cli {
    /// Applies flags on top of the loaded config.
    fn apply(&self, mut config: CaptureConfig) -> Result<CaptureConfig, CaptureError> {
        if let Some(mode) = self.mode {
            config.mode_index = mode;
        }
        if let Some(output) = &self.output {
            config.output = Some(output.clone());
        }
        if let Some(format) = &self.format {
            config.format = Some(format.clone());
        }
        if let Some(channels) = self.channels {
            config.audio_channels =
                AudioChannels::try_from(channels).map_err(CaptureError::InvalidConfig)?;
        }
        if let Some(depth) = self.sample_depth {
            config.sample_depth = SampleDepth::try_from(depth).map_err(CaptureError::InvalidConfig)?;
        }
        if let Some(frames) = self.frames {
            config.max_frames = (frames > 0).then_some(frames);
        }
        if let Some(gib) = self.memory_limit {
            config.max_queue_bytes = match gib {
                0 => None,
                gib => Some(gib.checked_mul(BYTES_PER_GIB).ok_or_else(|| {
                    CaptureError::invalid_config(format!("memory limit of {} GiB is too large", gib))
                })?),
            };
        }
        if self.verbose {
            config.verbose = true;
        }
        if self.no_signal {
            config.no_signal = true;
        }
        if self.realtime {
            config.realtime = true;
        }
        if self.unpaced {
            config.realtime = false;
        }
        if self.strict_writes {
            config.write_policy = WriteFailurePolicy::Abort;
        }
        if let Some(log_dir) = &self.log_dir {
            config.log_dir = Some(log_dir.clone());
        } else if self.log_files {
            config.log_dir = Some(get_log_dir());
        }
        Ok(config)
    }
}

fn main() {
    let cli = Cli::parse();
    let exit_code = run(cli);
    std::process::exit(exit_code.as_i32());
}

fn list_modes() {
    println!("Display modes (-m <index>):");
    for (index, mode) in display_modes().iter().enumerate() {
        println!(
            "    {:2}:  {:<20}\t{} x {}\t{:.2} FPS",
            index,
            mode.name,
            mode.width,
            mode.height,
            mode.frames_per_second()
        );
    }
}

fn run(cli: Cli) -> ExitCode {
    if cli.list_modes {
        list_modes();
        return ExitCode::Success;
    }

    let config = match load_config(cli.config.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Error: {}", e);
            return ExitCode::InvalidArguments;
        }
    };

    let config = match cli.apply(config).and_then(|c| c.validate().map(|_| c)) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Error: {}", e);
            eprintln!("Run with --help for usage, --list-modes for display modes.");
            return ExitCode::from_error(&e);
        }
    };

    let _guards = match init_logging(&LoggingOptions {
        verbose: config.verbose,
        log_dir: config.log_dir.clone(),
    }) {
        Ok(guards) => guards,
        Err(e) => {
            eprintln!("Error: {}", e);
            return ExitCode::GeneralError;
        }
    };

    match capture(&config) {
        Ok(()) => ExitCode::Success,
        Err(e) => {
            tracing::error!(target: "system", "Capture failed: {}", e);
            eprintln!("Error: {}", e);
            ExitCode::from_error(&e)
        }
    }
}

fn capture(config: &CaptureConfig) -> Result<(), CaptureError> {
    let output = config
        .output
        .as_deref()
        .ok_or_else(|| CaptureError::invalid_config("missing output file (-f)"))?;

    let device = TestPatternDevice::new(
        config.mode_index,
        config.audio_channels,
        config.sample_depth,
        config.test_pattern_options(),
    )?;

    let session = CaptureSession::open(
        Box::new(device),
        output,
        config.format.as_deref(),
        config.session_options(),
    )?;

    tracing::info!(target: "system", "Session {} capturing to {}", session.info().id, output.display());

    let coordinator = session.coordinator();
    if let Err(e) = ctrlc::set_handler(move || {
        coordinator.request_stop(StopReason::Interrupted);
    }) {
        tracing::warn!(target: "system", "Failed to install Ctrl+C handler: {}", e);
    }

    let report = session.run()?;
    tracing::info!(target: "system",
        "Capture finished ({}) in {:.2}s, session {}",
        report.stop_reason, report.elapsed_secs, report.session.id);
    match serde_json::to_string(&report) {
        Ok(json) => tracing::debug!(target: "system", "Report: {}", json),
        Err(e) => tracing::warn!(target: "system", "Failed to serialize report: {}", e),
    }
    Ok(())
}
