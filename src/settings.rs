use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

use crate::capture::{CaptureLimits, TestPatternOptions};
use crate::errors::CaptureError;
use crate::recorder::SessionOptions;
use crate::shared::paths::get_config_path;
use crate::types::{AudioChannels, SampleDepth, WriteFailurePolicy, BYTES_PER_GIB};

/// Capture configuration. Every field has a default, so a config file only
/// needs the keys it wants to change; CLI flags are applied on top.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct CaptureConfig {
    /// Index into the device's display mode table.
    pub mode_index: usize,
    pub output: Option<PathBuf>,
    /// Container name; guessed from the output extension when unset.
    pub format: Option<String>,
    pub audio_channels: AudioChannels,
    pub sample_depth: SampleDepth,
    /// Stop after this many video frames. Unbounded when unset.
    pub max_frames: Option<u64>,
    /// Stop once this many bytes are queued. `null` disables the ceiling.
    pub max_queue_bytes: Option<u64>,
    pub verbose: bool,
    pub no_signal: bool,
    pub realtime: bool,
    pub write_policy: WriteFailurePolicy,
    pub queue_entry_overhead: u64,
    pub log_dir: Option<PathBuf>,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            mode_index: 0,
            output: None,
            format: None,
            audio_channels: AudioChannels::default(),
            sample_depth: SampleDepth::default(),
            max_frames: None,
            max_queue_bytes: Some(BYTES_PER_GIB),
            verbose: false,
            no_signal: false,
            realtime: true,
            write_policy: WriteFailurePolicy::default(),
            queue_entry_overhead: 0,
            log_dir: None,
        }
    }
}

#[derive(Error, Debug)]
pub enum SettingsError {
    #[error("Failed to read config file: {0}")]
    ReadError(#[from] std::io::Error),
    #[error("Failed to parse config: {0}")]
    ParseError(#[from] serde_json::Error),
}

impl CaptureConfig {
    pub fn validate(&self) -> Result<(), CaptureError> {
        if self.output.is_none() {
            return Err(CaptureError::invalid_config("missing output file (-f)"));
        }
        if self.max_frames == Some(0) {
            return Err(CaptureError::invalid_config(
                "frame limit must be at least 1, omit it for no limit",
            ));
        }
        if self.max_queue_bytes == Some(0) {
            return Err(CaptureError::invalid_config(
                "memory limit must be positive, use null for no limit",
            ));
        }
        Ok(())
    }

    pub fn limits(&self) -> CaptureLimits {
        CaptureLimits {
            max_frames: self.max_frames,
            max_queue_bytes: self.max_queue_bytes,
            verbose: self.verbose,
        }
    }

    pub fn session_options(&self) -> SessionOptions {
        SessionOptions {
            limits: self.limits(),
            write_policy: self.write_policy,
            queue_entry_overhead: self.queue_entry_overhead,
        }
    }

    pub fn test_pattern_options(&self) -> TestPatternOptions {
        TestPatternOptions {
            realtime: self.realtime,
            no_signal: self.no_signal,
            ..Default::default()
        }
    }
}

/// Loads `path` if given, otherwise the default config file if it exists,
/// otherwise the built-in defaults.
pub fn load_config(path: Option<&Path>) -> Result<CaptureConfig, SettingsError> {
    if let Some(path) = path {
        return load_config_from_file(path);
    }

    let default_path = get_config_path();
    if !default_path.exists() {
        return Ok(CaptureConfig::default());
    }

    tracing::debug!(target: "system", "Loading config from {:?}", default_path);
    load_config_from_file(&default_path)
}

pub fn load_config_from_file(path: &Path) -> Result<CaptureConfig, SettingsError> {
    let contents = std::fs::read_to_string(path)?;
    let config = serde_json::from_str(&contents)?;
    Ok(config)
}
