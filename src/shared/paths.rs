use std::path::{Path, PathBuf};

const APP_DIR: &str = "bmdcapture";

/// Get the base storage directory following XDG Base Directory Specification.
/// Returns `$XDG_DATA_HOME/bmdcapture`, falling back to the platform data
/// directory, or `./bmdcapture` when neither is known.
pub fn get_storage_dir() -> PathBuf {
    if let Ok(xdg_data) = std::env::var("XDG_DATA_HOME") {
        if !xdg_data.is_empty() {
            return PathBuf::from(xdg_data).join(APP_DIR);
        }
    }

    dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(APP_DIR)
}

/// Get the logs directory path.
/// Returns `{storage_dir}/logs`.
pub fn get_log_dir() -> PathBuf {
    get_storage_dir().join("logs")
}

/// Get the default config file path.
/// Returns `{config_dir}/bmdcapture/config.json`.
pub fn get_config_path() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(get_storage_dir)
        .join(APP_DIR)
        .join("config.json")
}

/// Ensure a directory exists, creating it if necessary.
pub fn ensure_dir(path: &Path) -> std::io::Result<()> {
    if !path.exists() {
        std::fs::create_dir_all(path)?;
    }
    Ok(())
}
