//! Standard on-disk locations: configuration, logs, drafts and the outbox.

use std::path::PathBuf;

/// Environment variable overriding the config file location.
pub const CONFIG_ENV: &str = "QAINGEST_CONFIG";

/// Base data directory.
///
/// On Linux: `~/.local/share/qaingest`
pub fn data_dir() -> PathBuf {
    directories::ProjectDirs::from("com", "QaIngest", "qaingest")
        .map(|p| p.data_dir().to_path_buf())
        .unwrap_or_else(|| {
            dirs::home_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join(".local")
                .join("share")
                .join("qaingest")
        })
}

/// Configuration file path.
pub fn config_file() -> PathBuf {
    if let Ok(path) = std::env::var(CONFIG_ENV) {
        return PathBuf::from(path);
    }

    data_dir().join("config.toml")
}

/// Log directory, created on demand.
pub fn log_dir() -> std::io::Result<PathBuf> {
    let path = data_dir().join("logs");
    std::fs::create_dir_all(&path)?;
    Ok(path)
}

/// Local draft store root.
pub fn drafts_dir() -> PathBuf {
    data_dir().join("drafts")
}

/// Outbox root; holds pending/uploading/failed/completed.
pub fn spool_dir() -> PathBuf {
    data_dir().join("spool")
}
