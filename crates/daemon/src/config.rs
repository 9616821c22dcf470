use std::path::{Path, PathBuf};
use anyhow::{Context, Result};
use directories::{ProjectDirs, UserDirs};
use serde::{Deserialize, Serialize};

/// Supplies the directory recordings are written to.
pub trait RecordingsDirProvider {
    fn recordings_dir(&self) -> PathBuf;
}

/// Configuration for the recording scheduler
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RecorderConfig {
    /// Directory holding one `profile_<hash>.db` store per profile
    pub store_dir: PathBuf,
    /// Where finished recordings land; platform videos directory when unset
    pub recordings_dir: Option<PathBuf>,
    /// Capture tool executable
    pub ffmpeg_bin: PathBuf,
    /// Output container extension
    pub container: String,
    /// Interval in seconds between poll cycles
    pub poll_interval_secs: u64,
    /// Seconds to wait for a voluntary exit after the interrupt
    pub stop_timeout_secs: u64,
    /// Upper bound handed to the capture tool's reconnect backoff
    pub max_reconnect_delay_secs: u64,
}

impl Default for RecorderConfig {
    fn default() -> Self {
        Self::default_config()
    }
}

impl RecorderConfig {
    /// Create a default configuration with sensible values
    pub fn default_config() -> Self {
        Self {
            store_dir: default_store_dir(),
            recordings_dir: None,
            ffmpeg_bin: PathBuf::from("ffmpeg"),
            container: "ts".to_string(),
            poll_interval_secs: 60,
            stop_timeout_secs: 30,
            max_reconnect_delay_secs: 5,
        }
    }

    /// Load configuration from a file, or return defaults if path is None or file doesn't exist
    pub fn load_config(path: Option<&Path>) -> Result<Self> {
        let mut config = Self::default_config();

        if let Some(config_path) = path {
            if config_path.exists() {
                let content = std::fs::read_to_string(config_path)
                    .with_context(|| format!("Failed to read config file: {}", config_path.display()))?;

                if config_path.extension().and_then(|s| s.to_str()) == Some("toml") {
                    config = toml::from_str(&content)
                        .with_context(|| format!("Failed to parse TOML config: {}", config_path.display()))?;
                } else {
                    config = serde_json::from_str(&content)
                        .with_context(|| format!("Failed to parse JSON config: {}", config_path.display()))?;
                }
            }
        }

        Ok(config)
    }
}

impl RecordingsDirProvider for RecorderConfig {
    fn recordings_dir(&self) -> PathBuf {
        if let Some(dir) = &self.recordings_dir {
            return dir.clone();
        }
        match UserDirs::new() {
            Some(dirs) => dirs
                .video_dir()
                .map(Path::to_path_buf)
                .unwrap_or_else(|| dirs.home_dir().to_path_buf()),
            None => PathBuf::from("."),
        }
    }
}

fn default_store_dir() -> PathBuf {
    ProjectDirs::from("", "", "recsched")
        .map(|dirs| dirs.config_dir().to_path_buf())
        .unwrap_or_else(|| PathBuf::from("recsched"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_scheduler_constants() {
        let cfg = RecorderConfig::default_config();
        assert_eq!(cfg.poll_interval_secs, 60);
        assert_eq!(cfg.stop_timeout_secs, 30);
        assert_eq!(cfg.max_reconnect_delay_secs, 5);
        assert_eq!(cfg.container, "ts");
    }

    #[test]
    fn missing_file_yields_defaults() {
        let cfg = RecorderConfig::load_config(Some(Path::new("/nonexistent/recsched.toml"))).unwrap();
        assert_eq!(cfg.ffmpeg_bin, PathBuf::from("ffmpeg"));
    }

    #[test]
    fn toml_overrides_only_given_fields() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cfg.toml");
        std::fs::write(&path, "recordings_dir = \"/srv/tv\"\npoll_interval_secs = 5\n").unwrap();

        let cfg = RecorderConfig::load_config(Some(&path)).unwrap();
        assert_eq!(cfg.poll_interval_secs, 5);
        assert_eq!(cfg.stop_timeout_secs, 30);
        assert_eq!(cfg.recordings_dir(), PathBuf::from("/srv/tv"));
    }

    #[test]
    fn json_config_is_parsed() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cfg.json");
        std::fs::write(&path, r#"{"container": "mkv", "ffmpeg_bin": "/opt/ffmpeg"}"#).unwrap();

        let cfg = RecorderConfig::load_config(Some(&path)).unwrap();
        assert_eq!(cfg.container, "mkv");
        assert_eq!(cfg.ffmpeg_bin, PathBuf::from("/opt/ffmpeg"));
    }

    #[test]
    fn unset_recordings_dir_falls_back_somewhere() {
        let cfg = RecorderConfig::default_config();
        assert!(!cfg.recordings_dir().as_os_str().is_empty());
    }
}
