use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

/// Configuration for the MP4 conversion engine
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Directory holding progress.json, failed.txt and log.txt
    pub state_dir: PathBuf,
    /// Recognized input extensions (lowercase, no dot)
    pub input_extensions: Vec<String>,
    /// Audio codecs that can be stream-copied into an MP4 container
    pub mp4_safe_audio: Vec<String>,
    /// AAC bitrate used whenever audio is re-encoded
    pub audio_bitrate: String,
    /// Default CRF for the WEBM/OGV transcode path (18 ≈ visually lossless)
    pub default_crf: u32,
    /// Default x264 preset for the transcode path
    pub default_preset: String,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self::default_config()
    }
}

impl EngineConfig {
    /// Create a default configuration with the stock quality values
    pub fn default_config() -> Self {
        Self {
            state_dir: PathBuf::from("."),
            input_extensions: vec!["mkv".to_string(), "webm".to_string(), "ogv".to_string()],
            mp4_safe_audio: vec!["aac".to_string(), "mp3".to_string()],
            audio_bitrate: "192k".to_string(),
            default_crf: 18,
            default_preset: "slow".to_string(),
        }
    }

    /// Load configuration from a file, or return defaults if path is None or file doesn't exist
    pub fn load_config(path: Option<&Path>) -> Result<Self> {
        let mut config = Self::default_config();

        if let Some(config_path) = path {
            if config_path.exists() {
                let content = std::fs::read_to_string(config_path)
                    .with_context(|| format!("Failed to read config file: {}", config_path.display()))?;

                // Try TOML by extension, JSON otherwise
                if config_path.extension().and_then(|s| s.to_str()) == Some("toml") {
                    let file_config: EngineConfig = toml::from_str(&content)
                        .with_context(|| format!("Failed to parse TOML config: {}", config_path.display()))?;
                    config = file_config;
                } else {
                    let file_config: EngineConfig = serde_json::from_str(&content)
                        .with_context(|| format!("Failed to parse JSON config: {}", config_path.display()))?;
                    config = file_config;
                }
            }
        }

        Ok(config)
    }

    pub fn progress_db_path(&self) -> PathBuf {
        self.state_dir.join("progress.json")
    }

    pub fn failed_list_path(&self) -> PathBuf {
        self.state_dir.join("failed.txt")
    }

    pub fn log_path(&self) -> PathBuf {
        self.state_dir.join("log.txt")
    }

    /// Check whether a path carries one of the recognized input extensions
    pub fn is_recognized_input(&self, path: &Path) -> bool {
        match extension_lower(path) {
            Some(ext) => self.input_extensions.iter().any(|e| e == &ext),
            None => false,
        }
    }
}

/// Lowercased extension of a path, if any
pub fn extension_lower(path: &Path) -> Option<String> {
    path.extension()
        .and_then(|s| s.to_str())
        .map(|s| s.to_ascii_lowercase())
}

/// Quality parameters for the WEBM/OGV transcode path
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TranscodeParams {
    pub crf: u32,
    pub preset: String,
    pub tune: Option<String>,
    pub lossless: bool,
}

/// Which original files a deletion step is allowed to touch
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeletePolicy {
    /// Delete nothing
    None,
    /// Every recognized input extension
    All,
    /// Only the listed extensions (lowercase, no dot)
    Extensions(BTreeSet<String>),
}

impl DeletePolicy {
    pub fn covers(&self, ext: &str) -> bool {
        match self {
            DeletePolicy::None => false,
            DeletePolicy::All => true,
            DeletePolicy::Extensions(set) => set.contains(ext),
        }
    }

    pub fn covers_path(&self, path: &Path) -> bool {
        match extension_lower(path) {
            Some(ext) => self.covers(&ext),
            None => false,
        }
    }

    pub fn is_none(&self) -> bool {
        matches!(self, DeletePolicy::None)
    }
}

/// Immutable options for one conversion run
#[derive(Debug, Clone)]
pub struct ConvertOptions {
    pub quality: TranscodeParams,
    /// Reprocess even when the progress store says a file is done
    pub force: bool,
    /// Log deletions without performing them
    pub dry_run: bool,
    /// Skip the trash and delete irreversibly
    pub permanent: bool,
    /// Which originals to remove after a verified success
    pub delete_after: DeletePolicy,
}

impl ConvertOptions {
    /// Per-run options seeded from the engine defaults
    pub fn from_config(cfg: &EngineConfig) -> Self {
        Self {
            quality: TranscodeParams {
                crf: cfg.default_crf,
                preset: cfg.default_preset.clone(),
                tune: None,
                lossless: false,
            },
            force: false,
            dry_run: false,
            permanent: false,
            delete_after: DeletePolicy::None,
        }
    }
}
