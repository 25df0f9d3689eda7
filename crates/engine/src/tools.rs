use std::env;
use std::path::{Path, PathBuf};
use log::{debug, info};
use thiserror::Error;

/// Environment variable a bundled ffmpeg distribution may set to advertise
/// its binary (checked after the exe-adjacent lookup, before PATH).
pub const BUNDLED_FFMPEG_ENV: &str = "FFMPEG_BINARY";

/// Resolved external tool locations for one run
#[derive(Debug, Clone, Default)]
pub struct MediaTools {
    pub ffmpeg: Option<PathBuf>,
    pub ffprobe: Option<PathBuf>,
}

#[derive(Debug, Error)]
pub enum ToolError {
    #[error("ffmpeg not available; place ffmpeg next to the tomp4 binary, set FFMPEG_BINARY, or install it on PATH")]
    FfmpegUnavailable,
}

impl MediaTools {
    /// Resolve ffmpeg and ffprobe. Never fails: absent tools stay `None`
    /// and the caller decides whether that is fatal.
    pub fn locate() -> Self {
        let exe_dir = env::current_exe()
            .ok()
            .and_then(|p| p.parent().map(Path::to_path_buf));

        let ffmpeg = exe_dir
            .as_deref()
            .and_then(|dir| existing(dir.join(tool_file_name("ffmpeg"))))
            .or_else(bundled_ffmpeg)
            .or_else(|| which::which("ffmpeg").ok());

        let ffprobe = exe_dir
            .as_deref()
            .and_then(|dir| existing(dir.join(tool_file_name("ffprobe"))))
            .or_else(|| which::which("ffprobe").ok());

        match &ffmpeg {
            Some(p) => info!("Resolved ffmpeg: {}", p.display()),
            None => debug!("ffmpeg not found (adjacent, {}, PATH)", BUNDLED_FFMPEG_ENV),
        }
        match &ffprobe {
            Some(p) => info!("Resolved ffprobe: {}", p.display()),
            None => debug!("ffprobe not found; stream inspection will fall back to ffmpeg stderr"),
        }

        Self { ffmpeg, ffprobe }
    }

    /// The ffmpeg path, or the fatal error every conversion run reports
    pub fn require_ffmpeg(&self) -> Result<&Path, ToolError> {
        self.ffmpeg.as_deref().ok_or(ToolError::FfmpegUnavailable)
    }
}

/// Tool name with the platform executable suffix (`ffmpeg.exe` on Windows)
pub fn tool_file_name(tool: &str) -> String {
    format!("{}{}", tool, env::consts::EXE_SUFFIX)
}

fn existing(path: PathBuf) -> Option<PathBuf> {
    if path.is_file() {
        Some(path)
    } else {
        None
    }
}

fn bundled_ffmpeg() -> Option<PathBuf> {
    let value = env::var_os(BUNDLED_FFMPEG_ENV)?;
    existing(PathBuf::from(value))
}
