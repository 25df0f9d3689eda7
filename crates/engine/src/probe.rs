use std::path::Path;
use std::process::Stdio;
use std::sync::OnceLock;
use anyhow::{bail, Context, Result};
use log::debug;
use regex::Regex;
use serde::Deserialize;
use tokio::process::Command;

use crate::tools::MediaTools;

/// ffprobe output, reduced to the stream fields the audio decision needs
#[derive(Debug, Clone, Deserialize)]
pub struct ProbeData {
    #[serde(default)]
    pub streams: Vec<ProbeStream>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ProbeStream {
    pub codec_type: Option<String>,
    pub codec_name: Option<String>,
}

fn audio_line_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?i)Audio:\s*([A-Za-z0-9_]+)").expect("valid regex"))
}

/// Audio codec names present in `path`, in stream order, lowercased.
///
/// Prefers ffprobe JSON; any ffprobe failure falls through to scanning
/// ffmpeg's inspection stderr. An empty result means "no information",
/// not "no audio".
pub async fn audio_codecs(tools: &MediaTools, path: &Path) -> Vec<String> {
    if let Some(ffprobe) = tools.ffprobe.as_deref() {
        match probe_audio_json(ffprobe, path).await {
            Ok(codecs) => return codecs,
            Err(e) => debug!("ffprobe failed for {}: {e:#}; falling back to ffmpeg stderr", path.display()),
        }
    }

    if let Some(ffmpeg) = tools.ffmpeg.as_deref() {
        match inspect_stderr(ffmpeg, path).await {
            Ok(text) => return parse_audio_lines(&text),
            Err(e) => debug!("ffmpeg inspection failed for {}: {e:#}", path.display()),
        }
    }

    Vec::new()
}

/// True when at least one detected audio stream cannot be stream-copied
/// into MP4. No detected streams means nothing to transcode.
pub async fn needs_audio_transcode(tools: &MediaTools, path: &Path, safe_codecs: &[String]) -> bool {
    let codecs = audio_codecs(tools, path).await;
    has_unsafe_codec(&codecs, safe_codecs)
}

pub fn has_unsafe_codec(codecs: &[String], safe_codecs: &[String]) -> bool {
    if codecs.is_empty() {
        return false;
    }
    codecs
        .iter()
        .any(|c| !safe_codecs.iter().any(|s| s.eq_ignore_ascii_case(c)))
}

async fn probe_audio_json(ffprobe: &Path, path: &Path) -> Result<Vec<String>> {
    let output = Command::new(ffprobe)
        .arg("-v")
        .arg("error")
        .arg("-print_format")
        .arg("json")
        .arg("-show_streams")
        .arg("-show_format")
        .arg(path)
        .stdin(Stdio::null())
        .output()
        .await
        .with_context(|| format!("Failed to execute ffprobe for: {}", path.display()))?;

    if !output.status.success() {
        bail!(
            "ffprobe failed (exit code {}) for {}",
            output.status.code().unwrap_or(-1),
            path.display()
        );
    }

    let json_str = String::from_utf8_lossy(&output.stdout);
    parse_probe_json(&json_str)
}

pub fn parse_probe_json(json_str: &str) -> Result<Vec<String>> {
    let data: ProbeData = serde_json::from_str(json_str).context("Failed to parse ffprobe JSON")?;
    Ok(data
        .streams
        .into_iter()
        .filter(|s| s.codec_type.as_deref() == Some("audio"))
        .filter_map(|s| s.codec_name)
        .map(|c| c.to_ascii_lowercase())
        .collect())
}

/// ffmpeg prints stream info to stderr; with no output file the command
/// exits nonzero, which is expected here.
async fn inspect_stderr(ffmpeg: &Path, path: &Path) -> Result<String> {
    let output = Command::new(ffmpeg)
        .arg("-hide_banner")
        .arg("-v")
        .arg("error")
        .arg("-i")
        .arg(path)
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .output()
        .await
        .with_context(|| format!("Failed to execute ffmpeg -i for: {}", path.display()))?;

    Ok(String::from_utf8_lossy(&output.stderr).into_owned())
}

pub fn parse_audio_lines(stderr: &str) -> Vec<String> {
    let re = audio_line_re();
    stderr
        .lines()
        .filter_map(|line| re.captures(line))
        .map(|c| c[1].to_ascii_lowercase())
        .collect()
}
