use std::path::Path;
use std::process::Stdio;

use anyhow::{Context, Result};
use log::debug;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;

use crate::report::Reporter;

/// Launch an external tool and forward its stderr to the log sink line by
/// line as it is produced, so long encodes never buffer their full output.
/// stdout is discarded (the tool writes the media file itself). Blocks
/// until the child exits; no timeout is enforced, so a hung tool hangs the
/// run (documented limitation). A signal-killed child reports exit code -1.
pub async fn run_streaming(program: &Path, args: &[String], reporter: &Reporter) -> Result<i32> {
    let pretty = format!("{} {}", program.display(), args.join(" "));
    reporter.line(&format!("   ffmpeg: {pretty}"));
    debug!("Spawning: {pretty}");

    let mut child = Command::new(program)
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::piped())
        .spawn()
        .with_context(|| format!("Failed to spawn: {}", program.display()))?;

    let stderr = child
        .stderr
        .take()
        .context("Failed to capture child stderr")?;
    let mut lines = BufReader::new(stderr).lines();
    while let Ok(Some(line)) = lines.next_line().await {
        reporter.raw(&format!("      {line}\n"));
    }

    let status = child
        .wait()
        .await
        .with_context(|| format!("Failed to wait for: {}", program.display()))?;
    Ok(status.code().unwrap_or(-1))
}
