use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};

use anyhow::Result;
use log::debug;

use crate::cleanup;
use crate::command::CommandBuilder;
use crate::config::{extension_lower, ConvertOptions, EngineConfig};
use crate::failed;
use crate::inputs::dest_path;
use crate::probe;
use crate::progress;
use crate::report::Reporter;
use crate::runner;
use crate::tools::MediaTools;

/// Totals for one conversion run
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunSummary {
    pub total: usize,
    pub converted: usize,
    pub skipped: usize,
    pub failed: usize,
    /// True when the run was cancelled before the queue was exhausted
    pub stopped: bool,
}

/// Process the task queue sequentially.
///
/// Every task ends as converted, skipped, or failed; the progress store is
/// re-persisted after each one, so dying between tasks loses at most the
/// in-flight item. The stop flag is consulted only at task boundaries; an
/// in-flight ffmpeg is never killed. The only fatal error is an
/// unresolvable ffmpeg.
pub async fn run_queue(
    cfg: &EngineConfig,
    tools: &MediaTools,
    tasks: &[PathBuf],
    opts: &ConvertOptions,
    reporter: &Reporter,
    stop: &AtomicBool,
) -> Result<RunSummary> {
    reporter.session_header("Session");

    let ffmpeg = match tools.require_ffmpeg() {
        Ok(p) => p.to_path_buf(),
        Err(e) => {
            reporter.line("❌ FFmpeg not available. Put ffmpeg beside the binary or install it.");
            reporter.session_footer("Session");
            return Err(e.into());
        }
    };

    let worker = Worker {
        cfg,
        tools,
        ffmpeg,
        builder: CommandBuilder::new(cfg),
        opts,
        reporter,
        total: tasks.len(),
    };

    let db_path = cfg.progress_db_path();
    let mut db = progress::load(&db_path);

    let mut summary = RunSummary {
        total: tasks.len(),
        ..Default::default()
    };

    for (i, src) in tasks.iter().enumerate() {
        if stop.load(Ordering::Relaxed) {
            reporter.line("🛑 Stopped by user.");
            summary.stopped = true;
            break;
        }
        let index = i + 1;
        let dst = dest_path(src);
        let mut delete_candidate = false;

        if !opts.force && progress::already_done(&db, src, &dst) {
            reporter.line(&format!(
                "[{index}/{}] ⏭️  Skipping (already converted & unchanged): {}",
                summary.total,
                src.display()
            ));
            summary.skipped += 1;
        } else {
            let ok = match worker.process_one(src, &dst, index).await {
                Ok(ok) => ok,
                Err(e) => {
                    reporter.line(&format!("❌ Crash while processing: {}", src.display()));
                    reporter.raw(&format!("{e:?}\n"));
                    if let Err(e) = failed::append(&cfg.failed_list_path(), src) {
                        reporter.line(&format!("❌ Could not record failure: {e:#}"));
                    }
                    false
                }
            };

            progress::record(&mut db, src, &dst, ok);
            if ok {
                summary.converted += 1;
                delete_candidate = opts.delete_after.covers_path(src);
            } else {
                summary.failed += 1;
            }
        }

        // the success record must be on disk before its original is removed
        if let Err(e) = progress::save(&db_path, &db) {
            reporter.line(&format!("❌ Failed to persist progress store: {e:#}"));
        }
        if delete_candidate {
            worker.maybe_delete_source(src);
        }
        reporter.progress(index, summary.total);
    }

    reporter.line(&format!(
        "\n✅ Done! Converted {}/{} successfully. Skipped {}.",
        summary.converted, summary.total, summary.skipped
    ));
    reporter.session_footer("Session");
    reporter.done(summary);
    Ok(summary)
}

/// Per-run context for processing individual tasks
struct Worker<'a> {
    cfg: &'a EngineConfig,
    tools: &'a MediaTools,
    ffmpeg: PathBuf,
    builder: CommandBuilder,
    opts: &'a ConvertOptions,
    reporter: &'a Reporter,
    total: usize,
}

impl Worker<'_> {
    async fn process_one(&self, src: &Path, dst: &Path, index: usize) -> Result<bool> {
        match extension_lower(src).as_deref() {
            Some("mkv") => self.process_remux(src, dst, index).await,
            _ => self.process_transcode(src, dst, index).await,
        }
    }

    /// MKV path: container repackaging with stream-copied video. On a
    /// failed first attempt, one fallback forces AAC audio and drops
    /// subtitles.
    async fn process_remux(&self, src: &Path, dst: &Path, index: usize) -> Result<bool> {
        self.reporter
            .line(&format!("[{index}/{}] 🔄 Remux (MKV): {}", self.total, src.display()));

        let transcode_audio =
            probe::needs_audio_transcode(self.tools, src, &self.cfg.mp4_safe_audio).await;
        debug!("{}: transcode_audio = {transcode_audio}", src.display());

        let cmd = self.builder.remux_mkv(src, dst, transcode_audio, false);
        let rc = runner::run_streaming(&self.ffmpeg, &cmd, self.reporter).await?;
        if rc == 0 && output_ok(dst) {
            self.reporter.line(&format!("✅ Success: {}", dst.display()));
            return Ok(true);
        }

        self.reporter
            .line("   ⚠️ Primary attempt failed. Trying fallback (force AAC, drop subs).");
        let cmd2 = self.builder.remux_mkv(src, dst, true, false);
        let rc2 = runner::run_streaming(&self.ffmpeg, &cmd2, self.reporter).await?;
        if rc2 == 0 && output_ok(dst) {
            self.reporter.line(&format!("✅ Success (fallback): {}", dst.display()));
            return Ok(true);
        }

        self.reporter.line(&format!("❌ Failed: {}", src.display()));
        failed::append(&self.cfg.failed_list_path(), src)?;
        Ok(false)
    }

    /// WEBM/OGV path: full re-encode, no fallback
    async fn process_transcode(&self, src: &Path, dst: &Path, index: usize) -> Result<bool> {
        self.reporter
            .line(&format!("[{index}/{}] 🔄 Transcode: {}", self.total, src.display()));

        let cmd = self.builder.transcode(src, dst, &self.opts.quality);
        let rc = runner::run_streaming(&self.ffmpeg, &cmd, self.reporter).await?;
        if rc == 0 && output_ok(dst) {
            self.reporter.line(&format!("✅ Success: {}", dst.display()));
            return Ok(true);
        }

        self.reporter.line(&format!("❌ Failed: {}", src.display()));
        failed::append(&self.cfg.failed_list_path(), src)?;
        Ok(false)
    }

    fn maybe_delete_source(&self, src: &Path) {
        if self.opts.dry_run {
            self.reporter
                .line(&format!("🧪 DRY-RUN: Would remove source: {}", src.display()));
            return;
        }
        match cleanup::delete_file(src, self.opts.permanent) {
            Ok(method) => self
                .reporter
                .line(&format!("🧹 Removed source ({method}): {}", src.display())),
            Err(e) => self
                .reporter
                .line(&format!("❌ Failed to remove source {}: {e:#}", src.display())),
        }
    }
}

/// Exit code 0 alone is not proof; the destination must exist and be
/// non-empty.
fn output_ok(dst: &Path) -> bool {
    std::fs::metadata(dst).map(|m| m.len() > 0).unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DeletePolicy;
    use std::fs;
    use std::sync::atomic::AtomicBool;
    use tempfile::TempDir;
    use tokio::sync::mpsc::unbounded_channel;

    fn config(dir: &TempDir) -> EngineConfig {
        let mut cfg = EngineConfig::default();
        cfg.state_dir = dir.path().to_path_buf();
        cfg
    }

    fn reporter(dir: &TempDir) -> Reporter {
        let (tx, _rx) = unbounded_channel();
        Reporter::new(tx, dir.path().join("log.txt"))
    }

    #[test]
    fn output_ok_requires_a_non_empty_destination() {
        let dir = TempDir::new().unwrap();
        let dst = dir.path().join("a.mp4");
        assert!(!output_ok(&dst), "missing file");

        fs::write(&dst, b"").unwrap();
        assert!(!output_ok(&dst), "empty file");

        fs::write(&dst, b"data").unwrap();
        assert!(output_ok(&dst));
    }

    #[tokio::test]
    async fn unresolvable_ffmpeg_is_fatal() {
        let dir = TempDir::new().unwrap();
        let cfg = config(&dir);
        let tools = MediaTools::default();
        let tasks = vec![dir.path().join("a.mkv")];
        let opts = ConvertOptions::from_config(&cfg);
        let stop = AtomicBool::new(false);

        let result = run_queue(&cfg, &tools, &tasks, &opts, &reporter(&dir), &stop).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn pre_set_stop_flag_processes_nothing() {
        let dir = TempDir::new().unwrap();
        let cfg = config(&dir);
        let tools = MediaTools {
            ffmpeg: Some(dir.path().join("ffmpeg-missing-but-unused")),
            ffprobe: None,
        };
        let tasks = vec![dir.path().join("a.mkv"), dir.path().join("b.webm")];
        let opts = ConvertOptions::from_config(&cfg);
        let stop = AtomicBool::new(true);

        let summary = run_queue(&cfg, &tools, &tasks, &opts, &reporter(&dir), &stop)
            .await
            .unwrap();
        assert!(summary.stopped);
        assert_eq!(summary.converted + summary.skipped + summary.failed, 0);
    }

    // The remaining orchestration tests drive a stand-in ffmpeg through the
    // real runner; they need a shell, so they are Unix-only.
    #[cfg(unix)]
    mod with_stub_tool {
        use super::*;
        use std::os::unix::fs::PermissionsExt;
        use std::path::PathBuf;

        /// A stand-in ffmpeg. Inspection calls (input is the final
        /// argument) fail like the real tool with no output file; encode
        /// calls run `behavior` with `$in`/`$last` bound. Every invocation
        /// is tallied in `calls.txt`.
        fn write_stub(dir: &Path, behavior: &str) -> PathBuf {
            let calls = dir.join("calls.txt");
            let path = dir.join("ffmpeg");
            let body = format!(
                "#!/bin/sh\n\
                 echo run >> \"{calls}\"\n\
                 prev=\"\"; in=\"\"; last=\"\"\n\
                 for a in \"$@\"; do\n\
                 \x20 if [ \"$prev\" = \"-i\" ]; then in=\"$a\"; fi\n\
                 \x20 prev=\"$a\"; last=\"$a\"\n\
                 done\n\
                 if [ -z \"$last\" ] || [ \"$last\" = \"$in\" ]; then\n\
                 \x20 echo 'At least one output file must be specified' >&2\n\
                 \x20 exit 1\n\
                 fi\n\
                 {behavior}\n",
                calls = calls.display(),
            );
            std::fs::write(&path, body).unwrap();
            std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
            path
        }

        fn succeeding_stub(dir: &Path) -> PathBuf {
            write_stub(dir, "printf 'converted' > \"$last\"\nexit 0")
        }

        fn failing_stub(dir: &Path) -> PathBuf {
            write_stub(dir, "echo 'conversion error' >&2\nexit 1")
        }

        /// Fails for MKV inputs, converts everything else
        fn mkv_failing_stub(dir: &Path) -> PathBuf {
            write_stub(
                dir,
                "case \"$in\" in\n\
                 \x20 *.mkv) echo 'corrupt input' >&2; exit 1;;\n\
                 esac\n\
                 printf 'converted' > \"$last\"\n\
                 exit 0",
            )
        }

        fn call_count(dir: &Path) -> usize {
            std::fs::read_to_string(dir.join("calls.txt"))
                .map(|s| s.lines().count())
                .unwrap_or(0)
        }

        fn tools_with(ffmpeg: PathBuf) -> MediaTools {
            MediaTools {
                ffmpeg: Some(ffmpeg),
                ffprobe: None,
            }
        }

        #[tokio::test]
        async fn converts_then_skips_unchanged_files_without_invocations() {
            let dir = TempDir::new().unwrap();
            let cfg = config(&dir);
            let ffmpeg = succeeding_stub(dir.path());
            let a = dir.path().join("a.mkv");
            let b = dir.path().join("b.webm");
            fs::write(&a, "mkv source").unwrap();
            fs::write(&b, "webm source").unwrap();

            let tasks = vec![a.clone(), b.clone()];
            let opts = ConvertOptions::from_config(&cfg);
            let stop = AtomicBool::new(false);

            let summary = run_queue(&cfg, &tools_with(ffmpeg.clone()), &tasks, &opts, &reporter(&dir), &stop)
                .await
                .unwrap();
            assert_eq!(summary.converted, 2);
            assert_eq!(summary.skipped, 0);
            assert!(dir.path().join("a.mp4").exists());
            assert!(dir.path().join("b.mp4").exists());

            let db = progress::load(&cfg.progress_db_path());
            assert!(db[&a].success && db[&a].sig.is_some());
            assert!(db[&b].success && db[&b].sig.is_some());

            // second run: both unchanged, zero process invocations
            let calls_before = call_count(dir.path());
            let summary2 = run_queue(&cfg, &tools_with(ffmpeg), &tasks, &opts, &reporter(&dir), &stop)
                .await
                .unwrap();
            assert_eq!(summary2.skipped, 2);
            assert_eq!(summary2.converted, 0);
            assert_eq!(call_count(dir.path()), calls_before);
        }

        #[tokio::test]
        async fn force_reprocesses_even_when_done() {
            let dir = TempDir::new().unwrap();
            let cfg = config(&dir);
            let ffmpeg = succeeding_stub(dir.path());
            let a = dir.path().join("a.mkv");
            fs::write(&a, "mkv source").unwrap();

            let tasks = vec![a];
            let mut opts = ConvertOptions::from_config(&cfg);
            let stop = AtomicBool::new(false);

            run_queue(&cfg, &tools_with(ffmpeg.clone()), &tasks, &opts, &reporter(&dir), &stop)
                .await
                .unwrap();
            let calls_before = call_count(dir.path());

            opts.force = true;
            let summary = run_queue(&cfg, &tools_with(ffmpeg), &tasks, &opts, &reporter(&dir), &stop)
                .await
                .unwrap();
            assert_eq!(summary.converted, 1);
            assert!(call_count(dir.path()) > calls_before);
        }

        #[tokio::test]
        async fn failed_remux_exhausts_fallback_and_is_recorded() {
            let dir = TempDir::new().unwrap();
            let cfg = config(&dir);
            let ffmpeg = failing_stub(dir.path());
            let a = dir.path().join("a.mkv");
            fs::write(&a, "mkv source").unwrap();

            let tasks = vec![a.clone()];
            let opts = ConvertOptions::from_config(&cfg);
            let stop = AtomicBool::new(false);

            let summary = run_queue(&cfg, &tools_with(ffmpeg), &tasks, &opts, &reporter(&dir), &stop)
                .await
                .unwrap();
            assert_eq!(summary.failed, 1);
            assert_eq!(summary.converted, 0);

            // primary and fallback attempts both ran (plus the audio probe)
            assert!(call_count(dir.path()) >= 3);

            let db = progress::load(&cfg.progress_db_path());
            assert!(!db[&a].success);

            let failed_list = fs::read_to_string(cfg.failed_list_path()).unwrap();
            assert!(failed_list.contains("a.mkv"));
        }

        #[tokio::test]
        async fn a_failing_file_does_not_abort_the_queue() {
            let dir = TempDir::new().unwrap();
            let cfg = config(&dir);
            let ffmpeg = mkv_failing_stub(dir.path());
            let a = dir.path().join("a.mkv");
            let b = dir.path().join("b.webm");
            fs::write(&a, "mkv source").unwrap();
            fs::write(&b, "webm source").unwrap();

            let tasks = vec![a.clone(), b.clone()];
            let opts = ConvertOptions::from_config(&cfg);
            let stop = AtomicBool::new(false);

            let summary = run_queue(&cfg, &tools_with(ffmpeg), &tasks, &opts, &reporter(&dir), &stop)
                .await
                .unwrap();
            assert_eq!(summary.failed, 1);
            assert_eq!(summary.converted, 1);
            assert!(!dir.path().join("a.mp4").exists());
            assert!(dir.path().join("b.mp4").exists());

            let db = progress::load(&cfg.progress_db_path());
            assert!(!db[&a].success);
            assert!(db[&b].success);
        }

        #[tokio::test]
        async fn delete_after_removes_covered_sources_only() {
            let dir = TempDir::new().unwrap();
            let cfg = config(&dir);
            let ffmpeg = succeeding_stub(dir.path());
            let a = dir.path().join("a.mkv");
            let b = dir.path().join("b.webm");
            fs::write(&a, "mkv source").unwrap();
            fs::write(&b, "webm source").unwrap();

            let tasks = vec![a.clone(), b.clone()];
            let mut opts = ConvertOptions::from_config(&cfg);
            opts.permanent = true;
            opts.delete_after = DeletePolicy::Extensions(["mkv".to_string()].into_iter().collect());
            let stop = AtomicBool::new(false);

            let summary = run_queue(&cfg, &tools_with(ffmpeg), &tasks, &opts, &reporter(&dir), &stop)
                .await
                .unwrap();
            assert_eq!(summary.converted, 2);
            assert!(!a.exists(), "covered source deleted after success");
            assert!(b.exists(), "uncovered source kept");
        }

        #[tokio::test]
        async fn dry_run_keeps_covered_sources() {
            let dir = TempDir::new().unwrap();
            let cfg = config(&dir);
            let ffmpeg = succeeding_stub(dir.path());
            let a = dir.path().join("a.mkv");
            fs::write(&a, "mkv source").unwrap();

            let tasks = vec![a.clone()];
            let mut opts = ConvertOptions::from_config(&cfg);
            opts.dry_run = true;
            opts.permanent = true;
            opts.delete_after = DeletePolicy::All;
            let stop = AtomicBool::new(false);

            let summary = run_queue(&cfg, &tools_with(ffmpeg), &tasks, &opts, &reporter(&dir), &stop)
                .await
                .unwrap();
            assert_eq!(summary.converted, 1);
            assert!(a.exists());
        }
    }
}
