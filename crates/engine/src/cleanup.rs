use std::fmt;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use log::debug;

use crate::config::{extension_lower, DeletePolicy, EngineConfig};
use crate::progress;
use crate::report::Reporter;

/// How a source file was actually removed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeleteMethod {
    Trashed,
    Deleted,
}

impl fmt::Display for DeleteMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeleteMethod::Trashed => write!(f, "trashed"),
            DeleteMethod::Deleted => write!(f, "deleted"),
        }
    }
}

/// Remove a file, preferring the system trash so the operation stays
/// reversible. Falls back to direct removal when trashing is unavailable
/// or fails, and always removes directly when `permanent` is set.
pub fn delete_file(path: &Path, permanent: bool) -> Result<DeleteMethod> {
    if !permanent {
        match trash::delete(path) {
            Ok(()) => return Ok(DeleteMethod::Trashed),
            Err(e) => debug!("Trash unavailable for {} ({e}); deleting directly", path.display()),
        }
    }
    std::fs::remove_file(path).with_context(|| format!("Failed to delete: {}", path.display()))?;
    Ok(DeleteMethod::Deleted)
}

/// Tally of one cleanup pass, one counter per skip reason
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CleanupSummary {
    /// Records that passed the extension and scope gates
    pub candidates: usize,
    pub removed: usize,
    pub missing_src: usize,
    pub missing_dst: usize,
    /// Source signature absent or no longer matching the recorded one
    pub changed: usize,
    pub skipped_scope: usize,
    pub skipped_not_success: usize,
    pub skipped_ext: usize,
    pub errors: usize,
}

/// True when `path` equals a scope root or lives under a scope directory.
/// An empty scope means everything is in scope.
pub fn in_scope(path: &Path, roots: &[PathBuf]) -> bool {
    if roots.is_empty() {
        return true;
    }
    let p = std::path::absolute(path).unwrap_or_else(|_| path.to_path_buf());
    roots.iter().any(|r| {
        let r = std::path::absolute(r).unwrap_or_else(|_| r.clone());
        p == r || (r.is_dir() && p.starts_with(&r))
    })
}

/// Delete originals recorded in the progress store, re-validating every
/// safety gate per record. Per-item errors are logged and counted, never
/// aborting the remaining items.
pub fn run_cleanup(
    cfg: &EngineConfig,
    policy: &DeletePolicy,
    scope_paths: &[PathBuf],
    permanent: bool,
    dry_run: bool,
    reporter: &Reporter,
) -> CleanupSummary {
    let mut summary = CleanupSummary::default();

    let db = progress::load(&cfg.progress_db_path());
    if db.is_empty() {
        reporter.line("⚠️ No progress store found or empty; nothing to clean.");
        return summary;
    }

    reporter.line(&format!(
        "🧹 Cleanup using policy={policy:?}, dry_run={dry_run}, permanent={permanent}"
    ));

    for (src, rec) in &db {
        let covered = extension_lower(src).map(|ext| policy.covers(&ext)).unwrap_or(false);
        if !covered {
            summary.skipped_ext += 1;
            continue;
        }
        if !in_scope(src, scope_paths) {
            summary.skipped_scope += 1;
            continue;
        }
        summary.candidates += 1;

        if !rec.success {
            summary.skipped_not_success += 1;
            reporter.line(&format!("⏭️  Skipping (not marked success): {}", src.display()));
            continue;
        }
        if !rec.dst.exists() {
            summary.missing_dst += 1;
            reporter.line(&format!("⏭️  Skipping (converted file missing): {}", src.display()));
            continue;
        }
        if !src.exists() {
            summary.missing_src += 1;
            reporter.line(&format!("ℹ️  Already gone: {}", src.display()));
            continue;
        }

        let current = match progress::file_sig(src) {
            Ok(sig) => sig,
            Err(_) => {
                summary.missing_src += 1;
                reporter.line(&format!("ℹ️  Already gone: {}", src.display()));
                continue;
            }
        };
        if rec.sig != Some(current) {
            summary.changed += 1;
            reporter.line(&format!("⏭️  Skipping (file changed since conversion): {}", src.display()));
            continue;
        }

        if dry_run {
            reporter.line(&format!("🧪 DRY-RUN: Would remove {}", src.display()));
            continue;
        }
        match delete_file(src, permanent) {
            Ok(method) => {
                summary.removed += 1;
                reporter.line(&format!("🧹 Removed ({method}): {}", src.display()));
            }
            Err(e) => {
                summary.errors += 1;
                reporter.line(&format!("❌ Error while removing: {}", src.display()));
                reporter.raw(&format!("{e:#}\n"));
            }
        }
    }

    reporter.line("\n—— Cleanup Summary ——");
    reporter.line(&format!("Candidates (scoped): {}", summary.candidates));
    reporter.line(&format!("Removed:            {}", summary.removed));
    reporter.line(&format!("Missing source:     {}", summary.missing_src));
    reporter.line(&format!("Missing converted:  {}", summary.missing_dst));
    reporter.line(&format!("Changed since conv.:{}", summary.changed));
    reporter.line(&format!("Skipped by scope:   {}", summary.skipped_scope));
    reporter.line(&format!("Skipped not success:{}", summary.skipped_not_success));
    reporter.line(&format!("Skipped wrong ext.: {}", summary.skipped_ext));
    if summary.errors > 0 {
        reporter.line(&format!("Errors:             {}", summary.errors));
    }

    summary
}
