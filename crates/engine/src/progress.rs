//! Durable record of the last conversion attempt per source file.
//!
//! The whole store is one pretty-printed JSON document, rewritten after
//! every processed item via a sibling temp file and an atomic rename, so a
//! reader never observes a half-written snapshot. Concurrent runs against
//! the same store are not coordinated; last write wins.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::UNIX_EPOCH;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use log::warn;
use serde::{Deserialize, Serialize};

pub type ProgressDb = BTreeMap<PathBuf, ProgressRecord>;

/// Cheap change-detection proxy: exact size plus modification time
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileSig {
    pub size: u64,
    pub mtime_ns: u64,
}

/// Outcome of the last conversion attempt for one source path
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProgressRecord {
    pub dst: PathBuf,
    pub success: bool,
    #[serde(default)]
    pub sig: Option<FileSig>,
    pub updated_at: DateTime<Utc>,
}

/// Signature of `path` right now
pub fn file_sig(path: &Path) -> Result<FileSig> {
    let meta = fs::metadata(path).with_context(|| format!("Failed to stat: {}", path.display()))?;
    let mtime_ns = meta
        .modified()
        .ok()
        .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
        .map(|d| d.as_nanos() as u64)
        .unwrap_or(0);
    Ok(FileSig {
        size: meta.len(),
        mtime_ns,
    })
}

/// Load the store. A missing or unparseable file yields an empty store;
/// the on-disk file is left untouched until the next successful save.
pub fn load(path: &Path) -> ProgressDb {
    let content = match fs::read_to_string(path) {
        Ok(c) => c,
        Err(_) => return ProgressDb::new(),
    };
    match serde_json::from_str(&content) {
        Ok(db) => db,
        Err(e) => {
            warn!("Progress store {} is unreadable ({e}); starting from an empty store", path.display());
            ProgressDb::new()
        }
    }
}

/// Persist the full store atomically: write a sibling temp file, then
/// rename it over the canonical path.
pub fn save(path: &Path, db: &ProgressDb) -> Result<()> {
    let tmp = tmp_path(path);
    let json = serde_json::to_string_pretty(db).context("Failed to serialize progress store")?;
    fs::write(&tmp, json).with_context(|| format!("Failed to write temp store: {}", tmp.display()))?;
    fs::rename(&tmp, path)
        .with_context(|| format!("Failed to replace store: {} -> {}", tmp.display(), path.display()))?;
    Ok(())
}

fn tmp_path(path: &Path) -> PathBuf {
    let mut name = path.file_name().map(|n| n.to_os_string()).unwrap_or_default();
    name.push(".tmp");
    path.with_file_name(name)
}

/// Overwrite the record for `src` after a conversion attempt. The
/// signature is captured now, or omitted when the source is already gone.
pub fn record(db: &mut ProgressDb, src: &Path, dst: &Path, success: bool) {
    let sig = file_sig(src).ok();
    db.insert(
        src.to_path_buf(),
        ProgressRecord {
            dst: dst.to_path_buf(),
            success,
            sig,
            updated_at: Utc::now(),
        },
    );
}

/// A record proves "already converted" only while the destination still
/// exists and the source's current signature matches the stored one.
pub fn already_done(db: &ProgressDb, src: &Path, dst: &Path) -> bool {
    let Some(rec) = db.get(src) else {
        return false;
    };
    if !rec.success || !dst.exists() {
        return false;
    }
    let Ok(current) = file_sig(src) else {
        return false;
    };
    matches!(rec.sig, Some(stored) if stored == current)
}
