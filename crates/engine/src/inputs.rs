use std::collections::HashSet;
use std::path::{Path, PathBuf};

use log::{debug, warn};
use walkdir::WalkDir;

use crate::config::EngineConfig;

/// Expand user-supplied files and directories into the task queue.
///
/// Plain files are kept when their extension is recognized; directories
/// are walked recursively with the same filter. The result preserves
/// first-seen order and drops duplicates.
pub fn collect_inputs(cfg: &EngineConfig, paths: &[PathBuf]) -> Vec<PathBuf> {
    let mut found = Vec::new();

    for p in paths {
        if p.is_file() {
            if cfg.is_recognized_input(p) {
                found.push(p.clone());
            }
        } else if p.is_dir() {
            for entry in WalkDir::new(p).follow_links(false) {
                let entry = match entry {
                    Ok(e) => e,
                    Err(e) => {
                        warn!("Error reading directory entry: {e}");
                        continue;
                    }
                };
                let path = entry.path();
                if path.is_file() && cfg.is_recognized_input(path) {
                    found.push(path.to_path_buf());
                }
            }
        } else {
            debug!("Ignoring nonexistent input: {}", p.display());
        }
    }

    dedupe_preserving_order(found)
}

fn dedupe_preserving_order(found: Vec<PathBuf>) -> Vec<PathBuf> {
    let mut seen = HashSet::new();
    let mut out = Vec::new();
    for f in found {
        if seen.insert(f.clone()) {
            out.push(f);
        }
    }
    out
}

/// Destination for a source file: same location, `.mp4` extension
pub fn dest_path(src: &Path) -> PathBuf {
    src.with_extension("mp4")
}
