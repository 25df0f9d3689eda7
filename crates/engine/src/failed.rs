use std::fs::OpenOptions;
use std::io::Write;
use std::path::Path;
use anyhow::{Context, Result};

/// Append a source path to the failed-items list. The list is
/// newline-delimited, append-only, and never pruned.
pub fn append(list_path: &Path, src: &Path) -> Result<()> {
    let mut file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(list_path)
        .with_context(|| format!("Failed to open failed list: {}", list_path.display()))?;
    writeln!(file, "{}", src.display())
        .with_context(|| format!("Failed to append to failed list: {}", list_path.display()))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn appends_one_path_per_line() {
        let dir = tempfile::tempdir().unwrap();
        let list = dir.path().join("failed.txt");

        append(&list, Path::new("/media/a.mkv")).unwrap();
        append(&list, Path::new("/media/b.webm")).unwrap();

        let content = std::fs::read_to_string(&list).unwrap();
        assert_eq!(content, "/media/a.mkv\n/media/b.webm\n");
    }
}
