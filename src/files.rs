use std::path::{Path, PathBuf};

use crate::error::Result;

const ARCHIVE_EXTENSIONS: &[&str] = &["zip", "rar", "7z"];
const CLEANUP_EXTENSIONS: &[&str] = &["zip", "rar", "7z", "tar", "gz"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileKind {
    Csv,
    Archive,
    Directory,
    Unsupported,
}

fn extension(path: &Path) -> String {
    path.extension()
        .map(|e| e.to_string_lossy().to_lowercase())
        .unwrap_or_default()
}

impl FileKind {
    pub fn classify(path: &Path) -> FileKind {
        if path.is_dir() {
            return FileKind::Directory;
        }
        FileKind::from_name(path)
    }

    /// Kind by extension alone, without touching the filesystem.
    pub fn from_name(path: &Path) -> FileKind {
        let ext = extension(path);
        if ext == "csv" {
            FileKind::Csv
        } else if ARCHIVE_EXTENSIONS.contains(&ext.as_str()) {
            FileKind::Archive
        } else {
            FileKind::Unsupported
        }
    }
}

/// Every `.csv` under `dir`, recursively, in path order.
pub fn find_csv_files(dir: &Path) -> Result<Vec<PathBuf>> {
    let mut found = Vec::new();
    let mut pending = vec![dir.to_path_buf()];
    while let Some(current) = pending.pop() {
        for entry in std::fs::read_dir(&current)? {
            let path = entry?.path();
            if path.is_dir() {
                pending.push(path);
            } else if extension(&path) == "csv" {
                found.push(path);
            }
        }
    }
    found.sort();
    log::info!("Found {} CSV files in {}", found.len(), dir.display());
    Ok(found)
}

/// Human-readable size: "0 B", "1.5 KB", "2.25 MB".
pub fn format_size(bytes: u64) -> String {
    const UNITS: [&str; 4] = ["B", "KB", "MB", "GB"];
    if bytes == 0 {
        return "0 B".to_string();
    }
    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    let rounded = (value * 100.0).round() / 100.0;
    format!("{rounded} {}", UNITS[unit])
}

/// Delete all but the `keep_recent` newest archives in `folder`.
/// Returns (files removed, bytes freed).
pub fn cleanup_old_downloads(folder: &Path, keep_recent: usize) -> Result<(usize, u64)> {
    if !folder.exists() {
        log::info!("Download folder {} does not exist, nothing to clean", folder.display());
        return Ok((0, 0));
    }
    let mut archives = Vec::new();
    for entry in std::fs::read_dir(folder)? {
        let path = entry?.path();
        if !path.is_file() || !CLEANUP_EXTENSIONS.contains(&extension(&path).as_str()) {
            continue;
        }
        let meta = std::fs::metadata(&path)?;
        archives.push((path, meta.modified()?, meta.len()));
    }
    archives.sort_by(|a, b| b.1.cmp(&a.1));

    let mut removed = 0usize;
    let mut freed = 0u64;
    for (path, _, size) in archives.into_iter().skip(keep_recent) {
        match std::fs::remove_file(&path) {
            Ok(()) => {
                removed += 1;
                freed += size;
                log::info!("Cleaned up old download: {} ({})", path.display(), format_size(size));
            }
            Err(e) => log::warn!("Error cleaning up {}: {e}", path.display()),
        }
    }
    if removed > 0 {
        log::info!("Download cleanup removed {removed} files, freed {}", format_size(freed));
    }
    Ok((removed, freed))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::{Duration, SystemTime};

    #[test]
    fn test_classify() {
        let dir = tempfile::tempdir().unwrap();
        assert_eq!(FileKind::classify(dir.path()), FileKind::Directory);
        assert_eq!(FileKind::classify(Path::new("a/Report.CSV")), FileKind::Csv);
        assert_eq!(FileKind::classify(Path::new("a/b.zip")), FileKind::Archive);
        assert_eq!(FileKind::classify(Path::new("a/b.7z")), FileKind::Archive);
        assert_eq!(FileKind::classify(Path::new("a/b.pdf")), FileKind::Unsupported);
    }

    #[test]
    fn test_find_csv_files_recurses() {
        let dir = tempfile::tempdir().unwrap();
        let nested = dir.path().join("inner").join("deeper");
        std::fs::create_dir_all(&nested).unwrap();
        std::fs::write(dir.path().join("a.csv"), "x").unwrap();
        std::fs::write(nested.join("b.CSV"), "x").unwrap();
        std::fs::write(nested.join("notes.txt"), "x").unwrap();
        let found = find_csv_files(dir.path()).unwrap();
        assert_eq!(found.len(), 2);
        assert!(found.iter().any(|p| p.ends_with("b.CSV")));
    }

    #[test]
    fn test_format_size() {
        assert_eq!(format_size(0), "0 B");
        assert_eq!(format_size(512), "512 B");
        assert_eq!(format_size(1536), "1.5 KB");
        assert_eq!(format_size(3 * 1024 * 1024), "3 MB");
    }

    #[test]
    fn test_cleanup_keeps_newest_archives() {
        let dir = tempfile::tempdir().unwrap();
        let base = SystemTime::now() - Duration::from_secs(1000);
        for (i, name) in ["old.zip", "mid.rar", "new.7z"].iter().enumerate() {
            let path = dir.path().join(name);
            std::fs::write(&path, "abcd").unwrap();
            let file = std::fs::File::options().write(true).open(&path).unwrap();
            file.set_modified(base + Duration::from_secs(i as u64 * 100)).unwrap();
        }
        std::fs::write(dir.path().join("keep.csv"), "x").unwrap();

        let (removed, freed) = cleanup_old_downloads(dir.path(), 2).unwrap();
        assert_eq!(removed, 1);
        assert_eq!(freed, 4);
        assert!(!dir.path().join("old.zip").exists());
        assert!(dir.path().join("new.7z").exists());
        assert!(dir.path().join("keep.csv").exists());
    }

    #[test]
    fn test_cleanup_missing_folder() {
        let dir = tempfile::tempdir().unwrap();
        assert_eq!(cleanup_old_downloads(&dir.path().join("nope"), 1).unwrap(), (0, 0));
    }
}
