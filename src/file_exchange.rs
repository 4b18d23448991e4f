// 📁 File Exchange - outbound drops and inbound pickups
//
// Steps only talk to this trait, so the folders can live on a local disk in
// tests and behind a transfer service elsewhere.

use crate::config::FolderLayout;
use crate::error::Result;
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::debug;

pub trait FileTransfer {
    /// Write `content` to a new file at `path`, creating parent folders as needed.
    /// An existing file is never overwritten.
    fn write_bytes(&self, path: &Path, content: &[u8]) -> Result<()>;

    /// Regular files directly under `folder`, sorted by name (oldest first for timestamped names)
    fn list_files(&self, folder: &Path) -> Result<Vec<PathBuf>>;

    fn read(&self, path: &Path) -> Result<Vec<u8>>;

    /// Move `path` into `folder`, keeping the file name; returns the new location
    fn move_to(&self, path: &Path, folder: &Path) -> Result<PathBuf>;

    /// Delete a file written earlier, e.g. an outbound file whose step rolled back
    fn remove(&self, path: &Path) -> Result<()>;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct LocalFileTransfer;

impl FileTransfer for LocalFileTransfer {
    fn write_bytes(&self, path: &Path, content: &[u8]) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let mut file = OpenOptions::new().write(true).create_new(true).open(path)?;
        file.write_all(content)?;
        file.sync_all()?;
        debug!(path = %path.display(), bytes = content.len(), "wrote file");
        Ok(())
    }

    fn list_files(&self, folder: &Path) -> Result<Vec<PathBuf>> {
        if !folder.exists() {
            return Ok(Vec::new());
        }
        let mut files = Vec::new();
        for entry in fs::read_dir(folder)? {
            let entry = entry?;
            if entry.file_type()?.is_file() {
                files.push(entry.path());
            }
        }
        files.sort();
        Ok(files)
    }

    fn read(&self, path: &Path) -> Result<Vec<u8>> {
        Ok(fs::read(path)?)
    }

    fn move_to(&self, path: &Path, folder: &Path) -> Result<PathBuf> {
        fs::create_dir_all(folder)?;
        let file_name = path.file_name().ok_or_else(|| {
            std::io::Error::new(std::io::ErrorKind::InvalidInput, format!("{} has no file name", path.display()))
        })?;
        let target = folder.join(file_name);
        fs::rename(path, &target)?;
        debug!(from = %path.display(), to = %target.display(), "moved file");
        Ok(target)
    }

    fn remove(&self, path: &Path) -> Result<()> {
        fs::remove_file(path)?;
        debug!(path = %path.display(), "removed file");
        Ok(())
    }
}

/// Create every exchange folder under the configured root
pub fn ensure_folders(layout: &FolderLayout) -> Result<()> {
    for folder in layout.all() {
        fs::create_dir_all(folder)?;
    }
    Ok(())
}

/// `<prefix>-<YYYY-MM-DD>-<HHMMSSmmm>.<ext>`, sortable by creation time
pub fn timestamped_name(prefix: &str, at: chrono::NaiveDateTime, extension: &str) -> String {
    format!("{}-{}.{}", prefix, at.format("%Y-%m-%d-%H%M%S%3f"), extension)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use tempfile::TempDir;

    #[test]
    fn test_write_list_move() {
        let root = TempDir::new().unwrap();
        let transfer = LocalFileTransfer;
        let received = root.path().join("received");
        let processed = root.path().join("processed");

        transfer.write_bytes(&received.join("b.csv"), b"b").unwrap();
        transfer.write_bytes(&received.join("a.csv"), b"a").unwrap();

        let files = transfer.list_files(&received).unwrap();
        assert_eq!(files, vec![received.join("a.csv"), received.join("b.csv")]);

        let moved = transfer.move_to(&files[0], &processed).unwrap();
        assert_eq!(moved, processed.join("a.csv"));
        assert_eq!(transfer.read(&moved).unwrap(), b"a");
        assert_eq!(transfer.list_files(&received).unwrap().len(), 1);
    }

    #[test]
    fn test_missing_folder_lists_nothing() {
        let root = TempDir::new().unwrap();
        assert!(LocalFileTransfer.list_files(&root.path().join("nope")).unwrap().is_empty());
    }

    #[test]
    fn test_ensure_folders_creates_layout() {
        let root = TempDir::new().unwrap();
        let layout = FolderLayout::new(root.path());
        ensure_folders(&layout).unwrap();
        assert!(layout.all().iter().all(|p| p.is_dir()));
    }

    #[test]
    fn test_timestamped_name() {
        let at = NaiveDate::from_ymd_opt(2021, 9, 27)
            .unwrap()
            .and_hms_milli_opt(8, 5, 9, 42)
            .unwrap();
        assert_eq!(timestamped_name("audit-report", at, "csv"), "audit-report-2021-09-27-080509042.csv");

        let a_moment_later = at + chrono::Duration::milliseconds(1);
        assert_ne!(timestamped_name("audit-report", at, "csv"), timestamped_name("audit-report", a_moment_later, "csv"));
    }

    #[test]
    fn test_existing_file_is_never_overwritten() {
        let root = TempDir::new().unwrap();
        let path = root.path().join("outbound").join("PUB-NACHA-2021-09-27-080509042.ach");
        LocalFileTransfer.write_bytes(&path, b"first").unwrap();

        let err = LocalFileTransfer.write_bytes(&path, b"second").unwrap_err();
        assert!(matches!(err, crate::error::PipelineError::Io(ref e) if e.kind() == std::io::ErrorKind::AlreadyExists));
        assert_eq!(LocalFileTransfer.read(&path).unwrap(), b"first");

        LocalFileTransfer.remove(&path).unwrap();
        assert!(!path.exists());
    }
}
