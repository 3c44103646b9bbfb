//! Per-job workspace directories under the run's work dir

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use chrono::Utc;

use crate::context::CONTEXT_FILE;
use crate::error::{CritloopError, Result};

pub const DATA_DIR: &str = "data";
pub const ERROR_LOG: &str = "error.log";

/// One isolated job directory: `<work_dir>/<name>`
#[derive(Debug, Clone)]
pub struct Workspace {
    root: PathBuf,
}

impl Workspace {
    pub fn new(work_dir: impl AsRef<Path>, name: &str) -> Self {
        Self {
            root: work_dir.as_ref().join(name),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn data_dir(&self) -> PathBuf {
        self.root.join(DATA_DIR)
    }

    pub fn context_path(&self) -> PathBuf {
        self.root.join(CONTEXT_FILE)
    }

    pub fn error_log_path(&self) -> PathBuf {
        self.root.join(ERROR_LOG)
    }

    /// Whether the completion marker (relative to the root) exists
    pub fn is_complete(&self, marker: &str) -> bool {
        self.root.join(marker).exists()
    }

    /// Create the workspace and copy input data into `data/`.
    ///
    /// With `reset` any existing directory is removed first. Missing sources
    /// are skipped with a warning.
    pub fn prepare(&self, sources: &[PathBuf], reset: bool) -> Result<()> {
        if reset && self.root.exists() {
            log::info!("Resetting workspace {}", self.root.display());
            fs::remove_dir_all(&self.root).map_err(|e| self.error("remove", e))?;
        }

        let data_dir = self.data_dir();
        fs::create_dir_all(&data_dir).map_err(|e| self.error("create", e))?;

        let mut copied = 0;
        for source in sources {
            if !source.exists() {
                log::warn!("Input {} does not exist, skipping", source.display());
                continue;
            }
            let Some(name) = source.file_name() else {
                log::warn!("Input {} has no file name, skipping", source.display());
                continue;
            };

            let target = data_dir.join(name);
            let copy = if source.is_dir() {
                copy_dir_recursive(source, &target)
            } else {
                fs::copy(source, &target).map(|_| ())
            };
            copy.map_err(|e| self.error(&format!("copy {} into", source.display()), e))?;
            copied += 1;
        }

        log::debug!("Copied {} input(s) into {}", copied, data_dir.display());
        Ok(())
    }

    /// Overwrite `error.log` with the failure of one attempt
    pub fn write_error_log(&self, attempt: u32, error: &str) {
        let text = format!(
            "[{}] Error on attempt {}:\n{}\n",
            Utc::now().format("%Y-%m-%d %H:%M:%S"),
            attempt,
            error
        );
        let written = fs::create_dir_all(&self.root).and_then(|_| fs::write(self.error_log_path(), text));
        if let Err(e) = written {
            log::warn!("Failed to write {}: {}", self.error_log_path().display(), e);
        }
    }

    fn error(&self, action: &str, e: io::Error) -> CritloopError {
        CritloopError::Workspace(format!("Failed to {} {}: {}", action, self.root.display(), e))
    }
}

fn copy_dir_recursive(src: &Path, dst: &Path) -> io::Result<()> {
    fs::create_dir_all(dst)?;
    for entry in fs::read_dir(src)? {
        let entry = entry?;
        let target = dst.join(entry.file_name());
        if entry.file_type()?.is_dir() {
            copy_dir_recursive(&entry.path(), &target)?;
        } else {
            fs::copy(entry.path(), &target)?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_prepare_copies_files_and_dirs() {
        let src = TempDir::new().unwrap();
        std::fs::create_dir_all(src.path().join("survey/raw")).unwrap();
        std::fs::write(src.path().join("survey/raw/a.csv"), "x").unwrap();
        std::fs::write(src.path().join("notes.md"), "n").unwrap();

        let work = TempDir::new().unwrap();
        let ws = Workspace::new(work.path(), "job-1");
        ws.prepare(
            &[
                src.path().join("survey"),
                src.path().join("notes.md"),
                src.path().join("missing"),
            ],
            false,
        )
        .unwrap();

        assert!(ws.data_dir().join("survey/raw/a.csv").exists());
        assert!(ws.data_dir().join("notes.md").exists());
        assert!(!ws.data_dir().join("missing").exists());
    }

    #[test]
    fn test_prepare_reset_clears_previous_work() {
        let work = TempDir::new().unwrap();
        let ws = Workspace::new(work.path(), "job-1");
        ws.prepare(&[], false).unwrap();
        std::fs::write(ws.root().join("draft.md"), "old").unwrap();

        ws.prepare(&[], false).unwrap();
        assert!(ws.root().join("draft.md").exists());

        ws.prepare(&[], true).unwrap();
        assert!(!ws.root().join("draft.md").exists());
        assert!(ws.data_dir().exists());
    }

    #[test]
    fn test_is_complete_marker() {
        let work = TempDir::new().unwrap();
        let ws = Workspace::new(work.path(), "job-1");
        assert!(!ws.is_complete("results/report.md"));

        std::fs::create_dir_all(ws.root().join("results")).unwrap();
        std::fs::write(ws.root().join("results/report.md"), "# Report").unwrap();
        assert!(ws.is_complete("results/report.md"));
    }

    #[test]
    fn test_write_error_log() {
        let work = TempDir::new().unwrap();
        let ws = Workspace::new(work.path(), "job-1");
        ws.write_error_log(2, "Deadline exceeded after 1s");

        let text = std::fs::read_to_string(ws.error_log_path()).unwrap();
        assert!(text.contains("Error on attempt 2:"));
        assert!(text.contains("Deadline exceeded"));
    }
}
