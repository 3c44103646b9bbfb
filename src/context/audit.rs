//! Append-only plain-text audit log (`history.txt`) for one job

use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::Utc;

use crate::error::Result;

#[derive(Debug, Clone)]
pub struct AuditLog {
    path: PathBuf,
}

impl AuditLog {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append `[timestamp] KIND: text`
    pub fn append(&self, kind: &str, text: &str) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        let mut file = OpenOptions::new().create(true).append(true).open(&self.path)?;
        writeln!(
            file,
            "[{}] {}: {}",
            Utc::now().format("%Y-%m-%d %H:%M:%S"),
            kind.to_uppercase(),
            text
        )?;
        Ok(())
    }

    /// Append, logging instead of failing
    pub fn note(&self, kind: &str, text: &str) {
        if let Err(e) = self.append(kind, text) {
            log::warn!("Failed to append to {}: {}", self.path.display(), e);
        }
    }
}
