//! Tool execution context - scoped to a single job's workspace

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;

/// Default wall-clock bound for `run_command`
pub const DEFAULT_COMMAND_TIMEOUT: Duration = Duration::from_secs(120);

/// Default cap on captured command output
pub const DEFAULT_MAX_OUTPUT_BYTES: usize = 30_000;

/// Execution context for tools - scoped to a single job
#[derive(Debug, Clone)]
pub struct ToolContext {
    /// Job workspace - all file ops constrained here
    pub workspace: PathBuf,

    pub job_id: String,

    pub command_timeout: Duration,

    pub max_output_bytes: usize,

    /// Files read so far (for edit validation)
    read_files: Arc<Mutex<HashSet<PathBuf>>>,
}

impl ToolContext {
    pub fn new(workspace: PathBuf, job_id: impl Into<String>) -> Self {
        Self {
            workspace,
            job_id: job_id.into(),
            command_timeout: DEFAULT_COMMAND_TIMEOUT,
            max_output_bytes: DEFAULT_MAX_OUTPUT_BYTES,
            read_files: Arc::new(Mutex::new(HashSet::new())),
        }
    }

    pub fn with_command_timeout(mut self, timeout: Duration) -> Self {
        self.command_timeout = timeout;
        self
    }

    pub fn with_max_output_bytes(mut self, max: usize) -> Self {
        self.max_output_bytes = max;
        self
    }

    /// Track that a file was read (enables edit validation)
    pub async fn track_read(&self, path: &Path) {
        let mut read_files = self.read_files.lock().await;
        read_files.insert(self.normalize_path(path));
    }

    /// Check if a file was read (required before edit)
    pub async fn was_read(&self, path: &Path) -> bool {
        let read_files = self.read_files.lock().await;
        read_files.contains(&self.normalize_path(path))
    }

    fn normalize_path(&self, path: &Path) -> PathBuf {
        if path.is_absolute() { path.to_path_buf() } else { self.workspace.join(path) }
    }

    /// Resolve `path` and reject anything outside the workspace
    pub fn validate_path(&self, path: &Path) -> Result<PathBuf, ToolError> {
        let normalized = self.normalize_path(path);

        // New files cannot be canonicalized yet
        let canonical = normalized.canonicalize().unwrap_or_else(|_| normalized.clone());

        let workspace_canonical = self.workspace.canonicalize().map_err(|e| ToolError::IoError {
            operation: "canonicalize workspace".to_string(),
            source: e,
        })?;

        if canonical.starts_with(&workspace_canonical) && !escapes(&normalized) {
            Ok(canonical)
        } else if normalized.starts_with(&workspace_canonical) && !escapes(&normalized) {
            Ok(normalized)
        } else {
            Err(ToolError::SandboxViolation {
                path: path.to_path_buf(),
                workspace: self.workspace.clone(),
            })
        }
    }

    /// Path relative to the workspace, for display
    pub fn display_path(&self, path: &Path) -> String {
        let root = self.workspace.canonicalize().unwrap_or_else(|_| self.workspace.clone());
        path.strip_prefix(&root)
            .or_else(|_| path.strip_prefix(&self.workspace))
            .unwrap_or(path)
            .to_string_lossy()
            .to_string()
    }
}

/// Non-canonical paths must not climb out through `..`
fn escapes(path: &Path) -> bool {
    !path.exists() && path.components().any(|c| matches!(c, std::path::Component::ParentDir))
}

/// Errors that can occur during tool execution
#[derive(Debug, thiserror::Error)]
pub enum ToolError {
    #[error("Path {path} escapes workspace {workspace}")]
    SandboxViolation { path: PathBuf, workspace: PathBuf },

    #[error("Must read file before editing: {path}")]
    EditWithoutRead { path: String },

    #[error("Command timed out after {timeout_ms}ms")]
    CommandTimeout { timeout_ms: u64 },

    #[error("IO error during {operation}: {source}")]
    IoError {
        operation: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid input: {message}")]
    InvalidInput { message: String },
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[tokio::test]
    async fn test_read_tracking() {
        let dir = tempdir().unwrap();
        let ctx = ToolContext::new(dir.path().to_path_buf(), "job_001");

        let test_file = Path::new("test.txt");
        assert!(!ctx.was_read(test_file).await);

        ctx.track_read(test_file).await;
        assert!(ctx.was_read(test_file).await);
    }

    #[test]
    fn test_path_validation_inside_workspace() {
        let dir = tempdir().unwrap();
        let ctx = ToolContext::new(dir.path().to_path_buf(), "job_001");
        std::fs::write(dir.path().join("test.txt"), "content").unwrap();

        assert!(ctx.validate_path(Path::new("test.txt")).is_ok());
        assert!(ctx.validate_path(Path::new("results/new.md")).is_ok());
    }

    #[test]
    fn test_path_validation_outside_workspace() {
        let dir = tempdir().unwrap();
        let ctx = ToolContext::new(dir.path().to_path_buf(), "job_001");

        let result = ctx.validate_path(Path::new("/etc/passwd"));
        assert!(matches!(result, Err(ToolError::SandboxViolation { .. })));

        let result = ctx.validate_path(Path::new("../../escape.txt"));
        assert!(matches!(result, Err(ToolError::SandboxViolation { .. })));
    }

    #[test]
    fn test_display_path_is_relative() {
        let dir = tempdir().unwrap();
        let ctx = ToolContext::new(dir.path().to_path_buf(), "job_001");
        std::fs::write(dir.path().join("a.txt"), "").unwrap();

        let full = ctx.validate_path(Path::new("a.txt")).unwrap();
        assert_eq!(ctx.display_path(&full), "a.txt");
    }

    #[test]
    fn test_builder_overrides() {
        let ctx = ToolContext::new(PathBuf::from("/tmp"), "j")
            .with_command_timeout(Duration::from_secs(5))
            .with_max_output_bytes(100);
        assert_eq!(ctx.command_timeout, Duration::from_secs(5));
        assert_eq!(ctx.max_output_bytes, 100);
    }
}
