//! Workspace overview for prompts: a file listing with short previews of
//! text files.

use std::path::Path;

/// Files the engine itself writes into a workspace
const ENGINE_FILES: &[&str] = &["context.json", "history.txt", "error.log"];

const PREVIEW_EXTENSIONS: &[&str] = &["md", "txt", "csv", "json", "yaml", "yml", "toml", "py", "rs", "sh"];

const MAX_FILES: usize = 200;

/// Limits for [`workspace_snapshot`]
#[derive(Debug, Clone, Copy)]
pub struct SnapshotLimits {
    pub max_files: usize,
    /// Characters previewed per text file
    pub preview_chars: usize,
    /// Text files that get a preview; the rest are listed only
    pub max_previews: usize,
}

impl Default for SnapshotLimits {
    fn default() -> Self {
        Self {
            max_files: MAX_FILES,
            preview_chars: 2000,
            max_previews: 10,
        }
    }
}

/// Render the files under `root`, sorted by path
pub fn workspace_snapshot(root: &Path, limits: SnapshotLimits) -> String {
    let pattern = root.join("**").join("*");
    let Some(pattern) = pattern.to_str() else {
        return "(workspace path is not valid UTF-8)".to_string();
    };

    let mut files: Vec<_> = match glob::glob(pattern) {
        Ok(paths) => paths.filter_map(|p| p.ok()).filter(|p| p.is_file()).collect(),
        Err(e) => {
            log::warn!("Workspace snapshot of {} failed: {}", root.display(), e);
            return "(workspace could not be listed)".to_string();
        }
    };
    files.sort();

    let mut lines = Vec::new();
    let mut previews = 0;
    let total = files.len();

    for path in files.iter().take(limits.max_files) {
        let rel = path.strip_prefix(root).unwrap_or(path);
        let rel_str = rel.to_string_lossy();
        if ENGINE_FILES.contains(&rel_str.as_ref()) {
            continue;
        }

        let size = std::fs::metadata(path).map(|m| m.len()).unwrap_or(0);
        lines.push(format!("- {} ({} bytes)", rel_str, size));

        let previewable = path
            .extension()
            .and_then(|e| e.to_str())
            .is_some_and(|e| PREVIEW_EXTENSIONS.contains(&e.to_ascii_lowercase().as_str()));
        if previewable
            && previews < limits.max_previews
            && let Ok(content) = std::fs::read_to_string(path)
        {
            lines.push(preview(&content, limits.preview_chars));
            previews += 1;
        }
    }

    if total > limits.max_files {
        lines.push(format!("... {} more files not shown", total - limits.max_files));
    }
    if lines.is_empty() {
        return "(empty workspace)".to_string();
    }
    lines.join("\n")
}

fn preview(content: &str, max_chars: usize) -> String {
    let mut text: String = content.chars().take(max_chars).collect();
    if content.chars().count() > max_chars {
        text.push_str("\n[TRUNCATED]");
    }
    format!("```\n{}\n```", text.trim_end())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_snapshot_lists_and_previews() {
        let dir = TempDir::new().unwrap();
        std::fs::create_dir_all(dir.path().join("data")).unwrap();
        std::fs::write(dir.path().join("data/sales.csv"), "region,total\nnorth,10\n").unwrap();
        std::fs::write(dir.path().join("model.bin"), [0u8, 1, 2]).unwrap();
        std::fs::write(dir.path().join("context.json"), "{}").unwrap();

        let text = workspace_snapshot(dir.path(), SnapshotLimits::default());

        assert!(text.contains("- data/sales.csv (22 bytes)"));
        assert!(text.contains("north,10"));
        assert!(text.contains("- model.bin (3 bytes)"));
        assert!(!text.contains("context.json"));
    }

    #[test]
    fn test_snapshot_truncates_previews() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("notes.md"), "x".repeat(50)).unwrap();

        let limits = SnapshotLimits {
            preview_chars: 10,
            ..SnapshotLimits::default()
        };
        let text = workspace_snapshot(dir.path(), limits);
        assert!(text.contains("xxxxxxxxxx\n[TRUNCATED]"));
    }

    #[test]
    fn test_snapshot_empty() {
        let dir = TempDir::new().unwrap();
        assert_eq!(workspace_snapshot(dir.path(), SnapshotLimits::default()), "(empty workspace)");
    }

    #[test]
    fn test_snapshot_caps_file_count() {
        let dir = TempDir::new().unwrap();
        for i in 0..5 {
            std::fs::write(dir.path().join(format!("f{}.bin", i)), "").unwrap();
        }
        let limits = SnapshotLimits {
            max_files: 2,
            ..SnapshotLimits::default()
        };
        let text = workspace_snapshot(dir.path(), limits);
        assert!(text.contains("... 3 more files not shown"));
    }
}
