//! Job runner module - runs many independent jobs with bounded parallelism.
//!
//! - JobSpec describes one job (task, input data, template vars)
//! - JobRunner runs jobs in isolated workspaces with timeouts and retries
//! - RunReport summarises a run as summary.txt and summary.json

mod report;
mod runner;
mod workspace;

use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};

use eyre::{Context, Result, bail};
use serde::{Deserialize, Serialize};

use crate::prompt::PromptVariant;

pub use report::{RunReport, RunSummary, SUMMARY_JSON, SUMMARY_TEXT, load_report, render_summary, write_report};
pub use runner::{JobRunner, JobRunnerConfig};
pub use workspace::{DATA_DIR, ERROR_LOG, Workspace};

/// One job: a task plus the inputs copied into its workspace
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobSpec {
    pub id: String,
    pub task: String,
    /// Files or directories copied into `<workspace>/data`
    #[serde(default)]
    pub data: Vec<PathBuf>,
    /// Extra template variables for the task prompt
    #[serde(default)]
    pub vars: BTreeMap<String, String>,
}

impl JobSpec {
    pub fn new(id: impl Into<String>, task: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            task: task.into(),
            data: Vec::new(),
            vars: BTreeMap::new(),
        }
    }

    pub fn with_data(mut self, path: impl Into<PathBuf>) -> Self {
        self.data.push(path.into());
        self
    }

    pub fn with_var(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.vars.insert(key.into(), value.into());
        self
    }
}

/// Jobs file layout: shared inputs plus the job list
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct JobsFile {
    /// Inputs copied into every job's workspace
    #[serde(default)]
    pub data: Vec<PathBuf>,
    pub jobs: Vec<JobSpec>,
}

impl JobsFile {
    pub fn from_yaml(text: &str) -> Result<Self> {
        let file: JobsFile = serde_yaml::from_str(text).context("Failed to parse jobs file")?;
        file.validate()?;
        Ok(file)
    }

    /// Load a jobs file; relative data paths resolve against its directory
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path).context(format!("Failed to read jobs file: {}", path.display()))?;
        let mut file = Self::from_yaml(&text)?;

        let base = path.parent().unwrap_or(Path::new("."));
        let resolve = |p: &PathBuf| if p.is_relative() { base.join(p) } else { p.clone() };
        file.data = file.data.iter().map(resolve).collect();
        for job in &mut file.jobs {
            job.data = job.data.iter().map(resolve).collect();
        }
        Ok(file)
    }

    /// Jobs with the shared inputs prepended to their own
    pub fn into_jobs(self) -> Vec<JobSpec> {
        let shared = self.data;
        self.jobs
            .into_iter()
            .map(|mut job| {
                let mut data = shared.clone();
                data.append(&mut job.data);
                job.data = data;
                job
            })
            .collect()
    }

    fn validate(&self) -> Result<()> {
        let mut seen = HashSet::new();
        for job in &self.jobs {
            if job.id.trim().is_empty() {
                bail!("Job id must not be empty");
            }
            if job.id.contains(['/', '\\']) || job.id == "." || job.id == ".." {
                bail!("Job id '{}' is not a valid directory name", job.id);
            }
            if !seen.insert(job.id.as_str()) {
                bail!("Duplicate job id '{}'", job.id);
            }
        }
        Ok(())
    }
}

/// Final record for one job
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobResult {
    pub id: String,
    pub success: bool,
    /// Deciding critic total; `None` for skipped jobs
    pub score: Option<i64>,
    pub iterations: u32,
    pub attempts: u32,
    pub variant: PromptVariant,
    #[serde(default)]
    pub skipped: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub workspace: PathBuf,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context_path: Option<PathBuf>,
}

impl JobResult {
    /// Result for a job whose completion marker already exists
    pub fn skipped(id: &str, workspace: &Workspace) -> Self {
        Self {
            id: id.to_string(),
            success: true,
            score: None,
            iterations: 0,
            attempts: 0,
            variant: PromptVariant::Primary,
            skipped: true,
            error: None,
            workspace: workspace.root().to_path_buf(),
            context_path: Some(workspace.context_path()),
        }
    }

    /// Result for an attempt that produced no outcome
    pub fn failed(id: &str, workspace: &Workspace, variant: PromptVariant, attempts: u32, error: String) -> Self {
        Self {
            id: id.to_string(),
            success: false,
            score: Some(0),
            iterations: 0,
            attempts,
            variant,
            skipped: false,
            error: Some(error),
            workspace: workspace.root().to_path_buf(),
            context_path: Some(workspace.context_path()),
        }
    }

    pub fn score_or_zero(&self) -> i64 {
        self.score.unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_jobs_file_from_yaml() {
        let yaml = r#"
data:
  - shared/
jobs:
  - id: north
    task: Summarise the northern region
    data: [north.csv]
    vars:
      region: north
  - id: south
    task: Summarise the southern region
"#;
        let file = JobsFile::from_yaml(yaml).unwrap();
        assert_eq!(file.jobs.len(), 2);
        assert_eq!(file.jobs[0].vars.get("region").map(String::as_str), Some("north"));

        let jobs = file.into_jobs();
        assert_eq!(jobs[0].data, vec![PathBuf::from("shared/"), PathBuf::from("north.csv")]);
        assert_eq!(jobs[1].data, vec![PathBuf::from("shared/")]);
    }

    #[test]
    fn test_jobs_file_rejects_duplicate_ids() {
        let yaml = "jobs:\n  - {id: a, task: x}\n  - {id: a, task: y}\n";
        let err = JobsFile::from_yaml(yaml).unwrap_err();
        assert!(err.to_string().contains("Duplicate job id 'a'"));
    }

    #[test]
    fn test_jobs_file_rejects_path_like_ids() {
        let yaml = "jobs:\n  - {id: ../escape, task: x}\n";
        assert!(JobsFile::from_yaml(yaml).is_err());
    }

    #[test]
    fn test_jobs_file_load_resolves_relative_paths() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("jobs.yml");
        std::fs::write(&path, "jobs:\n  - {id: a, task: x, data: [input.csv]}\n").unwrap();

        let file = JobsFile::load(&path).unwrap();
        assert_eq!(file.jobs[0].data, vec![dir.path().join("input.csv")]);
    }

    #[test]
    fn test_job_result_serializes_without_empty_error() {
        let ws = Workspace::new("/tmp/work", "a");
        let result = JobResult::skipped("a", &ws);
        let json = serde_json::to_value(&result).unwrap();
        assert_eq!(json["skipped"], true);
        assert!(json["score"].is_null());
        assert!(json.get("error").is_none());
    }
}
