//! Run summaries: aggregate stats plus per-job details, written as text and
//! JSON into the work dir.

use std::fmt::Write as _;
use std::path::Path;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::JobResult;
use crate::error::Result;

pub const SUMMARY_TEXT: &str = "summary.txt";
pub const SUMMARY_JSON: &str = "summary.json";

/// Aggregate stats of one run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunSummary {
    pub total: usize,
    pub succeeded: usize,
    pub skipped: usize,
    pub failed: usize,
    /// Score stats over jobs that ran and succeeded
    pub average_score: Option<f64>,
    pub min_score: Option<i64>,
    pub max_score: Option<i64>,
    /// Scale the scores are out of
    pub score_scale: i64,
    pub generated_at: DateTime<Utc>,
}

impl RunSummary {
    pub fn from_results(results: &[JobResult], score_scale: i64) -> Self {
        let scores: Vec<i64> = results
            .iter()
            .filter(|r| r.success && !r.skipped)
            .filter_map(|r| r.score)
            .collect();
        let average_score = (!scores.is_empty()).then(|| scores.iter().sum::<i64>() as f64 / scores.len() as f64);

        Self {
            total: results.len(),
            succeeded: results.iter().filter(|r| r.success).count(),
            skipped: results.iter().filter(|r| r.skipped).count(),
            failed: results.iter().filter(|r| !r.success).count(),
            average_score,
            min_score: scores.iter().min().copied(),
            max_score: scores.iter().max().copied(),
            score_scale,
            generated_at: Utc::now(),
        }
    }
}

/// Everything a run produced, in job order
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunReport {
    pub summary: RunSummary,
    pub results: Vec<JobResult>,
}

impl RunReport {
    pub fn new(results: Vec<JobResult>, score_scale: i64) -> Self {
        Self {
            summary: RunSummary::from_results(&results, score_scale),
            results,
        }
    }

    pub fn result(&self, id: &str) -> Option<&JobResult> {
        self.results.iter().find(|r| r.id == id)
    }
}

/// Human-readable summary
pub fn render_summary(report: &RunReport) -> String {
    let s = &report.summary;
    let mut out = String::new();

    let _ = writeln!(out, "=== Run Summary ({}) ===", s.generated_at.format("%Y-%m-%d %H:%M:%S"));
    let _ = writeln!(out);
    let _ = writeln!(out, "Total jobs: {}", s.total);
    let _ = writeln!(out, "Successful jobs: {}/{}", s.succeeded, s.total);
    let _ = writeln!(out, "Skipped jobs (existing results): {}/{}", s.skipped, s.total);
    let _ = writeln!(out, "Failed jobs: {}/{}", s.failed, s.total);
    match (s.average_score, s.min_score, s.max_score) {
        (Some(avg), Some(min), Some(max)) => {
            let _ = writeln!(out, "Scores (excluding skipped): avg={:.2}, min={}, max={}", avg, min, max);
        }
        _ => {
            let _ = writeln!(out, "Scores (excluding skipped): none");
        }
    }

    let _ = writeln!(out);
    let _ = writeln!(out, "=== Detailed Results ===");
    for r in &report.results {
        let status = match (r.skipped, r.success) {
            (true, _) => "SKIPPED",
            (false, true) => "SUCCESS",
            (false, false) => "FAILED",
        };
        let _ = writeln!(out);
        let _ = writeln!(out, "Job {}: {}", r.id, status);
        if let Some(score) = r.score {
            let _ = writeln!(out, "  Score: {}/{}", score, s.score_scale);
        }
        if !r.skipped {
            let _ = writeln!(out, "  Iterations: {}", r.iterations);
            let _ = writeln!(out, "  Attempts: {}", r.attempts);
            let _ = writeln!(out, "  Variant: {}", r.variant);
        }
        if let Some(error) = &r.error {
            let _ = writeln!(out, "  Error: {}", error);
        }
        let _ = writeln!(out, "  Workspace: {}", r.workspace.display());
    }
    out
}

/// Write summary.txt and summary.json into `dir`
pub fn write_report(report: &RunReport, dir: &Path) -> Result<()> {
    std::fs::create_dir_all(dir)?;
    std::fs::write(dir.join(SUMMARY_TEXT), render_summary(report))?;
    std::fs::write(dir.join(SUMMARY_JSON), serde_json::to_string_pretty(report)?)?;
    log::info!("Wrote run summary to {}", dir.display());
    Ok(())
}

/// Read a summary.json written by [`write_report`]
pub fn load_report(path: &Path) -> Result<RunReport> {
    let text = std::fs::read_to_string(path)?;
    Ok(serde_json::from_str(&text)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::jobs::Workspace;
    use crate::prompt::PromptVariant;
    use tempfile::TempDir;

    fn result(id: &str, success: bool, score: i64) -> JobResult {
        JobResult {
            id: id.to_string(),
            success,
            score: Some(score),
            iterations: 3,
            attempts: 1,
            variant: PromptVariant::Primary,
            skipped: false,
            error: (!success).then(|| "Max iterations (3) reached without a passing score".to_string()),
            workspace: format!("/work/{}", id).into(),
            context_path: None,
        }
    }

    fn sample() -> RunReport {
        let skipped = JobResult::skipped("c", &Workspace::new("/work", "c"));
        RunReport::new(vec![result("a", true, 11), result("b", false, 6), result("d", true, 13), skipped], 15)
    }

    #[test]
    fn test_summary_stats_exclude_failed_and_skipped() {
        let report = sample();
        let s = &report.summary;
        assert_eq!(s.total, 4);
        assert_eq!(s.succeeded, 3);
        assert_eq!(s.skipped, 1);
        assert_eq!(s.failed, 1);
        assert_eq!(s.average_score, Some(12.0));
        assert_eq!(s.min_score, Some(11));
        assert_eq!(s.max_score, Some(13));
    }

    #[test]
    fn test_summary_without_scores() {
        let report = RunReport::new(vec![result("a", false, 0)], 15);
        assert_eq!(report.summary.average_score, None);
        assert!(render_summary(&report).contains("Scores (excluding skipped): none"));
    }

    #[test]
    fn test_render_summary() {
        let text = render_summary(&sample());
        assert!(text.contains("Successful jobs: 3/4"));
        assert!(text.contains("Skipped jobs (existing results): 1/4"));
        assert!(text.contains("avg=12.00, min=11, max=13"));
        assert!(text.contains("Job a: SUCCESS\n  Score: 11/15"));
        assert!(text.contains("Job b: FAILED"));
        assert!(text.contains("Error: Max iterations (3) reached"));
        assert!(text.contains("Job c: SKIPPED"));
    }

    #[test]
    fn test_write_and_load_report() {
        let dir = TempDir::new().unwrap();
        let report = sample();
        write_report(&report, dir.path()).unwrap();

        assert!(dir.path().join(SUMMARY_TEXT).exists());
        let loaded = load_report(&dir.path().join(SUMMARY_JSON)).unwrap();
        assert_eq!(loaded, report);
        assert_eq!(loaded.result("b").map(|r| r.success), Some(false));
    }
}
