//! Plain-text assessment reports written to disk.

use std::fmt::Write as _;
use std::path::PathBuf;

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::Utc;
use tracing::info;

use crate::models::{CodeRequest, FullAnalysisResponse};

#[async_trait]
pub trait ReportWriter: Send + Sync {
    /// Render and persist a report, returning the written path.
    async fn write(&self, req: &CodeRequest, resp: &FullAnalysisResponse) -> Result<PathBuf>;
}

pub struct TextReportWriter {
    reports_dir: PathBuf,
}

impl TextReportWriter {
    pub fn new(reports_dir: PathBuf) -> Self {
        Self { reports_dir }
    }
}

#[async_trait]
impl ReportWriter for TextReportWriter {
    async fn write(&self, req: &CodeRequest, resp: &FullAnalysisResponse) -> Result<PathBuf> {
        let stamp = Utc::now().format("%Y%m%d_%H%M%S");
        let assignment = sanitize_file_part(req.assignment_name.as_deref().unwrap_or("assignment"));
        let candidate = sanitize_file_part(req.candidate_name.as_deref().unwrap_or("candidate"));
        let path = self
            .reports_dir
            .join(format!("{stamp}_{assignment}_{candidate}.txt"));

        tokio::fs::create_dir_all(&self.reports_dir)
            .await
            .context("failed to create reports dir")?;
        tokio::fs::write(&path, render(req, resp))
            .await
            .with_context(|| format!("failed to write report {}", path.display()))?;

        info!(path = %path.display(), "report written");
        Ok(path)
    }
}

/// Keep alphanumerics, dash and underscore; everything else becomes `_`.
fn sanitize_file_part(part: &str) -> String {
    let cleaned: String = part
        .trim()
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                c
            } else {
                '_'
            }
        })
        .collect();
    if cleaned.is_empty() {
        "unknown".to_string()
    } else {
        cleaned
    }
}

fn render(req: &CodeRequest, resp: &FullAnalysisResponse) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "CODE ASSESSMENT REPORT");
    let _ = writeln!(out, "Generated: {}", Utc::now().format("%Y-%m-%d %H:%M:%S UTC"));
    let _ = writeln!(
        out,
        "Candidate:  {}",
        req.candidate_name.as_deref().unwrap_or("-")
    );
    let _ = writeln!(
        out,
        "Assignment: {}",
        req.assignment_name.as_deref().unwrap_or("-")
    );
    let _ = writeln!(out);

    let _ = writeln!(out, "== Summary ==");
    let _ = writeln!(
        out,
        "Final score:      {}",
        resp.summary
            .final_score
            .map(|s| s.to_string())
            .unwrap_or_else(|| "-".into())
    );
    let _ = writeln!(out, "Compiles:         {}", resp.summary.compiles);
    let _ = writeln!(out, "All tests passed: {}", resp.summary.all_tests_passed);
    let _ = writeln!(out);

    if let Some(ai) = &resp.ai_review {
        let _ = writeln!(out, "== AI Review ==");
        let _ = writeln!(
            out,
            "Score: {}",
            ai.final_score
                .map(|s| s.to_string())
                .unwrap_or_else(|| "-".into())
        );
        let _ = writeln!(out, "{}", ai.general_feedback);
        for issue in &ai.issues {
            let _ = writeln!(
                out,
                "  [{}] lines {}-{}: {}",
                issue.severity,
                issue.line_start.unwrap_or(0),
                issue.line_end.unwrap_or(0),
                issue.suggestion
            );
        }
        let _ = writeln!(out);
    }

    if let Some(sa) = &resp.static_analysis {
        let _ = writeln!(out, "== Static Analysis ({}) ==", sa.analyzer_name);
        if sa.diagnostics.is_empty() {
            let _ = writeln!(out, "No diagnostics.");
        }
        for d in &sa.diagnostics {
            let _ = writeln!(
                out,
                "  {} {} at {}:{}: {}",
                d.severity,
                d.id,
                d.line.unwrap_or(0),
                d.column.unwrap_or(0),
                d.message
            );
        }
        let _ = writeln!(out);
    }

    if let Some(rt) = &resp.runtime {
        let _ = writeln!(out, "== Runtime ==");
        let _ = writeln!(out, "Exit code: {}", rt.exit_code);
        for phase in &rt.phases {
            let _ = writeln!(out, "  phase {}: {} ms", phase.name, phase.duration_ms);
        }
        if let Some(d) = rt.run_duration_ms {
            let _ = writeln!(out, "Run duration: {d} ms");
        }
        if let Some(cpu) = rt.run_average_cpu_pct {
            let _ = writeln!(out, "Avg CPU: {cpu:.1}%");
        }
        if let Some(rss) = rt.run_peak_rss_bytes {
            let _ = writeln!(out, "Peak RSS: {rss} bytes");
        }
        let _ = writeln!(out);
    }

    if let Some(tests) = &resp.tests {
        let _ = writeln!(out, "== Tests ==");
        let _ = writeln!(
            out,
            "{} total, {} passed, {} failed",
            tests.total, tests.passed, tests.failed
        );
        for case in &tests.tests {
            let _ = writeln!(out, "  [{}] {}", case.outcome, case.name);
            if let Some(msg) = &case.message {
                let _ = writeln!(out, "      {msg}");
            }
        }
        let _ = writeln!(out);
    }

    if !resp.task_failures.is_empty() {
        let _ = writeln!(out, "== Task Failures ==");
        for failure in &resp.task_failures {
            let _ = writeln!(out, "  {}: {}", failure.task, failure.error);
        }
        let _ = writeln!(out);
    }

    let _ = writeln!(out, "== Submitted Code ==");
    let _ = writeln!(out, "{}", req.code);

    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{AiReviewResult, OverallSummary, TestCaseResult, TestsAnalysisResult};

    fn request() -> CodeRequest {
        CodeRequest {
            action: "analyze".into(),
            code: "class P {}".into(),
            language_version: None,
            candidate_id: None,
            candidate_name: Some("Ada Lovelace".into()),
            candidate_email: None,
            assignment_id: None,
            assignment_name: Some("FizzBuzz / Part 1".into()),
        }
    }

    fn response() -> FullAnalysisResponse {
        FullAnalysisResponse {
            summary: OverallSummary {
                final_score: Some(8),
                ai_score: Some(8),
                compiles: true,
                all_tests_passed: true,
            },
            ai_review: Some(AiReviewResult {
                final_score: Some(8),
                general_feedback: "Clean solution.".into(),
                ..Default::default()
            }),
            tests: Some(TestsAnalysisResult {
                total: 2,
                passed: 2,
                failed: 0,
                tests: vec![TestCaseResult {
                    name: "Adds".into(),
                    outcome: "Passed".into(),
                    message: None,
                }],
                ..Default::default()
            }),
            ..Default::default()
        }
    }

    #[test]
    fn sanitizes_unsafe_filename_parts() {
        assert_eq!(sanitize_file_part("FizzBuzz / Part 1"), "FizzBuzz___Part_1");
        assert_eq!(sanitize_file_part("../../etc/passwd"), "______etc_passwd");
        assert_eq!(sanitize_file_part("  "), "unknown");
    }

    #[tokio::test]
    async fn writes_report_with_sanitized_name_and_sections() {
        let dir = tempfile::tempdir().unwrap();
        let writer = TextReportWriter::new(dir.path().to_path_buf());

        let path = writer.write(&request(), &response()).await.unwrap();
        let name = path.file_name().unwrap().to_string_lossy().into_owned();
        assert!(name.ends_with("_FizzBuzz___Part_1_Ada_Lovelace.txt"));

        let body = std::fs::read_to_string(&path).unwrap();
        assert!(body.contains("== Summary =="));
        assert!(body.contains("All tests passed: true"));
        assert!(body.contains("Clean solution."));
        assert!(body.contains("[Passed] Adds"));
        assert!(body.contains("== Submitted Code =="));
        assert!(body.contains("class P {}"));
    }

    #[tokio::test]
    async fn creates_the_reports_directory_on_demand() {
        let dir = tempfile::tempdir().unwrap();
        let nested = dir.path().join("a/b/reports");
        let writer = TextReportWriter::new(nested.clone());
        writer.write(&request(), &response()).await.unwrap();
        assert!(nested.is_dir());
    }
}
