//! Request and response data model shared across the assessment services.

use serde::{Deserialize, Serialize};

/// Incoming assessment request.
///
/// `action` selects the flow (`compile`, `run`, `analyze`); candidate and
/// assignment fields only influence the written report.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CodeRequest {
    #[serde(default)]
    pub action: String,
    #[serde(default)]
    pub code: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub language_version: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub candidate_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub candidate_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub candidate_email: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub assignment_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub assignment_name: Option<String>,
}

/// Response for the `compile` action.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompileResponse {
    pub success: bool,
    pub std_out: String,
    pub std_err: String,
    pub exit_code: i32,
}

/// Response for the `run` action.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunResponse {
    pub success: bool,
    pub std_out: String,
    pub std_err: String,
    pub exit_code: i32,
}

/// One resource observation of the measured run phase.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MetricSample {
    /// Milliseconds since process start.
    pub t: u64,
    /// Instantaneous CPU utilization, aggregated across all cores.
    pub cpu_pct: f64,
    /// Resident set size in bytes.
    pub rss_bytes: u64,
}

/// Summary of one executed pipeline phase.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PhaseSummary {
    pub name: String,
    pub duration_ms: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cpu_time_ms: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub peak_rss_bytes: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub log_std_out: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub log_std_err: Option<String>,
    /// Present only for the sampled `run` phase.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub samples: Option<Vec<MetricSample>>,
}

/// Result of the full build-execute pipeline with sampling.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RuntimeAnalysis {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub std_out: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub std_err: Option<String>,
    pub exit_code: i32,

    /// Executed phases in execution order; stops at the first failure.
    pub phases: Vec<PhaseSummary>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub run_duration_ms: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub run_total_cpu_time_ms: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub run_average_cpu_pct: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub run_peak_rss_bytes: Option<u64>,
}

/// Single issue reported by the AI reviewer.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AiIssue {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub line_start: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub line_end: Option<i64>,
    #[serde(default)]
    pub severity: String,
    #[serde(default)]
    pub suggestion: String,
}

/// Structured outcome of the AI code review.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AiReviewResult {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub final_score: Option<i64>,
    #[serde(default)]
    pub general_feedback: String,
    #[serde(default)]
    pub issues: Vec<AiIssue>,
    /// Raw provider output, kept for diagnostics even when parsing fails.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub raw_json: Option<String>,
}

/// One diagnostic from the static analysis collaborator.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StaticDiagnostic {
    pub id: String,
    pub severity: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file_path: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub line: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub column: Option<u32>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StaticAnalysisResult {
    pub analyzer_name: String,
    pub diagnostics: Vec<StaticDiagnostic>,
}

/// One discovered test case.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TestCaseResult {
    pub name: String,
    pub outcome: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

/// Aggregated result of the test-suite run.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TestsAnalysisResult {
    pub total: u32,
    pub passed: u32,
    pub failed: u32,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub binary_score: Option<String>,

    #[serde(default)]
    pub tests: Vec<TestCaseResult>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub raw_std_out: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub raw_std_err: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub exit_code: Option<i32>,
}

/// Cross-task summary computed by the orchestrator.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OverallSummary {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub final_score: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ai_score: Option<i64>,
    pub compiles: bool,
    pub all_tests_passed: bool,
}

/// Failure of one analysis task, recorded for diagnostics only.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskFailure {
    pub task: String,
    pub error: String,
}

/// Combined response for the `analyze` action.
///
/// A failed task leaves its payload `None`; siblings are unaffected.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FullAnalysisResponse {
    pub summary: OverallSummary,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ai_review: Option<AiReviewResult>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub static_analysis: Option<StaticAnalysisResult>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub runtime: Option<RuntimeAnalysis>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tests: Option<TestsAnalysisResult>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub task_failures: Vec<TaskFailure>,
}
