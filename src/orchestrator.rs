//! Fan-out of the analysis tasks for the `analyze` action.
//!
//! All five tasks run concurrently against the same request. A failing task
//! leaves its payload empty and is recorded in `task_failures`; siblings are
//! never affected. The report write at the end is best effort.

use std::sync::Arc;

use anyhow::Result;
use tracing::{error, info};

use crate::ai::AiReviewService;
use crate::models::{CodeRequest, FullAnalysisResponse, OverallSummary, TaskFailure};
use crate::pipeline::RuntimeAnalysisService;
use crate::report::ReportWriter;
use crate::static_analysis::{Severity, StaticAnalysisService};
use crate::test_runner::TestRunnerService;

pub struct Orchestrator {
    ai: Arc<dyn AiReviewService>,
    static_analysis: Arc<dyn StaticAnalysisService>,
    runtime: Arc<dyn RuntimeAnalysisService>,
    tests: Arc<dyn TestRunnerService>,
    report: Arc<dyn ReportWriter>,
}

impl Orchestrator {
    pub fn new(
        ai: Arc<dyn AiReviewService>,
        static_analysis: Arc<dyn StaticAnalysisService>,
        runtime: Arc<dyn RuntimeAnalysisService>,
        tests: Arc<dyn TestRunnerService>,
        report: Arc<dyn ReportWriter>,
    ) -> Self {
        Self {
            ai,
            static_analysis,
            runtime,
            tests,
            report,
        }
    }

    pub async fn analyze(&self, req: &CodeRequest) -> FullAnalysisResponse {
        info!(
            candidate = req.candidate_name.as_deref().unwrap_or("-"),
            assignment = req.assignment_name.as_deref().unwrap_or("-"),
            "full analysis start"
        );

        let (ai, compile, static_analysis, runtime, tests) = tokio::join!(
            self.ai.review(req),
            self.runtime.compile(req),
            self.static_analysis.analyze(req, Severity::Warning),
            self.runtime.analyze(req),
            self.tests.run_tests(req),
        );

        let mut task_failures = Vec::new();
        let ai_review = collect("ai-review", ai, &mut task_failures);
        let static_analysis = collect("static-analysis", static_analysis, &mut task_failures);
        let tests = collect("tests", tests, &mut task_failures);

        let ai_score = ai_review.as_ref().and_then(|r| r.final_score);
        let all_tests_passed = tests
            .as_ref()
            .map(|t| t.total > 0 && t.failed == 0)
            .unwrap_or(false);

        let response = FullAnalysisResponse {
            summary: OverallSummary {
                final_score: ai_score,
                ai_score,
                compiles: compile.success,
                all_tests_passed,
            },
            ai_review,
            static_analysis,
            runtime: Some(runtime),
            tests,
            task_failures,
        };

        if let Err(e) = self.report.write(req, &response).await {
            error!(error = %format!("{e:#}"), "report write failed");
        }

        info!(
            compiles = response.summary.compiles,
            all_tests_passed = response.summary.all_tests_passed,
            failures = response.task_failures.len(),
            "full analysis done"
        );
        response
    }
}

fn collect<T>(task: &str, result: Result<T>, failures: &mut Vec<TaskFailure>) -> Option<T> {
    match result {
        Ok(value) => Some(value),
        Err(e) => {
            error!(task, error = %format!("{e:#}"), "analysis task failed");
            failures.push(TaskFailure {
                task: task.to_string(),
                error: format!("{e:#}"),
            });
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{
        AiReviewResult, CompileResponse, RuntimeAnalysis, StaticAnalysisResult,
        TestsAnalysisResult,
    };
    use anyhow::anyhow;
    use async_trait::async_trait;
    use std::path::PathBuf;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct FakeAi {
        fail: bool,
    }

    #[async_trait]
    impl AiReviewService for FakeAi {
        async fn review(&self, _req: &CodeRequest) -> Result<AiReviewResult> {
            if self.fail {
                return Err(anyhow!("provider unreachable"));
            }
            Ok(AiReviewResult {
                final_score: Some(7),
                general_feedback: "fine".into(),
                ..Default::default()
            })
        }
    }

    struct FakeStatic;

    #[async_trait]
    impl StaticAnalysisService for FakeStatic {
        async fn analyze(
            &self,
            _req: &CodeRequest,
            _min_severity: Severity,
        ) -> Result<StaticAnalysisResult> {
            Ok(StaticAnalysisResult {
                analyzer_name: "fake".into(),
                diagnostics: Vec::new(),
            })
        }
    }

    struct FakeRuntime;

    #[async_trait]
    impl RuntimeAnalysisService for FakeRuntime {
        async fn compile(&self, _req: &CodeRequest) -> CompileResponse {
            CompileResponse {
                success: true,
                std_out: String::new(),
                std_err: String::new(),
                exit_code: 0,
            }
        }

        async fn analyze(&self, _req: &CodeRequest) -> RuntimeAnalysis {
            RuntimeAnalysis {
                exit_code: 0,
                ..Default::default()
            }
        }
    }

    struct FakeTests {
        total: u32,
        failed: u32,
    }

    #[async_trait]
    impl TestRunnerService for FakeTests {
        async fn run_tests(&self, _req: &CodeRequest) -> Result<TestsAnalysisResult> {
            Ok(TestsAnalysisResult {
                total: self.total,
                passed: self.total - self.failed,
                failed: self.failed,
                ..Default::default()
            })
        }
    }

    struct FakeReport {
        fail: bool,
        writes: AtomicUsize,
    }

    #[async_trait]
    impl ReportWriter for FakeReport {
        async fn write(
            &self,
            _req: &CodeRequest,
            _resp: &FullAnalysisResponse,
        ) -> Result<PathBuf> {
            self.writes.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                return Err(anyhow!("disk full"));
            }
            Ok(PathBuf::from("/tmp/report.txt"))
        }
    }

    fn orchestrator(
        ai_fail: bool,
        tests: FakeTests,
        report_fail: bool,
    ) -> (Orchestrator, Arc<FakeReport>) {
        let report = Arc::new(FakeReport {
            fail: report_fail,
            writes: AtomicUsize::new(0),
        });
        let orch = Orchestrator::new(
            Arc::new(FakeAi { fail: ai_fail }),
            Arc::new(FakeStatic),
            Arc::new(FakeRuntime),
            Arc::new(tests),
            report.clone(),
        );
        (orch, report)
    }

    fn request() -> CodeRequest {
        CodeRequest {
            action: "analyze".into(),
            code: "class P {}".into(),
            language_version: None,
            candidate_id: None,
            candidate_name: None,
            candidate_email: None,
            assignment_id: None,
            assignment_name: None,
        }
    }

    #[tokio::test]
    async fn happy_path_fills_summary_from_all_tasks() {
        let (orch, report) = orchestrator(false, FakeTests { total: 3, failed: 0 }, false);
        let resp = orch.analyze(&request()).await;

        assert_eq!(resp.summary.ai_score, Some(7));
        assert_eq!(resp.summary.final_score, Some(7));
        assert!(resp.summary.compiles);
        assert!(resp.summary.all_tests_passed);
        assert!(resp.task_failures.is_empty());
        assert_eq!(report.writes.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn ai_failure_does_not_disturb_sibling_tasks() {
        let (orch, _) = orchestrator(true, FakeTests { total: 2, failed: 0 }, false);
        let resp = orch.analyze(&request()).await;

        assert!(resp.ai_review.is_none());
        assert!(resp.static_analysis.is_some());
        assert!(resp.runtime.is_some());
        assert!(resp.tests.is_some());
        assert_eq!(resp.task_failures.len(), 1);
        assert_eq!(resp.task_failures[0].task, "ai-review");
        assert!(resp.task_failures[0].error.contains("unreachable"));
        assert_eq!(resp.summary.final_score, None);
        assert!(resp.summary.all_tests_passed);
    }

    #[tokio::test]
    async fn zero_discovered_tests_never_count_as_passing() {
        let (orch, _) = orchestrator(false, FakeTests { total: 0, failed: 0 }, false);
        let resp = orch.analyze(&request()).await;
        assert!(!resp.summary.all_tests_passed);
    }

    #[tokio::test]
    async fn failing_tests_flip_the_verdict() {
        let (orch, _) = orchestrator(false, FakeTests { total: 4, failed: 1 }, false);
        let resp = orch.analyze(&request()).await;
        assert!(!resp.summary.all_tests_passed);
    }

    #[tokio::test]
    async fn report_failure_leaves_the_response_intact() {
        let (orch, report) = orchestrator(false, FakeTests { total: 1, failed: 0 }, true);
        let resp = orch.analyze(&request()).await;

        assert_eq!(report.writes.load(Ordering::SeqCst), 1);
        assert!(resp.ai_review.is_some());
        assert!(resp.task_failures.is_empty());
        assert!(resp.summary.all_tests_passed);
    }
}
