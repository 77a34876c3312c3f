//! Fail-fast build-execute pipeline.
//!
//! Sequences the toolchain phases (scaffold, write-source, restore, build,
//! publish, run) with per-phase budgets. The first non-zero exit code stops
//! the pipeline; logs gathered so far are preserved. Only the final run
//! phase is sampled. The workspace is deleted on every exit path.

use std::path::{Path, PathBuf};
use std::time::Instant;

use anyhow::{Context, Result};
use async_trait::async_trait;
use tracing::{error, info};

use crate::config::ToolchainConfig;
use crate::error::ExecError;
use crate::executor::{execute, Invocation};
use crate::models::{CodeRequest, CompileResponse, PhaseSummary, RunResponse, RuntimeAnalysis};
use crate::sampler::{core_count, run_with_sampling};
use crate::workspace::Workspace;

const PROJECT_NAME: &str = "UserApp";
const SOURCE_FILE: &str = "Program.cs";

/// Exit code reported when the pipeline itself faults unexpectedly,
/// distinct from the -1 used for timed-out invocations.
pub const INTERNAL_FAULT_EXIT: i32 = -2;

/// Outcome of one pipeline phase, with exec failures folded into data so
/// the caller always receives a structured result.
struct PhaseOutcome {
    exit_code: i32,
    stdout: String,
    stderr: String,
    duration_ms: u64,
}

impl PhaseOutcome {
    fn failed(&self) -> bool {
        self.exit_code != 0
    }
}

/// Build-execute surface consumed by the orchestrator. Failures are folded
/// into the returned structs; these calls do not error.
#[async_trait]
pub trait RuntimeAnalysisService: Send + Sync {
    async fn compile(&self, req: &CodeRequest) -> CompileResponse;
    async fn analyze(&self, req: &CodeRequest) -> RuntimeAnalysis;
}

#[async_trait]
impl RuntimeAnalysisService for Pipeline {
    async fn compile(&self, req: &CodeRequest) -> CompileResponse {
        self.compile_only(req).await
    }

    async fn analyze(&self, req: &CodeRequest) -> RuntimeAnalysis {
        self.analyze_runtime(req).await
    }
}

/// Runs the compile, run and analyze flows against the external toolchain.
pub struct Pipeline {
    toolchain: ToolchainConfig,
}

impl Pipeline {
    pub fn new(toolchain: ToolchainConfig) -> Self {
        Self { toolchain }
    }

    fn invocation(&self, work_dir: &Path, args: &[&str], timeout_ms: u64) -> Invocation {
        Invocation::new(&self.toolchain.command, work_dir)
            .with_args(args.iter().copied())
            .with_env(self.toolchain.env.iter().cloned())
            .with_timeout_ms(timeout_ms)
    }

    /// Execute one toolchain phase, converting launch/timeout failures into
    /// a failing outcome instead of an error.
    async fn tool_phase(
        &self,
        name: &str,
        work_dir: &Path,
        args: &[&str],
        timeout_ms: u64,
    ) -> PhaseOutcome {
        let started = Instant::now();
        info!(phase = name, "phase start");
        let outcome = match execute(&self.invocation(work_dir, args, timeout_ms)).await {
            Ok(out) => PhaseOutcome {
                exit_code: out.exit_code,
                stdout: out.stdout,
                stderr: out.stderr,
                duration_ms: started.elapsed().as_millis() as u64,
            },
            Err(e) => PhaseOutcome {
                exit_code: exec_error_exit_code(&e),
                stdout: String::new(),
                stderr: e.to_string(),
                duration_ms: started.elapsed().as_millis() as u64,
            },
        };
        info!(phase = name, exit_code = outcome.exit_code, duration_ms = outcome.duration_ms, "phase end");
        outcome
    }

    /// The `compile` action: scaffold, write source, restore, build.
    pub async fn compile_only(&self, req: &CodeRequest) -> CompileResponse {
        let ws = match Workspace::create("compile") {
            Ok(ws) => ws,
            Err(e) => return compile_fault(&e.to_string()),
        };
        let result = self.compile_in(ws.path(), req).await;
        ws.cleanup().await;
        result.unwrap_or_else(|e| {
            error!(error = %format!("{e:#}"), "compile flow faulted");
            compile_fault(&format!("{e:#}"))
        })
    }

    async fn compile_in(&self, work: &Path, req: &CodeRequest) -> Result<CompileResponse> {
        let proj_dir = self.scaffold_project(work, req).await?;
        let proj_dir = match proj_dir {
            Ok(dir) => dir,
            Err(scaffold) => {
                return Ok(CompileResponse {
                    success: false,
                    std_out: scaffold.stdout,
                    std_err: scaffold.stderr,
                    exit_code: scaffold.exit_code,
                });
            }
        };

        let restore = self
            .tool_phase(
                "restore",
                &proj_dir,
                &["restore"],
                self.toolchain.restore_timeout_ms,
            )
            .await;
        if restore.failed() {
            return Ok(CompileResponse {
                success: false,
                std_out: restore.stdout,
                std_err: restore.stderr,
                exit_code: restore.exit_code,
            });
        }

        let build = self
            .tool_phase(
                "build",
                &proj_dir,
                &["build", "--configuration", "Release"],
                self.toolchain.build_timeout_ms,
            )
            .await;

        Ok(CompileResponse {
            success: !build.failed(),
            std_out: join_logs(&[&restore.stdout, &build.stdout]),
            std_err: join_logs(&[&restore.stderr, &build.stderr]),
            exit_code: build.exit_code,
        })
    }

    /// The `run` action: compile flow plus an unsampled `run --no-build`.
    pub async fn run_program(&self, req: &CodeRequest) -> RunResponse {
        let ws = match Workspace::create("run") {
            Ok(ws) => ws,
            Err(e) => return run_fault(&e.to_string()),
        };
        let result = self.run_in(ws.path(), req).await;
        ws.cleanup().await;
        result.unwrap_or_else(|e| {
            error!(error = %format!("{e:#}"), "run flow faulted");
            run_fault(&format!("{e:#}"))
        })
    }

    async fn run_in(&self, work: &Path, req: &CodeRequest) -> Result<RunResponse> {
        let proj_dir = match self.scaffold_project(work, req).await? {
            Ok(dir) => dir,
            Err(scaffold) => {
                return Ok(RunResponse {
                    success: false,
                    std_out: scaffold.stdout,
                    std_err: scaffold.stderr,
                    exit_code: scaffold.exit_code,
                });
            }
        };

        let restore = self
            .tool_phase(
                "restore",
                &proj_dir,
                &["restore"],
                self.toolchain.restore_timeout_ms,
            )
            .await;
        if restore.failed() {
            return Ok(RunResponse {
                success: false,
                std_out: restore.stdout,
                std_err: restore.stderr,
                exit_code: restore.exit_code,
            });
        }

        let build = self
            .tool_phase(
                "build",
                &proj_dir,
                &["build", "--configuration", "Release"],
                self.toolchain.build_timeout_ms,
            )
            .await;
        if build.failed() {
            return Ok(RunResponse {
                success: false,
                std_out: join_logs(&[&restore.stdout, &build.stdout]),
                std_err: join_logs(&[&restore.stderr, &build.stderr]),
                exit_code: build.exit_code,
            });
        }

        let run = self
            .tool_phase(
                "run",
                &proj_dir,
                &["run", "--configuration", "Release", "--no-build"],
                self.toolchain.run_timeout_ms,
            )
            .await;

        Ok(RunResponse {
            success: !run.failed(),
            std_out: format!(
                "{}\n\n{}",
                join_logs(&[&restore.stdout, &build.stdout]),
                run.stdout
            ),
            std_err: format!(
                "{}\n\n{}",
                join_logs(&[&restore.stderr, &build.stderr]),
                run.stderr
            ),
            exit_code: run.exit_code,
        })
    }

    /// The `analyze` action: full pipeline with resource sampling on the
    /// final run phase.
    pub async fn analyze_runtime(&self, req: &CodeRequest) -> RuntimeAnalysis {
        let ws = match Workspace::create("run-analyze") {
            Ok(ws) => ws,
            Err(e) => return analysis_fault(&e.to_string()),
        };
        let result = self.analyze_in(ws.path(), req).await;
        ws.cleanup().await;
        result.unwrap_or_else(|e| {
            error!(error = %format!("{e:#}"), "runtime analysis faulted");
            analysis_fault(&format!("{e:#}"))
        })
    }

    async fn analyze_in(&self, work: &Path, req: &CodeRequest) -> Result<RuntimeAnalysis> {
        let mut phases: Vec<PhaseSummary> = Vec::new();
        let proj_dir = work.join(PROJECT_NAME);

        // scaffold
        let scaffold = self
            .tool_phase(
                "scaffold",
                work,
                &["new", "console", "-o", PROJECT_NAME],
                self.toolchain.scaffold_timeout_ms,
            )
            .await;
        phases.push(plain_summary("scaffold", &scaffold));
        if scaffold.failed() {
            return Ok(failed_analysis(phases, &scaffold, &scaffold.stdout, &scaffold.stderr));
        }

        // write-source: internal phase, no process
        let write_started = Instant::now();
        tokio::fs::create_dir_all(&proj_dir)
            .await
            .context("failed to create project dir")?;
        tokio::fs::write(proj_dir.join(SOURCE_FILE), &req.code)
            .await
            .context("failed to write submitted source")?;
        phases.push(PhaseSummary {
            name: "write-source".into(),
            duration_ms: write_started.elapsed().as_millis() as u64,
            cpu_time_ms: None,
            peak_rss_bytes: None,
            log_std_out: None,
            log_std_err: None,
            samples: None,
        });

        // restore
        let restore = self
            .tool_phase(
                "restore",
                &proj_dir,
                &["restore"],
                self.toolchain.restore_timeout_ms,
            )
            .await;
        phases.push(plain_summary("restore", &restore));
        if restore.failed() {
            return Ok(failed_analysis(phases, &restore, &restore.stdout, &restore.stderr));
        }

        // build
        let build = self
            .tool_phase(
                "build",
                &proj_dir,
                &["build", "--configuration", "Release"],
                self.toolchain.build_timeout_ms,
            )
            .await;
        phases.push(plain_summary("build", &build));
        if build.failed() {
            let out = join_logs(&[&restore.stdout, &build.stdout]);
            let err = join_logs(&[&restore.stderr, &build.stderr]);
            return Ok(failed_analysis(phases, &build, &out, &err));
        }

        // publish
        let publish_dir = proj_dir.join("publish");
        tokio::fs::create_dir_all(&publish_dir)
            .await
            .context("failed to create publish dir")?;
        let publish = self
            .tool_phase(
                "publish",
                &proj_dir,
                &[
                    "publish",
                    &format!("{PROJECT_NAME}.csproj"),
                    "-c",
                    "Release",
                    "-o",
                    &publish_dir.to_string_lossy(),
                ],
                self.toolchain.publish_timeout_ms,
            )
            .await;
        phases.push(plain_summary("publish", &publish));
        if publish.failed() {
            let out = join_logs(&[&restore.stdout, &build.stdout, &publish.stdout]);
            let err = join_logs(&[&restore.stderr, &build.stderr, &publish.stderr]);
            return Ok(failed_analysis(phases, &publish, &out, &err));
        }

        // run under the sampler
        let dll = find_published_dll(&publish_dir)
            .await
            .context("publish output not found")?;
        let run_inv = Invocation::new(&self.toolchain.command, &proj_dir)
            .with_args([dll.to_string_lossy().into_owned()])
            .with_env(self.toolchain.env.iter().cloned())
            .with_timeout_ms(self.toolchain.run_timeout_ms);
        info!(phase = "run", dll = %dll.display(), "phase start");
        let run = run_with_sampling(&run_inv, self.toolchain.sampling_interval_ms).await?;
        info!(
            phase = "run",
            exit_code = run.exit_code,
            duration_ms = run.duration_ms,
            timed_out = run.timed_out,
            "phase end"
        );

        phases.push(PhaseSummary {
            name: "run".into(),
            duration_ms: run.duration_ms,
            cpu_time_ms: Some(run.total_cpu_time_ms),
            peak_rss_bytes: Some(run.peak_rss_bytes),
            log_std_out: None,
            log_std_err: None,
            samples: Some(run.samples.clone()),
        });

        // Average CPU% over the whole run phase, from totals rather than
        // per-sample percentages, so irregular tick spacing cannot bias it.
        let avg_cpu_pct = if run.duration_ms > 0 {
            Some(
                run.total_cpu_time_ms as f64 / run.duration_ms as f64
                    * core_count() as f64
                    * 100.0,
            )
        } else {
            None
        };

        Ok(RuntimeAnalysis {
            std_out: Some(join_logs(&[
                &restore.stdout,
                &build.stdout,
                &publish.stdout,
                &run.stdout,
            ])),
            std_err: Some(join_logs(&[
                &restore.stderr,
                &build.stderr,
                &publish.stderr,
                &run.stderr,
            ])),
            exit_code: run.exit_code,
            phases,
            run_duration_ms: Some(run.duration_ms),
            run_total_cpu_time_ms: Some(run.total_cpu_time_ms),
            run_average_cpu_pct: avg_cpu_pct,
            run_peak_rss_bytes: Some(run.peak_rss_bytes),
        })
    }

    /// Scaffold a console project and write the submitted source into it.
    /// Returns the failing scaffold outcome in `Err` for fail-fast callers.
    async fn scaffold_project(
        &self,
        work: &Path,
        req: &CodeRequest,
    ) -> Result<std::result::Result<PathBuf, PhaseOutcome>> {
        let scaffold = self
            .tool_phase(
                "scaffold",
                work,
                &["new", "console", "-o", PROJECT_NAME],
                self.toolchain.scaffold_timeout_ms,
            )
            .await;
        if scaffold.failed() {
            return Ok(Err(scaffold));
        }
        let proj_dir = work.join(PROJECT_NAME);
        tokio::fs::create_dir_all(&proj_dir)
            .await
            .context("failed to create project dir")?;
        tokio::fs::write(proj_dir.join(SOURCE_FILE), &req.code)
            .await
            .context("failed to write submitted source")?;
        Ok(Ok(proj_dir))
    }
}

fn exec_error_exit_code(e: &ExecError) -> i32 {
    match e {
        ExecError::Timeout { .. } => -1,
        _ => INTERNAL_FAULT_EXIT,
    }
}

fn plain_summary(name: &str, outcome: &PhaseOutcome) -> PhaseSummary {
    PhaseSummary {
        name: name.into(),
        duration_ms: outcome.duration_ms,
        cpu_time_ms: None,
        peak_rss_bytes: None,
        log_std_out: Some(outcome.stdout.clone()),
        log_std_err: Some(outcome.stderr.clone()),
        samples: None,
    }
}

fn failed_analysis(
    phases: Vec<PhaseSummary>,
    failing: &PhaseOutcome,
    std_out: &str,
    std_err: &str,
) -> RuntimeAnalysis {
    RuntimeAnalysis {
        std_out: Some(std_out.to_string()),
        std_err: Some(std_err.to_string()),
        exit_code: failing.exit_code,
        phases,
        ..Default::default()
    }
}

fn analysis_fault(message: &str) -> RuntimeAnalysis {
    RuntimeAnalysis {
        std_err: Some(format!("internal error: {message}")),
        exit_code: INTERNAL_FAULT_EXIT,
        ..Default::default()
    }
}

fn compile_fault(message: &str) -> CompileResponse {
    CompileResponse {
        success: false,
        std_out: String::new(),
        std_err: format!("internal error: {message}"),
        exit_code: INTERNAL_FAULT_EXIT,
    }
}

fn run_fault(message: &str) -> RunResponse {
    RunResponse {
        success: false,
        std_out: String::new(),
        std_err: format!("internal error: {message}"),
        exit_code: INTERNAL_FAULT_EXIT,
    }
}

fn join_logs(parts: &[&str]) -> String {
    parts.join("\n\n")
}

/// First DLL in the publish output, top level only.
async fn find_published_dll(publish_dir: &Path) -> Result<PathBuf> {
    let mut entries = tokio::fs::read_dir(publish_dir).await?;
    while let Some(entry) = entries.next_entry().await? {
        let path = entry.path();
        if path.extension().map(|e| e == "dll").unwrap_or(false) {
            return Ok(path);
        }
    }
    anyhow::bail!("no dll found in {}", publish_dir.display())
}
