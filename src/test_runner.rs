//! Test-suite execution against a prepared template project.
//!
//! The submission is compiled into a class library and a template test
//! project is copied next to it, referenced against it, restored and run.
//! Results are read from the TRX file the toolchain writes.

use std::path::{Path, PathBuf};
use std::time::Instant;

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use quick_xml::events::Event;
use quick_xml::Reader;
use tracing::{info, warn};

use crate::config::ToolchainConfig;
use crate::executor::{execute, Invocation};
use crate::models::{CodeRequest, TestCaseResult, TestsAnalysisResult};
use crate::workspace::Workspace;

const LIBRARY_PROJECT: &str = "UserApp";
const SOURCE_FILE: &str = "Program.cs";
const TESTS_DIR: &str = "Tests";
const TRX_FILE: &str = "results.trx";

#[async_trait]
pub trait TestRunnerService: Send + Sync {
    async fn run_tests(&self, req: &CodeRequest) -> Result<TestsAnalysisResult>;
}

/// Runs the template test suite with the external toolchain.
pub struct DotnetTestRunner {
    toolchain: ToolchainConfig,
    template_dir: PathBuf,
}

impl DotnetTestRunner {
    pub fn new(toolchain: ToolchainConfig, template_dir: PathBuf) -> Self {
        Self {
            toolchain,
            template_dir,
        }
    }

    fn invocation(&self, work_dir: &Path, args: Vec<String>, timeout_ms: u64) -> Invocation {
        Invocation::new(&self.toolchain.command, work_dir)
            .with_args(args)
            .with_env(self.toolchain.env.iter().cloned())
            .with_timeout_ms(timeout_ms)
    }

    /// Run one toolchain step, failing the task on launch errors but folding
    /// timeouts into a -1 exit so partial output survives.
    async fn step(
        &self,
        name: &str,
        work_dir: &Path,
        args: Vec<String>,
        timeout_ms: u64,
    ) -> Result<(i32, String, String)> {
        let started = Instant::now();
        info!(step = name, "test step start");
        let result = match execute(&self.invocation(work_dir, args, timeout_ms)).await {
            Ok(out) => Ok((out.exit_code, out.stdout, out.stderr)),
            Err(e) if e.is_timeout() => Ok((-1, String::new(), e.to_string())),
            Err(e) => Err(e).with_context(|| format!("test step {name} failed to launch")),
        };
        if let Ok((code, _, _)) = &result {
            info!(
                step = name,
                exit_code = code,
                duration_ms = started.elapsed().as_millis() as u64,
                "test step end"
            );
        }
        result
    }

    async fn run_in(&self, work: &Path, req: &CodeRequest) -> Result<TestsAnalysisResult> {
        if !self.template_dir.is_dir() {
            bail!(
                "test template directory not found: {}",
                self.template_dir.display()
            );
        }

        // Submission becomes a class library the test project links against.
        let lib_dir = work.join(LIBRARY_PROJECT);
        let (code, out, err) = self
            .step(
                "scaffold",
                work,
                vec![
                    "new".into(),
                    "classlib".into(),
                    "-o".into(),
                    LIBRARY_PROJECT.into(),
                ],
                self.toolchain.scaffold_timeout_ms,
            )
            .await?;
        if code != 0 {
            bail!("classlib scaffold failed ({code}): {out}{err}");
        }
        tokio::fs::create_dir_all(&lib_dir)
            .await
            .context("failed to create library dir")?;
        let default_source = lib_dir.join("Class1.cs");
        if tokio::fs::try_exists(&default_source).await.unwrap_or(false) {
            tokio::fs::remove_file(&default_source)
                .await
                .context("failed to remove scaffold source")?;
        }
        tokio::fs::write(lib_dir.join(SOURCE_FILE), &req.code)
            .await
            .context("failed to write submitted source")?;

        let tests_dir = work.join(TESTS_DIR);
        copy_dir(&self.template_dir, &tests_dir)
            .await
            .context("failed to copy test template")?;
        let tests_csproj = find_csproj(&tests_dir)
            .await
            .context("test template has no .csproj")?;

        let (code, out, err) = self
            .step(
                "reference",
                &tests_dir,
                vec![
                    "add".into(),
                    tests_csproj.to_string_lossy().into_owned(),
                    "reference".into(),
                    lib_dir
                        .join(format!("{LIBRARY_PROJECT}.csproj"))
                        .to_string_lossy()
                        .into_owned(),
                ],
                self.toolchain.scaffold_timeout_ms,
            )
            .await?;
        if code != 0 {
            bail!("adding project reference failed ({code}): {out}{err}");
        }

        let (code, out, err) = self
            .step(
                "restore",
                &tests_dir,
                vec!["restore".into()],
                self.toolchain.restore_timeout_ms,
            )
            .await?;
        if code != 0 {
            bail!("test restore failed ({code}): {out}{err}");
        }

        let results_dir = work.join("results");
        let (exit_code, raw_out, raw_err) = self
            .step(
                "test",
                &tests_dir,
                vec![
                    "test".into(),
                    "--configuration".into(),
                    "Release".into(),
                    "--results-directory".into(),
                    results_dir.to_string_lossy().into_owned(),
                    "--logger".into(),
                    format!("trx;LogFileName={TRX_FILE}"),
                ],
                self.toolchain.test_timeout_ms,
            )
            .await?;

        // A compile failure in the suite leaves no TRX; that is a valid
        // zero-tests outcome, not a task error.
        let tests = match read_trx(&results_dir).await? {
            Some(xml) => parse_trx(&xml)?,
            None => {
                warn!(exit_code, "no TRX results found");
                Vec::new()
            }
        };

        let total = tests.len() as u32;
        let passed = tests.iter().filter(|t| t.outcome == "Passed").count() as u32;
        let failed = tests.iter().filter(|t| t.outcome == "Failed").count() as u32;
        let binary_score = if total > 0 && failed == 0 {
            "Pass"
        } else {
            "Fail"
        };

        Ok(TestsAnalysisResult {
            total,
            passed,
            failed,
            binary_score: Some(binary_score.to_string()),
            tests,
            raw_std_out: Some(raw_out),
            raw_std_err: Some(raw_err),
            exit_code: Some(exit_code),
        })
    }
}

#[async_trait]
impl TestRunnerService for DotnetTestRunner {
    async fn run_tests(&self, req: &CodeRequest) -> Result<TestsAnalysisResult> {
        let ws = Workspace::create("tests")?;
        let result = self.run_in(ws.path(), req).await;
        ws.cleanup().await;
        result
    }
}

async fn read_trx(results_dir: &Path) -> Result<Option<String>> {
    let fixed = results_dir.join(TRX_FILE);
    if tokio::fs::try_exists(&fixed).await.unwrap_or(false) {
        return Ok(Some(tokio::fs::read_to_string(&fixed).await?));
    }
    // Some toolchain versions ignore LogFileName; take any .trx present.
    let Ok(mut entries) = tokio::fs::read_dir(results_dir).await else {
        return Ok(None);
    };
    while let Some(entry) = entries.next_entry().await? {
        let path = entry.path();
        if path.extension().map(|e| e == "trx").unwrap_or(false) {
            return Ok(Some(tokio::fs::read_to_string(&path).await?));
        }
    }
    Ok(None)
}

/// Extract test case results from a TRX document. Counters are derived from
/// the per-test outcomes rather than the summary element.
pub fn parse_trx(xml: &str) -> Result<Vec<TestCaseResult>> {
    let mut reader = Reader::from_str(xml);
    reader.config_mut().trim_text(true);

    let mut tests = Vec::new();
    let mut current: Option<TestCaseResult> = None;
    let mut in_message = false;

    loop {
        match reader.read_event().context("malformed TRX")? {
            // Self-closing results carry no nested message.
            Event::Empty(ref e) if e.local_name().as_ref() == b"UnitTestResult" => {
                tests.push(case_from_attributes(e)?);
            }
            Event::Start(ref e) if e.local_name().as_ref() == b"UnitTestResult" => {
                current = Some(case_from_attributes(e)?);
            }
            Event::End(ref e) if e.local_name().as_ref() == b"UnitTestResult" => {
                if let Some(case) = current.take() {
                    tests.push(case);
                }
            }
            Event::Start(ref e) if e.local_name().as_ref() == b"Message" => {
                in_message = current.is_some();
            }
            Event::End(ref e) if e.local_name().as_ref() == b"Message" => {
                in_message = false;
            }
            Event::Text(t) if in_message => {
                if let Some(case) = current.as_mut() {
                    // Only the first message matters for the report.
                    if case.message.is_none() {
                        case.message =
                            Some(t.unescape().context("malformed TRX text")?.into_owned());
                    }
                }
            }
            Event::Eof => break,
            _ => {}
        }
    }
    Ok(tests)
}

fn case_from_attributes(e: &quick_xml::events::BytesStart<'_>) -> Result<TestCaseResult> {
    let mut case = TestCaseResult {
        name: String::new(),
        outcome: String::new(),
        message: None,
    };
    for attr in e.attributes().flatten() {
        let value = attr.unescape_value().context("malformed TRX attribute")?;
        match attr.key.as_ref() {
            b"testName" => case.name = value.into_owned(),
            b"outcome" => case.outcome = value.into_owned(),
            _ => {}
        }
    }
    Ok(case)
}

async fn find_csproj(dir: &Path) -> Result<PathBuf> {
    let mut entries = tokio::fs::read_dir(dir).await?;
    while let Some(entry) = entries.next_entry().await? {
        let path = entry.path();
        if path.extension().map(|e| e == "csproj").unwrap_or(false) {
            return Ok(path);
        }
    }
    bail!("no .csproj found in {}", dir.display())
}

async fn copy_dir(from: &Path, to: &Path) -> Result<()> {
    let from = from.to_path_buf();
    let to = to.to_path_buf();
    tokio::task::spawn_blocking(move || copy_dir_sync(&from, &to))
        .await
        .context("copy task panicked")?
}

fn copy_dir_sync(from: &Path, to: &Path) -> Result<()> {
    std::fs::create_dir_all(to)?;
    for entry in std::fs::read_dir(from)? {
        let entry = entry?;
        let target = to.join(entry.file_name());
        if entry.file_type()?.is_dir() {
            copy_dir_sync(&entry.path(), &target)?;
        } else {
            std::fs::copy(entry.path(), &target)?;
        }
    }
    Ok(())
}
