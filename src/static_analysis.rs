//! Static analysis via toolchain build diagnostics.
//!
//! Builds the submission in a throwaway workspace and maps the compiler's
//! diagnostic lines into structured results, filtered at a request-scoped
//! minimum severity.

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use tracing::debug;

use crate::config::ToolchainConfig;
use crate::executor::{execute, Invocation};
use crate::models::{CodeRequest, StaticAnalysisResult, StaticDiagnostic};
use crate::workspace::Workspace;

const ANALYZER_NAME: &str = ".NET build diagnostics";

/// Diagnostic severity floor. Ordered so `>=` expresses "at least".
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Severity {
    Info,
    Warning,
    Error,
}

impl Severity {
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "info" => Some(Severity::Info),
            "warning" => Some(Severity::Warning),
            "error" => Some(Severity::Error),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Info => "Info",
            Severity::Warning => "Warning",
            Severity::Error => "Error",
        }
    }
}

#[async_trait]
pub trait StaticAnalysisService: Send + Sync {
    async fn analyze(
        &self,
        req: &CodeRequest,
        min_severity: Severity,
    ) -> Result<StaticAnalysisResult>;
}

/// Collaborator that derives diagnostics from a real toolchain build.
pub struct BuildDiagnostics {
    toolchain: ToolchainConfig,
}

impl BuildDiagnostics {
    pub fn new(toolchain: ToolchainConfig) -> Self {
        Self { toolchain }
    }

    fn invocation(&self, work_dir: &std::path::Path, args: &[&str], timeout_ms: u64) -> Invocation {
        Invocation::new(&self.toolchain.command, work_dir)
            .with_args(args.iter().copied())
            .with_env(self.toolchain.env.iter().cloned())
            .with_timeout_ms(timeout_ms)
    }
}

#[async_trait]
impl StaticAnalysisService for BuildDiagnostics {
    async fn analyze(
        &self,
        req: &CodeRequest,
        min_severity: Severity,
    ) -> Result<StaticAnalysisResult> {
        if req.code.trim().is_empty() {
            bail!("code is empty");
        }

        let ws = Workspace::create("static")?;
        let result = self.analyze_in(ws.path(), req, min_severity).await;
        ws.cleanup().await;
        result
    }
}

impl BuildDiagnostics {
    async fn analyze_in(
        &self,
        work: &std::path::Path,
        req: &CodeRequest,
        min_severity: Severity,
    ) -> Result<StaticAnalysisResult> {
        let scaffold = execute(&self.invocation(
            work,
            &["new", "console", "-o", "UserApp"],
            self.toolchain.scaffold_timeout_ms,
        ))
        .await
        .context("static analysis scaffold failed")?;
        if !scaffold.is_success() {
            bail!("static analysis scaffold exited with {}", scaffold.exit_code);
        }

        let proj_dir = work.join("UserApp");
        tokio::fs::create_dir_all(&proj_dir).await?;
        tokio::fs::write(proj_dir.join("Program.cs"), &req.code).await?;

        let restore = execute(&self.invocation(
            &proj_dir,
            &["restore"],
            self.toolchain.restore_timeout_ms,
        ))
        .await
        .context("static analysis restore failed")?;
        if !restore.is_success() {
            bail!("static analysis restore exited with {}", restore.exit_code);
        }

        // A failing build is still a valid analysis: errors are diagnostics.
        let build = execute(&self.invocation(
            &proj_dir,
            &["build", "--configuration", "Release", "--nologo"],
            self.toolchain.build_timeout_ms,
        ))
        .await
        .context("static analysis build failed to run")?;

        let mut diagnostics = parse_diagnostics(&build.stdout, min_severity);
        diagnostics.extend(parse_diagnostics(&build.stderr, min_severity));
        dedupe(&mut diagnostics);

        debug!(
            count = diagnostics.len(),
            exit_code = build.exit_code,
            "static analysis complete"
        );

        Ok(StaticAnalysisResult {
            analyzer_name: ANALYZER_NAME.into(),
            diagnostics,
        })
    }
}

/// Parse every diagnostic line at or above the severity floor.
pub fn parse_diagnostics(output: &str, min_severity: Severity) -> Vec<StaticDiagnostic> {
    output
        .lines()
        .filter_map(parse_diagnostic_line)
        .filter(|(sev, _)| *sev >= min_severity)
        .map(|(_, d)| d)
        .collect()
}

/// One diagnostic line, either positional
/// (`Program.cs(12,9): warning CS0219: message [proj.csproj]`) or bare
/// (`CSC : error CS5001: message`).
fn parse_diagnostic_line(line: &str) -> Option<(Severity, StaticDiagnostic)> {
    let line = line.trim();
    let (location, rest) = line.split_once("): ").map_or((None, line), |(loc, rest)| {
        (Some(loc), rest)
    });

    let (file_path, line_no, column) = match location {
        Some(loc) => {
            let (file, pos) = loc.rsplit_once('(')?;
            let (l, c) = pos.split_once(',')?;
            (
                Some(file.trim().to_string()),
                Some(l.trim().parse().ok()?),
                Some(c.trim().parse().ok()?),
            )
        }
        None => (None, None, None),
    };

    // Bare form carries a tool prefix before the severity word.
    let rest = match location {
        Some(_) => rest,
        None => rest.split_once(" : ").map(|(_, r)| r)?,
    };

    let (severity_word, rest) = rest.split_once(' ')?;
    let severity = Severity::parse(severity_word)?;
    let (id, message) = rest.split_once(": ")?;
    if id.contains(' ') {
        return None;
    }
    let message = message
        .rsplit_once(" [")
        .map(|(m, _)| m)
        .unwrap_or(message)
        .trim();

    Some((
        severity,
        StaticDiagnostic {
            id: id.trim().to_string(),
            severity: severity.as_str().to_string(),
            message: message.to_string(),
            file_path,
            line: line_no,
            column,
        },
    ))
}

/// MSBuild repeats per-project diagnostics in the summary; keep one copy.
fn dedupe(diagnostics: &mut Vec<StaticDiagnostic>) {
    let mut seen = std::collections::HashSet::new();
    diagnostics.retain(|d| {
        seen.insert((
            d.id.clone(),
            d.line,
            d.column,
            d.message.clone(),
        ))
    });
}
