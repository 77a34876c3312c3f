//! Worker configuration loaded from environment variables.

use std::path::PathBuf;

/// Phase timeout budgets and sandbox environment for the external toolchain.
#[derive(Debug, Clone)]
pub struct ToolchainConfig {
    /// Toolchain command, normally `dotnet`.
    pub command: String,
    /// Environment overrides applied to every toolchain invocation so
    /// concurrent runs do not contend on global home/cache/temp state.
    pub env: Vec<(String, String)>,

    pub scaffold_timeout_ms: u64,
    pub restore_timeout_ms: u64,
    pub build_timeout_ms: u64,
    pub publish_timeout_ms: u64,
    pub run_timeout_ms: u64,
    pub test_timeout_ms: u64,

    /// Sampling interval for the measured run phase.
    pub sampling_interval_ms: u64,
}

impl Default for ToolchainConfig {
    fn default() -> Self {
        Self {
            command: "dotnet".into(),
            env: Vec::new(),
            scaffold_timeout_ms: 60_000,
            restore_timeout_ms: 120_000,
            build_timeout_ms: 180_000,
            publish_timeout_ms: 120_000,
            run_timeout_ms: 120_000,
            test_timeout_ms: 240_000,
            sampling_interval_ms: 500,
        }
    }
}

impl ToolchainConfig {
    pub fn from_env() -> Self {
        let mut cfg = Self::default();

        if let Ok(command) = std::env::var("ASSESS_TOOLCHAIN_BIN") {
            cfg.command = command;
        }

        // Sandbox path overrides keep toolchain caches per deployment
        // instead of the invoking user's home directory.
        for (var, target) in [
            ("ASSESS_DOTNET_HOME", "DOTNET_CLI_HOME"),
            ("ASSESS_NUGET_CACHE", "NUGET_PACKAGES"),
            ("ASSESS_TMPDIR", "TMPDIR"),
        ] {
            if let Ok(value) = std::env::var(var) {
                cfg.env.push((target.to_string(), value));
            }
        }
        cfg.env
            .push(("DOTNET_CLI_TELEMETRY_OPTOUT".to_string(), "1".to_string()));

        cfg
    }
}

/// Top-level worker configuration.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub port: u16,
    pub openai_api_key: Option<String>,
    pub reports_dir: PathBuf,
    pub test_template_dir: PathBuf,
    pub toolchain: ToolchainConfig,
}

impl AppConfig {
    pub fn from_env() -> Self {
        let port = std::env::var("PORT")
            .ok()
            .and_then(|p| p.parse().ok())
            .unwrap_or(6000);

        let openai_api_key = std::env::var("OPENAI_API_KEY")
            .ok()
            .filter(|k| !k.trim().is_empty());

        let reports_dir = std::env::var("REPORTS_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("./reports"));

        let test_template_dir = std::env::var("TEST_TEMPLATE_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("./templates/Tests"));

        Self {
            port,
            openai_api_key,
            reports_dir,
            test_template_dir,
            toolchain: ToolchainConfig::from_env(),
        }
    }
}
