use anyhow::{Context, Result};
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};

pub const CONFIG_FILE: &str = "gotestx.toml";

/// Explorer settings, read from `gotestx.toml`
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ExplorerConfig {
    /// Go toolchain command
    pub go: String,
    /// Extra flags passed to every `go test` invocation
    pub test_flags: Vec<String>,
    /// Appended as `-timeout=<value>`; "0" or empty disables it
    pub test_timeout: Option<String>,
    /// Appended as `-tags=<value>`
    pub build_tags: Option<String>,
    /// Include benchmarks when a container item is run
    pub run_benchmarks: bool,
    /// Packages outside any workspace folder are labelled relative to `<gopath>/src`
    pub gopath: Option<PathBuf>,
    /// Document schemes that never reach discovery
    pub ignored_schemes: Vec<String>,
}

impl Default for ExplorerConfig {
    fn default() -> Self {
        Self {
            go: "go".to_string(),
            test_flags: Vec::new(),
            test_timeout: Some(default_test_timeout()),
            build_tags: None,
            run_benchmarks: false,
            gopath: None,
            ignored_schemes: vec!["git".to_string()],
        }
    }
}

fn default_test_timeout() -> String {
    "30s".to_string()
}

impl ExplorerConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let config: ExplorerConfig =
            toml::from_str(&content).with_context(|| format!("Failed to parse {}", CONFIG_FILE))?;

        config.validate()?;

        Ok(config)
    }

    /// Load `gotestx.toml` from `dir` if present, defaults otherwise
    pub fn discover(dir: &Path) -> Result<Self> {
        let path = dir.join(CONFIG_FILE);
        if path.exists() {
            Self::load(&path)
        } else {
            Ok(Self::default())
        }
    }

    fn validate(&self) -> Result<()> {
        if self.go.trim().is_empty() {
            anyhow::bail!("'go' must name the Go command");
        }

        if let Some(flag) = self.test_flags.iter().find(|f| is_reserved_flag(f)) {
            anyhow::bail!(
                "test flag '{}' is managed by the explorer and cannot be configured",
                flag
            );
        }

        Ok(())
    }

    /// `go test` flags shared by every invocation
    pub fn test_flags(&self) -> Vec<String> {
        let mut flags = self.test_flags.clone();

        if let Some(timeout) = self.test_timeout.as_deref() {
            if !timeout.is_empty() && timeout != "0" {
                flags.push(format!("-timeout={}", timeout));
            }
        }

        if let Some(tags) = self.build_tags.as_deref().filter(|t| !t.is_empty()) {
            flags.push(format!("-tags={}", tags));
        }

        flags
    }

    /// GOPATH used for labels, from the config or the environment
    pub fn gopath(&self) -> Option<PathBuf> {
        self.gopath
            .clone()
            .or_else(|| std::env::var_os("GOPATH").map(PathBuf::from))
    }

    pub fn is_ignored_scheme(&self, scheme: &str) -> bool {
        self.ignored_schemes.iter().any(|s| s == scheme)
    }
}

/// Flags the runner sets itself
fn is_reserved_flag(flag: &str) -> bool {
    let name = flag.trim_start_matches('-');
    let name = name.split('=').next().unwrap_or(name);
    matches!(name, "json" | "run" | "bench")
}
