// Sandbox configuration shared by the API and the CLI
use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

pub const DEFAULT_CONFIG_PATH: &str = "config/sandbox.json";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FallbackConfig {
    pub enabled: bool,
    pub node_path: String,
    pub heap_limit_mb: u32,
}

impl Default for FallbackConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            node_path: "node".to_string(),
            heap_limit_mb: 128,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SandboxConfig {
    pub image: String,
    pub timeout_ms: u64,
    pub memory_limit_mb: u32,
    pub cpu_limit: f32,
    pub pids_limit: i64,
    pub max_concurrent_executions: usize,
    pub parallel_tests: usize,
    pub max_source_bytes: usize,
    pub fallback: FallbackConfig,
}

impl Default for SandboxConfig {
    fn default() -> Self {
        Self {
            image: "node:20-alpine".to_string(),
            timeout_ms: 5000,
            memory_limit_mb: 128,
            cpu_limit: 0.5,
            pids_limit: 64,
            max_concurrent_executions: 8,
            parallel_tests: 4,
            max_source_bytes: 64 * 1024,
            fallback: FallbackConfig::default(),
        }
    }
}

impl SandboxConfig {
    /// Load configuration from a JSON file.
    ///
    /// A missing file is not an error: every field has a default.
    pub fn load(config_path: &Path) -> Result<Self> {
        if !config_path.exists() {
            return Ok(Self::default());
        }

        let content = fs::read_to_string(config_path)
            .with_context(|| format!("Failed to read {}", config_path.display()))?;

        let config: SandboxConfig = serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse {}", config_path.display()))?;

        config.validate()?;
        Ok(config)
    }

    /// Load from `KATA_CONFIG` (or config/sandbox.json) and apply environment overrides
    pub fn load_default() -> Result<Self> {
        let path = std::env::var("KATA_CONFIG").unwrap_or_else(|_| DEFAULT_CONFIG_PATH.to_string());
        let mut config = Self::load(Path::new(&path))?;
        config.apply_env_overrides()?;
        config.validate()?;
        Ok(config)
    }

    pub fn apply_env_overrides(&mut self) -> Result<()> {
        if let Ok(image) = std::env::var("KATA_DOCKER_IMAGE") {
            self.image = image;
        }
        if let Ok(timeout) = std::env::var("KATA_TIMEOUT_MS") {
            self.timeout_ms = timeout
                .parse()
                .with_context(|| format!("Invalid KATA_TIMEOUT_MS: {}", timeout))?;
        }
        if let Ok(enabled) = std::env::var("KATA_FALLBACK_ENABLED") {
            self.fallback.enabled = parse_flag(&enabled)
                .with_context(|| format!("Invalid KATA_FALLBACK_ENABLED: {}", enabled))?;
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if self.image.trim().is_empty() {
            bail!("Sandbox image must not be empty");
        }
        if self.timeout_ms == 0 {
            bail!("timeout_ms must be greater than zero");
        }
        if self.max_concurrent_executions == 0 || self.parallel_tests == 0 {
            bail!("Concurrency limits must be greater than zero");
        }
        if self.memory_limit_mb == 0 {
            bail!("memory_limit_mb must be greater than zero");
        }
        if self.cpu_limit <= 0.0 {
            bail!("cpu_limit must be positive");
        }
        Ok(())
    }

    pub fn memory_limit_bytes(&self) -> i64 {
        i64::from(self.memory_limit_mb) * 1024 * 1024
    }

    pub fn nano_cpus(&self) -> i64 {
        (f64::from(self.cpu_limit) * 1_000_000_000.0) as i64
    }
}

fn parse_flag(value: &str) -> Result<bool> {
    match value.trim().to_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        other => bail!("expected a boolean, got '{}'", other),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_file_yields_defaults() {
        let config = SandboxConfig::load(Path::new("does/not/exist.json")).unwrap();
        assert_eq!(config, SandboxConfig::default());
        assert_eq!(config.timeout_ms, 5000);
    }

    #[test]
    fn test_partial_json_keeps_defaults() {
        let config: SandboxConfig =
            serde_json::from_str(r#"{"timeout_ms": 2000, "fallback": {"enabled": false}}"#).unwrap();
        assert_eq!(config.timeout_ms, 2000);
        assert!(!config.fallback.enabled);
        assert_eq!(config.fallback.node_path, "node");
        assert_eq!(config.image, "node:20-alpine");
    }

    #[test]
    fn test_validate_rejects_zero_limits() {
        let mut config = SandboxConfig::default();
        config.timeout_ms = 0;
        assert!(config.validate().is_err());

        let mut config = SandboxConfig::default();
        config.max_concurrent_executions = 0;
        assert!(config.validate().is_err());

        let mut config = SandboxConfig::default();
        config.image = "  ".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_resource_conversions() {
        let config = SandboxConfig::default();
        assert_eq!(config.memory_limit_bytes(), 128 * 1024 * 1024);
        assert_eq!(config.nano_cpus(), 500_000_000);
    }

    #[test]
    fn test_parse_flag() {
        assert!(parse_flag("TRUE").unwrap());
        assert!(!parse_flag("0").unwrap());
        assert!(parse_flag("maybe").is_err());
    }
}
