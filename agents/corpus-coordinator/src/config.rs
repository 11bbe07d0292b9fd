//! Coordinator configuration
//!
//! A single JSON config file plus CLI flag overrides, resolved with
//! precedence `CLI > config file > defaults`. Startup validates the
//! resolved contract before any state is touched.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{CoordinatorError, Result};

pub const DEFAULT_TARGET_TOTAL_CASES: u64 = 5000;
pub const DEFAULT_SEED: u64 = 42;
pub const DEFAULT_MAX_GENERATION_ATTEMPTS: u32 = 50;
pub const DEFAULT_SIGNATURE_WINDOW: usize = 32;
pub const DEFAULT_SIMILARITY_THRESHOLD: f64 = 0.9;
pub const DEFAULT_SIMILARITY_WINDOW: usize = 64;
pub const DEFAULT_CODEC_TIMEOUT_MS: u64 = 5000;

/// Resolved runtime configuration
#[derive(Debug, Clone, Serialize)]
pub struct CoordinatorConfig {
    pub state_dir: PathBuf,
    pub host: String,
    pub port: u16,
    pub master_schema_file: PathBuf,
    pub corpus_file: Option<PathBuf>,
    pub names_file: Option<PathBuf>,
    pub target_total_cases: u64,
    /// Defaults to `target_total_cases - seed_count` when unset
    pub generation_target: Option<u64>,
    pub seed: u64,
    pub max_generation_attempts: u32,
    pub signature_window: usize,
    pub similarity_threshold: f64,
    pub similarity_window: usize,
    /// External TOON codec command; empty means the in-process codec
    pub codec_command: Vec<String>,
    pub codec_timeout_ms: u64,
    /// Per-axis target-share overrides, keyed by axis then bucket
    pub share_overrides: BTreeMap<String, BTreeMap<String, f64>>,
    /// Pins the primary topic for every instruction
    pub force_primary_topic: Option<String>,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        CoordinatorConfig {
            state_dir: PathBuf::from("data/corpus_coordinator"),
            host: "127.0.0.1".to_string(),
            port: 8765,
            master_schema_file: PathBuf::from("schema/schema.full.json"),
            corpus_file: None,
            names_file: None,
            target_total_cases: DEFAULT_TARGET_TOTAL_CASES,
            generation_target: None,
            seed: DEFAULT_SEED,
            max_generation_attempts: DEFAULT_MAX_GENERATION_ATTEMPTS,
            signature_window: DEFAULT_SIGNATURE_WINDOW,
            similarity_threshold: DEFAULT_SIMILARITY_THRESHOLD,
            similarity_window: DEFAULT_SIMILARITY_WINDOW,
            codec_command: Vec::new(),
            codec_timeout_ms: DEFAULT_CODEC_TIMEOUT_MS,
            share_overrides: BTreeMap::new(),
            force_primary_topic: None,
        }
    }
}

/// On-disk shape of the config file; every field is optional
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ConfigFile {
    pub state_dir: Option<PathBuf>,
    pub host: Option<String>,
    pub port: Option<u16>,
    pub master_schema_file: Option<PathBuf>,
    pub corpus_file: Option<PathBuf>,
    pub names_file: Option<PathBuf>,
    pub target_total_cases: Option<u64>,
    pub generation_target: Option<u64>,
    pub seed: Option<u64>,
    pub max_generation_attempts: Option<u32>,
    pub signature_window: Option<usize>,
    pub similarity_threshold: Option<f64>,
    pub similarity_window: Option<usize>,
    pub codec_command: Option<Vec<String>>,
    pub codec_timeout_ms: Option<u64>,
    pub share_overrides: Option<BTreeMap<String, BTreeMap<String, f64>>>,
    pub force_primary_topic: Option<String>,
}

/// CLI-level overrides, highest precedence
#[derive(Debug, Clone, Default)]
pub struct CliOverrides {
    pub state_dir: Option<PathBuf>,
    pub host: Option<String>,
    pub port: Option<u16>,
    pub master_schema_file: Option<PathBuf>,
    pub corpus_file: Option<PathBuf>,
    pub target_total_cases: Option<u64>,
    pub generation_target: Option<u64>,
    pub seed: Option<u64>,
}

impl ConfigFile {
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path).map_err(|err| {
            CoordinatorError::config(format!("cannot read config {}: {err}", path.display()))
        })?;
        serde_json::from_str(&text).map_err(|err| {
            CoordinatorError::config(format!("invalid config {}: {err}", path.display()))
        })
    }
}

impl CoordinatorConfig {
    /// Merge defaults, config file, and CLI flags
    pub fn resolve(file: ConfigFile, cli: CliOverrides) -> Result<Self> {
        let defaults = CoordinatorConfig::default();
        let config = CoordinatorConfig {
            state_dir: cli
                .state_dir
                .or(file.state_dir)
                .unwrap_or(defaults.state_dir),
            host: cli.host.or(file.host).unwrap_or(defaults.host),
            port: cli.port.or(file.port).unwrap_or(defaults.port),
            master_schema_file: cli
                .master_schema_file
                .or(file.master_schema_file)
                .unwrap_or(defaults.master_schema_file),
            corpus_file: cli.corpus_file.or(file.corpus_file),
            names_file: file.names_file,
            target_total_cases: cli
                .target_total_cases
                .or(file.target_total_cases)
                .unwrap_or(defaults.target_total_cases),
            generation_target: cli.generation_target.or(file.generation_target),
            seed: cli.seed.or(file.seed).unwrap_or(defaults.seed),
            max_generation_attempts: file
                .max_generation_attempts
                .unwrap_or(defaults.max_generation_attempts),
            signature_window: file.signature_window.unwrap_or(defaults.signature_window),
            similarity_threshold: file
                .similarity_threshold
                .unwrap_or(defaults.similarity_threshold),
            similarity_window: file.similarity_window.unwrap_or(defaults.similarity_window),
            codec_command: file.codec_command.unwrap_or_default(),
            codec_timeout_ms: file.codec_timeout_ms.unwrap_or(defaults.codec_timeout_ms),
            share_overrides: file.share_overrides.unwrap_or_default(),
            force_primary_topic: file.force_primary_topic,
        };
        config.validate()?;
        Ok(config)
    }

    /// Startup contract over the resolved values
    pub fn validate(&self) -> Result<()> {
        if self.target_total_cases == 0 {
            return Err(CoordinatorError::config("target_total_cases must be > 0"));
        }
        if self.max_generation_attempts == 0 {
            return Err(CoordinatorError::config(
                "max_generation_attempts must be > 0",
            ));
        }
        if self.signature_window == 0 {
            return Err(CoordinatorError::config("signature_window must be > 0"));
        }
        if !(0.0..=1.0).contains(&self.similarity_threshold) || self.similarity_threshold == 0.0 {
            return Err(CoordinatorError::config(
                "similarity_threshold must be in (0, 1]",
            ));
        }
        if self.codec_timeout_ms == 0 {
            return Err(CoordinatorError::config("codec_timeout_ms must be > 0"));
        }
        if self.host.trim().is_empty() {
            return Err(CoordinatorError::config("host must not be empty"));
        }
        Ok(())
    }

    /// Generation target after seed accounting, floored at zero
    pub fn resolved_generation_target(&self, seed_count: usize) -> u64 {
        self.generation_target
            .unwrap_or_else(|| self.target_total_cases.saturating_sub(seed_count as u64))
    }

    pub fn codec_timeout(&self) -> Duration {
        Duration::from_millis(self.codec_timeout_ms)
    }

    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_overrides_file_overrides_defaults() {
        let file = ConfigFile {
            port: Some(9000),
            seed: Some(7),
            target_total_cases: Some(100),
            ..ConfigFile::default()
        };
        let cli = CliOverrides {
            port: Some(9100),
            ..CliOverrides::default()
        };
        let config = CoordinatorConfig::resolve(file, cli).unwrap();
        assert_eq!(config.port, 9100);
        assert_eq!(config.seed, 7);
        assert_eq!(config.target_total_cases, 100);
        assert_eq!(config.host, "127.0.0.1");
    }

    #[test]
    fn test_validation_rejects_zero_attempts() {
        let file = ConfigFile {
            max_generation_attempts: Some(0),
            ..ConfigFile::default()
        };
        assert!(CoordinatorConfig::resolve(file, CliOverrides::default()).is_err());
    }

    #[test]
    fn test_generation_target_defaults_to_total_minus_seeds() {
        let config = CoordinatorConfig {
            target_total_cases: 100,
            ..CoordinatorConfig::default()
        };
        assert_eq!(config.resolved_generation_target(30), 70);
        assert_eq!(config.resolved_generation_target(150), 0);
        let pinned = CoordinatorConfig {
            generation_target: Some(25),
            ..config
        };
        assert_eq!(pinned.resolved_generation_target(30), 25);
    }

    #[test]
    fn test_config_file_parses_partial_json() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(
            &path,
            r#"{"port": 8111, "share_overrides": {"complexity": {"hard_negative": 0.0}}}"#,
        )
        .unwrap();
        let file = ConfigFile::load(&path).unwrap();
        assert_eq!(file.port, Some(8111));
        assert_eq!(
            file.share_overrides.unwrap()["complexity"]["hard_negative"],
            0.0
        );
    }
}
