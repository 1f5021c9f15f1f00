//! Tiered configuration loading
//!
//! Resolution order, highest priority first: explicit CLI flag → environment
//! variable → TOML config file → compiled-in default. This mirrors the
//! priority chain the audio-ingest service uses to resolve its external API
//! key (database → environment → TOML), generalized to every setting the
//! operation core needs at startup.

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// On-disk configuration file shape (`shelfkeeper.toml`).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct TomlConfig {
    /// Path to the redb database file.
    pub database_path: Option<String>,
    /// Library root: the single directory under which organized books live.
    pub library_root: Option<String>,
    /// HTTP listen port.
    pub port: Option<u16>,
    /// Scanner worker pool size.
    pub scan_workers: Option<usize>,
    /// Operation queue worker pool size.
    pub queue_workers: Option<usize>,
    /// LLM parser API key, if the optional heuristic fallback is enabled.
    pub llm_api_key: Option<String>,
    /// LLM parser endpoint base URL.
    pub llm_endpoint: Option<String>,
    /// Maximum SSE connection lifetime, in seconds.
    pub event_stream_max_lifetime_secs: Option<u64>,
}

/// Resolved runtime configuration.
#[derive(Debug, Clone)]
pub struct Config {
    pub database_path: PathBuf,
    pub library_root: PathBuf,
    pub port: u16,
    pub scan_workers: usize,
    pub queue_workers: usize,
    pub llm_api_key: Option<String>,
    pub llm_endpoint: String,
    pub event_stream_max_lifetime_secs: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            database_path: default_database_path(),
            library_root: PathBuf::from("./library"),
            port: 7823,
            scan_workers: default_worker_count(),
            queue_workers: 2,
            llm_api_key: None,
            llm_endpoint: "https://api.openai.com/v1/chat/completions".to_string(),
            event_stream_max_lifetime_secs: 600,
        }
    }
}

fn default_worker_count() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(4)
}

fn default_database_path() -> PathBuf {
    dirs::data_local_dir()
        .map(|d| d.join("shelfkeeper").join("catalog.redb"))
        .unwrap_or_else(|| PathBuf::from("./shelfkeeper.redb"))
}

/// Overrides an implementor can supply from CLI flags; every field is
/// optional so a caller can pass only the flags the user actually set.
#[derive(Debug, Clone, Default)]
pub struct CliOverrides {
    pub database_path: Option<String>,
    pub library_root: Option<String>,
    pub port: Option<u16>,
    pub scan_workers: Option<usize>,
    pub queue_workers: Option<usize>,
}

impl Config {
    /// Resolve configuration: defaults, overridden by an optional TOML file,
    /// overridden by `SHELFKEEPER_*` environment variables, overridden by
    /// explicit CLI flags.
    pub fn resolve(toml_path: Option<&Path>, cli: CliOverrides) -> Result<Self> {
        let mut cfg = Config::default();

        if let Some(path) = toml_path {
            if path.exists() {
                let toml_cfg = load_toml_config(path)?;
                apply_toml(&mut cfg, toml_cfg);
            }
        }

        apply_env(&mut cfg);
        apply_cli(&mut cfg, cli);

        Ok(cfg)
    }
}

fn apply_toml(cfg: &mut Config, toml_cfg: TomlConfig) {
    if let Some(v) = toml_cfg.database_path {
        cfg.database_path = PathBuf::from(v);
    }
    if let Some(v) = toml_cfg.library_root {
        cfg.library_root = PathBuf::from(v);
    }
    if let Some(v) = toml_cfg.port {
        cfg.port = v;
    }
    if let Some(v) = toml_cfg.scan_workers {
        cfg.scan_workers = v;
    }
    if let Some(v) = toml_cfg.queue_workers {
        cfg.queue_workers = v;
    }
    if let Some(v) = toml_cfg.llm_api_key {
        cfg.llm_api_key = Some(v);
    }
    if let Some(v) = toml_cfg.llm_endpoint {
        cfg.llm_endpoint = v;
    }
    if let Some(v) = toml_cfg.event_stream_max_lifetime_secs {
        cfg.event_stream_max_lifetime_secs = v;
    }
}

fn apply_env(cfg: &mut Config) {
    if let Ok(v) = std::env::var("SHELFKEEPER_DATABASE_PATH") {
        cfg.database_path = PathBuf::from(v);
    }
    if let Ok(v) = std::env::var("SHELFKEEPER_LIBRARY_ROOT") {
        cfg.library_root = PathBuf::from(v);
    }
    if let Ok(v) = std::env::var("SHELFKEEPER_PORT") {
        if let Ok(port) = v.parse() {
            cfg.port = port;
        }
    }
    if let Ok(v) = std::env::var("SHELFKEEPER_SCAN_WORKERS") {
        if let Ok(n) = v.parse() {
            cfg.scan_workers = n;
        }
    }
    if let Ok(v) = std::env::var("SHELFKEEPER_QUEUE_WORKERS") {
        if let Ok(n) = v.parse() {
            cfg.queue_workers = n;
        }
    }
    if let Ok(v) = std::env::var("SHELFKEEPER_LLM_API_KEY") {
        if is_valid_key(&v) {
            cfg.llm_api_key = Some(v);
        }
    }
    if let Ok(v) = std::env::var("SHELFKEEPER_LLM_ENDPOINT") {
        cfg.llm_endpoint = v;
    }
}

fn apply_cli(cfg: &mut Config, cli: CliOverrides) {
    if let Some(v) = cli.database_path {
        cfg.database_path = PathBuf::from(v);
    }
    if let Some(v) = cli.library_root {
        cfg.library_root = PathBuf::from(v);
    }
    if let Some(v) = cli.port {
        cfg.port = v;
    }
    if let Some(v) = cli.scan_workers {
        cfg.scan_workers = v;
    }
    if let Some(v) = cli.queue_workers {
        cfg.queue_workers = v;
    }
}

fn load_toml_config(path: &Path) -> Result<TomlConfig> {
    let content = std::fs::read_to_string(path)?;
    toml::from_str(&content).map_err(|e| Error::Config(format!("parse {}: {e}", path.display())))
}

/// Write a `TomlConfig` back to disk atomically (write-then-rename), used
/// when a setting resolved from the environment should be persisted so
/// future starts don't depend on the environment still being set.
pub fn write_toml_config(config: &TomlConfig, path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let rendered = toml::to_string_pretty(config)
        .map_err(|e| Error::Config(format!("serialize config: {e}")))?;
    let tmp_path = path.with_extension("toml.tmp");
    std::fs::write(&tmp_path, rendered)?;
    std::fs::rename(&tmp_path, path)?;
    Ok(())
}

/// Non-empty, non-whitespace key validation shared by every secret-bearing
/// setting (LLM API key today).
pub fn is_valid_key(key: &str) -> bool {
    !key.trim().is_empty()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    #[test]
    fn defaults_are_self_consistent() {
        let cfg = Config::default();
        assert_eq!(cfg.port, 7823);
        assert!(cfg.queue_workers >= 1);
    }

    #[test]
    #[serial]
    fn env_overrides_default() {
        std::env::set_var("SHELFKEEPER_PORT", "9001");
        let cfg = Config::resolve(None, CliOverrides::default()).unwrap();
        assert_eq!(cfg.port, 9001);
        std::env::remove_var("SHELFKEEPER_PORT");
    }

    #[test]
    #[serial]
    fn cli_overrides_env() {
        std::env::set_var("SHELFKEEPER_PORT", "9001");
        let cfg = Config::resolve(
            None,
            CliOverrides {
                port: Some(9999),
                ..Default::default()
            },
        )
        .unwrap();
        assert_eq!(cfg.port, 9999);
        std::env::remove_var("SHELFKEEPER_PORT");
    }

    #[test]
    fn toml_file_overrides_default() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("shelfkeeper.toml");
        std::fs::write(&path, "port = 8100\nscan_workers = 3\n").unwrap();
        let cfg = Config::resolve(Some(&path), CliOverrides::default()).unwrap();
        assert_eq!(cfg.port, 8100);
        assert_eq!(cfg.scan_workers, 3);
    }

    #[test]
    fn write_then_read_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("shelfkeeper.toml");
        let toml_cfg = TomlConfig {
            port: Some(1234),
            ..Default::default()
        };
        write_toml_config(&toml_cfg, &path).unwrap();
        let loaded = load_toml_config(&path).unwrap();
        assert_eq!(loaded.port, Some(1234));
    }
}
