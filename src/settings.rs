use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Result, ensure};
use config::{Config, ConfigError, Environment, File};
use reqwest::Url;
use serde::Deserialize;

use crate::cli::{Cli, LogFormat};

const DEFAULT_CONFIG_FILE: &str = "offline-cache.toml";

fn default_cache_dir() -> PathBuf {
    PathBuf::from("cache")
}

fn default_user_agent() -> String {
    concat!("offline-cache/", env!("CARGO_PKG_VERSION")).to_string()
}

fn default_log_format() -> LogFormat {
    LogFormat::Json
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    #[default]
    Disk,
    Memory,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    #[serde(default)]
    pub backend: BackendKind,
    #[serde(default = "default_cache_dir")]
    pub cache_dir: PathBuf,
    /// Base for resolving relative request URLs.
    #[serde(default)]
    pub base_url: Option<String>,
    #[serde(default)]
    pub offline: bool,
    /// Seconds; unset means fetches are never cut short.
    #[serde(default)]
    pub fetch_timeout: Option<u64>,
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
    #[serde(default = "default_log_format")]
    pub log: LogFormat,
}

impl Settings {
    pub fn load(cli: &Cli) -> Result<Self> {
        let mut builder = Config::builder();
        let config_path = resolve_config_path(cli);

        if let Some(path) = &config_path {
            builder = builder.add_source(File::from(path.clone()).required(true));
        }

        builder = builder.add_source(
            Environment::with_prefix("OFFLINE_CACHE")
                .separator("__")
                .try_parsing(true),
        );

        let cfg = builder.build().map_err(to_anyhow)?;
        let mut settings: Settings = cfg.try_deserialize().map_err(to_anyhow)?;
        if let Some(path) = &config_path {
            settings.apply_base_dir(path);
        }
        if cli.offline {
            settings.offline = true;
        }
        settings.validate()?;
        Ok(settings)
    }

    pub fn fetch_timeout(&self) -> Option<Duration> {
        self.fetch_timeout.map(Duration::from_secs)
    }

    fn apply_base_dir(&mut self, config_path: &Path) {
        let base_dir = config_path
            .parent()
            .filter(|dir| !dir.as_os_str().is_empty())
            .unwrap_or_else(|| Path::new("."));
        self.cache_dir = absolutize(&self.cache_dir, base_dir);
    }

    pub fn validate(&self) -> Result<()> {
        if let Some(timeout) = self.fetch_timeout {
            ensure!(
                timeout > 0,
                "fetch_timeout must be greater than 0 seconds (got {timeout})"
            );
        }
        if let Some(base_url) = &self.base_url {
            let parsed = Url::parse(base_url);
            ensure!(
                parsed.is_ok_and(|url| !url.cannot_be_a_base()),
                "base_url must be an absolute URL (got {base_url:?})"
            );
        }
        ensure!(
            !self.user_agent.trim().is_empty(),
            "user_agent must not be empty"
        );
        if self.backend == BackendKind::Disk {
            ensure!(
                !self.cache_dir.as_os_str().is_empty(),
                "cache_dir must be set for the disk backend"
            );
        }
        Ok(())
    }
}

fn to_anyhow(err: ConfigError) -> anyhow::Error {
    anyhow::anyhow!(err)
}

impl Cli {
    pub fn config_path(&self) -> Option<&Path> {
        self.config.as_deref()
    }
}

/// An explicit `--config` must exist; the default file is optional.
fn resolve_config_path(cli: &Cli) -> Option<PathBuf> {
    if let Some(path) = cli.config_path() {
        return Some(path.to_path_buf());
    }
    let candidate = PathBuf::from(DEFAULT_CONFIG_FILE);
    candidate.exists().then_some(candidate)
}

fn absolutize(path: &Path, base: &Path) -> PathBuf {
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        base.join(path)
    }
}
