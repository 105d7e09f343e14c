//! Service configuration: defaults, then YAML file, then `HOOK_MAILER_*` env.

use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::NaiveTime;
use figment::providers::{Env, Format, Serialized, Yaml};
use figment::Figment;
use regex::Regex;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::info;

use crate::mail::BodyType;

pub const CONFIG_PATH_ENV: &str = "HOOK_MAILER_CONFIG";
pub const DEFAULT_CONFIG_PATH: &str = "config.yaml";
const ENV_PREFIX: &str = "HOOK_MAILER_";

#[derive(Debug, Error)]
pub enum ConfigError {
  #[error("config parsing: {0}")]
  Parsing(#[from] Box<figment::Error>),

  #[error("hook.audit.inform-time: {value:?} is not HH:MM")]
  InformTime { value: String },

  #[error("email.body.result-pattern: {0}")]
  Pattern(#[from] regex::Error),

  #[error("email.body.type: {0:?} is not html or text")]
  BodyType(String),

  #[error("hook.context-path: {0:?} must start with '/' and differ from /health")]
  ContextPath(String),
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct Config {
  pub server: ServerConfig,
  pub hook: HookConfig,
  pub email: EmailConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct ServerConfig {
  pub bind: String,
  pub port: u16,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct HookConfig {
  /// POST route of the webhook.
  pub context_path: String,
  /// Substring a resource locator must contain to be handled.
  pub marker: String,
  /// Apps that get a record at startup even before their first delivery.
  pub apps: Vec<String>,
  pub stats_file: PathBuf,
  pub snapshot_interval_secs: u64,
  /// Root for files extracted from images: `<workdir>/<namespace>/<app>/`.
  pub workdir: PathBuf,
  pub audit: AuditConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct AuditConfig {
  /// Daily `HH:MM` wake times of the exact-time informer.
  pub inform_time: Vec<String>,
  /// Seconds-resolution cron expression; empty disables the cron informer.
  pub inform_cron: String,
  /// Upper bound of the random per-app delay inside an informer pass.
  pub jitter_secs: u64,
  /// Also mail apps that built cleanly.
  pub notify_success: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct EmailConfig {
  pub server: String,
  pub port: u16,
  pub sender: SenderConfig,
  pub receiver: Vec<String>,
  pub cc: Vec<String>,
  pub body: BodyConfig,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct SenderConfig {
  pub address: String,
  pub password: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct BodyConfig {
  #[serde(rename = "type")]
  pub kind: String,
  /// Build report subject; `{app}`, `{date}` and `{result}` are substituted.
  pub subject: String,
  /// Regex with one capture group yielding `SUCCESS` or `FAILURE`.
  pub result_pattern: String,
}

impl Default for ServerConfig {
  fn default() -> Self {
    Self {
      bind: "0.0.0.0".into(),
      port: 8080,
    }
  }
}

impl Default for HookConfig {
  fn default() -> Self {
    Self {
      context_path: "/hook".into(),
      marker: "/build-hook/".into(),
      apps: Vec::new(),
      stats_file: PathBuf::from("stats.json"),
      snapshot_interval_secs: 60,
      workdir: PathBuf::from("/tmp"),
      audit: AuditConfig::default(),
    }
  }
}

impl Default for AuditConfig {
  fn default() -> Self {
    Self {
      inform_time: Vec::new(),
      inform_cron: String::new(),
      jitter_secs: 10,
      notify_success: false,
    }
  }
}

impl Default for EmailConfig {
  fn default() -> Self {
    Self {
      server: "localhost".into(),
      port: 25,
      sender: SenderConfig::default(),
      receiver: Vec::new(),
      cc: Vec::new(),
      body: BodyConfig::default(),
    }
  }
}

impl Default for BodyConfig {
  fn default() -> Self {
    Self {
      kind: "html".into(),
      subject: "Build report - {app} ({date}): {result}".into(),
      result_pattern: r"Build result: (SUCCESS|FAILURE)".into(),
    }
  }
}

impl Config {
  /// Load from the file named by `HOOK_MAILER_CONFIG` (default `config.yaml`).
  pub fn load() -> Result<Self, ConfigError> {
    let path = std::env::var(CONFIG_PATH_ENV).unwrap_or_else(|_| DEFAULT_CONFIG_PATH.into());
    Self::load_from_path(path)
  }

  /// Defaults, then `path` if it exists, then `HOOK_MAILER_*` overrides.
  pub fn load_from_path<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
    Self::load_layered(path.as_ref(), ENV_PREFIX)
  }

  fn load_layered(path: &Path, env_prefix: &str) -> Result<Self, ConfigError> {
    let mut figment = Figment::from(Serialized::defaults(Config::default()));
    if path.exists() {
      figment = figment.merge(Yaml::file(path));
    } else {
      info!(path = %path.display(), "config file not found, using defaults");
    }
    let config: Config = figment
      .merge(env_overrides(env_prefix))
      .extract()
      .map_err(Box::new)?;
    config.validate()?;
    Ok(config)
  }

  /// Fail fast on values the background loops would otherwise choke on.
  pub fn validate(&self) -> Result<(), ConfigError> {
    let path = &self.hook.context_path;
    if !path.starts_with('/') || path == "/health" {
      return Err(ConfigError::ContextPath(path.clone()));
    }
    self.hook.audit.inform_times()?;
    self.email.body.result_regex()?;
    self.email.body.body_type()?;
    Ok(())
  }

  pub fn bind_addr(&self) -> String {
    format!("{}:{}", self.server.bind, self.server.port)
  }
}

impl HookConfig {
  pub fn snapshot_interval(&self) -> Duration {
    Duration::from_secs(self.snapshot_interval_secs.max(1))
  }
}

impl AuditConfig {
  /// Parsed inform times, sorted ascending and deduplicated.
  pub fn inform_times(&self) -> Result<Vec<NaiveTime>, ConfigError> {
    let mut times = self
      .inform_time
      .iter()
      .map(|s| parse_inform_time(s))
      .collect::<Result<Vec<_>, _>>()?;
    times.sort();
    times.dedup();
    Ok(times)
  }

  /// `None` when no cron informer is configured.
  pub fn cron_expr(&self) -> Option<&str> {
    let expr = self.inform_cron.trim();
    (!expr.is_empty()).then_some(expr)
  }

  pub fn jitter(&self) -> Duration {
    Duration::from_secs(self.jitter_secs)
  }
}

impl BodyConfig {
  pub fn result_regex(&self) -> Result<Regex, ConfigError> {
    Ok(Regex::new(&self.result_pattern)?)
  }

  pub fn body_type(&self) -> Result<BodyType, ConfigError> {
    BodyType::from_str_loose(&self.kind).ok_or_else(|| ConfigError::BodyType(self.kind.clone()))
  }
}

/// `<PREFIX>HOOK__STATS_FILE` → `hook.stats-file`: `__` nests, `_` inside a
/// segment maps to the kebab-case key.
fn env_overrides(prefix: &str) -> Env {
  Env::prefixed(prefix)
    .split("__")
    .map(|key| key.as_str().replace('_', "-").into())
}

fn parse_inform_time(value: &str) -> Result<NaiveTime, ConfigError> {
  NaiveTime::parse_from_str(value.trim(), "%H:%M").map_err(|_| ConfigError::InformTime {
    value: value.to_string(),
  })
}
