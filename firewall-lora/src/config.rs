use crate::command::Dispatch;
use crate::gateway::GatewayAction;
use crate::paths;
use crate::types::Mode;
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone)]
pub struct Config {
  pub mode: Mode,
  pub dispatch: Dispatch,
  pub store: StoreConfig,
  pub logging: LoggingConfig,
  pub gateway: GatewayConfig,
}

impl Default for Config {
  fn default() -> Self {
    Self {
      mode: Mode::Extended,
      dispatch: Dispatch::default(),
      store: StoreConfig::default(),
      logging: LoggingConfig::default(),
      gateway: GatewayConfig::default(),
    }
  }
}

#[derive(Debug, Clone, Deserialize)]
pub struct StoreConfig {
  #[serde(default = "default_flat_path")]
  pub flat_path: PathBuf,

  /// Relative paths resolve against the working directory at startup.
  #[serde(default = "default_json_path")]
  pub json_path: PathBuf,

  #[serde(default = "default_indent")]
  pub indent: usize,

  #[serde(default = "default_true")]
  pub atomic_write: bool,
}

impl Default for StoreConfig {
  fn default() -> Self {
    Self {
      flat_path: default_flat_path(),
      json_path: default_json_path(),
      indent: default_indent(),
      atomic_write: true,
    }
  }
}

impl StoreConfig {
  pub fn set_path_for(&mut self, mode: Mode, path: PathBuf) {
    match mode {
      Mode::Simple => self.flat_path = path,
      Mode::Extended => self.json_path = path,
    }
  }

  pub fn resolve_relative(&mut self, cwd: &Path) {
    for p in [&mut self.flat_path, &mut self.json_path] {
      if p.is_relative() {
        *p = cwd.join(&*p);
      }
    }
  }
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
  #[serde(default = "default_log_level")]
  pub level: String,

  #[serde(default = "default_retention_days")]
  pub retention_days: u64,

  #[serde(default)]
  pub dir: Option<PathBuf>,

  #[serde(default)]
  pub stderr: bool,
}

impl Default for LoggingConfig {
  fn default() -> Self {
    Self {
      level: default_log_level(),
      retention_days: default_retention_days(),
      dir: None,
      stderr: false,
    }
  }
}

/// Packet forwarder control commands, as argv lists.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct GatewayConfig {
  #[serde(default)]
  pub start: Vec<String>,

  #[serde(default)]
  pub stop: Vec<String>,

  #[serde(default)]
  pub restart: Vec<String>,
}

impl GatewayConfig {
  pub fn argv(&self, action: GatewayAction) -> &[String] {
    match action {
      GatewayAction::Start => &self.start,
      GatewayAction::Stop => &self.stop,
      GatewayAction::Restart => &self.restart,
    }
  }
}

fn default_true() -> bool {
  true
}

fn default_flat_path() -> PathBuf {
  PathBuf::from(paths::DEFAULT_BASE_DIR).join("hosts_denied.txt")
}

fn default_json_path() -> PathBuf {
  PathBuf::from("firewall_conf.json")
}

fn default_indent() -> usize {
  4
}

const MAX_INDENT: usize = 16;

fn default_log_level() -> String {
  "info".to_string()
}

fn default_retention_days() -> u64 {
  14
}

#[derive(Debug, Clone, Default, Deserialize)]
struct ConfigFile {
  #[serde(default)]
  pub mode: Option<Mode>,

  #[serde(default)]
  pub dispatch: Option<Dispatch>,

  #[serde(default)]
  pub store: Option<StoreConfig>,

  #[serde(default)]
  pub logging: Option<LoggingConfig>,

  #[serde(default)]
  pub gateway: Option<GatewayConfig>,
}

impl ConfigFile {
  fn normalize(self) -> Config {
    let mut cfg = Config::default();
    if let Some(mode) = self.mode {
      cfg.mode = mode;
    }
    if let Some(d) = self.dispatch {
      cfg.dispatch = d;
    }
    if let Some(s) = self.store {
      cfg.store = s;
    }
    if let Some(l) = self.logging {
      cfg.logging = l;
    }
    if let Some(g) = self.gateway {
      cfg.gateway = g;
    }

    if let Some(reason) = validate_store_config(&cfg.store) {
      eprintln!("firewall-lora: store config invalid ({reason}); using indent {}", default_indent());
      cfg.store.indent = default_indent();
    }

    cfg
  }
}

pub fn parse(raw: &str) -> anyhow::Result<Config> {
  Ok(toml::from_str::<ConfigFile>(raw)?.normalize())
}

/// Reads the config without ever writing it. A missing or invalid file falls
/// back to defaults.
pub fn load_or_default(path: &Path) -> anyhow::Result<Config> {
  if !path.exists() {
    return Ok(Config::default());
  }

  let raw = fs::read_to_string(path)?;
  match parse(&raw) {
    Ok(cfg) => Ok(cfg),
    Err(e) => {
      eprintln!(
        "firewall-lora: invalid config at {}; using defaults: {e}",
        path.display()
      );
      Ok(Config::default())
    }
  }
}

fn validate_store_config(cfg: &StoreConfig) -> Option<String> {
  if cfg.indent > MAX_INDENT {
    return Some(format!("indent must be <= {MAX_INDENT}"));
  }
  None
}
