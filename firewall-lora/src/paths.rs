use std::path::{Path, PathBuf};

pub const DEFAULT_BASE_DIR: &str = "/etc/FirewallLora";

pub fn base_dir() -> PathBuf {
  std::env::var_os("FIREWALL_LORA_HOME")
    .filter(|v| !v.is_empty())
    .map(PathBuf::from)
    .unwrap_or_else(|| PathBuf::from(DEFAULT_BASE_DIR))
}

pub fn config_path(base: &Path) -> PathBuf {
  base.join("config.toml")
}

pub fn logs_dir(base: &Path) -> PathBuf {
  base.join("logs")
}
