mod flat_file;
mod json;

pub use flat_file::FlatFileStore;
pub use json::{FirewallConf, JsonStore, Node, StoreDocument};

use crate::config::StoreConfig;
use crate::error::{FirewallError, Result};
use crate::types::{now_unix_s, DeviceAddress, Mode, Rule};
use std::fs;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CommitSummary {
  pub existing: usize,
  pub added: usize,
}

impl CommitSummary {
  pub fn total(&self) -> usize {
    self.existing + self.added
  }
}

/// Persistence backend for one session's rules.
pub trait RuleStore {
  fn path(&self) -> &Path;

  /// Called for every accepted `add`, before the rule enters the registry.
  fn record_add(&mut self, rule: &Rule) -> Result<()>;

  fn record_remove(&mut self, addr: &DeviceAddress) -> Result<()>;

  /// Persists the registry's rules at session end.
  fn commit(&mut self, rules: &[Rule]) -> Result<CommitSummary>;
}

pub fn open_store(mode: Mode, cfg: &StoreConfig, dry_run: bool) -> Result<Box<dyn RuleStore>> {
  let store: Box<dyn RuleStore> = match mode {
    Mode::Simple => Box::new(FlatFileStore::open(&cfg.flat_path, dry_run)?),
    Mode::Extended => Box::new(JsonStore::open(
      &cfg.json_path,
      cfg.indent,
      cfg.atomic_write,
      dry_run,
    )),
  };

  tracing::info!(
    mode = ?mode,
    path = %store.path().display(),
    dry_run,
    "rule store opened"
  );
  Ok(store)
}

/// Writes rules that could not be committed next to the store so they are not lost.
pub fn write_rescue(store_path: &Path, rules: &[Rule], indent: usize) -> Result<PathBuf> {
  let name = store_path
    .file_name()
    .map(|n| n.to_string_lossy().into_owned())
    .unwrap_or_else(|| "rules".to_string());
  let rescue = store_path.with_file_name(format!("{name}.rescue-{}.json", now_unix_s()));

  let mut doc = StoreDocument::default();
  doc.append(rules);
  let raw = json::render(&rescue, &doc, indent)?;
  fs::write(&rescue, raw).map_err(|e| FirewallError::io(&rescue, e))?;
  Ok(rescue)
}

pub(crate) fn write_atomic(path: &Path, contents: &[u8]) -> Result<()> {
  let parent = path.parent().unwrap_or_else(|| Path::new("."));
  let tmp = parent.join(format!(
    ".{}.tmp",
    path.file_name().unwrap_or_default().to_string_lossy()
  ));

  fs::write(&tmp, contents).map_err(|e| FirewallError::io(&tmp, e))?;
  if let Err(e) = fs::rename(&tmp, path) {
    let _ = fs::remove_file(&tmp);
    return Err(FirewallError::io(path, e));
  }
  Ok(())
}
