use super::{write_atomic, CommitSummary, RuleStore};
use crate::error::{FirewallError, Result};
use crate::types::{DeviceAddress, Rule};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fs::{self, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};

// Unknown keys are carried through untouched at every level so a rewrite never
// loses content this tool does not model.

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StoreDocument {
  pub firewall_conf: FirewallConf,

  #[serde(flatten)]
  pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FirewallConf {
  pub nodes: Vec<Node>,

  #[serde(flatten)]
  pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Node {
  pub addr: String,
  pub rule: String,

  #[serde(flatten)]
  pub extra: Map<String, Value>,
}

impl From<&Rule> for Node {
  fn from(rule: &Rule) -> Self {
    Self {
      addr: rule.addr.as_str().to_string(),
      rule: rule.bucket.as_str().to_string(),
      extra: Map::new(),
    }
  }
}

impl StoreDocument {
  pub fn append(&mut self, rules: &[Rule]) {
    self
      .firewall_conf
      .nodes
      .extend(rules.iter().map(Node::from));
  }
}

pub fn parse(path: &Path, raw: &str) -> Result<StoreDocument> {
  serde_json::from_str(raw).map_err(|e| FirewallError::CorruptStore {
    path: path.to_path_buf(),
    reason: e.to_string(),
  })
}

pub fn render(path: &Path, doc: &StoreDocument, indent: usize) -> Result<Vec<u8>> {
  let indent = vec![b' '; indent];
  let formatter = serde_json::ser::PrettyFormatter::with_indent(&indent);
  let mut buf = Vec::new();
  let mut ser = serde_json::Serializer::with_formatter(&mut buf, formatter);
  doc
    .serialize(&mut ser)
    .map_err(|e| FirewallError::CorruptStore {
      path: path.to_path_buf(),
      reason: format!("serialize: {e}"),
    })?;
  buf.push(b'\n');
  Ok(buf)
}

/// JSON rule store, rewritten as a whole at session end.
#[derive(Debug)]
pub struct JsonStore {
  path: PathBuf,
  indent: usize,
  atomic_write: bool,
  dry_run: bool,
  initial_len: u64,
}

impl JsonStore {
  pub fn open(path: &Path, indent: usize, atomic_write: bool, dry_run: bool) -> Self {
    // I/O problems are deferred to commit, where they are surfaced.
    let initial_len = match fs::metadata(path) {
      Ok(md) => md.len(),
      Err(e) if e.kind() == ErrorKind::NotFound => 0,
      Err(e) => {
        tracing::warn!(path = %path.display(), error = %e, "unable to probe rule store");
        0
      }
    };

    Self {
      path: path.to_path_buf(),
      indent,
      atomic_write,
      dry_run,
      initial_len,
    }
  }

  pub fn had_content(&self) -> bool {
    self.initial_len > 0
  }

  fn load(&self) -> Result<StoreDocument> {
    let raw = match fs::read_to_string(&self.path) {
      Ok(raw) => raw,
      Err(e) if e.kind() == ErrorKind::NotFound => String::new(),
      Err(e) => return Err(FirewallError::io(&self.path, e)),
    };

    if raw.is_empty() {
      if self.had_content() {
        tracing::warn!(
          path = %self.path.display(),
          initial_len = self.initial_len,
          "rule store was emptied during the session; starting a fresh document"
        );
      }
      return Ok(StoreDocument::default());
    }
    parse(&self.path, &raw)
  }

  fn write(&self, contents: &[u8]) -> Result<()> {
    if self.atomic_write {
      return write_atomic(&self.path, contents);
    }

    let mut file = OpenOptions::new()
      .write(true)
      .create(true)
      .truncate(true)
      .open(&self.path)
      .map_err(|e| FirewallError::io(&self.path, e))?;
    file
      .write_all(contents)
      .and_then(|_| file.flush())
      .map_err(|e| FirewallError::io(&self.path, e))
  }
}

impl RuleStore for JsonStore {
  fn path(&self) -> &Path {
    &self.path
  }

  fn record_add(&mut self, _rule: &Rule) -> Result<()> {
    Ok(())
  }

  fn record_remove(&mut self, _addr: &DeviceAddress) -> Result<()> {
    Ok(())
  }

  fn commit(&mut self, rules: &[Rule]) -> Result<CommitSummary> {
    let mut doc = self.load()?;
    let existing = doc.firewall_conf.nodes.len();
    doc.append(rules);
    let contents = render(&self.path, &doc, self.indent)?;

    let summary = CommitSummary {
      existing,
      added: rules.len(),
    };

    if self.dry_run {
      tracing::warn!(
        path = %self.path.display(),
        existing,
        added = rules.len(),
        "DRY-RUN: would rewrite rule store"
      );
      return Ok(summary);
    }

    self.write(&contents)?;
    tracing::info!(
      path = %self.path.display(),
      existing,
      added = rules.len(),
      atomic = self.atomic_write,
      "rule store rewritten"
    );
    Ok(summary)
  }
}
