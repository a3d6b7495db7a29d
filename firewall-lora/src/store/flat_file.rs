use super::{CommitSummary, RuleStore};
use crate::error::{FirewallError, Result};
use crate::types::{Chain, DeviceAddress, Rule};
use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

/// Append-only deny list. Every accepted rule is written as soon as it is entered,
/// in the lowercase `add <chain> <addr> drop` phrase the enforcer reads.
#[derive(Debug)]
pub struct FlatFileStore {
  path: PathBuf,
  // None in dry-run mode.
  writer: Option<BufWriter<File>>,
}

impl FlatFileStore {
  pub fn open(path: &Path, dry_run: bool) -> Result<Self> {
    if dry_run {
      tracing::warn!(
        path = %path.display(),
        "DRY-RUN: would open flat rule store for append"
      );
      return Ok(Self {
        path: path.to_path_buf(),
        writer: None,
      });
    }

    let file = OpenOptions::new()
      .create(true)
      .append(true)
      .open(path)
      .map_err(|e| FirewallError::io(path, e))?;

    Ok(Self {
      path: path.to_path_buf(),
      writer: Some(BufWriter::new(file)),
    })
  }

  fn append_line(&mut self, line: &str) -> Result<()> {
    let Some(writer) = self.writer.as_mut() else {
      tracing::warn!(line, "DRY-RUN: would append rule line");
      return Ok(());
    };

    writeln!(writer, "{line}")
      .and_then(|_| writer.flush())
      .map_err(|e| FirewallError::io(&self.path, e))?;
    tracing::debug!(path = %self.path.display(), line, "rule line appended");
    Ok(())
  }
}

pub fn format_add(rule: &Rule) -> String {
  let chain = rule.chain.unwrap_or(Chain::Input);
  format!("add {chain} {} drop", rule.addr)
}

pub fn format_remove(addr: &DeviceAddress) -> String {
  format!("remove {addr}")
}

impl RuleStore for FlatFileStore {
  fn path(&self) -> &Path {
    &self.path
  }

  fn record_add(&mut self, rule: &Rule) -> Result<()> {
    self.append_line(&format_add(rule))
  }

  fn record_remove(&mut self, addr: &DeviceAddress) -> Result<()> {
    self.append_line(&format_remove(addr))
  }

  fn commit(&mut self, rules: &[Rule]) -> Result<CommitSummary> {
    if let Some(writer) = self.writer.as_mut() {
      writer.flush().map_err(|e| FirewallError::io(&self.path, e))?;
    }
    // Rules were written as they were entered; nothing left to merge.
    Ok(CommitSummary {
      existing: 0,
      added: rules.len(),
    })
  }
}
