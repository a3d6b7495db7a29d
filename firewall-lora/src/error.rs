use std::path::PathBuf;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, FirewallError>;

#[derive(Debug, Error)]
pub enum FirewallError {
  #[error("malformed command `{line}`: {reason}")]
  MalformedCommand { line: String, reason: String },

  #[error("corrupt rule store at {}: {reason}", .path.display())]
  CorruptStore { path: PathBuf, reason: String },

  #[error("rule store I/O failure at {}: {source}", .path.display())]
  Io {
    path: PathBuf,
    source: std::io::Error,
  },

  #[error("gateway {action} failed: {reason}")]
  Gateway { action: String, reason: String },
}

impl FirewallError {
  pub fn malformed(line: &str, reason: impl Into<String>) -> Self {
    Self::MalformedCommand {
      line: line.to_string(),
      reason: reason.into(),
    }
  }

  pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
    Self::Io {
      path: path.into(),
      source,
    }
  }

  /// Only store-level failures end a session.
  pub fn is_fatal(&self) -> bool {
    matches!(self, Self::CorruptStore { .. } | Self::Io { .. })
  }
}
