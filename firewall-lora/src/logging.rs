use std::fs;
use std::path::Path;
use std::sync::OnceLock;
use std::time::{Duration, SystemTime};

use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

const LOG_FILE_NAME: &str = "firewall-lora.log";

static FILE_GUARD: OnceLock<WorkerGuard> = OnceLock::new();

/// Daily rolling file log, plus stderr when requested. The interactive prompt
/// owns stdout, so nothing is ever logged there.
pub fn init(log_dir: &Path, level: &str, retention_days: u64, stderr: bool) -> anyhow::Result<()> {
  fs::create_dir_all(log_dir)?;
  prune_expired_logs(log_dir, retention_days)?;

  let file_appender = tracing_appender::rolling::daily(log_dir, LOG_FILE_NAME);
  let (file_writer, guard) = tracing_appender::non_blocking(file_appender);
  let _ = FILE_GUARD.set(guard);

  let file_layer = tracing_subscriber::fmt::layer()
    .with_ansi(false)
    .with_writer(file_writer)
    .with_target(true);

  let stderr_layer = stderr.then(|| {
    tracing_subscriber::fmt::layer()
      .with_ansi(false)
      .with_writer(std::io::stderr)
      .with_target(true)
  });

  tracing_subscriber::registry()
    .with(env_filter(level))
    .with(file_layer)
    .with(stderr_layer)
    .try_init()?;

  Ok(())
}

/// Used when the log directory cannot be prepared.
pub fn init_stderr_only(level: &str) {
  let _ = tracing_subscriber::registry()
    .with(env_filter(level))
    .with(
      tracing_subscriber::fmt::layer()
        .with_ansi(false)
        .with_writer(std::io::stderr)
        .with_target(false),
    )
    .try_init();
}

fn env_filter(level: &str) -> tracing_subscriber::EnvFilter {
  tracing_subscriber::EnvFilter::try_new(level)
    .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"))
}

/// Deletes rolled log files whose last write is older than `retention_days`.
/// Zero keeps everything.
fn prune_expired_logs(log_dir: &Path, retention_days: u64) -> anyhow::Result<()> {
  if retention_days == 0 {
    return Ok(());
  }
  let max_age = Duration::from_secs(retention_days.saturating_mul(86_400));
  let now = SystemTime::now();

  let Ok(entries) = fs::read_dir(log_dir) else {
    return Ok(());
  };

  let expired = entries.flatten().filter(|entry| {
    let name = entry.file_name();
    let Some(name) = name.to_str() else {
      return false;
    };
    is_rolled_log_name(name)
      && entry
        .metadata()
        .and_then(|m| m.modified())
        .is_ok_and(|modified| now.duration_since(modified).is_ok_and(|age| age > max_age))
  });

  for entry in expired {
    let path = entry.path();
    match fs::remove_file(&path) {
      Ok(()) => tracing::debug!(path = %path.display(), "expired log removed"),
      Err(e) => eprintln!("firewall-lora: unable to remove old log {}: {e}", path.display()),
    }
  }
  Ok(())
}

// The appender names files `<LOG_FILE_NAME>.<date>`.
fn is_rolled_log_name(name: &str) -> bool {
  name
    .strip_prefix(LOG_FILE_NAME)
    .is_some_and(|rest| rest.is_empty() || rest.starts_with('.'))
}
