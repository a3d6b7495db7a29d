use crate::config::GatewayConfig;
use crate::error::{FirewallError, Result};
use std::fmt;
use std::process::Command;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GatewayAction {
  Start,
  Stop,
  Restart,
}

impl GatewayAction {
  pub fn parse(word: &str) -> Option<Self> {
    match word {
      "start" => Some(Self::Start),
      "stop" => Some(Self::Stop),
      "restart" => Some(Self::Restart),
      _ => None,
    }
  }

  pub fn as_str(self) -> &'static str {
    match self {
      GatewayAction::Start => "start",
      GatewayAction::Stop => "stop",
      GatewayAction::Restart => "restart",
    }
  }
}

impl fmt::Display for GatewayAction {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.as_str())
  }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GatewayOutcome {
  Completed,
  DryRun(String),
}

/// Runs the packet forwarder control command configured for `action`.
pub fn control(cfg: &GatewayConfig, action: GatewayAction, dry_run: bool) -> Result<GatewayOutcome> {
  let argv = cfg.argv(action);
  let Some((program, args)) = argv.split_first() else {
    return Err(FirewallError::Gateway {
      action: action.to_string(),
      reason: format!("no `gateway.{action}` command configured"),
    });
  };

  let rendered = argv.join(" ");
  if dry_run {
    tracing::warn!(action = %action, command = %rendered, "DRY-RUN: would run gateway command");
    return Ok(GatewayOutcome::DryRun(rendered));
  }

  tracing::info!(action = %action, command = %rendered, "running gateway command");
  let status = Command::new(program)
    .args(args)
    .status()
    .map_err(|e| FirewallError::Gateway {
      action: action.to_string(),
      reason: format!("spawn `{program}`: {e}"),
    })?;

  if !status.success() {
    return Err(FirewallError::Gateway {
      action: action.to_string(),
      reason: format!("`{rendered}` exited with {status}"),
    });
  }

  tracing::info!(action = %action, "gateway command completed");
  Ok(GatewayOutcome::Completed)
}
