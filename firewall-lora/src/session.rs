use crate::command::{Command, Dispatch, Parser};
use crate::config::{Config, GatewayConfig};
use crate::error::FirewallError;
use crate::gateway::{self, GatewayOutcome};
use crate::registry::RuleRegistry;
use crate::store::{self, CommitSummary, RuleStore};
use crate::types::{Mode, Rule};
use std::io::{BufRead, Write};

pub const BANNER: &str = "Firewall for Gateways LoraWAN";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
  Running,
  Terminated,
}

/// One interactive session: reads commands, keeps pending rules, and hands
/// them to the store on `exit`.
pub struct Session {
  parser: Parser,
  dispatch: Dispatch,
  registry: RuleRegistry,
  store: Box<dyn RuleStore>,
  gateway: GatewayConfig,
  rescue_indent: usize,
  dry_run: bool,
  state: SessionState,
}

impl Session {
  pub fn new(cfg: &Config, store: Box<dyn RuleStore>, dry_run: bool) -> Self {
    Self {
      parser: Parser::new(cfg.mode, cfg.dispatch),
      dispatch: cfg.dispatch,
      registry: RuleRegistry::new(),
      store,
      gateway: cfg.gateway.clone(),
      rescue_indent: cfg.store.indent,
      dry_run,
      state: SessionState::Running,
    }
  }

  pub fn state(&self) -> SessionState {
    self.state
  }

  pub fn registry(&self) -> &RuleRegistry {
    &self.registry
  }

  /// Runs until `exit` (or end of input) and returns what was committed.
  /// A store failure at commit is returned after the pending rules have been
  /// reported to `out`.
  pub fn run<R: BufRead, W: Write>(&mut self, mut input: R, out: &mut W) -> anyhow::Result<CommitSummary> {
    writeln!(out, "{BANNER}")?;
    self.print_help(out)?;

    let mut buf = Vec::new();
    loop {
      write!(out, "> ")?;
      out.flush()?;

      buf.clear();
      let read = match input.read_until(b'\n', &mut buf) {
        Ok(n) => n,
        Err(e) => {
          tracing::error!(error = %e, pending = self.registry.len(), "unable to read operator input");
          writeln!(out, "error: unable to read input: {e}")?;
          self.finish(out)?;
          return Err(anyhow::Error::new(e).context("read operator input"));
        }
      };
      if read == 0 {
        writeln!(out)?;
        tracing::warn!(
          pending = self.registry.len(),
          "end of input; saving as if `exit` was entered"
        );
        return self.finish(out);
      }

      let Ok(line) = std::str::from_utf8(&buf) else {
        let e = FirewallError::malformed(
          String::from_utf8_lossy(&buf).trim(),
          "input is not valid UTF-8",
        );
        tracing::warn!(error = %e, "command rejected");
        writeln!(out, "error: {e}")?;
        continue;
      };

      for parsed in self.parser.parse(line) {
        let cmd = match parsed {
          Ok(cmd) => cmd,
          Err(e) => {
            tracing::warn!(error = %e, "command rejected");
            writeln!(out, "error: {e}")?;
            continue;
          }
        };

        if cmd == Command::Exit {
          return self.finish(out);
        }
        self.apply(cmd, out)?;
      }
    }
  }

  fn apply<W: Write>(&mut self, cmd: Command, out: &mut W) -> anyhow::Result<()> {
    match cmd {
      Command::Help => self.print_help(out)?,
      Command::Add(rule) => {
        // The flat store writes immediately; losing it ends the session.
        if let Err(e) = self.store.record_add(&rule) {
          return self.abort(e, std::slice::from_ref(&rule), out);
        }
        tracing::info!(addr = %rule.addr, bucket = %rule.bucket, chain = ?rule.chain, "rule added");
        writeln!(out, "added: {rule}")?;
        self.registry.add(rule);
      }
      Command::Remove(addr) => {
        if let Err(e) = self.store.record_remove(&addr) {
          writeln!(out, "unsaved command (re-enter to retry):")?;
          writeln!(out, "  remove {addr}")?;
          return self.abort(e, &[], out);
        }
        let removed = self.registry.remove(&addr);
        tracing::info!(addr = %addr, removed, "pending rules removed");
        writeln!(out, "removed {removed} pending rule(s) for {addr}")?;
      }
      Command::List => {
        let rules = self.registry.snapshot();
        if rules.is_empty() {
          writeln!(out, "no pending rules")?;
        }
        for (i, rule) in rules.iter().enumerate() {
          writeln!(out, "{:>3}. {rule}", i + 1)?;
        }
      }
      Command::Gateway(action) => match gateway::control(&self.gateway, action, self.dry_run) {
        Ok(GatewayOutcome::Completed) => writeln!(out, "gateway {action}: done")?,
        Ok(GatewayOutcome::DryRun(cmdline)) => writeln!(out, "DRY-RUN: would run `{cmdline}`")?,
        Err(e) => {
          tracing::warn!(error = %e, "gateway control failed");
          writeln!(out, "error: {e}")?;
        }
      },
      Command::Unrecognized(text) => {
        tracing::debug!(line = %text, "unrecognized command");
        writeln!(out, "unrecognized command `{text}`; type `help` for the command list")?;
      }
      Command::Exit => {}
    }
    Ok(())
  }

  fn finish<W: Write>(&mut self, out: &mut W) -> anyhow::Result<CommitSummary> {
    self.state = SessionState::Terminated;

    let result = self.store.commit(self.registry.snapshot());
    let rules = self.registry.drain();
    match result {
      Ok(summary) => {
        tracing::info!(
          path = %self.store.path().display(),
          existing = summary.existing,
          added = summary.added,
          "session rules committed"
        );
        writeln!(
          out,
          "{} rule(s) saved to {}",
          summary.added,
          self.store.path().display()
        )?;
        Ok(summary)
      }
      Err(e) => {
        tracing::error!(error = %e, pending = rules.len(), "commit failed");
        writeln!(out, "error: {e}")?;
        self.report_unsaved(&rules, out)?;
        Err(e.into())
      }
    }
  }

  /// Ends the session after a store write failed outside of `exit`.
  fn abort<W: Write>(&mut self, e: FirewallError, unsaved: &[Rule], out: &mut W) -> anyhow::Result<()> {
    self.state = SessionState::Terminated;
    tracing::error!(error = %e, unsaved = unsaved.len(), "rule store write failed; ending session");
    writeln!(out, "error: {e}")?;
    self.report_unsaved(unsaved, out)?;
    Err(e.into())
  }

  fn report_unsaved<W: Write>(&self, rules: &[Rule], out: &mut W) -> anyhow::Result<()> {
    if rules.is_empty() {
      return Ok(());
    }

    match store::write_rescue(self.store.path(), rules, self.rescue_indent) {
      Ok(path) => {
        tracing::warn!(path = %path.display(), count = rules.len(), "unsaved rules rescued");
        writeln!(out, "unsaved rules written to {}", path.display())?;
      }
      Err(e) => {
        tracing::error!(error = %e, "unable to write rescue file");
        writeln!(out, "unable to write rescue file: {e}")?;
      }
    }

    writeln!(out, "unsaved rules (re-enter to retry):")?;
    for rule in rules {
      writeln!(out, "  {}", command_text(self.parser.mode(), rule))?;
    }
    Ok(())
  }

  fn print_help<W: Write>(&self, out: &mut W) -> std::io::Result<()> {
    writeln!(out, "Commands:")?;
    match self.parser.mode() {
      Mode::Simple => {
        writeln!(out, "  add <deviceAddress> input     gateway drops packets from this device")?;
        writeln!(out, "  add <deviceAddress> output    gateway drops packets to this device")?;
        writeln!(out, "  add input|output <deviceAddress> drop   (long form)")?;
      }
      Mode::Extended => {
        writeln!(out, "  add <deviceAddress> <white|black|allow|deny>")?;
      }
    }
    match self.dispatch {
      Dispatch::FirstToken => {
        writeln!(out, "  remove <deviceAddress>        drop pending rules for a device")?;
        writeln!(out, "  list                          show pending rules")?;
        writeln!(out, "  start gw | stop gw | restart gw")?;
      }
      Dispatch::Substring => {
        writeln!(out, "  (legacy matching: a line may trigger several commands)")?;
      }
    }
    writeln!(out, "  help                          show this summary")?;
    writeln!(out, "  exit                          save and quit")?;
    Ok(())
  }
}

fn command_text(mode: Mode, rule: &Rule) -> String {
  match (mode, rule.chain) {
    (Mode::Simple, Some(chain)) => format!("add {} {chain}", rule.addr),
    _ => format!("add {} {}", rule.addr, rule.bucket),
  }
}

/// Whether a session error came from the store rather than the terminal.
pub fn is_store_failure(err: &anyhow::Error) -> bool {
  err
    .downcast_ref::<FirewallError>()
    .is_some_and(FirewallError::is_fatal)
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::store::{FlatFileStore, JsonStore};
  use serde_json::Value;
  use std::fs;
  use std::io::Cursor;
  use std::path::Path;

  fn extended_cfg() -> Config {
    Config::default()
  }

  fn run_json(path: &Path, cfg: &Config, script: &str) -> (anyhow::Result<CommitSummary>, String) {
    let store = JsonStore::open(path, cfg.store.indent, cfg.store.atomic_write, false);
    let mut session = Session::new(cfg, Box::new(store), false);
    let mut out = Vec::new();
    let res = session.run(Cursor::new(script.to_string()), &mut out);
    assert_eq!(session.state(), SessionState::Terminated);
    (res, String::from_utf8(out).unwrap())
  }

  fn read_value(path: &Path) -> Value {
    serde_json::from_str(&fs::read_to_string(path).unwrap()).unwrap()
  }

  fn node_pairs(path: &Path) -> Vec<(String, String)> {
    read_value(path)["firewall_conf"]["nodes"]
      .as_array()
      .unwrap()
      .iter()
      .map(|n| {
        (
          n["addr"].as_str().unwrap().to_string(),
          n["rule"].as_str().unwrap().to_string(),
        )
      })
      .collect()
  }

  #[test]
  fn empty_store_end_to_end() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("firewall_conf.json");

    let (res, _) = run_json(
      &path,
      &extended_cfg(),
      "add abc123 white\nadd def456 black\nexit\n",
    );
    assert_eq!(res.unwrap().added, 2);

    let expected: Value = serde_json::from_str(
      r#"{"firewall_conf":{"nodes":[{"addr":"abc123","rule":"white"},{"addr":"def456","rule":"black"}]}}"#,
    )
    .unwrap();
    assert_eq!(read_value(&path), expected);
  }

  #[test]
  fn prepopulated_store_end_to_end() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("firewall_conf.json");
    fs::write(
      &path,
      r#"{"firewall_conf":{"nodes":[{"addr":"zzz","rule":"allow"}]}}"#,
    )
    .unwrap();

    let (res, _) = run_json(&path, &extended_cfg(), "add qqq deny\nexit\n");
    let summary = res.unwrap();
    assert_eq!(summary.total(), 2);
    assert_eq!(
      node_pairs(&path),
      [
        ("zzz".to_string(), "allow".to_string()),
        ("qqq".to_string(), "deny".to_string())
      ]
    );
  }

  #[test]
  fn duplicates_and_bad_input_across_a_session() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("firewall_conf.json");

    let script = "add abc white\n\nadd foo\nadd devicex purple\n   \nhelp\nhelp\nADD ABC WHITE\nfoo bar\nexit\n";
    let (res, out) = run_json(&path, &extended_cfg(), script);
    assert_eq!(res.unwrap().added, 2);
    assert_eq!(
      node_pairs(&path),
      [
        ("abc".to_string(), "white".to_string()),
        ("abc".to_string(), "white".to_string())
      ]
    );
    assert!(out.contains("error: malformed command `add foo`"));
    assert!(out.contains("unknown tag `purple`"));
    assert!(out.contains("unrecognized command `foo bar`"));
  }

  #[test]
  fn help_never_mutates_registry_or_store() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("firewall_conf.json");
    let store = JsonStore::open(&path, 4, true, false);
    let mut session = Session::new(&extended_cfg(), Box::new(store), false);

    let mut out = Vec::new();
    session
      .run(Cursor::new("help\nhelp\nhelp\nexit\n"), &mut out)
      .unwrap();

    assert!(session.registry().is_empty());
    assert!(node_pairs(&path).is_empty());
  }

  #[test]
  fn remove_and_list_operate_on_pending_rules() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("firewall_conf.json");

    let script = "add abc white\nadd def black\nremove abc\nlist\nexit\n";
    let (res, out) = run_json(&path, &extended_cfg(), script);
    res.unwrap();

    assert!(out.contains("removed 1 pending rule(s) for abc"));
    assert!(out.contains("  1. def -> black"));
    assert_eq!(node_pairs(&path), [("def".to_string(), "black".to_string())]);
  }

  #[test]
  fn end_of_input_commits_pending_rules() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("firewall_conf.json");

    let (res, _) = run_json(&path, &extended_cfg(), "add abc allow\n");
    assert_eq!(res.unwrap().added, 1);
    assert_eq!(node_pairs(&path), [("abc".to_string(), "allow".to_string())]);
  }

  #[test]
  fn lines_after_exit_are_ignored() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("firewall_conf.json");

    let (res, _) = run_json(&path, &extended_cfg(), "exit\nadd abc allow\n");
    assert_eq!(res.unwrap().added, 0);
    assert!(node_pairs(&path).is_empty());
  }

  #[test]
  fn corrupt_store_is_fatal_and_rules_are_rescued() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("firewall_conf.json");
    fs::write(&path, r#"{"nodes":[]}"#).unwrap();

    let (res, out) = run_json(&path, &extended_cfg(), "add abc black\nexit\n");
    let err = res.unwrap_err();
    assert!(is_store_failure(&err));
    assert!(matches!(
      err.downcast_ref::<FirewallError>(),
      Some(FirewallError::CorruptStore { .. })
    ));

    assert_eq!(fs::read_to_string(&path).unwrap(), r#"{"nodes":[]}"#);
    assert!(out.contains("  add abc black"));

    let rescued: Vec<_> = fs::read_dir(dir.path())
      .unwrap()
      .flatten()
      .filter(|e| e.file_name().to_string_lossy().contains(".rescue-"))
      .collect();
    assert_eq!(rescued.len(), 1);
  }

  #[test]
  fn substring_dispatch_fires_help_and_add_for_one_line() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("firewall_conf.json");
    let cfg = Config {
      dispatch: Dispatch::Substring,
      ..Config::default()
    };

    // `add abc white` with a trailing `help` is four tokens, so only help fires
    // successfully; the add attempt is reported as malformed.
    let (res, out) = run_json(&path, &cfg, "add abc white help\nadd def deny\nexit\n");
    res.unwrap();
    assert_eq!(out.matches("Commands:").count(), 2);
    assert!(out.contains("too many tokens"));
    assert_eq!(node_pairs(&path), [("def".to_string(), "deny".to_string())]);
  }

  #[test]
  fn substring_dispatch_exits_on_embedded_keyword() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("firewall_conf.json");
    let cfg = Config {
      dispatch: Dispatch::Substring,
      ..Config::default()
    };

    let (res, _) = run_json(&path, &cfg, "add abc allow\nplease exit now\nadd def deny\n");
    assert_eq!(res.unwrap().added, 1);
  }

  #[test]
  fn invalid_utf8_line_is_rejected_without_losing_rules() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("firewall_conf.json");
    let cfg = extended_cfg();
    let store = JsonStore::open(&path, cfg.store.indent, cfg.store.atomic_write, false);
    let mut session = Session::new(&cfg, Box::new(store), false);

    let mut out = Vec::new();
    let script = b"add abc white\n\xff\xfe\nadd def black\nexit\n".to_vec();
    let summary = session.run(Cursor::new(script), &mut out).unwrap();

    assert_eq!(summary.added, 2);
    assert_eq!(
      node_pairs(&path),
      [
        ("abc".to_string(), "white".to_string()),
        ("def".to_string(), "black".to_string())
      ]
    );
    assert!(String::from_utf8_lossy(&out).contains("not valid UTF-8"));
  }

  #[test]
  fn unwritable_store_directory_reports_rules_inline() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("missing").join("firewall_conf.json");

    let (res, out) = run_json(&path, &extended_cfg(), "add abc black\nexit\n");
    let err = res.unwrap_err();
    assert!(is_store_failure(&err));
    assert!(matches!(
      err.downcast_ref::<FirewallError>(),
      Some(FirewallError::Io { .. })
    ));
    assert!(out.contains("unable to write rescue file"));
    assert!(out.contains("  add abc black"));
  }

  struct RejectingStore {
    path: std::path::PathBuf,
  }

  impl RuleStore for RejectingStore {
    fn path(&self) -> &Path {
      &self.path
    }

    fn record_add(&mut self, _rule: &Rule) -> crate::error::Result<()> {
      Err(FirewallError::io(&self.path, std::io::Error::other("disk full")))
    }

    fn record_remove(&mut self, _addr: &crate::types::DeviceAddress) -> crate::error::Result<()> {
      Ok(())
    }

    fn commit(&mut self, rules: &[Rule]) -> crate::error::Result<CommitSummary> {
      Ok(CommitSummary {
        existing: 0,
        added: rules.len(),
      })
    }
  }

  #[test]
  fn failed_immediate_write_ends_session_and_rescues_rule() {
    let dir = tempfile::tempdir().unwrap();
    let store = RejectingStore {
      path: dir.path().join("hosts_denied.txt"),
    };
    let mut session = Session::new(&extended_cfg(), Box::new(store), false);

    let mut out = Vec::new();
    let err = session
      .run(Cursor::new("add abc white\nadd def black\nexit\n"), &mut out)
      .unwrap_err();
    let out = String::from_utf8(out).unwrap();

    assert!(is_store_failure(&err));
    assert_eq!(session.state(), SessionState::Terminated);
    assert!(out.contains("disk full"));
    assert!(out.contains("  add abc white"));
    assert!(!out.contains("added: def"));

    let rescued: Vec<_> = fs::read_dir(dir.path())
      .unwrap()
      .flatten()
      .filter(|e| e.file_name().to_string_lossy().contains(".rescue-"))
      .collect();
    assert_eq!(rescued.len(), 1);
  }

  #[test]
  fn simple_mode_writes_each_rule_immediately() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("hosts_denied.txt");
    let cfg = Config {
      mode: Mode::Simple,
      ..Config::default()
    };
    let store = FlatFileStore::open(&path, false).unwrap();
    let mut session = Session::new(&cfg, Box::new(store), false);

    let mut out = Vec::new();
    let summary = session
      .run(
        Cursor::new("add abc input\nadd OUTPUT Def DROP\nadd abc input\nadd abc white\nexit\n"),
        &mut out,
      )
      .unwrap();

    assert_eq!(summary.added, 3);
    assert_eq!(
      fs::read_to_string(&path).unwrap(),
      "add input abc drop\nadd output def drop\nadd input abc drop\n"
    );
  }

  #[test]
  fn unconfigured_gateway_does_not_end_session() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("firewall_conf.json");

    let (res, out) = run_json(&path, &extended_cfg(), "start gw\nadd abc deny\nexit\n");
    assert_eq!(res.unwrap().added, 1);
    assert!(out.contains("gateway start failed"));
  }
}
