pub mod command;
pub mod config;
pub mod console;
pub mod error;
pub mod gateway;
pub mod logging;
pub mod paths;
pub mod registry;
pub mod session;
pub mod store;
pub mod types;

use anyhow::Context;

pub fn run_console(args: &[String]) -> anyhow::Result<()> {
  let opts = match console::parse_args(args)? {
    console::ConsoleAction::ExitOk => return Ok(()),
    console::ConsoleAction::RunSession(opts) => opts,
  };

  let base = paths::base_dir();
  let config_path = opts
    .config
    .clone()
    .unwrap_or_else(|| paths::config_path(&base));
  let mut cfg = config::load_or_default(&config_path)
    .with_context(|| format!("load config {}", config_path.display()))?;
  console::apply_overrides(&mut cfg, &opts);
  let cwd = std::env::current_dir().context("resolve working directory")?;
  cfg.store.resolve_relative(&cwd);

  let log_dir = cfg
    .logging
    .dir
    .clone()
    .unwrap_or_else(|| paths::logs_dir(&base));
  if let Err(e) = logging::init(
    &log_dir,
    &cfg.logging.level,
    cfg.logging.retention_days,
    cfg.logging.stderr,
  ) {
    eprintln!(
      "firewall-lora: file logging unavailable at {} ({e}); warnings go to stderr",
      log_dir.display()
    );
    logging::init_stderr_only("warn");
  }

  let session_id = uuid::Uuid::new_v4();
  let span = tracing::info_span!("session", %session_id, mode = ?cfg.mode, dispatch = ?cfg.dispatch);
  let _enter = span.enter();
  tracing::info!(dry_run = opts.dry_run, "session starting");

  let store = store::open_store(cfg.mode, &cfg.store, opts.dry_run).context("open rule store")?;
  let mut session = session::Session::new(&cfg, store, opts.dry_run);

  let stdin = std::io::stdin();
  let mut stdout = std::io::stdout();
  if let Err(e) = session.run(stdin.lock(), &mut stdout) {
    if session::is_store_failure(&e) {
      eprintln!("firewall-lora: the rule store could not be updated; unsaved commands are listed above");
    }
    return Err(e);
  }

  tracing::info!("session ended");
  Ok(())
}
