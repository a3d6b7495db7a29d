use crate::command::Dispatch;
use crate::config::Config;
use crate::types::Mode;
use std::path::PathBuf;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConsoleOptions {
  pub dry_run: bool,
  pub mode: Option<Mode>,
  pub dispatch: Option<Dispatch>,
  pub store: Option<PathBuf>,
  pub config: Option<PathBuf>,
}

#[derive(Debug, PartialEq, Eq)]
pub enum ConsoleAction {
  RunSession(ConsoleOptions),
  ExitOk,
}

pub fn parse_args(args: &[String]) -> anyhow::Result<ConsoleAction> {
  // args[0] is the program name.
  let args = args.get(1..).unwrap_or_default();

  if args.iter().any(|a| a == "--help" || a == "-h") {
    print_usage();
    return Ok(ConsoleAction::ExitOk);
  }

  let mut opts = ConsoleOptions::default();
  let mut i = 0;
  while i < args.len() {
    match args[i].as_str() {
      "--dry-run" => opts.dry_run = true,
      "--mode" => {
        let val = flag_value(args, i)?;
        opts.mode = Some(
          Mode::parse(val)
            .ok_or_else(|| anyhow::anyhow!("expected `simple` or `extended` for `--mode`, got `{val}`"))?,
        );
        i += 1;
      }
      "--dispatch" => {
        let val = flag_value(args, i)?;
        opts.dispatch = Some(Dispatch::parse(val).ok_or_else(|| {
          anyhow::anyhow!("expected `first_token` or `substring` for `--dispatch`, got `{val}`")
        })?);
        i += 1;
      }
      "--store" => {
        opts.store = Some(PathBuf::from(flag_value(args, i)?));
        i += 1;
      }
      "--config" => {
        opts.config = Some(PathBuf::from(flag_value(args, i)?));
        i += 1;
      }
      other => {
        eprintln!("Unknown argument `{other}`.");
        print_usage();
        anyhow::bail!("unknown argument `{other}`");
      }
    }
    i += 1;
  }

  Ok(ConsoleAction::RunSession(opts))
}

/// Command-line flags win over the config file.
pub fn apply_overrides(cfg: &mut Config, opts: &ConsoleOptions) {
  if let Some(mode) = opts.mode {
    cfg.mode = mode;
  }
  if let Some(dispatch) = opts.dispatch {
    cfg.dispatch = dispatch;
  }
  if let Some(store) = &opts.store {
    cfg.store.set_path_for(cfg.mode, store.clone());
  }
}

fn flag_value(args: &[String], i: usize) -> anyhow::Result<&str> {
  args
    .get(i + 1)
    .map(|s| s.as_str())
    .filter(|s| !s.starts_with("--"))
    .ok_or_else(|| anyhow::anyhow!("expected a value after `{}`", args[i]))
}

fn print_usage() {
  println!("firewall-lora v{}", env!("CARGO_PKG_VERSION"));
  println!("Interactive rule editor for LoRaWAN gateway firewalls.");
  println!("Options:");
  println!("  --dry-run                         log store writes and gateway commands without running them");
  println!("  --mode simple|extended            flat deny list or JSON rule store");
  println!("  --dispatch first_token|substring  command matching (substring = legacy)");
  println!("  --store <path>                    rule store path for the active mode");
  println!("  --config <path>                   config file (default: $FIREWALL_LORA_HOME/config.toml)");
  println!("  --version");
}
