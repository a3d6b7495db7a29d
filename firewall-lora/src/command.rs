use crate::error::{FirewallError, Result};
use crate::gateway::GatewayAction;
use crate::types::{Chain, DeviceAddress, Mode, Rule};
use serde::Deserialize;

/// How an input line is mapped to commands.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Dispatch {
  /// The first token alone decides the command kind.
  #[default]
  FirstToken,
  /// Legacy matching: every keyword among `help`, `add`, `exit` found anywhere
  /// in the line fires, in that order.
  Substring,
}

impl Dispatch {
  pub fn parse(s: &str) -> Option<Self> {
    match s.trim().to_ascii_lowercase().as_str() {
      "first_token" | "first-token" => Some(Self::FirstToken),
      "substring" | "legacy" => Some(Self::Substring),
      _ => None,
    }
  }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
  Help,
  Add(Rule),
  Remove(DeviceAddress),
  List,
  Gateway(GatewayAction),
  Exit,
  Unrecognized(String),
}

#[derive(Debug, Clone, Copy)]
pub struct Parser {
  mode: Mode,
  dispatch: Dispatch,
}

impl Parser {
  pub fn new(mode: Mode, dispatch: Dispatch) -> Self {
    Self { mode, dispatch }
  }

  pub fn mode(&self) -> Mode {
    self.mode
  }

  /// Classifies one operator line. Blank lines yield nothing; a line that
  /// matches no keyword yields a single `Unrecognized`.
  pub fn parse(&self, raw: &str) -> Vec<Result<Command>> {
    let line = raw.trim().to_lowercase();
    if line.is_empty() {
      return Vec::new();
    }

    match self.dispatch {
      Dispatch::FirstToken => vec![self.classify_first_token(&line)],
      Dispatch::Substring => self.classify_substring(&line),
    }
  }

  fn classify_first_token(&self, line: &str) -> Result<Command> {
    let tokens: Vec<&str> = line.split_whitespace().collect();
    let Some(first) = tokens.first() else {
      return Ok(Command::Unrecognized(line.to_string()));
    };

    match *first {
      "help" => Ok(Command::Help),
      "add" => self.parse_add(line, &tokens).map(Command::Add),
      "remove" => match tokens.as_slice() {
        [_, addr] => DeviceAddress::new(addr)
          .map(Command::Remove)
          .ok_or_else(|| FirewallError::malformed(line, "empty device address")),
        _ => Err(FirewallError::malformed(
          line,
          "expected `remove <deviceAddress>`",
        )),
      },
      "list" => Ok(Command::List),
      "exit" => Ok(Command::Exit),
      word => match GatewayAction::parse(word) {
        Some(action) => match tokens.as_slice() {
          [_, "gw" | "gateway"] => Ok(Command::Gateway(action)),
          _ => Err(FirewallError::malformed(
            line,
            format!("expected `{word} gw`"),
          )),
        },
        None => Ok(Command::Unrecognized(line.to_string())),
      },
    }
  }

  fn classify_substring(&self, line: &str) -> Vec<Result<Command>> {
    let mut out = Vec::new();

    if line.contains("help") {
      out.push(Ok(Command::Help));
    }
    if line.contains("add") {
      let tokens: Vec<&str> = line.split_whitespace().collect();
      out.push(self.parse_add(line, &tokens).map(Command::Add));
    }
    if line.contains("exit") {
      out.push(Ok(Command::Exit));
    }

    if out.is_empty() {
      out.push(Ok(Command::Unrecognized(line.to_string())));
    }
    out
  }

  // Tokens are positional: [command-word, deviceAddress, tag]. Simple mode also
  // takes the legacy phrase `add <INPUT|OUTPUT> <deviceAddress> DROP`.
  fn parse_add(&self, line: &str, tokens: &[&str]) -> Result<Rule> {
    match (self.mode, tokens) {
      (Mode::Simple, [_, chain @ ("input" | "output"), addr, verdict]) => {
        if *verdict != "drop" {
          return Err(FirewallError::malformed(
            line,
            "only DROP rules can be recorded in simple mode",
          ));
        }
        let chain = if *chain == "input" {
          Chain::Input
        } else {
          Chain::Output
        };
        let addr = DeviceAddress::new(addr)
          .ok_or_else(|| FirewallError::malformed(line, "empty device address"))?;
        Ok(Rule::drop_on(addr, chain))
      }
      (mode, [_, addr, tag]) => {
        let addr = DeviceAddress::new(addr)
          .ok_or_else(|| FirewallError::malformed(line, "empty device address"))?;
        Rule::from_tag(mode, addr, tag).ok_or_else(|| {
          FirewallError::malformed(
            line,
            format!(
              "unknown tag `{tag}`; expected one of {}",
              mode.tags().join("|")
            ),
          )
        })
      }
      (_, tokens) if tokens.len() < 3 => Err(FirewallError::malformed(
        line,
        "expected `add <deviceAddress> <tag>`",
      )),
      _ => Err(FirewallError::malformed(
        line,
        "too many tokens; expected `add <deviceAddress> <tag>`",
      )),
    }
  }
}
