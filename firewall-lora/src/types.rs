use serde::Deserialize;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
  /// Flat deny-list file, one `add <chain> <addr> drop` line per rule.
  Simple,
  /// JSON document with `firewall_conf.nodes`.
  Extended,
}

impl Mode {
  pub fn parse(s: &str) -> Option<Self> {
    match s.trim().to_ascii_lowercase().as_str() {
      "simple" | "flat" => Some(Self::Simple),
      "extended" | "json" => Some(Self::Extended),
      _ => None,
    }
  }

  pub fn tags(self) -> &'static [&'static str] {
    match self {
      Mode::Simple => &["input", "output"],
      Mode::Extended => &["white", "black", "allow", "deny"],
    }
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Bucket {
  White,
  Black,
  Allow,
  Deny,
}

impl Bucket {
  pub fn as_str(self) -> &'static str {
    match self {
      Bucket::White => "white",
      Bucket::Black => "black",
      Bucket::Allow => "allow",
      Bucket::Deny => "deny",
    }
  }
}

impl fmt::Display for Bucket {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.as_str())
  }
}

/// Packet direction a simple-mode DROP rule applies to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Chain {
  Input,
  Output,
}

impl Chain {
  pub fn as_str(self) -> &'static str {
    match self {
      Chain::Input => "input",
      Chain::Output => "output",
    }
  }
}

impl fmt::Display for Chain {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.as_str())
  }
}

/// Lowercased, non-empty LoRaWAN device address token.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DeviceAddress(String);

impl DeviceAddress {
  pub fn new(raw: &str) -> Option<Self> {
    let addr = raw.trim().to_lowercase();
    if addr.is_empty() {
      return None;
    }
    Some(Self(addr))
  }

  pub fn as_str(&self) -> &str {
    &self.0
  }
}

impl fmt::Display for DeviceAddress {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(&self.0)
  }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Rule {
  pub addr: DeviceAddress,
  pub bucket: Bucket,
  /// Set only for simple-mode DROP rules.
  pub chain: Option<Chain>,
}

impl Rule {
  pub fn new(addr: DeviceAddress, bucket: Bucket) -> Self {
    Self {
      addr,
      bucket,
      chain: None,
    }
  }

  pub fn drop_on(addr: DeviceAddress, chain: Chain) -> Self {
    Self {
      addr,
      bucket: Bucket::Deny,
      chain: Some(chain),
    }
  }

  /// Resolves a tag against the active mode's bucket set.
  pub fn from_tag(mode: Mode, addr: DeviceAddress, tag: &str) -> Option<Self> {
    match (mode, tag) {
      (Mode::Simple, "input") => Some(Self::drop_on(addr, Chain::Input)),
      (Mode::Simple, "output") => Some(Self::drop_on(addr, Chain::Output)),
      (Mode::Extended, "white") => Some(Self::new(addr, Bucket::White)),
      (Mode::Extended, "black") => Some(Self::new(addr, Bucket::Black)),
      (Mode::Extended, "allow") => Some(Self::new(addr, Bucket::Allow)),
      (Mode::Extended, "deny") => Some(Self::new(addr, Bucket::Deny)),
      _ => None,
    }
  }
}

impl fmt::Display for Rule {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self.chain {
      Some(chain) => write!(f, "{} drop on {}", self.addr, chain),
      None => write!(f, "{} -> {}", self.addr, self.bucket),
    }
  }
}

pub fn now_unix_s() -> u64 {
  use std::time::{SystemTime, UNIX_EPOCH};
  SystemTime::now()
    .duration_since(UNIX_EPOCH)
    .unwrap_or_default()
    .as_secs()
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn device_address_is_lowercased_and_non_empty() {
    assert_eq!(DeviceAddress::new(" AbC123 ").unwrap().as_str(), "abc123");
    assert!(DeviceAddress::new("   ").is_none());
  }

  #[test]
  fn tags_are_scoped_to_mode() {
    let addr = DeviceAddress::new("abc").unwrap();
    assert!(Rule::from_tag(Mode::Extended, addr.clone(), "input").is_none());
    assert!(Rule::from_tag(Mode::Simple, addr.clone(), "white").is_none());
    assert!(Rule::from_tag(Mode::Extended, addr.clone(), "purple").is_none());

    let r = Rule::from_tag(Mode::Simple, addr, "output").unwrap();
    assert_eq!(r.bucket, Bucket::Deny);
    assert_eq!(r.chain, Some(Chain::Output));
  }
}
