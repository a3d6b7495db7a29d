use crate::types::{DeviceAddress, Rule};

/// Rules declared during one session, in entry order. Duplicates are kept.
#[derive(Debug, Default)]
pub struct RuleRegistry {
  rules: Vec<Rule>,
}

impl RuleRegistry {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn add(&mut self, rule: Rule) {
    self.rules.push(rule);
  }

  /// Drops every pending rule for `addr`, returning how many were removed.
  pub fn remove(&mut self, addr: &DeviceAddress) -> usize {
    let before = self.rules.len();
    self.rules.retain(|r| &r.addr != addr);
    before - self.rules.len()
  }

  pub fn snapshot(&self) -> &[Rule] {
    &self.rules
  }

  pub fn len(&self) -> usize {
    self.rules.len()
  }

  pub fn is_empty(&self) -> bool {
    self.rules.is_empty()
  }

  /// Hands the accumulated rules off for persistence, leaving the registry empty.
  pub fn drain(&mut self) -> Vec<Rule> {
    std::mem::take(&mut self.rules)
  }
}
