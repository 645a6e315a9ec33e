//! Cache keys for case-management resources.

use std::fmt;

/// Named resources mirrored from the case-management API.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum ResourceKey {
  /// Every page of the lawsuit list
  LawsuitsFull,
  /// Only the first page of the lawsuit list
  LawsuitsFirstPage,
  /// Every movement recorded on one lawsuit
  Movements { lawsuit_id: String },
}

impl ResourceKey {
  /// Stable key under which the resource is cached and its progress tracked.
  pub fn cache_key(&self) -> String {
    match self {
      Self::LawsuitsFull => "lawsuits-full".to_string(),
      Self::LawsuitsFirstPage => "lawsuits-first-page".to_string(),
      Self::Movements { lawsuit_id } => format!("movements:{}", lawsuit_id.trim()),
    }
  }

  pub fn description(&self) -> String {
    match self {
      Self::LawsuitsFull => "all lawsuits".to_string(),
      Self::LawsuitsFirstPage => "first page of lawsuits".to_string(),
      Self::Movements { lawsuit_id } => format!("movements of lawsuit {}", lawsuit_id.trim()),
    }
  }
}

impl fmt::Display for ResourceKey {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(&self.cache_key())
  }
}
