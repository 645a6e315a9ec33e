//! Response envelopes of the case-management API.
//!
//! The API is not consistent about how it wraps lists: some endpoints return
//! a bare array, others `{data: [...]}` or `{items: [...]}`, with the total
//! under `totalCount`, `total` or `count` when present at all. Responses are
//! decoded into an [`Envelope`] once, and everything downstream works with the
//! normalized [`Page`].

use serde_json::{Map, Value};

/// Field names probed, in order, for the upstream-reported total.
const TOTAL_FIELDS: [&str; 3] = ["totalCount", "total", "count"];

/// The wrapper shape a list response arrived in.
#[derive(Debug, Clone, PartialEq)]
pub enum Envelope {
  /// `[...]`
  BareList(Vec<Value>),
  /// `{"data": [...], "totalCount"?: n}`
  DataWrapped { items: Vec<Value>, total: Option<u64> },
  /// `{"items": [...], "totalCount"?: n}`
  ItemsWrapped { items: Vec<Value>, total: Option<u64> },
  /// Anything else: error objects, `null`, scalars
  Unrecognized,
}

/// A normalized page of results.
#[derive(Debug, Clone, PartialEq)]
pub struct Page {
  pub items: Vec<Value>,
  pub total_count: u64,
}

impl Envelope {
  /// Classify a decoded response body. Never fails.
  pub fn decode(value: Value) -> Self {
    match value {
      Value::Array(items) => Self::BareList(items),
      Value::Object(mut map) => {
        let total = reported_total(&map);
        if let Some(Value::Array(items)) = take_list(&mut map, "data") {
          return Self::DataWrapped { items, total };
        }
        if let Some(Value::Array(items)) = take_list(&mut map, "items") {
          return Self::ItemsWrapped { items, total };
        }
        Self::Unrecognized
      }
      _ => Self::Unrecognized,
    }
  }

  /// The total the upstream reported alongside the list, if any.
  pub fn reported_total(&self) -> Option<u64> {
    match self {
      Self::DataWrapped { total, .. } | Self::ItemsWrapped { total, .. } => *total,
      Self::BareList(_) | Self::Unrecognized => None,
    }
  }

  /// Reduce to `(items, total_count)`.
  ///
  /// Recognized shapes without a reported total use the list length;
  /// unrecognized ones give no items and `fallback_total`.
  pub fn into_page(self, fallback_total: u64) -> Page {
    match self {
      Self::BareList(items) => {
        let total_count = items.len() as u64;
        Page { items, total_count }
      }
      Self::DataWrapped { items, total } | Self::ItemsWrapped { items, total } => {
        let total_count = total.unwrap_or(items.len() as u64);
        Page { items, total_count }
      }
      Self::Unrecognized => Page {
        items: Vec::new(),
        total_count: fallback_total,
      },
    }
  }
}

/// Normalize any decoded response body into a [`Page`].
pub fn normalize(value: Value, fallback_total: u64) -> Page {
  Envelope::decode(value).into_page(fallback_total)
}

fn take_list(map: &mut Map<String, Value>, field: &str) -> Option<Value> {
  match map.get(field) {
    Some(Value::Array(_)) => map.remove(field),
    _ => None,
  }
}

fn reported_total(map: &Map<String, Value>) -> Option<u64> {
  TOTAL_FIELDS
    .iter()
    .filter_map(|field| map.get(*field))
    .find_map(as_count)
}

fn as_count(value: &Value) -> Option<u64> {
  match value {
    Value::Number(n) => n
      .as_u64()
      .or_else(|| n.as_f64().filter(|f| *f >= 0.0).map(|f| f as u64)),
    Value::String(s) => s.trim().parse().ok(),
    _ => None,
  }
}
