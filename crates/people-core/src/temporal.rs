//! Validity windows and time-stamped attribute observations.

use chrono::{DateTime, Datelike, TimeZone, Utc};
use serde::{Deserialize, Serialize};

/// Years from this one onward are treated as "no end".
const END_OF_TIME_YEAR: i32 = 9999;

/// The earliest representable instant, used for values valid "since forever".
pub fn beginning_of_time() -> DateTime<Utc> {
  Utc
    .with_ymd_and_hms(0, 1, 1, 0, 0, 0)
    .single()
    .unwrap_or(DateTime::<Utc>::MIN_UTC)
}

/// Collapse far-future sentinels (year >= 9999) to an open end.
pub fn normalize_end_of_time(
  end: Option<DateTime<Utc>>,
) -> Option<DateTime<Utc>> {
  end.filter(|t| t.year() < END_OF_TIME_YEAR)
}

// ─── ValidityWindow ──────────────────────────────────────────────────────────

/// A half-open interval `(start, end)`. `end = None` is open-ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidityWindow {
  pub start: DateTime<Utc>,
  pub end:   Option<DateTime<Utc>>,
}

impl ValidityWindow {
  pub fn new(start: DateTime<Utc>, end: Option<DateTime<Utc>>) -> Self {
    Self { start, end: normalize_end_of_time(end) }
  }

  /// Open-ended window starting at the beginning of time.
  pub fn always() -> Self { Self::new(beginning_of_time(), None) }

  /// Strictly after `start`, and strictly before `end` when one is set.
  pub fn valid_at(&self, now: DateTime<Utc>) -> bool {
    self.start < now && self.end.is_none_or(|end| end > now)
  }
}

// ─── AttributeObservation ────────────────────────────────────────────────────

/// One `{name, value}` pair as seen by a time-stamped source.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttributeObservation {
  pub name:   String,
  pub value:  String,
  #[serde(flatten)]
  pub window: ValidityWindow,
}

impl AttributeObservation {
  pub fn new(
    name: impl Into<String>,
    value: impl Into<String>,
    window: ValidityWindow,
  ) -> Self {
    Self { name: name.into(), value: value.into(), window }
  }

  pub fn valid_at(&self, now: DateTime<Utc>) -> bool {
    self.window.valid_at(now)
  }
}
