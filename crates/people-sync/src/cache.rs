//! Bounded, time-expiring lookup cache for organization codes.
//!
//! Owned by a single sweep; no locking. Negative results are cached like
//! positive ones so an unknown code costs one store lookup per TTL.

use std::{
  collections::HashMap,
  time::{Duration, Instant},
};

use uuid::Uuid;

pub const DEFAULT_TTL: Duration = Duration::from_secs(10 * 60);
pub const DEFAULT_CAPACITY: usize = 5_000;

/// What is known about a code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resolution {
  Resolved(Uuid),
  Unresolved,
}

impl Resolution {
  pub fn id(self) -> Option<Uuid> {
    match self {
      Resolution::Resolved(id) => Some(id),
      Resolution::Unresolved => None,
    }
  }
}

impl From<Option<Uuid>> for Resolution {
  fn from(id: Option<Uuid>) -> Self {
    id.map_or(Resolution::Unresolved, Resolution::Resolved)
  }
}

#[derive(Debug, Clone, Copy)]
struct Slot {
  resolution: Resolution,
  stored_at:  Instant,
}

#[derive(Debug)]
pub struct OrganizationCache {
  ttl:      Duration,
  capacity: usize,
  slots:    HashMap<String, Slot>,
}

impl Default for OrganizationCache {
  fn default() -> Self { Self::new(DEFAULT_TTL, DEFAULT_CAPACITY) }
}

impl OrganizationCache {
  pub fn new(ttl: Duration, capacity: usize) -> Self {
    Self { ttl, capacity: capacity.max(1), slots: HashMap::new() }
  }

  /// `None` on a miss or when the entry has expired.
  pub fn get(&mut self, code: &str, now: Instant) -> Option<Resolution> {
    let slot = self.slots.get(code)?;
    if self.is_expired(slot, now) {
      self.slots.remove(code);
      return None;
    }
    Some(slot.resolution)
  }

  pub fn insert(&mut self, code: &str, resolution: Resolution, now: Instant) {
    if !self.slots.contains_key(code) && self.slots.len() >= self.capacity {
      self.evict(now);
    }
    self
      .slots
      .insert(code.to_string(), Slot { resolution, stored_at: now });
  }

  pub fn len(&self) -> usize { self.slots.len() }

  pub fn is_empty(&self) -> bool { self.slots.is_empty() }

  fn is_expired(&self, slot: &Slot, now: Instant) -> bool {
    now.saturating_duration_since(slot.stored_at) >= self.ttl
  }

  /// Drop expired entries; if none were, drop the oldest one.
  fn evict(&mut self, now: Instant) {
    let ttl = self.ttl;
    self
      .slots
      .retain(|_, slot| now.saturating_duration_since(slot.stored_at) < ttl);
    if self.slots.len() < self.capacity {
      return;
    }
    let oldest = self
      .slots
      .iter()
      .min_by_key(|(_, slot)| slot.stored_at)
      .map(|(code, _)| code.clone());
    if let Some(code) = oldest {
      self.slots.remove(&code);
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  const TTL: Duration = Duration::from_secs(60);

  #[test]
  fn caches_positive_and_negative_results() {
    let now = Instant::now();
    let id = Uuid::new_v4();
    let mut cache = OrganizationCache::new(TTL, 10);

    assert_eq!(cache.get("WE03", now), None);
    cache.insert("WE03", Resolution::Resolved(id), now);
    cache.insert("XX99", Resolution::Unresolved, now);

    assert_eq!(cache.get("WE03", now).and_then(Resolution::id), Some(id));
    assert_eq!(cache.get("XX99", now), Some(Resolution::Unresolved));
  }

  #[test]
  fn entries_expire_after_ttl() {
    let now = Instant::now();
    let mut cache = OrganizationCache::new(TTL, 10);
    cache.insert("WE03", Resolution::Unresolved, now);

    assert!(cache.get("WE03", now + TTL - Duration::from_secs(1)).is_some());
    assert!(cache.get("WE03", now + TTL).is_none());
    assert!(cache.is_empty());
  }

  #[test]
  fn capacity_evicts_expired_then_oldest() {
    let start = Instant::now();
    let mut cache = OrganizationCache::new(TTL, 2);
    cache.insert("A", Resolution::Unresolved, start);
    cache.insert("B", Resolution::Unresolved, start + Duration::from_secs(10));
    cache.insert("C", Resolution::Unresolved, start + Duration::from_secs(20));

    assert_eq!(cache.len(), 2);
    let later = start + Duration::from_secs(30);
    assert!(cache.get("A", later).is_none());
    assert!(cache.get("B", later).is_some());

    // B has expired by now and goes first, so C survives
    let much_later = start + Duration::from_secs(75);
    cache.insert("D", Resolution::Unresolved, much_later);
    assert!(cache.get("B", much_later).is_none());
    assert!(cache.get("C", much_later).is_some());
    assert!(cache.get("D", much_later).is_some());
  }
}
