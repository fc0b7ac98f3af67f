//! Expiring entries for time-sensitive cached data.

use chrono::{DateTime, TimeDelta, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// A payload paired with an optional expiry instant.
///
/// Stores holding time-sensitive data wrap values in an `ExpiringEntry`
/// before saving and check [`ExpiringEntry::is_expired`] right after reading.
/// An entry with `expires_at == None` never expires.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExpiringEntry<V> {
    pub value: V,
    pub expires_at: Option<DateTime<Utc>>,
}

impl<V> ExpiringEntry<V> {
    /// Entry expiring `ttl` from now. `None` means it never expires.
    ///
    /// A TTL too large to represent is treated as no expiry.
    pub fn new(value: V, ttl: Option<Duration>) -> Self {
        let expires_at = ttl.and_then(|ttl| deadline_after(Utc::now(), ttl));
        Self { value, expires_at }
    }

    /// Entry with an explicit expiry instant.
    pub fn expiring_at(value: V, expires_at: DateTime<Utc>) -> Self {
        Self {
            value,
            expires_at: Some(expires_at),
        }
    }

    /// Entry that never expires.
    pub fn permanent(value: V) -> Self {
        Self {
            value,
            expires_at: None,
        }
    }

    /// Expired once `now` reaches the expiry instant, so a zero TTL is
    /// already expired on the next read.
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_some_and(|at| now >= at)
    }

    pub fn is_expired(&self) -> bool {
        self.is_expired_at(Utc::now())
    }

    /// Time left before expiry. `None` for permanent entries, zero once
    /// expired.
    pub fn remaining_at(&self, now: DateTime<Utc>) -> Option<Duration> {
        self.expires_at.map(|at| {
            at.signed_duration_since(now)
                .to_std()
                .unwrap_or(Duration::ZERO)
        })
    }

    pub fn value(&self) -> &V {
        &self.value
    }

    pub fn into_value(self) -> V {
        self.value
    }
}

fn deadline_after(now: DateTime<Utc>, ttl: Duration) -> Option<DateTime<Utc>> {
    let delta = TimeDelta::from_std(ttl).ok()?;
    now.checked_add_signed(delta)
}
