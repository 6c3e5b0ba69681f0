//! Delivery-id deduplication with a TTL.
//!
//! GitHub redelivers webhooks on its own schedule; a delivery id that was
//! already processed must be dropped. Ids are held for a bounded window so
//! the set cannot grow without limit. Check and mark are separate steps:
//! a delivery is only marked once it has actually been processed, so a crash
//! between the two re-processes rather than silently drops.

use crate::domain::types::TimestampUtc;
use chrono::Duration;
use std::collections::HashMap;
use std::sync::Mutex;

/// In-memory log of processed delivery ids.
pub struct DeliveryLog {
    ttl: Duration,
    seen: Mutex<HashMap<String, TimestampUtc>>,
}

impl DeliveryLog {
    /// Creates a log that remembers ids for `ttl_hours`.
    pub fn new(ttl_hours: i64) -> Self {
        Self {
            ttl: Duration::hours(ttl_hours),
            seen: Mutex::new(HashMap::new()),
        }
    }

    /// True when this delivery id was processed within the TTL window.
    pub fn contains(&self, delivery_id: &str, now: TimestampUtc) -> bool {
        let guard = match self.seen.lock() {
            Ok(g) => g,
            Err(poisoned) => poisoned.into_inner(),
        };
        guard
            .get(delivery_id)
            .map(|seen_at| now.0.signed_duration_since(seen_at.0) < self.ttl)
            .unwrap_or(false)
    }

    /// Records a processed delivery id and prunes expired entries.
    pub fn mark(&self, delivery_id: &str, now: TimestampUtc) {
        let mut guard = match self.seen.lock() {
            Ok(g) => g,
            Err(poisoned) => poisoned.into_inner(),
        };
        guard.retain(|_, seen_at| now.0.signed_duration_since(seen_at.0) < self.ttl);
        guard.insert(delivery_id.to_string(), now);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    fn at(hours: i64) -> TimestampUtc {
        TimestampUtc(
            Utc.timestamp_opt(1_700_000_000 + hours * 3600, 0)
                .single()
                .expect("valid timestamp"),
        )
    }

    #[test]
    fn unseen_id_is_not_contained() {
        let log = DeliveryLog::new(24);
        assert!(!log.contains("d-1", at(0)));
    }

    #[test]
    fn marked_id_is_contained_within_ttl() {
        let log = DeliveryLog::new(24);
        log.mark("d-1", at(0));
        assert!(log.contains("d-1", at(1)));
        assert!(log.contains("d-1", at(23)));
    }

    #[test]
    fn id_expires_after_ttl() {
        let log = DeliveryLog::new(24);
        log.mark("d-1", at(0));
        assert!(!log.contains("d-1", at(25)));
    }

    #[test]
    fn marking_prunes_expired_entries() {
        let log = DeliveryLog::new(24);
        log.mark("d-1", at(0));
        log.mark("d-2", at(30));
        assert!(!log.contains("d-1", at(30)));
        assert!(log.contains("d-2", at(31)));
    }
}
