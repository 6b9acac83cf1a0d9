use chrono::{DateTime, Duration as ChronoDuration, Utc};
use dashmap::DashMap;
use std::time::{Duration, Instant};
use crate::calibration::types::{CalibrationData, CalibrationFilters, UserCalibrationData};

/// Cached calibration payloads.
#[derive(Debug, Clone, PartialEq)]
pub enum CachedCalibration {
    Global(CalibrationData),
    ByUser(Vec<UserCalibrationData>),
}

pub struct CalibrationCache {
    cache: DashMap<String, CachedEntry>,
    ttl: Duration,
}

struct CachedEntry {
    value: CachedCalibration,
    timestamp: Instant,
}

impl CalibrationCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            cache: DashMap::new(),
            ttl,
        }
    }

    pub fn insert(&self, key: String, value: CachedCalibration) {
        self.cache.insert(key, CachedEntry {
            value,
            timestamp: Instant::now(),
        });
    }

    /// Get entry if not expired (evict on read)
    pub fn get(&self, key: &str) -> Option<CachedCalibration> {
        let entry = self.cache.get(key)?;
        if entry.timestamp.elapsed() > self.ttl {
            drop(entry); // Drop the read lock
            self.cache.remove(key);
            None
        } else {
            Some(entry.value.clone())
        }
    }

    /// Drop every key starting with `prefix`
    pub fn invalidate_prefix(&self, prefix: &str) {
        self.cache.retain(|key, _| !key.starts_with(prefix));
    }

    pub fn clear(&self) {
        self.cache.clear();
    }

    pub fn len(&self) -> usize {
        self.cache.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cache.is_empty()
    }
}

/// Cache-key suffix for a date range, or `None` if results over that
/// range can still change. Only an absent range or one bounded on both
/// sides by instants already more than a day in the past qualifies.
pub fn cacheable_range_key(
    start: Option<DateTime<Utc>>,
    end: Option<DateTime<Utc>>,
    now: DateTime<Utc>,
) -> Option<String> {
    match (start, end) {
        (None, None) => Some("all_time".to_string()),
        (Some(start), Some(end)) if end < now - ChronoDuration::days(1) && start <= end => {
            Some(format!("{}..{}", start.timestamp(), end.timestamp()))
        }
        _ => None,
    }
}

/// `prefix[:user:<id>][:category:<c>]:<range>`
pub fn build_cache_key(prefix: &str, filters: &CalibrationFilters, range_key: &str) -> String {
    let mut key = prefix.to_string();

    if let Some(user_id) = filters.user_id {
        key = format!("{}:user:{}", key, user_id);
    }
    if let Some(category) = &filters.category {
        key = format!("{}:category:{}", key, category.to_lowercase());
    }

    format!("{}:{}", key, range_key)
}
