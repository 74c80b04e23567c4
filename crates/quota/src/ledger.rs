use std::sync::Arc;

use {
    chrono::{Datelike, Timelike},
    dashmap::{DashMap, mapref::entry::Entry},
    parley_common::clock::Clock,
    serde::{Deserialize, Serialize},
    tracing::debug,
};

/// Identity used when no identity-specific limit exists.
pub const DEFAULT_ID: &str = "default";

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct QuotaKey {
    category: String,
    id: String,
}

impl QuotaKey {
    fn new(category: &str, id: &str) -> Self {
        Self {
            category: category.to_string(),
            id: id.to_string(),
        }
    }
}

/// Usage counted within one hour window.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Usage {
    pub category: String,
    pub id: String,
    pub count: u32,
    /// Hour of day (0-23) the window was opened in.
    pub hour: u32,
    /// Day of month (1-31) the window was opened in.
    pub day: u32,
}

/// Allowed requests per hour. `rate == 0` disables the category for the identity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Limit {
    pub category: String,
    pub id: String,
    pub rate: u32,
}

/// Limit and usage storage for one quota axis.
pub struct QuotaLedger {
    limits: DashMap<QuotaKey, u32>,
    usage: DashMap<QuotaKey, Usage>,
    clock: Arc<dyn Clock>,
}

impl QuotaLedger {
    #[must_use]
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            limits: DashMap::new(),
            usage: DashMap::new(),
            clock,
        }
    }

    /// Insert or replace the limit for (category, id).
    pub fn set_limit(&self, category: &str, id: &str, rate: u32) {
        debug!(category, id, rate, "quota limit updated");
        self.limits.insert(QuotaKey::new(category, id), rate);
    }

    /// All limits, sorted by category then id.
    #[must_use]
    pub fn list_limits(&self) -> Vec<Limit> {
        let mut limits: Vec<Limit> = self
            .limits
            .iter()
            .map(|entry| Limit {
                category: entry.key().category.clone(),
                id: entry.key().id.clone(),
                rate: *entry.value(),
            })
            .collect();
        limits.sort_by(|a, b| (&a.category, &a.id).cmp(&(&b.category, &b.id)));
        limits
    }

    /// Identity-specific limit, falling back to the category's `default` record.
    #[must_use]
    pub fn get_limit(&self, category: &str, id: &str) -> Option<Limit> {
        let lookup = |id: &str| {
            self.limits
                .get(&QuotaKey::new(category, id))
                .map(|rate| Limit {
                    category: category.to_string(),
                    id: id.to_string(),
                    rate: *rate,
                })
        };
        lookup(id).or_else(|| {
            if id == DEFAULT_ID {
                None
            } else {
                lookup(DEFAULT_ID)
            }
        })
    }

    /// Usage for the current window, opening a fresh one if the stored record expired.
    #[must_use]
    pub fn get_usage(&self, category: &str, id: &str) -> Usage {
        self.with_current(category, id, |usage| usage.clone())
    }

    /// Count one more request in the current window and return the updated usage.
    pub fn increment_usage(&self, category: &str, id: &str) -> Usage {
        self.with_current(category, id, |usage| {
            usage.count += 1;
            usage.clone()
        })
    }

    /// `0.0` when unlimited, `1.0` when disabled, otherwise `count / rate`.
    #[must_use]
    pub fn check_exceed(&self, category: &str, id: &str) -> f64 {
        let Some(limit) = self.get_limit(category, id) else {
            return 0.0;
        };
        if limit.rate == 0 {
            return 1.0;
        }
        let usage = self.get_usage(category, id);
        f64::from(usage.count) / f64::from(limit.rate)
    }

    fn with_current<T>(&self, category: &str, id: &str, f: impl FnOnce(&mut Usage) -> T) -> T {
        let now = self.clock.now();
        let (hour, day) = (now.hour(), now.day());
        let fresh = || Usage {
            category: category.to_string(),
            id: id.to_string(),
            count: 0,
            hour,
            day,
        };

        match self.usage.entry(QuotaKey::new(category, id)) {
            Entry::Occupied(mut occupied) => {
                let usage = occupied.get_mut();
                let hour_changed = usage.hour != hour;
                let same_hour_other_day = usage.hour == hour && usage.day != day;
                if hour_changed || same_hour_other_day {
                    debug!(category, id, count = usage.count, "quota window expired");
                    *usage = fresh();
                }
                f(usage)
            },
            Entry::Vacant(vacant) => f(vacant.insert(fresh()).value_mut()),
        }
    }
}
