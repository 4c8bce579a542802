//! Flow cookies installed on behalf of application services.
//!
//! Entries outlive the flow-mod acknowledgment; they are only dropped by the
//! periodic age sweep or when the switch reports the flow removed.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use tracing::{debug, info};

/// Owner of a flow cookie.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CookieEntry {
    pub service: String,
    pub last_touched: Instant,
}

#[derive(Debug, Default)]
pub struct CookieTable {
    entries: HashMap<u64, CookieEntry>,
}

impl CookieTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a cookie, or refresh its owner and timestamp.
    pub fn insert_or_refresh(&mut self, cookie: u64, owner: &str, now: Instant) {
        match self.entries.get_mut(&cookie) {
            Some(entry) => {
                if entry.service != owner {
                    debug!(
                        cookie = format_args!("{:#x}", cookie),
                        from = %entry.service,
                        to = owner,
                        "Cookie changes owner"
                    );
                    entry.service = owner.to_string();
                }
                entry.last_touched = now;
            }
            None => {
                self.entries.insert(
                    cookie,
                    CookieEntry {
                        service: owner.to_string(),
                        last_touched: now,
                    },
                );
            }
        }
    }

    pub fn lookup(&self, cookie: u64) -> Option<&CookieEntry> {
        self.entries.get(&cookie)
    }

    pub fn remove(&mut self, cookie: u64) -> Option<CookieEntry> {
        self.entries.remove(&cookie)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Remove every entry untouched for longer than `max_age`. Returns the
    /// number of entries removed.
    pub fn age_sweep(&mut self, now: Instant, max_age: Duration) -> usize {
        let before = self.entries.len();
        self.entries
            .retain(|_, entry| now.saturating_duration_since(entry.last_touched) <= max_age);
        let removed = before - self.entries.len();
        if removed > 0 {
            debug!(removed, remaining = self.entries.len(), "Aged out cookie entries");
        }
        removed
    }

    /// Entries ordered by cookie.
    pub fn entries(&self) -> Vec<(u64, &CookieEntry)> {
        let mut v: Vec<_> = self.entries.iter().map(|(c, e)| (*c, e)).collect();
        v.sort_by_key(|(c, _)| *c);
        v
    }

    /// Log every cookie entry.
    pub fn dump(&self) {
        info!(entries = self.entries.len(), "#### COOKIE TABLE ####");
        for (cookie, entry) in self.entries() {
            info!(
                cookie = format_args!("{:#x}", cookie),
                service = %entry.service,
                idle_s = entry.last_touched.elapsed().as_secs(),
                "cookie entry"
            );
        }
        info!("#### END ####");
    }
}
