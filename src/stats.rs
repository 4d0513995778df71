// Copyright 2024 Ringaudit Contributors
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Run counters, last-modified histograms and the periodic snapshot
//! reporter. Counters are mutated from worker tasks and read by the
//! reporter, so everything here is atomic or mutex-guarded.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// How often the reporter prints a snapshot while the audit runs.
pub const STATS_INTERVAL: Duration = Duration::from_secs(300);

/// Histogram key for a missing object whose last-modified is unknown.
pub const NOT_IN_LISTING: &str = "not-in-listing";

/// The date prefix (first 10 characters) of a last-modified string, or the
/// unknown-bucket key when none is available.
pub fn day_key(last_modified: Option<&str>) -> String {
    match last_modified {
        Some(lm) => lm.get(..10).unwrap_or(lm).to_string(),
        None => NOT_IN_LISTING.to_string(),
    }
}

#[derive(Debug)]
pub struct AuditStats {
    pub accounts_checked: AtomicU64,
    pub accounts_failed: AtomicU64,
    pub containers_checked: AtomicU64,
    pub containers_failed: AtomicU64,
    pub objects_checked: AtomicU64,
    pub missing_objects: AtomicU64,
    pub potentially_missing: AtomicU64,
    pub objects_deleted: AtomicU64,
    /// Objects checked so far within the account currently being audited.
    pub account_objects_checked: AtomicU64,
    /// Estimated object total of the current account, from its listing headers.
    pub account_objs: AtomicU64,
    started: Instant,
    missing_by_day: Mutex<HashMap<String, u64>>,
    potentially_missing_by_day: Mutex<HashMap<String, u64>>,
}

impl Default for AuditStats {
    fn default() -> Self {
        Self::new()
    }
}

impl AuditStats {
    pub fn new() -> Self {
        Self {
            accounts_checked: AtomicU64::new(0),
            accounts_failed: AtomicU64::new(0),
            containers_checked: AtomicU64::new(0),
            containers_failed: AtomicU64::new(0),
            objects_checked: AtomicU64::new(0),
            missing_objects: AtomicU64::new(0),
            potentially_missing: AtomicU64::new(0),
            objects_deleted: AtomicU64::new(0),
            account_objects_checked: AtomicU64::new(0),
            account_objs: AtomicU64::new(0),
            started: Instant::now(),
            missing_by_day: Mutex::new(HashMap::new()),
            potentially_missing_by_day: Mutex::new(HashMap::new()),
        }
    }

    /// Reset the per-account progress counters at the start of an account.
    pub fn begin_account(&self, estimated_objects: u64) {
        self.account_objs.store(estimated_objects, Ordering::Relaxed);
        self.account_objects_checked.store(0, Ordering::Relaxed);
    }

    pub fn record_missing(&self, last_modified: Option<&str>) {
        self.missing_objects.fetch_add(1, Ordering::Relaxed);
        let mut days = self.missing_by_day.lock().expect("histogram lock poisoned");
        *days.entry(day_key(last_modified)).or_insert(0) += 1;
    }

    pub fn record_potentially_missing(&self, last_modified: Option<&str>) {
        self.potentially_missing.fetch_add(1, Ordering::Relaxed);
        let mut days = self
            .potentially_missing_by_day
            .lock()
            .expect("histogram lock poisoned");
        *days.entry(day_key(last_modified)).or_insert(0) += 1;
    }

    pub fn missing_by_day(&self) -> HashMap<String, u64> {
        self.missing_by_day.lock().expect("histogram lock poisoned").clone()
    }

    pub fn potentially_missing_by_day(&self) -> HashMap<String, u64> {
        self.potentially_missing_by_day
            .lock()
            .expect("histogram lock poisoned")
            .clone()
    }

    fn latest_missing_day(&self) -> Option<String> {
        self.missing_by_day
            .lock()
            .expect("histogram lock poisoned")
            .keys()
            .filter(|k| k.as_str() != NOT_IN_LISTING)
            .max()
            .cloned()
    }

    /// Print a stats section: a leading blank line, then right-aligned
    /// labels in a 30-character field.
    pub fn print_snapshot(&self) {
        let objects_checked = self.objects_checked.load(Ordering::Relaxed);
        let elapsed = self.started.elapsed().as_secs_f64().max(f64::EPSILON);
        let account_objs = self.account_objs.load(Ordering::Relaxed);
        let account_checked = self.account_objects_checked.load(Ordering::Relaxed);

        println!();
        println!("{:>30}: {}", "Accounts Checked", self.accounts_checked.load(Ordering::Relaxed));
        println!("{:>30}: {}", "Accounts Failed", self.accounts_failed.load(Ordering::Relaxed));
        println!("{:>30}: {}", "Containers Checked", self.containers_checked.load(Ordering::Relaxed));
        println!("{:>30}: {}", "Containers Failed", self.containers_failed.load(Ordering::Relaxed));
        println!("{:>30}: {}", "Objects Checked", objects_checked);
        println!("{:>30}: {}", "Missing Objects", self.missing_objects.load(Ordering::Relaxed));
        println!("{:>30}: {}", "Potentially Missing", self.potentially_missing.load(Ordering::Relaxed));
        println!("{:>30}: {}", "Objects Deleted", self.objects_deleted.load(Ordering::Relaxed));
        println!("{:>30}: {}", "Account Objects Checked", account_checked);
        println!("{:>30}: {}", "Account Objects (est)", account_objs);
        println!("{:>30}: {:.2}", "Objects Per Second", objects_checked as f64 / elapsed);
        println!("{:>30}: {}", "Remaining (est)", account_objs.saturating_sub(account_checked));
        if let Some(day) = self.latest_missing_day() {
            println!("{:>30}: {}", "Latest Missing", day);
        }
    }
}

/// Background task printing a snapshot every [`STATS_INTERVAL`] until
/// stopped. Account completion and process exit print their own snapshots.
pub struct Reporter {
    cancel: CancellationToken,
    handle: tokio::task::JoinHandle<()>,
}

impl Reporter {
    pub fn start(stats: Arc<AuditStats>) -> Self {
        let cancel = CancellationToken::new();
        let token = cancel.clone();
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(STATS_INTERVAL);
            // The first tick fires immediately; the run start is not a snapshot.
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = ticker.tick() => stats.print_snapshot(),
                }
            }
            debug!("stats reporter stopped");
        });
        Self { cancel, handle }
    }

    pub async fn stop(self) {
        self.cancel.cancel();
        let _ = self.handle.await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_day_key() {
        assert_eq!(day_key(Some("2024-01-15T00:00:00.000000")), "2024-01-15");
        assert_eq!(day_key(Some("short")), "short");
        assert_eq!(day_key(None), NOT_IN_LISTING);
    }

    #[test]
    fn test_missing_total_matches_histogram_sum() {
        let stats = AuditStats::new();
        stats.record_missing(Some("2024-01-15T00:00:00.000000"));
        stats.record_missing(Some("2024-01-15T08:30:00.000000"));
        stats.record_missing(Some("2024-02-01T00:00:00.000000"));
        stats.record_missing(None);

        let days = stats.missing_by_day();
        let total: u64 = days.values().sum();
        assert_eq!(total, stats.missing_objects.load(Ordering::Relaxed));
        assert_eq!(days["2024-01-15"], 2);
        assert_eq!(days["2024-02-01"], 1);
        assert_eq!(days[NOT_IN_LISTING], 1);
    }

    #[test]
    fn test_latest_missing_skips_unknown_bucket() {
        let stats = AuditStats::new();
        stats.record_missing(None);
        assert_eq!(stats.latest_missing_day(), None);
        stats.record_missing(Some("2024-01-15T00:00:00.000000"));
        stats.record_missing(Some("2023-12-31T23:59:59.000000"));
        assert_eq!(stats.latest_missing_day().as_deref(), Some("2024-01-15"));
    }

    #[test]
    fn test_begin_account_resets_progress() {
        let stats = AuditStats::new();
        stats.account_objects_checked.store(42, Ordering::Relaxed);
        stats.begin_account(1000);
        assert_eq!(stats.account_objects_checked.load(Ordering::Relaxed), 0);
        assert_eq!(stats.account_objs.load(Ordering::Relaxed), 1000);
    }

    #[tokio::test]
    async fn test_reporter_start_stop() {
        let stats = Arc::new(AuditStats::new());
        let reporter = Reporter::start(stats);
        reporter.stop().await;
    }
}
