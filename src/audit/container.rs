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

//! Container walk: page the listing on the container's replicas and feed
//! each old-enough entry to the object pool.

use super::{parse_last_modified, Auditor, ObjectTarget};
use crate::client::{ListOptions, LISTING_PAGE_LIMIT};
use chrono::{DateTime, Utc};
use std::sync::atomic::Ordering;
use std::sync::Arc;
use tracing::{debug, error, warn};

/// True when the entry is too fresh to probe under `-m`.
fn younger_than(last_modified: &str, min_age_secs: u64, now: DateTime<Utc>) -> bool {
    let Some(modified) = parse_last_modified(last_modified) else {
        // Unparseable rows are probed; the probe is the authority.
        return false;
    };
    let min_age = chrono::Duration::seconds(min_age_secs.try_into().unwrap_or(i64::MAX));
    now.signed_duration_since(modified) < min_age
}

impl Auditor {
    /// Audit one container: spawn a probe for every listed object old
    /// enough to be trusted as settled.
    pub async fn audit_container(self: Arc<Self>, account: &str, container: &str) {
        let location = self.ring.locate_container(account, container);
        let mut any_success = false;

        'replicas: for node in &location.primaries {
            let mut marker = String::new();
            loop {
                let options = ListOptions {
                    marker: marker.clone(),
                    prefix: None,
                    limit: LISTING_PAGE_LIMIT,
                };
                let list_time = Utc::now();
                match self
                    .client
                    .list_container(node, location.part, account, container, &options)
                    .await
                {
                    Ok(entries) => {
                        any_success = true;
                        if entries.is_empty() {
                            if self.config.thorough {
                                // Exhaustive mode walks every replica; the
                                // probes are idempotent, duplicates are fine.
                                continue 'replicas;
                            }
                            break 'replicas;
                        }
                        for entry in entries {
                            marker.clone_from(&entry.name);
                            if self.config.min_age > 0 && younger_than(&entry.last_modified, self.config.min_age, list_time) {
                                debug!(account, container, object = %entry.name, "entry younger than min-age, skipped");
                                continue;
                            }
                            let auditor = Arc::clone(&self);
                            let target = ObjectTarget {
                                account: account.to_string(),
                                container: container.to_string(),
                                object: entry.name,
                                listed_last_modified: Some(entry.last_modified),
                                list_time,
                            };
                            Arc::clone(&self.object_pool)
                                .spawn(async move { auditor.probe_object(target).await })
                                .await;
                        }
                    }
                    Err(err) => {
                        warn!(account, container, ip = %node.ip, %err, "container listing failed, trying next replica");
                        continue 'replicas;
                    }
                }
            }
        }

        if any_success {
            self.stats().containers_checked.fetch_add(1, Ordering::Relaxed);
        } else {
            self.stats().containers_failed.fetch_add(1, Ordering::Relaxed);
            error!(account, container, "container listing failed on every replica");
        }
    }
}
