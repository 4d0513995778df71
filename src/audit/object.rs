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

//! The per-object probe: walk the replica window, classify the outcome,
//! and act on it. Mutation (row deletion) only follows a confirmed
//! Missing, guarded by a post-probe re-read of the container listing.

use super::{format_utc, parse_last_modified, Auditor, ObjectTarget};
use crate::client::{internal_timestamp, ListOptions, ObjectEntry};
use crate::ring::{Location, Node, NodeIter};
use crate::stats::NOT_IN_LISTING;
use chrono::Utc;
use std::collections::HashSet;
use std::sync::atomic::Ordering;
use std::time::SystemTime;
use tracing::{debug, info, warn};

impl Auditor {
    /// Probe one object across its replica window and reconcile the
    /// container listing with what the probes found.
    pub async fn probe_object(&self, target: ObjectTarget) {
        let location = self.ring.locate_object(&target.account, &target.container, &target.object);
        let part = location.part;
        let replica_count = location.primaries.len();
        let window = replica_count * 2;
        let nodes = self.probe_sequence(location.primaries, location.handoffs);

        let mut found = false;
        let mut exception_count = 0u64;
        for (rank, node) in nodes.enumerate() {
            match self
                .client
                .head_object(&node, part, &target.account, &target.container, &target.object)
                .await
            {
                Ok(()) => {
                    if rank >= replica_count {
                        // Data only on a handoff: the partition is underpopulated.
                        self.rescue.request(part, &node).await;
                    } else if self.config.verbose {
                        info!(path = %target.path(), ip = %node.ip, device = %node.device, "found object");
                    }
                    found = true;
                    break;
                }
                Err(err) if err.confirms_absence() => {}
                Err(err) if rank < window => {
                    exception_count += 1;
                    warn!(path = %target.path(), ip = %node.ip, device = %node.device, %err, "object probe failed");
                }
                Err(err) => {
                    debug!(path = %target.path(), ip = %node.ip, %err, "probe error beyond window, ignored");
                }
            }
        }

        if !found {
            let container_location = self.ring.locate_container(&target.account, &target.container);
            match self.confirm_in_listings(&container_location, &target).await {
                Some(row) => {
                    let last_modified = if row.last_modified.is_empty() {
                        target.listed_last_modified.clone()
                    } else {
                        Some(row.last_modified)
                    };
                    if exception_count == 0 {
                        self.handle_missing(&container_location, &target, last_modified).await;
                    } else {
                        self.handle_potentially_missing(&target, last_modified, exception_count);
                    }
                }
                None => {
                    // Deleted under us by a client; nothing to reconcile.
                    debug!(path = %target.path(), "object no longer listed");
                }
            }
        }

        self.stats().objects_checked.fetch_add(1, Ordering::Relaxed);
        self.stats().account_objects_checked.fetch_add(1, Ordering::Relaxed);
    }

    /// Primaries first, then handoffs. The default window is one ring's
    /// worth of handoffs; `-p` walks every device in the object ring.
    fn probe_sequence(&self, primaries: Vec<Node>, handoffs: NodeIter) -> NodeIter {
        if self.config.check_all {
            let primary_ids: HashSet<u32> = primaries.iter().map(|n| n.id).collect();
            let tail = self
                .ring
                .object_devices()
                .into_iter()
                .filter(move |n| !primary_ids.contains(&n.id));
            Box::new(primaries.into_iter().chain(tail))
        } else {
            let take = primaries.len();
            Box::new(primaries.into_iter().chain(handoffs.take(take)))
        }
    }

    /// Post-probe re-read of the container listing. Returns the row when
    /// any container replica still lists the object; a listing failure on
    /// a replica is not proof either way, so only a positive row counts.
    async fn confirm_in_listings(&self, location: &Location, target: &ObjectTarget) -> Option<ObjectEntry> {
        let options = ListOptions {
            marker: String::new(),
            prefix: Some(target.object.clone()),
            limit: 1,
        };
        for node in &location.primaries {
            match self
                .client
                .list_container(node, location.part, &target.account, &target.container, &options)
                .await
            {
                Ok(entries) => {
                    if let Some(row) = entries.into_iter().find(|e| e.name == target.object) {
                        return Some(row);
                    }
                }
                Err(err) => {
                    warn!(path = %target.path(), ip = %node.ip, %err, "confirmation listing failed");
                }
            }
        }
        None
    }

    /// Confirmed missing: every probed node said "not here" and the
    /// container still lists the row. Report it and, in delete mode,
    /// remove the row from every container replica.
    async fn handle_missing(&self, container_location: &Location, target: &ObjectTarget, last_modified: Option<String>) {
        let probe_time = Utc::now();
        println!(
            "Missing object: {} last-mod: {} listed-at: {} probed-at: {}",
            target.path(),
            last_modified.as_deref().unwrap_or(NOT_IN_LISTING),
            format_utc(&target.list_time),
            format_utc(&probe_time),
        );
        self.stats().record_missing(last_modified.as_deref());
        self.record_missing_path(target).await;

        if !self.config.delete {
            return;
        }

        let timestamp = internal_timestamp(SystemTime::now());
        if let Some(row_time) = last_modified.as_deref().and_then(parse_last_modified) {
            if row_time > probe_time {
                warn!(path = %target.path(), "listing row is newer than the delete timestamp; the cluster may reject the delete");
            }
        }

        let mut accepted = 0usize;
        let mut failed = 0usize;
        for node in &container_location.primaries {
            match self
                .client
                .delete_container_row(
                    node,
                    container_location.part,
                    &target.account,
                    &target.container,
                    &target.object,
                    &timestamp,
                )
                .await
            {
                Ok(()) => accepted += 1,
                Err(err) => {
                    failed += 1;
                    warn!(path = %target.path(), ip = %node.ip, %err, "failed to delete container row");
                }
            }
        }
        if accepted > 0 {
            info!(path = %target.path(), accepted, failed, "removed missing object from container listing");
            // The deleted counter only takes full acceptance.
            if failed == 0 {
                self.stats().objects_deleted.fetch_add(1, Ordering::Relaxed);
            }
        }
    }

    /// Probe errors inside the window mean absence was not proven on every
    /// replica. Report, never mutate.
    fn handle_potentially_missing(&self, target: &ObjectTarget, last_modified: Option<String>, exception_count: u64) {
        let probe_time = Utc::now();
        println!(
            "Potentially missing object: {} last-mod: {} listed-at: {} probed-at: {}",
            target.path(),
            last_modified.as_deref().unwrap_or(NOT_IN_LISTING),
            format_utc(&target.list_time),
            format_utc(&probe_time),
        );
        warn!(path = %target.path(), exception_count, "probe inconclusive, not deleting");
        self.stats().record_potentially_missing(last_modified.as_deref());
    }
}
