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

//! The audit engine: account listing fans out to container listing, which
//! fans out to object probing, across two bounded pools.

pub mod account;
pub mod container;
pub mod object;

use crate::client::DirectClient;
use crate::config::AuditorConfig;
use crate::error::Result;
use crate::pool::TaskPool;
use crate::rescue::RescueDispatcher;
use crate::ring::Ring;
use crate::stats::AuditStats;
use chrono::{DateTime, NaiveDateTime, TimeZone, Utc};
use std::sync::Arc;
use tokio::fs::{File, OpenOptions};
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::{info, warn};

/// One object to probe, with what the container listing said about it.
#[derive(Debug, Clone)]
pub struct ObjectTarget {
    pub account: String,
    pub container: String,
    pub object: String,
    /// The listing row's last-modified, when the probe came from a listing.
    pub listed_last_modified: Option<String>,
    /// Wall clock at the listing page fetch that produced this entry.
    pub list_time: DateTime<Utc>,
}

impl ObjectTarget {
    /// A probe requested directly, not produced by a container walk.
    pub fn direct(account: String, container: String, object: String) -> Self {
        Self {
            account,
            container,
            object,
            listed_last_modified: None,
            list_time: Utc::now(),
        }
    }

    pub fn path(&self) -> String {
        format!("/{}/{}/{}", self.account, self.container, self.object)
    }

    /// URL-encoded form, as written to the error file.
    pub fn encoded_path(&self) -> String {
        format!(
            "/{}/{}/{}",
            urlencoding::encode(&self.account),
            urlencoding::encode(&self.container),
            urlencoding::encode(&self.object),
        )
    }
}

/// Listing timestamps are naive ISO-8601 in cluster time (UTC).
pub(crate) fn parse_last_modified(last_modified: &str) -> Option<DateTime<Utc>> {
    NaiveDateTime::parse_from_str(last_modified, "%Y-%m-%dT%H:%M:%S%.f")
        .ok()
        .map(|naive| Utc.from_utc_datetime(&naive))
}

pub(crate) fn format_utc(at: &DateTime<Utc>) -> String {
    at.format("%Y-%m-%dT%H:%M:%S%.6f").to_string()
}

/// The audit engine for one run. Workers share it behind an `Arc`; the
/// ring and client come in as trait objects so tests can script them.
pub struct Auditor {
    pub(crate) config: AuditorConfig,
    pub(crate) ring: Arc<dyn Ring>,
    pub(crate) client: Arc<dyn DirectClient>,
    stats: Arc<AuditStats>,
    rescue: RescueDispatcher,
    pub(crate) container_pool: Arc<TaskPool>,
    pub(crate) object_pool: Arc<TaskPool>,
    error_file: Option<Mutex<File>>,
}

impl Auditor {
    pub async fn new(config: AuditorConfig, ring: Arc<dyn Ring>, client: Arc<dyn DirectClient>) -> Result<Arc<Self>> {
        let error_file = match &config.error_file {
            Some(path) => {
                let file = OpenOptions::new().create(true).append(true).open(path).await?;
                Some(Mutex::new(file))
            }
            None => None,
        };
        let container_pool = TaskPool::new(config.container_pool_size());
        let object_pool = TaskPool::new(config.object_pool_size());
        let rescue = RescueDispatcher::new(config.rescue.clone());
        Ok(Arc::new(Self {
            config,
            ring,
            client,
            stats: Arc::new(AuditStats::new()),
            rescue,
            container_pool,
            object_pool,
            error_file,
        }))
    }

    pub fn stats(&self) -> &Arc<AuditStats> {
        &self.stats
    }

    pub fn rescue(&self) -> &RescueDispatcher {
        &self.rescue
    }

    /// Wait until every queued container and object task has finished.
    /// Container tasks are drained first since they feed the object pool.
    pub async fn quiesce(&self) {
        self.container_pool.wait_idle().await;
        self.object_pool.wait_idle().await;
    }

    /// Drain the pools, reap rescue subprocesses and flush the error file.
    pub async fn finish(&self) {
        self.quiesce().await;
        let reaped = self.rescue.wait_for_rescues().await;
        if reaped > 0 {
            info!(reaped, "rescue helpers finished");
        }
        if let Some(file) = &self.error_file {
            if let Err(err) = file.lock().await.flush().await {
                warn!(%err, "failed to flush error file");
            }
        }
    }

    /// Append one URL-encoded path to the error file, flushing the record
    /// so an interrupted run keeps what it found.
    pub(crate) async fn record_missing_path(&self, target: &ObjectTarget) {
        let Some(file) = &self.error_file else {
            return;
        };
        let line = format!("{}\n", target.encoded_path());
        let mut file = file.lock().await;
        if let Err(err) = file.write_all(line.as_bytes()).await {
            warn!(path = %target.path(), %err, "failed to append to error file");
            return;
        }
        if let Err(err) = file.flush().await {
            warn!(path = %target.path(), %err, "failed to flush error file");
        }
    }
}
