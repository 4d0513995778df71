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

//! Account walk: page the account's containers onto the container pool,
//! then quiesce and report before moving to the next account.

use super::Auditor;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use tracing::{error, warn};

impl Auditor {
    /// Audit one account end to end: every container, every object, then
    /// wait for the fan-out to drain and print a snapshot.
    pub async fn audit_account(self: Arc<Self>, account: &str) {
        let location = self.ring.locate_account(account);
        let mut any_success = false;

        'replicas: for node in &location.primaries {
            let mut marker = String::new();
            loop {
                match self.client.list_account(node, location.part, account, &marker).await {
                    Ok(page) => {
                        if !any_success {
                            // First successful page: seed the progress estimate.
                            self.stats().begin_account(page.object_count.unwrap_or(0));
                        }
                        any_success = true;
                        if page.entries.is_empty() {
                            break 'replicas;
                        }
                        for entry in page.entries {
                            marker.clone_from(&entry.name);
                            let auditor = Arc::clone(&self);
                            let account = account.to_string();
                            Arc::clone(&self.container_pool)
                                .spawn(async move { auditor.audit_container(&account, &entry.name).await })
                                .await;
                        }
                    }
                    Err(err) => {
                        warn!(account, ip = %node.ip, %err, "account listing failed, trying next replica");
                        continue 'replicas;
                    }
                }
            }
        }

        if any_success {
            self.stats().accounts_checked.fetch_add(1, Ordering::Relaxed);
            self.quiesce().await;
            self.stats().print_snapshot();
        } else {
            self.stats().accounts_failed.fetch_add(1, Ordering::Relaxed);
            error!(account, "account listing failed on every replica");
        }
    }
}
