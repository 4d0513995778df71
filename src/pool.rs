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

use std::future::Future;
use std::sync::Arc;
use tokio::sync::{Mutex, Notify};

/// A bounded task pool. `spawn` blocks until a slot is free, so a producer
/// feeding a full pool suspends instead of queueing unbounded work, and
/// `wait_idle` blocks until every spawned task has finished.
///
/// The container and object pools are two independent instances of this
/// type; work never migrates between them.
pub struct TaskPool {
    available: Mutex<usize>,
    notify: Notify,
    limit: usize,
}

impl TaskPool {
    pub fn new(limit: usize) -> Arc<Self> {
        let limit = limit.max(1);
        Arc::new(Self {
            available: Mutex::new(limit),
            notify: Notify::new(),
            limit,
        })
    }

    pub fn limit(&self) -> usize {
        self.limit
    }

    async fn take(&self) {
        let mut available = self.available.lock().await;
        while *available == 0 {
            drop(available);
            self.notify.notified().await;
            available = self.available.lock().await;
        }
        *available -= 1;
    }

    async fn give(&self) {
        let mut available = self.available.lock().await;
        *available += 1;
        self.notify.notify_one();
    }

    /// Run `task` on the pool. Suspends the caller until a slot is free;
    /// the task itself runs detached and returns its slot when done.
    pub async fn spawn<F>(self: Arc<Self>, task: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        self.take().await;
        tokio::spawn(async move {
            task.await;
            self.give().await;
        });
    }

    /// Block until the pool has no running tasks.
    pub async fn wait_idle(&self) {
        loop {
            {
                let available = self.available.lock().await;
                if *available == self.limit {
                    break;
                }
            }
            self.notify.notified().await;
        }
    }

    pub async fn available(&self) -> usize {
        *self.available.lock().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;
    use tokio::time::sleep;

    #[tokio::test]
    async fn test_spawn_and_wait_idle() {
        let pool = TaskPool::new(5);
        let done = Arc::new(AtomicUsize::new(0));

        for _ in 0..4 {
            let done = done.clone();
            Arc::clone(&pool)
                .spawn(async move {
                    sleep(Duration::from_millis(50)).await;
                    done.fetch_add(1, Ordering::SeqCst);
                })
                .await;
        }

        pool.wait_idle().await;
        assert_eq!(done.load(Ordering::SeqCst), 4);
        assert_eq!(pool.available().await, pool.limit());
    }

    #[tokio::test]
    async fn test_spawn_blocks_at_capacity() {
        let pool = TaskPool::new(2);
        let peak = Arc::new(AtomicUsize::new(0));
        let running = Arc::new(AtomicUsize::new(0));

        for _ in 0..6 {
            let peak = peak.clone();
            let running = running.clone();
            Arc::clone(&pool)
                .spawn(async move {
                    let now = running.fetch_add(1, Ordering::SeqCst) + 1;
                    peak.fetch_max(now, Ordering::SeqCst);
                    sleep(Duration::from_millis(20)).await;
                    running.fetch_sub(1, Ordering::SeqCst);
                })
                .await;
        }

        pool.wait_idle().await;
        assert!(peak.load(Ordering::SeqCst) <= 2);
    }

    #[tokio::test]
    async fn test_zero_limit_is_clamped() {
        let pool = TaskPool::new(0);
        assert_eq!(pool.limit(), 1);
        Arc::clone(&pool).spawn(async {}).await;
        pool.wait_idle().await;
    }
}
