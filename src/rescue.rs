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

//! Replica rescue: when an object turns up only on a handoff node, the
//! partition is handed to the external replicator so the data is copied
//! back onto its primaries. Rescues are deduplicated per partition, capped
//! per run, and the spawned helpers are reaped at shutdown.

use crate::ring::{Node, Partition};
use std::collections::{HashMap, HashSet};
use tokio::process::{Child, Command};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

/// Hard cap on distinct partitions rescued in one run. Past it, further
/// requests are dropped with a warning and the audit proceeds.
pub const MAX_RESCUE_PARTS: usize = 50;

#[derive(Debug, Clone)]
pub struct RescueConfig {
    /// Run the replicator remotely on the node holding the handoff,
    /// scoped to one (device, partition), instead of a local helper.
    pub ssh_mode: bool,
    /// Local helper invoked as `<local_helper> <partition>`.
    pub local_helper: String,
    /// Program used to reach the remote node in SSH mode.
    pub ssh_program: String,
    /// Replicator binary run on the remote node in SSH mode.
    pub remote_helper: String,
}

impl Default for RescueConfig {
    fn default() -> Self {
        Self {
            ssh_mode: false,
            local_helper: "rescueparts".to_string(),
            ssh_program: "ssh".to_string(),
            remote_helper: "object-replicator".to_string(),
        }
    }
}

#[derive(Debug, Default)]
struct RescueState {
    parts_to_rescue: HashSet<Partition>,
    devices_rescuing: HashMap<String, u64>,
}

#[derive(Debug, PartialEq, Eq)]
enum Admission {
    Start,
    AlreadyQueued,
    PartsCapReached,
    DeviceBusy,
}

impl RescueState {
    /// Decide whether a rescue may start. The partition set never grows
    /// past [`MAX_RESCUE_PARTS`]; in SSH mode each (ip, device) runs at
    /// most one command per run, though its request count keeps climbing.
    fn admit(&mut self, part: Partition, device_key: Option<&str>) -> Admission {
        if self.parts_to_rescue.contains(&part) {
            return Admission::AlreadyQueued;
        }
        if self.parts_to_rescue.len() >= MAX_RESCUE_PARTS {
            return Admission::PartsCapReached;
        }
        if let Some(key) = device_key {
            let count = self.devices_rescuing.entry(key.to_string()).or_insert(0);
            *count += 1;
            if *count > 1 {
                return Admission::DeviceBusy;
            }
        }
        self.parts_to_rescue.insert(part);
        Admission::Start
    }
}

pub struct RescueDispatcher {
    config: RescueConfig,
    state: Mutex<RescueState>,
    children: Mutex<Vec<(Partition, Child)>>,
}

impl RescueDispatcher {
    pub fn new(config: RescueConfig) -> Self {
        Self {
            config,
            state: Mutex::new(RescueState::default()),
            children: Mutex::new(Vec::new()),
        }
    }

    fn command(&self, part: Partition, node: &Node) -> Command {
        if self.config.ssh_mode {
            let mut cmd = Command::new(&self.config.ssh_program);
            cmd.arg(&node.ip)
                .arg(&self.config.remote_helper)
                .arg("-partitions")
                .arg(part.to_string())
                .arg("-devices")
                .arg(&node.device)
                .arg("-once");
            cmd
        } else {
            let mut cmd = Command::new(&self.config.local_helper);
            cmd.arg(part.to_string());
            cmd
        }
    }

    /// Ask for a rescue of `part`, found on handoff `node`. Never fails the
    /// audit: refusals and spawn errors are logged and swallowed.
    pub async fn request(&self, part: Partition, node: &Node) {
        let device_key = self.config.ssh_mode.then(|| node.device_key());
        let admission = self.state.lock().await.admit(part, device_key.as_deref());
        match admission {
            Admission::AlreadyQueued => {
                debug!(part, "rescue already queued");
                return;
            }
            Admission::PartsCapReached => {
                warn!(part, cap = MAX_RESCUE_PARTS, "rescue cap reached, dropping request");
                return;
            }
            Admission::DeviceBusy => {
                warn!(part, device = %node.device_key(), "rescue already running on device, dropping request");
                return;
            }
            Admission::Start => {}
        }

        info!(part, ip = %node.ip, device = %node.device, "dispatching replica rescue");
        match self.command(part, node).spawn() {
            Ok(child) => self.children.lock().await.push((part, child)),
            Err(err) => warn!(part, %err, "failed to spawn rescue helper"),
        }
    }

    /// Number of distinct partitions a rescue was admitted for so far.
    pub async fn parts_queued(&self) -> usize {
        self.state.lock().await.parts_to_rescue.len()
    }

    /// Join every rescue subprocess started this run. Exit codes are
    /// logged, not surfaced. Returns the number of children reaped.
    pub async fn wait_for_rescues(&self) -> usize {
        let children: Vec<(Partition, Child)> = self.children.lock().await.drain(..).collect();
        let mut reaped = 0;
        for (part, mut child) in children {
            match child.wait().await {
                Ok(status) => {
                    reaped += 1;
                    if !status.success() {
                        debug!(part, %status, "rescue helper exited non-zero");
                    }
                }
                Err(err) => warn!(part, %err, "failed to wait for rescue helper"),
            }
        }
        reaped
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn node(id: u32, ip: &str, device: &str) -> Node {
        Node {
            id,
            ip: ip.to_string(),
            port: 6000,
            device: device.to_string(),
        }
    }

    fn noop_config(ssh_mode: bool) -> RescueConfig {
        RescueConfig {
            ssh_mode,
            local_helper: "true".to_string(),
            ssh_program: "true".to_string(),
            remote_helper: "object-replicator".to_string(),
        }
    }

    #[test]
    fn test_admit_deduplicates_partitions() {
        let mut state = RescueState::default();
        assert_eq!(state.admit(7, None), Admission::Start);
        assert_eq!(state.admit(7, None), Admission::AlreadyQueued);
        assert_eq!(state.parts_to_rescue.len(), 1);
    }

    #[test]
    fn test_admit_caps_partition_set() {
        let mut state = RescueState::default();
        for part in 0..MAX_RESCUE_PARTS as Partition {
            assert_eq!(state.admit(part, None), Admission::Start);
        }
        assert_eq!(state.admit(999, None), Admission::PartsCapReached);
        assert_eq!(state.parts_to_rescue.len(), MAX_RESCUE_PARTS);
    }

    #[test]
    fn test_admit_one_command_per_device() {
        let mut state = RescueState::default();
        assert_eq!(state.admit(1, Some("10.0.0.1/sda")), Admission::Start);
        assert_eq!(state.admit(2, Some("10.0.0.1/sda")), Admission::DeviceBusy);
        assert_eq!(state.admit(3, Some("10.0.0.2/sda")), Admission::Start);
        // The refused partition stays eligible for another device.
        assert_eq!(state.admit(2, Some("10.0.0.2/sdb")), Admission::Start);
        assert_eq!(state.devices_rescuing["10.0.0.1/sda"], 2);
    }

    #[test]
    fn test_local_command_shape() {
        let dispatcher = RescueDispatcher::new(RescueConfig::default());
        let cmd = dispatcher.command(42, &node(1, "10.0.0.1", "sda"));
        let args: Vec<_> = cmd.as_std().get_args().map(|a| a.to_string_lossy().into_owned()).collect();
        assert_eq!(cmd.as_std().get_program().to_string_lossy(), "rescueparts");
        assert_eq!(args, vec!["42"]);
    }

    #[test]
    fn test_ssh_command_shape() {
        let config = RescueConfig {
            ssh_mode: true,
            ..RescueConfig::default()
        };
        let dispatcher = RescueDispatcher::new(config);
        let cmd = dispatcher.command(42, &node(1, "10.0.0.1", "sdb"));
        let args: Vec<_> = cmd.as_std().get_args().map(|a| a.to_string_lossy().into_owned()).collect();
        assert_eq!(cmd.as_std().get_program().to_string_lossy(), "ssh");
        assert_eq!(
            args,
            vec!["10.0.0.1", "object-replicator", "-partitions", "42", "-devices", "sdb", "-once"]
        );
    }

    #[tokio::test]
    async fn test_request_spawns_and_reaps() {
        let dispatcher = RescueDispatcher::new(noop_config(false));
        dispatcher.request(3, &node(1, "10.0.0.1", "sda")).await;
        dispatcher.request(3, &node(2, "10.0.0.2", "sdb")).await;
        assert_eq!(dispatcher.parts_queued().await, 1);
        assert_eq!(dispatcher.wait_for_rescues().await, 1);
        // Reaping drains the child list.
        assert_eq!(dispatcher.wait_for_rescues().await, 0);
    }

    #[tokio::test]
    async fn test_ssh_mode_one_spawn_per_device() {
        let dispatcher = RescueDispatcher::new(noop_config(true));
        let handoff = node(1, "10.0.0.1", "sda");
        dispatcher.request(1, &handoff).await;
        dispatcher.request(2, &handoff).await;
        assert_eq!(dispatcher.wait_for_rescues().await, 1);
    }
}
