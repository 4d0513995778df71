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

//! Ring adapter: resolves a path to its partition, the primary nodes that
//! own the partition, and the handoff nodes that may hold strays.

use crate::error::{Error, Result};
use md5::{Digest, Md5};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::Path;

pub type Partition = u64;

/// A storage endpoint. Opaque to the audit logic except as an address for
/// the direct client and as the (ip, device) scope of an SSH rescue.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Node {
    pub id: u32,
    pub ip: String,
    pub port: u16,
    pub device: String,
}

impl Node {
    /// Key used to limit SSH-mode rescues to one per (ip, device).
    pub fn device_key(&self) -> String {
        format!("{}/{}", self.ip, self.device)
    }
}

/// Partition and primary assignment for an account or container path.
#[derive(Debug, Clone)]
pub struct Location {
    pub part: Partition,
    pub primaries: Vec<Node>,
}

/// Object resolution: primaries plus the lazy handoff walk.
pub struct ObjectLocation {
    pub part: Partition,
    pub primaries: Vec<Node>,
    pub handoffs: NodeIter,
}

pub type NodeIter = Box<dyn Iterator<Item = Node> + Send>;

/// Read-only view of the three cluster rings, safe to share across workers.
pub trait Ring: Send + Sync {
    fn locate_account(&self, account: &str) -> Location;
    fn locate_container(&self, account: &str, container: &str) -> Location;
    fn locate_object(&self, account: &str, container: &str, object: &str) -> ObjectLocation;
    /// Every device in the object ring, for exhaustive (`-p`) probing.
    fn object_devices(&self) -> Vec<Node>;
}

/// One ring tier loaded from its JSON descriptor: a device table plus a
/// replica-to-partition assignment matrix.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RingTable {
    part_shift: u32,
    devs: Vec<Node>,
    replica2part2dev: Vec<Vec<u32>>,
}

impl RingTable {
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read(path)?;
        let table: RingTable = serde_json::from_slice(&raw)
            .map_err(|e| Error::Ring(format!("{}: {e}", path.display())))?;
        table.validate(path)?;
        Ok(table)
    }

    fn validate(&self, path: &Path) -> Result<()> {
        if self.part_shift > 31 {
            return Err(Error::Ring(format!("{}: part_shift {} out of range", path.display(), self.part_shift)));
        }
        if self.devs.is_empty() || self.replica2part2dev.is_empty() {
            return Err(Error::Ring(format!("{}: empty device or replica table", path.display())));
        }
        let parts = self.replica2part2dev[0].len();
        for row in &self.replica2part2dev {
            if row.len() != parts {
                return Err(Error::Ring(format!("{}: ragged replica table", path.display())));
            }
            if let Some(bad) = row.iter().find(|&&d| d as usize >= self.devs.len()) {
                return Err(Error::Ring(format!("{}: device index {bad} out of range", path.display())));
            }
        }
        Ok(())
    }

    pub fn partition_count(&self) -> usize {
        self.replica2part2dev[0].len()
    }

    pub fn replica_count(&self) -> usize {
        self.replica2part2dev.len()
    }

    /// Partition for a path: the top bits of the md5 of the slash-joined
    /// segments, shifted down so every partition index is in range.
    pub fn partition(&self, account: &str, container: Option<&str>, object: Option<&str>) -> Partition {
        let mut hasher = Md5::new();
        hasher.update(b"/");
        hasher.update(account.as_bytes());
        if let Some(container) = container {
            hasher.update(b"/");
            hasher.update(container.as_bytes());
        }
        if let Some(object) = object {
            hasher.update(b"/");
            hasher.update(object.as_bytes());
        }
        let digest = hasher.finalize();
        let raw = u32::from_be_bytes([digest[0], digest[1], digest[2], digest[3]]);
        let part = (raw >> self.part_shift) as usize % self.partition_count();
        part as Partition
    }

    /// The ring-ordered primary nodes for a partition, duplicates removed
    /// (a small ring can assign one device to several replica rows).
    pub fn primaries(&self, part: Partition) -> Vec<Node> {
        let mut seen = HashSet::new();
        let mut nodes = Vec::with_capacity(self.replica_count());
        for row in &self.replica2part2dev {
            let dev = &self.devs[row[part as usize] as usize];
            if seen.insert(dev.id) {
                nodes.push(dev.clone());
            }
        }
        nodes
    }

    /// Lazy handoff walk: the device table rotated by a partition-derived
    /// offset, primaries skipped. Deterministic per partition.
    pub fn handoffs(&self, part: Partition) -> NodeIter {
        let primary_ids: HashSet<u32> = self.primaries(part).iter().map(|n| n.id).collect();
        let devs = self.devs.clone();
        let len = devs.len();
        let start = part as usize % len;
        Box::new(
            (0..len)
                .map(move |i| devs[(start + i) % len].clone())
                .filter(move |n| !primary_ids.contains(&n.id)),
        )
    }

    pub fn devices(&self) -> Vec<Node> {
        self.devs.clone()
    }
}

/// The concrete three-ring adapter, loaded from a ring directory holding
/// `account.ring.json`, `container.ring.json` and `object.ring.json`.
pub struct DiskRings {
    account: RingTable,
    container: RingTable,
    object: RingTable,
}

impl DiskRings {
    pub fn open(dir: &Path) -> Result<Self> {
        Ok(Self {
            account: RingTable::load(&dir.join("account.ring.json"))?,
            container: RingTable::load(&dir.join("container.ring.json"))?,
            object: RingTable::load(&dir.join("object.ring.json"))?,
        })
    }
}

impl Ring for DiskRings {
    fn locate_account(&self, account: &str) -> Location {
        let part = self.account.partition(account, None, None);
        Location {
            part,
            primaries: self.account.primaries(part),
        }
    }

    fn locate_container(&self, account: &str, container: &str) -> Location {
        let part = self.container.partition(account, Some(container), None);
        Location {
            part,
            primaries: self.container.primaries(part),
        }
    }

    fn locate_object(&self, account: &str, container: &str, object: &str) -> ObjectLocation {
        let part = self.object.partition(account, Some(container), Some(object));
        ObjectLocation {
            part,
            primaries: self.object.primaries(part),
            handoffs: self.object.handoffs(part),
        }
    }

    fn object_devices(&self) -> Vec<Node> {
        self.object.devices()
    }
}
