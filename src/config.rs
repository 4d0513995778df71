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

use crate::rescue::RescueConfig;
use clap::Parser;
use std::path::PathBuf;

pub const DEFAULT_CONCURRENCY: usize = 50;
pub const DEFAULT_RING_DIR: &str = "/etc/swift";

/// Audit listing consistency of a ring-replicated object storage cluster.
///
/// Targets are URL-encoded paths with one to three segments
/// (ACCOUNT, ACCOUNT/CONTAINER or ACCOUNT/CONTAINER/OBJECT) and may come
/// from the command line, from standard input, or from a file.
#[derive(Parser, Debug, Clone)]
#[command(name = "ringaudit", version)]
pub struct Opt {
    /// Audit targets: ACCOUNT[/CONTAINER[/OBJECT]], URL-encoded.
    pub targets: Vec<String>,

    /// Total audit concurrency, split between the container and object pools.
    #[arg(short = 'c', long = "concurrency", value_name = "N", default_value_t = DEFAULT_CONCURRENCY)]
    pub concurrency: usize,

    /// Directory holding the account, container and object ring descriptors.
    #[arg(short = 'r', long = "ring-dir", value_name = "DIR", default_value = DEFAULT_RING_DIR)]
    pub ring_dir: PathBuf,

    /// Append each confirmed-missing path to FILE.
    #[arg(short = 'e', long = "error-file", value_name = "FILE")]
    pub error_file: Option<PathBuf>,

    /// Delete confirmed-missing rows from container listings.
    #[arg(short = 'd', long = "delete")]
    pub delete: bool,

    /// Probe every device in the object ring, not just primaries and handoffs.
    #[arg(short = 'p', long = "check-all")]
    pub check_all: bool,

    /// Page every container replica instead of stopping at the first
    /// replica that reaches the end of its listing.
    #[arg(short = 't', long = "thorough")]
    pub thorough: bool,

    /// Ignore listing entries modified within the last SECONDS. Does not
    /// apply to objects named directly as targets.
    #[arg(short = 'm', long = "min-age", value_name = "SECONDS", default_value_t = 0)]
    pub min_age: u64,

    /// Log objects found on their primaries.
    #[arg(short = 'v', long = "verbose")]
    pub verbose: bool,

    /// Rescue handoff partitions over SSH on the owning node.
    #[arg(short = 'f', long = "ssh-rescue")]
    pub ssh_rescue: bool,

    /// Read audit targets from FILE, one per line.
    #[arg(short = 'i', long = "input", value_name = "FILE")]
    pub input: Option<PathBuf>,

    // Accepted for compatibility with older wrappers; never consumed.
    #[arg(short = 'a', hide = true)]
    pub compat_a: bool,
    #[arg(short = 'b', hide = true)]
    pub compat_b: bool,
}

/// Resolved run configuration, detached from the argument parser so tests
/// can build it directly.
#[derive(Debug, Clone)]
pub struct AuditorConfig {
    pub concurrency: usize,
    pub ring_dir: PathBuf,
    pub error_file: Option<PathBuf>,
    pub delete: bool,
    pub check_all: bool,
    pub thorough: bool,
    pub min_age: u64,
    pub verbose: bool,
    pub rescue: RescueConfig,
}

impl Default for AuditorConfig {
    fn default() -> Self {
        Self {
            concurrency: DEFAULT_CONCURRENCY,
            ring_dir: PathBuf::from(DEFAULT_RING_DIR),
            error_file: None,
            delete: false,
            check_all: false,
            thorough: false,
            min_age: 0,
            verbose: false,
            rescue: RescueConfig::default(),
        }
    }
}

impl AuditorConfig {
    /// Container paging gets a quarter of the concurrency, never zero.
    pub fn container_pool_size(&self) -> usize {
        (self.concurrency / 4).max(1)
    }

    /// Object probing gets the remaining three quarters, never zero.
    pub fn object_pool_size(&self) -> usize {
        (self.concurrency * 3 / 4).max(1)
    }
}

impl From<&Opt> for AuditorConfig {
    fn from(opt: &Opt) -> Self {
        Self {
            concurrency: opt.concurrency,
            ring_dir: opt.ring_dir.clone(),
            error_file: opt.error_file.clone(),
            delete: opt.delete,
            check_all: opt.check_all,
            thorough: opt.thorough,
            min_age: opt.min_age,
            verbose: opt.verbose,
            rescue: RescueConfig {
                ssh_mode: opt.ssh_rescue,
                ..RescueConfig::default()
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pool_split() {
        let config = AuditorConfig::default();
        assert_eq!(config.container_pool_size(), 12);
        assert_eq!(config.object_pool_size(), 37);
    }

    #[test]
    fn test_pool_split_never_zero() {
        let config = AuditorConfig {
            concurrency: 1,
            ..AuditorConfig::default()
        };
        assert_eq!(config.container_pool_size(), 1);
        assert_eq!(config.object_pool_size(), 1);
    }

    #[test]
    fn test_flags_parse() {
        let opt = Opt::parse_from([
            "ringaudit", "-c", "8", "-r", "/tmp/rings", "-d", "-p", "-t", "-m", "3600", "-v", "-f",
            "AUTH_a/c/o",
        ]);
        assert_eq!(opt.concurrency, 8);
        assert_eq!(opt.ring_dir, PathBuf::from("/tmp/rings"));
        assert!(opt.delete && opt.check_all && opt.thorough && opt.verbose && opt.ssh_rescue);
        assert_eq!(opt.min_age, 3600);
        assert_eq!(opt.targets, vec!["AUTH_a/c/o".to_string()]);
        let config = AuditorConfig::from(&opt);
        assert!(config.rescue.ssh_mode);
    }

    #[test]
    fn test_compat_flags_accepted() {
        let opt = Opt::parse_from(["ringaudit", "-a", "-b", "AUTH_a"]);
        assert_eq!(opt.targets, vec!["AUTH_a".to_string()]);
    }
}
