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

//! Input driver: collect audit targets from arguments, an input file and
//! piped standard input, and hand them to the right pool.

use crate::audit::{Auditor, ObjectTarget};
use crate::config::Opt;
use crate::error::{Error, Result};
use std::io::IsTerminal;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::warn;

/// One parsed audit target: an account, a container, or a single object.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Target {
    pub account: String,
    pub container: Option<String>,
    pub object: Option<String>,
}

/// Parse a URL-encoded 1–3 segment path. A leading slash is tolerated;
/// empty segments are not.
pub fn parse_target(raw: &str) -> Result<Target> {
    let trimmed = raw.trim();
    let trimmed = trimmed.strip_prefix('/').unwrap_or(trimmed);
    if trimmed.is_empty() {
        return Err(Error::InvalidTarget(raw.to_string()));
    }
    let segments: Vec<&str> = trimmed.split('/').collect();
    if segments.len() > 3 || segments.iter().any(|s| s.is_empty()) {
        return Err(Error::InvalidTarget(raw.to_string()));
    }
    let decode = |segment: &str| {
        urlencoding::decode(segment)
            .map(|c| c.into_owned())
            .map_err(|_| Error::InvalidTarget(raw.to_string()))
    };
    Ok(Target {
        account: decode(segments[0])?,
        container: segments.get(1).map(|s| decode(s)).transpose()?,
        object: segments.get(2).map(|s| decode(s)).transpose()?,
    })
}

/// Parse a feed of lines leniently: bad lines are logged and skipped so a
/// long target feed is not aborted by one typo.
fn parse_lines<'a>(lines: impl Iterator<Item = &'a str>, targets: &mut Vec<Target>) {
    for line in lines {
        if line.trim().is_empty() {
            continue;
        }
        match parse_target(line) {
            Ok(target) => targets.push(target),
            Err(err) => warn!(%err, "skipping target"),
        }
    }
}

/// Collect every target and run the audit to quiescence. Positional
/// arguments must parse; file and stdin feeds are lenient.
pub async fn run(auditor: &Arc<Auditor>, opt: &Opt) -> Result<()> {
    let mut targets = Vec::new();
    for raw in &opt.targets {
        targets.push(parse_target(raw)?);
    }
    if let Some(path) = &opt.input {
        let body = tokio::fs::read_to_string(path).await?;
        parse_lines(body.lines(), &mut targets);
    }
    if !std::io::stdin().is_terminal() {
        let mut lines = BufReader::new(tokio::io::stdin()).lines();
        while let Some(line) = lines.next_line().await? {
            parse_lines(std::iter::once(line.as_str()), &mut targets);
        }
    }

    for target in targets {
        dispatch(auditor, target).await;
    }
    auditor.quiesce().await;
    Ok(())
}

/// Account targets audit inline (they quiesce the pools themselves);
/// container and object targets go to their pools.
async fn dispatch(auditor: &Arc<Auditor>, target: Target) {
    match (target.container, target.object) {
        (Some(container), Some(object)) => {
            let worker = Arc::clone(auditor);
            let account = target.account;
            Arc::clone(&auditor.object_pool)
                .spawn(async move {
                    // Direct object targets bypass the min-age filter.
                    worker.probe_object(ObjectTarget::direct(account, container, object)).await;
                })
                .await;
        }
        (Some(container), None) => {
            let worker = Arc::clone(auditor);
            let account = target.account;
            Arc::clone(&auditor.container_pool)
                .spawn(async move {
                    worker.audit_container(&account, &container).await;
                })
                .await;
        }
        _ => {
            Arc::clone(auditor).audit_account(&target.account).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_account_only() {
        let target = parse_target("AUTH_test").unwrap();
        assert_eq!(target.account, "AUTH_test");
        assert_eq!(target.container, None);
        assert_eq!(target.object, None);
    }

    #[test]
    fn test_parse_full_path_with_encoding() {
        let target = parse_target("/AUTH_test/cont/obj%20one").unwrap();
        assert_eq!(target.account, "AUTH_test");
        assert_eq!(target.container.as_deref(), Some("cont"));
        assert_eq!(target.object.as_deref(), Some("obj one"));
    }

    #[test]
    fn test_parse_rejects_bad_paths() {
        assert!(parse_target("").is_err());
        assert!(parse_target("   ").is_err());
        assert!(parse_target("a//c").is_err());
        assert!(parse_target("a/b/c/d").is_err());
    }

    #[test]
    fn test_parse_lines_skips_bad_entries() {
        let mut targets = Vec::new();
        parse_lines(["AUTH_a/c", "", "bad//line", "AUTH_b"].into_iter(), &mut targets);
        assert_eq!(targets.len(), 2);
        assert_eq!(targets[0].account, "AUTH_a");
        assert_eq!(targets[1].account, "AUTH_b");
    }
}
