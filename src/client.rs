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

//! Direct client adapter: HEAD/GET/DELETE issued against one specific
//! storage node, bypassing any proxy tier.

use crate::ring::{Node, Partition};
use async_trait::async_trait;
use serde::Deserialize;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Connect timeout for node requests.
pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
/// Response timeout for node requests.
pub const RESPONSE_TIMEOUT: Duration = Duration::from_secs(30);
/// Listing page size used while walking a container.
pub const LISTING_PAGE_LIMIT: usize = 10_000;

/// Header asking a node to serve the request even when quarantined.
pub const FORCE_ACQUIRE_HEADER: &str = "X-Force-Acquire";
/// Header carrying the cluster-internal timestamp of a row mutation.
pub const TIMESTAMP_HEADER: &str = "X-Timestamp";
/// Response header with the account's estimated object total.
pub const ACCOUNT_OBJECT_COUNT_HEADER: &str = "X-Account-Object-Count";

/// A failed node request. The audit classifies replies at the call site:
/// 404 and 507 are authoritative "not here" answers, anything else leaves
/// the replica's state unknown.
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error("unexpected status {0}")]
    Status(u16),
    #[error("transport error: {0}")]
    Transport(String),
}

impl ClientError {
    /// True when this reply proves the object is not on the replica:
    /// 404 (not found) or 507 (device unmounted).
    pub fn confirms_absence(&self) -> bool {
        matches!(self, ClientError::Status(404) | ClientError::Status(507))
    }
}

impl From<reqwest::Error> for ClientError {
    fn from(err: reqwest::Error) -> Self {
        ClientError::Transport(err.to_string())
    }
}

/// One row of a container listing.
#[derive(Debug, Clone, Deserialize)]
pub struct ObjectEntry {
    pub name: String,
    #[serde(default)]
    pub last_modified: String,
}

/// One row of an account listing.
#[derive(Debug, Clone, Deserialize)]
pub struct ContainerEntry {
    pub name: String,
}

/// One page of an account listing plus the headers the audit consumes.
#[derive(Debug, Default)]
pub struct AccountPage {
    pub object_count: Option<u64>,
    pub entries: Vec<ContainerEntry>,
}

/// Options for one container listing request.
#[derive(Debug, Clone, Default)]
pub struct ListOptions {
    pub marker: String,
    pub prefix: Option<String>,
    pub limit: usize,
}

/// Direct HTTP operations against a single storage node.
#[async_trait]
pub trait DirectClient: Send + Sync {
    async fn head_object(
        &self,
        node: &Node,
        part: Partition,
        account: &str,
        container: &str,
        object: &str,
    ) -> Result<(), ClientError>;

    async fn list_container(
        &self,
        node: &Node,
        part: Partition,
        account: &str,
        container: &str,
        options: &ListOptions,
    ) -> Result<Vec<ObjectEntry>, ClientError>;

    async fn list_account(
        &self,
        node: &Node,
        part: Partition,
        account: &str,
        marker: &str,
    ) -> Result<AccountPage, ClientError>;

    async fn delete_container_row(
        &self,
        node: &Node,
        part: Partition,
        account: &str,
        container: &str,
        object: &str,
        timestamp: &str,
    ) -> Result<(), ClientError>;
}

/// The cluster-internal timestamp format: zero-padded epoch seconds with
/// five fractional digits, 16 characters wide. Greater wall time always
/// compares greater as a string.
pub fn internal_timestamp(now: SystemTime) -> String {
    let secs = now.duration_since(UNIX_EPOCH).unwrap_or_default().as_secs_f64();
    format!("{secs:016.5}")
}

/// `DirectClient` over plain HTTP with the audit's fixed timeouts.
pub struct HttpDirectClient {
    http: reqwest::Client,
}

impl HttpDirectClient {
    pub fn new() -> Result<Self, ClientError> {
        let http = reqwest::Client::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .timeout(RESPONSE_TIMEOUT)
            .build()?;
        Ok(Self { http })
    }

    fn object_url(node: &Node, part: Partition, account: &str, container: &str, object: &str) -> String {
        format!(
            "http://{}:{}/{}/{}/{}/{}/{}",
            node.ip,
            node.port,
            node.device,
            part,
            urlencoding::encode(account),
            urlencoding::encode(container),
            urlencoding::encode(object),
        )
    }

    fn container_url(node: &Node, part: Partition, account: &str, container: &str) -> String {
        format!(
            "http://{}:{}/{}/{}/{}/{}",
            node.ip,
            node.port,
            node.device,
            part,
            urlencoding::encode(account),
            urlencoding::encode(container),
        )
    }

    fn account_url(node: &Node, part: Partition, account: &str) -> String {
        format!(
            "http://{}:{}/{}/{}/{}",
            node.ip,
            node.port,
            node.device,
            part,
            urlencoding::encode(account),
        )
    }
}

#[async_trait]
impl DirectClient for HttpDirectClient {
    async fn head_object(
        &self,
        node: &Node,
        part: Partition,
        account: &str,
        container: &str,
        object: &str,
    ) -> Result<(), ClientError> {
        let url = Self::object_url(node, part, account, container, object);
        let resp = self
            .http
            .head(&url)
            .header(FORCE_ACQUIRE_HEADER, "true")
            .send()
            .await?;
        let status = resp.status();
        if status.is_success() {
            Ok(())
        } else {
            Err(ClientError::Status(status.as_u16()))
        }
    }

    async fn list_container(
        &self,
        node: &Node,
        part: Partition,
        account: &str,
        container: &str,
        options: &ListOptions,
    ) -> Result<Vec<ObjectEntry>, ClientError> {
        let url = Self::container_url(node, part, account, container);
        let mut query: Vec<(&str, String)> = vec![
            ("format", "json".to_string()),
            ("limit", options.limit.to_string()),
            ("marker", options.marker.clone()),
        ];
        if let Some(prefix) = &options.prefix {
            query.push(("prefix", prefix.clone()));
        }
        let resp = self.http.get(&url).query(&query).send().await?;
        let status = resp.status();
        if !status.is_success() {
            return Err(ClientError::Status(status.as_u16()));
        }
        if status.as_u16() == 204 {
            return Ok(Vec::new());
        }
        Ok(resp.json().await?)
    }

    async fn list_account(
        &self,
        node: &Node,
        part: Partition,
        account: &str,
        marker: &str,
    ) -> Result<AccountPage, ClientError> {
        let url = Self::account_url(node, part, account);
        let query = [("format", "json"), ("marker", marker)];
        let resp = self.http.get(&url).query(&query).send().await?;
        let status = resp.status();
        if !status.is_success() {
            return Err(ClientError::Status(status.as_u16()));
        }
        let object_count = resp
            .headers()
            .get(ACCOUNT_OBJECT_COUNT_HEADER)
            .and_then(|v| v.to_str().ok())
            .and_then(|s| s.parse().ok());
        let entries = if status.as_u16() == 204 { Vec::new() } else { resp.json().await? };
        Ok(AccountPage { object_count, entries })
    }

    async fn delete_container_row(
        &self,
        node: &Node,
        part: Partition,
        account: &str,
        container: &str,
        object: &str,
        timestamp: &str,
    ) -> Result<(), ClientError> {
        let url = Self::object_url(node, part, account, container, object);
        let resp = self
            .http
            .delete(&url)
            .header(TIMESTAMP_HEADER, timestamp)
            .send()
            .await?;
        let status = resp.status();
        if status.is_success() {
            Ok(())
        } else {
            Err(ClientError::Status(status.as_u16()))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_internal_timestamp_format() {
        let ts = internal_timestamp(UNIX_EPOCH + Duration::from_millis(1_705_276_800_123));
        assert_eq!(ts.len(), 16);
        assert_eq!(ts, "1705276800.12300");
    }

    #[test]
    fn test_internal_timestamp_orders_with_wall_time() {
        let earlier = internal_timestamp(UNIX_EPOCH + Duration::from_secs(1_700_000_000));
        let later = internal_timestamp(UNIX_EPOCH + Duration::from_millis(1_700_000_000_010));
        assert!(later > earlier);
    }

    #[test]
    fn test_absence_classification() {
        assert!(ClientError::Status(404).confirms_absence());
        assert!(ClientError::Status(507).confirms_absence());
        assert!(!ClientError::Status(500).confirms_absence());
        assert!(!ClientError::Status(503).confirms_absence());
        assert!(!ClientError::Transport("timed out".into()).confirms_absence());
    }

    #[test]
    fn test_object_url_encodes_segments() {
        let node = Node {
            id: 1,
            ip: "10.0.0.1".into(),
            port: 6000,
            device: "sda".into(),
        };
        let url = HttpDirectClient::object_url(&node, 7, "AUTH_test", "cont", "a b/c");
        assert_eq!(url, "http://10.0.0.1:6000/sda/7/AUTH_test/cont/a%20b%2Fc");
    }
}
