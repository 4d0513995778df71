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

use crate::client::ClientError;

pub type Result<T> = std::result::Result<T, Error>;

/// Errors that abort a run. Per-replica and per-target failures are
/// classified and counted instead of being surfaced through this type.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("ring error: {0}")]
    Ring(String),

    #[error("client error: {0}")]
    Client(#[from] ClientError),

    #[error("invalid audit target {0:?}: expected ACCOUNT[/CONTAINER[/OBJECT]]")]
    InvalidTarget(String),
}
