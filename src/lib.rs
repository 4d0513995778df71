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

//! # ringaudit
//!
//! Listing-consistency auditor for a ring-replicated object storage
//! cluster. Container listings and physical object replicas drift apart;
//! this tool walks accounts → containers → objects, probes every replica
//! window for each listed object, and reconciles:
//!
//! - an object absent from every probed node but still listed is reported
//!   as **missing** (and optionally deleted from the container index);
//! - an object whose probes erred is reported as **potentially missing**
//!   and never touched;
//! - an object found only on a handoff node triggers a background
//!   **replica rescue** of its partition.
//!
//! ```text
//! targets ──► input driver ──► account lister ─┐ container pool
//!                                              ▼
//!                                     container lister ─┐ object pool
//!                                                       ▼
//!                                                 object prober
//!                                        ┌──────────┼─────────────┐
//!                                        ▼          ▼             ▼
//!                                confirm+delete  error file  rescue dispatch
//! ```
//!
//! The audit is safe to re-run: deletion happens only after a post-probe
//! re-read of the container listing, and every negative outcome short of
//! proven absence degrades to a report instead of a mutation.

pub mod audit;
pub mod client;
pub mod config;
pub mod error;
pub mod input;
pub mod pool;
pub mod rescue;
pub mod ring;
pub mod stats;

pub use audit::{Auditor, ObjectTarget};
pub use config::{AuditorConfig, Opt};
pub use error::{Error, Result};
