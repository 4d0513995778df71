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

use clap::{CommandFactory, Parser};
use ringaudit::client::HttpDirectClient;
use ringaudit::ring::DiskRings;
use ringaudit::stats::Reporter;
use ringaudit::{input, Auditor, AuditorConfig, Error, Opt};
use std::io::IsTerminal;
use std::process::ExitCode;
use std::sync::Arc;
use tracing::error;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> ExitCode {
    // Argument parse failures exit 2 via clap.
    let opt = Opt::parse();

    if opt.targets.is_empty() && opt.input.is_none() && std::io::stdin().is_terminal() {
        let _ = Opt::command().print_help();
        return ExitCode::from(2);
    }

    // Report lines go to stdout; diagnostics stay on stderr.
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let config = AuditorConfig::from(&opt);

    let ring = match DiskRings::open(&config.ring_dir) {
        Ok(ring) => Arc::new(ring),
        Err(err) => {
            error!(dir = %config.ring_dir.display(), %err, "failed to load rings");
            return ExitCode::FAILURE;
        }
    };
    let client = match HttpDirectClient::new() {
        Ok(client) => Arc::new(client),
        Err(err) => {
            error!(%err, "failed to build HTTP client");
            return ExitCode::FAILURE;
        }
    };
    let auditor = match Auditor::new(config, ring, client).await {
        Ok(auditor) => auditor,
        Err(err) => {
            error!(%err, "failed to initialize auditor");
            return ExitCode::FAILURE;
        }
    };

    let reporter = Reporter::start(Arc::clone(auditor.stats()));
    let outcome = input::run(&auditor, &opt).await;
    auditor.finish().await;
    reporter.stop().await;
    auditor.stats().print_snapshot();

    match outcome {
        Ok(()) => ExitCode::SUCCESS,
        Err(err @ Error::InvalidTarget(_)) => {
            error!(%err, "invalid audit target");
            ExitCode::from(2)
        }
        Err(err) => {
            error!(%err, "audit aborted");
            ExitCode::FAILURE
        }
    }
}
