//! Concurrent searches across devices.
//!
//! Each device gets its own client (and so its own connection pool) and its
//! own search state. A device that fails is logged and reported; the others
//! keep going.

use crate::client::FirmwareQuery;
use crate::config::{Config, DeviceTarget, SearchConfig};
use crate::error::Result;
use crate::search::{SearchOrchestrator, SearchReport};
use futures::future::join_all;
use tracing::{error, info};

/// How one device's search ended
#[derive(Debug)]
pub struct DeviceRun {
    /// Device name
    pub device: String,
    /// Report on success, the fatal error otherwise
    pub result: Result<SearchReport>,
}

/// Per-device results of a coordinated run, in configuration order
#[derive(Debug, Default)]
pub struct RunSummary {
    /// One entry per device
    pub runs: Vec<DeviceRun>,
}

impl RunSummary {
    /// Runs that ended in an error
    pub fn failed(&self) -> impl Iterator<Item = &DeviceRun> {
        self.runs.iter().filter(|run| run.result.is_err())
    }

    /// True if every device's search completed
    pub fn all_succeeded(&self) -> bool {
        self.failed().next().is_none()
    }

    /// Total accepted candidates across devices
    pub fn found_count(&self) -> usize {
        self.runs
            .iter()
            .filter_map(|run| run.result.as_ref().ok())
            .map(|report| report.found.len())
            .sum()
    }
}

/// Launches one search per device and waits for all of them
#[derive(Debug, Clone)]
pub struct RunCoordinator {
    targets: Vec<DeviceTarget>,
    search: SearchConfig,
}

impl RunCoordinator {
    /// Creates a coordinator over `targets`
    pub fn new(targets: Vec<DeviceTarget>, search: SearchConfig) -> Self {
        Self { targets, search }
    }

    /// Creates a coordinator over every device in `config`
    pub fn from_config(config: &Config) -> Self {
        Self::new(config.devices.clone(), config.search.clone())
    }

    /// Devices this coordinator will search
    pub fn targets(&self) -> &[DeviceTarget] {
        &self.targets
    }

    /// Runs every search concurrently.
    ///
    /// `connect` builds a fresh client per device. Failing to build one counts
    /// as that device's failure.
    pub async fn run<Q, F>(&self, connect: F) -> RunSummary
    where
        Q: FirmwareQuery,
        F: Fn(&DeviceTarget) -> Result<Q>,
    {
        let connect = &connect;
        let searches = self.targets.iter().map(move |target| async move {
            let result = match connect(target) {
                Ok(client) => {
                    SearchOrchestrator::new(target, client, &self.search)
                        .run()
                        .await
                }
                Err(err) => Err(err),
            };

            match &result {
                Ok(report) => info!(
                    device = target.name.as_str(),
                    found = report.found.len(),
                    candidates = report.candidates,
                    "device search complete"
                ),
                Err(err) => error!(
                    device = target.name.as_str(),
                    recoverable = err.is_recoverable(),
                    "Error fuzzing {}: {}",
                    target.name,
                    err
                ),
            }

            DeviceRun {
                device: target.name.clone(),
                result,
            }
        });

        RunSummary {
            runs: join_all(searches).await,
        }
    }
}
