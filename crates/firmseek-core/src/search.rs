//! One device's search, end to end.
//!
//! Candidates are probed strictly one at a time: each outcome can move the
//! anchor, and the anchor decides the next candidate's build date.

use crate::anchor::{AnchorUpdate, SearchState};
use crate::backoff::BackoffController;
use crate::candidate::CandidateGenerator;
use crate::client::{FirmwareQuery, FirmwareRecord, QueryOutcome};
use crate::config::{DeviceTarget, SearchConfig, TransportErrorPolicy};
use crate::error::{Error, Result};
use crate::version::VersionBuild;
use tracing::{debug, info, trace};

/// An accepted candidate and the service's download descriptor for it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FoundFirmware {
    /// The accepted version
    pub version: VersionBuild,
    /// Record returned by the service
    pub record: FirmwareRecord,
}

/// Counters and hits from a completed search
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SearchReport {
    /// Device name
    pub device: String,
    /// Distinct candidates probed
    pub candidates: u64,
    /// HTTP requests issued, including throttled and retried ones
    pub requests: u64,
    /// Throttle cooldowns waited out
    pub throttled: u64,
    /// Candidates skipped after a transport error
    pub inconclusive: u64,
    /// Accepted candidates, in discovery order
    pub found: Vec<FoundFirmware>,
}

/// Drives one device's search to completion
#[derive(Debug)]
pub struct SearchOrchestrator<'a, Q> {
    target: &'a DeviceTarget,
    client: Q,
    backoff: BackoffController,
    generator: CandidateGenerator,
    state: SearchState,
    transport_policy: TransportErrorPolicy,
}

impl<'a, Q: FirmwareQuery> SearchOrchestrator<'a, Q> {
    /// Prepares a search for `target` using `client` for every probe
    pub fn new(target: &'a DeviceTarget, client: Q, config: &SearchConfig) -> Self {
        let initial = &target.initial_version;
        Self {
            target,
            client,
            backoff: BackoffController::from_config(config),
            generator: CandidateGenerator::new(initial.triple, config.date_horizon_days),
            state: SearchState::new(initial),
            transport_policy: config.transport_error_policy,
        }
    }

    /// Current search state
    pub fn state(&self) -> &SearchState {
        &self.state
    }

    /// Probes every candidate the generator yields.
    ///
    /// Does not stop at the first hit. Protocol violations, malformed
    /// payloads and (under [`TransportErrorPolicy::Abort`]) transport errors
    /// end the search with an error.
    pub async fn run(mut self) -> Result<SearchReport> {
        let device = self.target.name.as_str();
        info!(
            device,
            serial = self.target.serial_no.as_str(),
            max_candidates = self.generator.max_candidates(),
            "Fuzzing versions for device {} with serial {} starting from {}",
            self.target.device_id,
            self.target.serial_no,
            self.target.initial_version
        );

        let mut report = SearchReport {
            device: device.to_string(),
            ..SearchReport::default()
        };

        while let Some(candidate) = self.generator.next_candidate(&mut self.state) {
            trace!(device, candidate = %candidate, "probing");
            report.candidates += 1;

            loop {
                let exchange = self
                    .backoff
                    .execute(&self.client, self.target, &candidate)
                    .await?;
                report.requests += u64::from(exchange.attempts);
                report.throttled += u64::from(exchange.throttled());

                if let AnchorUpdate::Found { previous, anchor } =
                    self.state.observe(&candidate, &exchange.outcome)
                {
                    debug!(device, previous = %previous, anchor = %anchor, "re-anchored date window");
                }

                match exchange.outcome {
                    QueryOutcome::Found(record) => {
                        report.found.push(FoundFirmware {
                            version: candidate,
                            record,
                        });
                    }
                    // The backoff controller never hands back a throttle.
                    QueryOutcome::NotFound | QueryOutcome::Throttled(_) => {}
                    QueryOutcome::TransportError(status) => match self.transport_policy {
                        TransportErrorPolicy::Skip => report.inconclusive += 1,
                        TransportErrorPolicy::Retry => continue,
                        TransportErrorPolicy::Abort => {
                            return Err(Error::TransportFailure { status })
                        }
                    },
                    QueryOutcome::Malformed(payload) => {
                        return Err(Error::malformed_payload(payload));
                    }
                }
                break;
            }
        }

        info!(
            device,
            candidates = report.candidates,
            requests = report.requests,
            throttled = report.throttled,
            inconclusive = report.inconclusive,
            found = report.found.len(),
            "search exhausted"
        );
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{device, FnClient};
    use crate::version::VersionTriple;
    use pretty_assertions::assert_eq;
    use std::collections::HashSet;
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    fn fast_config(horizon: u32) -> SearchConfig {
        SearchConfig::new()
            .date_horizon_days(horizon)
            .courtesy_delay(Duration::ZERO)
            .throttle_cooldown(Duration::ZERO)
    }

    fn version(s: &str) -> VersionBuild {
        s.parse().unwrap()
    }

    #[tokio::test]
    async fn test_reports_hit_and_keeps_scanning() {
        let target = device("ball-ft", "V5.7.9 build 220520");
        let hit = version("V5.7.9 build 220517");
        let probed = Arc::new(Mutex::new(HashSet::new()));

        let seen = Arc::clone(&probed);
        let client = FnClient::new(move |candidate, _| {
            seen.lock().unwrap().insert(candidate.to_string());
            if *candidate == hit {
                Ok(QueryOutcome::Found(FirmwareRecord {
                    code: "0".to_string(),
                    file_name: Some("digicap.dav".to_string()),
                    ..FirmwareRecord::default()
                }))
            } else {
                Ok(QueryOutcome::NotFound)
            }
        });

        let report = SearchOrchestrator::new(&target, client, &fast_config(730))
            .run()
            .await
            .unwrap();

        assert_eq!(report.found.len(), 1);
        assert_eq!(report.found[0].version, hit);
        assert_eq!(
            report.found[0].record.file_name.as_deref(),
            Some("digicap.dav")
        );
        assert_eq!(report.candidates, 6 * 8 * 10 * 730);
        assert_eq!(report.requests, report.candidates);

        // Lower triples start their window at the found date.
        let probed = probed.lock().unwrap();
        assert!(probed.contains("V5.7.8 build 220517"));
        assert!(!probed.contains("V5.7.8 build 220520"));
        assert!(probed.contains("V0.0.0 build 220517"));
    }

    #[tokio::test]
    async fn test_transport_error_skip_policy() {
        let target = device("cam", "V0.0.1 build 240110");
        let client = FnClient::new(|candidate, _| {
            if candidate.build_code() == "240110" {
                Ok(QueryOutcome::TransportError(502))
            } else {
                Ok(QueryOutcome::NotFound)
            }
        });

        let report = SearchOrchestrator::new(&target, client, &fast_config(3))
            .run()
            .await
            .unwrap();

        assert_eq!(report.candidates, 6);
        assert_eq!(report.inconclusive, 2);
        assert!(report.found.is_empty());
    }

    #[tokio::test]
    async fn test_transport_error_retry_policy() {
        let target = device("cam", "V0.0.0 build 240110");
        let client = FnClient::new(|_, call| {
            if call <= 2 {
                Ok(QueryOutcome::TransportError(500))
            } else {
                Ok(QueryOutcome::NotFound)
            }
        });
        let config = fast_config(2).transport_error_policy(TransportErrorPolicy::Retry);

        let report = SearchOrchestrator::new(&target, client, &config)
            .run()
            .await
            .unwrap();

        assert_eq!(report.candidates, 2);
        assert_eq!(report.requests, 4);
        assert_eq!(report.inconclusive, 0);
    }

    #[tokio::test]
    async fn test_transport_error_abort_policy() {
        let target = device("cam", "V0.0.0 build 240110");
        let client = FnClient::new(|_, _| Ok(QueryOutcome::TransportError(403)));
        let config = fast_config(2).transport_error_policy(TransportErrorPolicy::Abort);

        let err = SearchOrchestrator::new(&target, client, &config)
            .run()
            .await
            .unwrap_err();

        assert!(matches!(err, Error::TransportFailure { status: 403 }));
    }

    #[tokio::test]
    async fn test_malformed_payload_is_fatal() {
        let target = device("cam", "V1.0.0 build 240110");
        let client = FnClient::new(|_, call| {
            if call == 3 {
                Ok(QueryOutcome::Malformed("{\"code\":\"000\"}".to_string()))
            } else {
                Ok(QueryOutcome::NotFound)
            }
        });

        let err = SearchOrchestrator::new(&target, client, &fast_config(5))
            .run()
            .await
            .unwrap_err();

        assert!(matches!(err, Error::MalformedPayload { .. }));
    }

    #[tokio::test(start_paused = true)]
    async fn test_throttles_are_counted() {
        let target = device("cam", "V0.0.0 build 240110");
        let client = FnClient::new(|_, call| {
            if call == 1 {
                Ok(QueryOutcome::Throttled("请求过于频繁".to_string()))
            } else {
                Ok(QueryOutcome::NotFound)
            }
        });

        let config = SearchConfig::new().date_horizon_days(2);
        let report = SearchOrchestrator::new(&target, client, &config)
            .run()
            .await
            .unwrap();

        assert_eq!(report.candidates, 2);
        assert_eq!(report.requests, 3);
        assert_eq!(report.throttled, 1);
    }

    #[test]
    fn test_initial_state() {
        let target = device("cam", "V2.1.0 build 240110");
        let client = FnClient::new(|_, _| Ok(QueryOutcome::NotFound));
        let search = SearchOrchestrator::new(&target, client, &fast_config(1));

        assert_eq!(search.state().current_triple(), VersionTriple::new(2, 1, 0));
        assert_eq!(
            search.state().anchor_date(),
            target.initial_version.build_date
        );
    }
}
