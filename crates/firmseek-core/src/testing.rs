//! Scripted clients shared by unit tests.

use crate::client::{FirmwareQuery, QueryOutcome};
use crate::config::DeviceTarget;
use crate::error::Result;
use crate::version::VersionBuild;
use std::sync::atomic::{AtomicU32, Ordering};

type Responder = Box<dyn Fn(&VersionBuild, u32) -> Result<QueryOutcome> + Send + Sync>;

/// Answers each query from a closure given the candidate and the 1-based
/// call number
pub(crate) struct FnClient {
    responder: Responder,
    calls: AtomicU32,
}

impl FnClient {
    pub(crate) fn new<F>(responder: F) -> Self
    where
        F: Fn(&VersionBuild, u32) -> Result<QueryOutcome> + Send + Sync + 'static,
    {
        Self {
            responder: Box::new(responder),
            calls: AtomicU32::new(0),
        }
    }

    pub(crate) fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

impl FirmwareQuery for FnClient {
    async fn query(&self, _target: &DeviceTarget, candidate: &VersionBuild) -> Result<QueryOutcome> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        (self.responder)(candidate, call)
    }
}

pub(crate) fn device(name: &str, version: &str) -> DeviceTarget {
    DeviceTarget {
        name: name.to_string(),
        device_id: format!("{}-id", name),
        serial_no: format!("{}-serial", name.to_uppercase()),
        initial_version: version.parse().unwrap(),
    }
}
