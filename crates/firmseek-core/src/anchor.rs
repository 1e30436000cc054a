//! Per-device search state and the anchor update rule.

use crate::client::QueryOutcome;
use crate::version::{VersionBuild, VersionTriple};
use chrono::NaiveDate;

/// Mutable state of one device's search.
///
/// Owned by the orchestrator and lent to the candidate generator, so two
/// devices never share an anchor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchState {
    anchor_date: NaiveDate,
    current_triple: VersionTriple,
}

/// Result of feeding an outcome to [`SearchState::observe`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AnchorUpdate {
    /// The candidate was accepted; the anchor now points at its build date
    Found {
        /// Anchor before the update
        previous: NaiveDate,
        /// Anchor after the update
        anchor: NaiveDate,
    },
    /// Nothing learned
    Unchanged,
}

impl SearchState {
    /// Starts a search at the device's last known-good version
    pub fn new(initial: &VersionBuild) -> Self {
        Self {
            anchor_date: initial.build_date,
            current_triple: initial.triple,
        }
    }

    /// Most recent build date known to be accepted
    pub fn anchor_date(&self) -> NaiveDate {
        self.anchor_date
    }

    /// Triple currently being probed
    pub fn current_triple(&self) -> VersionTriple {
        self.current_triple
    }

    pub(crate) fn enter_triple(&mut self, triple: VersionTriple) {
        debug_assert!(triple <= self.current_triple, "triples only descend");
        self.current_triple = triple;
    }

    /// Applies one classified outcome for `candidate`.
    ///
    /// Only a found outcome moves the anchor. Applying the same found
    /// outcome again leaves the anchor where the first application put it.
    pub fn observe(&mut self, candidate: &VersionBuild, outcome: &QueryOutcome) -> AnchorUpdate {
        match outcome {
            QueryOutcome::Found(_) => {
                let previous = self.anchor_date;
                self.anchor_date = candidate.build_date;
                AnchorUpdate::Found {
                    previous,
                    anchor: self.anchor_date,
                }
            }
            _ => AnchorUpdate::Unchanged,
        }
    }
}
