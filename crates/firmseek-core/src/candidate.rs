//! Candidate enumeration.
//!
//! Vendors ship monotonically, so the search walks down from the last
//! known-good version: every `(major, minor, patch)` from the initial triple
//! to `0.0.0`, and for each triple a window of build dates counting back one
//! day at a time from the current anchor.
//!
//! The anchor is read from [`SearchState`] on every step rather than
//! captured once, so a hit re-anchors the remainder of the search.

use crate::anchor::SearchState;
use crate::version::{VersionBuild, VersionTriple};
use chrono::{Days, NaiveDate};

#[derive(Debug, Clone, Copy)]
struct Cursor {
    triple: VersionTriple,
    offset: u32,
}

/// Lazy, finite, non-restartable candidate sequence for one device
#[derive(Debug, Clone)]
pub struct CandidateGenerator {
    ceiling: VersionTriple,
    horizon_days: u32,
    cursor: Option<Cursor>,
}

impl CandidateGenerator {
    /// Starts at `initial` and probes `horizon_days` dates per triple
    pub fn new(initial: VersionTriple, horizon_days: u32) -> Self {
        Self {
            ceiling: initial,
            horizon_days,
            cursor: Some(Cursor {
                triple: initial,
                offset: 0,
            }),
        }
    }

    /// Upper bound on the number of candidates this generator can yield
    pub fn max_candidates(&self) -> u64 {
        self.ceiling.descent_len() * u64::from(self.horizon_days)
    }

    /// Yields the next candidate, or `None` once every triple's window is spent.
    ///
    /// Records the candidate's triple in `state` before returning it.
    pub fn next_candidate(&mut self, state: &mut SearchState) -> Option<VersionBuild> {
        loop {
            let cursor = self.cursor.as_mut()?;

            if cursor.offset >= self.horizon_days {
                self.cursor = cursor.triple.step_down(&self.ceiling).map(|triple| Cursor {
                    triple,
                    offset: 0,
                });
                continue;
            }

            let offset = cursor.offset;
            cursor.offset += 1;

            // Window runs off the calendar: the rest of this triple is empty.
            let Some(date) = state
                .anchor_date()
                .checked_sub_days(Days::new(u64::from(offset)))
            else {
                cursor.offset = self.horizon_days;
                continue;
            };

            let triple = cursor.triple;
            state.enter_triple(triple);
            return Some(VersionBuild::new(triple, date));
        }
    }

    /// Iterates with a fixed anchor, for previews that never observe outcomes
    pub fn with_fixed_anchor(self, anchor: NaiveDate) -> Candidates {
        let state = SearchState::new(&VersionBuild::new(self.ceiling, anchor));
        Candidates {
            generator: self,
            state,
        }
    }
}

/// Iterator over a generator whose anchor never moves
#[derive(Debug, Clone)]
pub struct Candidates {
    generator: CandidateGenerator,
    state: SearchState,
}

impl Iterator for Candidates {
    type Item = VersionBuild;

    fn next(&mut self) -> Option<Self::Item> {
        self.generator.next_candidate(&mut self.state)
    }
}
