//! # firmseek-core
//!
//! Adaptive search for firmware version identifiers that a vendor's
//! firmware-lookup service accepts for a given device.
//!
//! Starting from a known-good version, the search walks every lower
//! `(major, minor, patch)` triple and, for each, a window of build dates
//! counting back from the most recent accepted date. Every accepted
//! candidate re-anchors the date window for the rest of the search.
//!
//! ## Architecture
//!
//! - [`candidate`]: candidate enumeration
//! - [`anchor`]: per-device search state
//! - [`client`]: HTTP query and response classification
//! - [`backoff`]: throttle retries and courtesy pacing
//! - [`search`]: one device's search loop
//! - [`coordinator`]: concurrent searches across devices
//! - [`config`]: device targets and tuning
//! - [`xor`]: rotating-key transform for downloaded images
//! - [`error`]: error types
//!
//! ## Example
//!
//! ```no_run
//! use firmseek_core::{Config, HttpQueryClient, RunCoordinator};
//!
//! # async fn run() -> firmseek_core::Result<()> {
//! let config = Config::from_path("devices.yaml")?;
//! let coordinator = RunCoordinator::from_config(&config);
//! let summary = coordinator
//!     .run(|target| HttpQueryClient::new(config.endpoint.as_str(), target))
//!     .await;
//! println!("{} hits", summary.found_count());
//! # Ok(())
//! # }
//! ```
//!
//! ## Extensibility
//!
//! [`FirmwareQuery`] is the seam between the search and the network;
//! implement it to point the search at a different transport.

#![deny(unsafe_code)]
#![warn(missing_docs, rust_2018_idioms, unreachable_pub)]

pub mod anchor;
pub mod backoff;
pub mod candidate;
pub mod client;
pub mod config;
pub mod coordinator;
pub mod error;
pub mod search;
pub mod version;
pub mod xor;

#[cfg(test)]
mod testing;

// Re-export primary types for convenience
pub use anchor::{AnchorUpdate, SearchState};
pub use backoff::{BackoffController, Exchange};
pub use candidate::{CandidateGenerator, Candidates};
pub use client::{classify, FirmwareQuery, FirmwareRecord, HttpQueryClient, QueryOutcome};
pub use config::{Config, DeviceTarget, SearchConfig, TransportErrorPolicy};
pub use coordinator::{DeviceRun, RunCoordinator, RunSummary};
pub use error::{Error, Result};
pub use search::{FoundFirmware, SearchOrchestrator, SearchReport};
pub use version::{VersionBuild, VersionTriple};
pub use xor::{transform, transform_file, RotatingKey};

/// Crate version for programmatic access
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
