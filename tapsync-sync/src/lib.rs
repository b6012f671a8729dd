//! # tapsync-sync
//!
//! Upstream reconciliation and batch orchestration.
//!
//! Call [`Reconciler::reconcile`] to compute the update for one recipe,
//! [`pipeline::run`] to reconcile and write a whole tap, or [`trigger::handle`]
//! for a single `{package, version?}` request. [`Tap`] bundles all three
//! for a tap directory on disk.

pub mod diff;
pub mod error;
pub mod fetch;
pub mod hash;
pub mod pipeline;
pub mod reconcile;
pub mod status;
pub mod tap;
pub mod trigger;
pub mod upstream;
pub mod writer;

pub use error::{ErrorKind, ReconcileError, SyncError};
pub use fetch::{ArtifactFetcher, HttpFetcher, StaticFetcher};
pub use pipeline::{
    BatchOptions, BatchReport, BatchSummary, OutcomeStatus, PackageOutcome, Scope,
};
pub use reconcile::{Reconciler, Reconciliation};
pub use tap::Tap;
pub use trigger::TriggerEvent;
pub use upstream::{latest_version, IndexArtifact, PackageIndex, PypiIndex, StaticIndex};
