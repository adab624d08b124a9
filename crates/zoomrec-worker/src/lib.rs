//! Worker side of zoomrec: keeps a mirror of the event store, claims the
//! occurrence that ends soonest, hands it to an action executor and releases
//! it afterwards.
//!
//! Coordination between workers happens only through the lease fields of the
//! event record. There is no lock; conflicting claims are detected by
//! re-reading the record and the loser yields.

mod claim;
mod config;
mod executor;
mod lifecycle;
mod sync;
mod worker;

pub use claim::{
    claim, confirm_lease, evaluate_claim, ClaimDecision, ClaimOutcome, ClaimRejection,
};
pub use config::WorkerConfig;
pub use executor::{ActionExecutor, ActionOutcome, ShellActionExecutor};
pub use lifecycle::{
    begin_processing, enter_postprocessing, has_further_occurrence, release, ReleaseOutcome,
};
pub use sync::{MergeReport, SyncMirror};
pub use worker::{CycleAction, CycleReport, EventWorker, WorkerSession};
