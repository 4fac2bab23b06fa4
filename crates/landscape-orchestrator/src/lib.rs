//! landscape-orchestrator — replica set lifecycle.
//!
//! Each operation is a sequential, non-transactional workflow over the
//! collaborator traits of `landscape-core`. A failure halts the workflow
//! and leaves the replica set in the last state it reached.
//!
//! # Components
//!
//! - **`repository`** — Assembles a `ReplicaSet` snapshot per call
//! - **`locks`** — Per-replica-set mutual exclusion
//! - **`orchestrator`** — Create, deploy, replica and host operations
//! - **`upgrade`** — Release upgrade state machine
//! - **`archive`** — Archival state machine
//! - **`remove`** — Ordered teardown

pub mod archive;
pub mod locks;
pub mod orchestrator;
pub mod remove;
pub mod repository;
pub mod upgrade;

pub use archive::{ArchiveOutcome, ArchivePhase, ArchiveRequest, Comparison, Decommission};
pub use locks::ReplicaSetLocks;
pub use orchestrator::{
    Collaborators, CreateReplicaSetRequest, ImageUpdate, ReplicaRequest, ReplicaSetOrchestrator,
    SharedHostRequest,
};
pub use remove::RemovalReport;
pub use repository::ReplicaSetRepository;
pub use upgrade::{UpgradePhase, UpgradeReport, UpgradeRequest};
