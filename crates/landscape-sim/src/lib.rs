//! landscape-sim — an in-memory landscape.
//!
//! [`SimLandscape`] implements every collaborator trait of `landscape-core`
//! on one shared state: hosts, processes, target groups, load balancers,
//! auto-scaling groups, DNS, images, releases, remote servers and
//! databases. Each trait call is appended to a call log so tests can
//! assert ordering, and any operation can be made to fail once.
//!
//! Auto-scaling groups are live: raising the minimum size launches hosts
//! running a replica from the launch configuration, and those hosts join
//! the group's target group once their replica answers ready. A terminated
//! group host is replaced.
//!
//! # Components
//!
//! - **`state`** — Shared state, call log and failure injection
//! - **`cloud`** — `CloudLandscape`
//! - **`agent`** — `ProcessAgent`, `ReleaseRepository`, `DatabaseArchiver`, `AccessTokenSource`
//! - **`remote`** — `RemoteServer` and its factory

mod agent;
mod cloud;
mod remote;
mod state;

pub use remote::SimRemoteServer;
pub use state::{ArchivedDatabase, Deregistration, SimCall, SimLandscape};
