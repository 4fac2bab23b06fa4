//! landscape-placement — decides which host a new process lands on.
//!
//! Placement is deliberately simple: a caller-preferred host if it is
//! eligible, else the first eligible shared multi-process host, else a
//! freshly launched host. There is no cost-based ranking.
//!
//! # Components
//!
//! - **`eligibility`** — The host eligibility predicate and its constraints
//! - **`strategy`** — `EligibilityStrategy` (find an eligible host or launch one)
//! - **`launch`** — Launch a host and wait until it is running

pub mod eligibility;
pub mod launch;
pub mod strategy;

pub use eligibility::{EligibilityConstraints, Ineligibility, check_host, is_eligible};
pub use launch::launch_running_host;
pub use strategy::EligibilityStrategy;
