//! landscape-deploy — turn an application configuration into a ready process.
//!
//! # Components
//!
//! - **`procedure`** — `DeploymentProcedure` (new host, existing host, refresh, teardown)
//! - **`slot`** — Free port/directory selection on a host

pub mod procedure;
pub mod slot;

pub use procedure::{DeploymentProcedure, HostSpec};
pub use slot::allocate_slot;
