//! landscape-core — shared model for application replica-set orchestration.
//!
//! Holds the in-memory projection of cloud resources (hosts, processes,
//! target groups, auto-scaling groups, load balancers, DNS records), the
//! immutable application configurations handed to deployments, the error
//! taxonomy shared by every crate, and the collaborator traits through which
//! the orchestrator talks to the outside world.
//!
//! # Components
//!
//! - **`types`** — Domain types (`Host`, `Process`, `TargetGroup`, `ReplicaSet`, ...)
//! - **`configuration`** — Master/replica application configurations
//! - **`config`** — `landscape.toml` parser (timeouts, naming, ports)
//! - **`error`** — `LandscapeError` taxonomy
//! - **`provider`** — Collaborator traits (cloud, process agent, remote server, ...)

pub mod config;
pub mod configuration;
pub mod error;
pub mod provider;
pub mod types;

pub use config::{LandscapeConfig, NamingConfig, PortsConfig, Timeouts, parse_duration};
pub use configuration::{ApplicationConfiguration, MemorySizing, ReplicationSettings};
pub use error::{LandscapeError, LandscapeResult};
pub use provider::*;
pub use types::*;
