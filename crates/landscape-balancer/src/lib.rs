//! landscape-balancer — puts a replica set behind a load balancer.
//!
//! Wiring creates (or reuses) the master and public target groups,
//! routes the replica set's hostname to them through listener rules on a
//! DNS-mapped or the region's dynamic load balancer, and optionally adds
//! an auto-scaling group that launches replicas into the public target group.
//!
//! # Components
//!
//! - **`rules`** — Listener rules for a hostname
//! - **`setup`** — `LoadBalancingSetup::wire`

pub mod rules;
pub mod setup;

pub use rules::hostname_rules;
pub use setup::{
    LoadBalancerMapping, LoadBalancingOptions, LoadBalancingSetup, ReplicaBaseline,
    WiredLoadBalancing,
};
