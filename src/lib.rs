//! gitopscluster-operator library crate
//!
//! Controller-manager bootstrap for the GitOpsCluster resource: environment
//! detection, the filtered watch cache, the uncached client, scheme and
//! controller registration, leader election and the run loop.

pub mod bootstrap;
pub mod cache;
pub mod client;
pub mod cluster_registry;
pub mod controller;
pub mod crd;
pub mod environment;
pub mod health;
pub mod manager;
pub mod options;
pub mod scheme;
pub mod selectors;
pub mod signals;

pub use bootstrap::{Startup, StartupError, run_manager};
pub use environment::Environment;
pub use health::HealthState;
pub use manager::{Manager, ManagerConfig, Settings};
pub use options::Options;
