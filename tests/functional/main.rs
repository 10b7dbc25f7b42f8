// Test code is allowed to panic on failure
#![allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::indexing_slicing,
    clippy::panic
)]

//! Functional tests for the startup sequence and the client strategies.
//!
//! These tests run the real bootstrap code against an in-process fake API
//! server, so no live Kubernetes cluster is required.
//!
//! ```bash
//! # Run all functional tests
//! cargo test --test functional
//!
//! # Run specific test
//! cargo test --test functional test_in_cluster_startup_and_shutdown
//! ```
//!
//! ## Test Categories
//!
//! - **Startup tests**: the ordered sequence, fatal registration failures
//!   and signal-driven shutdown
//! - **Leader tests**: waiting behind another holder, losing the lease and
//!   releasing it on a clean stop
//! - **Client tests**: read-after-write through the uncached client and the
//!   staleness window of the cached one

mod fake_api_server;
mod leader_tests;

pub use fake_api_server::*;

use std::time::Duration;

/// Poll `condition` until it holds, failing the test after ten seconds.
pub async fn wait_for(what: &str, mut condition: impl FnMut() -> bool) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(10);
    while !condition() {
        assert!(
            tokio::time::Instant::now() < deadline,
            "timed out waiting for {what}"
        );
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
}
