//! End-to-end tests for plate-verifier.
//!
//! Each test starts a real service on an ephemeral port and talks to it over
//! HTTP and WebSocket, exactly as detectors and dashboards do.
//!
//! ```bash
//! cargo test --test e2e
//! ```

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

mod ledger;

mod pipeline_tests;
mod session_tests;

pub use harness::{default_registry, local_config, HarnessError, TestHarness, WsClient};
pub use ledger::TestLedger;
