//! Test doubles and harness for the staticsend crates.
//!
//! Provides a scriptable transport, a sink that records outcomes and lets
//! tests wait on them, and a harness that wires both into a dispatcher
//! running on virtual time.

#![warn(missing_docs)]
#![forbid(unsafe_code)]

pub mod harness;
pub mod sink;
pub mod transport;

pub use harness::{DispatcherHarness, HarnessBuilder};
pub use sink::RecordingSink;
pub use staticsend_core::TestClock;
pub use transport::{MockResponse, MockTransport, RecordedAttempt};

/// Installs a test log writer filtered by `RUST_LOG`, defaulting to errors
/// only. Safe to call from every test.
pub fn init_test_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("error")),
        )
        .with_test_writer()
        .try_init();
}
