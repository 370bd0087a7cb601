//! Asynchronous notification delivery with bounded buffering and retries.
//!
//! Callers hand jobs to a [`DeliveryDispatcher`] and return immediately; a
//! fixed pool of workers delivers them through a [`Transport`] and reports
//! each job's terminal outcome to a [`PersistenceSink`].
//!
//! # Architecture
//!
//! 1. **Submit** - `enqueue` validates the job and pushes it into a bounded
//!    FIFO buffer, failing fast with `QueueFull` instead of waiting
//! 2. **Attempt** - a worker pops the job and calls the transport under an
//!    attempt timeout
//! 3. **Retry** - retryable failures wait out the backoff in a tracked task
//!    and re-enter the buffer at the tail
//! 4. **Report** - delivery, exhausted retries, or a permanent rejection is
//!    handed to the sink exactly once
//!
//! Shutdown stops submissions, cancels pending retries, drains the buffer,
//! and waits for the workers within a timeout.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use staticsend_delivery::{
//!     DeliveryDispatcher, DeliveryError, DispatcherConfig, DryRunTransport, TracingSink,
//! };
//!
//! # async fn example() -> Result<(), DeliveryError> {
//! let dispatcher = DeliveryDispatcher::new(
//!     DispatcherConfig::default(),
//!     Arc::new(DryRunTransport::new()),
//!     Arc::new(TracingSink::new()),
//! )?;
//!
//! dispatcher.start().await?;
//! dispatcher.enqueue(["owner@example.com"], "Hello", "A new message")?;
//! dispatcher.shutdown().await?;
//! # Ok(())
//! # }
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod dispatcher;
pub mod error;
mod queue;
pub mod retry;
pub mod sink;
pub mod transport;
mod worker;
mod worker_pool;

pub use dispatcher::{DeliveryDispatcher, DispatcherConfig, DispatcherStats};
pub use error::{DeliveryError, ErrorCategory, Result, TransportError};
pub use retry::{BackoffStrategy, RetryPolicy};
pub use sink::{PersistenceSink, TracingSink};
pub use transport::{DryRunTransport, Transport};

/// Default number of concurrent delivery workers.
pub const DEFAULT_WORKER_COUNT: usize = 5;

/// Default capacity of the job buffer.
pub const DEFAULT_QUEUE_CAPACITY: usize = 100;

/// Default number of retries after the first attempt.
pub const DEFAULT_MAX_RETRIES: u32 = 3;

/// Default deadline for a single transport attempt in seconds.
pub const DEFAULT_ATTEMPT_TIMEOUT_SECONDS: u64 = 30;

/// Default time allowed for a graceful shutdown in seconds.
pub const DEFAULT_SHUTDOWN_TIMEOUT_SECONDS: u64 = 30;
