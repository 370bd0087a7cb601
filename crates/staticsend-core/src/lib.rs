//! Core domain types shared by the staticsend crates.
//!
//! Provides the delivery job model, strongly-typed identifiers, outcome
//! reports handed to persistence, and the clock abstraction that lets the
//! admission controller and the dispatcher run against virtual time in tests.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod error;
pub mod models;
pub mod time;

pub use error::{CoreError, Result};
pub use models::{DeliveryJob, DeliveryOutcome, JobId, JobStatus, OutcomeReport};
pub use time::{Clock, RealClock, TestClock};
