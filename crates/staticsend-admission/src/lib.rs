//! Per-key admission control using continuously refilled token buckets.
//!
//! Each admission key (typically a client address) owns a bucket holding at
//! most `burst` permits. A permit is refilled every `rate` interval, so a key
//! can spend `burst` permits instantly and then one per interval. Buckets are
//! created lazily and purged once they have been idle longer than the
//! staleness window, keeping memory bounded under a churning key population.
//!
//! # Example
//!
//! ```
//! use std::time::Duration;
//!
//! use staticsend_admission::{AdmissionConfig, AdmissionController};
//!
//! let controller = AdmissionController::new(AdmissionConfig::new(Duration::from_secs(1), 2))?;
//!
//! assert!(controller.check("203.0.113.7"));
//! assert!(controller.check("203.0.113.7"));
//! assert!(!controller.check("203.0.113.7"));
//! # Ok::<(), staticsend_admission::AdmissionError>(())
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod bucket;
pub mod client_key;
pub mod config;
pub mod controller;
pub mod error;

pub use bucket::TokenBucket;
pub use client_key::resolve_client_key;
pub use config::AdmissionConfig;
pub use controller::{AdmissionController, AdmissionDecision, Quota};
pub use error::{AdmissionError, Result};
