//! # ClinicSync Testkit
//!
//! Test utilities for ClinicSync.
//!
//! This crate provides:
//! - A scripted fake backend with idempotent apply and a call log
//! - Engine fixtures and payload builders
//! - Property-based test generators using proptest
//! - Crash simulation for queue persistence
//!
//! ## Usage
//!
//! ```rust,ignore
//! use clinisync_testkit::prelude::*;
//!
//! #[tokio::test]
//! async fn replays_after_reconnect() {
//!     let engine = TestEngine::offline();
//!     let (kind, payload) = payloads::clock_in("e1");
//!     engine.submit(kind, payload).unwrap();
//!     // ... reconnect and drive
//! }
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod backend;
pub mod crash;
pub mod fixtures;
pub mod generators;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::backend::*;
    pub use crate::fixtures::*;
    pub use crate::generators::*;
}

pub use backend::*;
pub use fixtures::*;
pub use generators::*;
