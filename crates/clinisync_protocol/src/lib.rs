//! # ClinicSync Protocol
//!
//! Data model and codecs for the ClinicSync offline mutation queue.
//!
//! This crate provides:
//! - [`PendingOperation`], the unit of queued work, with its
//!   [`OperationKind`] and [`OperationStatus`] state machine
//! - [`FailureClass`] and [`LastError`] for failure diagnostics
//! - [`ConnectivityState`], [`ConnectivityTransition`] and [`SyncSnapshot`],
//!   the read-only signals consumed by UI indicators
//! - The versioned, checksummed queue image codec
//!
//! This is a pure data crate with no I/O operations.

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod error;
mod failure;
mod id;
mod image;
mod operation;
mod status;

pub use error::{CodecError, CodecResult};
pub use failure::{FailureClass, LastError};
pub use id::OperationId;
pub use image::{decode_image, encode_image, FORMAT_VERSION, IMAGE_MAGIC};
pub use operation::{Endpoint, HttpMethod, OperationKind, OperationStatus, PendingOperation};
pub use status::{ConnectivityState, ConnectivityTransition, SyncSnapshot};
