#![cfg_attr(docsrs, feature(doc_cfg))]
//! # pylonbms_lib
//!
//! This crate provides a library for polling Pylontech and SOK battery management systems through
//! a serial-to-TCP gateway and decoding their telemetry into a validated data model.
//!
//! The layers, from the wire up:
//!
//! - [`transport`]: one TCP connection per exchange, response assembly from a chunked stream.
//! - [`protocol`]: the ASCII-hex frame envelope and the command set.
//! - [`analog`]: the analog values decoder, which recovers the cell and temperature table layout
//!   from physical plausibility instead of trusting the count bytes.
//! - [`coordinator`]: the per-pack poll state machine caching the last good snapshot.
//!
//! [`client::PylonBms`] offers the individual commands as one-shot requests.
//!
//! ## Features
//!
//! - `default`: Enables `bin-dependencies`, which is intended for compiling the `pylonbms`
//!   command-line tool.
//! - `serde`: Enables `serde` support for serializing/deserializing the decoded data structures.
//! - `bin-dependencies`: Enables everything required by the `pylonbms` binary executable.

/// Contains error types for the library.
mod error;

pub mod alarm;
pub mod analog;
/// Asynchronous one-shot client.
pub mod client;
pub mod coordinator;
/// Defines the Pylontech frame envelope and command set.
pub mod protocol;
pub mod transport;

pub use error::Error;
