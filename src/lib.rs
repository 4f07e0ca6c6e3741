#![forbid(unsafe_code)]

//! JSON-RPC script runtime over stdio.
//!
//! Reads `execute` and `cancel` requests line by line, runs scripts one at a
//! time with per-execution cancellation, and writes one response line per
//! request.

pub mod config;
pub mod dispatcher;
pub mod errors;
pub mod execution;
pub mod protocol;
pub mod remote;
pub mod script;
pub mod session;
pub mod transport;

pub use config::RuntimeConfig;
pub use errors::{AppError, Result};
