#![forbid(unsafe_code)]

//! Session protocol layer for AI coding agents running as subprocesses.

pub mod backend;
pub mod client_ops;
pub mod config;
pub mod connection;
pub mod errors;
pub mod hub;
pub mod mode;
pub mod permission;
pub mod protocol;
pub mod router;
pub mod rpc;
pub mod session;
pub mod transport;

pub use config::ClientConfig;
pub use errors::{AppError, Result};
