//! JSON-RPC 2.0 correlation client.

pub mod client;
pub mod message;

pub use client::RpcClient;
pub use message::{Notification, RequestId, RpcErrorObject, ServerRequest};
