//! Requests the agent sends to the client: file access and terminals.

pub mod fs;
pub mod terminal;

use serde::de::DeserializeOwned;
use serde_json::{json, Value};

use crate::protocol::client_ops::{
    CreateTerminalParams, CreateTerminalResult, ReadTextFileParams, ReadTextFileResult,
    TerminalIdParams, WriteTextFileParams,
};
use crate::protocol::methods;
use crate::rpc::message::codes;
use crate::{AppError, Result};

pub use terminal::TerminalManager;

/// JSON-RPC code for a missing file or terminal.
pub const RESOURCE_NOT_FOUND: i64 = -32_002;

/// Serves `fs/*` and `terminal/*` for one connection.
#[derive(Debug, Default)]
pub struct ClientOps {
    terminals: TerminalManager,
}

fn parse<T: DeserializeOwned>(method: &str, params: Value) -> Result<T> {
    serde_json::from_value(params)
        .map_err(|e| AppError::Protocol(format!("invalid {method} params: {e}")))
}

fn to_value<T: serde::Serialize>(value: &T) -> Result<Value> {
    serde_json::to_value(value).map_err(|e| AppError::Protocol(format!("unserialisable result: {e}")))
}

/// JSON-RPC error code for a failed client operation.
#[must_use]
pub fn error_code(err: &AppError) -> i64 {
    match err {
        AppError::Protocol(_) => codes::INVALID_PARAMS,
        AppError::NotFound(_) => RESOURCE_NOT_FOUND,
        AppError::Rpc { code, .. } => *code,
        _ => codes::INTERNAL_ERROR,
    }
}

impl ClientOps {
    /// Create with no running terminals.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether `method` is served here.
    #[must_use]
    pub fn handles(method: &str) -> bool {
        matches!(
            method,
            methods::FS_READ_TEXT_FILE
                | methods::FS_WRITE_TEXT_FILE
                | methods::TERMINAL_CREATE
                | methods::TERMINAL_OUTPUT
                | methods::TERMINAL_WAIT_FOR_EXIT
                | methods::TERMINAL_KILL
                | methods::TERMINAL_RELEASE
        )
    }

    /// Terminal registry.
    #[must_use]
    pub fn terminals(&self) -> &TerminalManager {
        &self.terminals
    }

    /// Serve one request and produce its result payload.
    ///
    /// # Errors
    ///
    /// - [`AppError::Protocol`] for malformed parameters.
    /// - [`AppError::NotFound`] for a missing file or terminal.
    /// - [`AppError::Io`] for other I/O failures.
    /// - [`AppError::Rpc`] with method-not-found for anything else.
    pub async fn handle(&self, method: &str, params: Value) -> Result<Value> {
        match method {
            methods::FS_READ_TEXT_FILE => {
                let params: ReadTextFileParams = parse(method, params)?;
                let content = fs::read_text_file(&params).await?;
                to_value(&ReadTextFileResult { content })
            }
            methods::FS_WRITE_TEXT_FILE => {
                let params: WriteTextFileParams = parse(method, params)?;
                fs::write_text_file(&params).await?;
                Ok(json!({}))
            }
            methods::TERMINAL_CREATE => {
                let params: CreateTerminalParams = parse(method, params)?;
                let terminal_id = self.terminals.create(&params)?;
                to_value(&CreateTerminalResult { terminal_id })
            }
            methods::TERMINAL_OUTPUT => {
                let params: TerminalIdParams = parse(method, params)?;
                to_value(&self.terminals.output(&params.terminal_id)?)
            }
            methods::TERMINAL_WAIT_FOR_EXIT => {
                let params: TerminalIdParams = parse(method, params)?;
                to_value(&self.terminals.wait_for_exit(&params.terminal_id).await?)
            }
            methods::TERMINAL_KILL => {
                let params: TerminalIdParams = parse(method, params)?;
                self.terminals.kill(&params.terminal_id)?;
                Ok(json!({}))
            }
            methods::TERMINAL_RELEASE => {
                let params: TerminalIdParams = parse(method, params)?;
                self.terminals.release(&params.terminal_id)?;
                Ok(json!({}))
            }
            other => Err(AppError::Rpc {
                code: codes::METHOD_NOT_FOUND,
                message: format!("method not found: {other}"),
            }),
        }
    }
}
