//! Parameters and results for requests the agent sends to the client.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// `fs/read_text_file` parameters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReadTextFileParams {
    /// Requesting session.
    #[serde(default)]
    pub session_id: String,
    /// Absolute file path.
    pub path: PathBuf,
    /// 1-based first line to return.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub line: Option<u32>,
    /// Maximum number of lines to return.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub limit: Option<u32>,
}

/// `fs/read_text_file` result.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReadTextFileResult {
    /// File contents, possibly a line window.
    pub content: String,
}

/// `fs/write_text_file` parameters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WriteTextFileParams {
    /// Requesting session.
    #[serde(default)]
    pub session_id: String,
    /// Absolute file path.
    pub path: PathBuf,
    /// Full replacement contents.
    pub content: String,
}

/// One environment variable for a terminal command.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnvVariable {
    /// Variable name.
    pub name: String,
    /// Variable value.
    pub value: String,
}

/// `terminal/create` parameters.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateTerminalParams {
    /// Requesting session.
    #[serde(default)]
    pub session_id: String,
    /// Program to run.
    pub command: String,
    /// Program arguments.
    #[serde(default)]
    pub args: Vec<String>,
    /// Extra environment.
    #[serde(default)]
    pub env: Vec<EnvVariable>,
    /// Working directory.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cwd: Option<PathBuf>,
    /// Keep at most this many bytes of output, dropping the oldest.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_byte_limit: Option<u64>,
}

/// `terminal/create` result.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateTerminalResult {
    /// Opaque terminal id.
    pub terminal_id: String,
}

/// Parameters shared by `terminal/output`, `wait_for_exit`, `kill`, and `release`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TerminalIdParams {
    /// Requesting session.
    #[serde(default)]
    pub session_id: String,
    /// Terminal id from `terminal/create`.
    pub terminal_id: String,
}

/// How a terminal command ended.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TerminalExitStatus {
    /// Exit code, if the command exited normally.
    pub exit_code: Option<i32>,
    /// Signal name, if the command was killed by one.
    pub signal: Option<String>,
}

impl TerminalExitStatus {
    /// Whether the command exited with code 0.
    #[must_use]
    pub fn success(&self) -> bool {
        self.exit_code == Some(0)
    }
}

/// `terminal/output` result.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TerminalOutputResult {
    /// Captured output.
    pub output: String,
    /// Whether older output was dropped to honour the byte limit.
    pub truncated: bool,
    /// Exit status once the command has ended.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exit_status: Option<TerminalExitStatus>,
}
