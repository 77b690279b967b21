//! Backend protocol selection: which wire protocol an agent speaks.
//!
//! `BackendKind` is selected by the `--backend` CLI flag, an environment
//! override, or the `backend` config key. Resolution happens once, at
//! construction time: an unsupported selector is a [`AppError::Config`]
//! error, never a silent fallback.

use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::{AppError, Result};

/// Environment variable that overrides the configured backend.
pub const BACKEND_ENV_VAR: &str = "AGENT_CONDUIT_BACKEND";

/// Wire protocol spoken by an agent process.
///
/// Defaults to [`BackendKind::Acp`].
#[derive(Debug, Copy, Clone, Default, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackendKind {
    /// Agent Client Protocol over JSON-RPC; many sessions per process.
    #[default]
    Acp,
    /// Codex app-server JSON-RPC protocol; one process per session.
    Codex,
    /// Direct line-delimited stream-json CLI protocol; one process per session.
    Claude,
}

impl BackendKind {
    /// Canonical selector string.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Acp => "acp",
            Self::Codex => "codex",
            Self::Claude => "claude",
        }
    }

    /// Whether one agent process can host several sessions.
    #[must_use]
    pub fn supports_multiple_sessions(self) -> bool {
        matches!(self, Self::Acp)
    }

    /// Resolve the backend to use.
    ///
    /// Precedence: `explicit` → [`BACKEND_ENV_VAR`] → `configured` → default.
    /// Empty strings are treated as absent.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if the first present selector is not a
    /// recognised backend name or alias.
    pub fn resolve(explicit: Option<&str>, configured: Option<&str>) -> Result<Self> {
        let from_env = std::env::var(BACKEND_ENV_VAR).ok();
        let selector = [explicit, from_env.as_deref(), configured]
            .into_iter()
            .flatten()
            .map(str::trim)
            .find(|s| !s.is_empty());

        selector.map_or_else(|| Ok(Self::default()), str::parse)
    }
}

impl FromStr for BackendKind {
    type Err = AppError;

    fn from_str(raw: &str) -> Result<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "acp" | "agent-client-protocol" => Ok(Self::Acp),
            "codex" | "codex-app-server" | "app-server" => Ok(Self::Codex),
            "claude" | "claude-code" | "direct" | "stream-json" => Ok(Self::Claude),
            other => Err(AppError::Config(format!(
                "unsupported backend '{other}' (expected acp, codex, or claude)"
            ))),
        }
    }
}
