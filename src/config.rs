//! Client configuration parsing and validation.

use std::collections::{HashMap, HashSet};
use std::fs;
use std::path::Path;
use std::time::Duration;

use serde::Deserialize;
use tracing::debug;

use crate::mode::BackendKind;
use crate::{AppError, Result};

/// Default cap on retained agent stderr lines.
pub const DEFAULT_STDERR_LINE_CAP: usize = 1000;

/// Default bound on a single JSON-RPC request, in seconds.
pub const DEFAULT_REQUEST_TIMEOUT_SECONDS: u64 = 120;

/// Launch description for one agent executable.
///
/// Immutable once a connection has been built from it.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct AgentConfig {
    /// Stable identifier used to select the agent.
    pub id: String,
    /// Human-readable display name.
    #[serde(default)]
    pub name: String,
    /// Executable path or name resolved through `PATH`.
    pub command: String,
    /// Extra arguments appended after any protocol-required flags.
    #[serde(default)]
    pub args: Vec<String>,
    /// Extra environment variables for the child process.
    #[serde(default)]
    pub env: HashMap<String, String>,
}

impl AgentConfig {
    /// Build a configuration for `command` with no extra arguments.
    #[must_use]
    pub fn new(id: impl Into<String>, command: impl Into<String>) -> Self {
        let id = id.into();
        Self {
            name: id.clone(),
            id,
            command: command.into(),
            args: Vec::new(),
            env: HashMap::new(),
        }
    }

    /// Append extra arguments.
    #[must_use]
    pub fn with_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    /// Add one environment variable.
    #[must_use]
    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    /// Executable to launch, honouring an override environment variable.
    #[must_use]
    pub fn executable(&self, override_var: Option<&str>) -> String {
        override_var
            .and_then(|var| std::env::var(var).ok())
            .filter(|path| !path.trim().is_empty())
            .map_or_else(
                || self.command.clone(),
                |path| {
                    debug!(agent_id = %self.id, %path, "executable overridden from environment");
                    path
                },
            )
    }
}

/// Timeouts and buffer limits shared by every connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConnectionLimits {
    /// Bound on the `initialize` handshake.
    pub initialize_timeout: Duration,
    /// Bound on an ordinary request; `None` waits indefinitely.
    pub request_timeout: Option<Duration>,
    /// Maximum retained stderr lines before the oldest is dropped.
    pub stderr_line_cap: usize,
}

impl ConnectionLimits {
    /// Per-backend defaults.
    #[must_use]
    pub fn for_backend(kind: BackendKind) -> Self {
        let initialize_seconds = match kind {
            BackendKind::Acp | BackendKind::Codex => 30,
            BackendKind::Claude => 60,
        };
        Self {
            initialize_timeout: Duration::from_secs(initialize_seconds),
            request_timeout: Some(Duration::from_secs(DEFAULT_REQUEST_TIMEOUT_SECONDS)),
            stderr_line_cap: DEFAULT_STDERR_LINE_CAP,
        }
    }
}

impl Default for ConnectionLimits {
    fn default() -> Self {
        Self::for_backend(BackendKind::default())
    }
}

/// Top-level configuration parsed from a TOML file.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct ClientConfig {
    /// Backend selector; resolved through [`BackendKind::resolve`].
    #[serde(default)]
    pub backend: Option<String>,
    /// Handshake bound override, in seconds.
    #[serde(default)]
    pub initialize_timeout_seconds: Option<u64>,
    /// Request bound override, in seconds; 0 disables the bound.
    #[serde(default)]
    pub request_timeout_seconds: Option<u64>,
    /// Maximum retained stderr lines per connection.
    #[serde(default = "default_stderr_line_cap")]
    pub stderr_line_cap: usize,
    /// Registered agents.
    pub agents: Vec<AgentConfig>,
}

fn default_stderr_line_cap() -> usize {
    DEFAULT_STDERR_LINE_CAP
}

impl ClientConfig {
    /// Load and validate configuration from a TOML file path.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if the file cannot be read, contains
    /// invalid TOML, or fails validation.
    pub fn load_from_path(path: impl AsRef<Path>) -> Result<Self> {
        let raw = fs::read_to_string(path)
            .map_err(|err| AppError::Config(format!("failed to read config: {err}")))?;
        Self::from_toml_str(&raw)
    }

    /// Parse and validate configuration from a TOML string.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if parsing or validation fails.
    pub fn from_toml_str(raw: &str) -> Result<Self> {
        let mut config: Self = toml::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    /// Look up an agent by id, or the first agent when `id` is `None`.
    ///
    /// # Errors
    ///
    /// Returns `AppError::NotFound` if no agent matches.
    pub fn agent(&self, id: Option<&str>) -> Result<&AgentConfig> {
        match id {
            Some(id) => self
                .agents
                .iter()
                .find(|agent| agent.id == id)
                .ok_or_else(|| AppError::NotFound(format!("no agent configured with id '{id}'"))),
            None => self
                .agents
                .first()
                .ok_or_else(|| AppError::NotFound("no agents configured".into())),
        }
    }

    /// Effective connection limits for `kind`, applying configured overrides.
    #[must_use]
    pub fn limits(&self, kind: BackendKind) -> ConnectionLimits {
        let mut limits = ConnectionLimits::for_backend(kind);
        if let Some(seconds) = self.initialize_timeout_seconds {
            limits.initialize_timeout = Duration::from_secs(seconds);
        }
        if let Some(seconds) = self.request_timeout_seconds {
            limits.request_timeout = (seconds > 0).then(|| Duration::from_secs(seconds));
        }
        limits.stderr_line_cap = self.stderr_line_cap;
        limits
    }

    fn validate(&mut self) -> Result<()> {
        if self.agents.is_empty() {
            return Err(AppError::Config("at least one agent must be configured".into()));
        }

        if self.stderr_line_cap == 0 {
            return Err(AppError::Config(
                "stderr_line_cap must be greater than zero".into(),
            ));
        }

        if self.initialize_timeout_seconds == Some(0) {
            return Err(AppError::Config(
                "initialize_timeout_seconds must be greater than zero".into(),
            ));
        }

        let mut seen = HashSet::new();
        for agent in &mut self.agents {
            if agent.id.trim().is_empty() {
                return Err(AppError::Config("agent id must not be empty".into()));
            }
            if agent.command.trim().is_empty() {
                return Err(AppError::Config(format!(
                    "agent '{}' has an empty command",
                    agent.id
                )));
            }
            if !seen.insert(agent.id.clone()) {
                return Err(AppError::Config(format!("duplicate agent id '{}'", agent.id)));
            }
            if agent.name.is_empty() {
                agent.name.clone_from(&agent.id);
            }
        }

        if let Some(selector) = self.backend.as_deref() {
            selector.parse::<BackendKind>()?;
        }

        Ok(())
    }
}
