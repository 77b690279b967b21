//! Scripted stand-in agents for the process-backed tests.
//!
//! Each script is a small POSIX shell loop that answers the client's
//! frames by substring match. Tests that spawn them run `#[serial]` so no
//! other thread forks while a script file is still open for writing.

use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use agent_conduit::config::{AgentConfig, ConnectionLimits};

/// ACP agent: handshake, sessions, prompts with one permission prompt, and
/// a few test hooks (`crash`, `read-file`, `probe-unknown`).
pub const ACP_AGENT: &str = r##"
n=0
id_of() { printf '%s\n' "$1" | sed -n 's/.*"id":\([0-9][0-9]*\).*/\1/p'; }
field_of() { printf '%s\n' "$2" | sed -n "s/.*\"$1\":\"\([^\"]*\)\".*/\1/p"; }
echo "fake acp agent starting" >&2
while IFS= read -r line; do
  id=$(id_of "$line")
  case "$line" in
    *'"method":"initialize"'*)
      printf '{"jsonrpc":"2.0","id":%s,"result":{"protocolVersion":1,"agentCapabilities":{"loadSession":false},"agentInfo":{"name":"fake-acp"},"authMethods":[{"id":"token","name":"Token"}]}}\n' "$id" ;;
    *'"method":"authenticate"'*|*'"method":"session/set_mode"'*)
      printf '{"jsonrpc":"2.0","id":%s,"result":{}}\n' "$id" ;;
    *'"method":"session/new"'*)
      n=$((n + 1))
      printf '{"jsonrpc":"2.0","id":%s,"result":{"sessionId":"sess-%s"}}\n' "$id" "$n" ;;
    *'"method":"session/prompt"'*)
      sid=$(field_of sessionId "$line")
      printf '{"jsonrpc":"2.0","method":"session/update","params":{"sessionId":"%s","update":{"sessionUpdate":"agent_message_chunk","content":{"type":"text","text":"working"}}}}\n' "$sid"
      printf '{"jsonrpc":"2.0","id":"perm-1","method":"session/request_permission","params":{"sessionId":"%s","toolCall":{"toolCallId":"tc-1","title":"Bash","rawInput":{"command":"ls"}},"options":[{"optionId":"yes","name":"Allow","kind":"allow_once"},{"optionId":"no","name":"Reject","kind":"reject_once"}]}}\n' "$sid"
      IFS= read -r reply
      case "$reply" in
        *'"optionId":"yes"'*) reason=end_turn ;;
        *) reason=refusal ;;
      esac
      printf '{"jsonrpc":"2.0","id":%s,"result":{"stopReason":"%s"}}\n' "$id" "$reason" ;;
    *'"method":"read-file"'*)
      path=$(field_of path "$line")
      printf '{"jsonrpc":"2.0","id":"fs-1","method":"fs/read_text_file","params":{"sessionId":"sess-x","path":"%s"}}\n' "$path"
      IFS= read -r reply
      printf '{"jsonrpc":"2.0","id":%s,"result":%s}\n' "$id" "$reply" ;;
    *'"method":"probe-unknown"'*)
      printf '{"jsonrpc":"2.0","id":"u-1","method":"x/unknown","params":{}}\n'
      IFS= read -r reply
      printf '{"jsonrpc":"2.0","id":%s,"result":%s}\n' "$id" "$reply" ;;
    *'"method":"crash"'*)
      echo "fatal: crash requested" >&2
      exit 7 ;;
  esac
done
"##;

/// Codex app-server: one thread, one turn with a command approval.
pub const CODEX_AGENT: &str = r##"
id_of() { printf '%s\n' "$1" | sed -n 's/.*"id":\([0-9][0-9]*\).*/\1/p'; }
[ "$1" = "app-server" ] || { echo "expected app-server, got $1" >&2; exit 64; }
while IFS= read -r line; do
  id=$(id_of "$line")
  case "$line" in
    *'"method":"initialize"'*)
      printf '{"id":%s,"result":{"userAgent":"fake-codex/1.0"}}\n' "$id" ;;
    *'"method":"thread/start"'*)
      printf '{"id":%s,"result":{"thread":{"id":"th-1"}}}\n' "$id" ;;
    *'"method":"turn/start"'*)
      printf '{"id":%s,"result":{"turn":{"id":"turn-1"}}}\n' "$id"
      printf '{"method":"item/agentMessage/delta","params":{"threadId":"th-1","delta":"done"}}\n'
      printf '{"id":"ap-1","method":"item/commandExecution/requestApproval","params":{"threadId":"th-1","itemId":"it-1","command":"ls"}}\n'
      IFS= read -r reply
      case "$reply" in
        *'"decision":"accept"'*) status=completed ;;
        *) status=interrupted ;;
      esac
      printf '{"method":"turn/completed","params":{"threadId":"th-1","turn":{"id":"turn-1","status":"%s"}}}\n' "$status" ;;
    *'"method":"turn/interrupt"'*)
      printf '{"id":%s,"result":{}}\n' "$id" ;;
  esac
done
"##;

/// Claude stream-json CLI: control handshake, one turn with a tool prompt.
pub const CLAUDE_AGENT: &str = r##"
[ "$1" = "--output-format" ] || { echo "unexpected launch flags: $*" >&2; exit 64; }
while IFS= read -r line; do
  case "$line" in
    *'"subtype":"initialize"'*)
      printf '{"type":"control_response","response":{"subtype":"success","request_id":"init"}}\n' ;;
    *'"type":"session.create"'*)
      printf '{"type":"system","subtype":"init"}\n'
      printf '{"type":"session.created","session_id":"claude-1"}\n' ;;
    *'"type":"user"'*)
      printf '{"type":"assistant","message":{"content":[{"type":"text","text":"on it"},{"type":"tool_use","id":"tu-1","name":"Bash","input":{"command":"ls"}}]}}\n'
      printf '{"type":"control_request","request_id":"perm-1","request":{"subtype":"can_use_tool","tool_name":"Bash","input":{"command":"ls"},"tool_use_id":"tu-1"}}\n'
      IFS= read -r reply
      case "$reply" in
        *'"behavior":"allow"'*) sub=success ;;
        *) sub=error_during_execution ;;
      esac
      printf '{"type":"user","message":{"content":[{"type":"tool_result","tool_use_id":"tu-1","content":"a.txt"}]}}\n'
      printf '{"type":"result","subtype":"%s"}\n' "$sub" ;;
  esac
done
"##;

/// Codex app-server that dies once a turn has started.
pub const CODEX_CRASHING_AGENT: &str = r##"
id_of() { printf '%s\n' "$1" | sed -n 's/.*"id":\([0-9][0-9]*\).*/\1/p'; }
while IFS= read -r line; do
  id=$(id_of "$line")
  case "$line" in
    *'"method":"initialize"'*)
      printf '{"id":%s,"result":{"userAgent":"fake-codex/1.0"}}\n' "$id" ;;
    *'"method":"thread/start"'*)
      printf '{"id":%s,"result":{"thread":{"id":"th-1"}}}\n' "$id" ;;
    *'"method":"turn/start"'*)
      printf '{"id":%s,"result":{"turn":{"id":"turn-1"}}}\n' "$id"
      echo "codex: out of memory" >&2
      exit 9 ;;
  esac
done
"##;

/// Claude CLI that dies once a turn has started.
pub const CLAUDE_CRASHING_AGENT: &str = r##"
while IFS= read -r line; do
  case "$line" in
    *'"subtype":"initialize"'*)
      printf '{"type":"control_response","response":{"subtype":"success","request_id":"init"}}\n' ;;
    *'"type":"session.create"'*)
      printf '{"type":"session.created","session_id":"claude-1"}\n' ;;
    *'"type":"user"'*)
      printf '{"type":"assistant","message":{"content":[{"type":"text","text":"starting"}]}}\n'
      exit 9 ;;
  esac
done
"##;

/// Claude CLI using the callback permission flow. The first callback lacks a
/// `request_id` and must not be surfaced.
pub const CLAUDE_CALLBACK_AGENT: &str = r##"
while IFS= read -r line; do
  case "$line" in
    *'"subtype":"initialize"'*)
      printf '{"type":"control_response","response":{"subtype":"success","request_id":"init"}}\n' ;;
    *'"type":"session.create"'*)
      printf '{"type":"session.created","session_id":"claude-1"}\n' ;;
    *'"type":"user"'*)
      printf '{"type":"callback.request","tool_name":"Bash","input":{"command":"pwd"},"tool_use_id":"tu-0"}\n'
      printf '{"type":"callback.request","request_id":"cb-1","tool_name":"Bash","input":{"command":"ls"},"tool_use_id":"tu-1"}\n'
      IFS= read -r reply
      case "$reply" in
        *'"request_id":"cb-1"'*'"behavior":"allow"'*|*'"behavior":"allow"'*'"request_id":"cb-1"'*) sub=success ;;
        *) sub=error_during_execution ;;
      esac
      printf '{"type":"result","subtype":"%s"}\n' "$sub" ;;
  esac
done
"##;

/// An executable script in its own temporary directory.
pub struct ScriptAgent {
    dir: tempfile::TempDir,
    path: PathBuf,
}

impl ScriptAgent {
    /// Write `body` as an executable shell script.
    pub fn new(body: &str) -> Self {
        let dir = tempfile::tempdir().expect("temp dir");
        let path = dir.path().join("agent.sh");
        std::fs::write(&path, format!("#!/bin/sh\n{body}")).expect("write script");
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755))
            .expect("chmod script");
        Self { dir, path }
    }

    /// Agent configuration launching this script.
    pub fn config(&self, id: &str) -> AgentConfig {
        AgentConfig::new(id, self.path.to_string_lossy())
    }

    /// Scratch directory next to the script.
    pub fn dir(&self) -> &Path {
        self.dir.path()
    }
}

/// Short limits so failing tests end quickly.
pub fn limits() -> ConnectionLimits {
    ConnectionLimits {
        initialize_timeout: Duration::from_secs(5),
        request_timeout: Some(Duration::from_secs(10)),
        stderr_line_cap: 100,
    }
}

/// Await `fut`, failing the test after five seconds.
pub async fn within<F: std::future::Future>(fut: F) -> F::Output {
    tokio::time::timeout(Duration::from_secs(5), fut)
        .await
        .expect("completed within timeout")
}
