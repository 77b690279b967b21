//! Unit tests for sub-agent detection and conversation routing.

use std::sync::{Arc, Mutex};

use serde_json::json;

use agent_conduit::hub::Hub;
use agent_conduit::protocol::{
    ContentBlock, SessionNotification, SessionUpdate, ToolCallInfo, ToolKind,
};
use agent_conduit::router::{DefaultSubAgentPolicy, EventRouter, SubAgentPolicy, ToolCallRoutes};

// ── Helpers ──────────────────────────────────────────────────────────────────

fn call(id: &str, title: &str, input: Option<serde_json::Value>) -> ToolCallInfo {
    ToolCallInfo {
        tool_call_id: id.into(),
        title: title.into(),
        raw_input: input,
        ..ToolCallInfo::default()
    }
}

fn nested_text(parent: &str, text: &str) -> SessionNotification {
    SessionNotification::new("s1", SessionUpdate::agent_text(text).with_parent(Some(parent)))
}

type Log = Arc<Mutex<Vec<(String, String)>>>;

fn recording_router(log: &Log) -> EventRouter {
    let messages = Arc::clone(log);
    EventRouter::new("main")
        .on_agent_message(move |conversation, content| {
            messages.lock().unwrap().push((
                conversation.to_owned(),
                content.as_text().unwrap_or_default().to_owned(),
            ));
        })
        .on_sub_agent(|_parent, call| Some(format!("sub:{}", call.tool_call_id)))
}

// ── Policy ───────────────────────────────────────────────────────────────────

/// A `Task` call with a sub-agent type is a sub-agent; a `Read` call is not.
#[test]
fn default_policy_signals() {
    let task = call("t1", "Task", Some(json!({ "subagent_type": "explorer" })));
    let read = call("t2", "Read", Some(json!({ "file_path": "/x" })));
    let titled = call("t3", "Launch research Agent", None);
    let keyed = call("t4", "Dispatch", Some(json!({ "subagent_type": "x" })));

    assert!(task.is_task_tool());
    assert!(!read.is_task_tool());
    assert!(titled.is_task_tool());
    assert!(keyed.is_task_tool());
}

/// The default heuristic can be reconfigured.
#[test]
fn custom_default_policy_fields() {
    let policy = DefaultSubAgentPolicy {
        spawn_tool_names: vec!["spawn".into()],
        title_keyword: String::new(),
        input_keys: Vec::new(),
    };

    assert!(policy.is_sub_agent(&call("a", "Spawn", None)));
    assert!(!policy.is_sub_agent(&call("b", "Task agent", None)));
}

/// Closures serve as policies.
#[test]
fn closure_policy() {
    let router = EventRouter::new("main")
        .with_policy(|call: &ToolCallInfo| call.kind == ToolKind::Execute);
    let mut exec = call("x", "run", None);
    exec.kind = ToolKind::Execute;

    assert!(router.is_sub_agent(&exec));
    assert!(!router.is_sub_agent(&call("t", "Task", None)));
}

// ── Routes ───────────────────────────────────────────────────────────────────

/// Register, look up, and unregister routes; clones share entries.
#[test]
fn routes_register_and_unregister() {
    let routes = ToolCallRoutes::new();
    let shared = routes.clone();
    assert!(routes.is_empty());

    assert_eq!(routes.register("t1", "conv-a"), None);
    assert_eq!(routes.register("t2", "conv-a"), None);
    assert_eq!(routes.register("t3", "conv-b"), None);
    assert_eq!(shared.lookup("t1").as_deref(), Some("conv-a"));
    assert_eq!(routes.len(), 3);

    assert_eq!(routes.register("t3", "conv-c").as_deref(), Some("conv-b"));
    assert_eq!(routes.unregister("t3").as_deref(), Some("conv-c"));
    assert_eq!(routes.unregister("t3"), None);

    assert_eq!(routes.unregister_conversation("conv-a"), 2);
    assert!(routes.is_empty());

    routes.register("t9", "conv-z");
    shared.clear();
    assert_eq!(routes.lookup("t9"), None);
}

// ── EventRouter ──────────────────────────────────────────────────────────────

/// Output nested under a sub-agent call lands in the sub-agent's conversation.
#[test]
fn nested_output_routes_to_sub_agent() {
    let log: Log = Arc::default();
    let router = recording_router(&log);

    let spawn = SessionNotification::new(
        "s1",
        SessionUpdate::ToolCall(call("task-1", "Task", Some(json!({ "subagent_type": "x" })))),
    );
    assert_eq!(router.handle_update(&spawn), "main");
    assert_eq!(router.routes().lookup("task-1").as_deref(), Some("sub:task-1"));

    router.handle_update(&SessionNotification::new("s1", SessionUpdate::agent_text("top")));
    router.handle_update(&nested_text("task-1", "inner"));
    router.handle_update(&nested_text("unknown-call", "orphan"));

    let log = log.lock().unwrap().clone();
    assert_eq!(
        log,
        vec![
            ("main".to_owned(), "top".to_owned()),
            ("sub:task-1".to_owned(), "inner".to_owned()),
            ("main".to_owned(), "orphan".to_owned()),
        ]
    );
}

/// A repeated tool call does not create a second conversation.
#[test]
fn sub_agent_created_once_per_call() {
    let created = Arc::new(Mutex::new(0));
    let counter = Arc::clone(&created);
    let router = EventRouter::new("main").on_sub_agent(move |_, call| {
        *counter.lock().unwrap() += 1;
        Some(format!("sub:{}", call.tool_call_id))
    });

    let spawn = SessionNotification::new("s1", SessionUpdate::ToolCall(call("t", "Task", None)));
    router.handle_update(&spawn);
    router.handle_update(&spawn);

    assert_eq!(*created.lock().unwrap(), 1);
}

/// Declining to create a conversation leaves output on the parent.
#[test]
fn declined_sub_agent_stays_on_parent() {
    let router = EventRouter::new("main").on_sub_agent(|_, _| None);
    router.handle_update(&SessionNotification::new(
        "s1",
        SessionUpdate::ToolCall(call("t", "Task", None)),
    ));

    assert!(router.routes().is_empty());
    assert_eq!(
        router.conversation_for(&nested_text("t", "x").update),
        "main"
    );
}

/// Updates without a callback are ignored; other kinds reach theirs.
#[test]
fn dispatches_by_update_kind() {
    let seen: Arc<Mutex<Vec<String>>> = Arc::default();
    let (a, b, c) = (Arc::clone(&seen), Arc::clone(&seen), Arc::clone(&seen));
    let router = EventRouter::new("main")
        .on_agent_thought(move |_, content| {
            a.lock().unwrap().push(format!("thought:{}", content.as_text().unwrap_or_default()));
        })
        .on_mode_change(move |_, mode| b.lock().unwrap().push(format!("mode:{mode}")))
        .on_user_message(move |_, _| c.lock().unwrap().push("user".into()));

    for update in [
        SessionUpdate::agent_thought("hmm"),
        SessionUpdate::agent_text("ignored"),
        SessionUpdate::CurrentModeUpdate {
            current_mode_id: "plan".into(),
        },
        SessionUpdate::UserMessageChunk {
            content: ContentBlock::text("hi"),
            meta: None,
        },
        SessionUpdate::Other,
    ] {
        router.handle_update(&SessionNotification::new("s1", update));
    }

    assert_eq!(*seen.lock().unwrap(), vec!["thought:hmm", "mode:plan", "user"]);
}

/// `run` drains the subscription until the hub closes.
#[tokio::test]
async fn run_consumes_until_close() {
    let log: Log = Arc::default();
    let router = recording_router(&log);
    let hub: Hub<SessionNotification> = Hub::new();
    let sub = hub.subscribe();

    for n in 0..3 {
        hub.publish(SessionNotification::new("s1", SessionUpdate::agent_text(n.to_string())));
    }
    hub.close();
    router.run(sub).await;

    assert_eq!(log.lock().unwrap().len(), 3);
}
