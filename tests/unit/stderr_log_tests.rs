//! Unit tests for the bounded stderr log.

use agent_conduit::transport::stderr::StderrLog;

/// The oldest lines are evicted once the cap is reached.
#[test]
fn evicts_oldest_past_cap() {
    let log = StderrLog::new(3);
    for n in 0..5 {
        log.push(format!("line {n}"));
    }

    let texts: Vec<String> = log.snapshot().into_iter().map(|l| l.text).collect();
    assert_eq!(texts, vec!["line 2", "line 3", "line 4"]);
    assert_eq!(log.len(), 3);
    assert_eq!(log.dropped(), 2);
}

/// `recent` returns the tail, oldest first, and copes with short logs.
#[test]
fn recent_returns_tail() {
    let log = StderrLog::new(10);
    assert!(log.recent(5).is_empty());

    for text in ["a", "b", "c"] {
        log.push(text);
    }
    let tail: Vec<String> = log.recent(2).into_iter().map(|l| l.text).collect();
    assert_eq!(tail, vec!["b", "c"]);
    assert_eq!(log.recent(10).len(), 3);
}

/// Timestamps never go backwards.
#[test]
fn timestamps_are_monotonic() {
    let log = StderrLog::new(10);
    log.push("first");
    log.push("second");

    let lines = log.snapshot();
    assert!(lines[0].at <= lines[1].at);
}

/// A zero cap is raised to one.
#[test]
fn zero_cap_keeps_one_line() {
    let log = StderrLog::new(0);
    log.push("a");
    log.push("b");
    assert_eq!(log.cap(), 1);
    assert_eq!(log.snapshot()[0].text, "b");
}

/// Closing ends live subscriptions but keeps retained lines.
#[tokio::test]
async fn close_ends_live_feed() {
    let log = StderrLog::new(4);
    let mut live = log.subscribe();
    log.push("kept");
    log.close();

    assert_eq!(live.recv().await.map(|l| l.text).as_deref(), Some("kept"));
    assert!(live.recv().await.is_none());
    assert_eq!(log.len(), 1);
}
