//! Snapshot diff scenarios, checked through the encoder's JSON output

use serde_json::Value;
use spanshot::{Encoder, ExecutionContext};

fn g42(stack: &[&str]) -> ExecutionContext {
    ExecutionContext::new(42, "running", stack)
}

/// Encode one diff and return the events as compact `(ph, name, ts)` rows
fn encoded(ts: f64, prev: Option<&ExecutionContext>, current: Option<&ExecutionContext>) -> Vec<Value> {
    let mut enc = Encoder::new(Vec::new());
    enc.open().unwrap();
    enc.encode_diff(ts, prev, current).unwrap();
    enc.finish().unwrap();
    serde_json::from_slice(&enc.into_inner()).unwrap()
}

fn rows(events: &[Value]) -> Vec<(String, String, f64)> {
    events
        .iter()
        .map(|e| {
            (
                e["ph"].as_str().unwrap().to_string(),
                e["name"].as_str().unwrap().to_string(),
                e["ts"].as_f64().unwrap(),
            )
        })
        .collect()
}

fn row(ph: &str, name: &str, ts: f64) -> (String, String, f64) {
    (ph.to_string(), name.to_string(), ts)
}

#[test]
fn test_new_context() {
    let events = encoded(1000.0, None, Some(&g42(&["foo", "main"])));
    assert_eq!(
        rows(&events),
        vec![
            row("M", "process_name", 0.0),
            row("B", "main", 1000.0),
            row("B", "foo", 1000.0),
        ]
    );
    assert_eq!(events[0]["args"]["name"], "G42");
    for ev in &events {
        assert_eq!(ev["pid"], 42);
        assert_eq!(ev["tid"], 1);
    }
}

#[test]
fn test_deeper_stack_opens_new_frames() {
    let events = encoded(
        2000.0,
        Some(&g42(&["foo", "main"])),
        Some(&g42(&["baz", "bar", "foo", "main"])),
    );
    assert_eq!(
        rows(&events),
        vec![row("B", "bar", 2000.0), row("B", "baz", 2000.0)]
    );
}

#[test]
fn test_shallower_stack_closes_frames() {
    let events = encoded(
        3000.0,
        Some(&g42(&["baz", "bar", "foo", "main"])),
        Some(&g42(&["foo", "main"])),
    );
    assert_eq!(
        rows(&events),
        vec![row("E", "baz", 3000.0), row("E", "bar", 3000.0)]
    );
}

#[test]
fn test_divergent_leaf_closes_then_opens() {
    let events = encoded(
        4000.0,
        Some(&g42(&["baz", "bar", "foo", "main"])),
        Some(&g42(&["foobar", "foo", "main"])),
    );
    assert_eq!(
        rows(&events),
        vec![
            row("E", "baz", 4000.0),
            row("E", "bar", 4000.0),
            row("B", "foobar", 4000.0),
        ]
    );
}

#[test]
fn test_terminated_context_closes_everything() {
    let events = encoded(5000.0, Some(&g42(&["foo", "main"])), None);
    assert_eq!(
        rows(&events),
        vec![row("E", "foo", 5000.0), row("E", "main", 5000.0)]
    );
}

#[test]
fn test_unrelated_shorter_stack_is_rebuilt_from_root() {
    let events = encoded(
        6000.0,
        Some(&g42(&["c", "b", "a"])),
        Some(&g42(&["x"])),
    );
    assert_eq!(
        rows(&events),
        vec![
            row("E", "c", 6000.0),
            row("E", "b", 6000.0),
            row("E", "a", 6000.0),
            row("B", "x", 6000.0),
        ]
    );
}
