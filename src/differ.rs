//! Snapshot differ
//!
//! Infers which calls began and ended between two consecutive samples of
//! one execution context. Stacks are compared from the root, because the
//! base of a stack is stable while the leaf changes from sample to sample.
//!
//! Given the common depth `d` (length of the matching root prefix):
//!
//! - previous frames above `d` are closed, leaf to root
//! - current frames above `d` are opened, root to leaf
//!
//! A context seen for the first time also gets a `process_name` metadata
//! event at ts 0, and a context that disappeared has its whole stack
//! closed.

use crate::json_output::TraceEvent;
use crate::model::{ExecutionContext, Frame};

/// Length of the matching prefix of two stacks, counted from the root.
/// Frames match on function name only.
pub fn common_depth(prev: &[Frame], current: &[Frame]) -> usize {
    prev.iter()
        .rev()
        .zip(current.iter().rev())
        .take_while(|(p, c)| p.func == c.func)
        .count()
}

/// Track name shown for a context
pub fn process_name(ctx: &ExecutionContext) -> String {
    match &ctx.created_by {
        Some(creator) => format!("G{} {}", ctx.id, creator.func),
        None => format!("G{}", ctx.id),
    }
}

/// Emit the events that lead from `prev` to `current` at `ts`.
///
/// Events are handed to `emit` one at a time in trace order; the first
/// error stops the diff and is returned.
pub fn diff<E, F>(
    ts: f64,
    prev: Option<&ExecutionContext>,
    current: Option<&ExecutionContext>,
    mut emit: F,
) -> Result<(), E>
where
    F: FnMut(TraceEvent) -> Result<(), E>,
{
    let pid = match (prev, current) {
        (_, Some(ctx)) | (Some(ctx), None) => ctx.id,
        (None, None) => return Ok(()),
    };

    if let (None, Some(ctx)) = (prev, current) {
        emit(TraceEvent::process_name(pid, process_name(ctx)))?;
    }

    let prev_stack = prev.map(|c| c.stack.as_slice()).unwrap_or_default();
    let current_stack = current.map(|c| c.stack.as_slice()).unwrap_or_default();
    let depth = common_depth(prev_stack, current_stack);

    // Leaf first already: close from the leaf down to the common base.
    for frame in &prev_stack[..prev_stack.len() - depth] {
        emit(TraceEvent::end(&frame.func, ts, pid))?;
    }

    // Open from just above the common base up to the leaf.
    for frame in current_stack[..current_stack.len() - depth].iter().rev() {
        emit(TraceEvent::begin(&frame.func, ts, pid))?;
    }

    Ok(())
}

/// Collect the events of [`diff`] into a vector
pub fn diff_events(
    ts: f64,
    prev: Option<&ExecutionContext>,
    current: Option<&ExecutionContext>,
) -> Vec<TraceEvent> {
    let mut events = Vec::new();
    let _ = diff::<std::convert::Infallible, _>(ts, prev, current, |ev| {
        events.push(ev);
        Ok(())
    });
    events
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::json_output::Phase;

    fn g(stack: &[&str]) -> ExecutionContext {
        ExecutionContext::new(42, "running", stack)
    }

    fn summary(events: &[TraceEvent]) -> Vec<(Phase, &str)> {
        events.iter().map(|e| (e.ph, e.name.as_str())).collect()
    }

    #[test]
    fn test_common_depth() {
        let a = g(&["baz", "bar", "foo", "main"]);
        let b = g(&["foobar", "foo", "main"]);
        assert_eq!(common_depth(&a.stack, &b.stack), 2);
        assert_eq!(common_depth(&a.stack, &a.stack), 4);
        assert_eq!(common_depth(&a.stack, &[]), 0);
        assert_eq!(common_depth(&g(&["main"]).stack, &g(&["other"]).stack), 0);
    }

    #[test]
    fn test_creation_emits_metadata_then_root_to_leaf() {
        let events = diff_events(1000.0, None, Some(&g(&["foo", "main"])));
        assert_eq!(
            summary(&events),
            vec![
                (Phase::Metadata, "process_name"),
                (Phase::Begin, "main"),
                (Phase::Begin, "foo"),
            ]
        );
        assert_eq!(events[0].ts, 0.0);
        assert_eq!(events[0].pid, 42);
        assert_eq!(events[0].args.as_ref().unwrap()["name"], "G42");
        assert!(events[1..].iter().all(|e| e.ts == 1000.0 && e.tid == 1));
    }

    #[test]
    fn test_creator_in_process_name() {
        let ctx = g(&["main"]).created_by(Frame::new("spawn_workers"));
        assert_eq!(process_name(&ctx), "G42 spawn_workers");
    }

    #[test]
    fn test_unchanged_stack_emits_nothing() {
        let ctx = g(&["foo", "main"]);
        assert!(diff_events(1.0, Some(&ctx), Some(&ctx)).is_empty());
    }

    #[test]
    fn test_termination_leaf_to_root() {
        let events = diff_events(5000.0, Some(&g(&["foo", "main"])), None);
        assert_eq!(
            summary(&events),
            vec![(Phase::End, "foo"), (Phase::End, "main")]
        );
    }

    #[test]
    fn test_both_absent_is_noop() {
        assert!(diff_events(1.0, None, None).is_empty());
    }

    #[test]
    fn test_no_shared_root_rebuilds_everything() {
        let prev = g(&["b", "a"]);
        let current = g(&["y"]);
        let events = diff_events(1.0, Some(&prev), Some(&current));
        assert_eq!(
            summary(&events),
            vec![(Phase::End, "b"), (Phase::End, "a"), (Phase::Begin, "y")]
        );
    }

    #[test]
    fn test_recursion_matches_by_position() {
        let prev = g(&["f", "f", "main"]);
        let current = g(&["f", "main"]);
        let events = diff_events(1.0, Some(&prev), Some(&current));
        assert_eq!(summary(&events), vec![(Phase::End, "f")]);
    }

    #[test]
    fn test_emit_error_stops_diff() {
        let mut seen = 0;
        let result = diff(1.0, None, Some(&g(&["foo", "main"])), |_| {
            seen += 1;
            if seen == 2 {
                Err("sink full")
            } else {
                Ok(())
            }
        });
        assert_eq!(result, Err("sink full"));
        assert_eq!(seen, 2);
    }
}
