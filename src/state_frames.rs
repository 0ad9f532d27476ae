//! Virtual scheduler-state frames
//!
//! Adds a synthetic frame named after each context's lifecycle state, so
//! the state shows up as a span in the trace without any special handling
//! in the differ.

use clap::ValueEnum;

use crate::model::{ExecutionContext, Frame};

/// Label used in place of "runnable".
///
/// Capturing a snapshot marks actively running contexts as runnable, so the
/// real state is most likely "running" but cannot be told apart.
pub const RUNNING_OR_RUNNABLE: &str = "running/runnable";

/// File recorded on synthetic state frames
pub const STATE_FRAME_FILE: &str = "<state>";

/// Where the synthetic state frame goes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum StateFrames {
    /// Innermost frame: the state is the deepest span
    #[default]
    Leaf,
    /// Outermost frame: contexts are grouped by state
    Root,
    /// No state frames
    None,
}

/// The label shown for a raw state
pub fn state_name(state: &str) -> &str {
    if state == "runnable" {
        RUNNING_OR_RUNNABLE
    } else {
        state
    }
}

/// Add a state frame to every context according to `placement`
pub fn add_state_frames(contexts: &mut [ExecutionContext], placement: StateFrames) {
    if placement == StateFrames::None {
        return;
    }
    for ctx in contexts {
        let frame = Frame::with_location(state_name(&ctx.state), STATE_FRAME_FILE, 0);
        match placement {
            StateFrames::Leaf => ctx.stack.insert(0, frame),
            StateFrames::Root => ctx.stack.push(frame),
            StateFrames::None => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn funcs(ctx: &ExecutionContext) -> Vec<&str> {
        ctx.stack.iter().map(|f| f.func.as_str()).collect()
    }

    #[test]
    fn test_leaf_placement() {
        let mut ctxs = vec![ExecutionContext::new(1, "sleeping", &["foo", "main"])];
        add_state_frames(&mut ctxs, StateFrames::Leaf);
        assert_eq!(funcs(&ctxs[0]), vec!["sleeping", "foo", "main"]);
        assert_eq!(ctxs[0].stack[0].file, STATE_FRAME_FILE);
    }

    #[test]
    fn test_root_placement() {
        let mut ctxs = vec![ExecutionContext::new(1, "sleeping", &["foo", "main"])];
        add_state_frames(&mut ctxs, StateFrames::Root);
        assert_eq!(funcs(&ctxs[0]), vec!["foo", "main", "sleeping"]);
    }

    #[test]
    fn test_none_placement_leaves_stack_alone() {
        let mut ctxs = vec![ExecutionContext::new(1, "sleeping", &["foo", "main"])];
        add_state_frames(&mut ctxs, StateFrames::None);
        assert_eq!(funcs(&ctxs[0]), vec!["foo", "main"]);
    }

    #[test]
    fn test_runnable_is_relabelled() {
        let mut ctxs = vec![
            ExecutionContext::new(1, "runnable", &["main"]),
            ExecutionContext::new(2, "running", &["main"]),
        ];
        add_state_frames(&mut ctxs, StateFrames::Leaf);
        assert_eq!(ctxs[0].stack[0].func, RUNNING_OR_RUNNABLE);
        assert_eq!(ctxs[1].stack[0].func, "running");
    }

    #[test]
    fn test_empty_stack_gets_state_frame() {
        let mut ctxs = vec![ExecutionContext::new(1, "idle", &[])];
        add_state_frames(&mut ctxs, StateFrames::Leaf);
        assert_eq!(funcs(&ctxs[0]), vec!["idle"]);
    }

    #[test]
    fn test_parse_placement() {
        let parse = |s| <StateFrames as ValueEnum>::from_str(s, true);
        assert_eq!(parse("root").unwrap(), StateFrames::Root);
        assert_eq!(parse("LEAF").unwrap(), StateFrames::Leaf);
        assert_eq!(parse("none").unwrap(), StateFrames::None);
        assert!(parse("middle").is_err());
    }
}
