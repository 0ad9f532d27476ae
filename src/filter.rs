//! Self-exclusion filtering
//!
//! The sampler runs inside the process it observes, so its own thread shows
//! up in every snapshot. Contexts with any frame in the tracer's own
//! namespace (`spanshot::`) or named after the sampling thread are dropped
//! unless explicitly included.

use std::sync::LazyLock;

use crate::model::ExecutionContext;

/// Name of the sampling thread. Capturers that only see thread names
/// report it as the root frame, which is matched exactly.
pub const SAMPLER_THREAD_NAME: &str = "spanshot-sample";

static OWN_MODULE: LazyLock<String> = LazyLock::new(|| {
    fn locate() {}
    let path = std::any::type_name_of_val(&locate);
    path.split("::").next().unwrap_or(path).to_string()
});

/// Root namespace of this crate, resolved once from a function path in
/// this module
pub fn own_module() -> &'static str {
    OWN_MODULE.as_str()
}

/// Decides which contexts reach the differ
#[derive(Debug, Clone)]
pub struct SelfFilter {
    /// Frame prefix to exclude (None = keep everything)
    exclude: Option<String>,
    /// Frame name excluded on exact match
    thread: Option<String>,
}

impl SelfFilter {
    /// Exclude the tracer's own contexts unless `include_self` is set:
    /// frames under `spanshot::` and the sampling thread's name
    pub fn new(include_self: bool) -> Self {
        if include_self {
            Self::all()
        } else {
            Self {
                exclude: Some(format!("{}::", own_module())),
                thread: Some(SAMPLER_THREAD_NAME.to_string()),
            }
        }
    }

    /// Keep every context
    pub fn all() -> Self {
        Self {
            exclude: None,
            thread: None,
        }
    }

    /// Drop contexts with any frame starting with `prefix`
    pub fn excluding(prefix: impl Into<String>) -> Self {
        Self {
            exclude: Some(prefix.into()),
            thread: None,
        }
    }

    fn is_own_frame(&self, func: &str) -> bool {
        self.exclude.as_deref().is_some_and(|p| func.starts_with(p))
            || self.thread.as_deref() == Some(func)
    }

    /// Check if a context should be traced
    pub fn should_trace(&self, ctx: &ExecutionContext) -> bool {
        !ctx.stack.iter().any(|f| self.is_own_frame(&f.func))
    }

    /// Remove excluded contexts in place
    pub fn apply(&self, contexts: &mut Vec<ExecutionContext>) {
        if self.exclude.is_some() || self.thread.is_some() {
            contexts.retain(|ctx| self.should_trace(ctx));
        }
    }
}

impl Default for SelfFilter {
    fn default() -> Self {
        Self::new(false)
    }
}
