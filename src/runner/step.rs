//! Step descriptors and the traits step functions implement

use super::builder::Runner;
use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;
use std::future::Future;

/// Values produced so far, keyed by step name
pub type Changes = HashMap<String, Value>;

/// Result of a step function: the value to record, or the failure reason
pub type StepOutcome = Result<Value, Value>;

/// Builds the steps a `branch` or `switch` splices into the remaining plan
pub type Continuation = Box<dyn FnOnce(Runner) -> Runner + Send>;

pub(crate) type Predicate = Box<dyn FnOnce(&Changes) -> bool + Send>;
pub(crate) type Selector = Box<dyn FnOnce(&Changes) -> Continuation + Send>;

/// Box a closure as a [`Continuation`]
///
/// Handy inside `switch` selectors, where each arm has to produce the same
/// type:
///
/// ```ignore
/// runner.switch(|changes| match changes.get("kind") {
///     Some(kind) if kind == "refund" => continuation(|r| r.put("refund", true)),
///     _ => continuation(|r| r),
/// })
/// ```
pub fn continuation<F>(f: F) -> Continuation
where
    F: FnOnce(Runner) -> Runner + Send + 'static,
{
    Box::new(f)
}

/// A step computed in plan order against the live changes
pub trait SyncStep: Send {
    fn apply(&self, changes: &Changes) -> StepOutcome;
}

impl<F> SyncStep for F
where
    F: Fn(&Changes) -> StepOutcome + Send,
{
    fn apply(&self, changes: &Changes) -> StepOutcome {
        self(changes)
    }
}

/// A step computed concurrently against its own snapshot of changes
#[async_trait]
pub trait AsyncStep: Send + Sync {
    async fn apply(&self, snapshot: Changes) -> StepOutcome;
}

#[async_trait]
impl<F, Fut> AsyncStep for F
where
    F: Fn(Changes) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = StepOutcome> + Send + 'static,
{
    async fn apply(&self, snapshot: Changes) -> StepOutcome {
        (self)(snapshot).await
    }
}

/// One entry of a plan
pub(crate) enum Step {
    Put {
        name: String,
        value: Value,
    },
    Sync {
        name: String,
        step: Box<dyn SyncStep>,
    },
    Async {
        name: String,
        step: Box<dyn AsyncStep>,
    },
    Branch {
        predicate: Predicate,
        continuation: Continuation,
    },
    Switch {
        selector: Selector,
    },
    /// Recorded by `Runner::fail`; halts the run when reached
    Fail {
        name: String,
        reason: Value,
    },
}

impl Step {
    /// Name the step records under, if it records anything
    pub(crate) fn name(&self) -> Option<&str> {
        match self {
            Step::Put { name, .. }
            | Step::Sync { name, .. }
            | Step::Async { name, .. }
            | Step::Fail { name, .. } => Some(name),
            Step::Branch { .. } | Step::Switch { .. } => None,
        }
    }

    pub(crate) fn kind(&self) -> &'static str {
        match self {
            Step::Put { .. } => "put",
            Step::Sync { .. } => "sync",
            Step::Async { .. } => "async",
            Step::Branch { .. } => "branch",
            Step::Switch { .. } => "switch",
            Step::Fail { .. } => "fail",
        }
    }
}

impl std::fmt::Debug for Step {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.name() {
            Some(name) => write!(f, "{}({})", self.kind(), name),
            None => write!(f, "{}", self.kind()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_sync_closure_applies() {
        let step = |changes: &Changes| -> StepOutcome {
            let value = changes.get("value").and_then(Value::as_i64).unwrap_or(0);
            Ok(json!(value + 1))
        };

        let mut changes = Changes::new();
        changes.insert("value".into(), json!(41));

        assert_eq!(SyncStep::apply(&step, &changes), Ok(json!(42)));
    }

    #[tokio::test]
    async fn test_async_closure_applies() {
        let step = |snapshot: Changes| async move {
            if snapshot.contains_key("ready") {
                Ok(json!("go"))
            } else {
                Err(json!("not ready"))
            }
        };

        assert_eq!(
            AsyncStep::apply(&step, Changes::new()).await,
            Err(json!("not ready"))
        );
    }

    #[test]
    fn test_step_names_and_debug() {
        let put = Step::Put {
            name: "a".into(),
            value: json!(1),
        };
        let switch = Step::Switch {
            selector: Box::new(|_: &Changes| continuation(|r| r)),
        };

        assert_eq!(put.name(), Some("a"));
        assert_eq!(switch.name(), None);
        assert_eq!(format!("{:?}", put), "put(a)");
        assert_eq!(format!("{:?}", switch), "switch");
    }
}
