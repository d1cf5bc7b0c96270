//! Plan builder - accumulates steps without running them

use super::engine::Engine;
use super::result::RunFailure;
use super::step::{Changes, Continuation, Step, StepOutcome};
use crate::config::RunnerConfig;
use serde_json::Value;
use std::collections::{HashSet, VecDeque};
use std::future::Future;
use std::time::Duration;

/// Build-time state of a runner
///
/// A failed runner keeps its plan so `finish` can still run the steps
/// registered before the failure, but rejects any further mutation.
enum BuildState {
    Building(Plan),
    Failed(Plan),
}

impl BuildState {
    fn plan(&self) -> &Plan {
        match self {
            BuildState::Building(plan) | BuildState::Failed(plan) => plan,
        }
    }

    fn into_plan(self) -> Plan {
        match self {
            BuildState::Building(plan) | BuildState::Failed(plan) => plan,
        }
    }
}

#[derive(Default)]
struct Plan {
    steps: VecDeque<Step>,
    /// Seed values plus everything registered through `put`
    changes: Changes,
    /// Every name claimed so far, seed keys included
    names: HashSet<String>,
}

impl Plan {
    fn seeded(changes: Changes) -> Self {
        Self {
            steps: VecDeque::new(),
            names: changes.keys().cloned().collect(),
            changes,
        }
    }

    fn claim(&mut self, name: &str) {
        if !self.names.insert(name.to_string()) {
            duplicate_step_name(name);
        }
    }
}

/// Abort on a step name that is already taken
///
/// Name collisions are composition bugs in the caller, not runtime failures,
/// so they never travel through the result channel.
pub(crate) fn duplicate_step_name(name: &str) -> ! {
    panic!("duplicate step name '{}'", name)
}

/// Step runner
///
/// Each builder call consumes the runner and hands back the extended plan.
/// Nothing but `put` touches `changes` until [`Runner::finish`] drains the
/// plan.
pub struct Runner {
    state: BuildState,
    timeout: Duration,
}

impl Default for Runner {
    fn default() -> Self {
        Self::new(RunnerConfig::default())
    }
}

impl std::fmt::Debug for Runner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Runner")
            .field("failed", &self.is_failed())
            .field("timeout", &self.timeout)
            .field("steps", &self.state.plan().steps)
            .field("changes", &self.state.plan().changes)
            .finish()
    }
}

impl Runner {
    /// Create an empty runner
    pub fn new(config: RunnerConfig) -> Self {
        Self {
            state: BuildState::Building(Plan::default()),
            timeout: config.timeout(),
        }
    }

    /// Helper runner for branch/switch continuations, seeded with the changes
    /// committed at the splice point
    pub(crate) fn seeded(changes: Changes, timeout: Duration) -> Self {
        Self {
            state: BuildState::Building(Plan::seeded(changes)),
            timeout,
        }
    }

    fn with_plan(mut self, f: impl FnOnce(&mut Plan)) -> Self {
        if let BuildState::Building(plan) = &mut self.state {
            f(plan);
        }
        self
    }

    /// Record a value under `name`
    pub fn put(self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        let name = name.into();
        let value = value.into();
        self.with_plan(|plan| {
            plan.claim(&name);
            plan.changes.insert(name.clone(), value.clone());
            plan.steps.push_back(Step::Put { name, value });
        })
    }

    /// Register a step that runs in plan order against the live changes
    pub fn run<F>(self, name: impl Into<String>, f: F) -> Self
    where
        F: Fn(&Changes) -> StepOutcome + Send + 'static,
    {
        let name = name.into();
        self.with_plan(|plan| {
            plan.claim(&name);
            plan.steps.push_back(Step::Sync {
                name,
                step: Box::new(f),
            });
        })
    }

    /// Register a step that runs concurrently with its neighbouring async
    /// steps
    ///
    /// The function receives a snapshot of the changes taken when execution
    /// reaches it. Its result becomes visible to later steps once the batch
    /// is flushed, which happens before the next non-async step.
    pub fn run_async<F, Fut>(self, name: impl Into<String>, f: F) -> Self
    where
        F: Fn(Changes) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = StepOutcome> + Send + 'static,
    {
        let name = name.into();
        self.with_plan(|plan| {
            plan.claim(&name);
            plan.steps.push_back(Step::Async {
                name,
                step: Box::new(f),
            });
        })
    }

    /// Splice the steps built by `continuation` in front of the remaining
    /// plan when `predicate` holds at that point of the run
    pub fn branch<P, C>(self, predicate: P, continuation: C) -> Self
    where
        P: FnOnce(&Changes) -> bool + Send + 'static,
        C: FnOnce(Runner) -> Runner + Send + 'static,
    {
        self.with_plan(|plan| {
            plan.steps.push_back(Step::Branch {
                predicate: Box::new(predicate),
                continuation: Box::new(continuation),
            });
        })
    }

    /// Splice the steps of whichever continuation `selector` picks at that
    /// point of the run
    pub fn switch<S>(self, selector: S) -> Self
    where
        S: FnOnce(&Changes) -> Continuation + Send + 'static,
    {
        self.with_plan(|plan| {
            plan.steps.push_back(Step::Switch {
                selector: Box::new(selector),
            });
        })
    }

    /// Apply `continuation` to this runner
    pub fn then<F>(self, continuation: F) -> Self
    where
        F: FnOnce(Runner) -> Runner,
    {
        if self.is_failed() {
            return self;
        }
        continuation(self)
    }

    /// Mark the plan as failed at `name`
    ///
    /// Steps already registered still run on `finish`; the run then stops
    /// here with `reason`. Later builder calls are ignored.
    pub fn fail(mut self, name: impl Into<String>, reason: impl Into<Value>) -> Self {
        self.state = match self.state {
            BuildState::Building(mut plan) => {
                let name = name.into();
                plan.claim(&name);
                plan.steps.push_back(Step::Fail {
                    name,
                    reason: reason.into(),
                });
                BuildState::Failed(plan)
            }
            failed => failed,
        };
        self
    }

    pub fn is_failed(&self) -> bool {
        matches!(self.state, BuildState::Failed(_))
    }

    /// Values known at build time: the seed plus every `put`
    pub fn changes(&self) -> &Changes {
        &self.state.plan().changes
    }

    /// Number of planned steps
    pub fn len(&self) -> usize {
        self.state.plan().steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.state.plan().steps.is_empty()
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub(crate) fn into_steps(self) -> VecDeque<Step> {
        self.state.into_plan().steps
    }

    /// Execute the plan
    pub async fn finish(self) -> Result<Changes, RunFailure> {
        let timeout = self.timeout;
        Engine::new(timeout).drive(self.into_steps()).await
    }

    /// Execute the plan and reshape its result with `transform`
    pub async fn finish_with<T, F>(self, transform: F) -> T
    where
        F: FnOnce(Result<Changes, RunFailure>) -> T,
    {
        transform(self.finish().await)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_new_runner_is_empty() {
        let runner = Runner::default();
        assert!(runner.is_empty());
        assert!(runner.changes().is_empty());
        assert!(!runner.is_failed());
        assert_eq!(runner.timeout(), Duration::from_millis(5000));
    }

    #[test]
    fn test_timeout_from_config() {
        let runner = Runner::new(RunnerConfig::default().with_timeout(Duration::from_millis(250)));
        assert_eq!(runner.timeout(), Duration::from_millis(250));
    }

    #[test]
    fn test_put_seeds_changes_immediately() {
        let runner = Runner::default().put("value", 1).put("label", "one");

        assert_eq!(runner.len(), 2);
        assert_eq!(runner.changes()["value"], json!(1));
        assert_eq!(runner.changes()["label"], json!("one"));
    }

    #[test]
    fn test_run_is_deferred() {
        let calls = std::sync::Arc::new(std::sync::atomic::AtomicUsize::new(0));
        let counter = calls.clone();

        let runner = Runner::default().run("count", move |_| {
            counter.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
            Ok(json!(null))
        });

        assert_eq!(runner.len(), 1);
        assert!(!runner.changes().contains_key("count"));
        assert_eq!(calls.load(std::sync::atomic::Ordering::SeqCst), 0);
    }

    #[test]
    #[should_panic(expected = "duplicate step name 'value'")]
    fn test_duplicate_put_panics() {
        let _ = Runner::default().put("value", 1).put("value", 2);
    }

    #[test]
    #[should_panic(expected = "duplicate step name 'double'")]
    fn test_duplicate_across_kinds_panics() {
        let _ = Runner::default()
            .run("double", |_| Ok(json!(2)))
            .run_async("double", |_| async { Ok(json!(2)) });
    }

    #[test]
    fn test_branch_and_switch_are_deferred() {
        let runner = Runner::default()
            .branch(|_| true, |r| r.put("inside", 1))
            .switch(|_| crate::runner::continuation(|r| r.put("picked", 1)));

        assert_eq!(runner.len(), 2);
        assert!(runner.changes().is_empty());
    }

    #[test]
    fn test_then_composes() {
        fn seed(runner: Runner) -> Runner {
            runner.put("a", 1).put("b", 2)
        }

        let runner = Runner::default().then(seed).put("c", 3);
        assert_eq!(runner.len(), 3);
    }

    #[test]
    fn test_failed_runner_ignores_mutators() {
        let runner = Runner::default()
            .put("value", 1)
            .fail("validate", "bad input")
            .put("after", 2)
            .run("never", |_| Ok(json!(0)))
            .run_async("never_async", |_| async { Ok(json!(0)) })
            .branch(|_| true, |r| r.put("branched", 1))
            .switch(|_| crate::runner::continuation(|r| r.put("switched", 1)))
            .then(|r| r.put("then", 1))
            .fail("second", "ignored");

        assert!(runner.is_failed());
        assert_eq!(runner.len(), 2);
        assert!(!runner.changes().contains_key("after"));
    }

    #[test]
    fn test_failed_runner_accepts_reused_names() {
        // Mutators are no-ops once failed, so no name gets claimed
        let runner = Runner::default().fail("stop", "why").put("stop", 1);
        assert_eq!(runner.len(), 1);
    }

    fn seed() -> Changes {
        let mut seed = Changes::new();
        seed.insert("existing".into(), json!(true));
        seed
    }

    #[test]
    fn test_seeded_runner_exposes_seed() {
        let runner = Runner::seeded(seed(), Duration::from_millis(10));
        assert_eq!(runner.changes()["existing"], json!(true));
        assert!(runner.is_empty());
        assert_eq!(runner.timeout(), Duration::from_millis(10));
    }

    #[test]
    #[should_panic(expected = "duplicate step name 'existing'")]
    fn test_seeded_runner_claims_seed_names() {
        let _ = Runner::seeded(seed(), Duration::from_millis(10)).put("existing", false);
    }
}
