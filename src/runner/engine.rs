//! Execution engine - drains a plan in order

use super::builder::{Runner, duplicate_step_name};
use super::result::{FailureReason, RunFailure};
use super::step::{AsyncStep, Changes, Continuation, Step, StepOutcome};
use std::collections::{HashSet, VecDeque};
use std::time::Duration;
use tokio::task::{JoinError, JoinHandle, JoinSet};
use tokio::time::Instant;

/// What a batch member reports back: its step name and how its task ended
type Finished = (String, Result<StepOutcome, JoinError>);

/// Aborts the wrapped task when dropped
///
/// Batch members run as their own task so a panic surfaces as a `JoinError`
/// tagged with the step name; this ties that task's lifetime to the batch.
struct AbortOnDrop(JoinHandle<StepOutcome>);

impl Drop for AbortOnDrop {
    fn drop(&mut self) {
        self.0.abort();
    }
}

/// Execution state for one `finish` call
///
/// Dropping the engine drops `pending`, which aborts every in-flight task.
pub(crate) struct Engine {
    changes: Changes,
    pending: JoinSet<Finished>,
    /// Names in the pending batch, in launch order
    launched: Vec<String>,
    timeout: Duration,
}

impl Engine {
    pub(crate) fn new(timeout: Duration) -> Self {
        Self {
            changes: Changes::new(),
            pending: JoinSet::new(),
            launched: Vec::new(),
            timeout,
        }
    }

    /// Run every step of `work`, including the ones spliced in on the way
    pub(crate) async fn drive(mut self, mut work: VecDeque<Step>) -> Result<Changes, RunFailure> {
        let start = Instant::now();
        tracing::debug!(steps = work.len(), "Starting run");

        while let Some(step) = work.pop_front() {
            match step {
                Step::Put { name, value } => {
                    self.flush().await?;
                    self.changes.insert(name, value);
                }
                Step::Sync { name, step } => {
                    self.flush().await?;
                    tracing::debug!(step = %name, "Running step");
                    match step.apply(&self.changes) {
                        Ok(value) => {
                            self.changes.insert(name, value);
                        }
                        Err(reason) => return Err(self.halt(name, FailureReason::Returned(reason))),
                    }
                }
                Step::Async { name, step } => self.launch(name, step),
                Step::Branch {
                    predicate,
                    continuation,
                } => {
                    self.flush().await?;
                    if predicate(&self.changes) {
                        tracing::debug!("Branch taken");
                        self.splice(continuation, &mut work);
                    } else {
                        tracing::debug!("Branch skipped");
                    }
                }
                Step::Switch { selector } => {
                    self.flush().await?;
                    let continuation = selector(&self.changes);
                    self.splice(continuation, &mut work);
                }
                Step::Fail { name, reason } => {
                    self.flush().await?;
                    return Err(self.halt(name, FailureReason::Returned(reason)));
                }
            }
        }

        self.flush().await?;

        tracing::info!(
            changes = self.changes.len(),
            elapsed_ms = start.elapsed().as_millis() as u64,
            "Run completed"
        );

        Ok(std::mem::take(&mut self.changes))
    }

    /// Start an async step on its own snapshot of the changes
    fn launch(&mut self, name: String, step: Box<dyn AsyncStep>) {
        tracing::debug!(step = %name, "Launching async step");
        let snapshot = self.changes.clone();
        let task = AbortOnDrop(tokio::spawn(async move { step.apply(snapshot).await }));

        self.launched.push(name.clone());
        self.pending.spawn(async move {
            let mut task = task;
            let ended = (&mut task.0).await;
            (name, ended)
        });
    }

    /// Wait for the pending batch and merge it
    ///
    /// All tasks share one deadline and are collected as they complete. The
    /// first task to fail (explicit error or crash) halts the run right away;
    /// if the deadline passes first, the earliest-launched unfinished task is
    /// reported as timed out. Either way the rest of the batch is aborted and
    /// nothing from it is merged.
    async fn flush(&mut self) -> Result<(), RunFailure> {
        if self.pending.is_empty() {
            return Ok(());
        }

        let launched = std::mem::take(&mut self.launched);
        let deadline = Instant::now() + self.timeout;
        let mut results: Vec<(String, serde_json::Value)> = Vec::with_capacity(launched.len());

        let failure = loop {
            let finished = match tokio::time::timeout_at(deadline, self.pending.join_next()).await {
                Ok(Some(finished)) => finished,
                Ok(None) => break None,
                Err(_) => {
                    let name = first_unfinished(&launched, &results);
                    break Some((name, FailureReason::TimedOut(self.timeout)));
                }
            };

            match finished {
                Ok((name, Ok(Ok(value)))) => results.push((name, value)),
                Ok((name, Ok(Err(reason)))) => break Some((name, FailureReason::Returned(reason))),
                Ok((name, Err(join_err))) => break Some((name, FailureReason::exited(join_err))),
                // The wrapper itself never panics; only an abort lands here
                Err(join_err) => {
                    let name = first_unfinished(&launched, &results);
                    break Some((name, FailureReason::exited(join_err)));
                }
            }
        };

        if let Some((name, reason)) = failure {
            self.pending.abort_all();
            self.pending = JoinSet::new();
            return Err(self.halt(name, reason));
        }

        tracing::debug!(tasks = results.len(), "Flushed async batch");

        for (name, value) in results {
            self.changes.insert(name, value);
        }
        Ok(())
    }

    /// Put the steps built by `continuation` in front of the remaining work
    ///
    /// The continuation may ignore the helper runner it is handed, so spliced
    /// names are checked against both the committed changes and the steps
    /// still waiting in `work`.
    fn splice(&self, continuation: Continuation, work: &mut VecDeque<Step>) {
        let helper = Runner::seeded(self.changes.clone(), self.timeout);
        let spliced = continuation(helper).into_steps();

        let pending: HashSet<&str> = work.iter().filter_map(Step::name).collect();
        if let Some(name) = spliced
            .iter()
            .filter_map(Step::name)
            .find(|name| self.changes.contains_key(*name) || pending.contains(name))
        {
            duplicate_step_name(name);
        }

        tracing::debug!(steps = spliced.len(), "Splicing steps");

        for step in spliced.into_iter().rev() {
            work.push_front(step);
        }
    }

    /// Build the failure result, keeping what was committed before `step`
    fn halt(&mut self, step: String, reason: FailureReason) -> RunFailure {
        tracing::warn!(step = %step, reason = %reason, "Step failed");
        RunFailure::new(step, reason, std::mem::take(&mut self.changes))
    }
}

/// Earliest-launched batch member that has not reported a result
fn first_unfinished(launched: &[String], results: &[(String, serde_json::Value)]) -> String {
    launched
        .iter()
        .find(|name| !results.iter().any(|(done, _)| done == *name))
        .cloned()
        .unwrap_or_default()
}
