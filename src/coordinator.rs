//! Drives one MapReduce run through its two barriers.
//!
//! ```text
//! Idle -> Staging -> Mapping -> MapBarrier -> Reducing -> ReduceBarrier -> Cleanup -> Done
//!            \______________________ any setup error ______________________/-> Failed
//! ```
//!
//! Reducers are never dispatched before every mapper has reached a terminal
//! status. Each task gets a deadline and a retry budget; a task that still
//! fails is recorded and the run finishes as [`RunStatus::Partial`].

use crate::config::{FLAG_NO, FLAG_YES};
use crate::dispatch::TaskDispatcher;
use crate::object_store::remove_objects_with_prefix;
use crate::retry::{with_retry, RetryPolicy};
use crate::{MapTask, ReduceTask, RunId, Task, TaskContext, TaskStatus};
use anyhow::{anyhow, Context, Result};
use itertools::Itertools;
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub enum RunPhase {
    Idle,
    Staging,
    Mapping,
    MapBarrier,
    Reducing,
    ReduceBarrier,
    Cleanup,
    Done,
    Failed,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub enum RunStatus {
    /// Every task succeeded.
    Complete,
    /// The run finished but at least one task failed.
    Partial,
    /// Another run held the processing flag.
    Rejected,
    /// A triggered run found indexing not armed, or the change was outside
    /// the input namespace.
    Skipped,
}

/// Terminal result of one mapper or reducer index.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct TaskOutcome {
    pub index: u32,
    pub attempts: u32,
    pub status: TaskStatus,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct RunReport {
    pub run_id: RunId,
    pub status: RunStatus,
    pub phase: RunPhase,
    pub documents: usize,
    pub mappers: Vec<TaskOutcome>,
    pub reducers: Vec<TaskOutcome>,
}

impl RunReport {
    fn not_started(run_id: RunId, status: RunStatus) -> Self {
        Self {
            run_id,
            status,
            phase: RunPhase::Idle,
            documents: 0,
            mappers: Vec::new(),
            reducers: Vec::new(),
        }
    }

    /// Mapper and reducer outcomes that did not succeed.
    pub fn failed_tasks(&self) -> impl Iterator<Item = &TaskOutcome> {
        self.mappers
            .iter()
            .chain(&self.reducers)
            .filter(|outcome| !outcome.status.is_success())
    }
}

enum Scope {
    /// Every document in the input namespace, `num_mappers` mappers.
    Full,
    /// One document, one mapper.
    Triggered { document: String },
}

pub struct Coordinator {
    ctx: TaskContext,
    dispatcher: Arc<dyn TaskDispatcher>,
    phase: watch::Sender<RunPhase>,
}

impl Coordinator {
    pub fn new(ctx: TaskContext, dispatcher: Arc<dyn TaskDispatcher>) -> Self {
        let (phase, _) = watch::channel(RunPhase::Idle);
        Self {
            ctx,
            dispatcher,
            phase,
        }
    }

    /// Receives every phase transition.
    pub fn subscribe(&self) -> watch::Receiver<RunPhase> {
        self.phase.subscribe()
    }

    pub fn phase(&self) -> RunPhase {
        *self.phase.borrow()
    }

    /// Indexes every staged document. Once the run holds the processing
    /// flag, the indexing-armed flag is set on every exit, failed or not,
    /// which enables triggered runs.
    pub async fn run(&self) -> Result<RunReport> {
        self.run_scoped(RunId::new(), Scope::Full).await
    }

    /// Indexes a single newly staged object, given by its full object name.
    /// Only proceeds once a full run has armed indexing.
    pub async fn run_triggered(&self, object: &str) -> Result<RunReport> {
        let run_id = RunId::new();
        let config = &self.ctx.config;
        if !object.starts_with(&config.input_prefix) {
            info!(object, "change outside the input namespace, ignoring");
            return Ok(RunReport::not_started(run_id, RunStatus::Skipped));
        }
        let armed = self
            .ctx
            .coordination
            .get(&config.armed_flag)
            .await
            .context("reading the indexing-armed flag")?;
        if armed.as_deref() != Some(FLAG_YES) {
            info!(object, "manual indexing has not finished yet, skipping");
            return Ok(RunReport::not_started(run_id, RunStatus::Skipped));
        }
        let document = config.document_name(object).to_string();
        self.run_scoped(run_id, Scope::Triggered { document }).await
    }

    async fn run_scoped(&self, run_id: RunId, scope: Scope) -> Result<RunReport> {
        self.enter(RunPhase::Idle);
        if let Err(err) = self.ctx.config.validate() {
            self.enter(RunPhase::Failed);
            return Err(err.context("invalid configuration"));
        }
        match self.acquire_processing_flag().await {
            Ok(true) => {}
            Ok(false) => {
                warn!(run = %run_id, "another run is in progress, rejecting");
                return Ok(RunReport::not_started(run_id, RunStatus::Rejected));
            }
            Err(err) => {
                self.enter(RunPhase::Failed);
                return Err(err);
            }
        }

        let result = self.execute(&run_id, &scope).await;
        if let Err(err) = &result {
            self.enter(RunPhase::Failed);
            error!(run = %run_id, error = ?err, "run failed");
        }
        if matches!(scope, Scope::Full) {
            self.arm_triggered_indexing().await;
        }
        self.release_processing_flag().await;
        result
    }

    async fn execute(&self, run_id: &RunId, scope: &Scope) -> Result<RunReport> {
        let config = &self.ctx.config;

        self.enter(RunPhase::Staging);
        let groups = match scope {
            Scope::Full => assign_documents(self.list_documents().await?, config.num_mappers),
            Scope::Triggered { document } => vec![vec![document.clone()]],
        };
        let num_mappers = groups.len() as u32;
        let documents: usize = groups.iter().map(Vec::len).sum();
        info!(
            run = %run_id,
            documents,
            mappers = num_mappers,
            reducers = config.num_reducers,
            "run staged"
        );

        self.enter(RunPhase::Mapping);
        let map_tasks = groups
            .into_iter()
            .enumerate()
            .map(|(mapper_index, document_names)| {
                Task::Map(MapTask {
                    run_id: run_id.clone(),
                    document_names,
                    mapper_index: mapper_index as u32,
                    num_reducers: config.num_reducers,
                })
            })
            .collect();
        let mappers = self.dispatch_all(map_tasks, RunPhase::MapBarrier).await;

        self.enter(RunPhase::Reducing);
        let reduce_tasks = (0..config.num_reducers)
            .map(|reducer_index| {
                Task::Reduce(ReduceTask {
                    run_id: run_id.clone(),
                    reducer_index,
                    num_mappers,
                })
            })
            .collect();
        let reducers = self.dispatch_all(reduce_tasks, RunPhase::ReduceBarrier).await;

        self.enter(RunPhase::Cleanup);
        self.cleanup(run_id).await;

        let mut report = RunReport {
            run_id: run_id.clone(),
            status: RunStatus::Complete,
            phase: RunPhase::Done,
            documents,
            mappers,
            reducers,
        };
        let failed = report
            .failed_tasks()
            .map(|outcome| outcome.index)
            .collect::<Vec<_>>();
        if !failed.is_empty() {
            report.status = RunStatus::Partial;
            warn!(run = %run_id, failed = failed.len(), "run finished with failed tasks");
        }
        self.enter(RunPhase::Done);
        info!(run = %run_id, status = ?report.status, "run finished");
        Ok(report)
    }

    /// Dispatches every task at once, then waits for all of them.
    async fn dispatch_all(&self, tasks: Vec<Task>, barrier: RunPhase) -> Vec<TaskOutcome> {
        let expected: Vec<u32> = tasks.iter().map(Task::index).collect();
        let mut set = JoinSet::new();
        for task in tasks {
            set.spawn(dispatch_with_retry(
                self.dispatcher.clone(),
                self.ctx.config.task,
                task,
            ));
        }

        self.enter(barrier);
        let mut outcomes = Vec::with_capacity(expected.len());
        while let Some(joined) = set.join_next().await {
            match joined {
                Ok(outcome) => outcomes.push(outcome),
                Err(err) => error!(error = %err, "dispatch aborted"),
            }
        }
        for index in expected {
            if !outcomes.iter().any(|outcome| outcome.index == index) {
                outcomes.push(TaskOutcome {
                    index,
                    attempts: 0,
                    status: TaskStatus::Failed("dispatch aborted".into()),
                });
            }
        }
        outcomes.sort_by_key(|outcome| outcome.index);
        outcomes
    }

    async fn list_documents(&self) -> Result<Vec<String>> {
        let config = &self.ctx.config;
        let objects = with_retry(&config.transfer, "list input documents", || {
            self.ctx.objects.list(&config.input_prefix)
        })
        .await?;
        Ok(objects
            .iter()
            .map(|object| config.document_name(object).to_string())
            .collect())
    }

    async fn cleanup(&self, run_id: &RunId) {
        let config = &self.ctx.config;
        for namespace in [config.shard_namespace(run_id), config.output_namespace(run_id)] {
            match remove_objects_with_prefix(self.ctx.objects.as_ref(), &namespace).await {
                Ok(removed) => debug!(%namespace, removed, "cleaned up"),
                Err(err) => warn!(%namespace, error = ?err, "cleanup failed"),
            }
        }
    }

    /// Takes the processing flag if it is unset or `NO`.
    async fn acquire_processing_flag(&self) -> Result<bool> {
        let store = &self.ctx.coordination;
        let flag = &self.ctx.config.processing_flag;
        let acquired = store.compare_and_swap(flag, None, FLAG_YES).await?
            || store.compare_and_swap(flag, Some(FLAG_NO), FLAG_YES).await?;
        Ok(acquired)
    }

    async fn release_processing_flag(&self) {
        let flag = &self.ctx.config.processing_flag;
        let released = with_retry(&self.ctx.config.transfer, "release processing flag", || {
            self.ctx.coordination.set(flag, FLAG_NO)
        })
        .await;
        if let Err(err) = released {
            error!(%flag, error = ?err, "processing flag is still set; reset it with `wci-ctl reset`");
        }
    }

    async fn arm_triggered_indexing(&self) {
        let flag = &self.ctx.config.armed_flag;
        let armed = with_retry(&self.ctx.config.transfer, "arm triggered indexing", || {
            self.ctx.coordination.set(flag, FLAG_YES)
        })
        .await;
        if let Err(err) = armed {
            error!(%flag, error = ?err, "could not arm triggered indexing");
        }
    }

    fn enter(&self, phase: RunPhase) {
        debug!(?phase, "entering phase");
        self.phase.send_replace(phase);
    }
}

/// Runs one task to a terminal status, retrying per `policy`. Each attempt
/// is bounded by the policy deadline.
async fn dispatch_with_retry(
    dispatcher: Arc<dyn TaskDispatcher>,
    policy: RetryPolicy,
    task: Task,
) -> TaskOutcome {
    let (kind, index) = (task.kind(), task.index());
    let mut attempts = 0;
    let result = with_retry(&policy, &format!("{kind} task {index}"), || {
        attempts += 1;
        let dispatcher = dispatcher.clone();
        let task = task.clone();
        async move {
            match dispatcher.run(task).await? {
                TaskStatus::Succeeded => Ok(()),
                TaskStatus::Failed(reason) => Err(anyhow!(reason)),
            }
        }
    })
    .await;

    let status = match result {
        Ok(()) => {
            debug!(kind, index, attempts, "task succeeded");
            TaskStatus::Succeeded
        }
        Err(err) => {
            error!(kind, index, attempts, error = ?err, "task failed");
            TaskStatus::Failed(format!("{err:#}"))
        }
    };
    TaskOutcome {
        index,
        attempts,
        status,
    }
}

/// Splits `documents` round-robin into exactly `num_mappers` groups:
/// document `i` goes to mapper `i % num_mappers`.
pub fn assign_documents(documents: Vec<String>, num_mappers: u32) -> Vec<Vec<String>> {
    let num_mappers = num_mappers.max(1) as usize;
    let mut groups = vec![Vec::new(); num_mappers];
    for (i, document) in documents.into_iter().enumerate() {
        groups[i % num_mappers].push(document);
    }
    debug!(
        sizes = %groups.iter().map(Vec::len).join(", "),
        "documents assigned"
    );
    groups
}
