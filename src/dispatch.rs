//! How the coordinator gets a task executed.
//!
//! The coordinator only sees [`TaskDispatcher`]. [`LocalDispatcher`] runs
//! tasks on the current runtime; [`GrpcDispatcher`] sends them to a
//! `wci-worker`, which runs them through its own [`LocalDispatcher`]
//! behind [`WorkerService`].

use crate::rpc::worker_client::WorkerClient;
use crate::rpc::worker_server::Worker;
use crate::rpc::{MapTaskRequest, ReduceTaskRequest, TaskResponse};
use crate::{mapper, reducer, MapTask, ReduceTask, RunId, Task, TaskContext, TaskStatus};
use anyhow::{Context, Result};
use itertools::Itertools;
use std::future::Future;
use tokio::task::{JoinError, JoinHandle};
use tonic::transport::Channel;
use tonic::{Request, Response, Status};
use tracing::error;

/// Executes map and reduce tasks and reports their terminal status.
///
/// `Err` means the task could not be handed off at all; a task that ran and
/// failed is `Ok(TaskStatus::Failed(..))`.
#[tonic::async_trait]
pub trait TaskDispatcher: Send + Sync {
    async fn run_map(&self, task: MapTask) -> Result<TaskStatus>;

    async fn run_reduce(&self, task: ReduceTask) -> Result<TaskStatus>;

    async fn run(&self, task: Task) -> Result<TaskStatus> {
        match task {
            Task::Map(task) => self.run_map(task).await,
            Task::Reduce(task) => self.run_reduce(task).await,
        }
    }
}

/// Owns a spawned task and aborts it when dropped, so a caller that gives
/// up on a task (deadline, cancelled RPC) also stops the work.
struct AbortOnDrop<T>(JoinHandle<T>);

impl<T> Drop for AbortOnDrop<T> {
    fn drop(&mut self) {
        self.0.abort();
    }
}

async fn spawn_owned<T, F>(work: F) -> Result<T, JoinError>
where
    T: Send + 'static,
    F: Future<Output = T> + Send + 'static,
{
    let mut handle = AbortOnDrop(tokio::spawn(work));
    (&mut handle.0).await
}

/// Runs tasks in this process, each on its own tokio task. A task whose
/// dispatch future is dropped is aborted.
#[derive(Clone)]
pub struct LocalDispatcher {
    ctx: TaskContext,
}

impl LocalDispatcher {
    pub fn new(ctx: TaskContext) -> Self {
        Self { ctx }
    }
}

#[tonic::async_trait]
impl TaskDispatcher for LocalDispatcher {
    async fn run_map(&self, task: MapTask) -> Result<TaskStatus> {
        let ctx = self.ctx.clone();
        let index = task.mapper_index;
        let status = match spawn_owned(async move { mapper::run(&ctx, &task).await }).await {
            Ok(Ok(summary)) if summary.is_complete() => TaskStatus::Succeeded,
            Ok(Ok(summary)) => TaskStatus::Failed(format!(
                "shards not uploaded: {}",
                summary.failed_shards.iter().join(", ")
            )),
            Ok(Err(err)) => TaskStatus::Failed(format!("{err:#}")),
            Err(err) => {
                error!(mapper = index, error = %err, "map task aborted");
                TaskStatus::Failed(format!("map task aborted: {err}"))
            }
        };
        Ok(status)
    }

    async fn run_reduce(&self, task: ReduceTask) -> Result<TaskStatus> {
        let ctx = self.ctx.clone();
        let index = task.reducer_index;
        let status = match spawn_owned(async move { reducer::run(&ctx, &task).await }).await {
            Ok(Ok(_)) => TaskStatus::Succeeded,
            Ok(Err(err)) => TaskStatus::Failed(format!("{err:#}")),
            Err(err) => {
                error!(reducer = index, error = %err, "reduce task aborted");
                TaskStatus::Failed(format!("reduce task aborted: {err}"))
            }
        };
        Ok(status)
    }
}

/// Sends tasks to a remote worker.
#[derive(Clone, Debug)]
pub struct GrpcDispatcher {
    client: WorkerClient<Channel>,
}

impl GrpcDispatcher {
    pub async fn connect(addr: &str) -> Result<Self> {
        let client = WorkerClient::connect(format!("http://{addr}"))
            .await
            .with_context(|| format!("connecting to worker at {addr}"))?;
        Ok(Self { client })
    }
}

#[tonic::async_trait]
impl TaskDispatcher for GrpcDispatcher {
    async fn run_map(&self, task: MapTask) -> Result<TaskStatus> {
        let mapper = task.mapper_index;
        let response = self
            .client
            .clone()
            .run_map(Request::new(MapTaskRequest::from(task)))
            .await
            .with_context(|| format!("dispatching map task {mapper}"))?;
        Ok(response.into_inner().into())
    }

    async fn run_reduce(&self, task: ReduceTask) -> Result<TaskStatus> {
        let reducer = task.reducer_index;
        let response = self
            .client
            .clone()
            .run_reduce(Request::new(ReduceTaskRequest::from(task)))
            .await
            .with_context(|| format!("dispatching reduce task {reducer}"))?;
        Ok(response.into_inner().into())
    }
}

/// gRPC front of a worker process.
pub struct WorkerService {
    dispatcher: LocalDispatcher,
}

impl WorkerService {
    pub fn new(ctx: TaskContext) -> Self {
        Self {
            dispatcher: LocalDispatcher::new(ctx),
        }
    }
}

#[tonic::async_trait]
impl Worker for WorkerService {
    async fn run_map(&self, request: Request<MapTaskRequest>) -> Result<Response<TaskResponse>, Status> {
        let task = MapTask::from(request.into_inner());
        let status = self.dispatcher.run_map(task).await.map_err(crate::rpc::internal)?;
        Ok(Response::new(status.into()))
    }

    async fn run_reduce(
        &self,
        request: Request<ReduceTaskRequest>,
    ) -> Result<Response<TaskResponse>, Status> {
        let task = ReduceTask::from(request.into_inner());
        let status = self.dispatcher.run_reduce(task).await.map_err(crate::rpc::internal)?;
        Ok(Response::new(status.into()))
    }
}

impl From<MapTask> for MapTaskRequest {
    fn from(task: MapTask) -> Self {
        Self {
            run_id: task.run_id.to_string(),
            document_names: task.document_names,
            mapper_index: task.mapper_index,
            num_reducers: task.num_reducers,
        }
    }
}

impl From<MapTaskRequest> for MapTask {
    fn from(request: MapTaskRequest) -> Self {
        Self {
            run_id: RunId::from(request.run_id),
            document_names: request.document_names,
            mapper_index: request.mapper_index,
            num_reducers: request.num_reducers,
        }
    }
}

impl From<ReduceTask> for ReduceTaskRequest {
    fn from(task: ReduceTask) -> Self {
        Self {
            run_id: task.run_id.to_string(),
            reducer_index: task.reducer_index,
            num_mappers: task.num_mappers,
        }
    }
}

impl From<ReduceTaskRequest> for ReduceTask {
    fn from(request: ReduceTaskRequest) -> Self {
        Self {
            run_id: RunId::from(request.run_id),
            reducer_index: request.reducer_index,
            num_mappers: request.num_mappers,
        }
    }
}

impl From<TaskStatus> for TaskResponse {
    fn from(status: TaskStatus) -> Self {
        match status {
            TaskStatus::Succeeded => Self {
                success: true,
                message: String::new(),
            },
            TaskStatus::Failed(message) => Self {
                success: false,
                message,
            },
        }
    }
}

impl From<TaskResponse> for TaskStatus {
    fn from(response: TaskResponse) -> Self {
        if response.success {
            TaskStatus::Succeeded
        } else {
            TaskStatus::Failed(response.message)
        }
    }
}
