use anyhow::{bail, Result};
use clap::Parser;
use std::process::ExitCode;
use std::sync::Arc;
use tracing::info;
use wcindex::cmd::coordinator::Args;
use wcindex::config::Config;
use wcindex::coordination::{CoordinationStore, GrpcCoordinationStore, InMemoryCoordinationStore};
use wcindex::coordinator::{Coordinator, RunReport, RunStatus};
use wcindex::dispatch::{GrpcDispatcher, LocalDispatcher, TaskDispatcher};
use wcindex::index::snapshot;
use wcindex::object_store::{InMemoryObjectStore, ObjectStore, S3ObjectStore};
use wcindex::utils::{init_tracing, stage_documents};
use wcindex::TaskContext;

/// Logs phase transitions until the coordinator goes away.
fn log_phases(coordinator: &Coordinator) {
    let mut phases = coordinator.subscribe();
    tokio::spawn(async move {
        while phases.changed().await.is_ok() {
            let phase = *phases.borrow();
            info!(?phase, "coordinator phase");
        }
    });
}

fn print_report(report: &RunReport) -> Result<ExitCode> {
    println!("{}", serde_json::to_string_pretty(report)?);
    Ok(match report.status {
        RunStatus::Complete | RunStatus::Skipped => ExitCode::SUCCESS,
        RunStatus::Partial => ExitCode::from(2),
        RunStatus::Rejected => ExitCode::from(3),
    })
}

/// Everything in memory: stage local files, run, print the index.
async fn run_standalone(config: Config, pattern: &str) -> Result<ExitCode> {
    let objects = InMemoryObjectStore::new();
    let coordination = InMemoryCoordinationStore::new();
    let staged = stage_documents(&objects, &config, pattern).await?;
    if staged.is_empty() {
        bail!("no files match `{pattern}`");
    }

    let index_hash = config.index_hash.clone();
    let ctx = TaskContext::new(Arc::new(objects), Arc::new(coordination.clone()), config);
    let coordinator = Coordinator::new(ctx.clone(), Arc::new(LocalDispatcher::new(ctx)));
    log_phases(&coordinator);

    let report = coordinator.run().await?;
    let index = snapshot(&coordination, &index_hash).await?;
    println!("{}", serde_json::to_string_pretty(&index)?);
    print_report(&report)
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    init_tracing();
    let args = Args::parse();
    let mut config = args.common.load()?;
    if let Some(mappers) = args.mappers {
        config.num_mappers = mappers;
    }
    if let Some(reducers) = args.reducers {
        config.num_reducers = reducers;
    }
    if let Some(worker) = &args.worker {
        config.worker_addr = worker.clone();
    }

    if let Some(pattern) = &args.standalone {
        return run_standalone(config, pattern).await;
    }

    let objects: Arc<dyn ObjectStore> =
        Arc::new(S3ObjectStore::connect(&config.object_store, &config.bucket).await?);
    let coordination: Arc<dyn CoordinationStore> =
        Arc::new(GrpcCoordinationStore::connect(&config.store_addr).await?);
    let worker_addr = config.worker_addr.clone();
    let ctx = TaskContext::new(objects, coordination, config);

    let dispatcher: Arc<dyn TaskDispatcher> = if args.local {
        Arc::new(LocalDispatcher::new(ctx.clone()))
    } else {
        Arc::new(GrpcDispatcher::connect(&worker_addr).await?)
    };
    let coordinator = Coordinator::new(ctx, dispatcher);
    log_phases(&coordinator);

    let report = match &args.trigger {
        Some(object) => coordinator.run_triggered(object).await?,
        None => coordinator.run().await?,
    };
    print_report(&report)
}
