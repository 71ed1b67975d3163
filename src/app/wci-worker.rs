use anyhow::{Context, Result};
use clap::Parser;
use std::net::SocketAddr;
use std::sync::Arc;
use tonic::transport::Server;
use tracing::info;
use wcindex::cmd::worker::Args;
use wcindex::coordination::GrpcCoordinationStore;
use wcindex::dispatch::WorkerService;
use wcindex::object_store::S3ObjectStore;
use wcindex::rpc::worker_server::WorkerServer;
use wcindex::utils::init_tracing;
use wcindex::TaskContext;

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    let args = Args::parse();
    let config = args.common.load()?;
    config.validate()?;

    let listen = args.listen.unwrap_or_else(|| config.worker_addr.clone());
    let addr: SocketAddr = listen
        .parse()
        .with_context(|| format!("invalid listen address `{listen}`"))?;

    let objects = S3ObjectStore::connect(&config.object_store, &config.bucket).await?;
    let coordination = GrpcCoordinationStore::connect(&config.store_addr).await?;
    info!(
        bucket = %objects.bucket(),
        store = %config.store_addr,
        "worker connected"
    );
    let ctx = TaskContext::new(Arc::new(objects), Arc::new(coordination), config);

    info!(%addr, "worker listening");
    Server::builder()
        .add_service(WorkerServer::new(WorkerService::new(ctx)))
        .serve(addr)
        .await?;
    Ok(())
}
