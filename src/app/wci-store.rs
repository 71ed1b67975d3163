use anyhow::{Context, Result};
use clap::Parser;
use std::net::SocketAddr;
use std::sync::Arc;
use tonic::transport::Server;
use tracing::info;
use wcindex::cmd::store::Args;
use wcindex::coordination::{InMemoryCoordinationStore, StoreService};
use wcindex::rpc::coordination_store_server::CoordinationStoreServer;
use wcindex::utils::init_tracing;

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    let args = Args::parse();
    let addr: SocketAddr = args
        .listen
        .parse()
        .with_context(|| format!("invalid listen address `{}`", args.listen))?;

    let service = StoreService::new(Arc::new(InMemoryCoordinationStore::new()));
    info!(%addr, "coordination store listening");
    Server::builder()
        .add_service(CoordinationStoreServer::new(service))
        .serve(addr)
        .await?;
    Ok(())
}
