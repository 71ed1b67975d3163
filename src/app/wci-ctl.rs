use anyhow::Result;
use clap::Parser;
use itertools::Itertools;
use wcindex::cmd::ctl::{Args, Commands};
use wcindex::config::FLAG_NO;
use wcindex::coordination::{CoordinationStore, GrpcCoordinationStore};
use wcindex::index::{lookup, snapshot};
use wcindex::object_store::S3ObjectStore;
use wcindex::utils::{init_tracing, stage_documents};

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    let args = Args::parse();
    let config = args.common.load()?;

    match args.command {
        Commands::Seed { input } => {
            let objects = S3ObjectStore::connect(&config.object_store, &config.bucket).await?;
            let staged = stage_documents(&objects, &config, &input).await?;
            println!("Staged {} document(s): {}", staged.len(), staged.iter().join(", "));
        }
        Commands::Reset => {
            let store = GrpcCoordinationStore::connect(&config.store_addr).await?;
            store.clear().await?;
            store.set(&config.armed_flag, FLAG_NO).await?;
            store.set(&config.processing_flag, FLAG_NO).await?;
            println!("Coordination store cleared, run flags reset");
        }
        Commands::Lookup { word } => {
            let store = GrpcCoordinationStore::connect(&config.store_addr).await?;
            match lookup(&store, &config.index_hash, &word).await? {
                Some(entry) => {
                    println!("{word}: {} occurrence(s)", entry.total());
                    for (document, count) in &entry.filenames {
                        println!("\t{document}\t{count}");
                    }
                }
                None => println!("No data found for '{word}'"),
            }
        }
        Commands::Index => {
            let store = GrpcCoordinationStore::connect(&config.store_addr).await?;
            let index = snapshot(&store, &config.index_hash).await?;
            println!("{}", serde_json::to_string_pretty(&index)?);
        }
        Commands::Flags => {
            let store = GrpcCoordinationStore::connect(&config.store_addr).await?;
            for flag in [&config.armed_flag, &config.processing_flag] {
                let value = store.get(flag).await?;
                println!("{flag}:\t{}", value.as_deref().unwrap_or("(unset)"));
            }
        }
    }
    Ok(())
}
