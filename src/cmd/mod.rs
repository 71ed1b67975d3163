//! Command line arguments of the binaries.

use crate::config::Config;
use anyhow::Result;
use std::path::PathBuf;

pub mod coordinator;
pub mod ctl;
pub mod store;
pub mod worker;

/// Flags every binary accepts. Each one overrides the matching field of
/// the configuration file.
#[derive(clap::Args, Debug, Clone, Default)]
pub struct ConfigArgs {
    /// JSON configuration file (defaults apply to missing fields)
    #[clap(short, long)]
    pub config: Option<PathBuf>,
    /// Endpoint of the object store
    #[clap(short = 's', long)]
    pub os: Option<String>,
    /// Login user of the object store
    #[clap(short, long)]
    pub user: Option<String>,
    /// Login password of the object store
    #[clap(short, long)]
    pub pw: Option<String>,
    /// Bucket holding inputs, shards and aggregates
    #[clap(short, long)]
    pub bucket: Option<String>,
    /// Address of the coordination store
    #[clap(long)]
    pub store: Option<String>,
}

impl ConfigArgs {
    pub fn load(&self) -> Result<Config> {
        let mut config = Config::load_or_default(self.config.as_deref())?;
        if let Some(os) = &self.os {
            config.object_store.endpoint = os.clone();
        }
        if let Some(user) = &self.user {
            config.object_store.user = user.clone();
        }
        if let Some(pw) = &self.pw {
            config.object_store.password = pw.clone();
        }
        if let Some(bucket) = &self.bucket {
            config.bucket = bucket.clone();
        }
        if let Some(store) = &self.store {
            config.store_addr = store.clone();
        }
        Ok(config)
    }
}
