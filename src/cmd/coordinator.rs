use super::ConfigArgs;
use clap::Parser;

#[derive(Parser, Debug)]
#[command(version, about = "Runs one word-count indexing run", long_about = None)]
pub struct Args {
    #[command(flatten)]
    pub common: ConfigArgs,
    /// Number of mapper tasks
    #[clap(short, long)]
    pub mappers: Option<u32>,
    /// Number of reducer tasks
    #[clap(short, long)]
    pub reducers: Option<u32>,
    /// Address of the worker to dispatch tasks to
    #[clap(short, long)]
    pub worker: Option<String>,
    /// Run mapper and reducer tasks in this process instead of on a worker
    #[clap(short, long)]
    pub local: bool,
    /// Index only this newly staged object (e.g. `input/doc3.txt`), if a
    /// full run has already finished
    #[clap(short, long)]
    pub trigger: Option<String>,
    /// Run entirely in memory over the local files matching this glob and
    /// print the resulting index. Needs neither object store nor
    /// coordination store.
    #[clap(long, conflicts_with_all = ["worker", "trigger"])]
    pub standalone: Option<String>,
}
