use super::ConfigArgs;
use clap::Parser;

#[derive(Parser, Debug)]
#[command(version, about = "Serves mapper and reducer tasks", long_about = None)]
pub struct Args {
    #[command(flatten)]
    pub common: ConfigArgs,
    /// Address to listen on (defaults to `worker_addr`)
    #[clap(short, long)]
    pub listen: Option<String>,
}
