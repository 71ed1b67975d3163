use clap::Parser;

#[derive(Parser, Debug)]
#[command(version, about = "Serves an in-memory coordination store", long_about = None)]
pub struct Args {
    /// Address to listen on
    #[clap(short, long, default_value = "127.0.0.1:50052")]
    pub listen: String,
}
