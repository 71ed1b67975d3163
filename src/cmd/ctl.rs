use super::ConfigArgs;
use clap::{Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(version, about = "Operates a word-count index deployment", long_about = None)]
pub struct Args {
    #[clap(subcommand)]
    pub command: Commands,
    #[command(flatten)]
    pub common: ConfigArgs,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Upload local files into the input namespace
    Seed {
        /// Glob spec for the input files
        #[arg(short, long)]
        input: String,
    },
    /// Clear the coordination store and set both run flags to NO
    Reset,
    /// Print the index entry of one word
    Lookup {
        word: String,
    },
    /// Print the whole index
    Index,
    /// Print the run-control flags
    Flags,
}
