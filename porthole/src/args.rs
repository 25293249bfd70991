use clap::{Parser, Subcommand};
use porthole_common::args::{ClusterArgs, TuningArgs};

#[derive(Parser, Debug, Clone)]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Debug, Clone, Subcommand)]
pub enum Commands {
    /// Run the refresh backend: informers, streams and the snapshot service.
    Server(ServerArgs),
}

#[derive(Debug, Clone, clap::Args)]
pub struct ServerArgs {
    #[clap(flatten)]
    pub clusters: ClusterArgs,

    #[clap(flatten)]
    pub tuning: TuningArgs,
}
