use anyhow::Result;
use clap::Parser;

mod app;
mod cli;
mod logger;
mod report;
mod workload;

fn main() -> Result<()> {
    let cli = crate::cli::Cli::parse();
    crate::app::run(cli)
}
