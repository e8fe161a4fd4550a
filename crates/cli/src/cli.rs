use clap::{ArgAction, Args, Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
pub enum Pattern {
    /// Every page in order, wrapping at the end of the footprint.
    #[value(name = "sequential")]
    Sequential,
    /// Fixed byte stride, wrapping at the end of the footprint.
    #[value(name = "strided")]
    Strided,
    /// Uniform over the footprint.
    #[value(name = "random")]
    Random,
}

#[derive(Parser)]
#[command(name = "vmsim")]
#[command(about = "Address translation timing simulator")]
pub struct Cli {
    /// Raise log verbosity (-v info, -vv debug, -vvv trace).
    #[arg(short, long, action = ArgAction::Count, global = true)]
    pub verbose: u8,

    #[command(subcommand)]
    pub cmd: Cmd,
}

#[derive(Subcommand)]
pub enum Cmd {
    /// Run a synthetic access stream through the MMU and print statistics.
    Run(RunArgs),

    /// Print the effective configuration as TOML.
    ///
    /// Without --config this is the built-in default, a starting point for
    /// a configuration file.
    Config {
        #[arg(long)]
        config: Option<PathBuf>,
    },
}

#[derive(Args, Clone, Debug)]
pub struct RunArgs {
    /// TOML configuration; missing fields take their defaults.
    #[arg(long)]
    pub config: Option<PathBuf>,

    #[arg(long, value_enum, default_value_t = Pattern::Sequential)]
    pub pattern: Pattern,

    /// Number of translation requests.
    #[arg(long, default_value_t = 100_000)]
    pub accesses: u64,

    /// Size of the touched virtual region.
    #[arg(long, default_value_t = 64)]
    pub footprint_mb: u64,

    /// Byte stride for the strided pattern.
    #[arg(long, default_value_t = 4096)]
    pub stride: u64,

    /// Fraction of requests that are instruction fetches.
    #[arg(long, default_value_t = 0.0)]
    pub instruction_ratio: f64,

    /// Simulated cores; requests are dealt round-robin.
    #[arg(long, default_value_t = 1)]
    pub cores: usize,

    #[arg(long, default_value_t = 42)]
    pub seed: u64,

    /// Print the full report as JSON.
    #[arg(long)]
    pub json: bool,
}
