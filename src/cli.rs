use std::path::PathBuf;

use clap::{Parser, Subcommand};

/// Equivalent current dipole fitting for MEG phantom recordings
#[derive(Parser, Debug)]
#[command(name = "dipfit", author, version, about)]
pub struct Args {
    /// Path to config TOML (defaults are used if it does not exist)
    #[arg(long, global = true, default_value = "dipfit.toml")]
    pub config: PathBuf,

    /// Enable debug logging (RUST_LOG overrides)
    #[arg(short, long, global = true, default_value_t = false)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Simulate a phantom session and write it as a JSON recording
    Simulate {
        /// Output recording path
        #[arg(value_name = "OUT")]
        out: PathBuf,
    },

    /// Fit one dipole per condition of a JSON recording
    Fit {
        /// Recording path
        #[arg(value_name = "RECORDING")]
        recording: PathBuf,

        /// Write fitted dipoles as CSV
        #[arg(long)]
        dipoles_csv: Option<PathBuf>,

        /// Write per-dipole errors as CSV
        #[arg(long)]
        comparison_csv: Option<PathBuf>,
    },

    /// Simulate and fit in memory, printing the summary
    Demo {
        /// Override the number of phantom dipoles driven
        #[arg(long)]
        n_dipoles: Option<usize>,
    },

    /// Print the effective configuration as TOML
    Config,
}
