mod cli;

use std::fs::File;
use std::io::BufWriter;
use std::path::Path;

use anyhow::{Context, Result};
use clap::Parser;
use log::info;

use cli::{Args, Command};
use dipfit::pipeline::{self, PipelineOutput};
use dipfit::report::{format_summary, write_comparison_csv, write_dipoles_csv};
use dipfit::{phantom, Config, Recording};

fn main() -> Result<()> {
    let args = Args::parse();

    env_logger::Builder::new()
        .filter_level(if args.verbose {
            log::LevelFilter::Debug
        } else {
            log::LevelFilter::Info
        })
        .parse_default_env()
        .init();

    let mut config = Config::load_or_default(&args.config);

    match args.command {
        Command::Simulate { out } => {
            let recording = simulate(&config)?;
            recording
                .save_json(&out)
                .with_context(|| format!("writing recording {}", out.display()))?;
        }
        Command::Fit {
            recording,
            dipoles_csv,
            comparison_csv,
        } => {
            let rec = Recording::load_json(&recording)
                .with_context(|| format!("reading recording {}", recording.display()))?;
            let output = pipeline::run(&rec, &config).context("running the fit pipeline")?;
            if let Some(path) = dipoles_csv {
                let file = create(&path)?;
                write_dipoles_csv(file, &output.outcomes)
                    .with_context(|| format!("writing {}", path.display()))?;
                info!("Wrote dipoles to {}", path.display());
            }
            if let Some(path) = comparison_csv {
                let file = create(&path)?;
                write_comparison_csv(file, &output.comparison)
                    .with_context(|| format!("writing {}", path.display()))?;
                info!("Wrote comparison to {}", path.display());
            }
            print_summary(&output);
        }
        Command::Demo { n_dipoles } => {
            if let Some(n) = n_dipoles {
                config.simulation.n_dipoles = n;
            }
            let rec = simulate(&config)?;
            let output = pipeline::run(&rec, &config).context("running the fit pipeline")?;
            print_summary(&output);
        }
        Command::Config => {
            print!("{}", config.to_toml_string().context("serializing config")?);
        }
    }
    Ok(())
}

fn simulate(config: &Config) -> Result<Recording> {
    let sphere = config.sphere_model().context("invalid [sphere] section")?;
    phantom::simulate(&config.simulation, &sphere).context("simulating phantom session")
}

fn create(path: &Path) -> Result<BufWriter<File>> {
    let file = File::create(path).with_context(|| format!("creating {}", path.display()))?;
    Ok(BufWriter::new(file))
}

fn print_summary(output: &PipelineOutput) {
    print!("{}", format_summary(&output.report, &output.comparison));
}
