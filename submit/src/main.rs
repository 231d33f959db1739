mod config;
mod query;
mod render;

use clap::Parser;
use config::{ConfigErrors, SubmitOptions};
use query::{das::DasClient, resolve_samples, QueryError};
use render::{current_user, render, write_submission, RenderError};
use std::{path::PathBuf, process::ExitCode};
use thiserror::Error;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

/// Generate a CRAB submission config for the HGCAL L1T emulator
#[derive(Parser, Debug)]
#[command(version)]
struct Cli {
    /// Number of samples to process. If -1 process all samples [default: 1]
    #[arg(short = 'N', allow_negative_numbers = true)]
    n_samples: Option<i64>,

    /// Dataset name in DAS
    #[arg(short = 'd')]
    dataset: Option<String>,

    /// CMSSW config file to run
    #[arg(short = 'c')]
    config: Option<String>,

    /// Submission file name [default: submit_crab]
    #[arg(short = 'n')]
    name: Option<String>,

    /// Output LFN directory [default: HGCAL_L1T_emulator_Feb22]
    #[arg(short = 'o')]
    out_lfn_dir: Option<String>,

    /// User storage site [default: T2_UK_London_IC]
    #[arg(long = "storage_site")]
    storage_site: Option<String>,

    /// Files processed by each job [default: 1]
    #[arg(long)]
    units_per_job: Option<u32>,

    /// Memory requested per job [default: 2500]
    #[arg(long)]
    max_memory_mb: Option<u32>,

    /// YAML file with defaults for any of the options above
    #[arg(long)]
    defaults: Option<PathBuf>,

    /// DAS client used to count the files of a dataset [default: dasgoclient]
    #[arg(long)]
    das_client: Option<String>,

    /// Seconds to wait for the DAS client before giving up
    #[arg(long)]
    query_timeout: Option<u64>,

    /// Directory the config is written to
    #[arg(long, default_value = ".")]
    output_dir: PathBuf,

    /// Print the config instead of writing it
    #[arg(long)]
    dry_run: bool,
}

impl Cli {
    fn options(&self) -> SubmitOptions {
        SubmitOptions {
            name: self.name.clone(),
            dataset: self.dataset.clone(),
            pset: self.config.clone(),
            out_lfn_dir: self.out_lfn_dir.clone(),
            storage_site: self.storage_site.clone(),
            samples: self.n_samples,
            units_per_job: self.units_per_job,
            max_memory_mb: self.max_memory_mb,
            das_client: self.das_client.clone(),
            query_timeout: self.query_timeout,
            ..Default::default()
        }
    }
}

#[derive(Error, Debug)]
enum SubmitError {
    #[error(transparent)]
    Config(#[from] ConfigErrors),
    #[error(transparent)]
    Query(#[from] QueryError),
    #[error(transparent)]
    Render(#[from] RenderError),
}

fn run(cli: Cli) -> Result<(), SubmitError> {
    let options = match cli.defaults {
        Some(ref path) => SubmitOptions::load(path)?,
        None => SubmitOptions::default(),
    }
    .overlay(cli.options());

    let mut request = options.request()?;
    let client = DasClient::new(options.query_timeout());
    resolve_samples(&mut request, &client, options.das_client())?;

    let user = current_user()?;

    if cli.dry_run {
        println!("{}", render(&request, &user)?);
    } else {
        let path = write_submission(&request, &user, &cli.output_dir)?;
        info!("Submit with: crab submit -c {}", path.to_string_lossy());
    }

    Ok(())
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    match run(Cli::parse()) {
        Ok(()) => ExitCode::SUCCESS,
        Err(error) => {
            error!(error = ?error, "Failed to generate crab config: {error}");

            ExitCode::FAILURE
        }
    }
}
