use crate::config::{SampleCount, SubmissionRequest};
use itertools::Itertools;
use nix::unistd::{getuid, User};
use std::{
    env, fs,
    io::Error,
    path::{Path, PathBuf},
};
use thiserror::Error;
use tracing::{debug, info, warn};

/// stripped from the job name to get the output dataset tag
pub const OUTPUT_TAG_PREFIX: &str = "submit_";

#[derive(Debug, Error)]
pub enum RenderError {
    #[error("Sample count of {0} has not been resolved")]
    UnresolvedSamples(String),
    #[error("Unable to determine the current user from $USER or the passwd database")]
    UnknownUser,
    #[error("Failed to write {path}")]
    Write {
        path: PathBuf,
        #[source]
        source: Error,
    },
}

/// user name for the `/store/user` output path
pub fn current_user() -> Result<String, RenderError> {
    match env::var("USER") {
        Ok(user) if !user.is_empty() => Ok(user),
        _ => {
            warn!("USER is not set, falling back to the passwd entry of the current uid");

            match User::from_uid(getuid()) {
                Ok(Some(user)) => Ok(user.name),
                Ok(None) => Err(RenderError::UnknownUser),
                Err(error) => {
                    warn!(error = ?error, "Failed to look up the current uid: {error}");

                    Err(RenderError::UnknownUser)
                }
            }
        }
    }
}

fn python_bool(value: bool) -> &'static str {
    if value {
        "True"
    } else {
        "False"
    }
}

/// Render the crab config for a resolved request
pub fn render(request: &SubmissionRequest, user: &str) -> Result<String, RenderError> {
    let samples = match request.samples {
        SampleCount::Count(samples) => samples,
        SampleCount::All => return Err(RenderError::UnresolvedSamples(request.name.clone())),
    };

    let lines = [
        "from CRABClient.UserUtilities import config".to_owned(),
        "config = config()".to_owned(),
        String::new(),
        format!("config.General.requestName = '{}'", request.name),
        format!("config.General.workArea = '{}'", request.work_area),
        "config.General.transferOutputs = True".to_owned(),
        "config.General.transferLogs = True".to_owned(),
        String::new(),
        "config.JobType.pluginName = 'Analysis'".to_owned(),
        format!("config.JobType.psetName = '{}'", request.pset),
        format!("config.JobType.maxMemoryMB = {}", request.max_memory_mb),
        String::new(),
        format!("config.Data.inputDataset = '{}'", request.dataset),
        "config.Data.inputDBS = 'global'".to_owned(),
        "config.Data.splitting = 'FileBased'".to_owned(),
        format!("config.Data.unitsPerJob = {}", request.units_per_job),
        format!("NJOBS = {samples}"),
        "config.Data.totalUnits = config.Data.unitsPerJob * NJOBS".to_owned(),
        format!(
            "config.Data.outLFNDirBase = '/store/user/{user}/{}'",
            request.out_lfn_dir
        ),
        format!(
            "config.Data.publication = {}",
            python_bool(request.publication)
        ),
        format!("config.Data.outputDatasetTag = '{}'", request.output_tag()),
        String::new(),
        format!("config.Site.storageSite = '{}'", request.storage_site),
    ];

    Ok(lines.iter().join("\n"))
}

/// Render `request` into `<dir>/<name>_cfg.py`, replacing any previous file
pub fn write_submission(
    request: &SubmissionRequest,
    user: &str,
    dir: &Path,
) -> Result<PathBuf, RenderError> {
    let content = render(request, user)?;
    let path = dir.join(request.file_name());

    debug!(path = ?path, "Writing {} bytes", content.len());
    fs::write(&path, content).map_err(|source| RenderError::Write {
        path: path.clone(),
        source,
    })?;
    info!(path = ?path, "Wrote crab config for {}", request.name);

    Ok(path)
}

#[cfg(test)]
#[path = "render_test.rs"]
mod render_test;
