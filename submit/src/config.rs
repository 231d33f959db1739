use serde::{Deserialize, Serialize};
use std::{
    fs,
    io::Error,
    path::{Path, PathBuf},
    time::Duration,
};
use thiserror::Error;
use tracing::{debug, warn};

pub const DEFAULT_NAME: &str = "submit_crab";
pub const DEFAULT_OUT_LFN_DIR: &str = "HGCAL_L1T_emulator_Feb22";
pub const DEFAULT_STORAGE_SITE: &str = "T2_UK_London_IC";
pub const DEFAULT_WORK_AREA: &str = "crab_area";
pub const DEFAULT_UNITS_PER_JOB: u32 = 1;
pub const DEFAULT_MAX_MEMORY_MB: u32 = 2500;
pub const DEFAULT_SAMPLES: i64 = 1;
/// sentinel for "every file in the dataset"
pub const ALL_SAMPLES: i64 = -1;

#[derive(Error, Debug)]
pub enum ConfigErrors {
    #[error("Failed to read defaults file {path}")]
    ReadDefaults {
        path: PathBuf,
        #[source]
        source: Error,
    },
    #[error("Defaults file is not valid")]
    InvalidDefaults(#[from] serde_yaml::Error),
    #[error("Sample count {0} is not valid, use -1 for all files or a count of at least 0")]
    InvalidSampleCount(i64),
    #[error("Job name must not be empty")]
    EmptyName,
}

/// Number of input files a submission should cover
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SampleCount {
    /// resolve through a dataset query before rendering
    All,
    Count(u64),
}

impl TryFrom<i64> for SampleCount {
    type Error = ConfigErrors;

    fn try_from(value: i64) -> Result<Self, Self::Error> {
        match value {
            ALL_SAMPLES => Ok(Self::All),
            count => u64::try_from(count)
                .map(Self::Count)
                .map_err(|_| ConfigErrors::InvalidSampleCount(count)),
        }
    }
}

/// Layered submission options.
///
/// Every field is optional so that a defaults file and the command line can be
/// stacked with `overlay`; unset values fall back to the built-in defaults once
/// the request is built.
#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct SubmitOptions {
    pub name: Option<String>,
    pub dataset: Option<String>,
    // CMSSW config handed to crab as psetName
    #[serde(alias = "config")]
    pub pset: Option<String>,
    pub out_lfn_dir: Option<String>,
    pub storage_site: Option<String>,
    pub samples: Option<i64>,
    pub units_per_job: Option<u32>,
    pub max_memory_mb: Option<u32>,
    pub work_area: Option<String>,
    pub publication: Option<bool>,
    // query backend, see query::DAS_BACKEND
    pub das_client: Option<String>,
    // seconds
    pub query_timeout: Option<u64>,
}

impl SubmitOptions {
    /// load options from a YAML defaults file
    pub fn load(path: &Path) -> Result<Self, ConfigErrors> {
        let content = fs::read_to_string(path).map_err(|source| ConfigErrors::ReadDefaults {
            path: path.to_path_buf(),
            source,
        })?;

        debug!(path = ?path, "Loaded defaults file");

        Self::parse(&content)
    }

    pub fn parse(content: &str) -> Result<Self, ConfigErrors> {
        Ok(serde_yaml::from_str(content)?)
    }

    /// Values set in `overrides` take precedence over the ones in `self`
    pub fn overlay(self, overrides: SubmitOptions) -> Self {
        Self {
            name: overrides.name.or(self.name),
            dataset: overrides.dataset.or(self.dataset),
            pset: overrides.pset.or(self.pset),
            out_lfn_dir: overrides.out_lfn_dir.or(self.out_lfn_dir),
            storage_site: overrides.storage_site.or(self.storage_site),
            samples: overrides.samples.or(self.samples),
            units_per_job: overrides.units_per_job.or(self.units_per_job),
            max_memory_mb: overrides.max_memory_mb.or(self.max_memory_mb),
            work_area: overrides.work_area.or(self.work_area),
            publication: overrides.publication.or(self.publication),
            das_client: overrides.das_client.or(self.das_client),
            query_timeout: overrides.query_timeout.or(self.query_timeout),
        }
    }

    pub fn das_client(&self) -> &str {
        self.das_client
            .as_deref()
            .unwrap_or(crate::query::DAS_BACKEND)
    }

    pub fn query_timeout(&self) -> Option<Duration> {
        self.query_timeout.map(Duration::from_secs)
    }

    /// Build the submission request, filling in defaults for everything unset.
    ///
    /// A missing dataset or pset is not an error, it ends up as an empty value
    /// in the rendered file and is only reported as a warning.
    pub fn request(&self) -> Result<SubmissionRequest, ConfigErrors> {
        let name = self.name.clone().unwrap_or_else(|| DEFAULT_NAME.to_owned());

        if name.is_empty() {
            return Err(ConfigErrors::EmptyName);
        }

        let dataset = self.dataset.clone().unwrap_or_default();
        let pset = self.pset.clone().unwrap_or_default();

        if dataset.is_empty() {
            warn!("No dataset given (-d), {name} will have an empty inputDataset");
        }
        if pset.is_empty() {
            warn!("No CMSSW config given (-c), {name} will have an empty psetName");
        }

        Ok(SubmissionRequest {
            name,
            dataset,
            pset,
            out_lfn_dir: self
                .out_lfn_dir
                .clone()
                .unwrap_or_else(|| DEFAULT_OUT_LFN_DIR.to_owned()),
            storage_site: self
                .storage_site
                .clone()
                .unwrap_or_else(|| DEFAULT_STORAGE_SITE.to_owned()),
            samples: SampleCount::try_from(self.samples.unwrap_or(DEFAULT_SAMPLES))?,
            units_per_job: self.units_per_job.unwrap_or(DEFAULT_UNITS_PER_JOB),
            max_memory_mb: self.max_memory_mb.unwrap_or(DEFAULT_MAX_MEMORY_MB),
            work_area: self
                .work_area
                .clone()
                .unwrap_or_else(|| DEFAULT_WORK_AREA.to_owned()),
            publication: self.publication.unwrap_or(true),
        })
    }
}

/// One CRAB job submission, consumed once by the renderer
#[derive(Clone, Debug, PartialEq)]
pub struct SubmissionRequest {
    pub name: String,
    pub dataset: String,
    pub pset: String,
    pub out_lfn_dir: String,
    pub storage_site: String,
    pub samples: SampleCount,
    pub units_per_job: u32,
    pub max_memory_mb: u32,
    pub work_area: String,
    pub publication: bool,
}

impl SubmissionRequest {
    /// file name of the rendered crab config
    pub fn file_name(&self) -> String {
        format!("{}_cfg.py", self.name)
    }

    /// output dataset tag, the job name without its `submit_` prefix
    pub fn output_tag(&self) -> &str {
        self.name
            .strip_prefix(crate::render::OUTPUT_TAG_PREFIX)
            .unwrap_or(&self.name)
    }
}
