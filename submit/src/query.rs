pub mod das;

use crate::config::{SampleCount, SubmissionRequest};
use serde_yaml::{Sequence, Value};
use std::{process::ExitStatus, time::Duration};
use thiserror::Error;
use tracing::{debug, error, info};

/// command name of the DAS go client
pub const DAS_BACKEND: &str = "dasgoclient";

#[derive(Debug, Error)]
pub enum QueryError {
    #[error("Failed to spawn query backend {command}")]
    SpawnBackend {
        command: String,
        #[source]
        source: std::io::Error,
    },
    #[error("Failed to wait for the query backend")]
    ChildError(#[from] std::io::Error),
    #[error("Query backend timed out after {0:?}")]
    ChildTimeout(Duration),
    #[error("Query backend exited with {status}: {stderr}")]
    BackendFailed { status: ExitStatus, stderr: String },
    #[error("Failed to deserialize query backend output")]
    DeserializeOutput(#[from] serde_yaml::Error),
    #[error("Your das query has not worked properly - check your proxy is valid ({reason})")]
    MissingData { reason: String },
    #[error("Dataset {0} does not contain any files")]
    EmptyDataset(String),
}

/// A dataset discovery service, answering `search` through the backend `cmd`
pub trait DatasetQuery {
    fn query(&self, search: &str, cmd: &str) -> Result<Value, QueryError>;
}

/// Run a query and insist on a `data` sequence in the result
pub fn safe_query<Q: DatasetQuery + ?Sized>(
    query: &Q,
    search: &str,
    cmd: &str,
) -> Result<Sequence, QueryError> {
    let output = query.query(search, cmd)?;
    let reason = output
        .get("reason")
        .and_then(Value::as_str)
        .unwrap_or("no data entry in the query output")
        .to_owned();

    match output {
        Value::Mapping(mut mapping) => match mapping.remove("data") {
            Some(Value::Sequence(data)) => Ok(data),
            Some(other) => {
                error!(data = ?other, "Query returned a data entry that is not a list");

                Err(QueryError::MissingData {
                    reason: "data entry is not a list".to_owned(),
                })
            }
            None => Err(QueryError::MissingData { reason }),
        },
        _ => Err(QueryError::MissingData { reason }),
    }
}

/// list the files making up `dataset`
pub fn dataset_files<Q: DatasetQuery + ?Sized>(
    query: &Q,
    dataset: &str,
    cmd: &str,
) -> Result<Sequence, QueryError> {
    safe_query(query, &format!("file dataset={dataset}"), cmd)
}

/// Replace the `All` sentinel with the number of files in the dataset.
///
/// Requests with a concrete count are left untouched and never reach the backend.
pub fn resolve_samples<Q: DatasetQuery + ?Sized>(
    request: &mut SubmissionRequest,
    query: &Q,
    cmd: &str,
) -> Result<u64, QueryError> {
    match request.samples {
        SampleCount::Count(count) => {
            debug!("Using {count} samples for {}", request.name);

            Ok(count)
        }
        SampleCount::All => {
            let files = dataset_files(query, &request.dataset, cmd)?;

            if files.is_empty() {
                return Err(QueryError::EmptyDataset(request.dataset.clone()));
            }

            let count = files.len() as u64;
            info!(
                dataset = %request.dataset,
                files = count,
                "Resolved sample count through {cmd}"
            );
            request.samples = SampleCount::Count(count);

            Ok(count)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SubmitOptions;
    use std::cell::RefCell;

    /// Replays a fixed YAML answer and records every search it receives
    struct FixedQuery {
        answer: &'static str,
        searches: RefCell<Vec<(String, String)>>,
    }

    impl FixedQuery {
        fn new(answer: &'static str) -> Self {
            Self {
                answer,
                searches: RefCell::new(Vec::new()),
            }
        }
    }

    impl DatasetQuery for FixedQuery {
        fn query(&self, search: &str, cmd: &str) -> Result<Value, QueryError> {
            self.searches
                .borrow_mut()
                .push((search.to_owned(), cmd.to_owned()));

            Ok(serde_yaml::from_str(self.answer)?)
        }
    }

    fn all_samples_request() -> SubmissionRequest {
        SubmitOptions {
            dataset: Some("/DoublePhoton/Test/FEVT".to_owned()),
            samples: Some(-1),
            ..Default::default()
        }
        .request()
        .unwrap()
    }

    #[test]
    fn resolves_all_samples() {
        let query = FixedQuery::new(r#"{"status": "ok", "data": ["f1", "f2", "f3"]}"#);
        let mut request = all_samples_request();

        assert_eq!(resolve_samples(&mut request, &query, DAS_BACKEND).unwrap(), 3);
        assert_eq!(request.samples, SampleCount::Count(3));
        assert_eq!(
            query.searches.borrow().as_slice(),
            &[(
                "file dataset=/DoublePhoton/Test/FEVT".to_owned(),
                "dasgoclient".to_owned()
            )]
        );
    }

    #[test]
    fn concrete_count_skips_query() {
        let query = FixedQuery::new("{}");
        let mut request = all_samples_request();
        request.samples = SampleCount::Count(0);

        assert_eq!(resolve_samples(&mut request, &query, DAS_BACKEND).unwrap(), 0);
        assert!(query.searches.borrow().is_empty());
    }

    #[test]
    fn missing_data_quotes_reason() {
        let query = FixedQuery::new(r#"{"status": "error", "reason": "proxy expired"}"#);
        let mut request = all_samples_request();

        match resolve_samples(&mut request, &query, DAS_BACKEND) {
            Err(QueryError::MissingData { reason }) => assert_eq!(reason, "proxy expired"),
            other => panic!("unexpected result {other:?}"),
        }
        assert_eq!(request.samples, SampleCount::All);
    }

    #[test]
    fn data_must_be_a_list() {
        let query = FixedQuery::new(r#"{"data": "f1"}"#);

        assert!(matches!(
            dataset_files(&query, "/A/B/C", DAS_BACKEND),
            Err(QueryError::MissingData { .. })
        ));
    }

    #[test]
    fn non_mapping_output() {
        let query = FixedQuery::new(r#"["f1", "f2"]"#);

        assert!(matches!(
            dataset_files(&query, "/A/B/C", DAS_BACKEND),
            Err(QueryError::MissingData { .. })
        ));
    }

    #[test]
    fn empty_dataset() {
        let query = FixedQuery::new(r#"{"data": []}"#);
        let mut request = all_samples_request();

        assert!(matches!(
            resolve_samples(&mut request, &query, DAS_BACKEND),
            Err(QueryError::EmptyDataset(_))
        ));
    }
}
