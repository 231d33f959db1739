use super::{DatasetQuery, QueryError};
use serde_yaml::Value;
use std::{
    io::{self, Read},
    process::{Command, Stdio},
    thread::{self, JoinHandle},
    time::Duration,
};
use tracing::{debug, error, warn};
use wait_timeout::ChildExt;

/// Queries DAS by running the client binary with JSON output
#[derive(Debug, Clone, Default)]
pub struct DasClient {
    pub timeout: Option<Duration>,
}

impl DasClient {
    pub fn new(timeout: Option<Duration>) -> Self {
        Self { timeout }
    }
}

impl DatasetQuery for DasClient {
    #[tracing::instrument(level = "debug", skip(self))]
    fn query(&self, search: &str, cmd: &str) -> Result<Value, QueryError> {
        let mut handle = Command::new(cmd)
            .arg("--format=json")
            .arg("--query")
            .arg(search)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|source| QueryError::SpawnBackend {
                command: cmd.to_owned(),
                source,
            })?;

        // both pipes are drained while waiting, a large file list would otherwise
        // fill the pipe and block the client
        let stdout = drain(handle.stdout.take());
        let stderr = drain(handle.stderr.take());

        debug!("Query backend waiting on {}", handle.id());
        let status = match self.timeout {
            Some(timeout) => match handle.wait_timeout(timeout)? {
                Some(status) => status,
                None => {
                    warn!("Query backend ran into timeout after {timeout:?}, killing it");
                    handle.kill()?;
                    handle.wait()?;

                    return Err(QueryError::ChildTimeout(timeout));
                }
            },
            None => handle.wait()?,
        };
        debug!("Query backend exit status: {status:?}");

        let stdout = collect(stdout)?;
        let stderr = collect(stderr)?;

        if !status.success() {
            error!(stderr = %stderr, "Query backend failed");

            return Err(QueryError::BackendFailed {
                status,
                stderr: stderr.trim().to_owned(),
            });
        }

        if stdout.trim().is_empty() {
            return Ok(Value::Null);
        }

        match serde_yaml::from_str(&stdout) {
            Ok(value) => Ok(value),
            Err(e) => {
                error!("Failed to read query backend output: {e}");

                Err(e.into())
            }
        }
    }
}

fn drain<R: Read + Send + 'static>(pipe: Option<R>) -> JoinHandle<io::Result<String>> {
    thread::spawn(move || {
        let mut buffer = String::new();
        if let Some(mut pipe) = pipe {
            pipe.read_to_string(&mut buffer)?;
        }

        Ok(buffer)
    })
}

fn collect(reader: JoinHandle<io::Result<String>>) -> Result<String, QueryError> {
    match reader.join() {
        Ok(buffer) => Ok(buffer?),
        Err(_) => Err(QueryError::ChildError(io::Error::new(
            io::ErrorKind::Other,
            "pipe reader thread panicked",
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_backend() {
        let client = DasClient::default();

        assert!(matches!(
            client.query("file dataset=/A/B/C", "/nonexistent/dasgoclient"),
            Err(QueryError::SpawnBackend { .. })
        ));
    }

    #[test]
    fn failing_backend() {
        let client = DasClient::new(Some(Duration::from_secs(10)));

        assert!(matches!(
            client.query("file dataset=/A/B/C", "false"),
            Err(QueryError::BackendFailed { .. })
        ));
    }

    #[test]
    fn silent_backend_has_no_data() {
        let client = DasClient::default();
        let output = client.query("file dataset=/A/B/C", "true").unwrap();

        assert_eq!(output, Value::Null);
        assert!(matches!(
            crate::query::safe_query(&client, "file dataset=/A/B/C", "true"),
            Err(QueryError::MissingData { .. })
        ));
    }

    #[test]
    fn echo_backend_output_is_parsed() {
        let client = DasClient::default();
        let output = client.query("file dataset=/A/B/C", "echo").unwrap();

        assert_eq!(
            output.as_str(),
            Some("--format=json --query file dataset=/A/B/C")
        );
    }
}
