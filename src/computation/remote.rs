//! Remote computation service backend.
//!
//! The service is a long-running child process that must implement the
//! same step and expression semantics as the local backend; this client
//! only handles transport. Communication is NDJSON (newline-delimited
//! JSON) over stdin/stdout: each request carries a unique id so responses
//! can settle out of order, enabling concurrent in-flight queries over
//! one process. One request, one response, no streaming, no retry.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, BufWriter};
use tokio::process::{Child, ChildStdin, ChildStdout, Command};
use tokio::sync::{oneshot, Mutex};

use crate::config::Settings;
use crate::model::Row;
use crate::workflow::DataQueryPayload;

use super::{ComputationBackend, ComputationError, ComputationResult};

/// Default timeout for requests (30 seconds).
const DEFAULT_TIMEOUT_SECS: u64 = 30;

/// Request envelope sent to the service.
#[derive(Debug, Clone, Serialize)]
struct RequestEnvelope<'a> {
    /// Unique request id for correlation.
    id: String,
    /// The query payload, passed through as-is.
    payload: &'a DataQueryPayload,
}

/// Response envelope received from the service.
#[derive(Debug, Clone, Deserialize)]
struct ResponseEnvelope {
    /// Request id this response corresponds to.
    id: String,
    /// Whether the query succeeded.
    success: bool,
    /// Result rows (present if success = true).
    #[serde(default)]
    rows: Option<Vec<Row>>,
    /// Error information (present if success = false).
    #[serde(default)]
    error: Option<ErrorInfo>,
}

/// Error information in a failed response.
#[derive(Debug, Clone, Deserialize)]
struct ErrorInfo {
    /// Numeric error code, when the service assigns one.
    #[serde(default)]
    code: Option<i32>,
    /// Human-readable error message.
    message: String,
}

/// Async client for a computation service process.
pub struct ServiceBackend {
    /// Writer for sending requests to service stdin.
    stdin: Arc<Mutex<BufWriter<ChildStdin>>>,

    /// Map of pending request ids to response channels.
    pending: Arc<Mutex<HashMap<String, oneshot::Sender<ResponseEnvelope>>>>,

    /// Handle to the service child process.
    _child: Child,

    /// Handle to the background reader task.
    _reader_task: tokio::task::JoinHandle<()>,

    /// Request timeout duration.
    timeout: Duration,
}

impl ServiceBackend {
    /// Spawn a new service process.
    ///
    /// # Errors
    ///
    /// Returns an error if the service process cannot be spawned.
    pub async fn spawn<P: AsRef<Path>>(service_path: P) -> ComputationResult<Self> {
        Self::spawn_with_args_and_timeout(
            service_path,
            &[],
            Duration::from_secs(DEFAULT_TIMEOUT_SECS),
        )
        .await
    }

    /// Spawn a service using settings configuration.
    pub async fn spawn_with_settings(settings: &Settings) -> ComputationResult<Self> {
        let service_path = Self::resolve_service_path(settings)?;
        Self::spawn_with_args_and_timeout(
            &service_path,
            &settings.computation.service.args,
            Duration::from_secs(settings.query.timeout_secs),
        )
        .await
    }

    /// Resolve the service binary path from settings.
    fn resolve_service_path(settings: &Settings) -> ComputationResult<PathBuf> {
        if let Some(path) = &settings.computation.service.path {
            return Ok(path.clone());
        }

        // Search common locations
        let candidates = ["vizflow-service", "./vizflow-service"];
        for candidate in candidates {
            let path = PathBuf::from(candidate);
            if path.exists() {
                return Ok(path);
            }
        }

        Err(ComputationError::SpawnFailed(std::io::Error::new(
            std::io::ErrorKind::NotFound,
            "Computation service binary not found. Set computation.service.path in config",
        )))
    }

    /// Spawn a service with command-line arguments and a custom timeout.
    pub async fn spawn_with_args_and_timeout<P: AsRef<Path>>(
        service_path: P,
        args: &[String],
        timeout: Duration,
    ) -> ComputationResult<Self> {
        let mut child = Command::new(service_path.as_ref())
            .args(args)
            .stdin(std::process::Stdio::piped())
            .stdout(std::process::Stdio::piped())
            .stderr(std::process::Stdio::inherit())
            .kill_on_drop(true)
            .spawn()
            .map_err(ComputationError::SpawnFailed)?;

        let stdin = child.stdin.take().expect("stdin not captured");
        let stdout = child.stdout.take().expect("stdout not captured");

        let stdin = Arc::new(Mutex::new(BufWriter::new(stdin)));
        let pending: Arc<Mutex<HashMap<String, oneshot::Sender<ResponseEnvelope>>>> =
            Arc::new(Mutex::new(HashMap::new()));

        // Spawn background reader task
        let reader_task = Self::spawn_reader_task(stdout, pending.clone());

        Ok(Self {
            stdin,
            pending,
            _child: child,
            _reader_task: reader_task,
            timeout,
        })
    }

    /// Spawn the background task that reads responses from the service.
    fn spawn_reader_task(
        stdout: ChildStdout,
        pending: Arc<Mutex<HashMap<String, oneshot::Sender<ResponseEnvelope>>>>,
    ) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            let mut reader = BufReader::new(stdout);
            let mut line = String::new();

            loop {
                line.clear();
                match reader.read_line(&mut line).await {
                    Ok(0) => {
                        // EOF - service exited
                        break;
                    }
                    Ok(_) => match serde_json::from_str::<ResponseEnvelope>(&line) {
                        Ok(resp) => {
                            let mut pending = pending.lock().await;
                            if let Some(tx) = pending.remove(&resp.id) {
                                // Send response to waiting caller
                                let _ = tx.send(resp);
                            }
                        }
                        Err(e) => {
                            // Log parse error but continue
                            eprintln!("service: failed to parse response: {}", e);
                        }
                    },
                    Err(e) => {
                        eprintln!("service: read error: {}", e);
                        break;
                    }
                }
            }

            // Service exited - fail all pending requests
            let mut pending = pending.lock().await;
            for (id, tx) in pending.drain() {
                let error_response = ResponseEnvelope {
                    id,
                    success: false,
                    rows: None,
                    error: Some(ErrorInfo {
                        code: None,
                        message: "Computation service exited unexpectedly".to_string(),
                    }),
                };
                let _ = tx.send(error_response);
            }
        })
    }

    /// Send one payload to the service and wait for its rows.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization fails, writing to the service
    /// fails, the request times out, or the service answers with an error
    /// envelope.
    pub async fn request(&self, payload: &DataQueryPayload) -> ComputationResult<Vec<Row>> {
        let id = uuid::Uuid::new_v4().to_string();

        let request = RequestEnvelope {
            id: id.clone(),
            payload,
        };

        // Register response channel
        let (tx, rx) = oneshot::channel();
        {
            let mut pending = self.pending.lock().await;
            pending.insert(id.clone(), tx);
        }

        // Send request
        {
            let mut stdin = self.stdin.lock().await;
            let line = serde_json::to_string(&request)
                .map_err(ComputationError::SerializeFailed)?
                + "\n";
            stdin
                .write_all(line.as_bytes())
                .await
                .map_err(ComputationError::WriteFailed)?;
            stdin.flush().await.map_err(ComputationError::WriteFailed)?;
        }

        // Wait for response with timeout
        let response = match tokio::time::timeout(self.timeout, rx).await {
            Ok(Ok(resp)) => resp,
            Ok(Err(_)) => {
                // Channel closed - service exited
                return Err(ComputationError::ChannelClosed);
            }
            Err(_) => {
                // Timeout - clean up the pending entry so it cannot leak
                let mut pending = self.pending.lock().await;
                pending.remove(&id);
                return Err(ComputationError::Timeout(self.timeout));
            }
        };

        if response.success {
            Ok(response.rows.unwrap_or_default())
        } else {
            let error = response.error.unwrap_or(ErrorInfo {
                code: None,
                message: "Unknown error".to_string(),
            });
            Err(ComputationError::backend(error.code, error.message))
        }
    }

    /// Check if the service is still running.
    ///
    /// Returns `false` once the reader task has finished, which indicates
    /// the process exited.
    pub fn is_alive(&self) -> bool {
        !self._reader_task.is_finished()
    }

    /// Get the current request timeout.
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Set the request timeout.
    pub fn set_timeout(&mut self, timeout: Duration) {
        self.timeout = timeout;
    }
}

#[async_trait]
impl ComputationBackend for ServiceBackend {
    async fn query(&self, payload: &DataQueryPayload) -> ComputationResult<Vec<Row>> {
        self.request(payload).await
    }
}
