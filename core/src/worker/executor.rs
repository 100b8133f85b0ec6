//! Per-dispatch operation execution

use crate::connection::StreamSession;
use crate::error::{BenchError, BenchResult, FailureReason};
use crate::request::{BatchEncoder, SyntheticEntity};
use crate::response::{validate_publish, OperationOutcome};
use crate::traits::{Credential, StreamConnector, TokenProvider, Transport, TransportError};

use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

/// What each operation does against the target
#[derive(Clone)]
pub enum Workload {
    /// Publish one encoded batch
    Publish {
        /// Publish transport (shared across operations)
        transport: Arc<dyn Transport>,
        /// Batch encoder
        encoder: BatchEncoder,
    },
    /// Run one streaming session
    Stream {
        /// Connection factory (shared across operations)
        connector: Arc<dyn StreamConnector>,
        /// How long each session is held
        hold: Duration,
    },
}

impl Workload {
    /// Name of the transport or connector, for logs
    pub fn name(&self) -> &str {
        match self {
            Workload::Publish { transport, .. } => transport.name(),
            Workload::Stream { connector, .. } => connector.name(),
        }
    }
}

impl std::fmt::Debug for Workload {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Workload::Publish { transport, encoder } => f
                .debug_struct("Publish")
                .field("transport", &transport.name())
                .field("batch_size", &encoder.batch_size())
                .finish(),
            Workload::Stream { connector, hold } => f
                .debug_struct("Stream")
                .field("connector", &connector.name())
                .field("hold", hold)
                .finish(),
        }
    }
}

/// Executes one operation per dispatch: build -> authenticate -> call -> validate
///
/// Shared by every in-flight operation through an `Arc`. Never returns an
/// error: everything that goes wrong becomes a failed [`OperationOutcome`].
pub struct OperationExecutor {
    workload: Workload,
    auth: Arc<dyn TokenProvider>,
    request_timeout: Duration,
}

impl OperationExecutor {
    /// Create an executor
    pub fn new(workload: Workload, auth: Arc<dyn TokenProvider>, request_timeout: Duration) -> Self {
        Self {
            workload,
            auth,
            request_timeout,
        }
    }

    /// The workload
    pub fn workload(&self) -> &Workload {
        &self.workload
    }

    /// Acquire a credential for setup
    pub async fn initial_credential(&self) -> BenchResult<Credential> {
        self.auth.acquire().await.map_err(|e| {
            BenchError::precondition(format!(
                "initial credential from {} provider: {e}",
                self.auth.name()
            ))
        })
    }

    /// Read-only reachability check run once during setup
    ///
    /// Publish mode issues the transport's metadata probe and requires a 200.
    /// Stream mode opens one connection and closes it again.
    pub async fn probe(&self, credential: &Credential) -> BenchResult<()> {
        match &self.workload {
            Workload::Publish { transport, .. } => {
                let status = tokio::time::timeout(self.request_timeout, transport.probe(credential))
                    .await
                    .map_err(|_| {
                        BenchError::precondition(format!(
                            "probe timed out after {:?}",
                            self.request_timeout
                        ))
                    })?
                    .map_err(|e| BenchError::precondition(format!("probe failed: {e}")))?;

                if status != 200 {
                    return Err(BenchError::precondition(format!(
                        "probe returned status {status}"
                    )));
                }
                Ok(())
            }
            Workload::Stream { connector, .. } => {
                let mut conn =
                    tokio::time::timeout(self.request_timeout, connector.connect(credential))
                        .await
                        .map_err(|_| {
                            BenchError::precondition(format!(
                                "probe handshake timed out after {:?}",
                                self.request_timeout
                            ))
                        })?
                        .map_err(|e| BenchError::precondition(format!("probe failed: {e}")))?;
                if let Err(e) = conn.close().await {
                    tracing::debug!(error = %e, "Probe connection did not close cleanly");
                }
                Ok(())
            }
        }
    }

    /// Run one operation
    pub async fn execute(&self, op_id: u64) -> OperationOutcome {
        let outcome = match &self.workload {
            Workload::Publish { transport, encoder } => {
                self.publish(transport.as_ref(), encoder).await
            }
            Workload::Stream { connector, hold } => self.stream(connector.as_ref(), *hold).await,
        };

        match (&outcome.failure, &outcome.detail) {
            (Some(reason), detail) => tracing::debug!(
                op_id,
                reason = %reason,
                detail = detail.as_deref().unwrap_or(""),
                latency_ms = outcome.latency_ms,
                "Operation failed"
            ),
            (None, _) => tracing::trace!(
                op_id,
                latency_ms = outcome.latency_ms,
                accepted = outcome.accepted,
                "Operation succeeded"
            ),
        }

        outcome
    }

    async fn publish(&self, transport: &dyn Transport, encoder: &BatchEncoder) -> OperationOutcome {
        // 1-3. Generate, replicate and encode (rng dropped before any await)
        let entity = {
            let mut rng = rand::thread_rng();
            SyntheticEntity::generate(&mut rng, chrono::Utc::now())
        };
        let batch = match encoder.encode(&entity) {
            Ok(batch) => batch,
            Err(e) => {
                tracing::warn!(error = %e, "Failed to serialize publish batch");
                return OperationOutcome::failure(FailureReason::Serialization, e.to_string());
            }
        };

        // 4. Credential
        let credential = match self.auth.acquire().await {
            Ok(credential) => credential,
            Err(e) => return OperationOutcome::failure(FailureReason::AuthUnavailable, e.to_string()),
        };

        // 5. Timed transport call
        let start = Instant::now();
        let result =
            tokio::time::timeout(self.request_timeout, transport.publish(&batch, &credential)).await;
        let latency_ms = start.elapsed().as_secs_f64() * 1000.0;

        let response = match result {
            Ok(Ok(response)) => response,
            Ok(Err(e)) => {
                return OperationOutcome::failure(transport_failure_reason(&e), e.to_string())
                    .with_latency(latency_ms)
            }
            Err(_) => {
                return OperationOutcome::failure(
                    FailureReason::Timeout,
                    format!("no response within {:?}", self.request_timeout),
                )
                .with_latency(latency_ms)
            }
        };

        // 6. Both checks: status and accepted count
        match validate_publish(&response) {
            Ok(accepted) => OperationOutcome::success(
                latency_ms,
                batch.payload_bytes(),
                batch.message_count,
                accepted,
            ),
            Err(reason) => OperationOutcome::failure(reason, format!("status {}", response.status))
                .with_latency(latency_ms)
                .with_payload_bytes(batch.payload_bytes()),
        }
    }

    async fn stream(&self, connector: &dyn StreamConnector, hold: Duration) -> OperationOutcome {
        let credential = match self.auth.acquire().await {
            Ok(credential) => credential,
            Err(e) => return OperationOutcome::failure(FailureReason::AuthUnavailable, e.to_string()),
        };

        StreamSession::new(hold, self.request_timeout)
            .run(connector, &credential)
            .await
    }
}

fn transport_failure_reason(e: &TransportError) -> FailureReason {
    match e {
        TransportError::Timeout(_) => FailureReason::Timeout,
        _ => FailureReason::TransportError,
    }
}

impl std::fmt::Debug for OperationExecutor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OperationExecutor")
            .field("workload", &self.workload)
            .field("auth", &self.auth.name())
            .field("request_timeout", &self.request_timeout)
            .finish()
    }
}
