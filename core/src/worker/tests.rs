//! Integration tests for the worker module

use super::*;
use crate::config::WorkerPoolSizing;
use crate::error::FailureReason;
use crate::metrics::MetricsAggregator;
use crate::request::{EncodedBatch, PublishRequest};
use crate::traits::{
    AuthError, Credential, StreamConnection, StreamConnector, StreamEvent, TokenProvider,
    Transport, TransportError, TransportResponse,
};

use async_trait::async_trait;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;

// ============================================================================
// Mock Transport
// ============================================================================

#[derive(Clone, Copy)]
enum Reply {
    Accept,
    Status(u16),
    Body(&'static str),
    Error,
}

struct MockTransport {
    delay: Option<Duration>,
    reply: Reply,
    fail_every: Option<usize>,
    probe_status: u16,
    counter: AtomicUsize,
    last_body: parking_lot::Mutex<Option<Vec<u8>>>,
}

impl MockTransport {
    fn new() -> Self {
        Self {
            delay: None,
            reply: Reply::Accept,
            fail_every: None,
            probe_status: 200,
            counter: AtomicUsize::new(0),
            last_body: parking_lot::Mutex::new(None),
        }
    }

    fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    fn with_reply(mut self, reply: Reply) -> Self {
        self.reply = reply;
        self
    }

    fn with_fail_every(mut self, n: usize) -> Self {
        self.fail_every = Some(n);
        self
    }

    fn with_probe_status(mut self, status: u16) -> Self {
        self.probe_status = status;
        self
    }

    fn calls(&self) -> usize {
        self.counter.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Transport for MockTransport {
    fn name(&self) -> &str {
        "mock"
    }

    async fn probe(&self, _credential: &Credential) -> Result<u16, TransportError> {
        Ok(self.probe_status)
    }

    async fn publish(
        &self,
        batch: &EncodedBatch,
        _credential: &Credential,
    ) -> Result<TransportResponse, TransportError> {
        let count = self.counter.fetch_add(1, Ordering::SeqCst);
        *self.last_body.lock() = Some(batch.body.clone());

        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }

        if let Some(n) = self.fail_every {
            if count % n == n - 1 {
                return Ok(TransportResponse::new(500, "simulated failure"));
            }
        }

        match self.reply {
            Reply::Accept => {
                let ids: Vec<String> = (0..batch.message_count).map(|i| i.to_string()).collect();
                let body = serde_json::json!({ "messageIds": ids }).to_string();
                Ok(TransportResponse::new(200, body))
            }
            Reply::Status(status) => Ok(TransportResponse::new(status, "")),
            Reply::Body(body) => Ok(TransportResponse::new(200, body)),
            Reply::Error => Err(TransportError::Connection("connection refused".into())),
        }
    }
}

// ============================================================================
// Mock TokenProvider
// ============================================================================

struct MockAuth {
    fail: bool,
    calls: AtomicUsize,
}

impl MockAuth {
    fn ok() -> Self {
        Self {
            fail: false,
            calls: AtomicUsize::new(0),
        }
    }

    fn failing() -> Self {
        Self {
            fail: true,
            calls: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl TokenProvider for MockAuth {
    fn name(&self) -> &str {
        "mock"
    }

    async fn acquire(&self) -> Result<Credential, AuthError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.fail {
            Err(AuthError::Status(503))
        } else {
            Ok(Credential::new("test-token"))
        }
    }
}

// ============================================================================
// Mock StreamConnector
// ============================================================================

struct TickingConnection {
    interval: Duration,
    bytes: usize,
}

#[async_trait]
impl StreamConnection for TickingConnection {
    async fn next_event(&mut self) -> Result<StreamEvent, TransportError> {
        tokio::time::sleep(self.interval).await;
        Ok(StreamEvent::Message { bytes: self.bytes })
    }

    async fn close(&mut self) -> Result<(), TransportError> {
        Ok(())
    }
}

struct TickingConnector;

#[async_trait]
impl StreamConnector for TickingConnector {
    fn name(&self) -> &str {
        "ticking"
    }

    async fn connect(
        &self,
        _credential: &Credential,
    ) -> Result<Box<dyn StreamConnection>, TransportError> {
        Ok(Box::new(TickingConnection {
            interval: Duration::from_millis(100),
            bytes: 64,
        }))
    }
}

// ============================================================================
// Helper functions
// ============================================================================

fn publish_executor(
    transport: Arc<dyn Transport>,
    auth: Arc<dyn TokenProvider>,
    batch_size: usize,
) -> OperationExecutor {
    ExecutorBuilder::new()
        .mode(crate::config::LoadMode::Publish)
        .batch_size(batch_size)
        .request_timeout(Duration::from_secs(1))
        .transport(transport)
        .token_provider(auth)
        .build()
        .expect("Failed to build executor")
}

// ============================================================================
// Executor
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_execute_success_measures_latency() {
    let transport = Arc::new(MockTransport::new().with_delay(Duration::from_millis(25)));
    let executor = publish_executor(transport.clone(), Arc::new(MockAuth::ok()), 10);

    let outcome = executor.execute(0).await;

    assert!(outcome.success, "{outcome:?}");
    assert!(outcome.latency_ms.unwrap() >= 25.0);
    assert_eq!(outcome.messages, 10);
    assert_eq!(outcome.accepted, 10);
    assert!(outcome.payload_bytes > 0);

    let body = transport.last_body.lock().clone().unwrap();
    let request: PublishRequest = serde_json::from_slice(&body).unwrap();
    assert_eq!(request.messages.len(), 10);
    assert_eq!(outcome.payload_bytes, body.len());
}

#[tokio::test]
async fn test_execute_auth_failure_skips_transport() {
    let transport = Arc::new(MockTransport::new());
    let auth = Arc::new(MockAuth::failing());
    let executor = publish_executor(transport.clone(), auth.clone(), 1);

    let outcome = executor.execute(0).await;

    assert_eq!(outcome.failure, Some(FailureReason::AuthUnavailable));
    assert_eq!(auth.calls.load(Ordering::SeqCst), 1);
    assert_eq!(transport.calls(), 0);
}

#[tokio::test]
async fn test_execute_classifies_failures() {
    let cases = [
        (Reply::Status(503), FailureReason::HttpStatus),
        (Reply::Body("not json"), FailureReason::InvalidResponse),
        (Reply::Body(r#"{"messageIds":[]}"#), FailureReason::NoMessagesAccepted),
        (Reply::Error, FailureReason::TransportError),
    ];

    for (reply, expected) in cases {
        let transport = Arc::new(MockTransport::new().with_reply(reply));
        let executor = publish_executor(transport, Arc::new(MockAuth::ok()), 2);
        let outcome = executor.execute(0).await;
        assert!(!outcome.success);
        assert_eq!(outcome.failure, Some(expected));
    }
}

#[tokio::test(start_paused = true)]
async fn test_execute_times_out() {
    let transport = Arc::new(MockTransport::new().with_delay(Duration::from_secs(10)));
    let executor = publish_executor(transport, Arc::new(MockAuth::ok()), 1);

    let outcome = executor.execute(0).await;

    assert_eq!(outcome.failure, Some(FailureReason::Timeout));
    assert!(outcome.latency_ms.unwrap() >= 1000.0);
}

#[tokio::test]
async fn test_probe_requires_200() {
    let ok = publish_executor(Arc::new(MockTransport::new()), Arc::new(MockAuth::ok()), 1);
    assert!(ok.probe(&Credential::new("t")).await.is_ok());

    let not_found = publish_executor(
        Arc::new(MockTransport::new().with_probe_status(404)),
        Arc::new(MockAuth::ok()),
        1,
    );
    let err = not_found.probe(&Credential::new("t")).await.unwrap_err();
    assert!(err.message.contains("404"));
}

#[tokio::test]
async fn test_initial_credential_failure_is_precondition() {
    let executor = publish_executor(
        Arc::new(MockTransport::new()),
        Arc::new(MockAuth::failing()),
        1,
    );
    let err = executor.initial_credential().await.unwrap_err();
    assert_eq!(err.kind, crate::error::BenchErrorKind::Precondition);
}

#[tokio::test(start_paused = true)]
async fn test_execute_stream_session() {
    let executor = ExecutorBuilder::new()
        .mode(crate::config::LoadMode::Stream {
            hold: Duration::from_millis(350),
        })
        .request_timeout(Duration::from_secs(1))
        .connector(Arc::new(TickingConnector))
        .token_provider(Arc::new(MockAuth::ok()))
        .build()
        .expect("Failed to build executor");

    let outcome = executor.execute(0).await;

    assert!(outcome.success, "{outcome:?}");
    assert_eq!(outcome.accepted, 3);
    assert_eq!(outcome.payload_bytes, 192);
    assert!(outcome.latency_ms.unwrap() >= 100.0);
}

// ============================================================================
// Scheduler + pool
// ============================================================================

fn run_parts(
    rate: f64,
    duration: Duration,
    sizing: WorkerPoolSizing,
) -> (Scheduler, WorkerPool, Arc<MetricsAggregator>) {
    let metrics = Arc::new(MetricsAggregator::new().unwrap());
    let pool = WorkerPool::new(sizing, Arc::clone(&metrics));
    let scheduler = Scheduler::new(ArrivalSchedule::new(rate, Duration::ZERO), duration);
    (scheduler, pool, metrics)
}

#[tokio::test(start_paused = true)]
async fn test_scheduler_dispatches_at_arrival_rate() {
    let transport: Arc<dyn Transport> =
        Arc::new(MockTransport::new().with_delay(Duration::from_millis(5)));
    let executor = Arc::new(publish_executor(transport, Arc::new(MockAuth::ok()), 10));
    let sizing = WorkerPoolSizing {
        preallocated: 5,
        max_workers: 10,
    };
    let (scheduler, mut pool, metrics) = run_parts(10.0, Duration::from_secs(1), sizing);
    let (_shutdown_tx, mut shutdown_rx) = broadcast::channel(1);

    let stats = scheduler
        .run(
            &mut pool,
            &metrics,
            |n| {
                let executor = Arc::clone(&executor);
                async move { executor.execute(n).await }
            },
            &mut shutdown_rx,
        )
        .await;
    let pool_stats = pool.shutdown(Duration::from_secs(1)).await;

    assert_eq!(stats.dispatched, 10);
    assert_eq!(stats.scheduling_misses, 0);
    let elapsed = stats.elapsed().unwrap();
    assert!(elapsed >= Duration::from_secs(1) && elapsed < Duration::from_millis(1010));
    assert_eq!(pool_stats.timed_out_at_shutdown, 0);

    let snap = metrics.snapshot();
    assert_eq!(snap.operations_total, 10);
    assert_eq!(snap.messages_sent, 100);
    assert_eq!(snap.success_rate, Some(1.0));
}

#[tokio::test(start_paused = true)]
async fn test_scheduler_counts_misses_when_pool_is_full() {
    let sizing = WorkerPoolSizing {
        preallocated: 1,
        max_workers: 2,
    };
    let (scheduler, mut pool, metrics) = run_parts(20.0, Duration::from_secs(1), sizing);
    let (_shutdown_tx, mut shutdown_rx) = broadcast::channel(1);

    let stats = scheduler
        .run(
            &mut pool,
            &metrics,
            |_| async {
                tokio::time::sleep(Duration::from_secs(5)).await;
                crate::response::OperationOutcome::success(5000.0, 1, 1, 1)
            },
            &mut shutdown_rx,
        )
        .await;

    assert_eq!(stats.dispatched, 2);
    assert_eq!(stats.scheduling_misses, 18);
    assert_eq!(metrics.snapshot().scheduling_misses, 18);

    let pool_stats = pool.shutdown(Duration::from_millis(100)).await;
    assert_eq!(pool_stats.timed_out_at_shutdown, 2);
    assert_eq!(pool_stats.peak_in_flight, 2);
}

#[tokio::test(start_paused = true)]
async fn test_scheduler_stops_on_shutdown() {
    let sizing = WorkerPoolSizing {
        preallocated: 4,
        max_workers: 8,
    };
    let (scheduler, mut pool, metrics) = run_parts(10.0, Duration::from_secs(60), sizing);
    let (shutdown_tx, mut shutdown_rx) = broadcast::channel(1);

    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(450)).await;
        let _ = shutdown_tx.send(());
    });

    let stats = scheduler
        .run(
            &mut pool,
            &metrics,
            |_| async { crate::response::OperationOutcome::success(1.0, 1, 1, 1) },
            &mut shutdown_rx,
        )
        .await;

    assert!(stats.interrupted);
    assert_eq!(stats.dispatched, 5);
    assert!(stats.elapsed().unwrap() < Duration::from_secs(1));
}

#[tokio::test(start_paused = true)]
async fn test_mixed_failures_keep_message_accounting() {
    let transport: Arc<dyn Transport> = Arc::new(MockTransport::new().with_fail_every(4));
    let executor = Arc::new(publish_executor(transport, Arc::new(MockAuth::ok()), 5));
    let sizing = WorkerPoolSizing {
        preallocated: 2,
        max_workers: 4,
    };
    let (scheduler, mut pool, metrics) = run_parts(8.0, Duration::from_secs(1), sizing);
    let (_shutdown_tx, mut shutdown_rx) = broadcast::channel(1);

    scheduler
        .run(
            &mut pool,
            &metrics,
            |n| {
                let executor = Arc::clone(&executor);
                async move { executor.execute(n).await }
            },
            &mut shutdown_rx,
        )
        .await;
    pool.shutdown(Duration::from_secs(1)).await;

    let snap = metrics.snapshot();
    assert_eq!(snap.operations_total, 8);
    assert_eq!(snap.operations_failed, 2);
    assert_eq!(snap.messages_sent, 6 * 5);
    assert_eq!(snap.failures.get(&FailureReason::HttpStatus), Some(&2));
}
