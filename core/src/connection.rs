//! Streaming-connection sessions
//!
//! A stream-mode operation opens one connection, waits for the server to
//! start sending, holds the connection for a fixed period and closes it. The
//! lifecycle is an explicit state machine:
//!
//! ```text
//! Connecting --Connected--> Authenticated --MessageReceived--> Streaming
//!                               |                                  |
//!                   HoldElapsed / ServerClosed       HoldElapsed / ServerClosed
//!                               v                                  v
//!                            Closing  --------CloseCompleted------> Closed
//! ```
//!
//! `Failed` moves any open state straight to `Closed`.

use std::time::Duration;

use tokio::time::{sleep_until, timeout, Instant};

use crate::error::FailureReason;
use crate::response::OperationOutcome;
use crate::traits::{Credential, StreamConnection, StreamConnector, StreamEvent, TransportError};

/// Where a streaming session is in its lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConnectionState {
    /// Handshake in progress
    Connecting,
    /// Handshake accepted the credential; nothing received yet
    Authenticated,
    /// At least one server message received
    Streaming,
    /// Client-side close in progress
    Closing,
    /// Terminal
    Closed,
}

/// Inputs that drive [`ConnectionState`] transitions
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionEvent {
    /// Handshake succeeded
    Connected,
    /// A data frame arrived
    MessageReceived {
        /// Frame size
        bytes: usize,
    },
    /// The hold timer expired
    HoldElapsed,
    /// The server closed the connection
    ServerClosed,
    /// Handshake, read or close failed
    Failed,
    /// Client-side close finished
    CloseCompleted,
}

/// An event that is not valid in the current state
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("invalid transition from {from:?} on {event:?}")]
pub struct InvalidTransition {
    /// State the event arrived in
    pub from: ConnectionState,
    /// The offending event
    pub event: ConnectionEvent,
}

impl ConnectionState {
    /// Apply `event`, returning the next state
    pub fn on(self, event: ConnectionEvent) -> Result<ConnectionState, InvalidTransition> {
        use ConnectionEvent as E;
        use ConnectionState as S;

        let next = match (self, event) {
            (S::Connecting, E::Connected) => S::Authenticated,
            (S::Authenticated | S::Streaming, E::MessageReceived { .. }) => S::Streaming,
            (S::Authenticated | S::Streaming, E::HoldElapsed | E::ServerClosed) => S::Closing,
            (S::Closing, E::CloseCompleted) => S::Closed,
            (S::Connecting | S::Authenticated | S::Streaming | S::Closing, E::Failed) => S::Closed,
            (from, event) => return Err(InvalidTransition { from, event }),
        };
        Ok(next)
    }

    /// True once the session can make no further progress
    pub fn is_terminal(self) -> bool {
        self == ConnectionState::Closed
    }
}

/// One streaming operation
///
/// Tracks the state machine along with the figures the outcome reports:
/// time to first message and bytes received.
#[derive(Debug)]
pub struct StreamSession {
    state: ConnectionState,
    hold: Duration,
    connect_timeout: Duration,
    started: Instant,
    first_message_ms: Option<f64>,
    messages: usize,
    bytes: usize,
    hold_completed: bool,
}

impl StreamSession {
    /// A session that holds the connection for `hold` once authenticated
    pub fn new(hold: Duration, connect_timeout: Duration) -> Self {
        Self {
            state: ConnectionState::Connecting,
            hold,
            connect_timeout,
            started: Instant::now(),
            first_message_ms: None,
            messages: 0,
            bytes: 0,
            hold_completed: false,
        }
    }

    /// Current state
    pub fn state(&self) -> ConnectionState {
        self.state
    }

    fn advance(&mut self, event: ConnectionEvent) {
        match self.state.on(event) {
            Ok(next) => {
                tracing::trace!(from = ?self.state, to = ?next, ?event, "Stream session transition");
                self.state = next;
            }
            Err(e) => {
                tracing::debug!(error = %e, "Ignoring stream event");
            }
        }
        if let ConnectionEvent::MessageReceived { bytes } = event {
            if self.first_message_ms.is_none() {
                self.first_message_ms = Some(self.started.elapsed().as_secs_f64() * 1000.0);
            }
            self.messages += 1;
            self.bytes += bytes;
        }
    }

    /// Connect, hold, close, and report the outcome
    pub async fn run(
        mut self,
        connector: &dyn StreamConnector,
        credential: &Credential,
    ) -> OperationOutcome {
        self.started = Instant::now();

        let mut conn = match timeout(self.connect_timeout, connector.connect(credential)).await {
            Ok(Ok(conn)) => conn,
            Ok(Err(e)) => {
                self.advance(ConnectionEvent::Failed);
                return OperationOutcome::failure(connect_failure_reason(&e), e.to_string());
            }
            Err(_) => {
                self.advance(ConnectionEvent::Failed);
                return OperationOutcome::failure(
                    FailureReason::Timeout,
                    format!("handshake exceeded {:?}", self.connect_timeout),
                );
            }
        };
        self.advance(ConnectionEvent::Connected);

        if let Err(outcome) = self.hold(conn.as_mut()).await {
            return outcome;
        }

        match timeout(self.connect_timeout, conn.close()).await {
            Ok(Ok(())) => self.advance(ConnectionEvent::CloseCompleted),
            Ok(Err(e)) => {
                self.advance(ConnectionEvent::Failed);
                return self.failure(FailureReason::StreamInterrupted, format!("close failed: {e}"));
            }
            Err(_) => {
                self.advance(ConnectionEvent::Failed);
                return self.failure(
                    FailureReason::StreamInterrupted,
                    format!("close handshake exceeded {:?}", self.connect_timeout),
                );
            }
        }

        self.finish()
    }

    /// Read events until the hold timer fires or the stream ends early
    async fn hold(&mut self, conn: &mut dyn StreamConnection) -> Result<(), OperationOutcome> {
        let deadline = Instant::now() + self.hold;

        loop {
            tokio::select! {
                biased;

                _ = sleep_until(deadline) => {
                    self.hold_completed = true;
                    self.advance(ConnectionEvent::HoldElapsed);
                    return Ok(());
                }

                event = conn.next_event() => match event {
                    Ok(StreamEvent::Message { bytes }) => {
                        self.advance(ConnectionEvent::MessageReceived { bytes });
                    }
                    Ok(StreamEvent::Closed) => {
                        self.advance(ConnectionEvent::ServerClosed);
                        self.advance(ConnectionEvent::CloseCompleted);
                        return Err(self.failure(
                            FailureReason::StreamInterrupted,
                            "server closed the stream before the hold elapsed",
                        ));
                    }
                    Err(e) => {
                        self.advance(ConnectionEvent::Failed);
                        return Err(self.failure(FailureReason::StreamInterrupted, e.to_string()));
                    }
                }
            }
        }
    }

    fn failure(&self, reason: FailureReason, detail: impl Into<String>) -> OperationOutcome {
        let outcome = OperationOutcome::failure(reason, detail).with_payload_bytes(self.bytes);
        match self.first_message_ms {
            Some(ms) => outcome.with_latency(ms),
            None => outcome,
        }
    }

    fn finish(&self) -> OperationOutcome {
        match self.first_message_ms {
            Some(ms) if self.hold_completed && self.state.is_terminal() => {
                OperationOutcome::success(ms, self.bytes, 1, self.messages)
            }
            _ => self.failure(
                FailureReason::NoMessagesAccepted,
                format!("no messages received within {:?}", self.hold),
            ),
        }
    }
}

fn connect_failure_reason(e: &TransportError) -> FailureReason {
    match e {
        TransportError::Timeout(_) => FailureReason::Timeout,
        _ => FailureReason::TransportError,
    }
}
