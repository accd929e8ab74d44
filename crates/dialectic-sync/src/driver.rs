use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt as _;
use tokio::sync::{mpsc, watch};
use tracing::debug;

use crate::errors::{StreamFailure, SyncError, TransportError};
use crate::model::{AgentId, SyncConfig};
use crate::transport::{ChatRequest, ChatTransport, TransportEvent, TransportStream};

/// Final event of a driver stream.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Terminal {
    Done { accumulated_text: String },
    Error { failure: StreamFailure },
    Aborted,
}

/// Events yielded by `DriverStream::next_event`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum DriverEvent {
    /// Incremental text chunk; `seq` starts at 0 and increases by one.
    Delta { seq: u64, text: String },
    Terminal(Terminal),
}

/// Handle used to request cancellation of a running stream.
#[derive(Clone, Debug)]
pub struct AbortHandle {
    tx: Arc<watch::Sender<bool>>,
}

impl AbortHandle {
    /// Requests cancellation.
    ///
    /// Safe to call any number of times, including after the stream finished.
    /// Once requested, no further deltas are yielded and the terminal event is
    /// `Terminal::Aborted`, even if the transport completed concurrently.
    pub fn abort(&self) {
        self.tx.send_replace(true);
    }

    pub fn is_aborted(&self) -> bool {
        *self.tx.borrow()
    }
}

/// Opens one streaming request per call and turns it into ordered deltas plus
/// exactly one terminal event.
#[derive(Clone)]
pub struct StreamDriver {
    transport: Arc<dyn ChatTransport>,
    buffer_capacity: usize,
    stream_timeout: Option<Duration>,
}

impl StreamDriver {
    pub fn new(transport: Arc<dyn ChatTransport>) -> Self {
        Self::from_config(transport, &SyncConfig::default())
    }

    pub fn from_config(transport: Arc<dyn ChatTransport>, config: &SyncConfig) -> Self {
        Self {
            transport,
            buffer_capacity: config.stream_buffer_capacity,
            stream_timeout: config.stream_timeout,
        }
    }

    /// Sets the bounded buffer between the driver task and the consumer.
    pub fn buffer_capacity(mut self, capacity: usize) -> Self {
        self.buffer_capacity = capacity;
        self
    }

    /// Fails the stream when no chunk arrives within `timeout`.
    pub fn stream_timeout(mut self, timeout: Duration) -> Self {
        self.stream_timeout = Some(timeout);
        self
    }

    /// Validates the request and spawns the streaming task on the current
    /// tokio runtime.
    pub fn start(&self, request: ChatRequest) -> Result<DriverStream, SyncError> {
        if request.input_text.trim().is_empty() {
            return Err(SyncError::Validation(
                "input text must not be empty".into(),
            ));
        }
        if self.buffer_capacity == 0 {
            return Err(SyncError::Config(
                "stream buffer capacity must be greater than 0".into(),
            ));
        }

        let (tx, rx) = mpsc::channel(self.buffer_capacity);
        let (abort_tx, abort_rx) = watch::channel(false);
        let abort_handle = AbortHandle {
            tx: Arc::new(abort_tx),
        };
        let exchange_id = request.exchange_id;
        let agent = request.agent.clone();
        tokio::spawn(run_task(
            self.transport.clone(),
            request,
            tx,
            abort_rx.clone(),
            self.stream_timeout,
        ));

        Ok(DriverStream {
            exchange_id,
            agent,
            rx,
            abort_rx,
            abort_handle,
            saw_terminal: false,
        })
    }
}

/// Single-consumer event sequence for one agent's streamed reply.
pub struct DriverStream {
    exchange_id: uuid::Uuid,
    agent: AgentId,
    rx: mpsc::Receiver<DriverEvent>,
    abort_rx: watch::Receiver<bool>,
    abort_handle: AbortHandle,
    saw_terminal: bool,
}

impl DriverStream {
    pub fn exchange_id(&self) -> uuid::Uuid {
        self.exchange_id
    }

    pub fn agent(&self) -> &AgentId {
        &self.agent
    }

    /// Returns a handle that can cancel the stream.
    pub fn abort_handle(&self) -> AbortHandle {
        self.abort_handle.clone()
    }

    pub fn abort(&self) {
        self.abort_handle.abort();
    }

    /// Waits for the next event. Returns `None` once the terminal event has
    /// been yielded.
    pub async fn next_event(&mut self) -> Option<DriverEvent> {
        if self.saw_terminal {
            return None;
        }
        loop {
            let event = self.rx.recv().await;
            let aborted = *self.abort_rx.borrow();
            match event {
                Some(DriverEvent::Delta { .. }) if aborted => continue,
                Some(DriverEvent::Terminal(_)) if aborted => {
                    self.saw_terminal = true;
                    return Some(DriverEvent::Terminal(Terminal::Aborted));
                }
                Some(DriverEvent::Terminal(terminal)) => {
                    self.saw_terminal = true;
                    return Some(DriverEvent::Terminal(terminal));
                }
                Some(delta) => return Some(delta),
                None => {
                    self.saw_terminal = true;
                    let terminal = if aborted {
                        Terminal::Aborted
                    } else {
                        Terminal::Error {
                            failure: StreamFailure::Protocol {
                                agent: self.agent.to_string(),
                                message: "driver task ended without a terminal event".into(),
                            },
                        }
                    };
                    return Some(DriverEvent::Terminal(terminal));
                }
            }
        }
    }

    /// Drains the stream and returns the accumulated text.
    pub async fn finish(mut self) -> Result<String, SyncError> {
        while let Some(event) = self.next_event().await {
            if let DriverEvent::Terminal(terminal) = event {
                return match terminal {
                    Terminal::Done { accumulated_text } => Ok(accumulated_text),
                    Terminal::Error { failure } => Err(failure.into()),
                    Terminal::Aborted => Err(SyncError::Cancelled),
                };
            }
        }
        Err(SyncError::protocol_msg(format!(
            "stream for {} was already finished",
            self.agent
        )))
    }
}

/// Resolves once cancellation is requested or every abort handle is gone.
async fn abort_requested(abort_rx: &mut watch::Receiver<bool>) {
    let _ = abort_rx.wait_for(|aborted| *aborted).await;
}

async fn next_within(
    stream: &mut TransportStream,
    limit: Option<Duration>,
) -> Result<Option<Result<TransportEvent, TransportError>>, tokio::time::error::Elapsed> {
    match limit {
        Some(limit) => tokio::time::timeout(limit, stream.next()).await,
        None => Ok(stream.next().await),
    }
}

async fn run_task(
    transport: Arc<dyn ChatTransport>,
    request: ChatRequest,
    tx: mpsc::Sender<DriverEvent>,
    mut abort_rx: watch::Receiver<bool>,
    stream_timeout: Option<Duration>,
) {
    let agent = request.agent.clone();
    let exchange_id = request.exchange_id;

    let opened = tokio::select! {
        biased;
        _ = abort_requested(&mut abort_rx) => {
            debug!(agent = %agent, exchange_id = %exchange_id, "stream aborted before connect");
            let _ = send_terminal(&tx, Terminal::Aborted).await;
            return;
        }
        opened = transport.open_stream(request) => opened,
    };
    let mut handle = match opened {
        Ok(handle) => handle,
        Err(err) => {
            debug!(agent = %agent, exchange_id = %exchange_id, error = %err, "stream failed to open");
            let failure = StreamFailure::from(&err);
            let _ = send_terminal(&tx, Terminal::Error { failure }).await;
            return;
        }
    };

    let mut seq = 0_u64;
    let mut accumulated = String::new();
    loop {
        let next = tokio::select! {
            biased;
            _ = abort_requested(&mut abort_rx) => {
                debug!(agent = %agent, exchange_id = %exchange_id, seq, "stream aborted");
                let _ = send_terminal(&tx, Terminal::Aborted).await;
                return;
            }
            next = next_within(&mut handle.stream, stream_timeout) => next,
        };
        match next {
            Ok(Some(Ok(TransportEvent::TextDelta { text }))) => {
                if text.is_empty() {
                    continue;
                }
                debug!(agent = %agent, exchange_id = %exchange_id, seq, "text delta");
                accumulated.push_str(&text);
                let sent = tx.send(DriverEvent::Delta { seq, text }).await.is_ok();
                seq = seq.saturating_add(1);
                if !sent {
                    debug!(agent = %agent, exchange_id = %exchange_id, "stream consumer dropped");
                    return;
                }
            }
            Ok(Some(Ok(TransportEvent::EndOfStream))) => {
                // Cancellation wins over a completion that raced with it.
                let terminal = if *abort_rx.borrow() {
                    Terminal::Aborted
                } else {
                    Terminal::Done {
                        accumulated_text: accumulated,
                    }
                };
                let _ = send_terminal(&tx, terminal).await;
                return;
            }
            Ok(Some(Err(err))) => {
                let failure = StreamFailure::from(&err);
                let _ = send_terminal(&tx, Terminal::Error { failure }).await;
                return;
            }
            Ok(None) => {
                let failure = StreamFailure::Protocol {
                    agent: agent.to_string(),
                    message: "stream ended without end-of-stream marker".into(),
                };
                let _ = send_terminal(&tx, Terminal::Error { failure }).await;
                return;
            }
            Err(_) => {
                let failure = StreamFailure::TimedOut {
                    agent: agent.to_string(),
                };
                let _ = send_terminal(&tx, Terminal::Error { failure }).await;
                return;
            }
        }
    }
}

async fn send_terminal(tx: &mpsc::Sender<DriverEvent>, terminal: Terminal) -> bool {
    tx.send(DriverEvent::Terminal(terminal)).await.is_ok()
}
