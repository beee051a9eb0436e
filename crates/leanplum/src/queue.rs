use std::sync::Arc;
use std::time::Duration;

use leanplum_transport::{Transport, TransportError};
use leanplum_wire::{ActionRecord, RequestBody};
use serde_json::Value;
use tokio::sync::{mpsc, oneshot};
use tokio::time::{sleep_until, Instant};
use tracing::{debug, warn};

use crate::config::{BatchConfig, OnFailure};

/// Result of one successful batch flush, handed back to the session client
/// for response merging.
#[derive(Debug)]
pub struct FlushOutcome {
    /// How many records the flushed batch carried.
    pub actions: usize,
    /// Parsed response body.
    pub body: Value,
}

enum Command {
    Enqueue(ActionRecord),
    EnqueueSolo(ActionRecord, oneshot::Sender<Result<Value, TransportError>>),
    SetBatching {
        enabled: bool,
        max_size: Option<usize>,
    },
    SetFlushDelay(Duration),
    SetEndpoint(String),
    SetSolo(bool),
    Flush,
}

/// Cloneable handle to the dispatcher task that owns the outbound buffer.
///
/// All operations are non-blocking sends; ordering on the wire follows the
/// order commands were issued on the handle.
#[derive(Clone)]
pub struct QueueHandle {
    tx: mpsc::UnboundedSender<Command>,
}

impl QueueHandle {
    /// Spawn the dispatcher task. Batch flush outcomes are reported on the
    /// returned receiver; the caller decides what to merge from them.
    pub fn spawn(
        transport: Arc<dyn Transport>,
        endpoint: String,
        config: BatchConfig,
    ) -> (Self, mpsc::UnboundedReceiver<FlushOutcome>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let (outcome_tx, outcome_rx) = mpsc::unbounded_channel();
        let dispatcher = Dispatcher {
            rx,
            transport,
            endpoint,
            config,
            solo: false,
            buffer: Vec::new(),
            deadline: None,
            outcomes: outcome_tx,
        };
        tokio::spawn(dispatcher.run());
        (Self { tx }, outcome_rx)
    }

    pub fn enqueue(&self, record: ActionRecord) {
        let _ = self.tx.send(Command::Enqueue(record));
    }

    /// Issue one request carrying only this record, bypassing the buffer.
    /// The reply resolves with the transport result for that request.
    pub fn enqueue_solo(
        &self,
        record: ActionRecord,
    ) -> oneshot::Receiver<Result<Value, TransportError>> {
        let (tx, rx) = oneshot::channel();
        let _ = self.tx.send(Command::EnqueueSolo(record, tx));
        rx
    }

    /// Applies to subsequent enqueues; an already-armed flush deadline still
    /// fires once.
    pub fn set_batching(&self, enabled: bool, max_size: Option<usize>) {
        let _ = self.tx.send(Command::SetBatching { enabled, max_size });
    }

    pub fn set_flush_delay(&self, delay: Duration) {
        let _ = self.tx.send(Command::SetFlushDelay(delay));
    }

    pub fn set_endpoint(&self, url: String) {
        let _ = self.tx.send(Command::SetEndpoint(url));
    }

    /// Development-mode override: when set, every enqueue flushes on its own
    /// even with batching enabled.
    pub fn set_solo(&self, solo: bool) {
        let _ = self.tx.send(Command::SetSolo(solo));
    }

    pub fn flush(&self) {
        let _ = self.tx.send(Command::Flush);
    }
}

struct Dispatcher {
    rx: mpsc::UnboundedReceiver<Command>,
    transport: Arc<dyn Transport>,
    endpoint: String,
    config: BatchConfig,
    solo: bool,
    buffer: Vec<ActionRecord>,
    deadline: Option<Instant>,
    outcomes: mpsc::UnboundedSender<FlushOutcome>,
}

impl Dispatcher {
    async fn run(mut self) {
        loop {
            let deadline = self.deadline;
            tokio::select! {
                cmd = self.rx.recv() => match cmd {
                    Some(cmd) => self.handle(cmd).await,
                    None => break,
                },
                _ = sleep_until(deadline.unwrap_or_else(Instant::now)), if deadline.is_some() => {
                    debug!(buffered = self.buffer.len(), "batch delay elapsed");
                    self.flush().await;
                }
            }
        }
        // Handle dropped: drain whatever is still buffered, then exit.
        self.flush().await;
    }

    async fn handle(&mut self, cmd: Command) {
        match cmd {
            Command::Enqueue(record) => {
                self.buffer.push(record);
                if !self.batching_active() || self.buffer.len() >= self.config.max_size {
                    self.flush().await;
                } else if self.deadline.is_none() {
                    self.deadline = Some(Instant::now() + self.config.flush_delay);
                }
            }
            Command::EnqueueSolo(record, reply) => {
                let body = RequestBody::solo(record);
                let result = self.transport.post(&self.endpoint, &body).await;
                let _ = reply.send(result);
            }
            Command::SetBatching { enabled, max_size } => {
                self.config.enabled = enabled;
                if let Some(size) = max_size {
                    self.config.max_size = size.max(1);
                }
            }
            Command::SetFlushDelay(delay) => self.config.flush_delay = delay,
            Command::SetEndpoint(url) => self.endpoint = url,
            Command::SetSolo(solo) => self.solo = solo,
            Command::Flush => self.flush().await,
        }
    }

    fn batching_active(&self) -> bool {
        self.config.enabled && !self.solo
    }

    async fn flush(&mut self) {
        self.deadline = None;
        if self.buffer.is_empty() {
            return;
        }
        let records = std::mem::take(&mut self.buffer);
        let actions = records.len();
        let body = RequestBody::new(records);
        match self.transport.post(&self.endpoint, &body).await {
            Ok(value) => {
                debug!(actions, "batch flushed");
                let _ = self.outcomes.send(FlushOutcome {
                    actions,
                    body: value,
                });
            }
            Err(err) => match self.config.on_failure {
                OnFailure::Drop => {
                    warn!(actions, error = %err, "batch flush failed; records dropped")
                }
            },
        }
    }
}
