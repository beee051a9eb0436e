use std::collections::VecDeque;
use std::sync::Mutex;

use async_trait::async_trait;
use leanplum_wire::{response, RequestBody};
use serde_json::Value;
use tokio::sync::mpsc;

use crate::{Transport, TransportError};

/// One outbound request as seen by the mock.
#[derive(Debug, Clone)]
pub struct RecordedRequest {
    pub url: String,
    pub body: RequestBody,
}

/// Channel-backed transport for tests: records every request and serves
/// scripted responses FIFO, defaulting to a plain success body.
pub struct MockTransport {
    recorded: mpsc::UnboundedSender<RecordedRequest>,
    scripted: Mutex<VecDeque<Result<Value, TransportError>>>,
}

impl MockTransport {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<RecordedRequest>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let mock = Self {
            recorded: tx,
            scripted: Mutex::new(VecDeque::new()),
        };
        (mock, rx)
    }

    /// Queue a response body for the next request.
    pub fn script_response(&self, body: Value) {
        self.scripted.lock().unwrap().push_back(Ok(body));
    }

    /// Queue a failure for the next request.
    pub fn script_failure(&self, err: TransportError) {
        self.scripted.lock().unwrap().push_back(Err(err));
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn post(&self, url: &str, body: &RequestBody) -> Result<Value, TransportError> {
        let _ = self.recorded.send(RecordedRequest {
            url: url.to_string(),
            body: body.clone(),
        });
        match self.scripted.lock().unwrap().pop_front() {
            Some(result) => result,
            None => Ok(response::success_body()),
        }
    }
}
