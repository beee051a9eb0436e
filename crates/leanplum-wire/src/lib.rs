use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Wire API version reported on every action record.
pub const API_VERSION: &str = "1.0.6";

/// Action vocabulary as it appears on the wire.
///
/// Note the naming quirk: the client method `advance_to` maps to the wire
/// action `advance`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ActionKind {
    Start,
    Stop,
    PauseSession,
    ResumeSession,
    PauseState,
    ResumeState,
    SetUserAttributes,
    Track,
    Advance,
}

impl ActionKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ActionKind::Start => "start",
            ActionKind::Stop => "stop",
            ActionKind::PauseSession => "pauseSession",
            ActionKind::ResumeSession => "resumeSession",
            ActionKind::PauseState => "pauseState",
            ActionKind::ResumeState => "resumeState",
            ActionKind::SetUserAttributes => "setUserAttributes",
            ActionKind::Track => "track",
            ActionKind::Advance => "advance",
        }
    }
}

/// One logical client event queued for transmission. Immutable once enqueued.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActionRecord {
    pub action: ActionKind,
    /// Seconds since the Unix epoch, fractional.
    pub time: f64,
    #[serde(flatten)]
    pub params: Map<String, Value>,
}

impl ActionRecord {
    pub fn new(action: ActionKind) -> Self {
        Self {
            action,
            time: epoch_seconds(),
            params: Map::new(),
        }
    }

    pub fn with_param<V: Into<Value>>(mut self, key: &str, value: V) -> Self {
        self.params.insert(key.to_string(), value.into());
        self
    }
}

fn epoch_seconds() -> f64 {
    Utc::now().timestamp_millis() as f64 / 1000.0
}

/// The batched request envelope: `{"data": [record, ...]}`.
/// Array order is enqueue order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RequestBody {
    pub data: Vec<ActionRecord>,
}

impl RequestBody {
    pub fn new(data: Vec<ActionRecord>) -> Self {
        Self { data }
    }

    /// A batch of exactly one record (`start` is always sent this way).
    pub fn solo(record: ActionRecord) -> Self {
        Self {
            data: vec![record],
        }
    }
}

/// Helpers for the backend's `{"response": [entry, ...]}` envelope.
/// Bodies that do not match the envelope are treated as opaque.
pub mod response {
    use serde_json::{json, Map, Value};

    /// The entry that applies to the request as a whole is the last one.
    pub fn last_entry(body: &Value) -> Option<&Value> {
        body.get("response")?.as_array()?.last()
    }

    /// Personalization variables carried by a response entry, if any.
    pub fn entry_vars(entry: &Value) -> Option<&Map<String, Value>> {
        entry.get("vars")?.as_object()
    }

    /// A body counts as successful unless an entry explicitly says otherwise.
    pub fn body_success(body: &Value) -> bool {
        match last_entry(body) {
            Some(entry) => entry
                .get("success")
                .and_then(Value::as_bool)
                .unwrap_or(true),
            None => true,
        }
    }

    /// The plain success body the backend returns for fire-and-forget actions.
    pub fn success_body() -> Value {
        json!({"response": [{"success": true}]})
    }
}
