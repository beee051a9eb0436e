use std::path::Path;
use std::sync::{Arc, Mutex};

use anyhow::{Context, Result};
use leanplum_transport::{HttpTransport, Transport};
use leanplum_wire::{response, ActionKind, ActionRecord, API_VERSION};
use serde_json::{Map, Value};
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::cache::StartCache;
use crate::config::{BatchConfig, Mode};
use crate::constants::DEFAULT_API_PATH;
use crate::queue::{FlushOutcome, QueueHandle};

/// Session lifecycle phases. `Stopped` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    NotStarted,
    Starting,
    Started,
    Stopped,
}

type VariablesHandler = Arc<dyn Fn() + Send + Sync>;
type StartResponseHandler = Arc<dyn Fn(bool) + Send + Sync>;

struct SessionState {
    app_id: Option<String>,
    client_key: Option<String>,
    mode: Mode,
    api_path: String,
    user_id: Option<String>,
    user_attributes: Map<String, Value>,
    variables: Map<String, Value>,
    phase: Phase,
    coalesce_in_development: bool,
}

#[derive(Default)]
struct Handlers {
    variables_changed: Vec<VariablesHandler>,
    start_response: Vec<StartResponseHandler>,
}

/// One client instance per session. Construction requires a running Tokio
/// runtime; all methods are non-blocking and completion is observed through
/// callbacks and registered handlers.
pub struct Leanplum {
    state: Arc<Mutex<SessionState>>,
    handlers: Arc<Mutex<Handlers>>,
    cache: Arc<StartCache>,
    queue: QueueHandle,
}

impl Leanplum {
    pub fn new(transport: Arc<dyn Transport>) -> Self {
        let state = SessionState {
            app_id: None,
            client_key: None,
            mode: Mode::Production,
            api_path: DEFAULT_API_PATH.to_string(),
            user_id: None,
            user_attributes: Map::new(),
            variables: Map::new(),
            phase: Phase::NotStarted,
            coalesce_in_development: false,
        };
        let (queue, outcome_rx) = QueueHandle::spawn(
            transport,
            DEFAULT_API_PATH.to_string(),
            BatchConfig::default(),
        );
        let client = Self {
            state: Arc::new(Mutex::new(state)),
            handlers: Arc::new(Mutex::new(Handlers::default())),
            cache: Arc::new(StartCache::new()),
            queue,
        };
        client.spawn_merge_task(outcome_rx);
        client
    }

    /// Convenience constructor over the real HTTP transport.
    pub fn with_http() -> Result<Self> {
        let transport = HttpTransport::new().context("building http transport")?;
        Ok(Self::new(Arc::new(transport)))
    }

    // --- configuration -----------------------------------------------------

    pub fn set_app_id_for_development_mode(&self, app_id: &str, client_key: &str) {
        self.set_app_id(app_id, client_key, Mode::Development);
    }

    pub fn set_app_id_for_production_mode(&self, app_id: &str, client_key: &str) {
        self.set_app_id(app_id, client_key, Mode::Production);
    }

    fn set_app_id(&self, app_id: &str, client_key: &str, mode: Mode) {
        let solo = {
            let mut state = self.state.lock().unwrap();
            state.app_id = Some(app_id.to_string());
            state.client_key = Some(client_key.to_string());
            state.mode = mode;
            mode == Mode::Development && !state.coalesce_in_development
        };
        self.queue.set_solo(solo);
    }

    /// In development mode every action goes out on its own request so the
    /// dashboard sees events as they happen. Enabling coalescing batches
    /// development traffic the same way production does. Whether production
    /// coalescing is itself intentional backend behavior is unconfirmed, so
    /// both branches stay configurable.
    pub fn set_development_coalescing(&self, coalesce: bool) {
        let solo = {
            let mut state = self.state.lock().unwrap();
            state.coalesce_in_development = coalesce;
            state.mode == Mode::Development && !coalesce
        };
        self.queue.set_solo(solo);
    }

    /// Overrides the endpoint for all subsequent requests in the session.
    pub fn set_api_path(&self, url: &str) {
        self.state.lock().unwrap().api_path = url.to_string();
        self.queue.set_endpoint(url.to_string());
    }

    pub fn set_request_batching(&self, enabled: bool, max_size: Option<usize>) {
        self.queue.set_batching(enabled, max_size);
    }

    pub fn set_batch_flush_delay(&self, delay: std::time::Duration) {
        self.queue.set_flush_delay(delay);
    }

    // --- session lifecycle -------------------------------------------------

    /// Begin a session. The `start` record always travels as its own request
    /// regardless of batching. On completion the returned variables are
    /// merged, the phase moves to `Started`, `callback` runs exactly once
    /// with the outcome, and start-response handlers fire (success or not).
    pub fn start<F>(&self, user_id: &str, attributes: Map<String, Value>, callback: F)
    where
        F: FnOnce(bool) + Send + 'static,
    {
        {
            let mut state = self.state.lock().unwrap();
            if state.phase != Phase::NotStarted {
                warn!(phase = ?state.phase, "start called on an already-started session");
            }
            state.phase = Phase::Starting;
            state.user_id = Some(user_id.to_string());
            state.user_attributes = attributes.clone();
        }

        let record = self.record(ActionKind::Start).with_param(
            "userAttributes",
            serde_json::to_string(&attributes).unwrap_or_default(),
        );
        let reply = self.queue.enqueue_solo(record);

        let state = Arc::clone(&self.state);
        let handlers = Arc::clone(&self.handlers);
        let cache = Arc::clone(&self.cache);
        tokio::spawn(async move {
            let success = match reply.await {
                Ok(Ok(body)) => {
                    let success = response::body_success(&body);
                    if Self::merge_response(&state, &body) {
                        Self::fire_variables_changed(&handlers);
                    }
                    cache.store(body);
                    success
                }
                Ok(Err(err)) => {
                    warn!(error = %err, "start request failed");
                    false
                }
                Err(_) => false,
            };
            state.lock().unwrap().phase = Phase::Started;
            callback(success);
            Self::fire_start_response(&handlers, success);
        });
    }

    /// Bootstrap the session from the last cached start response without a
    /// network round trip. Always succeeds; an empty cache just leaves the
    /// variable map untouched.
    pub fn start_from_cache<F>(&self, user_id: &str, attributes: Map<String, Value>, callback: F)
    where
        F: FnOnce(bool) + Send + 'static,
    {
        {
            let mut state = self.state.lock().unwrap();
            state.user_id = Some(user_id.to_string());
            state.user_attributes = attributes;
            state.phase = Phase::Started;
        }
        if let Some(body) = self.cache.get() {
            if Self::merge_response(&self.state, &body) {
                Self::fire_variables_changed(&self.handlers);
            }
        }
        callback(true);
        Self::fire_start_response(&self.handlers, true);
    }

    /// Enqueues `stop` and moves to `Stopped` without waiting for the reply.
    pub fn stop(&self) {
        self.enqueue_simple(ActionKind::Stop);
        self.state.lock().unwrap().phase = Phase::Stopped;
    }

    pub fn pause_session(&self) {
        self.enqueue_simple(ActionKind::PauseSession);
    }

    pub fn resume_session(&self) {
        self.enqueue_simple(ActionKind::ResumeSession);
    }

    pub fn pause_state(&self) {
        self.enqueue_simple(ActionKind::PauseState);
    }

    pub fn resume_state(&self) {
        self.enqueue_simple(ActionKind::ResumeState);
    }

    // --- actions -----------------------------------------------------------

    /// When `user_id` differs from the session's, the record carries
    /// `newUserId` and the local id is updated optimistically.
    pub fn set_user_attributes(&self, user_id: Option<&str>, attributes: Map<String, Value>) {
        let mut record = self.record(ActionKind::SetUserAttributes);
        {
            let mut state = self.state.lock().unwrap();
            if let Some(new_id) = user_id {
                if state.user_id.as_deref() != Some(new_id) {
                    record = record.with_param("newUserId", new_id);
                    state.user_id = Some(new_id.to_string());
                }
            }
            for (key, value) in &attributes {
                state.user_attributes.insert(key.clone(), value.clone());
            }
        }
        record = record.with_param(
            "userAttributes",
            serde_json::to_string(&attributes).unwrap_or_default(),
        );
        self.queue.enqueue(record);
    }

    pub fn track(&self, event: Option<&str>, params: Option<Map<String, Value>>) {
        let mut record = self.record(ActionKind::Track);
        if let Some(event) = event {
            record = record.with_param("event", event);
        }
        if let Some(params) = params {
            record = record.with_param(
                "params",
                serde_json::to_string(&params).unwrap_or_default(),
            );
        }
        self.queue.enqueue(record);
    }

    /// Advances to a named state. Maps to the wire action `advance`.
    pub fn advance_to(&self, state_name: Option<&str>, params: Option<Map<String, Value>>) {
        let mut record = self.record(ActionKind::Advance);
        if let Some(state_name) = state_name {
            record = record.with_param("state", state_name);
        }
        if let Some(params) = params {
            record = record.with_param(
                "params",
                serde_json::to_string(&params).unwrap_or_default(),
            );
        }
        self.queue.enqueue(record);
    }

    /// Force the queue to flush whatever is buffered right now.
    pub fn flush(&self) {
        self.queue.flush();
    }

    // --- variables & handlers ----------------------------------------------

    /// Local write only; variables-changed handlers fire on server-response
    /// merges, not here.
    pub fn set_variables(&self, values: Map<String, Value>) {
        self.state.lock().unwrap().variables = values;
    }

    pub fn get_variables(&self) -> Map<String, Value> {
        self.state.lock().unwrap().variables.clone()
    }

    /// Handlers run in registration order, at most once per firing event,
    /// and persist across start cycles until cleared.
    pub fn add_variables_changed_handler<F>(&self, handler: F)
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.handlers
            .lock()
            .unwrap()
            .variables_changed
            .push(Arc::new(handler));
    }

    /// Invoked once per completed start round trip, success or failure.
    pub fn add_start_response_handler<F>(&self, handler: F)
    where
        F: Fn(bool) + Send + Sync + 'static,
    {
        self.handlers
            .lock()
            .unwrap()
            .start_response
            .push(Arc::new(handler));
    }

    pub fn clear_handlers(&self) {
        let mut handlers = self.handlers.lock().unwrap();
        handlers.variables_changed.clear();
        handlers.start_response.clear();
    }

    // --- introspection & cache ---------------------------------------------

    pub fn phase(&self) -> Phase {
        self.state.lock().unwrap().phase
    }

    pub fn user_id(&self) -> Option<String> {
        self.state.lock().unwrap().user_id.clone()
    }

    /// Persist the last start response so a later process can
    /// `start_from_cache` without the network.
    pub fn persist_start_cache(&self, path: &Path) {
        self.cache.persist_to(path);
    }

    pub fn load_start_cache(&self, path: &Path) {
        if let Some(body) = StartCache::load(path).get() {
            self.cache.store(body);
        }
    }

    // --- internals ----------------------------------------------------------

    fn enqueue_simple(&self, action: ActionKind) {
        let phase = self.state.lock().unwrap().phase;
        if phase != Phase::Started {
            warn!(action = action.as_str(), ?phase, "action sent before start completed");
        }
        self.queue.enqueue(self.record(action));
    }

    /// Every record carries the session's identification fields alongside
    /// its action-specific params.
    fn record(&self, action: ActionKind) -> ActionRecord {
        let state = self.state.lock().unwrap();
        let mut record = ActionRecord::new(action)
            .with_param("apiVersion", API_VERSION)
            .with_param("devMode", state.mode == Mode::Development);
        if let Some(app_id) = &state.app_id {
            record = record.with_param("appId", app_id.clone());
        }
        if let Some(client_key) = &state.client_key {
            record = record.with_param("clientKey", client_key.clone());
        }
        if let Some(user_id) = &state.user_id {
            record = record.with_param("userId", user_id.clone());
        }
        record
    }

    fn spawn_merge_task(&self, mut rx: mpsc::UnboundedReceiver<FlushOutcome>) {
        let state = Arc::clone(&self.state);
        let handlers = Arc::clone(&self.handlers);
        tokio::spawn(async move {
            while let Some(outcome) = rx.recv().await {
                debug!(actions = outcome.actions, "batch response received");
                if Self::merge_response(&state, &outcome.body) {
                    Self::fire_variables_changed(&handlers);
                }
            }
        });
    }

    /// Replace the variable map from a response body that carries vars.
    /// Returns true when the map changed.
    fn merge_response(state: &Arc<Mutex<SessionState>>, body: &Value) -> bool {
        let Some(entry) = response::last_entry(body) else {
            return false;
        };
        let Some(vars) = response::entry_vars(entry) else {
            return false;
        };
        state.lock().unwrap().variables = vars.clone();
        true
    }

    /// Handlers run against a snapshot taken under the lock, so a handler
    /// may register or clear handlers without deadlocking the registry.
    fn fire_variables_changed(handlers: &Arc<Mutex<Handlers>>) {
        let snapshot: Vec<VariablesHandler> =
            handlers.lock().unwrap().variables_changed.clone();
        for handler in snapshot {
            handler();
        }
    }

    fn fire_start_response(handlers: &Arc<Mutex<Handlers>>, success: bool) {
        let snapshot: Vec<StartResponseHandler> =
            handlers.lock().unwrap().start_response.clone();
        for handler in snapshot {
            handler(success);
        }
    }
}
