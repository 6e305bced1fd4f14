//! Fail-open telemetry sink.
//!
//! Records are only accepted once a collector session exists. Bursts of
//! [`TelemetrySink::enqueue`] calls are coalesced by a single debounce timer
//! into one `POST /log`, and at most one delivery is in flight at a time.
//! The first failed handshake or delivery disables the sink for good: queued
//! records are discarded and every later call is a no-op.

use crate::config::{ConfigError, SinkConfig};
use crate::transport::{CollectorTransport, HttpTransport, TransportError};
use serde::Serialize;
use serde_json::{Map, Value};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use thiserror::Error;
use tokio::runtime::Handle;
use tokio::sync::{watch, Notify};
use tokio::time;
use tracing::{debug, info, warn};

pub const SESSION_PATH: &str = "/session";
pub const LOG_PATH: &str = "/log";
pub const LOG_CONTENT_TYPE: &str = "application/x-ndjson";

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SinkError {
    #[error(transparent)]
    Transport(#[from] TransportError),
    #[error("collector returned HTTP {status}")]
    Status { status: u16 },
    #[error("request timed out after {0:?}")]
    Timeout(Duration),
    #[error("malformed session response: {0}")]
    MalformedSession(String),
    #[error("telemetry sink must be created inside a tokio runtime")]
    NoRuntime,
    #[error(transparent)]
    Config(#[from] ConfigError),
}

/// Why the sink stopped delivering.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DisableReason {
    #[error("session negotiation failed: {0}")]
    Session(SinkError),
    #[error("delivery failed: {0}")]
    Delivery(SinkError),
    #[error("sink shut down")]
    Shutdown,
}

/// Collector-issued handle for one run.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Session {
    pub run_id: String,
    pub metadata: Map<String, Value>,
}

impl Session {
    /// Parse a `/session` response body. The run id is required and must be a
    /// non-empty string; every other member is kept as metadata.
    pub fn from_response_body(body: &str) -> Result<Self, SinkError> {
        let value: Value = serde_json::from_str(body)
            .map_err(|e| SinkError::MalformedSession(e.to_string()))?;
        let Value::Object(mut metadata) = value else {
            return Err(SinkError::MalformedSession("expected a JSON object".to_string()));
        };

        let run_id = metadata
            .remove("runId")
            .or_else(|| metadata.remove("run_id"))
            .and_then(|id| match id {
                Value::String(id) if !id.trim().is_empty() => Some(id),
                _ => None,
            })
            .ok_or_else(|| SinkError::MalformedSession("missing run identifier".to_string()))?;

        Ok(Self { run_id, metadata })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum SinkStatus {
    Uninitialized,
    Initializing,
    Ready,
    Disabled,
}

#[derive(Debug, Clone)]
enum SinkState {
    Uninitialized,
    Initializing,
    Ready(Arc<Session>),
    Disabled(DisableReason),
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SinkStats {
    /// Records accepted into the pending queue.
    pub enqueued: u64,
    /// Records refused because the queue was at capacity.
    pub dropped: u64,
    /// Records acknowledged by the collector.
    pub delivered: u64,
    /// Successful `POST /log` requests.
    pub batches: u64,
    /// Records lost to a failed delivery or to disabling.
    pub discarded: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlushOutcome {
    Delivered(usize),
    Empty,
    /// Another flush is in flight.
    Busy,
    /// The sink is not ready.
    Inactive,
    Failed,
}

#[derive(Debug, Default)]
struct QueueState {
    pending: Vec<String>,
    flush_scheduled: bool,
    flushing: bool,
    overflow_warned: bool,
    stats: SinkStats,
}

struct SinkInner {
    config: SinkConfig,
    transport: Arc<dyn CollectorTransport>,
    runtime: Handle,
    // Lock order: queue before state. `disable` never holds both.
    state: Mutex<SinkState>,
    queue: Mutex<QueueState>,
    // Flips to true once the handshake task has settled the state.
    handshake_done: watch::Sender<bool>,
    flush_idle: Notify,
}

/// Cloneable handle to a telemetry sink.
#[derive(Clone)]
pub struct TelemetrySink {
    inner: Arc<SinkInner>,
}

static_assertions::assert_impl_all!(TelemetrySink: Send, Sync, Clone);

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl TelemetrySink {
    /// Sink delivering over HTTP to `config.base_url`.
    pub fn new(config: SinkConfig) -> Result<Self, SinkError> {
        let transport = HttpTransport::new(&config.base_url)?;
        Self::with_transport(config, Arc::new(transport))
    }

    /// Must be called from within a tokio runtime; flush timers run on it.
    pub fn with_transport(
        config: SinkConfig,
        transport: Arc<dyn CollectorTransport>,
    ) -> Result<Self, SinkError> {
        let runtime = Handle::try_current().map_err(|_| SinkError::NoRuntime)?;
        Ok(Self {
            inner: Arc::new(SinkInner {
                config,
                transport,
                runtime,
                state: Mutex::new(SinkState::Uninitialized),
                queue: Mutex::new(QueueState::default()),
                handshake_done: watch::Sender::new(false),
                flush_idle: Notify::new(),
            }),
        })
    }

    /// Negotiate the collector session. The handshake runs at most once on
    /// its own task, so dropping a caller neither cancels nor repeats it.
    /// Returns `None` once the sink is disabled.
    pub async fn init(&self) -> Option<Arc<Session>> {
        let mut done = {
            let mut state = lock(&self.inner.state);
            match &*state {
                SinkState::Ready(session) => return Some(Arc::clone(session)),
                SinkState::Disabled(_) => return None,
                SinkState::Initializing => {}
                SinkState::Uninitialized => {
                    *state = SinkState::Initializing;
                    let task_inner = Arc::clone(&self.inner);
                    self.inner.runtime.spawn(async move {
                        task_inner.negotiate().await;
                        task_inner.handshake_done.send_replace(true);
                    });
                }
            }
            self.inner.handshake_done.subscribe()
        };

        if done.wait_for(|settled| *settled).await.is_err() {
            return None;
        }
        self.get_session()
    }

    /// Queue one record. Never blocks and never fails: the record is dropped
    /// when empty, when the sink is not ready, or when the queue is full.
    pub fn enqueue(&self, line: impl Into<String>) {
        let mut line = line.into();
        let trimmed = line.trim_end_matches(|c| c == '\r' || c == '\n').len();
        line.truncate(trimmed);
        if line.is_empty() {
            return;
        }

        let mut queue = lock(&self.inner.queue);
        if !self.inner.is_ready() {
            return;
        }

        if queue.pending.len() >= self.inner.config.max_pending {
            queue.stats.dropped += 1;
            if !queue.overflow_warned {
                queue.overflow_warned = true;
                warn!(
                    max_pending = self.inner.config.max_pending,
                    "telemetry queue full; dropping records until the next flush"
                );
            }
            return;
        }

        queue.pending.push(line);
        queue.stats.enqueued += 1;

        if !queue.flush_scheduled && !queue.flushing {
            queue.flush_scheduled = true;
            schedule_flush(&self.inner);
        }
    }

    /// Deliver whatever is pending right away instead of waiting for the timer.
    pub async fn flush_now(&self) -> FlushOutcome {
        run_flush(&self.inner, false).await
    }

    /// Flush what is pending, then stop. No warning is emitted.
    ///
    /// A delivery already in flight is awaited first so records queued
    /// behind it still go out.
    pub async fn shutdown(&self) {
        loop {
            // Registered before the check so a flush ending in between still wakes us
            let idle = self.inner.flush_idle.notified();
            match self.flush_now().await {
                FlushOutcome::Busy => idle.await,
                outcome => {
                    debug!(?outcome, "final telemetry flush");
                    break;
                }
            }
        }
        self.inner.disable(DisableReason::Shutdown);
    }

    pub fn is_ready(&self) -> bool {
        self.inner.is_ready()
    }

    pub fn is_disabled(&self) -> bool {
        matches!(*lock(&self.inner.state), SinkState::Disabled(_))
    }

    pub fn get_session(&self) -> Option<Arc<Session>> {
        match &*lock(&self.inner.state) {
            SinkState::Ready(session) => Some(Arc::clone(session)),
            _ => None,
        }
    }

    pub fn status(&self) -> SinkStatus {
        match &*lock(&self.inner.state) {
            SinkState::Uninitialized => SinkStatus::Uninitialized,
            SinkState::Initializing => SinkStatus::Initializing,
            SinkState::Ready(_) => SinkStatus::Ready,
            SinkState::Disabled(_) => SinkStatus::Disabled,
        }
    }

    pub fn disable_reason(&self) -> Option<DisableReason> {
        match &*lock(&self.inner.state) {
            SinkState::Disabled(reason) => Some(reason.clone()),
            _ => None,
        }
    }

    pub fn stats(&self) -> SinkStats {
        lock(&self.inner.queue).stats
    }

    pub fn pending_len(&self) -> usize {
        lock(&self.inner.queue).pending.len()
    }

    pub fn config(&self) -> &SinkConfig {
        &self.inner.config
    }
}

impl std::fmt::Debug for TelemetrySink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TelemetrySink")
            .field("base_url", &self.inner.config.base_url)
            .field("status", &self.status())
            .field("pending", &self.pending_len())
            .finish()
    }
}

impl SinkInner {
    fn is_ready(&self) -> bool {
        matches!(*lock(&self.state), SinkState::Ready(_))
    }

    async fn negotiate(&self) {
        match self.request_session().await {
            Ok(session) => {
                let mut state = lock(&self.state);
                if matches!(*state, SinkState::Disabled(_)) {
                    return;
                }
                info!(run_id = %session.run_id, "telemetry session established");
                *state = SinkState::Ready(Arc::new(session));
            }
            Err(error) => self.disable(DisableReason::Session(error)),
        }
    }

    async fn request_session(&self) -> Result<Session, SinkError> {
        let timeout = self.config.request_timeout;
        let response = time::timeout(timeout, self.transport.get(SESSION_PATH))
            .await
            .map_err(|_| SinkError::Timeout(timeout))??;

        if !response.is_success() {
            return Err(SinkError::Status {
                status: response.status,
            });
        }
        Session::from_response_body(&response.body)
    }

    async fn deliver(&self, batch: Vec<String>) -> Result<(), SinkError> {
        let mut body = batch.join("\n");
        body.push('\n');

        let timeout = self.config.request_timeout;
        let response = time::timeout(timeout, self.transport.post(LOG_PATH, LOG_CONTENT_TYPE, body))
            .await
            .map_err(|_| SinkError::Timeout(timeout))??;

        if !response.is_success() {
            return Err(SinkError::Status {
                status: response.status,
            });
        }
        Ok(())
    }

    /// Move to the terminal state. Only the first call has any effect.
    fn disable(&self, reason: DisableReason) {
        {
            let mut state = lock(&self.state);
            if matches!(*state, SinkState::Disabled(_)) {
                return;
            }
            if reason != DisableReason::Shutdown {
                warn!(%reason, "telemetry disabled; records will be dropped for the rest of the run");
            }
            *state = SinkState::Disabled(reason);
        }

        let mut queue = lock(&self.queue);
        let discarded = queue.pending.len() as u64;
        queue.stats.discarded += discarded;
        queue.pending.clear();
    }
}

fn schedule_flush(inner: &Arc<SinkInner>) {
    let task_inner = Arc::clone(inner);
    inner.runtime.spawn(async move {
        time::sleep(task_inner.config.flush_delay).await;
        run_flush(&task_inner, true).await;
    });
}

async fn run_flush(inner: &Arc<SinkInner>, from_timer: bool) -> FlushOutcome {
    let batch = {
        let mut queue = lock(&inner.queue);
        if from_timer {
            queue.flush_scheduled = false;
        }
        if queue.flushing {
            return FlushOutcome::Busy;
        }
        if !inner.is_ready() {
            return FlushOutcome::Inactive;
        }
        if queue.pending.is_empty() {
            return FlushOutcome::Empty;
        }
        queue.flushing = true;
        queue.overflow_warned = false;
        std::mem::take(&mut queue.pending)
    };

    let count = batch.len();
    let result = inner.deliver(batch).await;

    let outcome = match result {
        Ok(()) => {
            debug!(records = count, "telemetry batch delivered");
            FlushOutcome::Delivered(count)
        }
        Err(error) => {
            inner.disable(DisableReason::Delivery(error));
            FlushOutcome::Failed
        }
    };

    let mut queue = lock(&inner.queue);
    queue.flushing = false;
    match outcome {
        FlushOutcome::Delivered(count) => {
            queue.stats.delivered += count as u64;
            queue.stats.batches += 1;
        }
        _ => queue.stats.discarded += count as u64,
    }

    // Records that arrived mid-flight get their own debounce window
    if !queue.pending.is_empty() && !queue.flush_scheduled && inner.is_ready() {
        queue.flush_scheduled = true;
        schedule_flush(inner);
    }
    drop(queue);
    inner.flush_idle.notify_waiters();

    outcome
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_session_parsing() {
        let session = Session::from_response_body(r#"{"runId":"abc","startedAt":12}"#).unwrap();
        assert_eq!(session.run_id, "abc");
        assert_eq!(session.metadata.get("startedAt"), Some(&Value::from(12)));
        assert!(!session.metadata.contains_key("runId"));
    }

    #[test]
    fn test_session_accepts_snake_case_id() {
        let session = Session::from_response_body(r#"{"run_id":"xyz"}"#).unwrap();
        assert_eq!(session.run_id, "xyz");
    }

    #[test]
    fn test_session_rejections() {
        for body in [
            "",
            "not json",
            "[1,2,3]",
            r#"{"foo":"bar"}"#,
            r#"{"runId":""}"#,
            r#"{"runId":"   "}"#,
            r#"{"runId":42}"#,
            r#"{"runId":null}"#,
        ] {
            assert!(
                matches!(Session::from_response_body(body), Err(SinkError::MalformedSession(_))),
                "body {body:?} should be rejected"
            );
        }
    }

    #[test]
    fn test_no_runtime() {
        let transport = HttpTransport::new("http://127.0.0.1:1").unwrap();
        let result = TelemetrySink::with_transport(SinkConfig::default(), Arc::new(transport));
        assert!(matches!(result, Err(SinkError::NoRuntime)));
    }

    #[test]
    fn test_bad_url_rejected() {
        let runtime = tokio::runtime::Builder::new_current_thread().enable_all().build().unwrap();
        let _guard = runtime.enter();
        let result = TelemetrySink::new(SinkConfig::new("ftp://collector"));
        assert!(matches!(result, Err(SinkError::Config(ConfigError::UnsupportedScheme(_)))));
    }
}
