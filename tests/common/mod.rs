#![allow(dead_code)]

use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing_subscriber::fmt::MakeWriter;
use wxbus::transport::{CollectorResponse, CollectorTransport, TransportError};

/// Scripted collector reply.
#[derive(Debug, Clone)]
pub enum Reply {
    Respond { status: u16, body: String },
    Delayed { delay: Duration, status: u16, body: String },
    Fail(TransportError),
    Hang,
}

impl Reply {
    pub fn ok(body: &str) -> Self {
        Reply::Respond {
            status: 200,
            body: body.to_string(),
        }
    }

    pub fn status(status: u16) -> Self {
        Reply::Respond {
            status,
            body: String::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedRequest {
    pub method: &'static str,
    pub path: String,
    pub content_type: Option<String>,
    pub body: String,
}

/// In-memory collector that records every request and replays scripted replies.
#[derive(Debug, Default)]
pub struct RecordingTransport {
    session_replies: Mutex<VecDeque<Reply>>,
    log_replies: Mutex<VecDeque<Reply>>,
    requests: Mutex<Vec<RecordedRequest>>,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

impl RecordingTransport {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Transport whose first `/session` call returns `body` with HTTP 200.
    pub fn with_session(body: &str) -> Arc<Self> {
        let transport = Self::default();
        transport.push_session(Reply::ok(body));
        Arc::new(transport)
    }

    pub fn push_session(&self, reply: Reply) {
        self.session_replies.lock().unwrap().push_back(reply);
    }

    pub fn push_log(&self, reply: Reply) {
        self.log_replies.lock().unwrap().push_back(reply);
    }

    pub fn requests(&self) -> Vec<RecordedRequest> {
        self.requests.lock().unwrap().clone()
    }

    pub fn session_requests(&self) -> usize {
        self.requests().iter().filter(|r| r.path == "/session").count()
    }

    pub fn log_posts(&self) -> Vec<RecordedRequest> {
        self.requests()
            .into_iter()
            .filter(|r| r.path == "/log")
            .collect()
    }

    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    async fn answer(&self, reply: Reply) -> Result<CollectorResponse, TransportError> {
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);

        let result = match reply {
            Reply::Respond { status, body } => Ok(CollectorResponse::new(status, body)),
            Reply::Delayed { delay, status, body } => {
                tokio::time::sleep(delay).await;
                Ok(CollectorResponse::new(status, body))
            }
            Reply::Fail(error) => Err(error),
            Reply::Hang => std::future::pending().await,
        };

        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        result
    }
}

#[async_trait]
impl CollectorTransport for RecordingTransport {
    async fn get(&self, path: &str) -> Result<CollectorResponse, TransportError> {
        self.requests.lock().unwrap().push(RecordedRequest {
            method: "GET",
            path: path.to_string(),
            content_type: None,
            body: String::new(),
        });
        let reply = self
            .session_replies
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Reply::ok(r#"{"runId":"run-default"}"#));
        self.answer(reply).await
    }

    async fn post(
        &self,
        path: &str,
        content_type: &str,
        body: String,
    ) -> Result<CollectorResponse, TransportError> {
        self.requests.lock().unwrap().push(RecordedRequest {
            method: "POST",
            path: path.to_string(),
            content_type: Some(content_type.to_string()),
            body,
        });
        let reply = self
            .log_replies
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Reply::ok(r#"{"accepted":true}"#));
        self.answer(reply).await
    }
}

/// Collects formatted log output so tests can assert on emitted events.
#[derive(Debug, Clone, Default)]
pub struct CapturedLogs {
    buffer: Arc<Mutex<Vec<u8>>>,
}

impl CapturedLogs {
    pub fn subscriber(&self) -> impl tracing::Subscriber + Send + Sync {
        tracing_subscriber::fmt()
            .with_writer(self.clone())
            .with_ansi(false)
            .with_max_level(tracing::Level::DEBUG)
            .finish()
    }

    pub fn contents(&self) -> String {
        String::from_utf8_lossy(&self.buffer.lock().unwrap()).into_owned()
    }

    pub fn count(&self, needle: &str) -> usize {
        self.contents().matches(needle).count()
    }
}

impl std::io::Write for CapturedLogs {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.buffer.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

impl<'a> MakeWriter<'a> for CapturedLogs {
    type Writer = CapturedLogs;

    fn make_writer(&'a self) -> Self::Writer {
        self.clone()
    }
}
