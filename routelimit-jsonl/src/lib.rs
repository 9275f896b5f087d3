//! JSONL sink for `routelimit`. Writes one limiter event per line, giving
//! an append-only audit trail of admissions and rejections.
//! Always writes; bring your own path.

use routelimit::telemetry::{LimiterEvent, TelemetrySink};
use serde_json::json;
use std::io;
use std::path::PathBuf;
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::{SystemTime, UNIX_EPOCH};

#[derive(Clone, Debug)]
pub struct JsonlSink {
    path: PathBuf,
}

impl JsonlSink {
    pub fn new<P: Into<PathBuf>>(path: P) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &std::path::Path {
        &self.path
    }
}

impl tower_service::Service<LimiterEvent> for JsonlSink {
    type Response = ();
    type Error = io::Error;
    type Future = Pin<Box<dyn std::future::Future<Output = Result<(), Self::Error>> + Send>>;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, event: LimiterEvent) -> Self::Future {
        let path = self.path.clone();
        let line = event_to_json(&event).to_string() + "\n";
        Box::pin(async move {
            use tokio::io::AsyncWriteExt;
            let mut file = tokio::fs::OpenOptions::new().create(true).append(true).open(&path).await?;
            file.write_all(line.as_bytes()).await?;
            file.flush().await?;
            tracing::trace!(target: "routelimit::jsonl", path = %path.display(), "event appended");
            Ok(())
        })
    }
}

impl TelemetrySink for JsonlSink {
    type SinkError = io::Error;
}

/// JSON form of one event, tagged with `kind` and a millisecond timestamp.
pub fn event_to_json(event: &LimiterEvent) -> serde_json::Value {
    let ts_ms = SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default().as_millis() as u64;
    match event {
        LimiterEvent::Admitted { endpoint, limits } => {
            json!({ "kind": event.kind(), "ts_ms": ts_ms, "endpoint": endpoint, "limits": limits })
        }
        LimiterEvent::Rejected { endpoint, limit, retry_after } => json!({
            "kind": event.kind(),
            "ts_ms": ts_ms,
            "endpoint": endpoint,
            "limit": limit,
            "retry_after_s": retry_after,
        }),
        LimiterEvent::Skipped { endpoint, limit } => {
            json!({ "kind": event.kind(), "ts_ms": ts_ms, "endpoint": endpoint, "limit": limit })
        }
        LimiterEvent::Message { admitted, retry_after } => json!({
            "kind": event.kind(),
            "ts_ms": ts_ms,
            "admitted": admitted,
            "retry_after_s": retry_after,
        }),
    }
}
