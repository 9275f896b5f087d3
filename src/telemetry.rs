//! Telemetry for rate limiting decisions.
//!
//! The limiter emits a [`LimiterEvent`] for every admission, rejection and
//! skipped limit. Events flow through `TelemetrySink` implementations, which
//! are plain `tower::Service<LimiterEvent>`s and can log, aggregate, or
//! forward events elsewhere (see the `routelimit-jsonl` crate for a file
//! sink).
//!
//! Emission is best-effort and never changes a decision.
//!
//! ```rust
//! use routelimit::telemetry::{LimiterEvent, MemorySink};
//! use tower::Service;
//!
//! # #[tokio::main]
//! # async fn main() {
//! let mut sink = MemorySink::new();
//! let event = LimiterEvent::Rejected {
//!     endpoint: "index".into(),
//!     limit: "1/2s".into(),
//!     retry_after: 2,
//! };
//! sink.call(event.clone()).await.unwrap();
//! assert_eq!(sink.events(), vec![event]);
//! # }
//! ```

use std::sync::Arc;

use futures::future::BoxFuture;

pub mod events;
pub mod sinks;

pub use events::LimiterEvent;
pub use sinks::{emit_best_effort, LogSink, MemorySink, NullSink, StreamingSink, TelemetrySink};

/// Type-erased emitter the limiter holds, so it need not be generic over
/// its sink.
pub(crate) type Emitter = Arc<dyn Fn(LimiterEvent) -> BoxFuture<'static, ()> + Send + Sync>;

pub(crate) fn emitter<S>(sink: S) -> Emitter
where
    S: TelemetrySink + Sync,
    S::Future: Send + 'static,
{
    Arc::new(move |event| -> BoxFuture<'static, ()> { Box::pin(emit_best_effort(sink.clone(), event)) })
}

pub(crate) fn null_emitter() -> Emitter {
    emitter(NullSink)
}
