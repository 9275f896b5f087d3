use std::fmt;

/// Events emitted by the limiter while deciding requests.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LimiterEvent {
    /// Every effective limit passed and was committed.
    Admitted {
        /// Endpoint the request was routed to
        endpoint: String,
        /// Number of limits checked and committed
        limits: usize,
    },
    /// A limit rejected the request; nothing was committed.
    Rejected {
        endpoint: String,
        /// The rejecting limit, as `count/period`
        limit: String,
        /// Seconds until the limit admits again
        retry_after: u64,
    },
    /// A limit was bypassed by its skip function.
    Skipped { endpoint: String, limit: String },
    /// A message limiter decided one message.
    Message {
        admitted: bool,
        /// Present when `admitted` is false
        retry_after: Option<u64>,
    },
}

impl LimiterEvent {
    /// Short, stable name of the variant.
    pub fn kind(&self) -> &'static str {
        match self {
            LimiterEvent::Admitted { .. } => "admitted",
            LimiterEvent::Rejected { .. } => "rejected",
            LimiterEvent::Skipped { .. } => "skipped",
            LimiterEvent::Message { .. } => "message",
        }
    }
}

impl fmt::Display for LimiterEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LimiterEvent::Admitted { endpoint, limits } => {
                write!(f, "Admitted(endpoint={}, limits={})", endpoint, limits)
            }
            LimiterEvent::Rejected { endpoint, limit, retry_after } => {
                write!(f, "Rejected(endpoint={}, limit={}, retry_after={}s)", endpoint, limit, retry_after)
            }
            LimiterEvent::Skipped { endpoint, limit } => {
                write!(f, "Skipped(endpoint={}, limit={})", endpoint, limit)
            }
            LimiterEvent::Message { admitted: true, .. } => write!(f, "Message(admitted)"),
            LimiterEvent::Message { admitted: false, retry_after } => {
                write!(f, "Message(rejected, retry_after={}s)", retry_after.unwrap_or(1))
            }
        }
    }
}
