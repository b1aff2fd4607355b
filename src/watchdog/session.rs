use tokio::sync::broadcast;

/// Lifecycle notification from the external real-time session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionEvent {
    /// Connection established and operational
    Ready,
    /// Connection lost; the session will try to recover on its own
    Disconnect,
    /// Session is actively re-establishing the connection
    Reconnecting,
    /// The session reported an error
    Error,
}

impl std::fmt::Display for SessionEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SessionEvent::Ready => write!(f, "ready"),
            SessionEvent::Disconnect => write!(f, "disconnect"),
            SessionEvent::Reconnecting => write!(f, "reconnecting"),
            SessionEvent::Error => write!(f, "error"),
        }
    }
}

/// The watchdog's read-only view of the external session.
///
/// Implemented by whatever owns the live connection to the remote
/// real-time service; the watchdog never drives the session, it only
/// observes readiness, latency, and lifecycle events.
pub trait Session: Send + Sync {
    /// Whether the session currently reports itself connected and usable
    fn is_ready(&self) -> bool;

    /// Round-trip latency to the remote service, if known
    fn latency_ms(&self) -> Option<u64>;

    /// Subscribe to lifecycle notifications
    fn subscribe(&self) -> broadcast::Receiver<SessionEvent>;
}
