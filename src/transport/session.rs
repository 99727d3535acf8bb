use crate::game::constants::OUTBOUND_CAPACITY;
use crate::protocol::{error_code, Event};
use serde_json::Value;
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;

/// One connected client. Shared between the socket pump, the lobby and the
/// session's current room; everything on it is push-based and lock-free.
#[derive(Debug)]
pub struct Session {
    pub id: String,
    outbound: mpsc::Sender<Event>,
    connected: AtomicBool,
    /// The server stays silent (no pings, no broadcasts) until `whoami`.
    identified: AtomicBool,
    latency_ms: AtomicI64,
}

impl Session {
    pub fn new(id: String) -> (Arc<Self>, mpsc::Receiver<Event>) {
        let (outbound, rx) = mpsc::channel(OUTBOUND_CAPACITY);
        let session = Arc::new(Self {
            id,
            outbound,
            connected: AtomicBool::new(true),
            identified: AtomicBool::new(false),
            latency_ms: AtomicI64::new(0),
        });
        (session, rx)
    }

    /// Queue a named event. A full queue means the client stopped reading,
    /// so the session is condemned instead of buffering without bound.
    pub fn push(&self, name: &str, data: Value) {
        self.push_event(Event::named(name, data));
    }

    pub fn push_ack(&self, ack_id: u64, error: Option<&str>, result: Value) {
        self.push_event(Event::ack(ack_id, error, result));
    }

    pub fn push_event(&self, event: Event) {
        if !self.is_connected() {
            // An ack that can no longer reach the client completes as lost.
            if let Event::Ack { ack_id, .. } = event {
                tracing::debug!(
                    session = %self.id,
                    ack_id,
                    code = error_code::DISCONNECTED,
                    "ack dropped at close"
                );
            }
            return;
        }
        if self.outbound.try_send(event).is_err() {
            tracing::warn!(session = %self.id, "outbound queue overflow, closing session");
            self.mark_closed();
        }
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    /// True only for the caller that actually performed the close, so
    /// close handling runs exactly once.
    pub fn mark_closed(&self) -> bool {
        self.connected.swap(false, Ordering::SeqCst)
    }

    pub fn identify(&self) {
        self.identified.store(true, Ordering::SeqCst);
    }

    pub fn is_identified(&self) -> bool {
        self.identified.load(Ordering::SeqCst)
    }

    pub fn set_latency(&self, millis: i64) {
        self.latency_ms.store(millis, Ordering::Relaxed);
    }

    pub fn latency(&self) -> i64 {
        self.latency_ms.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn close_runs_exactly_once() {
        let (session, _rx) = Session::new("S1".to_string());
        assert!(session.mark_closed());
        assert!(!session.mark_closed());
        assert!(!session.is_connected());
    }

    #[test]
    fn pushes_are_dropped_after_close() {
        let (session, mut rx) = Session::new("S1".to_string());
        session.push("ping", json!(1));
        session.mark_closed();
        session.push("ping", json!(2));
        assert!(rx.try_recv().is_ok());
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn queue_overflow_condemns_the_session() {
        let (session, _rx) = Session::new("S1".to_string());
        for i in 0..(crate::game::constants::OUTBOUND_CAPACITY + 2) {
            session.push("position", json!(i));
        }
        assert!(!session.is_connected());
    }
}
