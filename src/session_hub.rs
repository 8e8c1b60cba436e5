//! Per-client session routing for the HTTP/SSE transport.
//!
//! Every SSE stream owns one session. Client POSTs are routed to the
//! session's protocol handler by `sessionId`; the handler's replies are
//! pushed back out through the session's stream.

use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::str::FromStr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Instant;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Default maximum concurrent sessions
pub const DEFAULT_MAX_SESSIONS: usize = 50;

/// Path clients POST their messages to
pub const MESSAGES_PATH: &str = "/messages";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SessionId(Uuid);

impl SessionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl FromStr for SessionId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s).map(SessionId)
    }
}

/// Server to client push on a session's stream
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    /// Where the client should POST its messages
    Endpoint(String),
    /// One serialized protocol message
    Message(String),
}

impl SessionEvent {
    pub fn event_name(&self) -> &'static str {
        match self {
            SessionEvent::Endpoint(_) => "endpoint",
            SessionEvent::Message(_) => "message",
        }
    }

    pub fn data(&self) -> &str {
        match self {
            SessionEvent::Endpoint(data) | SessionEvent::Message(data) => data,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum HubError {
    #[error("Missing sessionId parameter")]
    MissingSessionId,

    #[error("Session not found")]
    SessionNotFound,

    #[error("Session limit of {max} reached")]
    CapacityExceeded { max: usize },
}

/// Registry entry for one connected client
#[derive(Debug)]
struct ClientSession {
    inbound: mpsc::UnboundedSender<Value>,
    outbound: mpsc::UnboundedSender<SessionEvent>,
    cancel: CancellationToken,
    opened_at: Instant,
}

/// Receiving ends of a freshly opened session
#[derive(Debug)]
pub struct SessionChannel {
    pub id: SessionId,
    /// Client requests, in arrival order, for the protocol handler
    pub inbound: mpsc::UnboundedReceiver<Value>,
    /// Pushes for the client's stream; starts with the endpoint event
    pub outbound: mpsc::UnboundedReceiver<SessionEvent>,
    /// Cancelled when the session closes
    pub cancel: CancellationToken,
}

#[derive(Debug)]
pub struct SessionTransportHub {
    sessions: DashMap<SessionId, ClientSession>,
    /// Reserved slots; taken before insert, released on removal
    reserved: AtomicUsize,
    max_sessions: usize,
}

impl Default for SessionTransportHub {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_SESSIONS)
    }
}

impl SessionTransportHub {
    pub fn new(max_sessions: usize) -> Self {
        Self {
            sessions: DashMap::new(),
            reserved: AtomicUsize::new(0),
            max_sessions,
        }
    }

    pub fn max_sessions(&self) -> usize {
        self.max_sessions
    }

    /// URL the client POSTs to for `id`
    pub fn endpoint_for(id: &SessionId) -> String {
        format!("{MESSAGES_PATH}?sessionId={id}")
    }

    pub fn open_channel(&self) -> Result<SessionChannel, HubError> {
        let reserved = self
            .reserved
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |open| {
                (open < self.max_sessions).then_some(open + 1)
            });
        if reserved.is_err() {
            warn!(
                "Refusing new session, limit of {} reached",
                self.max_sessions
            );
            return Err(HubError::CapacityExceeded {
                max: self.max_sessions,
            });
        }

        let id = SessionId::new();
        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        let cancel = CancellationToken::new();

        // Queued before the session is visible, so it is always first.
        let _ = outbound_tx.send(SessionEvent::Endpoint(Self::endpoint_for(&id)));

        self.sessions.insert(
            id,
            ClientSession {
                inbound: inbound_tx,
                outbound: outbound_tx,
                cancel: cancel.clone(),
                opened_at: Instant::now(),
            },
        );
        info!("Opened session {}", id);

        Ok(SessionChannel {
            id,
            inbound: inbound_rx,
            outbound: outbound_rx,
            cancel,
        })
    }

    /// Forward a client payload to its session's protocol handler
    pub fn route_request(&self, session_id: Option<&str>, payload: Value) -> Result<(), HubError> {
        let raw = session_id
            .filter(|id| !id.is_empty())
            .ok_or(HubError::MissingSessionId)?;
        let id: SessionId = raw.parse().map_err(|_| {
            debug!("Malformed session id {:?}", raw);
            HubError::SessionNotFound
        })?;

        // Send under the entry guard; close_channel needs the same shard to remove it.
        let session = self.sessions.get(&id).ok_or(HubError::SessionNotFound)?;
        session
            .inbound
            .send(payload)
            .map_err(|_| HubError::SessionNotFound)
    }

    pub fn push(&self, id: &SessionId, event: SessionEvent) -> Result<(), HubError> {
        let session = self.sessions.get(id).ok_or(HubError::SessionNotFound)?;
        session
            .outbound
            .send(event)
            .map_err(|_| HubError::SessionNotFound)
    }

    /// Remove a session and release its channels. Returns whether it was open.
    pub fn close_channel(&self, id: &SessionId) -> bool {
        match self.sessions.remove(id) {
            Some((_, session)) => {
                self.reserved.fetch_sub(1, Ordering::SeqCst);
                session.cancel.cancel();
                info!(
                    "Closed session {} after {:?}",
                    id,
                    session.opened_at.elapsed()
                );
                true
            }
            None => false,
        }
    }

    /// Close every session, used on shutdown
    pub fn close_all(&self) -> usize {
        let ids = self.session_ids();
        ids.iter().filter(|id| self.close_channel(id)).count()
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    pub fn contains(&self, id: &SessionId) -> bool {
        self.sessions.contains_key(id)
    }

    pub fn session_ids(&self) -> Vec<SessionId> {
        self.sessions.iter().map(|entry| *entry.key()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_first_event_is_endpoint() {
        let hub = SessionTransportHub::new(4);
        let mut channel = hub.open_channel().unwrap();

        let first = channel.outbound.recv().await.unwrap();
        assert_eq!(first.event_name(), "endpoint");
        assert_eq!(
            first.data(),
            format!("/messages?sessionId={}", channel.id)
        );
    }

    #[tokio::test]
    async fn test_route_preserves_order() {
        let hub = SessionTransportHub::new(4);
        let mut channel = hub.open_channel().unwrap();
        let id = channel.id.to_string();

        for n in 0..3 {
            hub.route_request(Some(&id), json!({"n": n})).unwrap();
        }
        for n in 0..3 {
            assert_eq!(channel.inbound.recv().await.unwrap(), json!({"n": n}));
        }
    }

    #[test]
    fn test_missing_and_unknown_session() {
        let hub = SessionTransportHub::new(4);
        assert_eq!(
            hub.route_request(None, json!({})),
            Err(HubError::MissingSessionId)
        );
        assert_eq!(
            hub.route_request(Some(""), json!({})),
            Err(HubError::MissingSessionId)
        );
        assert_eq!(
            hub.route_request(Some("not-a-uuid"), json!({})),
            Err(HubError::SessionNotFound)
        );
        let unknown = SessionId::new().to_string();
        assert_eq!(
            hub.route_request(Some(&unknown), json!({})),
            Err(HubError::SessionNotFound)
        );
    }

    #[tokio::test]
    async fn test_close_is_idempotent_and_cancels() {
        let hub = SessionTransportHub::new(4);
        let mut channel = hub.open_channel().unwrap();
        let id = channel.id;

        assert!(hub.close_channel(&id));
        assert!(!hub.close_channel(&id));
        assert!(!hub.contains(&id));
        assert!(channel.cancel.is_cancelled());
        assert_eq!(
            hub.route_request(Some(&id.to_string()), json!({})),
            Err(HubError::SessionNotFound)
        );

        // Senders are gone once the entry is dropped.
        assert!(channel.inbound.recv().await.is_none());
    }

    #[test]
    fn test_capacity_limit() {
        let hub = SessionTransportHub::new(1);
        let first = hub.open_channel().unwrap();
        assert_eq!(
            hub.open_channel().unwrap_err(),
            HubError::CapacityExceeded { max: 1 }
        );
        hub.close_channel(&first.id);
        assert!(hub.open_channel().is_ok());
    }

    #[test]
    fn test_concurrent_opens_respect_limit() {
        let hub = SessionTransportHub::new(8);
        let barrier = std::sync::Barrier::new(64);

        let opened = std::thread::scope(|scope| {
            let handles: Vec<_> = (0..64)
                .map(|_| {
                    scope.spawn(|| {
                        barrier.wait();
                        hub.open_channel().ok()
                    })
                })
                .collect();
            handles
                .into_iter()
                .filter_map(|handle| handle.join().unwrap())
                .collect::<Vec<_>>()
        });

        assert_eq!(opened.len(), 8);
        assert_eq!(hub.len(), 8);
        assert_eq!(
            hub.open_channel().unwrap_err(),
            HubError::CapacityExceeded { max: 8 }
        );
    }
}
