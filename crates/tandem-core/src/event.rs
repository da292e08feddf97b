//! Session events and the per-engine event channel.
//!
//! Every observable effect of the session is a [`SessionEvent`]. Listeners
//! subscribe to one [`EventKind`] (or to all kinds) on an [`EventChannel`];
//! dispatch is synchronous, in subscription order, with no replay for late
//! subscribers.

use std::{
    fmt,
    sync::{Arc, Mutex, MutexGuard, PoisonError},
};

use crate::{identity::Identity, message::Message, room::RoomCode};

/// Severity of a status update.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusKind {
    /// Progress information.
    Info,
    /// A failure the caller should surface.
    Error,
}

/// Ephemeral status update, consumed once by listeners.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusEvent {
    /// Severity.
    pub kind: StatusKind,
    /// Human-readable text.
    pub message: String,
}

impl StatusEvent {
    /// Info status.
    pub fn info(message: impl Into<String>) -> Self {
        Self { kind: StatusKind::Info, message: message.into() }
    }

    /// Error status.
    pub fn error(message: impl Into<String>) -> Self {
        Self { kind: StatusKind::Error, message: message.into() }
    }
}

/// Events published by a session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    /// Channel established.
    Connect,

    /// A partner was bound.
    PartnerFound {
        /// Partner identity.
        identity: Identity,
        /// Partner's temporary display name.
        label: String,
    },

    /// A decoded message from the partner.
    MessageReceived(Message),

    /// Session ended.
    Disconnect,

    /// Partner started or stopped typing.
    PartnerTyping(bool),

    /// Outcome of a create-room intent.
    RoomCreated {
        /// Normalized room code (raw input on failure).
        code: String,
        /// Whether the room was registered.
        success: bool,
    },

    /// Outcome of a join-room intent.
    RoomJoined {
        /// Normalized room code (raw input on failure).
        code: String,
        /// Whether the join went through.
        success: bool,
        /// Reason on failure.
        error: Option<String>,
    },

    /// Progress or failure status.
    ConnectionStatus(StatusEvent),
}

impl SessionEvent {
    /// Discriminant used for subscription.
    pub fn kind(&self) -> EventKind {
        match self {
            Self::Connect => EventKind::Connect,
            Self::PartnerFound { .. } => EventKind::PartnerFound,
            Self::MessageReceived(_) => EventKind::MessageReceived,
            Self::Disconnect => EventKind::Disconnect,
            Self::PartnerTyping(_) => EventKind::PartnerTyping,
            Self::RoomCreated { .. } => EventKind::RoomCreated,
            Self::RoomJoined { .. } => EventKind::RoomJoined,
            Self::ConnectionStatus(_) => EventKind::ConnectionStatus,
        }
    }

    pub(crate) fn room_created(code: &RoomCode) -> Self {
        Self::RoomCreated { code: code.to_string(), success: true }
    }

    pub(crate) fn room_joined(code: &RoomCode) -> Self {
        Self::RoomJoined { code: code.to_string(), success: true, error: None }
    }

    pub(crate) fn partner_found(identity: Identity) -> Self {
        Self::PartnerFound { identity, label: identity.label() }
    }

    pub(crate) fn info(message: impl Into<String>) -> Self {
        Self::ConnectionStatus(StatusEvent::info(message))
    }

    pub(crate) fn error(message: impl Into<String>) -> Self {
        Self::ConnectionStatus(StatusEvent::error(message))
    }
}

/// Event kinds listeners can subscribe to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    /// `connect`
    Connect,
    /// `partner-found`
    PartnerFound,
    /// `message-received`
    MessageReceived,
    /// `disconnect`
    Disconnect,
    /// `partner-typing`
    PartnerTyping,
    /// `room-created`
    RoomCreated,
    /// `room-joined`
    RoomJoined,
    /// `connection-status`
    ConnectionStatus,
}

impl EventKind {
    /// Wire name of the event kind.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Connect => "connect",
            Self::PartnerFound => "partner-found",
            Self::MessageReceived => "message-received",
            Self::Disconnect => "disconnect",
            Self::PartnerTyping => "partner-typing",
            Self::RoomCreated => "room-created",
            Self::RoomJoined => "room-joined",
            Self::ConnectionStatus => "connection-status",
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Listener callback.
pub type Listener = Arc<dyn Fn(&SessionEvent) + Send + Sync>;

/// Handle returned by `subscribe`, used to unsubscribe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

struct Subscription {
    id: SubscriptionId,
    /// `None` subscribes to every kind.
    kind: Option<EventKind>,
    listener: Listener,
}

#[derive(Default)]
struct ListenerTable {
    next_id: u64,
    subscriptions: Vec<Subscription>,
}

/// Publish/subscribe bus scoped to one session.
///
/// Cloning yields another handle to the same listener table.
#[derive(Clone, Default)]
pub struct EventChannel {
    table: Arc<Mutex<ListenerTable>>,
}

impl EventChannel {
    /// Create a channel with no listeners.
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, ListenerTable> {
        self.table.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn insert(&self, kind: Option<EventKind>, listener: Listener) -> SubscriptionId {
        let mut table = self.lock();
        let id = SubscriptionId(table.next_id);
        table.next_id += 1;
        table.subscriptions.push(Subscription { id, kind, listener });
        id
    }

    /// Subscribe to one event kind.
    pub fn subscribe<F>(&self, kind: EventKind, listener: F) -> SubscriptionId
    where
        F: Fn(&SessionEvent) + Send + Sync + 'static,
    {
        self.insert(Some(kind), Arc::new(listener))
    }

    /// Subscribe to every event kind.
    pub fn subscribe_all<F>(&self, listener: F) -> SubscriptionId
    where
        F: Fn(&SessionEvent) + Send + Sync + 'static,
    {
        self.insert(None, Arc::new(listener))
    }

    /// Remove a subscription. Returns `false` if it was already gone.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut table = self.lock();
        let before = table.subscriptions.len();
        table.subscriptions.retain(|s| s.id != id);
        table.subscriptions.len() != before
    }

    /// Number of listeners that would receive an event of `kind`.
    pub fn listener_count(&self, kind: EventKind) -> usize {
        self.lock().subscriptions.iter().filter(|s| s.kind.is_none_or(|k| k == kind)).count()
    }

    /// Dispatch `event` to matching listeners in subscription order.
    ///
    /// Listeners run outside the table lock, so they may subscribe or
    /// unsubscribe; such changes apply from the next publish.
    ///
    /// Returns the number of listeners invoked.
    pub fn publish(&self, event: &SessionEvent) -> usize {
        let kind = event.kind();
        let listeners: Vec<Listener> = self
            .lock()
            .subscriptions
            .iter()
            .filter(|s| s.kind.is_none_or(|k| k == kind))
            .map(|s| Arc::clone(&s.listener))
            .collect();

        for listener in &listeners {
            listener(event);
        }

        listeners.len()
    }
}

impl fmt::Debug for EventChannel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventChannel")
            .field("subscriptions", &self.lock().subscriptions.len())
            .finish()
    }
}
