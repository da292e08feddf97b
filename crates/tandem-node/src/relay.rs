//! Peer relay between engines sharing one room registry.
//!
//! The relay is the only state shared between engines: the room registry and
//! a directory from identity to engine inbox. Inboxes are held weakly, so the
//! relay never keeps a stopped engine alive.

use std::{
    collections::HashMap,
    fmt,
    sync::{Arc, Mutex, MutexGuard, PoisonError},
};

use tandem_core::{Identity, PeerSignal, RoomRegistry, SessionInput};
use tokio::sync::mpsc::WeakUnboundedSender;

use crate::engine::Command;

type Directory = HashMap<Identity, WeakUnboundedSender<Command>>;

/// Shared registry plus peer mailbox directory.
///
/// Cloning yields another handle to the same relay. Hand one clone to every
/// engine that should be able to meet the others in private rooms.
#[derive(Clone, Default)]
pub struct Relay {
    registry: RoomRegistry,
    directory: Arc<Mutex<Directory>>,
}

impl Relay {
    /// Create a relay with an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a relay over an existing registry.
    pub fn with_registry(registry: RoomRegistry) -> Self {
        Self { registry, directory: Arc::default() }
    }

    /// The shared room registry.
    pub fn registry(&self) -> &RoomRegistry {
        &self.registry
    }

    fn lock(&self) -> MutexGuard<'_, Directory> {
        self.directory.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn register(&self, identity: Identity, inbox: WeakUnboundedSender<Command>) {
        self.lock().insert(identity, inbox);
    }

    pub(crate) fn unregister(&self, identity: Identity) {
        self.lock().remove(&identity);
    }

    /// Number of engines currently reachable.
    pub fn peer_count(&self) -> usize {
        self.lock().values().filter(|inbox| inbox.strong_count() > 0).count()
    }

    /// Deliver `signal` from `from` to the engine registered as `to`.
    ///
    /// Returns `false` if `to` is unknown or its engine has stopped.
    pub fn deliver(&self, from: Identity, to: Identity, signal: PeerSignal) -> bool {
        let inbox = self.lock().get(&to).and_then(WeakUnboundedSender::upgrade);
        let Some(inbox) = inbox else {
            tracing::debug!(%from, %to, "peer unreachable, signal dropped");
            return false;
        };

        inbox.send(Command::Input(SessionInput::Peer { from, signal })).is_ok()
    }
}

impl fmt::Debug for Relay {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Relay")
            .field("registry", &self.registry)
            .field("peers", &self.lock().len())
            .finish()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use tokio::sync::mpsc;

    use super::*;

    #[test]
    fn deliver_to_unknown_peer_fails() {
        let relay = Relay::new();
        assert!(!relay.deliver(Identity::new(1), Identity::new(2), PeerSignal::Left));
    }

    #[test]
    fn deliver_reaches_registered_inbox() {
        let relay = Relay::new();
        let (tx, mut rx) = mpsc::unbounded_channel();
        relay.register(Identity::new(2), tx.downgrade());

        assert!(relay.deliver(Identity::new(1), Identity::new(2), PeerSignal::Typing(true)));
        match rx.try_recv().unwrap() {
            Command::Input(SessionInput::Peer { from, signal }) => {
                assert_eq!(from, Identity::new(1));
                assert_eq!(signal, PeerSignal::Typing(true));
            },
            _ => panic!("expected a peer input"),
        }
    }

    #[test]
    fn dropped_engine_is_unreachable() {
        let relay = Relay::new();
        let (tx, _rx) = mpsc::unbounded_channel();
        relay.register(Identity::new(2), tx.downgrade());
        assert_eq!(relay.peer_count(), 1);

        drop(tx);
        assert_eq!(relay.peer_count(), 0);
        assert!(!relay.deliver(Identity::new(1), Identity::new(2), PeerSignal::Left));
    }

    #[test]
    fn clones_share_registry() {
        let relay = Relay::new();
        let other = relay.clone();
        let code = tandem_core::RoomCode::parse("SHARED").unwrap();

        relay.registry().create(&code, Identity::new(1));
        assert!(other.registry().has_room(&code));
    }
}
