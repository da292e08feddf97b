//! Session engine: one tokio actor per participant.
//!
//! The actor owns a [`Session`] and is the only code that touches it, so all
//! mutations of one participant are serialized without locks. Callers hold a
//! cheap [`SessionEngine`] handle that forwards intents over an unbounded
//! channel and never blocks.
//!
//! ```text
//! SessionEngine ──Command──▶ actor ──handle()──▶ Session
//!                              │
//!            ┌─────────────────┼───────────────────┐
//!            ▼                 ▼                   ▼
//!       EventChannel     timer tasks          Relay::deliver
//!       (listeners)    (TimerFired back)     (partner's inbox)
//! ```
//!
//! The actor stops once every handle is dropped or `shutdown` is called. It
//! then disconnects the session, which releases any room and tells a room
//! partner, and leaves the relay.

use std::{collections::HashMap, sync::Arc, time::Duration};

use tandem_core::{
    ConnectionState, Environment, EventChannel, EventKind, Identity, PayloadTransform, Session,
    SessionAction, SessionConfig, SessionEvent, SessionInput, SubscriptionId, TimerId,
};
use tokio::{
    sync::{mpsc, oneshot},
    task::JoinHandle,
};

use crate::{error::EngineError, relay::Relay};

/// Messages accepted by the actor.
pub(crate) enum Command {
    Input(SessionInput),
    State(oneshot::Sender<ConnectionState>),
    Shutdown,
}

/// Handle to a running session actor.
///
/// Clones share the same actor. Intents are fire-and-forget; their outcomes
/// are observed through [`SessionEngine::events`].
#[derive(Clone)]
pub struct SessionEngine {
    commands: mpsc::UnboundedSender<Command>,
    identity: Identity,
    events: EventChannel,
}

impl SessionEngine {
    /// Start a session actor on the current tokio runtime.
    ///
    /// # Errors
    ///
    /// Returns `EngineError::Config` if `config` fails validation.
    pub fn spawn<E: Environment>(
        env: E,
        config: SessionConfig,
        relay: &Relay,
        transform: Arc<dyn PayloadTransform>,
    ) -> Result<Self, EngineError> {
        let session = Session::new(env.clone(), config, relay.registry().clone(), transform)?;
        let identity = session.identity();
        let events = EventChannel::new();

        let (commands, inbox) = mpsc::unbounded_channel();
        relay.register(identity, commands.downgrade());

        let actor = Actor {
            session,
            env,
            events: events.clone(),
            relay: relay.clone(),
            timers: HashMap::new(),
            inbox: commands.downgrade(),
        };
        tokio::spawn(actor.run(inbox));

        tracing::debug!(%identity, "engine started");
        Ok(Self { commands, identity, events })
    }

    /// This participant's identity.
    pub fn identity(&self) -> Identity {
        self.identity
    }

    /// This participant's temporary display name.
    pub fn label(&self) -> String {
        self.identity.label()
    }

    /// The engine's event channel.
    pub fn events(&self) -> &EventChannel {
        &self.events
    }

    /// Subscribe to one event kind.
    pub fn on<F>(&self, kind: EventKind, listener: F) -> SubscriptionId
    where
        F: Fn(&SessionEvent) + Send + Sync + 'static,
    {
        self.events.subscribe(kind, listener)
    }

    /// Remove a subscription.
    pub fn off(&self, id: SubscriptionId) -> bool {
        self.events.unsubscribe(id)
    }

    /// Start a random chat: connect, announce, then discover a partner.
    pub fn bootstrap(&self) {
        self.send(SessionInput::Bootstrap);
    }

    /// Run one partner discovery.
    pub fn find_partner(&self) {
        self.send(SessionInput::FindPartner);
    }

    /// Reset the retry counter and discover again.
    pub fn retry_connection(&self) {
        self.send(SessionInput::RetryConnection);
    }

    /// Create a private room. A code is generated when `code` is `None`.
    pub fn create_room(&self, code: Option<String>) {
        self.send(SessionInput::CreateRoom { code });
    }

    /// Join a private room.
    pub fn join_room(&self, code: impl Into<String>) {
        self.send(SessionInput::JoinRoom { code: code.into() });
    }

    /// Send a chat message to the partner. Dropped if none is bound.
    pub fn send_message(&self, content: impl Into<String>) {
        self.send(SessionInput::SendMessage { content: content.into() });
    }

    /// Send a typing indicator. Auto-clears after the typing timeout.
    pub fn send_typing(&self, is_typing: bool) {
        self.send(SessionInput::SendTyping(is_typing));
    }

    /// End the session and leave any room.
    pub fn disconnect(&self) {
        self.send(SessionInput::Disconnect);
    }

    /// Stop the actor after a final disconnect.
    pub fn shutdown(&self) {
        if self.commands.send(Command::Shutdown).is_err() {
            tracing::debug!(identity = %self.identity, "engine already stopped");
        }
    }

    /// Snapshot of the connection state, taken after every earlier intent on
    /// this handle has been processed.
    pub async fn state(&self) -> Result<ConnectionState, EngineError> {
        let (reply, rx) = oneshot::channel();
        self.commands.send(Command::State(reply)).map_err(|_| EngineError::Stopped)?;
        rx.await.map_err(|_| EngineError::Stopped)
    }

    fn send(&self, input: SessionInput) {
        if self.commands.send(Command::Input(input)).is_err() {
            tracing::warn!(identity = %self.identity, "engine stopped, intent dropped");
        }
    }
}

impl std::fmt::Debug for SessionEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionEngine")
            .field("identity", &self.identity)
            .field("events", &self.events)
            .finish()
    }
}

struct Actor<E: Environment> {
    session: Session<E>,
    env: E,
    events: EventChannel,
    relay: Relay,
    timers: HashMap<TimerId, JoinHandle<()>>,
    /// Weak so pending timers do not keep the actor alive.
    inbox: mpsc::WeakUnboundedSender<Command>,
}

impl<E: Environment> Actor<E> {
    async fn run(mut self, mut commands: mpsc::UnboundedReceiver<Command>) {
        while let Some(command) = commands.recv().await {
            match command {
                Command::Input(input) => self.apply(input),
                Command::State(reply) => {
                    // Caller may have stopped waiting
                    let _ = reply.send(self.session.state().clone());
                },
                Command::Shutdown => break,
            }
        }

        self.stop();
    }

    fn apply(&mut self, input: SessionInput) {
        if let SessionInput::TimerFired(id) = &input {
            self.timers.remove(id);
        }

        for action in self.session.handle(input) {
            self.execute(action);
        }
    }

    fn execute(&mut self, action: SessionAction) {
        match action {
            SessionAction::Emit(event) => {
                self.events.publish(&event);
            },
            SessionAction::Schedule { id, delay } => self.schedule(id, delay),
            SessionAction::Cancel { id } => {
                if let Some(handle) = self.timers.remove(&id) {
                    handle.abort();
                }
            },
            SessionAction::Notify { to, signal } => {
                self.relay.deliver(self.session.identity(), to, signal);
            },
        }
    }

    fn schedule(&mut self, id: TimerId, delay: Duration) {
        let env = self.env.clone();
        let inbox = self.inbox.clone();

        let handle = tokio::spawn(async move {
            env.sleep(delay).await;
            if let Some(inbox) = inbox.upgrade() {
                // Actor gone means nobody cares about this timer
                let _ = inbox.send(Command::Input(SessionInput::TimerFired(id)));
            }
        });

        self.timers.insert(id, handle);
    }

    fn stop(mut self) {
        let identity = self.session.identity();
        self.apply(SessionInput::Disconnect);

        for (_, handle) in self.timers.drain() {
            handle.abort();
        }

        self.relay.unregister(identity);
        tracing::debug!(%identity, "engine stopped");
    }
}
