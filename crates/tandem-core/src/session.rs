//! Session state machine.
//!
//! A `Session` models one participant's view: connection bootstrap, partner
//! discovery with bounded retries, private-room rendezvous, and relay of
//! messages and typing signals to exactly one partner.
//!
//! # Invariants
//!
//! - A bound partner implies `connected`
//! - At most one discovery in flight (`connecting` guards re-entry)
//! - `retry_count` only grows across automatic retries; it resets on manual
//!   retry, on a successful match, and on disconnect
//! - Timers carry no closures: the payload stays in the session and the state
//!   is re-read when the timer fires
//! - Timers scheduled before a disconnect are forgotten and ignored on fire

use std::{collections::HashMap, sync::Arc};

use crate::{
    action::{PeerSignal, SessionAction, SessionInput, TimerId},
    config::{ConfigError, SessionConfig},
    env::Environment,
    event::SessionEvent,
    identity::Identity,
    message::Message,
    room::{JoinOutcome, RoomCode, RoomRegistry},
    transform::PayloadTransform,
};

const STATUS_SECURE_CHANNEL: &str = "Secure channel established.";
const STATUS_SEARCH_STAGE: &str = "Connected securely. Finding a chat partner...";
const STATUS_SEARCHING: &str = "Searching for available chat partners...";
const STATUS_EXHAUSTED: &str = "Could not find any available chat partners. Please try again \
                                later or create a private room.";
const STATUS_PARTNER_LEFT: &str = "Your chat partner has left the chat.";
const STATUS_UNDECODABLE: &str = "Received a message that could not be decoded.";
const ERROR_ROOM_FULL: &str = "room is full";

/// Observable connection state of one session.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConnectionState {
    /// Channel established.
    pub connected: bool,
    /// A discovery attempt is in flight.
    pub connecting: bool,
    /// Failed automatic discovery attempts since the last reset.
    pub retry_count: u32,
    /// Bound partner.
    pub partner: Option<Identity>,
    /// Private room this session belongs to.
    pub current_room: Option<RoomCode>,
}

/// How the current partner was bound.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PartnerOrigin {
    /// Random discovery. No session stands behind the partner; it echoes.
    Discovery,
    /// Private room rendezvous with another session.
    Rendezvous,
}

/// Work to resume when a timer fires.
#[derive(Debug, Clone)]
enum Timer {
    SecureChannel,
    SearchStage,
    DiscoveryAttempt,
    DiscoveryBackoff,
    RoomJoin { code: RoomCode },
    RendezvousAnnounce { partner: Identity, code: RoomCode },
    Delivery { to: Identity, message: Message },
    TypingClear,
}

/// Session state machine.
///
/// Pure state machine - returns actions, caller handles timers, dispatch and
/// peer delivery.
///
/// # Type Parameters
///
/// - `E`: Environment implementation for time/randomness
pub struct Session<E: Environment> {
    env: E,
    identity: Identity,
    config: SessionConfig,
    registry: RoomRegistry,
    transform: Arc<dyn PayloadTransform>,
    state: ConnectionState,
    partner_origin: Option<PartnerOrigin>,
    bootstrapped: bool,
    next_timer: u64,
    timers: HashMap<TimerId, Timer>,
    typing_timer: Option<TimerId>,
}

impl<E: Environment> Session<E> {
    /// Create a session with a freshly drawn identity.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if `config` fails validation.
    pub fn new(
        env: E,
        config: SessionConfig,
        registry: RoomRegistry,
        transform: Arc<dyn PayloadTransform>,
    ) -> Result<Self, ConfigError> {
        config.validate()?;
        let identity = Identity::generate(&env);

        Ok(Self {
            env,
            identity,
            config,
            registry,
            transform,
            state: ConnectionState::default(),
            partner_origin: None,
            bootstrapped: false,
            next_timer: 0,
            timers: HashMap::new(),
            typing_timer: None,
        })
    }

    /// This participant's identity.
    pub fn identity(&self) -> Identity {
        self.identity
    }

    /// This participant's temporary display name.
    pub fn label(&self) -> String {
        self.identity.label()
    }

    /// Current connection state.
    pub fn state(&self) -> &ConnectionState {
        &self.state
    }

    /// Active configuration.
    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// Whether `bootstrap` has run since creation or the last disconnect.
    pub fn is_bootstrapped(&self) -> bool {
        self.bootstrapped
    }

    /// Number of timers the session is waiting on.
    pub fn pending_timers(&self) -> usize {
        self.timers.len()
    }

    /// Process an input and return resulting actions.
    pub fn handle(&mut self, input: SessionInput) -> Vec<SessionAction> {
        let mut out = Vec::new();

        match input {
            SessionInput::Bootstrap => self.handle_bootstrap(&mut out),
            SessionInput::FindPartner => self.find_partner(&mut out),
            SessionInput::RetryConnection => self.handle_retry(&mut out),
            SessionInput::CreateRoom { code } => self.handle_create_room(code, &mut out),
            SessionInput::JoinRoom { code } => self.handle_join_room(&code, &mut out),
            SessionInput::SendMessage { content } => self.handle_send_message(&content, &mut out),
            SessionInput::SendTyping(is_typing) => self.handle_send_typing(is_typing, &mut out),
            SessionInput::Disconnect => self.handle_disconnect(&mut out),
            SessionInput::TimerFired(id) => self.handle_timer(id, &mut out),
            SessionInput::Peer { from, signal } => self.handle_peer(from, signal, &mut out),
        }

        out
    }

    fn handle_bootstrap(&mut self, out: &mut Vec<SessionAction>) {
        if self.bootstrapped {
            tracing::debug!(identity = %self.identity, "already bootstrapped");
            return;
        }

        self.bootstrapped = true;
        self.connect(out);
        self.schedule(Timer::SecureChannel, self.config.secure_channel_delay, out);
    }

    fn find_partner(&mut self, out: &mut Vec<SessionAction>) {
        if self.state.connecting {
            tracing::debug!(identity = %self.identity, "discovery already in flight");
            return;
        }

        self.connect(out);
        self.state.connecting = true;

        let Some(code) = self.state.current_room.clone() else {
            emit(out, SessionEvent::info(STATUS_SEARCHING));
            self.schedule(Timer::DiscoveryAttempt, self.config.discovery_delay, out);
            return;
        };

        // Room discovery is level-triggered by future joins, never polled
        match self.registry.partner_of(&code, self.identity) {
            Some(partner) if self.state.partner == Some(partner) => {
                tracing::debug!(identity = %self.identity, %partner, "already paired in room");
            },
            Some(partner) => {
                self.bind_partner(partner, PartnerOrigin::Rendezvous);
                emit(out, SessionEvent::partner_found(partner));
                out.push(SessionAction::Notify {
                    to: partner,
                    signal: PeerSignal::Paired { room: code },
                });
            },
            None => emit(out, SessionEvent::info(waiting_status(&code))),
        }

        self.state.connecting = false;
    }

    fn handle_retry(&mut self, out: &mut Vec<SessionAction>) {
        if self.state.connecting {
            tracing::debug!(identity = %self.identity, "retry ignored, discovery in flight");
            return;
        }

        self.state.retry_count = 0;
        self.find_partner(out);
    }

    fn handle_create_room(&mut self, raw: Option<String>, out: &mut Vec<SessionAction>) {
        let code = match raw {
            None => RoomCode::generate(&self.env),
            Some(raw) => match RoomCode::parse(&raw) {
                Ok(code) => code,
                Err(e) => {
                    emit(out, SessionEvent::RoomCreated { code: raw, success: false });
                    emit(out, SessionEvent::error(format!("Could not create room: {e}")));
                    return;
                },
            },
        };

        self.connect(out);
        self.switch_room(&code, out);
        self.drop_discovered_partner();

        self.registry.create(&code, self.identity);
        tracing::info!(identity = %self.identity, room = %code, "room created");
        self.state.current_room = Some(code.clone());

        emit(out, SessionEvent::room_created(&code));
        emit(out, SessionEvent::info(waiting_status(&code)));
    }

    fn handle_join_room(&mut self, raw: &str, out: &mut Vec<SessionAction>) {
        let code = match RoomCode::parse(raw) {
            Ok(code) => code,
            Err(e) => {
                emit(out, SessionEvent::RoomJoined {
                    code: raw.to_owned(),
                    success: false,
                    error: Some(e.to_string()),
                });
                return;
            },
        };

        self.connect(out);
        self.switch_room(&code, out);
        self.drop_discovered_partner();
        self.state.current_room = Some(code.clone());
        self.schedule(Timer::RoomJoin { code }, self.config.join_delay, out);
    }

    fn handle_send_message(&mut self, content: &str, out: &mut Vec<SessionAction>) {
        let Some(partner) = self.state.partner else {
            tracing::debug!(identity = %self.identity, "no partner bound, message dropped");
            return;
        };

        let message = Message::outbound(&self.env, self.identity, content, &*self.transform);
        let delay =
            self.env.random_duration(self.config.message_delay_min, self.config.message_delay_max);
        self.schedule(Timer::Delivery { to: partner, message }, delay, out);
    }

    fn handle_send_typing(&mut self, is_typing: bool, out: &mut Vec<SessionAction>) {
        if is_typing {
            if let Some(partner) = self.state.partner {
                self.relay_typing(partner, true, out);
            }
        }

        if let Some(id) = self.typing_timer.take() {
            self.timers.remove(&id);
            out.push(SessionAction::Cancel { id });
        }

        let id = self.schedule(Timer::TypingClear, self.config.typing_timeout, out);
        self.typing_timer = Some(id);
    }

    fn handle_disconnect(&mut self, out: &mut Vec<SessionAction>) {
        self.state.connecting = false;
        self.state.retry_count = 0;
        self.leave_room(out);
        self.release_partner(out);

        self.state.connected = false;
        self.bootstrapped = false;

        // Forgotten timers are ignored when they fire
        self.timers.clear();
        self.typing_timer = None;

        tracing::info!(identity = %self.identity, "disconnected");
        emit(out, SessionEvent::Disconnect);
    }

    fn handle_timer(&mut self, id: TimerId, out: &mut Vec<SessionAction>) {
        let Some(timer) = self.timers.remove(&id) else {
            tracing::debug!(identity = %self.identity, %id, "stale timer ignored");
            return;
        };

        match timer {
            Timer::SecureChannel => {
                emit(out, SessionEvent::info(STATUS_SECURE_CHANNEL));
                self.schedule(Timer::SearchStage, self.config.search_delay, out);
            },
            Timer::SearchStage => self.on_search_stage(out),
            Timer::DiscoveryAttempt => self.on_discovery_attempt(out),
            Timer::DiscoveryBackoff => {
                self.state.connecting = false;
                self.find_partner(out);
            },
            Timer::RoomJoin { code } => self.on_room_join(code, out),
            Timer::RendezvousAnnounce { partner, code } => {
                self.on_rendezvous_announce(partner, code, out);
            },
            Timer::Delivery { to, message } => self.on_delivery(to, message, out),
            Timer::TypingClear => {
                self.typing_timer = None;
                if let Some(partner) = self.state.partner {
                    self.relay_typing(partner, false, out);
                }
            },
        }
    }

    fn on_search_stage(&mut self, out: &mut Vec<SessionAction>) {
        // Room rendezvous takes precedence over random discovery
        if self.state.current_room.is_some() || self.state.partner.is_some() {
            tracing::debug!(identity = %self.identity, "skipping random discovery");
            return;
        }

        emit(out, SessionEvent::info(STATUS_SEARCH_STAGE));
        self.find_partner(out);
    }

    fn on_discovery_attempt(&mut self, out: &mut Vec<SessionAction>) {
        if self.state.current_room.is_some() {
            tracing::debug!(identity = %self.identity, "joined a room, abandoning discovery");
            self.state.connecting = false;
            return;
        }

        if self.env.chance(self.config.discovery_success_probability) {
            let partner = Identity::generate(&self.env);
            self.bind_partner(partner, PartnerOrigin::Discovery);
            self.state.retry_count = 0;
            self.state.connecting = false;

            tracing::info!(identity = %self.identity, %partner, "partner found");
            emit(out, SessionEvent::partner_found(partner));
            return;
        }

        self.state.retry_count += 1;
        let attempt = self.state.retry_count;

        if attempt < self.config.max_retries {
            tracing::debug!(identity = %self.identity, attempt, "discovery attempt failed");
            emit(out, SessionEvent::info(format!("Connection attempt {attempt} failed. Retrying...")));
            // `connecting` stays set until the backoff elapses
            self.schedule(Timer::DiscoveryBackoff, self.config.retry_backoff, out);
        } else {
            tracing::info!(identity = %self.identity, attempt, "discovery retries exhausted");
            self.state.connecting = false;
            emit(out, SessionEvent::error(STATUS_EXHAUSTED));
        }
    }

    fn on_room_join(&mut self, code: RoomCode, out: &mut Vec<SessionAction>) {
        if self.state.current_room.as_ref() != Some(&code) {
            tracing::debug!(identity = %self.identity, room = %code, "left room before join");
            return;
        }

        match self.registry.join(&code, self.identity) {
            JoinOutcome::Created | JoinOutcome::AlreadyPresent => {
                tracing::info!(identity = %self.identity, room = %code, "joined empty room");
                emit(out, SessionEvent::room_joined(&code));
                emit(out, SessionEvent::info(waiting_status(&code)));
            },
            JoinOutcome::Paired { partner } if self.state.partner == Some(partner) => {
                tracing::debug!(identity = %self.identity, room = %code, "rejoined own room");
                emit(out, SessionEvent::room_joined(&code));
            },
            JoinOutcome::Paired { partner } => {
                tracing::info!(identity = %self.identity, room = %code, %partner, "paired in room");
                self.bind_partner(partner, PartnerOrigin::Rendezvous);
                emit(out, SessionEvent::room_joined(&code));
                self.schedule(
                    Timer::RendezvousAnnounce { partner, code },
                    self.config.rendezvous_delay,
                    out,
                );
            },
            JoinOutcome::Full => {
                tracing::info!(identity = %self.identity, room = %code, "room full, join refused");
                self.state.current_room = None;
                emit(out, SessionEvent::RoomJoined {
                    code: code.to_string(),
                    success: false,
                    error: Some(ERROR_ROOM_FULL.to_owned()),
                });
            },
        }
    }

    fn on_rendezvous_announce(
        &mut self,
        partner: Identity,
        code: RoomCode,
        out: &mut Vec<SessionAction>,
    ) {
        if self.state.partner != Some(partner) || self.state.current_room.as_ref() != Some(&code) {
            tracing::debug!(identity = %self.identity, %partner, "pairing superseded");
            return;
        }

        emit(out, SessionEvent::partner_found(partner));
        out.push(SessionAction::Notify { to: partner, signal: PeerSignal::Paired { room: code } });
    }

    fn on_delivery(&mut self, to: Identity, message: Message, out: &mut Vec<SessionAction>) {
        if self.state.partner != Some(to) {
            tracing::debug!(identity = %self.identity, %to, "partner changed, message dropped");
            return;
        }

        match self.partner_origin {
            Some(PartnerOrigin::Rendezvous) => {
                out.push(SessionAction::Notify { to, signal: PeerSignal::Message(message) });
            },
            // Discovered partners echo what they receive
            Some(PartnerOrigin::Discovery) | None => {
                self.present_message(&message.with_sender(to), out);
            },
        }
    }

    fn handle_peer(&mut self, from: Identity, signal: PeerSignal, out: &mut Vec<SessionAction>) {
        match signal {
            PeerSignal::Paired { room } => {
                if self.state.current_room.as_ref() != Some(&room) || self.state.partner.is_some() {
                    tracing::debug!(identity = %self.identity, %from, "pairing signal ignored");
                    return;
                }

                tracing::info!(identity = %self.identity, room = %room, partner = %from, "paired by peer");
                self.bind_partner(from, PartnerOrigin::Rendezvous);
                emit(out, SessionEvent::partner_found(from));
            },
            PeerSignal::Message(message) => {
                if self.state.partner != Some(from) || message.sender != from {
                    tracing::debug!(identity = %self.identity, %from, "message from non-partner dropped");
                    return;
                }

                self.present_message(&message, out);
            },
            PeerSignal::Typing(is_typing) => {
                if self.state.partner == Some(from) {
                    emit(out, SessionEvent::PartnerTyping(is_typing));
                }
            },
            PeerSignal::Left => {
                if self.state.partner != Some(from) {
                    return;
                }

                self.state.partner = None;
                self.partner_origin = None;
                emit(out, SessionEvent::info(STATUS_PARTNER_LEFT));
            },
        }
    }

    fn present_message(&self, message: &Message, out: &mut Vec<SessionAction>) {
        match message.decoded(&*self.transform) {
            Ok(plain) => emit(out, SessionEvent::MessageReceived(plain)),
            Err(e) => {
                tracing::warn!(identity = %self.identity, id = %message.id, "undecodable message: {e}");
                emit(out, SessionEvent::error(STATUS_UNDECODABLE));
            },
        }
    }

    fn relay_typing(&self, partner: Identity, is_typing: bool, out: &mut Vec<SessionAction>) {
        match self.partner_origin {
            Some(PartnerOrigin::Rendezvous) => {
                out.push(SessionAction::Notify { to: partner, signal: PeerSignal::Typing(is_typing) });
            },
            // Discovered partners mirror the indicator back
            Some(PartnerOrigin::Discovery) | None => {
                emit(out, SessionEvent::PartnerTyping(is_typing));
            },
        }
    }

    fn connect(&mut self, out: &mut Vec<SessionAction>) {
        if self.state.connected {
            return;
        }

        self.state.connected = true;
        emit(out, SessionEvent::Connect);
    }

    fn bind_partner(&mut self, partner: Identity, origin: PartnerOrigin) {
        debug_assert!(self.state.connected, "partner bound on a disconnected session");
        self.state.partner = Some(partner);
        self.partner_origin = Some(origin);
    }

    fn release_partner(&mut self, out: &mut Vec<SessionAction>) {
        let origin = self.partner_origin.take();
        if let Some(partner) = self.state.partner.take() {
            if origin == Some(PartnerOrigin::Rendezvous) {
                out.push(SessionAction::Notify { to: partner, signal: PeerSignal::Left });
            }
        }
    }

    /// A simulated partner has no seat in a room; entering one ends that chat.
    fn drop_discovered_partner(&mut self) {
        if self.partner_origin != Some(PartnerOrigin::Discovery) {
            return;
        }

        if let Some(partner) = self.state.partner.take() {
            tracing::debug!(identity = %self.identity, %partner, "discovered partner dropped for room");
        }
        self.partner_origin = None;
    }

    fn leave_room(&mut self, out: &mut Vec<SessionAction>) {
        let Some(code) = self.state.current_room.take() else {
            return;
        };

        if self.partner_origin == Some(PartnerOrigin::Rendezvous) {
            self.release_partner(out);
        }

        if self.registry.leave(&code, self.identity) {
            tracing::info!(identity = %self.identity, room = %code, "room closed");
        }
    }

    /// Leave the current room if it is not `code`.
    fn switch_room(&mut self, code: &RoomCode, out: &mut Vec<SessionAction>) {
        if self.state.current_room.as_ref().is_some_and(|current| current != code) {
            self.leave_room(out);
        }
    }

    fn schedule(
        &mut self,
        timer: Timer,
        delay: std::time::Duration,
        out: &mut Vec<SessionAction>,
    ) -> TimerId {
        let id = TimerId(self.next_timer);
        self.next_timer += 1;
        self.timers.insert(id, timer);
        out.push(SessionAction::Schedule { id, delay });
        id
    }
}

impl<E: Environment> std::fmt::Debug for Session<E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("identity", &self.identity)
            .field("state", &self.state)
            .field("bootstrapped", &self.bootstrapped)
            .field("pending_timers", &self.timers.len())
            .finish()
    }
}

fn emit(out: &mut Vec<SessionAction>, event: SessionEvent) {
    out.push(SessionAction::Emit(event));
}

fn waiting_status(code: &RoomCode) -> String {
    format!("Waiting for someone to join room {code}...")
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::{
        env::testing::TestEnv,
        event::{StatusEvent, StatusKind},
        transform::HexTransform,
    };

    fn session_with(config: SessionConfig, registry: &RoomRegistry) -> Session<TestEnv> {
        Session::new(TestEnv::default(), config, registry.clone(), Arc::new(HexTransform)).unwrap()
    }

    /// Sessions drawing from one environment, so their identities differ.
    fn group(registry: &RoomRegistry, count: usize) -> Vec<Session<TestEnv>> {
        let env = TestEnv::default();
        (0..count)
            .map(|_| {
                Session::new(env.clone(), always(), registry.clone(), Arc::new(HexTransform))
                    .unwrap()
            })
            .collect()
    }

    fn pair(registry: &RoomRegistry) -> (Session<TestEnv>, Session<TestEnv>) {
        let mut sessions = group(registry, 2);
        let guest = sessions.pop().unwrap();
        (sessions.pop().unwrap(), guest)
    }

    /// Host creates `code`, guest joins, both sides exchange the pairing.
    fn rendezvous(host: &mut Session<TestEnv>, guest: &mut Session<TestEnv>, code: &str) {
        host.handle(SessionInput::CreateRoom { code: Some(code.into()) });
        let join = only_timer(&guest.handle(SessionInput::JoinRoom { code: code.into() }));
        let announce = only_timer(&fire(guest, join));
        fire(guest, announce);
        host.handle(SessionInput::Peer {
            from: guest.identity(),
            signal: PeerSignal::Paired { room: RoomCode::parse(code).unwrap() },
        });
    }

    fn always() -> SessionConfig {
        SessionConfig { discovery_success_probability: 1.0, ..Default::default() }
    }

    fn never() -> SessionConfig {
        SessionConfig { discovery_success_probability: 0.0, ..Default::default() }
    }

    fn events(actions: &[SessionAction]) -> Vec<SessionEvent> {
        actions
            .iter()
            .filter_map(|a| match a {
                SessionAction::Emit(e) => Some(e.clone()),
                _ => None,
            })
            .collect()
    }

    fn scheduled(actions: &[SessionAction]) -> Vec<(TimerId, Duration)> {
        actions
            .iter()
            .filter_map(|a| match a {
                SessionAction::Schedule { id, delay } => Some((*id, *delay)),
                _ => None,
            })
            .collect()
    }

    fn only_timer(actions: &[SessionAction]) -> TimerId {
        let timers = scheduled(actions);
        assert_eq!(timers.len(), 1, "expected one timer in {actions:?}");
        timers[0].0
    }

    fn fire(session: &mut Session<TestEnv>, id: TimerId) -> Vec<SessionAction> {
        session.handle(SessionInput::TimerFired(id))
    }

    #[test]
    fn new_rejects_invalid_config() {
        let config = SessionConfig { max_retries: 0, ..Default::default() };
        let result =
            Session::new(TestEnv::default(), config, RoomRegistry::new(), Arc::new(HexTransform));
        assert!(matches!(result, Err(ConfigError::ZeroRetries)));
    }

    #[test]
    fn bootstrap_connects_and_stages_discovery() {
        let mut session = session_with(always(), &RoomRegistry::new());

        let actions = session.handle(SessionInput::Bootstrap);
        assert_eq!(events(&actions), vec![SessionEvent::Connect]);
        assert!(session.state().connected);
        assert!(session.is_bootstrapped());
        let (stage1, delay) = scheduled(&actions)[0];
        assert_eq!(delay, Duration::from_millis(1500));

        let actions = fire(&mut session, stage1);
        assert_eq!(events(&actions), vec![SessionEvent::info(STATUS_SECURE_CHANNEL)]);
        let (stage2, delay) = scheduled(&actions)[0];
        assert_eq!(delay, Duration::from_millis(2000));

        let actions = fire(&mut session, stage2);
        assert_eq!(events(&actions), vec![
            SessionEvent::info(STATUS_SEARCH_STAGE),
            SessionEvent::info(STATUS_SEARCHING),
        ]);
        assert!(session.state().connecting);
    }

    #[test]
    fn bootstrap_twice_is_noop() {
        let mut session = session_with(always(), &RoomRegistry::new());
        session.handle(SessionInput::Bootstrap);

        let actions = session.handle(SessionInput::Bootstrap);
        assert!(actions.is_empty());
        assert_eq!(session.pending_timers(), 1);
    }

    #[test]
    fn bootstrap_in_room_skips_discovery() {
        let registry = RoomRegistry::new();
        let mut session = session_with(always(), &registry);
        session.handle(SessionInput::CreateRoom { code: Some("abc".into()) });

        let stage1 = only_timer(&session.handle(SessionInput::Bootstrap));
        let stage2 = only_timer(&fire(&mut session, stage1));
        let actions = fire(&mut session, stage2);

        assert!(actions.is_empty());
        assert!(!session.state().connecting);
    }

    #[test]
    fn discovery_success_binds_partner() {
        let mut session = session_with(always(), &RoomRegistry::new());

        let attempt = only_timer(&session.handle(SessionInput::FindPartner));
        let actions = fire(&mut session, attempt);

        let partner = session.state().partner.unwrap();
        assert_eq!(events(&actions), vec![SessionEvent::partner_found(partner)]);
        assert!(!session.state().connecting);
        assert!(session.state().connected);
        assert_ne!(partner, session.identity());
    }

    #[test]
    fn find_partner_while_connecting_is_noop() {
        let mut session = session_with(always(), &RoomRegistry::new());
        session.handle(SessionInput::FindPartner);

        assert!(session.handle(SessionInput::FindPartner).is_empty());
        assert!(session.handle(SessionInput::RetryConnection).is_empty());
        assert_eq!(session.pending_timers(), 1);
    }

    #[test]
    fn discovery_exhausts_after_max_retries() {
        let mut session = session_with(never(), &RoomRegistry::new());
        let mut statuses = Vec::new();
        let mut actions = session.handle(SessionInput::FindPartner);

        // attempt -> backoff -> attempt ... until nothing is scheduled
        while let Some((id, _)) = scheduled(&actions).first().copied() {
            statuses.extend(events(&actions));
            actions = fire(&mut session, id);
        }
        statuses.extend(events(&actions));

        let retries: Vec<_> = statuses
            .iter()
            .filter(|e| matches!(e, SessionEvent::ConnectionStatus(s) if s.message.contains("Retrying")))
            .collect();
        assert_eq!(retries.len(), 2);
        assert_eq!(statuses.last(), Some(&SessionEvent::error(STATUS_EXHAUSTED)));
        assert_eq!(session.state().retry_count, 3);
        assert!(!session.state().connecting);
        assert_eq!(session.pending_timers(), 0);
    }

    #[test]
    fn retry_count_grows_then_resets_on_manual_retry() {
        let mut session = session_with(never(), &RoomRegistry::new());
        let attempt = only_timer(&session.handle(SessionInput::FindPartner));

        let backoff = only_timer(&fire(&mut session, attempt));
        assert_eq!(session.state().retry_count, 1);
        assert!(session.state().connecting, "connecting held through backoff");

        let attempt = only_timer(&fire(&mut session, backoff));
        fire(&mut session, attempt);
        assert_eq!(session.state().retry_count, 2);

        // Still inside a backoff: manual retry is blocked
        assert!(session.handle(SessionInput::RetryConnection).is_empty());
    }

    #[test]
    fn manual_retry_after_exhaustion_restarts() {
        let config = SessionConfig { max_retries: 1, ..never() };
        let mut session = session_with(config, &RoomRegistry::new());
        let attempt = only_timer(&session.handle(SessionInput::FindPartner));
        fire(&mut session, attempt);
        assert_eq!(session.state().retry_count, 1);

        let actions = session.handle(SessionInput::RetryConnection);
        assert_eq!(session.state().retry_count, 0);
        assert!(session.state().connecting);
        assert_eq!(events(&actions), vec![SessionEvent::info(STATUS_SEARCHING)]);
    }

    #[test]
    fn create_room_registers_and_reports() {
        let registry = RoomRegistry::new();
        let mut session = session_with(always(), &registry);

        let actions = session.handle(SessionInput::CreateRoom { code: Some("ab12cd".into()) });
        let code = RoomCode::parse("AB12CD").unwrap();

        assert_eq!(events(&actions), vec![
            SessionEvent::Connect,
            SessionEvent::RoomCreated { code: "AB12CD".into(), success: true },
            SessionEvent::info(waiting_status(&code)),
        ]);
        assert_eq!(registry.occupants(&code), vec![session.identity()]);
        assert_eq!(session.state().current_room, Some(code));
    }

    #[test]
    fn create_room_generates_code() {
        let registry = RoomRegistry::new();
        let mut session = session_with(always(), &registry);

        session.handle(SessionInput::CreateRoom { code: None });
        let code = session.state().current_room.clone().unwrap();
        assert_eq!(code.as_str().len(), crate::room::GENERATED_CODE_LEN);
        assert!(registry.has_room(&code));
    }

    #[test]
    fn blank_codes_are_rejected() {
        let registry = RoomRegistry::new();
        let mut session = session_with(always(), &registry);

        let actions = session.handle(SessionInput::CreateRoom { code: Some("  ".into()) });
        assert_eq!(events(&actions)[0], SessionEvent::RoomCreated {
            code: "  ".into(),
            success: false
        });

        let actions = session.handle(SessionInput::JoinRoom { code: String::new() });
        assert!(matches!(
            &events(&actions)[0],
            SessionEvent::RoomJoined { success: false, error: Some(_), .. }
        ));
        assert_eq!(registry.room_count(), 0);
        assert_eq!(session.state().current_room, None);
    }

    #[test]
    fn join_unseen_code_creates_room() {
        let registry = RoomRegistry::new();
        let mut session = session_with(always(), &registry);

        let join = only_timer(&session.handle(SessionInput::JoinRoom { code: "new1".into() }));
        let actions = fire(&mut session, join);
        let code = RoomCode::parse("NEW1").unwrap();

        assert_eq!(events(&actions), vec![
            SessionEvent::room_joined(&code),
            SessionEvent::info(waiting_status(&code)),
        ]);
        assert_eq!(registry.occupants(&code), vec![session.identity()]);
    }

    #[test]
    fn join_existing_room_pairs_and_announces() {
        let registry = RoomRegistry::new();
        let (mut host, mut guest) = pair(&registry);
        host.handle(SessionInput::CreateRoom { code: Some("AB12CD".into()) });

        let join = only_timer(&guest.handle(SessionInput::JoinRoom { code: "ab12cd".into() }));
        let actions = fire(&mut guest, join);
        assert_eq!(guest.state().partner, Some(host.identity()));
        let (announce, delay) = scheduled(&actions)[0];
        assert_eq!(delay, Duration::from_millis(1500));

        let actions = fire(&mut guest, announce);
        assert_eq!(events(&actions), vec![SessionEvent::partner_found(host.identity())]);
        let code = RoomCode::parse("AB12CD").unwrap();
        assert!(actions.contains(&SessionAction::Notify {
            to: host.identity(),
            signal: PeerSignal::Paired { room: code.clone() },
        }));

        let actions = host.handle(SessionInput::Peer {
            from: guest.identity(),
            signal: PeerSignal::Paired { room: code },
        });
        assert_eq!(events(&actions), vec![SessionEvent::partner_found(guest.identity())]);
        assert_eq!(host.state().partner, Some(guest.identity()));
    }

    #[test]
    fn find_partner_in_empty_room_does_not_poll() {
        let registry = RoomRegistry::new();
        let mut session = session_with(always(), &registry);
        session.handle(SessionInput::CreateRoom { code: Some("SOLO".into()) });

        let actions = session.handle(SessionInput::FindPartner);
        assert!(scheduled(&actions).is_empty());
        assert!(!session.state().connecting);
        assert!(matches!(
            &events(&actions)[..],
            [SessionEvent::ConnectionStatus(StatusEvent { kind: StatusKind::Info, .. })]
        ));
    }

    #[test]
    fn find_partner_in_occupied_room_binds_immediately() {
        let registry = RoomRegistry::new();
        let (mut host, mut guest) = pair(&registry);
        host.handle(SessionInput::CreateRoom { code: Some("DUO".into()) });
        let join = only_timer(&guest.handle(SessionInput::JoinRoom { code: "DUO".into() }));
        fire(&mut guest, join);

        let actions = host.handle(SessionInput::FindPartner);
        assert_eq!(events(&actions), vec![SessionEvent::partner_found(guest.identity())]);
        assert!(!host.state().connecting);

        // Asking again while paired is quiet
        assert!(host.handle(SessionInput::FindPartner).is_empty());
        assert_eq!(host.state().partner, Some(guest.identity()));
        assert!(!host.state().connecting);
    }

    #[test]
    fn rejoining_own_room_keeps_pairing_quiet() {
        let registry = RoomRegistry::new();
        let (mut host, mut guest) = pair(&registry);
        rendezvous(&mut host, &mut guest, "AGAIN");

        let join = only_timer(&guest.handle(SessionInput::JoinRoom { code: "again".into() }));
        let actions = fire(&mut guest, join);

        assert_eq!(events(&actions), vec![SessionEvent::room_joined(
            &RoomCode::parse("AGAIN").unwrap()
        )]);
        assert!(scheduled(&actions).is_empty());
        assert_eq!(guest.state().partner, Some(host.identity()));
    }

    #[test]
    fn full_room_turns_third_joiner_away() {
        let registry = RoomRegistry::new();
        let mut sessions = group(&registry, 3);
        let mut late = sessions.pop().unwrap();
        let mut guest = sessions.pop().unwrap();
        let mut host = sessions.pop().unwrap();
        rendezvous(&mut host, &mut guest, "TRIO");

        let join = only_timer(&late.handle(SessionInput::JoinRoom { code: "TRIO".into() }));
        let actions = fire(&mut late, join);

        assert_eq!(events(&actions), vec![SessionEvent::RoomJoined {
            code: "TRIO".into(),
            success: false,
            error: Some(ERROR_ROOM_FULL.into()),
        }]);
        assert!(scheduled(&actions).is_empty());
        assert_eq!(late.state().partner, None);
        assert_eq!(late.state().current_room, None);

        let code = RoomCode::parse("TRIO").unwrap();
        assert_eq!(registry.occupants(&code), vec![host.identity(), guest.identity()]);
        assert_eq!(host.state().partner, Some(guest.identity()));
    }

    #[test]
    fn creating_room_ends_discovered_chat() {
        let registry = RoomRegistry::new();
        let (mut host, mut guest) = pair(&registry);
        let attempt = only_timer(&host.handle(SessionInput::FindPartner));
        fire(&mut host, attempt);
        assert!(host.state().partner.is_some());

        host.handle(SessionInput::CreateRoom { code: Some("SWAP".into()) });
        assert_eq!(host.state().partner, None);

        rendezvous(&mut host, &mut guest, "SWAP");
        assert_eq!(host.state().partner, Some(guest.identity()));
        assert_eq!(guest.state().partner, Some(host.identity()));
    }

    #[test]
    fn joining_room_ends_discovered_chat() {
        let registry = RoomRegistry::new();
        let mut session = session_with(always(), &registry);
        let attempt = only_timer(&session.handle(SessionInput::FindPartner));
        fire(&mut session, attempt);
        let discovered = session.state().partner.unwrap();

        let actions = session.handle(SessionInput::JoinRoom { code: "ELSEWHERE".into() });
        assert_eq!(session.state().partner, None);
        let told_partner = actions
            .iter()
            .any(|a| matches!(a, SessionAction::Notify { to, .. } if *to == discovered));
        assert!(!told_partner);
    }

    #[test]
    fn message_without_partner_is_dropped() {
        let mut session = session_with(always(), &RoomRegistry::new());
        let actions = session.handle(SessionInput::SendMessage { content: "hi".into() });

        assert!(actions.is_empty());
        assert_eq!(session.pending_timers(), 0);
    }

    #[test]
    fn discovered_partner_echoes_messages() {
        let mut session = session_with(always(), &RoomRegistry::new());
        let attempt = only_timer(&session.handle(SessionInput::FindPartner));
        fire(&mut session, attempt);
        let partner = session.state().partner.unwrap();

        let actions = session.handle(SessionInput::SendMessage { content: "hi".into() });
        let (delivery, delay) = scheduled(&actions)[0];
        assert!(delay >= Duration::from_millis(500) && delay <= Duration::from_millis(1500));

        let actions = fire(&mut session, delivery);
        match &events(&actions)[..] {
            [SessionEvent::MessageReceived(m)] => {
                assert_eq!(m.content, "hi");
                assert_eq!(m.sender, partner);
                assert!(!m.encrypted);
            },
            other => panic!("expected one message, got {other:?}"),
        }
    }

    #[test]
    fn typing_timer_is_debounced() {
        let mut session = session_with(always(), &RoomRegistry::new());
        let attempt = only_timer(&session.handle(SessionInput::FindPartner));
        fire(&mut session, attempt);

        let first = session.handle(SessionInput::SendTyping(true));
        let first_timer = only_timer(&first);
        assert_eq!(events(&first), vec![SessionEvent::PartnerTyping(true)]);

        let second = session.handle(SessionInput::SendTyping(true));
        assert!(second.contains(&SessionAction::Cancel { id: first_timer }));
        let second_timer = only_timer(&second);

        assert!(fire(&mut session, first_timer).is_empty(), "cancelled timer must not fire");
        assert_eq!(events(&fire(&mut session, second_timer)), vec![SessionEvent::PartnerTyping(
            false
        )]);
    }

    #[test]
    fn disconnect_leaves_room_and_notifies_partner() {
        let registry = RoomRegistry::new();
        let (mut host, mut guest) = pair(&registry);
        host.handle(SessionInput::CreateRoom { code: Some("BYE".into()) });
        let join = only_timer(&guest.handle(SessionInput::JoinRoom { code: "BYE".into() }));
        fire(&mut guest, join);

        let actions = guest.handle(SessionInput::Disconnect);
        assert!(actions.contains(&SessionAction::Notify {
            to: host.identity(),
            signal: PeerSignal::Left,
        }));
        assert_eq!(events(&actions), vec![SessionEvent::Disconnect]);
        assert_eq!(guest.state(), &ConnectionState::default());

        let code = RoomCode::parse("BYE").unwrap();
        assert_eq!(registry.occupants(&code), vec![host.identity()]);

        host.handle(SessionInput::Disconnect);
        assert!(!registry.has_room(&code));
    }

    #[test]
    fn disconnect_suppresses_pending_discovery() {
        let mut session = session_with(always(), &RoomRegistry::new());
        let attempt = only_timer(&session.handle(SessionInput::FindPartner));

        session.handle(SessionInput::Disconnect);
        assert!(fire(&mut session, attempt).is_empty());
        assert_eq!(session.state().partner, None);
    }

    #[test]
    fn disconnect_is_idempotent() {
        let mut session = session_with(always(), &RoomRegistry::new());

        for _ in 0..2 {
            let actions = session.handle(SessionInput::Disconnect);
            assert_eq!(events(&actions), vec![SessionEvent::Disconnect]);
        }
    }

    #[test]
    fn partner_left_clears_partner() {
        let registry = RoomRegistry::new();
        let mut host = session_with(always(), &registry);
        host.handle(SessionInput::CreateRoom { code: Some("P".into()) });
        let guest = Identity::new(99);
        host.handle(SessionInput::Peer {
            from: guest,
            signal: PeerSignal::Paired { room: RoomCode::parse("P").unwrap() },
        });
        assert_eq!(host.state().partner, Some(guest));

        let actions = host.handle(SessionInput::Peer { from: guest, signal: PeerSignal::Left });
        assert_eq!(events(&actions), vec![SessionEvent::info(STATUS_PARTNER_LEFT)]);
        assert_eq!(host.state().partner, None);
        assert!(host.state().connected);
    }

    #[test]
    fn signals_from_strangers_are_ignored() {
        let registry = RoomRegistry::new();
        let mut host = session_with(always(), &registry);
        host.handle(SessionInput::CreateRoom { code: Some("P".into()) });

        let stranger = Identity::new(7);
        let typing =
            host.handle(SessionInput::Peer { from: stranger, signal: PeerSignal::Typing(true) });
        let paired_elsewhere = host.handle(SessionInput::Peer {
            from: stranger,
            signal: PeerSignal::Paired { room: RoomCode::parse("OTHER").unwrap() },
        });

        assert!(typing.is_empty());
        assert!(paired_elsewhere.is_empty());
        assert_eq!(host.state().partner, None);
    }

    #[test]
    fn switching_rooms_leaves_previous() {
        let registry = RoomRegistry::new();
        let mut session = session_with(always(), &registry);
        session.handle(SessionInput::CreateRoom { code: Some("ONE".into()) });
        session.handle(SessionInput::CreateRoom { code: Some("TWO".into()) });

        assert!(!registry.has_room(&RoomCode::parse("ONE").unwrap()));
        assert!(registry.has_room(&RoomCode::parse("TWO").unwrap()));
    }
}
