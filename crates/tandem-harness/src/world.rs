//! Simulated world: many sessions, one registry, one virtual clock.
//!
//! `SimWorld` is the deterministic counterpart of the tokio runtime. It
//! executes session actions itself:
//!
//! - `Emit` publishes on the session's `EventChannel`, where a recorder
//!   stamps each event with the virtual time it was published
//! - `Schedule`/`Cancel` maintain a timer queue ordered by deadline, then by
//!   scheduling order
//! - `Notify` queues a peer input for the target session; the queue is drained
//!   before `apply` or `advance` returns
//!
//! Time only moves inside `advance`, so everything observed between calls is
//! a quiescent state.

use std::{
    collections::{BTreeMap, HashMap, VecDeque},
    sync::{Arc, Mutex, PoisonError},
    time::Duration,
};

use tandem_core::{
    ConfigError, ConnectionState, EventChannel, HexTransform, Identity, PayloadTransform,
    RoomRegistry, Session, SessionAction, SessionConfig, SessionEvent, SessionInput, TimerId,
};

use crate::sim_env::SimEnv;

/// Event stamped with the virtual time it was published.
pub type TimedEvent = (Duration, SessionEvent);

/// Index of a session within the world.
pub type SessionIdx = usize;

type TimerKey = (Duration, u64);

struct Node {
    session: Session<SimEnv>,
    events: EventChannel,
    log: Arc<Mutex<Vec<TimedEvent>>>,
    timers: HashMap<TimerId, TimerKey>,
}

/// Deterministic multi-session simulation.
pub struct SimWorld {
    env: SimEnv,
    registry: RoomRegistry,
    config: SessionConfig,
    transform: Arc<dyn PayloadTransform>,
    nodes: Vec<Node>,
    queue: BTreeMap<TimerKey, (SessionIdx, TimerId)>,
    next_seq: u64,
    mail: VecDeque<(SessionIdx, SessionInput)>,
}

impl SimWorld {
    /// Create an empty world.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if `config` fails validation.
    pub fn new(seed: u64, config: SessionConfig) -> Result<Self, ConfigError> {
        config.validate()?;

        Ok(Self {
            env: SimEnv::with_seed(seed),
            registry: RoomRegistry::new(),
            config,
            transform: Arc::new(HexTransform),
            nodes: Vec::new(),
            queue: BTreeMap::new(),
            next_seq: 0,
            mail: VecDeque::new(),
        })
    }

    /// Add a session sharing the world's registry, clock and RNG.
    pub fn add_session(&mut self) -> Result<SessionIdx, ConfigError> {
        let session = Session::new(
            self.env.clone(),
            self.config.clone(),
            self.registry.clone(),
            Arc::clone(&self.transform),
        )?;

        let events = EventChannel::new();
        let log: Arc<Mutex<Vec<TimedEvent>>> = Arc::default();
        let sink = Arc::clone(&log);
        let clock = self.env.clone();
        events.subscribe_all(move |event| {
            let mut log = sink.lock().unwrap_or_else(PoisonError::into_inner);
            log.push((clock.elapsed(), event.clone()));
        });

        self.nodes.push(Node { session, events, log, timers: HashMap::new() });
        Ok(self.nodes.len() - 1)
    }

    /// Number of sessions.
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// Whether the world has no sessions.
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Shared environment.
    pub fn env(&self) -> &SimEnv {
        &self.env
    }

    /// Shared room registry.
    pub fn registry(&self) -> &RoomRegistry {
        &self.registry
    }

    /// Virtual time since the world was created.
    pub fn now(&self) -> Duration {
        self.env.elapsed()
    }

    /// Session at `idx`.
    pub fn session(&self, idx: SessionIdx) -> &Session<SimEnv> {
        &self.nodes[idx].session
    }

    /// Connection state of session `idx`.
    pub fn state(&self, idx: SessionIdx) -> &ConnectionState {
        self.nodes[idx].session.state()
    }

    /// Identity of session `idx`.
    pub fn identity(&self, idx: SessionIdx) -> Identity {
        self.nodes[idx].session.identity()
    }

    /// Index of the session with `identity`.
    pub fn index_of(&self, identity: Identity) -> Option<SessionIdx> {
        self.nodes.iter().position(|n| n.session.identity() == identity)
    }

    /// Event channel of session `idx`, for extra subscriptions.
    pub fn channel(&self, idx: SessionIdx) -> &EventChannel {
        &self.nodes[idx].events
    }

    /// Events published by session `idx`, in order.
    pub fn events(&self, idx: SessionIdx) -> Vec<SessionEvent> {
        self.timed_events(idx).into_iter().map(|(_, e)| e).collect()
    }

    /// Events published by session `idx` with their publish times.
    pub fn timed_events(&self, idx: SessionIdx) -> Vec<TimedEvent> {
        self.nodes[idx].log.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    /// Forget the events recorded so far for session `idx`.
    pub fn clear_events(&self, idx: SessionIdx) {
        self.nodes[idx].log.lock().unwrap_or_else(PoisonError::into_inner).clear();
    }

    /// Timers waiting in the queue.
    pub fn pending_timers(&self) -> usize {
        self.queue.len()
    }

    /// Deadline of the earliest pending timer.
    pub fn next_deadline(&self) -> Option<Duration> {
        self.queue.keys().next().map(|(at, _)| *at)
    }

    /// Feed `input` to session `idx` and run every resulting peer delivery.
    pub fn apply(&mut self, idx: SessionIdx, input: SessionInput) {
        self.mail.push_back((idx, input));

        while let Some((idx, input)) = self.mail.pop_front() {
            let actions = self.nodes[idx].session.handle(input);
            for action in actions {
                self.execute(idx, action);
            }
        }
    }

    /// Advance virtual time by `duration`, firing due timers in order.
    pub fn advance(&mut self, duration: Duration) {
        let target = self.now() + duration;

        while let Some(entry) = self.queue.first_entry() {
            if entry.key().0 > target {
                break;
            }

            let ((at, _), (idx, id)) = entry.remove_entry();
            self.env.advance_to(at);
            self.nodes[idx].timers.remove(&id);
            self.apply(idx, SessionInput::TimerFired(id));
        }

        self.env.advance_to(target);
    }

    /// Advance until no timers remain, bounded by `limit`.
    ///
    /// Returns `true` if the world went quiet within the limit.
    pub fn run_until_idle(&mut self, limit: Duration) -> bool {
        let deadline = self.now() + limit;

        while let Some(next) = self.next_deadline() {
            if next > deadline {
                self.env.advance_to(deadline);
                return false;
            }
            self.advance(next.saturating_sub(self.now()));
        }

        true
    }

    fn execute(&mut self, idx: SessionIdx, action: SessionAction) {
        match action {
            SessionAction::Emit(event) => {
                self.nodes[idx].events.publish(&event);
            },
            SessionAction::Schedule { id, delay } => {
                let key = (self.now() + delay, self.next_seq);
                self.next_seq += 1;
                self.queue.insert(key, (idx, id));
                self.nodes[idx].timers.insert(id, key);
            },
            SessionAction::Cancel { id } => {
                if let Some(key) = self.nodes[idx].timers.remove(&id) {
                    self.queue.remove(&key);
                }
            },
            SessionAction::Notify { to, signal } => {
                let from = self.nodes[idx].session.identity();
                match self.index_of(to) {
                    Some(target) => {
                        self.mail.push_back((target, SessionInput::Peer { from, signal }));
                    },
                    None => tracing::debug!(%from, %to, "no such session, signal dropped"),
                }
            },
        }
    }
}

impl std::fmt::Debug for SimWorld {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SimWorld")
            .field("now", &self.now())
            .field("sessions", &self.nodes.len())
            .field("pending_timers", &self.queue.len())
            .field("registry", &self.registry)
            .finish()
    }
}
