//! Consumer Session Manager
//!
//! The broker owns the subscription registry, the reference resolver, the
//! replay cache and the session table. [`Broker`] holds the synchronous state
//! machine; [`spawn`] wraps it in a single-writer actor task that processes
//! consumer commands and upstream events one at a time.
//!
//! Every mutation follows the same sequence: update the registry, recompute
//! the derived reference subscription, then push the full topic set upstream.

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use std::time::Instant;

use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;

use super::dispatcher::{Delivery, Dispatcher};
use crate::application::ports::{
    ConnectionState, ConsumerSink, DeliveryError, UpstreamControl, UpstreamEvent,
};
use crate::domain::streaming::{ConsumerMessage, ReplayCache, UpstreamStatus};
use crate::domain::subscription::{
    ReferenceResolver, RegistryStats, SessionId, SubscriptionKind, SubscriptionRegistry, Topic,
};
use crate::infrastructure::metrics;

// =============================================================================
// Errors
// =============================================================================

/// Errors returned to consumers by the broker.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BrokerError {
    /// The session id was never issued or has detached.
    #[error("unknown session: {0}")]
    UnknownSession(SessionId),

    /// The broker task is gone.
    #[error("broker stopped")]
    Stopped,
}

// =============================================================================
// Broker State
// =============================================================================

/// Point-in-time view of the broker for health reporting.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BrokerSnapshot {
    /// Attached sessions.
    pub sessions: usize,
    /// Topics currently requested upstream.
    pub topics: BTreeSet<Topic>,
    /// Registry statistics.
    pub registry: RegistryStats,
    /// Last connection state reported upstream.
    pub connection: ConnectionState,
}

/// Broker state machine.
///
/// All methods run on the actor task; none of them block or await.
pub struct Broker<U> {
    registry: SubscriptionRegistry,
    resolver: ReferenceResolver,
    dispatcher: Dispatcher,
    cache: ReplayCache,
    sessions: HashMap<SessionId, Arc<dyn ConsumerSink>>,
    next_session: u64,
    upstream: U,
    filter: BTreeSet<Topic>,
    connection: ConnectionState,
    status: UpstreamStatus,
}

impl<U: UpstreamControl> Broker<U> {
    /// Create a broker following `reference` for cross-rates.
    #[must_use]
    pub fn new(upstream: U, reference: Topic, replay_depth: usize) -> Self {
        Self {
            registry: SubscriptionRegistry::new(),
            resolver: ReferenceResolver::new(reference.clone()),
            dispatcher: Dispatcher::new(reference),
            cache: ReplayCache::new(replay_depth),
            sessions: HashMap::new(),
            next_session: 1,
            upstream,
            filter: BTreeSet::new(),
            connection: ConnectionState::Disconnected,
            status: UpstreamStatus::Disconnected,
        }
    }

    // =========================================================================
    // Consumer Operations
    // =========================================================================

    /// Register a consumer and send it the current upstream status.
    ///
    /// Attaching never opens the upstream connection on its own.
    pub fn attach(&mut self, sink: Arc<dyn ConsumerSink>) -> SessionId {
        let session = SessionId::from_raw(self.next_session);
        self.next_session += 1;

        self.sessions.insert(session, sink);
        self.deliver(session, ConsumerMessage::status(self.status));
        metrics::set_sessions(self.sessions.len());

        tracing::info!(%session, sessions = self.sessions.len(), "Consumer attached");
        session
    }

    /// Subscribe a session to a topic.
    ///
    /// A repeated identical subscription changes nothing and sends no backfill.
    ///
    /// # Errors
    ///
    /// Returns [`BrokerError::UnknownSession`] if the session is not attached.
    pub fn subscribe(
        &mut self,
        session: SessionId,
        topic: Topic,
        kind: SubscriptionKind,
    ) -> Result<(), BrokerError> {
        self.ensure_session(session)?;

        let added = self.registry.add(topic.clone(), session, kind);
        self.resolver.apply(&mut self.registry);
        self.push_filter();

        if !added {
            tracing::debug!(%session, topic = %topic.short(), kind = kind.as_str(), "Already subscribed");
            return Ok(());
        }

        tracing::info!(%session, topic = %topic.short(), kind = kind.as_str(), "Subscribed");
        self.log_sharing(&topic);

        if let Some(message) = self.dispatcher.backfill(&topic, kind, &self.cache, now_ms()) {
            self.deliver(session, message);
        }

        Ok(())
    }

    /// Drop every subscription a session holds on a topic.
    ///
    /// # Errors
    ///
    /// Returns [`BrokerError::UnknownSession`] if the session is not attached.
    pub fn unsubscribe(&mut self, session: SessionId, topic: &Topic) -> Result<(), BrokerError> {
        self.ensure_session(session)?;

        if self.registry.remove(topic, session) {
            tracing::info!(%session, topic = %topic.short(), "Unsubscribed");
        }
        self.resolver.apply(&mut self.registry);
        self.push_filter();

        Ok(())
    }

    /// Remove a session and all of its subscriptions.
    ///
    /// The last session to leave clears the replay cache.
    ///
    /// # Errors
    ///
    /// Returns [`BrokerError::UnknownSession`] if the session is not attached.
    pub fn detach(&mut self, session: SessionId) -> Result<(), BrokerError> {
        if self.sessions.remove(&session).is_none() {
            return Err(BrokerError::UnknownSession(session));
        }

        let removed = self.registry.remove_all_for_consumer(session);
        self.resolver.apply(&mut self.registry);
        self.push_filter();
        metrics::set_sessions(self.sessions.len());

        if self.sessions.is_empty() {
            self.cache.clear();
            tracing::debug!("Last consumer detached, replay cache cleared");
        }

        tracing::info!(
            %session,
            topics_removed = removed.len(),
            sessions = self.sessions.len(),
            "Consumer detached"
        );
        Ok(())
    }

    // =========================================================================
    // Upstream Events
    // =========================================================================

    /// Handle an event reported by the upstream connection.
    pub fn handle_upstream(&mut self, event: UpstreamEvent) {
        match event {
            UpstreamEvent::StateChanged(state) => self.on_state_changed(state),
            UpstreamEvent::Disconnected { self_initiated } => {
                tracing::info!(self_initiated, "Upstream disconnected");
            }
            UpstreamEvent::Reconnecting { attempt, delay } => {
                tracing::info!(attempt, delay_ms = delay.as_millis(), "Upstream reconnect scheduled");
            }
            UpstreamEvent::Feed(event) => {
                let started = Instant::now();
                metrics::record_upstream_message(event.label());

                let deliveries = self
                    .dispatcher
                    .dispatch(event, &self.registry, &mut self.cache, now_ms());
                for Delivery { session, message } in deliveries {
                    self.deliver(session, message);
                }

                metrics::record_dispatch_duration(started.elapsed());
            }
            UpstreamEvent::Fatal(message) => {
                tracing::error!(error = %message, "Upstream fatal error");
                self.broadcast(&ConsumerMessage::error(message));
            }
        }
    }

    fn on_state_changed(&mut self, state: ConnectionState) {
        self.connection = state;
        metrics::set_upstream_connected(state == ConnectionState::Open);

        let status = match state {
            ConnectionState::Open => UpstreamStatus::Connected,
            ConnectionState::Disconnected => UpstreamStatus::Disconnected,
            ConnectionState::Connecting | ConnectionState::Closing => return,
        };

        if status != self.status {
            self.status = status;
            self.broadcast(&ConsumerMessage::status(status));
        }
    }

    // =========================================================================
    // Queries
    // =========================================================================

    /// Current broker snapshot.
    #[must_use]
    pub fn snapshot(&self) -> BrokerSnapshot {
        BrokerSnapshot {
            sessions: self.sessions.len(),
            topics: self.registry.topics(),
            registry: self.registry.stats(),
            connection: self.connection,
        }
    }

    /// Read-only view of the registry.
    #[must_use]
    pub const fn registry(&self) -> &SubscriptionRegistry {
        &self.registry
    }

    /// Read-only view of the replay cache.
    #[must_use]
    pub const fn cache(&self) -> &ReplayCache {
        &self.cache
    }

    // =========================================================================
    // Internals
    // =========================================================================

    fn ensure_session(&self, session: SessionId) -> Result<(), BrokerError> {
        if self.sessions.contains_key(&session) {
            Ok(())
        } else {
            Err(BrokerError::UnknownSession(session))
        }
    }

    /// Push the registry's topic set upstream when it changed.
    fn push_filter(&mut self) {
        let topics = self.registry.topics();
        if topics == self.filter {
            return;
        }

        for gone in self.filter.difference(&topics) {
            self.cache.evict(gone);
        }

        tracing::debug!(topics = topics.len(), "Upstream filter updated");
        metrics::set_topics(topics.len());
        self.upstream.set_filter(topics.clone());
        self.filter = topics;
    }

    fn log_sharing(&self, topic: &Topic) {
        let subscribers = self.registry.subscribers_of(topic);
        let consumers: BTreeSet<SessionId> =
            subscribers.iter().filter_map(|sub| sub.session()).collect();

        if consumers.len() > 1 {
            let stats = self.registry.stats();
            tracing::debug!(
                topic = %topic.short(),
                consumers = consumers.len(),
                shared_topics = stats.shared_topics,
                upstream_topics = stats.topic_count,
                "Topic shared across sessions"
            );
        }
    }

    fn deliver(&self, session: SessionId, message: ConsumerMessage) {
        let Some(sink) = self.sessions.get(&session) else {
            return;
        };

        let label = message.label();
        match sink.deliver(message) {
            Ok(()) => metrics::record_messages_sent(label, 1),
            Err(DeliveryError::Closed) => {
                tracing::debug!(%session, "Consumer channel closed, message dropped");
                metrics::record_messages_dropped("closed", 1);
            }
        }
    }

    fn broadcast(&self, message: &ConsumerMessage) {
        for session in self.sessions.keys() {
            self.deliver(*session, message.clone());
        }
    }
}

fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

// =============================================================================
// Actor
// =============================================================================

/// Request sent to the broker task.
pub enum BrokerCommand {
    /// Register a consumer.
    Attach {
        /// Consumer output channel.
        sink: Arc<dyn ConsumerSink>,
        /// Reply with the issued id.
        reply: oneshot::Sender<SessionId>,
    },
    /// Subscribe a session to a topic.
    Subscribe {
        /// Session.
        session: SessionId,
        /// Topic.
        topic: Topic,
        /// Kind.
        kind: SubscriptionKind,
        /// Outcome.
        reply: oneshot::Sender<Result<(), BrokerError>>,
    },
    /// Unsubscribe a session from a topic.
    Unsubscribe {
        /// Session.
        session: SessionId,
        /// Topic.
        topic: Topic,
        /// Outcome.
        reply: oneshot::Sender<Result<(), BrokerError>>,
    },
    /// Remove a session.
    Detach {
        /// Session.
        session: SessionId,
        /// Outcome.
        reply: oneshot::Sender<Result<(), BrokerError>>,
    },
    /// Read the current snapshot.
    Snapshot {
        /// Snapshot.
        reply: oneshot::Sender<BrokerSnapshot>,
    },
}

/// Cloneable handle for talking to the broker task.
#[derive(Clone)]
pub struct BrokerHandle {
    commands: mpsc::Sender<BrokerCommand>,
}

impl BrokerHandle {
    async fn request<T>(
        &self,
        build: impl FnOnce(oneshot::Sender<T>) -> BrokerCommand,
    ) -> Result<T, BrokerError> {
        let (reply, rx) = oneshot::channel();
        self.commands
            .send(build(reply))
            .await
            .map_err(|_| BrokerError::Stopped)?;
        rx.await.map_err(|_| BrokerError::Stopped)
    }

    /// Attach a consumer.
    ///
    /// # Errors
    ///
    /// Returns [`BrokerError::Stopped`] if the broker task has exited.
    pub async fn attach(&self, sink: Arc<dyn ConsumerSink>) -> Result<SessionId, BrokerError> {
        self.request(|reply| BrokerCommand::Attach { sink, reply })
            .await
    }

    /// Subscribe a session to a topic.
    ///
    /// # Errors
    ///
    /// Returns [`BrokerError::UnknownSession`] or [`BrokerError::Stopped`].
    pub async fn subscribe(
        &self,
        session: SessionId,
        topic: Topic,
        kind: SubscriptionKind,
    ) -> Result<(), BrokerError> {
        self.request(|reply| BrokerCommand::Subscribe {
            session,
            topic,
            kind,
            reply,
        })
        .await?
    }

    /// Unsubscribe a session from a topic.
    ///
    /// # Errors
    ///
    /// Returns [`BrokerError::UnknownSession`] or [`BrokerError::Stopped`].
    pub async fn unsubscribe(&self, session: SessionId, topic: Topic) -> Result<(), BrokerError> {
        self.request(|reply| BrokerCommand::Unsubscribe {
            session,
            topic,
            reply,
        })
        .await?
    }

    /// Detach a session.
    ///
    /// # Errors
    ///
    /// Returns [`BrokerError::UnknownSession`] or [`BrokerError::Stopped`].
    pub async fn detach(&self, session: SessionId) -> Result<(), BrokerError> {
        self.request(|reply| BrokerCommand::Detach { session, reply })
            .await?
    }

    /// Current broker snapshot.
    ///
    /// # Errors
    ///
    /// Returns [`BrokerError::Stopped`] if the broker task has exited.
    pub async fn snapshot(&self) -> Result<BrokerSnapshot, BrokerError> {
        self.request(|reply| BrokerCommand::Snapshot { reply }).await
    }
}

/// Capacity of the consumer command queue.
const COMMAND_QUEUE_CAPACITY: usize = 1024;

/// Start the broker task.
///
/// The task runs until `cancel` fires or every handle and the upstream event
/// sender are dropped. On exit the filter is emptied so the upstream closes.
pub fn spawn<U>(
    broker: Broker<U>,
    events: mpsc::Receiver<UpstreamEvent>,
    cancel: CancellationToken,
) -> (BrokerHandle, tokio::task::JoinHandle<()>)
where
    U: UpstreamControl + 'static,
{
    let (tx, rx) = mpsc::channel(COMMAND_QUEUE_CAPACITY);
    let task = tokio::spawn(run(broker, rx, events, cancel));
    (BrokerHandle { commands: tx }, task)
}

async fn run<U: UpstreamControl>(
    mut broker: Broker<U>,
    mut commands: mpsc::Receiver<BrokerCommand>,
    mut events: mpsc::Receiver<UpstreamEvent>,
    cancel: CancellationToken,
) {
    tracing::info!("Broker started");
    let mut events_open = true;

    loop {
        tokio::select! {
            () = cancel.cancelled() => break,

            command = commands.recv() => {
                let Some(command) = command else { break };
                handle_command(&mut broker, command);
            }

            event = events.recv(), if events_open => {
                match event {
                    Some(event) => broker.handle_upstream(event),
                    None => {
                        tracing::warn!("Upstream event channel closed");
                        events_open = false;
                    }
                }
            }
        }
    }

    broker.upstream.set_filter(BTreeSet::new());
    tracing::info!("Broker stopped");
}

fn handle_command<U: UpstreamControl>(broker: &mut Broker<U>, command: BrokerCommand) {
    // Replies are dropped silently when the caller gave up waiting.
    match command {
        BrokerCommand::Attach { sink, reply } => {
            let session = broker.attach(sink);
            if reply.send(session).is_err() {
                // Caller vanished before learning its id; nobody can detach it.
                let _ = broker.detach(session);
            }
        }
        BrokerCommand::Subscribe {
            session,
            topic,
            kind,
            reply,
        } => {
            let _ = reply.send(broker.subscribe(session, topic, kind));
        }
        BrokerCommand::Unsubscribe {
            session,
            topic,
            reply,
        } => {
            let _ = reply.send(broker.unsubscribe(session, &topic));
        }
        BrokerCommand::Detach { session, reply } => {
            let _ = reply.send(broker.detach(session));
        }
        BrokerCommand::Snapshot { reply } => {
            let _ = reply.send(broker.snapshot());
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
