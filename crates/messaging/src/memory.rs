use std::collections::{BTreeMap, BTreeSet, HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use tokio::sync::Notify;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::{
    BrokerError, DEATH_REASON_HEADER, Delivery, DeliveryTag, Message, ORIGINAL_QUEUE_HEADER,
    QueueSpec, Result, TopicSpec,
    broker::{Broker, Connection, Subscription},
};

#[derive(Debug)]
struct Queued {
    message: Message,
    enqueued_at: Instant,
    redelivered: bool,
}

impl Queued {
    fn new(message: Message, now: Instant) -> Self {
        Self {
            message,
            enqueued_at: now,
            redelivered: false,
        }
    }
}

#[derive(Debug)]
struct QueueState {
    spec: QueueSpec,
    ready: VecDeque<Queued>,
}

#[derive(Debug)]
struct TopicState {
    spec: TopicSpec,
    bindings: BTreeSet<String>,
}

#[derive(Debug)]
struct Unacked {
    queue: String,
    subscription: u64,
    entry: Queued,
}

#[derive(Debug)]
struct ConnectionState {
    token: CancellationToken,
    unacked: BTreeMap<u64, Unacked>,
}

#[derive(Debug, Default)]
struct BrokerState {
    topics: HashMap<String, TopicState>,
    queues: HashMap<String, QueueState>,
    connections: HashMap<u64, ConnectionState>,
    next_id: u64,
    unavailable: bool,
    connections_opened: u64,
}

impl BrokerState {
    fn next_id(&mut self) -> u64 {
        self.next_id += 1;
        self.next_id
    }

    fn ensure_open(&self, connection: u64, token: &CancellationToken) -> Result<()> {
        if token.is_cancelled() || !self.connections.contains_key(&connection) {
            return Err(BrokerError::ConnectionClosed);
        }
        Ok(())
    }

    fn enqueue(&mut self, queue: &str, message: Message, now: Instant) -> Result<()> {
        let state = self
            .queues
            .get_mut(queue)
            .ok_or_else(|| BrokerError::QueueNotFound(queue.to_string()))?;
        state.ready.push_back(Queued::new(message, now));
        Ok(())
    }

    /// Removes ready messages whose TTL has passed, routing them to their
    /// queue's dead-letter target when one is configured.
    fn expire(&mut self, now: Instant) {
        let mut dead = Vec::new();
        for (name, queue) in self.queues.iter_mut() {
            let Some(ttl) = queue.spec.message_ttl else {
                continue;
            };
            let mut kept = VecDeque::with_capacity(queue.ready.len());
            for entry in queue.ready.drain(..) {
                if now.saturating_duration_since(entry.enqueued_at) < ttl {
                    kept.push_back(entry);
                } else if let Some(target) = &queue.spec.dead_letter {
                    dead.push((name.clone(), target.clone(), entry.message));
                } else {
                    tracing::debug!(queue = %name, message_id = %entry.message.id, "message expired");
                }
            }
            queue.ready = kept;
        }

        for (from, to, message) in dead {
            metrics::counter!("broker_messages_expired_total", "queue" => from.clone()).increment(1);
            let message = message
                .with_header(ORIGINAL_QUEUE_HEADER, from.as_str())
                .with_header(DEATH_REASON_HEADER, "expired");
            if self.enqueue(&to, message, now).is_err() {
                tracing::warn!(queue = %from, dead_letter = %to, "dead-letter queue missing, expired message dropped");
            }
        }
    }

    /// Earliest instant at which some ready message expires.
    fn next_expiry(&self) -> Option<Instant> {
        self.queues
            .values()
            .filter_map(|q| {
                let ttl = q.spec.message_ttl?;
                q.ready.iter().map(|e| e.enqueued_at + ttl).min()
            })
            .min()
    }

    fn close_connection(&mut self, connection: u64) -> bool {
        let Some(state) = self.connections.remove(&connection) else {
            return false;
        };
        state.token.cancel();

        // Newest first, so pushing to the front restores the original order.
        for (_, unacked) in state.unacked.into_iter().rev() {
            if let Some(queue) = self.queues.get_mut(&unacked.queue) {
                let mut entry = unacked.entry;
                entry.redelivered = true;
                queue.ready.push_front(entry);
            }
        }
        true
    }
}

#[derive(Debug, Default)]
struct Shared {
    state: Mutex<BrokerState>,
    changed: Notify,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, BrokerState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn notify(&self) {
        self.changed.notify_waiters();
    }
}

/// In-memory broker for tests and single-process deployments.
///
/// Behaves like a durable fanout broker: topics copy each message to every
/// bound queue, deliveries stay unacknowledged until acked, and a closed
/// connection returns its unacked deliveries to the front of their queues.
#[derive(Debug, Clone, Default)]
pub struct InMemoryBroker {
    shared: Arc<Shared>,
}

impl InMemoryBroker {
    /// Creates an empty broker.
    pub fn new() -> Self {
        Self::default()
    }

    /// While unavailable, new connections are refused.
    pub fn set_available(&self, available: bool) {
        self.shared.lock().unavailable = !available;
    }

    /// Simulates a broker restart.
    ///
    /// Every open connection is closed, non-durable topics and queues are
    /// dropped, and durable queues keep only their persistent messages.
    pub fn restart(&self) {
        {
            let mut state = self.shared.lock();
            let connections: Vec<u64> = state.connections.keys().copied().collect();
            for id in connections {
                state.close_connection(id);
            }

            state.queues.retain(|_, q| q.spec.durable);
            for queue in state.queues.values_mut() {
                queue.ready.retain(|e| e.message.persistent);
                for entry in queue.ready.iter_mut() {
                    entry.redelivered = true;
                }
            }
            state.topics.retain(|_, t| t.spec.durable);
            let BrokerState { topics, queues, .. } = &mut *state;
            for topic in topics.values_mut() {
                topic.bindings.retain(|q| queues.contains_key(q));
            }
        }
        tracing::warn!("in-memory broker restarted");
        metrics::counter!("broker_restarts_total").increment(1);
        self.shared.notify();
    }

    /// Number of ready messages in a queue.
    pub fn queue_depth(&self, queue: &str) -> usize {
        let mut state = self.shared.lock();
        state.expire(Instant::now());
        state.queues.get(queue).map_or(0, |q| q.ready.len())
    }

    /// Ready messages in a queue, front first.
    pub fn queue_messages(&self, queue: &str) -> Vec<Message> {
        let mut state = self.shared.lock();
        state.expire(Instant::now());
        state
            .queues
            .get(queue)
            .map(|q| q.ready.iter().map(|e| e.message.clone()).collect())
            .unwrap_or_default()
    }

    /// Deliveries from a queue that are awaiting acknowledgement.
    pub fn unacked_count(&self, queue: &str) -> usize {
        self.shared
            .lock()
            .connections
            .values()
            .flat_map(|c| c.unacked.values())
            .filter(|u| u.queue == queue)
            .count()
    }

    pub fn has_topic(&self, topic: &str) -> bool {
        self.shared.lock().topics.contains_key(topic)
    }

    pub fn has_queue(&self, queue: &str) -> bool {
        self.shared.lock().queues.contains_key(queue)
    }

    /// Queues bound to a topic.
    pub fn bindings(&self, topic: &str) -> Vec<String> {
        self.shared
            .lock()
            .topics
            .get(topic)
            .map(|t| t.bindings.iter().cloned().collect())
            .unwrap_or_default()
    }

    pub fn open_connections(&self) -> usize {
        self.shared.lock().connections.len()
    }

    /// Connections opened since the broker was created.
    pub fn connections_opened(&self) -> u64 {
        self.shared.lock().connections_opened
    }
}

#[async_trait]
impl Broker for InMemoryBroker {
    async fn connect(&self) -> Result<Box<dyn Connection>> {
        let mut state = self.shared.lock();
        if state.unavailable {
            return Err(BrokerError::Unavailable("connection refused".to_string()));
        }
        let id = state.next_id();
        let token = CancellationToken::new();
        state.connections.insert(
            id,
            ConnectionState {
                token: token.clone(),
                unacked: BTreeMap::new(),
            },
        );
        state.connections_opened += 1;
        tracing::debug!(connection = id, "broker connection opened");

        Ok(Box::new(InMemoryConnection {
            id,
            shared: Arc::clone(&self.shared),
            token,
        }))
    }
}

/// Connection to an [`InMemoryBroker`]. Dropping it closes it.
#[derive(Debug)]
pub struct InMemoryConnection {
    id: u64,
    shared: Arc<Shared>,
    token: CancellationToken,
}

#[async_trait]
impl Connection for InMemoryConnection {
    async fn declare_topic(&self, spec: &TopicSpec) -> Result<()> {
        let mut state = self.shared.lock();
        state.ensure_open(self.id, &self.token)?;
        match state.topics.get(&spec.name) {
            Some(existing) if existing.spec != *spec => Err(BrokerError::TopologyMismatch {
                name: spec.name.clone(),
            }),
            Some(_) => Ok(()),
            None => {
                state.topics.insert(
                    spec.name.clone(),
                    TopicState {
                        spec: spec.clone(),
                        bindings: BTreeSet::new(),
                    },
                );
                Ok(())
            }
        }
    }

    async fn declare_queue(&self, spec: &QueueSpec) -> Result<()> {
        let mut state = self.shared.lock();
        state.ensure_open(self.id, &self.token)?;
        match state.queues.get(&spec.name) {
            Some(existing) if existing.spec != *spec => Err(BrokerError::TopologyMismatch {
                name: spec.name.clone(),
            }),
            Some(_) => Ok(()),
            None => {
                state.queues.insert(
                    spec.name.clone(),
                    QueueState {
                        spec: spec.clone(),
                        ready: VecDeque::new(),
                    },
                );
                Ok(())
            }
        }
    }

    async fn bind(&self, queue: &str, topic: &str) -> Result<()> {
        let mut state = self.shared.lock();
        state.ensure_open(self.id, &self.token)?;
        if !state.queues.contains_key(queue) {
            return Err(BrokerError::QueueNotFound(queue.to_string()));
        }
        let topic_state = state
            .topics
            .get_mut(topic)
            .ok_or_else(|| BrokerError::TopicNotFound(topic.to_string()))?;
        topic_state.bindings.insert(queue.to_string());
        Ok(())
    }

    async fn publish(&self, topic: &str, message: Message) -> Result<()> {
        {
            let mut state = self.shared.lock();
            state.ensure_open(self.id, &self.token)?;
            let bindings: Vec<String> = state
                .topics
                .get(topic)
                .ok_or_else(|| BrokerError::TopicNotFound(topic.to_string()))?
                .bindings
                .iter()
                .cloned()
                .collect();

            let now = Instant::now();
            if bindings.is_empty() {
                tracing::debug!(topic, message_id = %message.id, "no queues bound, message dropped");
            }
            for queue in bindings {
                state.enqueue(&queue, message.clone(), now)?;
            }
        }
        metrics::counter!("broker_messages_published_total", "topic" => topic.to_string())
            .increment(1);
        self.shared.notify();
        Ok(())
    }

    async fn send(&self, queue: &str, message: Message) -> Result<()> {
        {
            let mut state = self.shared.lock();
            state.ensure_open(self.id, &self.token)?;
            state.enqueue(queue, message, Instant::now())?;
        }
        self.shared.notify();
        Ok(())
    }

    async fn consume(&self, queue: &str, prefetch: u16) -> Result<Box<dyn Subscription>> {
        let mut state = self.shared.lock();
        state.ensure_open(self.id, &self.token)?;
        if !state.queues.contains_key(queue) {
            return Err(BrokerError::QueueNotFound(queue.to_string()));
        }
        let id = state.next_id();
        Ok(Box::new(InMemorySubscription {
            id,
            connection: self.id,
            queue: queue.to_string(),
            prefetch: usize::from(prefetch.max(1)),
            shared: Arc::clone(&self.shared),
            token: self.token.clone(),
        }))
    }

    async fn close(&self) -> Result<()> {
        let closed = self.shared.lock().close_connection(self.id);
        if closed {
            tracing::debug!(connection = self.id, "broker connection closed");
            self.shared.notify();
        }
        Ok(())
    }

    fn is_open(&self) -> bool {
        !self.token.is_cancelled()
    }
}

impl Drop for InMemoryConnection {
    fn drop(&mut self) {
        if self.shared.lock().close_connection(self.id) {
            self.shared.notify();
        }
    }
}

enum Poll {
    Ready(Delivery),
    Wait(Option<Instant>),
}

/// Subscription to one queue of an [`InMemoryBroker`].
#[derive(Debug)]
pub struct InMemorySubscription {
    id: u64,
    connection: u64,
    queue: String,
    prefetch: usize,
    shared: Arc<Shared>,
    token: CancellationToken,
}

impl InMemorySubscription {
    fn poll_queue(&self) -> Result<Poll> {
        let mut state = self.shared.lock();
        state.ensure_open(self.connection, &self.token)?;

        let now = Instant::now();
        state.expire(now);

        let outstanding = state
            .connections
            .get(&self.connection)
            .map_or(0, |c| {
                c.unacked
                    .values()
                    .filter(|u| u.subscription == self.id)
                    .count()
            });
        if outstanding >= self.prefetch {
            return Ok(Poll::Wait(None));
        }

        let entry = state
            .queues
            .get_mut(&self.queue)
            .ok_or_else(|| BrokerError::QueueNotFound(self.queue.clone()))?
            .ready
            .pop_front();
        let Some(entry) = entry else {
            return Ok(Poll::Wait(state.next_expiry()));
        };

        let tag = state.next_id();
        let delivery = Delivery {
            tag: DeliveryTag(tag),
            queue: self.queue.clone(),
            message: entry.message.clone(),
            redelivered: entry.redelivered,
        };
        if let Some(connection) = state.connections.get_mut(&self.connection) {
            connection.unacked.insert(
                tag,
                Unacked {
                    queue: self.queue.clone(),
                    subscription: self.id,
                    entry,
                },
            );
        }
        Ok(Poll::Ready(delivery))
    }
}

#[async_trait]
impl Subscription for InMemorySubscription {
    async fn next(&mut self) -> Result<Delivery> {
        loop {
            let notified = self.shared.changed.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            let deadline = match self.poll_queue()? {
                Poll::Ready(delivery) => return Ok(delivery),
                Poll::Wait(deadline) => deadline,
            };

            tokio::select! {
                _ = &mut notified => {}
                _ = self.token.cancelled() => return Err(BrokerError::ConnectionClosed),
                _ = tokio::time::sleep_until(deadline.unwrap_or_else(Instant::now)), if deadline.is_some() => {}
            }
        }
    }

    async fn ack(&self, tag: DeliveryTag) -> Result<()> {
        {
            let mut state = self.shared.lock();
            state.ensure_open(self.connection, &self.token)?;
            state
                .connections
                .get_mut(&self.connection)
                .and_then(|c| c.unacked.remove(&tag.0))
                .ok_or(BrokerError::UnknownDeliveryTag(tag.0))?;
        }
        self.shared.notify();
        Ok(())
    }
}
