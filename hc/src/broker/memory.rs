//! In-process broker
//!
//! Implements the subset of AMQP routing the participants rely on: fanout and
//! direct exchanges, the default exchange routing by queue name, broker-named
//! queues, buffering until a consumer attaches, and acknowledgement counting.
//! Queues are never garbage collected.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use tokio::sync::mpsc;
use tracing::debug;

use super::{Acker, Channel, Connection, Connector, Delivery, DeliveryStream, ExchangeKind, QueueOptions};
use crate::error::BrokerError;

#[derive(Default)]
struct Queue {
    buffered: VecDeque<Vec<u8>>,
    consumer: Option<mpsc::UnboundedSender<Delivery>>,
}

struct Exchange {
    kind: ExchangeKind,
    bindings: Vec<String>,
}

#[derive(Default)]
struct State {
    exchanges: HashMap<String, Exchange>,
    queues: HashMap<String, Queue>,
    next_queue: u64,
}

struct Inner {
    state: Mutex<State>,
    refusals_left: AtomicU32,
    connect_attempts: AtomicU32,
    open_connections: AtomicU32,
    acked: AtomicU64,
    published: AtomicU64,
}

impl Inner {
    fn state(&self) -> MutexGuard<'_, State> {
        // A panic while holding the lock cannot leave routing tables half-updated
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn deliver(self: &Arc<Self>, queue: &mut Queue, body: Vec<u8>) {
        if let Some(consumer) = &queue.consumer {
            let delivery = Delivery::new(body, Box::new(MemoryAcker { broker: self.clone() }));
            match consumer.send(delivery) {
                Ok(()) => return,
                Err(mpsc::error::SendError(returned)) => {
                    debug!("MemoryBroker::deliver: consumer gone, buffering");
                    queue.consumer = None;
                    queue.buffered.push_back(returned.body);
                    return;
                }
            }
        }
        queue.buffered.push_back(body);
    }
}

/// Broker living entirely inside the current process
///
/// Cloning yields another handle to the same broker.
#[derive(Clone)]
pub struct MemoryBroker {
    inner: Arc<Inner>,
}

impl MemoryBroker {
    pub fn new() -> Self {
        Self::refusing(0)
    }

    /// A broker that refuses the first `refusals` connection attempts
    pub fn refusing(refusals: u32) -> Self {
        debug!(refusals, "MemoryBroker::refusing: called");
        Self {
            inner: Arc::new(Inner {
                state: Mutex::new(State::default()),
                refusals_left: AtomicU32::new(refusals),
                connect_attempts: AtomicU32::new(0),
                open_connections: AtomicU32::new(0),
                acked: AtomicU64::new(0),
                published: AtomicU64::new(0),
            }),
        }
    }

    /// Number of connection attempts seen so far
    pub fn connect_attempts(&self) -> u32 {
        self.inner.connect_attempts.load(Ordering::SeqCst)
    }

    /// Connections handed out and not closed yet
    pub fn open_connections(&self) -> u32 {
        self.inner.open_connections.load(Ordering::SeqCst)
    }

    /// Number of deliveries acknowledged so far
    pub fn acked(&self) -> u64 {
        self.inner.acked.load(Ordering::SeqCst)
    }

    /// Number of messages published so far, routed or not
    pub fn published(&self) -> u64 {
        self.inner.published.load(Ordering::SeqCst)
    }

    pub fn has_queue(&self, name: &str) -> bool {
        self.inner.state().queues.contains_key(name)
    }

    pub fn has_exchange(&self, name: &str) -> bool {
        self.inner.state().exchanges.contains_key(name)
    }

    /// Messages waiting in a queue for a consumer
    pub fn buffered(&self, queue: &str) -> usize {
        self.inner.state().queues.get(queue).map_or(0, |q| q.buffered.len())
    }
}

impl Default for MemoryBroker {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Connector for MemoryBroker {
    async fn connect(&self, address: &str) -> Result<Arc<dyn Connection>, BrokerError> {
        let attempt = self.inner.connect_attempts.fetch_add(1, Ordering::SeqCst) + 1;
        debug!(%address, attempt, "MemoryBroker::connect: called");

        let refused = self
            .inner
            .refusals_left
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |left| left.checked_sub(1))
            .is_ok();
        if refused {
            return Err(BrokerError::ConnectionRefused {
                address: address.to_string(),
                reason: "refused by memory broker".to_string(),
            });
        }

        self.inner.open_connections.fetch_add(1, Ordering::SeqCst);
        Ok(Arc::new(MemoryConnection {
            broker: self.inner.clone(),
            open: Arc::new(AtomicBool::new(true)),
        }))
    }
}

struct MemoryConnection {
    broker: Arc<Inner>,
    open: Arc<AtomicBool>,
}

#[async_trait]
impl Connection for MemoryConnection {
    async fn open_channel(&self) -> Result<Arc<dyn Channel>, BrokerError> {
        if !self.is_open() {
            return Err(BrokerError::ConnectionClosed);
        }
        Ok(Arc::new(MemoryChannel {
            broker: self.broker.clone(),
            open: self.open.clone(),
        }))
    }

    fn is_open(&self) -> bool {
        self.open.load(Ordering::SeqCst)
    }

    async fn close(&self) -> Result<(), BrokerError> {
        debug!("MemoryConnection::close: called");
        if self.open.swap(false, Ordering::SeqCst) {
            self.broker.open_connections.fetch_sub(1, Ordering::SeqCst);
        }
        Ok(())
    }
}

struct MemoryChannel {
    broker: Arc<Inner>,
    open: Arc<AtomicBool>,
}

impl MemoryChannel {
    fn ensure_open(&self) -> Result<(), BrokerError> {
        if self.open.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(BrokerError::ConnectionClosed)
        }
    }
}

#[async_trait]
impl Channel for MemoryChannel {
    async fn declare_exchange(&self, name: &str, kind: ExchangeKind, _auto_delete: bool) -> Result<(), BrokerError> {
        self.ensure_open()?;
        debug!(%name, ?kind, "MemoryChannel::declare_exchange: called");
        self.broker
            .state()
            .exchanges
            .entry(name.to_string())
            .or_insert_with(|| Exchange {
                kind,
                bindings: Vec::new(),
            });
        Ok(())
    }

    async fn declare_queue(&self, name: &str, _options: QueueOptions) -> Result<String, BrokerError> {
        self.ensure_open()?;
        let mut state = self.broker.state();
        let name = if name.is_empty() {
            state.next_queue += 1;
            format!("amq.gen-{}", state.next_queue)
        } else {
            name.to_string()
        };
        debug!(queue = %name, "MemoryChannel::declare_queue: called");
        state.queues.entry(name.clone()).or_default();
        Ok(name)
    }

    async fn bind_queue(&self, queue: &str, exchange: &str) -> Result<(), BrokerError> {
        self.ensure_open()?;
        debug!(%queue, %exchange, "MemoryChannel::bind_queue: called");
        let mut state = self.broker.state();
        if !state.queues.contains_key(queue) {
            return Err(BrokerError::QueueNotFound(queue.to_string()));
        }
        let exchange = state
            .exchanges
            .get_mut(exchange)
            .ok_or_else(|| BrokerError::ExchangeNotFound(exchange.to_string()))?;
        if !exchange.bindings.iter().any(|b| b == queue) {
            exchange.bindings.push(queue.to_string());
        }
        Ok(())
    }

    async fn consume(&self, queue: &str) -> Result<DeliveryStream, BrokerError> {
        self.ensure_open()?;
        debug!(%queue, "MemoryChannel::consume: called");
        let mut state = self.broker.state();
        let entry = state
            .queues
            .get_mut(queue)
            .ok_or_else(|| BrokerError::QueueNotFound(queue.to_string()))?;

        if entry.consumer.as_ref().is_some_and(|c| !c.is_closed()) {
            return Err(BrokerError::AlreadyConsuming(queue.to_string()));
        }

        let (tx, rx) = mpsc::unbounded_channel();
        entry.consumer = Some(tx);
        let backlog: Vec<Vec<u8>> = entry.buffered.drain(..).collect();
        for body in backlog {
            self.broker.deliver(entry, body);
        }
        Ok(DeliveryStream::new(rx))
    }

    async fn publish(&self, exchange: &str, routing_key: &str, body: &[u8]) -> Result<(), BrokerError> {
        self.ensure_open()?;
        debug!(%exchange, %routing_key, len = body.len(), "MemoryChannel::publish: called");
        self.broker.published.fetch_add(1, Ordering::SeqCst);
        let mut state = self.broker.state();

        let targets: Vec<String> = if exchange.is_empty() {
            vec![routing_key.to_string()]
        } else {
            let ex = state
                .exchanges
                .get(exchange)
                .ok_or_else(|| BrokerError::ExchangeNotFound(exchange.to_string()))?;
            match ex.kind {
                ExchangeKind::Fanout => ex.bindings.clone(),
                ExchangeKind::Direct => ex.bindings.iter().filter(|b| *b == routing_key).cloned().collect(),
            }
        };

        for target in targets {
            match state.queues.get_mut(&target) {
                Some(queue) => self.broker.deliver(queue, body.to_vec()),
                None => debug!(queue = %target, "MemoryChannel::publish: unroutable, dropped"),
            }
        }
        Ok(())
    }
}

struct MemoryAcker {
    broker: Arc<Inner>,
}

#[async_trait]
impl Acker for MemoryAcker {
    async fn ack(&self) -> Result<(), BrokerError> {
        self.broker.acked.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}
