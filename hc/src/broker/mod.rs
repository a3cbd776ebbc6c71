//! Message broker seam
//!
//! The participants only ever talk to the broker through these traits. Two
//! implementations ship: [`AmqpConnector`] for RabbitMQ (feature `amqp`) and
//! [`MemoryBroker`], an in-process broker for tests and embedding.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::error::BrokerError;

#[cfg(feature = "amqp")]
mod amqp;
mod memory;

#[cfg(feature = "amqp")]
pub use amqp::AmqpConnector;
pub use memory::MemoryBroker;

/// Exchange routing behaviour
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExchangeKind {
    /// Every bound queue receives every message
    Fanout,
    /// Routed by exact routing key
    Direct,
}

/// Queue declaration flags
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct QueueOptions {
    pub exclusive: bool,
    pub auto_delete: bool,
    pub durable: bool,
}

impl QueueOptions {
    /// Private queue that lives as long as the declaring connection
    pub fn exclusive() -> Self {
        Self {
            exclusive: true,
            auto_delete: true,
            durable: false,
        }
    }

    /// Shared session queue removed once its last consumer leaves
    pub fn auto_delete() -> Self {
        Self {
            exclusive: false,
            auto_delete: true,
            durable: false,
        }
    }
}

/// Opens connections to a broker
#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(&self, address: &str) -> Result<Arc<dyn Connection>, BrokerError>;
}

/// A live broker connection
#[async_trait]
pub trait Connection: Send + Sync {
    async fn open_channel(&self) -> Result<Arc<dyn Channel>, BrokerError>;

    fn is_open(&self) -> bool;

    async fn close(&self) -> Result<(), BrokerError>;
}

/// A logical channel multiplexed over a connection
#[async_trait]
pub trait Channel: Send + Sync {
    async fn declare_exchange(&self, name: &str, kind: ExchangeKind, auto_delete: bool) -> Result<(), BrokerError>;

    /// Declare a queue and return its actual name (an empty name asks the broker to pick one)
    async fn declare_queue(&self, name: &str, options: QueueOptions) -> Result<String, BrokerError>;

    async fn bind_queue(&self, queue: &str, exchange: &str) -> Result<(), BrokerError>;

    async fn consume(&self, queue: &str) -> Result<DeliveryStream, BrokerError>;

    /// Publish to an exchange; the empty exchange routes directly to the queue named by `routing_key`
    async fn publish(&self, exchange: &str, routing_key: &str, body: &[u8]) -> Result<(), BrokerError>;
}

/// Acknowledges one delivery back to the broker
#[async_trait]
pub trait Acker: Send + Sync {
    async fn ack(&self) -> Result<(), BrokerError>;
}

/// One message received from a queue
pub struct Delivery {
    body: Vec<u8>,
    acker: Box<dyn Acker>,
}

impl Delivery {
    pub fn new(body: Vec<u8>, acker: Box<dyn Acker>) -> Self {
        Self { body, acker }
    }

    pub fn body(&self) -> &[u8] {
        &self.body
    }

    /// Acknowledge and consume the delivery, so it can only be acked once
    pub async fn ack(self) -> Result<(), BrokerError> {
        self.acker.ack().await
    }
}

impl fmt::Debug for Delivery {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Delivery").field("len", &self.body.len()).finish()
    }
}

/// Ordered stream of deliveries from one queue
pub struct DeliveryStream {
    rx: mpsc::UnboundedReceiver<Delivery>,
}

impl DeliveryStream {
    pub fn new(rx: mpsc::UnboundedReceiver<Delivery>) -> Self {
        Self { rx }
    }

    /// Next delivery, or None once the consumer is cancelled
    pub async fn next(&mut self) -> Option<Delivery> {
        self.rx.recv().await
    }
}

impl fmt::Debug for DeliveryStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeliveryStream").finish_non_exhaustive()
    }
}
