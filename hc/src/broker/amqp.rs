//! RabbitMQ implementation of the broker seam, backed by lapin

use std::sync::Arc;

use async_trait::async_trait;
use futures::StreamExt;
use lapin::options::{
    BasicAckOptions, BasicConsumeOptions, BasicPublishOptions, ExchangeDeclareOptions, QueueBindOptions,
    QueueDeclareOptions,
};
use lapin::types::FieldTable;
use lapin::{BasicProperties, ConnectionProperties};
use tokio::sync::mpsc;
use tracing::{debug, warn};
use uuid::Uuid;

use super::{Acker, Channel, Connection, Connector, Delivery, DeliveryStream, ExchangeKind, QueueOptions};
use crate::error::BrokerError;

/// Connects to RabbitMQ over AMQP 0-9-1
#[derive(Debug, Clone, Default)]
pub struct AmqpConnector;

impl AmqpConnector {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Connector for AmqpConnector {
    async fn connect(&self, address: &str) -> Result<Arc<dyn Connection>, BrokerError> {
        debug!(%address, "AmqpConnector::connect: called");
        let conn = lapin::Connection::connect(address, ConnectionProperties::default())
            .await
            .map_err(|e| BrokerError::ConnectionRefused {
                address: address.to_string(),
                reason: e.to_string(),
            })?;
        Ok(Arc::new(AmqpConnection { conn }))
    }
}

struct AmqpConnection {
    conn: lapin::Connection,
}

#[async_trait]
impl Connection for AmqpConnection {
    async fn open_channel(&self) -> Result<Arc<dyn Channel>, BrokerError> {
        let channel = self.conn.create_channel().await.map_err(BrokerError::transport)?;
        debug!(id = channel.id(), "AmqpConnection::open_channel: opened");
        Ok(Arc::new(AmqpChannel { channel }))
    }

    fn is_open(&self) -> bool {
        self.conn.status().connected()
    }

    async fn close(&self) -> Result<(), BrokerError> {
        debug!("AmqpConnection::close: called");
        self.conn.close(200, "OK").await.map_err(BrokerError::transport)
    }
}

struct AmqpChannel {
    channel: lapin::Channel,
}

#[async_trait]
impl Channel for AmqpChannel {
    async fn declare_exchange(&self, name: &str, kind: ExchangeKind, auto_delete: bool) -> Result<(), BrokerError> {
        debug!(%name, ?kind, auto_delete, "AmqpChannel::declare_exchange: called");
        let kind = match kind {
            ExchangeKind::Fanout => lapin::ExchangeKind::Fanout,
            ExchangeKind::Direct => lapin::ExchangeKind::Direct,
        };
        let options = ExchangeDeclareOptions {
            auto_delete,
            ..Default::default()
        };
        self.channel
            .exchange_declare(name, kind, options, FieldTable::default())
            .await
            .map_err(BrokerError::transport)
    }

    async fn declare_queue(&self, name: &str, options: QueueOptions) -> Result<String, BrokerError> {
        debug!(%name, ?options, "AmqpChannel::declare_queue: called");
        let declare = QueueDeclareOptions {
            exclusive: options.exclusive,
            auto_delete: options.auto_delete,
            durable: options.durable,
            ..Default::default()
        };
        let queue = self
            .channel
            .queue_declare(name, declare, FieldTable::default())
            .await
            .map_err(BrokerError::transport)?;
        Ok(queue.name().as_str().to_string())
    }

    async fn bind_queue(&self, queue: &str, exchange: &str) -> Result<(), BrokerError> {
        debug!(%queue, %exchange, "AmqpChannel::bind_queue: called");
        self.channel
            .queue_bind(queue, exchange, "", QueueBindOptions::default(), FieldTable::default())
            .await
            .map_err(BrokerError::transport)
    }

    async fn consume(&self, queue: &str) -> Result<DeliveryStream, BrokerError> {
        let tag = format!("hobbit-{}", Uuid::now_v7());
        debug!(%queue, %tag, "AmqpChannel::consume: called");
        let mut consumer = self
            .channel
            .basic_consume(queue, &tag, BasicConsumeOptions::default(), FieldTable::default())
            .await
            .map_err(BrokerError::transport)?;

        let (tx, rx) = mpsc::unbounded_channel();
        let queue = queue.to_string();
        tokio::spawn(async move {
            while let Some(next) = consumer.next().await {
                match next {
                    Ok(delivery) => {
                        let lapin::message::Delivery { data, acker, .. } = delivery;
                        if tx.send(Delivery::new(data, Box::new(AmqpAcker { acker }))).is_err() {
                            debug!(%queue, "AmqpChannel::consume: receiver dropped, stopping");
                            break;
                        }
                    }
                    Err(e) => {
                        warn!(%queue, error = %e, "Consumer stream failed");
                        break;
                    }
                }
            }
        });

        Ok(DeliveryStream::new(rx))
    }

    async fn publish(&self, exchange: &str, routing_key: &str, body: &[u8]) -> Result<(), BrokerError> {
        debug!(%exchange, %routing_key, len = body.len(), "AmqpChannel::publish: called");
        self.channel
            .basic_publish(
                exchange,
                routing_key,
                BasicPublishOptions::default(),
                body,
                BasicProperties::default(),
            )
            .await
            .map_err(BrokerError::transport)?
            .await
            .map_err(BrokerError::transport)?;
        Ok(())
    }
}

struct AmqpAcker {
    acker: lapin::acker::Acker,
}

#[async_trait]
impl Acker for AmqpAcker {
    async fn ack(&self) -> Result<(), BrokerError> {
        self.acker
            .ack(BasicAckOptions::default())
            .await
            .map_err(BrokerError::transport)
    }
}
