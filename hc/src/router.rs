//! Session-scoped command dispatch over the shared control exchange

use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures::FutureExt;
use futures::future::BoxFuture;
use tracing::{debug, error, info, warn};

use crate::broker::{Channel, Delivery, DeliveryStream};
use crate::codec::{CommandEnvelope, SessionId};
use crate::command::{Command, CommandId};
use crate::config::COMMAND_EXCHANGE;
use crate::error::{CommandError, DecodeError};

/// Future returned by a command handler
pub type HandlerFuture = BoxFuture<'static, eyre::Result<()>>;

type Handler = Arc<dyn Fn(Command) -> HandlerFuture + Send + Sync>;

/// What happened to one inbound control message
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Dispatch {
    Handled(CommandId),
    /// Addressed to another session
    Foreign,
    Malformed(DecodeError),
    Unknown(u8),
    /// Known id with no registered handler
    Unhandled(CommandId),
    InvalidPayload(CommandError),
    HandlerFailed(CommandId),
}

/// Builds a [`CommandRouter`] with its handler table
pub struct CommandRouterBuilder {
    session_id: SessionId,
    publisher: Arc<dyn Channel>,
    handlers: HashMap<CommandId, Handler>,
}

impl CommandRouterBuilder {
    /// Associate a handler with a command id, replacing any earlier one
    pub fn register_handler<F, Fut>(mut self, id: CommandId, handler: F) -> Self
    where
        F: Fn(Command) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = eyre::Result<()>> + Send + 'static,
    {
        debug!(command = %id, "CommandRouterBuilder::register_handler: called");
        self.handlers.insert(id, Arc::new(move |command| Box::pin(handler(command))));
        self
    }

    pub fn build(self) -> Arc<CommandRouter> {
        Arc::new(CommandRouter {
            session_id: self.session_id,
            publisher: self.publisher,
            handlers: self.handlers,
        })
    }
}

/// Filters control messages by session and hands known commands to handlers
pub struct CommandRouter {
    session_id: SessionId,
    publisher: Arc<dyn Channel>,
    handlers: HashMap<CommandId, Handler>,
}

impl CommandRouter {
    pub fn builder(session_id: SessionId, publisher: Arc<dyn Channel>) -> CommandRouterBuilder {
        CommandRouterBuilder {
            session_id,
            publisher,
            handlers: HashMap::new(),
        }
    }

    pub fn session_id(&self) -> &SessionId {
        &self.session_id
    }

    /// Decode and dispatch one raw envelope
    ///
    /// Never fails: every problem is logged and reported as a [`Dispatch`].
    pub async fn on_envelope(&self, raw: &[u8]) -> Dispatch {
        let envelope = match CommandEnvelope::decode(raw) {
            Ok(envelope) => envelope,
            Err(e) => {
                warn!(error = %e, len = raw.len(), "Dropping malformed command envelope");
                return Dispatch::Malformed(e);
            }
        };

        if !envelope.is_for(&self.session_id) {
            debug!(session = %envelope.session_id(), "CommandRouter::on_envelope: foreign session, ignoring");
            return Dispatch::Foreign;
        }

        let id = match CommandId::try_from(envelope.command_id()) {
            Ok(id) => id,
            Err(_) => {
                info!(command_id = envelope.command_id(), "Ignoring unknown command");
                return Dispatch::Unknown(envelope.command_id());
            }
        };

        let Some(handler) = self.handlers.get(&id) else {
            debug!(command = %id, "CommandRouter::on_envelope: no handler registered");
            return Dispatch::Unhandled(id);
        };

        let command = match Command::decode(id, envelope.payload()) {
            Ok(command) => command,
            Err(e) => {
                warn!(command = %id, error = %e, "Dropping command with invalid payload");
                return Dispatch::InvalidPayload(e);
            }
        };

        debug!(command = %id, "CommandRouter::on_envelope: dispatching");
        match AssertUnwindSafe(handler(command)).catch_unwind().await {
            Ok(Ok(())) => Dispatch::Handled(id),
            Ok(Err(e)) => {
                error!(command = %id, error = ?e, "Command handler failed");
                Dispatch::HandlerFailed(id)
            }
            Err(_) => {
                error!(command = %id, "Command handler panicked");
                Dispatch::HandlerFailed(id)
            }
        }
    }

    /// Dispatch a delivery, then acknowledge it whatever the outcome
    pub async fn on_delivery(&self, delivery: Delivery) -> Dispatch {
        let outcome = self.on_envelope(delivery.body()).await;
        if let Err(e) = delivery.ack().await {
            warn!(error = %e, "Failed to acknowledge command message");
        }
        outcome
    }

    /// Receive loop; returns when the consumer is cancelled
    pub async fn run(self: Arc<Self>, mut deliveries: DeliveryStream) {
        debug!(session = %self.session_id, "CommandRouter::run: called");
        while let Some(delivery) = deliveries.next().await {
            self.on_delivery(delivery).await;
        }
        debug!(session = %self.session_id, "CommandRouter::run: command stream ended");
    }

    /// Publish a command for this session on the control exchange
    ///
    /// Failures are logged; returns whether the publish went through.
    pub async fn send_command(&self, command: Command) -> bool {
        let id = command.id();
        let envelope = CommandEnvelope::new(self.session_id.as_str(), id.as_u8(), command.payload());
        match self.publisher.publish(COMMAND_EXCHANGE, "", &envelope.encode()).await {
            Ok(()) => {
                info!(command = %id, "Sent command");
                true
            }
            Err(e) => {
                error!(command = %id, error = %e, "Failed to send command");
                false
            }
        }
    }
}
