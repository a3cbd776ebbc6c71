//! hobbitcore - shared machinery for HOBBIT benchmark participants
//!
//! Both the system under test and the benchmark controller talk to the
//! platform over one message broker. They need the same plumbing: a
//! resilient connection, channels that are fully set up before the
//! participant announces itself, and a session-scoped binary command bus.
//!
//! # Modules
//!
//! - [`codec`] - Binary command envelope
//! - [`command`] - Known command ids and typed payloads
//! - [`broker`] - Broker seam, AMQP and in-memory implementations
//! - [`connection`] - Connection establishment with bounded retries
//! - [`orchestrator`] - Channel setup and the readiness barrier
//! - [`router`] - Session filtering and command dispatch
//! - [`worker`] - Bounded worker pool
//! - [`signal`] - Termination signal
//! - [`config`] - Experiment and process configuration

pub mod broker;
pub mod codec;
pub mod command;
pub mod config;
pub mod connection;
pub mod error;
pub mod logging;
pub mod orchestrator;
pub mod router;
pub mod signal;
pub mod worker;

pub use broker::{Channel, Connection, Connector, Delivery, DeliveryStream, ExchangeKind, MemoryBroker, QueueOptions};
#[cfg(feature = "amqp")]
pub use broker::AmqpConnector;
pub use codec::{CommandEnvelope, SessionId};
pub use command::{Command, CommandId};
pub use config::{BenchmarkConfig, Config, ExperimentConfig};
pub use connection::{ConnectionManager, RetryPolicy};
pub use error::{BrokerError, CommandError, ConnectError, DecodeError, PoolError, SetupError};
pub use orchestrator::{ChannelHandle, ChannelOrchestrator, ChannelReady, ChannelSet, ChannelSpec, ReadinessBarrier};
pub use router::{CommandRouter, Dispatch};
pub use signal::TerminationSignal;
pub use worker::WorkerPool;
