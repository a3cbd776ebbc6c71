//! Channel setup and the readiness barrier
//!
//! Each requested channel is opened independently and runs its own sequence
//! of awaited setup steps (declare, bind, consume). A channel signals the
//! barrier once, when its whole sequence is done. The participant waits on
//! the barrier, with a timeout, before announcing readiness.

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures::future::BoxFuture;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::broker::{Channel, Connection, DeliveryStream};
use crate::error::{BrokerError, SetupError};

/// What a channel's setup hands back once it is done
#[derive(Debug, Default)]
pub struct ChannelReady {
    consumers: HashMap<String, DeliveryStream>,
}

impl ChannelReady {
    pub fn new() -> Self {
        Self::default()
    }

    /// Attach a delivery stream under a label the owner will ask for later
    pub fn with_consumer(mut self, label: impl Into<String>, stream: DeliveryStream) -> Self {
        self.consumers.insert(label.into(), stream);
        self
    }
}

type SetupFn = Box<dyn FnOnce(Arc<dyn Channel>) -> BoxFuture<'static, Result<ChannelReady, BrokerError>> + Send>;

/// A channel to open and the routine that prepares it
pub struct ChannelSpec {
    name: String,
    setup: SetupFn,
}

impl ChannelSpec {
    pub fn new<F, Fut>(name: impl Into<String>, setup: F) -> Self
    where
        F: FnOnce(Arc<dyn Channel>) -> Fut + Send + 'static,
        Fut: Future<Output = Result<ChannelReady, BrokerError>> + Send + 'static,
    {
        Self {
            name: name.into(),
            setup: Box::new(move |channel| Box::pin(setup(channel))),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

impl fmt::Debug for ChannelSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChannelSpec").field("name", &self.name).finish()
    }
}

/// A named channel that finished its setup
pub struct ChannelHandle {
    name: String,
    channel: Arc<dyn Channel>,
    consumers: HashMap<String, DeliveryStream>,
}

impl ChannelHandle {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn channel(&self) -> Arc<dyn Channel> {
        self.channel.clone()
    }

    /// Take a delivery stream registered during setup
    pub fn take_consumer(&mut self, label: &str) -> Result<DeliveryStream, SetupError> {
        self.consumers
            .remove(label)
            .ok_or_else(|| SetupError::MissingChannel(format!("{}/{}", self.name, label)))
    }
}

impl fmt::Debug for ChannelHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChannelHandle")
            .field("name", &self.name)
            .field("consumers", &self.consumers.keys().collect::<Vec<_>>())
            .finish()
    }
}

/// Every channel of a satisfied barrier, by name
#[derive(Debug, Default)]
pub struct ChannelSet {
    handles: HashMap<String, ChannelHandle>,
}

impl ChannelSet {
    pub fn take(&mut self, name: &str) -> Result<ChannelHandle, SetupError> {
        self.handles
            .remove(name)
            .ok_or_else(|| SetupError::MissingChannel(name.to_string()))
    }

    pub fn len(&self) -> usize {
        self.handles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handles.is_empty()
    }
}

/// Observable state of a readiness barrier
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BarrierState {
    /// Waiting; holds the number of channels ready so far
    Pending(usize),
    Satisfied,
    Failed(String),
}

/// One-shot barrier over N channel setups
pub struct ReadinessBarrier {
    expected: usize,
    state: watch::Sender<BarrierState>,
    ready: Mutex<HashMap<String, ChannelHandle>>,
    failure: Mutex<Option<SetupError>>,
}

impl ReadinessBarrier {
    pub fn new(expected: usize) -> Self {
        debug!(expected, "ReadinessBarrier::new: called");
        let initial = if expected == 0 {
            BarrierState::Satisfied
        } else {
            BarrierState::Pending(0)
        };
        let (state, _) = watch::channel(initial);
        Self {
            expected,
            state,
            ready: Mutex::new(HashMap::new()),
            failure: Mutex::new(None),
        }
    }

    pub fn expected(&self) -> usize {
        self.expected
    }

    pub fn state(&self) -> BarrierState {
        self.state.borrow().clone()
    }

    /// Record one channel as ready
    ///
    /// A repeated name, or any signal after the barrier resolved, is ignored.
    /// Returns true only for the signal that satisfies the barrier.
    pub fn signal(&self, handle: ChannelHandle) -> bool {
        let mut ready = self.ready.lock().unwrap_or_else(|p| p.into_inner());
        if !matches!(*self.state.borrow(), BarrierState::Pending(_)) {
            debug!(channel = %handle.name, "ReadinessBarrier::signal: already resolved, ignoring");
            return false;
        }
        if ready.contains_key(&handle.name) {
            warn!(channel = %handle.name, "Channel signalled readiness twice");
            return false;
        }

        info!(channel = %handle.name, "Channel is set up");
        ready.insert(handle.name.clone(), handle);
        let count = ready.len();
        let satisfied = count >= self.expected;
        self.state.send_replace(if satisfied {
            BarrierState::Satisfied
        } else {
            BarrierState::Pending(count)
        });
        satisfied
    }

    /// Resolve the barrier as failed; no effect once resolved
    pub fn fail(&self, error: SetupError) {
        let _ready = self.ready.lock().unwrap_or_else(|p| p.into_inner());
        if !matches!(*self.state.borrow(), BarrierState::Pending(_)) {
            return;
        }
        warn!(error = %error, "Channel setup failed");
        let reason = error.to_string();
        *self.failure.lock().unwrap_or_else(|p| p.into_inner()) = Some(error);
        self.state.send_replace(BarrierState::Failed(reason));
    }

    /// Wait for every channel, at most `timeout`
    ///
    /// Safe to call from any task. The channels are handed out once; a
    /// second successful wait reports [`SetupError::AlreadyConsumed`].
    pub async fn wait(&self, timeout: Duration) -> Result<ChannelSet, SetupError> {
        debug!(?timeout, expected = self.expected, "ReadinessBarrier::wait: called");
        let mut rx = self.state.subscribe();
        let resolved = tokio::time::timeout(timeout, async {
            rx.wait_for(|s| !matches!(s, BarrierState::Pending(_)))
                .await
                .map(|state| state.clone())
        })
        .await;

        match resolved {
            Err(_) => {
                let ready = match self.state() {
                    BarrierState::Pending(n) => n,
                    _ => self.ready.lock().unwrap_or_else(|p| p.into_inner()).len(),
                };
                let error = SetupError::Timeout {
                    timeout,
                    ready,
                    expected: self.expected,
                };
                self.fail(SetupError::Timeout {
                    timeout,
                    ready,
                    expected: self.expected,
                });
                Err(error)
            }
            Ok(Err(_)) => Err(SetupError::ConnectionFailed),
            Ok(Ok(state)) => match state {
                BarrierState::Satisfied => {
                    let mut ready = self.ready.lock().unwrap_or_else(|p| p.into_inner());
                    if ready.is_empty() && self.expected > 0 {
                        return Err(SetupError::AlreadyConsumed);
                    }
                    Ok(ChannelSet {
                        handles: std::mem::take(&mut *ready),
                    })
                }
                BarrierState::Failed(reason) => {
                    let failure = self.failure.lock().unwrap_or_else(|p| p.into_inner()).take();
                    Err(failure.unwrap_or(SetupError::ChannelFailed {
                        channel: "unknown".to_string(),
                        source: BrokerError::Transport(reason),
                    }))
                }
                BarrierState::Pending(_) => Err(SetupError::ConnectionFailed),
            },
        }
    }
}

/// Opens channels on a live connection and tracks their readiness
pub struct ChannelOrchestrator;

impl ChannelOrchestrator {
    /// Start every spec's setup concurrently and return the barrier tracking them
    pub fn open(connection: &Arc<dyn Connection>, specs: Vec<ChannelSpec>) -> Arc<ReadinessBarrier> {
        debug!(count = specs.len(), "ChannelOrchestrator::open: called");
        let barrier = Arc::new(ReadinessBarrier::new(specs.len()));

        // A repeated name would be signalled once and leave the barrier short
        let mut names = HashSet::new();
        if let Some(spec) = specs.iter().find(|spec| !names.insert(spec.name.as_str())) {
            barrier.fail(SetupError::DuplicateChannel(spec.name.clone()));
            return barrier;
        }

        if !connection.is_open() {
            barrier.fail(SetupError::ConnectionFailed);
            return barrier;
        }

        for spec in specs {
            let connection = connection.clone();
            let barrier = barrier.clone();
            tokio::spawn(async move {
                let ChannelSpec { name, setup } = spec;
                debug!(channel = %name, "ChannelOrchestrator::open: setting up channel");
                let outcome = match connection.open_channel().await {
                    Ok(channel) => setup(channel.clone()).await.map(|ready| (channel, ready)),
                    Err(e) => Err(e),
                };
                match outcome {
                    Ok((channel, ready)) => {
                        barrier.signal(ChannelHandle {
                            name,
                            channel,
                            consumers: ready.consumers,
                        });
                    }
                    Err(source) => barrier.fail(SetupError::ChannelFailed { channel: name, source }),
                }
            });
        }

        barrier
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broker::{Connector, MemoryBroker, QueueOptions};

    async fn connection(broker: &MemoryBroker) -> Arc<dyn Connection> {
        broker.connect("memory").await.unwrap()
    }

    fn handle(name: &str, channel: Arc<dyn Channel>) -> ChannelHandle {
        ChannelHandle {
            name: name.to_string(),
            channel,
            consumers: HashMap::new(),
        }
    }

    #[tokio::test]
    async fn test_satisfied_after_exactly_n_distinct_signals() {
        let broker = MemoryBroker::new();
        let conn = connection(&broker).await;
        let ch = conn.open_channel().await.unwrap();
        let barrier = ReadinessBarrier::new(3);

        assert!(!barrier.signal(handle("a", ch.clone())));
        assert!(!barrier.signal(handle("a", ch.clone())));
        assert_eq!(barrier.state(), BarrierState::Pending(1));
        assert!(!barrier.signal(handle("b", ch.clone())));
        assert!(barrier.signal(handle("c", ch.clone())));
        assert_eq!(barrier.state(), BarrierState::Satisfied);

        // Never fires twice
        assert!(!barrier.signal(handle("d", ch.clone())));
        let set = barrier.wait(Duration::from_millis(10)).await.unwrap();
        assert_eq!(set.len(), 3);
    }

    #[tokio::test]
    async fn test_times_out_with_fewer_signals() {
        let broker = MemoryBroker::new();
        let conn = connection(&broker).await;
        let ch = conn.open_channel().await.unwrap();
        let barrier = ReadinessBarrier::new(2);
        barrier.signal(handle("a", ch.clone()));

        let err = barrier.wait(Duration::from_millis(20)).await.unwrap_err();
        assert!(matches!(err, SetupError::Timeout { ready: 1, expected: 2, .. }));
        assert!(matches!(barrier.state(), BarrierState::Failed(_)));

        // A late signal does not resurrect it
        assert!(!barrier.signal(handle("b", ch)));
    }

    #[tokio::test]
    async fn test_failure_is_reported_to_waiter() {
        let barrier = ReadinessBarrier::new(2);
        barrier.fail(SetupError::ConnectionFailed);
        let err = barrier.wait(Duration::from_secs(1)).await.unwrap_err();
        assert!(matches!(err, SetupError::ConnectionFailed));
    }

    #[tokio::test]
    async fn test_consumed_once() {
        let broker = MemoryBroker::new();
        let conn = connection(&broker).await;
        let ch = conn.open_channel().await.unwrap();
        let barrier = ReadinessBarrier::new(1);
        barrier.signal(handle("a", ch));

        assert!(barrier.wait(Duration::from_millis(10)).await.is_ok());
        assert!(matches!(
            barrier.wait(Duration::from_millis(10)).await,
            Err(SetupError::AlreadyConsumed)
        ));
    }

    #[tokio::test]
    async fn test_wait_from_another_task() {
        let broker = MemoryBroker::new();
        let conn = connection(&broker).await;
        let ch = conn.open_channel().await.unwrap();
        let barrier = Arc::new(ReadinessBarrier::new(1));

        let waiter = {
            let barrier = barrier.clone();
            tokio::spawn(async move { barrier.wait(Duration::from_secs(1)).await.map(|s| s.len()) })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;
        barrier.signal(handle("late", ch));

        assert_eq!(waiter.await.unwrap().unwrap(), 1);
    }

    #[tokio::test]
    async fn test_orchestrator_runs_every_setup() {
        let broker = MemoryBroker::new();
        let conn = connection(&broker).await;

        let specs = vec![
            ChannelSpec::new("receive", |channel: Arc<dyn Channel>| async move {
                let queue = channel.declare_queue("train", QueueOptions::auto_delete()).await?;
                let stream = channel.consume(&queue).await?;
                Ok::<_, BrokerError>(ChannelReady::new().with_consumer("train", stream))
            }),
            ChannelSpec::new("send", |channel: Arc<dyn Channel>| async move {
                channel.declare_queue("answers", QueueOptions::auto_delete()).await?;
                Ok::<_, BrokerError>(ChannelReady::new())
            }),
        ];

        let barrier = ChannelOrchestrator::open(&conn, specs);
        let mut set = barrier.wait(Duration::from_secs(1)).await.unwrap();
        assert!(broker.has_queue("train"));
        assert!(broker.has_queue("answers"));

        let mut receive = set.take("receive").unwrap();
        let mut stream = receive.take_consumer("train").unwrap();
        let send = set.take("send").unwrap();
        send.channel().publish("", "train", b"rows").await.unwrap();
        assert_eq!(stream.next().await.unwrap().body(), b"rows");
        assert!(set.take("send").is_err());
    }

    #[tokio::test]
    async fn test_orchestrator_reports_failed_step() {
        let broker = MemoryBroker::new();
        let conn = connection(&broker).await;

        let specs = vec![ChannelSpec::new("bind", |channel: Arc<dyn Channel>| async move {
            channel.bind_queue("missing", "hobbit.command").await?;
            Ok::<_, BrokerError>(ChannelReady::new())
        })];

        let barrier = ChannelOrchestrator::open(&conn, specs);
        let err = barrier.wait(Duration::from_secs(1)).await.unwrap_err();
        assert!(matches!(err, SetupError::ChannelFailed { ref channel, .. } if channel == "bind"));
    }

    #[tokio::test]
    async fn test_orchestrator_fails_on_closed_connection() {
        let broker = MemoryBroker::new();
        let conn = connection(&broker).await;
        conn.close().await.unwrap();

        let specs = vec![ChannelSpec::new("any", |_channel: Arc<dyn Channel>| async move {
            Ok::<_, BrokerError>(ChannelReady::new())
        })];
        let barrier = ChannelOrchestrator::open(&conn, specs);
        assert!(matches!(
            barrier.wait(Duration::from_secs(1)).await,
            Err(SetupError::ConnectionFailed)
        ));
    }

    #[tokio::test]
    async fn test_orchestrator_rejects_duplicate_names() {
        let broker = MemoryBroker::new();
        let conn = connection(&broker).await;

        let spec = || {
            ChannelSpec::new("dup", |_channel: Arc<dyn Channel>| async move {
                Ok::<_, BrokerError>(ChannelReady::new())
            })
        };
        let barrier = ChannelOrchestrator::open(&conn, vec![spec(), spec()]);

        let started = std::time::Instant::now();
        let outcome = barrier.wait(Duration::from_secs(5)).await;
        assert!(matches!(outcome, Err(SetupError::DuplicateChannel(ref name)) if name == "dup"));
        assert!(started.elapsed() < Duration::from_secs(1));
    }
}
