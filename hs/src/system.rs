//! System role lifecycle
//!
//! `Connecting -> SettingUp -> Ready -> Terminating -> Closed`. While Ready,
//! training and serving run concurrently on the worker pool, triggered by
//! messages on the session's train and task queues.

use std::sync::{Arc, RwLock};

use hobbitcore::config::{COMMAND_EXCHANGE, Config, ExperimentConfig};
use hobbitcore::{
    BrokerError, Channel, ChannelOrchestrator, ChannelReady, ChannelSpec, Command, CommandId, CommandRouter, Connection,
    ConnectionManager, Connector, DeliveryStream, ExchangeKind, QueueOptions, RetryPolicy, TerminationSignal,
    WorkerPool,
};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::error::SystemError;
use crate::predictor::{BaselinePredictor, answer_message, parse_task};

pub const COMMAND_CHANNEL: &str = "command";
pub const TRAIN_CHANNEL: &str = "train-receive";
pub const TASK_CHANNEL: &str = "task-receive";
pub const ANSWER_CHANNEL: &str = "answer-send";

/// Lifecycle states of the system role
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SystemState {
    Connecting,
    SettingUp,
    Ready,
    Terminating,
    Closed,
}

/// The system under test: learns a baseline and answers tasks with it
pub struct SystemAdapter {
    experiment: ExperimentConfig,
    config: Config,
    connector: Arc<dyn Connector>,
    state: watch::Sender<SystemState>,
}

impl SystemAdapter {
    pub fn new(experiment: ExperimentConfig, config: Config, connector: Arc<dyn Connector>) -> Self {
        debug!(session = %experiment.session_id, "SystemAdapter::new: called");
        let (state, _) = watch::channel(SystemState::Connecting);
        Self {
            experiment,
            config,
            connector,
            state,
        }
    }

    /// Follow lifecycle transitions
    pub fn subscribe(&self) -> watch::Receiver<SystemState> {
        self.state.subscribe()
    }

    fn transition(&self, next: SystemState) {
        let previous = self.state.send_replace(next);
        info!(?previous, ?next, "System state changed");
    }

    /// Run the whole lifecycle until the session's termination command
    pub async fn run(self) -> Result<(), SystemError> {
        self.transition(SystemState::Connecting);
        let manager = ConnectionManager::new(self.connector.clone(), RetryPolicy::from(&self.config.connection));
        let connection = manager.connect(&self.experiment.broker_address()).await?;

        let result = self.serve(&connection).await;
        if let Err(e) = &result {
            error!(error = %e, "System failed");
        }

        if let Err(e) = connection.close().await {
            debug!(error = %e, "SystemAdapter::run: close failed, ignoring");
        }
        self.transition(SystemState::Closed);
        result
    }

    async fn serve(&self, connection: &Arc<dyn Connection>) -> Result<(), SystemError> {
        self.transition(SystemState::SettingUp);
        let barrier = ChannelOrchestrator::open(connection, self.channel_specs());
        let mut channels = barrier.wait(self.config.setup.timeout()).await?;

        let mut command = channels.take(COMMAND_CHANNEL)?;
        let mut train = channels.take(TRAIN_CHANNEL)?;
        let mut task = channels.take(TASK_CHANNEL)?;
        let answer = channels.take(ANSWER_CHANNEL)?;
        info!("Communication is set up");

        let termination = TerminationSignal::new();
        let router = CommandRouter::builder(self.experiment.session_id.clone(), command.channel())
            .register_handler(CommandId::TaskGenerationFinished, {
                let termination = termination.clone();
                move |_command| {
                    let termination = termination.clone();
                    async move {
                        info!("Task generation finished, terminating");
                        termination.trigger();
                        Ok::<(), eyre::Report>(())
                    }
                }
            })
            .build();

        let pool = Arc::new(WorkerPool::from_config("system", &self.config.workers));
        let predictor = Arc::new(RwLock::new(BaselinePredictor::new()));

        let loops: Vec<JoinHandle<()>> = vec![
            tokio::spawn(router.clone().run(command.take_consumer(COMMAND_CHANNEL)?)),
            tokio::spawn(train_loop(
                train.take_consumer(TRAIN_CHANNEL)?,
                pool.clone(),
                predictor.clone(),
                router.clone(),
            )),
            tokio::spawn(task_loop(
                task.take_consumer(TASK_CHANNEL)?,
                pool.clone(),
                predictor,
                answer.channel(),
                self.experiment.answer_queue(),
            )),
        ];

        self.transition(SystemState::Ready);
        router.send_command(Command::SystemReady).await;
        termination.wait().await;

        self.transition(SystemState::Terminating);
        for handle in loops {
            handle.abort();
            let _ = handle.await;
        }
        match Arc::try_unwrap(pool) {
            Ok(pool) => pool.shutdown().await,
            Err(_) => warn!("Worker pool still shared at shutdown"),
        }
        Ok(())
    }

    fn channel_specs(&self) -> Vec<ChannelSpec> {
        let train_queue = self.experiment.train_queue();
        let task_queue = self.experiment.task_queue();
        let answer_queue = self.experiment.answer_queue();

        vec![
            ChannelSpec::new(COMMAND_CHANNEL, |channel: Arc<dyn Channel>| async move {
                channel
                    .declare_exchange(COMMAND_EXCHANGE, ExchangeKind::Fanout, true)
                    .await?;
                let queue = channel.declare_queue("", QueueOptions::exclusive()).await?;
                channel.bind_queue(&queue, COMMAND_EXCHANGE).await?;
                let stream = channel.consume(&queue).await?;
                Ok::<_, BrokerError>(ChannelReady::new().with_consumer(COMMAND_CHANNEL, stream))
            }),
            ChannelSpec::new(TRAIN_CHANNEL, move |channel: Arc<dyn Channel>| async move {
                channel.declare_queue(&train_queue, QueueOptions::auto_delete()).await?;
                let stream = channel.consume(&train_queue).await?;
                Ok::<_, BrokerError>(ChannelReady::new().with_consumer(TRAIN_CHANNEL, stream))
            }),
            ChannelSpec::new(TASK_CHANNEL, move |channel: Arc<dyn Channel>| async move {
                channel.declare_queue(&task_queue, QueueOptions::auto_delete()).await?;
                let stream = channel.consume(&task_queue).await?;
                Ok::<_, BrokerError>(ChannelReady::new().with_consumer(TASK_CHANNEL, stream))
            }),
            ChannelSpec::new(ANSWER_CHANNEL, move |channel: Arc<dyn Channel>| async move {
                channel.declare_queue(&answer_queue, QueueOptions::auto_delete()).await?;
                Ok::<_, BrokerError>(ChannelReady::new())
            }),
        ]
    }
}

async fn train_loop(
    mut deliveries: DeliveryStream,
    pool: Arc<WorkerPool>,
    predictor: Arc<RwLock<BaselinePredictor>>,
    router: Arc<CommandRouter>,
) {
    while let Some(delivery) = deliveries.next().await {
        info!(len = delivery.body().len(), "Received training data");
        let data = String::from_utf8_lossy(delivery.body()).into_owned();
        if let Err(e) = delivery.ack().await {
            warn!(error = %e, "Failed to acknowledge training data");
        }

        let predictor = predictor.clone();
        let router = router.clone();
        let job = async move {
            let current = *predictor.read().unwrap_or_else(|p| p.into_inner());
            let trained = tokio::task::spawn_blocking(move || {
                let mut next = current;
                next.train(&data);
                next
            })
            .await;

            match trained {
                Ok(next) => {
                    *predictor.write().unwrap_or_else(|p| p.into_inner()) = next;
                    info!(prediction = next.prediction(), "Training finished");
                    router.send_command(Command::LearningFinished).await;
                }
                Err(e) => error!(error = %e, "Training job failed"),
            }
        };

        if let Err(e) = pool.submit(job).await {
            error!(error = %e, "Could not schedule training");
        }
    }
}

async fn task_loop(
    mut deliveries: DeliveryStream,
    pool: Arc<WorkerPool>,
    predictor: Arc<RwLock<BaselinePredictor>>,
    answers: Arc<dyn Channel>,
    answer_queue: String,
) {
    while let Some(delivery) = deliveries.next().await {
        let payload = String::from_utf8_lossy(delivery.body()).into_owned();
        if let Err(e) = delivery.ack().await {
            warn!(error = %e, "Failed to acknowledge task");
        }

        let predictor = predictor.clone();
        let answers = answers.clone();
        let answer_queue = answer_queue.clone();
        let job = async move {
            let current = *predictor.read().unwrap_or_else(|p| p.into_inner());
            let answered = tokio::task::spawn_blocking(move || {
                parse_task(&payload)
                    .map(|task| answer_message(&task.id, current.predict(&task)))
                    .map_err(|e| (e, payload))
            })
            .await;

            match answered {
                Ok(Ok(answer)) => {
                    debug!(%answer, "task_loop: publishing answer");
                    if let Err(e) = answers.publish("", &answer_queue, answer.as_bytes()).await {
                        error!(error = %e, "Failed to publish answer");
                    }
                }
                Ok(Err((e, payload))) => warn!(error = %e, %payload, "Error processing task"),
                Err(e) => error!(error = %e, "Task job failed"),
            }
        };

        if let Err(e) = pool.submit(job).await {
            error!(error = %e, "Could not schedule task");
        }
    }
}
