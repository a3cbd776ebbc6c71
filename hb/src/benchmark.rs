//! Benchmark controller lifecycle
//!
//! `Connecting -> SettingUp -> WaitingStart -> SendingTrain -> TaskLoop ->
//! Evaluating -> Done`. Commands and answers are funneled into one event queue
//! owned by the controller, and the outstanding task's deadline is polled next
//! to it, so the task pipeline has a single writer.

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use hobbitcore::config::{COMMAND_EXCHANGE, Config, ExperimentConfig};
use hobbitcore::{
    BrokerError, Channel, ChannelOrchestrator, ChannelReady, ChannelSpec, Command, CommandId, CommandRouter,
    Connection, ConnectionManager, Connector, DeliveryStream, ExchangeKind, QueueOptions, RetryPolicy,
};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::dataset::Dataset;
use crate::error::BenchmarkError;
use crate::pipeline::{AnswerOutcome, Evaluation, Progress, TaskPipeline, TaskSink};
use crate::result::ResultDocument;

const CONTROLLER_CHANNEL: &str = "controller";
const COMMAND_CONSUMER: &str = "command";
const ANSWER_CONSUMER: &str = "answer";

/// Lifecycle states of the controller
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BenchmarkState {
    Connecting,
    SettingUp,
    WaitingStart,
    SendingTrain,
    TaskLoop,
    Evaluating,
    Done,
}

/// Everything that can move the controller forward
#[derive(Debug)]
enum ControllerEvent {
    StartBenchmark { system_id: String },
    LearningFinished,
    Answer { body: Vec<u8>, received_at: Instant },
    TaskTimeout(usize),
}

/// Publishes tasks to the session's task queue
struct QueueSink {
    channel: Arc<dyn Channel>,
    queue: String,
}

#[async_trait]
impl TaskSink for QueueSink {
    async fn send_task(&mut self, id: usize, payload: &str) -> Result<(), BrokerError> {
        debug!(id, queue = %self.queue, "QueueSink::send_task: called");
        self.channel.publish("", &self.queue, payload.as_bytes()).await
    }
}

/// Drives the experiment: training data, paced tasks, KPIs
pub struct BenchmarkController {
    experiment: ExperimentConfig,
    config: Config,
    dataset: Dataset,
    connector: Arc<dyn Connector>,
    state: watch::Sender<BenchmarkState>,
}

impl BenchmarkController {
    pub fn new(experiment: ExperimentConfig, config: Config, dataset: Dataset, connector: Arc<dyn Connector>) -> Self {
        debug!(session = %experiment.session_id, "BenchmarkController::new: called");
        let (state, _) = watch::channel(BenchmarkState::Connecting);
        Self {
            experiment,
            config,
            dataset,
            connector,
            state,
        }
    }

    /// Follow lifecycle transitions
    pub fn subscribe(&self) -> watch::Receiver<BenchmarkState> {
        self.state.subscribe()
    }

    fn state(&self) -> BenchmarkState {
        *self.state.borrow()
    }

    fn transition(&self, next: BenchmarkState) {
        let previous = self.state.send_replace(next);
        info!(?previous, ?next, "Benchmark state changed");
    }

    /// Run the experiment to the end and return its evaluation
    pub async fn run(self) -> Result<Evaluation, BenchmarkError> {
        self.transition(BenchmarkState::Connecting);
        let manager = ConnectionManager::new(self.connector.clone(), RetryPolicy::from(&self.config.connection));
        let connection = manager.connect(&self.experiment.broker_address()).await?;

        let result = self.drive(&connection).await;
        if let Err(e) = &result {
            error!(error = %e, "Benchmark failed");
        }

        if let Err(e) = connection.close().await {
            debug!(error = %e, "BenchmarkController::run: close failed, ignoring");
        }
        self.transition(BenchmarkState::Done);
        result
    }

    async fn drive(&self, connection: &Arc<dyn Connection>) -> Result<Evaluation, BenchmarkError> {
        self.transition(BenchmarkState::SettingUp);
        let barrier = ChannelOrchestrator::open(connection, vec![self.setup_spec()]);
        let mut channels = barrier.wait(self.config.setup.timeout()).await?;
        let mut handle = channels.take(CONTROLLER_CHANNEL)?;
        let channel = handle.channel();

        let (events_tx, mut events_rx) = mpsc::unbounded_channel();
        let router = CommandRouter::builder(self.experiment.session_id.clone(), channel.clone())
            .register_handler(CommandId::StartBenchmark, {
                let events = events_tx.clone();
                move |command| {
                    let events = events.clone();
                    async move {
                        if let Command::StartBenchmark { system_id } = command {
                            events.send(ControllerEvent::StartBenchmark { system_id })?;
                        }
                        Ok::<(), eyre::Report>(())
                    }
                }
            })
            .register_handler(CommandId::LearningFinished, {
                let events = events_tx.clone();
                move |_command| {
                    let events = events.clone();
                    async move {
                        events.send(ControllerEvent::LearningFinished)?;
                        Ok::<(), eyre::Report>(())
                    }
                }
            })
            .build();

        let loops: Vec<JoinHandle<()>> = vec![
            tokio::spawn(router.clone().run(handle.take_consumer(COMMAND_CONSUMER)?)),
            tokio::spawn(forward_answers(handle.take_consumer(ANSWER_CONSUMER)?, events_tx.clone())),
        ];

        router.send_command(Command::BenchmarkReady).await;
        self.transition(BenchmarkState::WaitingStart);

        let mut pipeline = TaskPipeline::from_dataset(&self.dataset);
        let mut sink = QueueSink {
            channel: channel.clone(),
            queue: self.experiment.task_queue(),
        };

        let task_timeout = self.config.benchmark.task_timeout();
        let deadline = tokio::time::sleep(task_timeout);
        tokio::pin!(deadline);
        let mut armed: Option<usize> = None;

        loop {
            let event = tokio::select! {
                event = events_rx.recv() => match event {
                    Some(event) => event,
                    None => break,
                },
                () = &mut deadline, if armed.is_some() => match armed.take() {
                    Some(id) => ControllerEvent::TaskTimeout(id),
                    None => continue,
                },
            };

            let advance = match event {
                ControllerEvent::StartBenchmark { system_id } => {
                    if self.state() != BenchmarkState::WaitingStart {
                        warn!(%system_id, "Benchmark already started, ignoring START_BENCHMARK");
                        continue;
                    }
                    info!(%system_id, "Starting benchmark");
                    self.transition(BenchmarkState::SendingTrain);
                    self.send_training_data(channel.as_ref()).await;
                    false
                }
                ControllerEvent::LearningFinished => {
                    if self.state() == BenchmarkState::TaskLoop {
                        warn!("Task loop already running, ignoring LEARNING_FINISHED");
                        continue;
                    }
                    self.transition(BenchmarkState::TaskLoop);
                    true
                }
                ControllerEvent::Answer { body, received_at } => {
                    let body = String::from_utf8_lossy(&body);
                    match pipeline.record_answer(&body, received_at) {
                        AnswerOutcome::Recorded(id) => {
                            debug!(id, "BenchmarkController::drive: answer recorded");
                            armed = None;
                            true
                        }
                        AnswerOutcome::Malformed => {
                            armed = None;
                            true
                        }
                        AnswerOutcome::Stale(_) => false,
                    }
                }
                ControllerEvent::TaskTimeout(id) => pipeline.expire(id),
            };

            if !advance || self.state() != BenchmarkState::TaskLoop {
                continue;
            }
            match pipeline.send_next_task(&mut sink).await {
                Progress::Sent(id) => {
                    deadline.as_mut().reset(tokio::time::Instant::now() + task_timeout);
                    armed = Some(id);
                }
                Progress::Busy(_) => {}
                Progress::Finished => break,
            }
        }

        self.transition(BenchmarkState::Evaluating);
        router.send_command(Command::TaskGenerationFinished).await;
        let evaluation = pipeline.evaluate();
        info!(
            test_data_size = evaluation.test_data_size,
            errors = evaluation.error_count,
            runtime_avg = evaluation.runtime_avg,
            runtime_std_dev = evaluation.runtime_std_dev,
            "Evaluation done"
        );

        let document = ResultDocument::from_evaluation(
            self.experiment.experiment_uri.clone(),
            &self.config.benchmark.namespace,
            &evaluation,
        );
        router
            .send_command(Command::BenchmarkFinished {
                result: document.to_json_ld(),
            })
            .await;

        // Exiting right away looks like a crash to the platform
        tokio::time::sleep(self.config.benchmark.grace_period()).await;

        for handle in loops {
            handle.abort();
            let _ = handle.await;
        }
        Ok(evaluation)
    }

    async fn send_training_data(&self, channel: &dyn Channel) {
        let message = self.dataset.training_message();
        info!(rows = self.dataset.train().len(), "Sending training data");
        if let Err(e) = channel
            .publish("", &self.experiment.train_queue(), message.as_bytes())
            .await
        {
            error!(error = %e, "Failed to send training data");
        }
    }

    /// Ordered declarations, each awaiting the previous one
    fn setup_spec(&self) -> ChannelSpec {
        let task_queue = self.experiment.task_queue();
        let answer_queue = self.experiment.answer_queue();
        let train_queue = self.experiment.train_queue();

        ChannelSpec::new(CONTROLLER_CHANNEL, move |channel: Arc<dyn Channel>| async move {
            debug!("setup step 1: command exchange and queue");
            channel
                .declare_exchange(COMMAND_EXCHANGE, ExchangeKind::Fanout, true)
                .await?;
            let command_queue = channel.declare_queue("", QueueOptions::exclusive()).await?;

            debug!("setup step 2: bind and consume commands, declare task queue");
            channel.bind_queue(&command_queue, COMMAND_EXCHANGE).await?;
            let commands = channel.consume(&command_queue).await?;
            channel.declare_queue(&task_queue, QueueOptions::auto_delete()).await?;

            debug!("setup step 3: answer queue");
            channel.declare_queue(&answer_queue, QueueOptions::auto_delete()).await?;

            debug!("setup step 4: consume answers, declare train queue");
            let answers = channel.consume(&answer_queue).await?;
            channel.declare_queue(&train_queue, QueueOptions::auto_delete()).await?;

            debug!("setup step 5: done");
            Ok::<_, BrokerError>(
                ChannelReady::new()
                    .with_consumer(COMMAND_CONSUMER, commands)
                    .with_consumer(ANSWER_CONSUMER, answers),
            )
        })
    }
}

/// Timestamp answers on arrival and hand them to the controller
async fn forward_answers(mut deliveries: DeliveryStream, events: mpsc::UnboundedSender<ControllerEvent>) {
    while let Some(delivery) = deliveries.next().await {
        let received_at = Instant::now();
        let body = delivery.body().to_vec();
        if let Err(e) = delivery.ack().await {
            warn!(error = %e, "Failed to acknowledge answer");
        }
        if events.send(ControllerEvent::Answer { body, received_at }).is_err() {
            break;
        }
    }
}
