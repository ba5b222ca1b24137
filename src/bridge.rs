//! Bridge between the engine and its producer.
//!
//! The producer ([`Generator`]) lives on a dedicated worker thread and talks
//! to the bridge through channels only. Every stream gets its own generation
//! number, its own cancellation flag and its own pump task, which decodes raw
//! chunks and feeds them to that stream's ring. At most one stream is active
//! per bridge: starting a new one cancels the previous one first.

use crate::{
    buffer::{ChunkProducer, PushError},
    codec::{self, ChannelPair},
    config::EngineConfig,
    error::{EngineError, Result},
    sequence::{Sequence, SequenceFormat},
    sources::{BuildInfo, Generator},
};
use futures::future::{self, BoxFuture, FutureExt};
use parking_lot::Mutex;
use std::{
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    thread::JoinHandle,
    time::Duration,
};
use tokio::sync::{mpsc, oneshot};

/// Builds a fresh producer each time a bridge starts its worker.
pub type GeneratorFactory = Arc<dyn Fn() -> Box<dyn Generator> + Send + Sync>;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BridgeState {
    Uninitialized,
    Initializing,
    Ready,
    Streaming,
    StreamDone,
    StreamFailed,
}

impl BridgeState {
    /// Whether the handshake has completed.
    pub fn is_ready(&self) -> bool {
        matches!(
            self,
            BridgeState::Ready
                | BridgeState::Streaming
                | BridgeState::StreamDone
                | BridgeState::StreamFailed
        )
    }
}

/// Returned by [`ChunkSink::emit`] once the stream was stopped.
#[derive(thiserror::Error, Debug)]
#[error("Stream was cancelled")]
pub struct StreamCancelled;

enum StreamMessage {
    Chunk(Vec<u8>),
    Done,
    Error(String),
}

/// Producer-side handle for emitting PCM chunks of one stream.
pub struct ChunkSink {
    tx: mpsc::Sender<StreamMessage>,
    cancelled: Arc<AtomicBool>,
}

impl ChunkSink {
    /// Hands one raw chunk to the bridge, blocking while the bridge is behind.
    pub fn emit(&mut self, chunk: Vec<u8>) -> std::result::Result<(), StreamCancelled> {
        if self.is_cancelled() {
            return Err(StreamCancelled);
        }

        self.tx
            .blocking_send(StreamMessage::Chunk(chunk))
            .map_err(|_| StreamCancelled)
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }

    fn finish(self, message: StreamMessage) {
        // The pump is gone if the stream was stopped meanwhile
        let _ = self.tx.blocking_send(message);
    }
}

enum WorkerCommand {
    Handshake {
        reply: oneshot::Sender<anyhow::Result<BuildInfo>>,
    },
    Stream {
        generation: u64,
        content: Vec<u8>,
        format: SequenceFormat,
        sink: ChunkSink,
    },
}

struct Worker {
    commands: mpsc::UnboundedSender<WorkerCommand>,
    // Never joined: a producer stuck in its handshake must not hang the caller
    _thread: JoinHandle<()>,
}

impl Worker {
    fn spawn(mut generator: Box<dyn Generator>) -> Result<Self> {
        let (commands, mut rx) = mpsc::unbounded_channel::<WorkerCommand>();

        let thread = std::thread::Builder::new()
            .name("seqplay-worker".to_string())
            .spawn(move || {
                while let Some(command) = rx.blocking_recv() {
                    handle_command(generator.as_mut(), command);
                }
                debug!("Worker command channel closed, exiting");
            })
            .map_err(|e| {
                EngineError::InitializationFailed(format!("Failed to start worker: {e}"))
            })?;

        Ok(Self {
            commands,
            _thread: thread,
        })
    }
}

fn handle_command(generator: &mut dyn Generator, command: WorkerCommand) {
    match command {
        WorkerCommand::Handshake { reply } => {
            let _ = reply.send(generator.handshake());
        }
        WorkerCommand::Stream {
            generation,
            content,
            format,
            mut sink,
        } => {
            if sink.is_cancelled() {
                debug!("Stream {generation} superseded before it started");
                return;
            }

            debug!("Worker starting stream {generation} ({format}, {} bytes)", content.len());
            let result = generator.stream(&content, format, &mut sink);

            let message = match result {
                Ok(()) => StreamMessage::Done,
                Err(_) if sink.is_cancelled() => {
                    debug!("Stream {generation} cancelled");
                    return;
                }
                Err(e) if e.is::<StreamCancelled>() => {
                    debug!("Stream {generation} cancelled");
                    return;
                }
                Err(e) => StreamMessage::Error(format!("{e:#}")),
            };

            sink.finish(message);
        }
    }
}

/// How a stream's pump finished.
#[derive(Clone, Debug, PartialEq)]
pub enum StreamOutcome {
    /// The producer reported done and the ring was marked ended
    Completed,
    /// Stopped or superseded
    Cancelled,
    Failed(EngineError),
}

/// Handle to a running stream.
pub struct StreamHandle {
    generation: u64,
    cancelled: Arc<AtomicBool>,
    pump: tokio::task::JoinHandle<StreamOutcome>,
}

impl StreamHandle {
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Stops feeding the ring and tells the producer to stop emitting.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Release);
    }

    /// Waits for the terminal event of the stream.
    pub async fn finished(self) -> StreamOutcome {
        match self.pump.await {
            Ok(outcome) => outcome,
            Err(e) => StreamOutcome::Failed(EngineError::StreamError(format!(
                "Stream pump failed: {e}"
            ))),
        }
    }
}

struct ActiveStream {
    generation: u64,
    cancelled: Arc<AtomicBool>,
}

impl ActiveStream {
    fn cancel(&self) {
        self.cancelled.store(true, Ordering::Release);
    }
}

struct BridgeInner {
    state: BridgeState,
    worker: Option<Worker>,
    metadata: Option<BuildInfo>,
    generation: u64,
    active: Option<ActiveStream>,
    /// Bumped by every shutdown so a handshake started earlier can't revive the bridge
    epoch: u64,
}

impl BridgeInner {
    fn stop_worker(&mut self) {
        if let Some(active) = self.active.take() {
            active.cancel();
        }
        // Dropping the command sender lets the worker thread run out
        self.worker = None;
    }
}

pub struct Bridge {
    factory: GeneratorFactory,
    config: EngineConfig,
    inner: Arc<Mutex<BridgeInner>>,
}

impl Bridge {
    pub fn new(factory: GeneratorFactory, config: EngineConfig) -> Self {
        Self {
            factory,
            config,
            inner: Arc::new(Mutex::new(BridgeInner {
                state: BridgeState::Uninitialized,
                worker: None,
                metadata: None,
                generation: 0,
                active: None,
                epoch: 0,
            })),
        }
    }

    pub fn state(&self) -> BridgeState {
        self.inner.lock().state
    }

    pub fn is_ready(&self) -> bool {
        self.state().is_ready()
    }

    pub fn metadata(&self) -> Option<BuildInfo> {
        self.inner.lock().metadata.clone()
    }

    /// Starts the worker and performs the handshake.
    ///
    /// The returned future resolves once readiness is reported, or fails after
    /// `init_timeout`. Callers that may race should go through
    /// [`crate::lifecycle::Lifecycle::initialize`], which shares one attempt.
    pub fn start(&self) -> BoxFuture<'static, Result<BuildInfo>> {
        let (reply, epoch) = {
            let mut inner = self.inner.lock();

            if let Some(metadata) = inner.metadata.clone() {
                return future::ready(Ok(metadata)).boxed();
            }
            if inner.state == BridgeState::Initializing {
                return future::ready(Err(EngineError::InitializationFailed(
                    "Initialization already in progress".to_string(),
                )))
                .boxed();
            }

            inner.state = BridgeState::Initializing;
            info!("Starting producer worker");

            let worker = match Worker::spawn((self.factory)()) {
                Ok(worker) => worker,
                Err(e) => {
                    inner.state = BridgeState::Uninitialized;
                    return future::ready(Err(e)).boxed();
                }
            };

            let (reply_tx, reply_rx) = oneshot::channel();
            if worker
                .commands
                .send(WorkerCommand::Handshake { reply: reply_tx })
                .is_err()
            {
                inner.state = BridgeState::Uninitialized;
                return future::ready(Err(EngineError::InitializationFailed(
                    "Worker exited before the handshake".to_string(),
                )))
                .boxed();
            }

            inner.worker = Some(worker);
            (reply_rx, inner.epoch)
        };

        let inner = self.inner.clone();
        let timeout = self.config.init_timeout();

        async move {
            let result = match tokio::time::timeout(timeout, reply).await {
                Ok(Ok(Ok(info))) => Ok(info),
                Ok(Ok(Err(e))) => Err(EngineError::InitializationFailed(format!("{e:#}"))),
                Ok(Err(_)) => Err(EngineError::InitializationFailed(
                    "Worker exited during the handshake".to_string(),
                )),
                Err(_) => Err(EngineError::InitializationTimeout(timeout)),
            };

            let mut inner = inner.lock();
            if inner.epoch != epoch || inner.worker.is_none() {
                debug!("Bridge shut down while the handshake was in flight");
                return Err(EngineError::InitializationFailed(
                    "Shut down during initialization".to_string(),
                ));
            }

            match &result {
                Ok(info) => {
                    info!(
                        "Producer ready: version {}, build date {:?}, hash {:?}",
                        info.version, info.build_date, info.hash
                    );
                    inner.state = BridgeState::Ready;
                    inner.metadata = Some(info.clone());
                }
                Err(e) => {
                    error!("Producer initialization failed: {e}");
                    inner.stop_worker();
                    inner.state = BridgeState::Uninitialized;
                }
            }

            result
        }
        .boxed()
    }

    /// Starts streaming `sequence` into `producer`.
    ///
    /// Any stream still running is cancelled first, so chunks of two
    /// generations never end up in the same ring. Must be called from within
    /// a tokio runtime.
    pub fn stream(&self, sequence: &Sequence, producer: ChunkProducer) -> Result<StreamHandle> {
        let mut inner = self.inner.lock();

        if !inner.state.is_ready() {
            return Err(EngineError::NotInitialized);
        }

        if let Some(active) = inner.active.take() {
            debug!("Superseding stream {}", active.generation);
            active.cancel();
        }

        inner.generation += 1;
        let generation = inner.generation;
        let cancelled = Arc::new(AtomicBool::new(false));
        let (tx, rx) = mpsc::channel(self.config.chunk_channel_capacity.max(1));

        let command = WorkerCommand::Stream {
            generation,
            content: sequence.content().to_vec(),
            format: sequence.format(),
            sink: ChunkSink {
                tx,
                cancelled: cancelled.clone(),
            },
        };

        let sent = inner
            .worker
            .as_ref()
            .map(|worker| worker.commands.send(command).is_ok())
            .unwrap_or(false);
        if !sent {
            inner.state = BridgeState::StreamFailed;
            return Err(EngineError::StreamError("Producer worker is gone".to_string()));
        }

        inner.state = BridgeState::Streaming;
        inner.active = Some(ActiveStream {
            generation,
            cancelled: cancelled.clone(),
        });
        drop(inner);

        debug!("Started stream {generation}");

        let pump = tokio::spawn(pump_stream(
            self.inner.clone(),
            generation,
            rx,
            producer,
            cancelled.clone(),
            self.config.push_backoff(),
        ));

        Ok(StreamHandle {
            generation,
            cancelled,
            pump,
        })
    }

    /// Cancels the active stream, if any. Returns whether one was running.
    pub fn stop_stream(&self) -> bool {
        let mut inner = self.inner.lock();

        match inner.active.take() {
            Some(active) => {
                debug!("Stopping stream {}", active.generation);
                active.cancel();
                if inner.state == BridgeState::Streaming {
                    inner.state = BridgeState::Ready;
                }
                true
            }
            None => false,
        }
    }

    /// Cancels the stream with `generation` if it is still the active one.
    pub fn stop_generation(&self, generation: u64) -> bool {
        let is_active = self
            .inner
            .lock()
            .active
            .as_ref()
            .is_some_and(|active| active.generation == generation);

        is_active && self.stop_stream()
    }

    /// Stops streaming and lets the worker thread exit.
    pub fn shutdown(&self) {
        let mut inner = self.inner.lock();
        inner.stop_worker();
        inner.epoch += 1;
        inner.metadata = None;
        inner.state = BridgeState::Uninitialized;
        debug!("Bridge shut down");
    }
}

impl Drop for Bridge {
    fn drop(&mut self) {
        self.inner.lock().stop_worker();
    }
}

async fn pump_stream(
    inner: Arc<Mutex<BridgeInner>>,
    generation: u64,
    mut rx: mpsc::Receiver<StreamMessage>,
    mut producer: ChunkProducer,
    cancelled: Arc<AtomicBool>,
    backoff: Duration,
) -> StreamOutcome {
    let outcome = loop {
        let message = rx.recv().await;

        if cancelled.load(Ordering::Acquire) {
            break StreamOutcome::Cancelled;
        }

        match message {
            Some(StreamMessage::Chunk(bytes)) => {
                let pair = match codec::decode(&bytes) {
                    Ok(pair) => pair,
                    Err(e) => {
                        // A skipped chunk would desync the channels, abort instead
                        error!("Stream {generation}: {e}");
                        cancelled.store(true, Ordering::Release);
                        break StreamOutcome::Failed(e);
                    }
                };

                if !push_with_backoff(&mut producer, pair, &cancelled, backoff).await {
                    break StreamOutcome::Cancelled;
                }
            }
            Some(StreamMessage::Done) => {
                producer.mark_ended();
                break StreamOutcome::Completed;
            }
            Some(StreamMessage::Error(message)) => {
                error!("Stream {generation} failed: {message}");
                break StreamOutcome::Failed(EngineError::StreamError(message));
            }
            None => {
                break StreamOutcome::Failed(EngineError::StreamError(
                    "Producer stopped without finishing the stream".to_string(),
                ));
            }
        }
    };

    let mut inner = inner.lock();
    let is_active = inner
        .active
        .as_ref()
        .is_some_and(|active| active.generation == generation);

    if is_active {
        inner.active = None;
        inner.state = match &outcome {
            StreamOutcome::Completed => BridgeState::StreamDone,
            StreamOutcome::Failed(_) => BridgeState::StreamFailed,
            StreamOutcome::Cancelled => BridgeState::Ready,
        };
    }

    debug!("Stream {generation} finished: {outcome:?}");
    outcome
}

/// Pushes `pair`, retrying while the ring is full. Returns `false` if the
/// stream was cancelled meanwhile.
async fn push_with_backoff(
    producer: &mut ChunkProducer,
    mut pair: ChannelPair,
    cancelled: &AtomicBool,
    backoff: Duration,
) -> bool {
    loop {
        if cancelled.load(Ordering::Acquire) {
            return false;
        }

        match producer.push(pair) {
            Ok(()) => return true,
            Err(PushError::Full(rejected)) => {
                pair = rejected;
                tokio::time::sleep(backoff).await;
            }
            Err(PushError::Ended(_)) => {
                warn!("Dropping chunk pushed after end of stream");
                return true;
            }
        }
    }
}
