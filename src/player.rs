//! The engine handle and its player state machine.
//!
//! `Engine` is the explicit handle a UI layer owns. It composes the
//! [`Lifecycle`] (producer bridge), the audio device and the observable
//! player state, and reports transitions on its [`EventBus`].

use crate::{
    bridge::{Bridge, GeneratorFactory, StreamHandle, StreamOutcome},
    buffer::chunk_ring,
    config::EngineConfig,
    constants::DEFAULT_SAMPLE_RATE,
    device::AudioDevice,
    error::{EngineError, Result},
    event::{EngineEvent, EventBus, Subscriber},
    lifecycle::Lifecycle,
    render::{RenderCallback, RenderSignals},
    sequence::{Sequence, SequenceFormat},
    sources::{BuildInfo, Generator},
};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::{fmt, path::Path, sync::Arc};

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PlayerState {
    #[default]
    Idle,
    Loading,
    Generating,
    Playing,
    Stopped,
    Error,
}

impl PlayerState {
    fn is_active(&self) -> bool {
        matches!(self, PlayerState::Generating | PlayerState::Playing)
    }
}

impl fmt::Display for PlayerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            PlayerState::Idle => "idle",
            PlayerState::Loading => "loading",
            PlayerState::Generating => "generating",
            PlayerState::Playing => "playing",
            PlayerState::Stopped => "stopped",
            PlayerState::Error => "error",
        };
        f.write_str(name)
    }
}

/// One play() worth of render path and stream.
struct Playback {
    id: u64,
    generation: u64,
    bridge: Arc<Bridge>,
    signals: Arc<RenderSignals>,
    /// Device clock reading when playback started
    started_at: f64,
}

struct Player {
    state: PlayerState,
    current_time: f64,
    error: Option<String>,
    sequence: Option<Sequence>,
    sample_rate: u32,
    device: Box<dyn AudioDevice>,
    playback: Option<Playback>,
    next_playback_id: u64,
}

impl Player {
    /// Cancels the stream and disconnects the render path. No state change.
    fn teardown(&mut self) {
        if let Some(playback) = self.playback.take() {
            playback.bridge.stop_generation(playback.generation);
        }
        if let Some(mut callback) = self.device.disconnect() {
            callback.reset();
        }
    }

    fn playback_matches(&self, id: u64) -> bool {
        self.playback.as_ref().is_some_and(|playback| playback.id == id)
    }
}

enum StartOutcome {
    Started,
    /// The device reported a failure, but audio may still be flowing
    Unconfirmed { id: u64, error: EngineError },
}

struct Core {
    config: EngineConfig,
    bus: EventBus,
    player: Mutex<Player>,
}

impl Core {
    /// Moves to the state `event` announces and emits it.
    fn transition(&self, player: &mut Player, event: EngineEvent) {
        let state = event.state();
        debug!("Player state {} -> {}", player.state, state);
        player.state = state;
        self.bus.send(event);
    }

    fn fail(&self, player: &mut Player, message: String) {
        player.error = Some(message.clone());
        self.transition(player, EngineEvent::Error { message });
    }

    fn stop_locked(&self, player: &mut Player) -> bool {
        if !player.state.is_active() {
            return false;
        }

        player.teardown();
        player.current_time = 0.0;
        self.transition(player, EngineEvent::Stopped);
        true
    }

    fn start_playback(self: &Arc<Self>, bridge: &Arc<Bridge>) -> Result<StartOutcome> {
        let mut player = self.player.lock();

        // A concurrent play() may have slipped in after our stop()
        self.stop_locked(&mut player);

        let sequence = player.sequence.clone().ok_or(EngineError::NoSequenceLoaded)?;
        let sample_rate = sequence.sample_rate();
        player.sample_rate = sample_rate;
        player.device.configure(sample_rate)?;

        let (producer, consumer) = chunk_ring(self.config.ring_capacity);
        let callback = RenderCallback::new(consumer);
        let signals = callback.signals();

        player.next_playback_id += 1;
        let id = player.next_playback_id;
        player.error = None;
        player.current_time = 0.0;
        self.transition(&mut player, EngineEvent::Generating);

        let stream = bridge.stream(&sequence, producer)?;
        let generation = stream.generation();
        tokio::spawn(watch_stream(self.clone(), id, stream));

        let started_at = player.device.current_time();
        player.playback = Some(Playback {
            id,
            generation,
            bridge: bridge.clone(),
            signals,
            started_at,
        });

        info!(
            "Playing {} sequence at {sample_rate} Hz (stream {generation})",
            sequence.format()
        );

        match player.device.connect(callback) {
            Ok(()) => {
                self.enter_playing(&mut player, id);
                Ok(StartOutcome::Started)
            }
            Err(error @ EngineError::PlaybackFailed(_)) => {
                Ok(StartOutcome::Unconfirmed { id, error })
            }
            Err(error) => Err(error),
        }
    }

    fn enter_playing(self: &Arc<Self>, player: &mut Player, id: u64) {
        self.transition(player, EngineEvent::Playing);
        spawn_time_tracker(self.clone(), id);
    }

    /// Accepts an unconfirmed playback if the render path delivered audio.
    fn confirm_playback(self: &Arc<Self>, id: u64) -> bool {
        let mut player = self.player.lock();

        let rendered = player
            .playback
            .as_ref()
            .is_some_and(|playback| playback.id == id && playback.signals.has_rendered());

        if rendered && player.state == PlayerState::Generating {
            self.enter_playing(&mut player, id);
            return true;
        }
        player.state == PlayerState::Playing && player.playback_matches(id)
    }

    /// Fails an unconfirmed playback. Returns `false` if it was already
    /// stopped or superseded.
    fn abort_playback(&self, id: u64, error: &EngineError) -> bool {
        let mut player = self.player.lock();

        if !player.playback_matches(id) {
            return false;
        }
        player.teardown();
        self.fail(&mut player, error.to_string());
        true
    }

    fn on_stream_error(&self, id: u64, error: EngineError) {
        let mut player = self.player.lock();

        if !player.playback_matches(id) || !player.state.is_active() {
            debug!("Ignoring error of a stale stream: {error}");
            return;
        }

        player.teardown();
        self.fail(&mut player, error.to_string());
    }

    /// Updates the current time. Returns whether tracking should continue.
    fn poll_time(&self, id: u64) -> bool {
        let mut player = self.player.lock();

        if player.state != PlayerState::Playing {
            return false;
        }
        let Some(playback) = player.playback.as_ref().filter(|playback| playback.id == id) else {
            return false;
        };

        let ended = playback.signals.is_ended();
        let elapsed = (player.device.current_time() - playback.started_at).max(0.0);
        player.current_time = elapsed;
        trace!("Playback time {elapsed:.2}s");

        if ended {
            info!("Playback ended after {elapsed:.2}s");
            player.teardown();
            self.transition(&mut player, EngineEvent::Ended);
            return false;
        }

        true
    }
}

async fn watch_stream(core: Arc<Core>, id: u64, stream: StreamHandle) {
    match stream.finished().await {
        StreamOutcome::Failed(error) => core.on_stream_error(id, error),
        outcome => debug!("Playback {id} stream finished: {outcome:?}"),
    }
}

fn spawn_time_tracker(core: Arc<Core>, id: u64) {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(core.config.time_poll());
        loop {
            interval.tick().await;
            if !core.poll_time(id) {
                break;
            }
        }
    });
}

pub struct Engine {
    core: Arc<Core>,
    lifecycle: Lifecycle,
}

impl Engine {
    pub fn new<F, D>(config: EngineConfig, factory: F, device: D) -> Self
    where
        F: Fn() -> Box<dyn Generator> + Send + Sync + 'static,
        D: AudioDevice + 'static,
    {
        let factory: GeneratorFactory = Arc::new(factory);

        let player = Player {
            state: PlayerState::Idle,
            current_time: 0.0,
            error: None,
            sequence: None,
            sample_rate: DEFAULT_SAMPLE_RATE,
            device: Box::new(device),
            playback: None,
            next_playback_id: 0,
        };

        Self {
            lifecycle: Lifecycle::new(factory, config.clone()),
            core: Arc::new(Core {
                config,
                bus: EventBus::new(),
                player: Mutex::new(player),
            }),
        }
    }

    pub fn bus(&self) -> &EventBus {
        &self.core.bus
    }

    pub fn subscribe(&self) -> Subscriber {
        self.core.bus.subscribe()
    }

    /// Starts the producer and waits for its handshake. Safe to call
    /// concurrently and repeatedly.
    pub async fn initialize(&self) -> Result<()> {
        self.metadata().await.map(|_| ())
    }

    async fn metadata(&self) -> Result<BuildInfo> {
        let result = self.lifecycle.initialize().await;

        if let Err(e) = &result {
            let mut player = self.core.player.lock();
            let message = e.to_string();
            if player.state != PlayerState::Error || player.error.as_ref() != Some(&message) {
                self.core.fail(&mut player, message);
            }
        }

        result
    }

    /// Caches a sequence for the next [`Engine::play`].
    ///
    /// `format` must be `"text"` or `"json"`.
    pub fn load_sequence(&self, content: impl Into<Vec<u8>>, format: &str) -> Result<()> {
        let format: SequenceFormat = format.parse()?;
        self.load(Sequence::new(content, format)?);
        Ok(())
    }

    pub fn load(&self, sequence: Sequence) {
        let mut player = self.core.player.lock();

        self.core.stop_locked(&mut player);
        player.state = PlayerState::Loading;
        player.sequence = Some(sequence);
        player.error = None;
        self.core.transition(&mut player, EngineEvent::Loaded);
    }

    /// Reads a sequence from disk and loads it.
    pub async fn load_file(&self, path: impl AsRef<Path>, format: &str) -> Result<()> {
        let path = path.as_ref();
        let format: SequenceFormat = format.parse()?;

        let previous = {
            let mut player = self.core.player.lock();
            self.core.stop_locked(&mut player);
            std::mem::replace(&mut player.state, PlayerState::Loading)
        };

        let sequence = match tokio::fs::read(path).await {
            Ok(content) => Sequence::new(content, format),
            Err(e) => Err(EngineError::InvalidInput(format!(
                "Failed to read {}: {e}",
                path.display()
            ))),
        };

        match sequence {
            Ok(sequence) => {
                self.load(sequence);
                Ok(())
            }
            Err(e) => {
                let mut player = self.core.player.lock();
                if player.state == PlayerState::Loading {
                    player.state = match previous {
                        PlayerState::Stopped | PlayerState::Error => previous,
                        _ => PlayerState::Idle,
                    };
                }
                Err(e)
            }
        }
    }

    /// Plays the loaded sequence from the start, superseding any playback.
    pub async fn play(&self) -> Result<()> {
        if !self.lifecycle.is_ready() {
            return Err(EngineError::NotInitialized);
        }
        if !self.is_loaded() {
            return Err(EngineError::NoSequenceLoaded);
        }

        // Ensure any previous playback is fully stopped before a new ring fills
        self.stop();
        tokio::time::sleep(self.core.config.stop_settle()).await;

        let bridge = self.lifecycle.bridge();
        let outcome = self.core.start_playback(&bridge);

        match outcome {
            Ok(StartOutcome::Started) => Ok(()),
            Ok(StartOutcome::Unconfirmed { id, error }) => {
                // Some devices report failure while actually playing; give
                // the render path a moment to prove otherwise.
                tokio::time::sleep(self.core.config.play_grace()).await;

                if self.core.confirm_playback(id) {
                    warn!("Ignoring play failure, audio is flowing: {error}");
                    Ok(())
                } else if self.core.abort_playback(id, &error) {
                    error!("Play failed: {error}");
                    Err(error)
                } else if self.get_state() == PlayerState::Error {
                    Err(error)
                } else {
                    debug!("Playback {id} was stopped before the device confirmed it");
                    Ok(())
                }
            }
            Err(error) => {
                error!("Play failed: {error}");
                let mut player = self.core.player.lock();
                player.teardown();
                self.core.fail(&mut player, error.to_string());
                Err(error)
            }
        }
    }

    /// Stops playback. No-op unless generating or playing.
    pub fn stop(&self) {
        let mut player = self.core.player.lock();
        if self.core.stop_locked(&mut player) {
            info!("Playback stopped");
        }
    }

    /// Seconds since the last play started, read from the device clock.
    pub fn get_current_time(&self) -> f64 {
        let player = self.core.player.lock();

        match player.playback.as_ref() {
            Some(playback) if player.state == PlayerState::Playing => {
                (player.device.current_time() - playback.started_at).max(0.0)
            }
            _ => player.current_time,
        }
    }

    pub fn get_state(&self) -> PlayerState {
        self.core.player.lock().state
    }

    pub fn last_error(&self) -> Option<String> {
        self.core.player.lock().error.clone()
    }

    pub fn is_loaded(&self) -> bool {
        self.core.player.lock().sequence.is_some()
    }

    /// Sample rate of the most recent play, 44100 Hz before the first one.
    pub fn get_sample_rate(&self) -> u32 {
        self.core.player.lock().sample_rate
    }

    pub fn is_ready(&self) -> bool {
        self.lifecycle.is_ready()
    }

    pub async fn get_version(&self) -> Result<String> {
        Ok(self.metadata().await?.version)
    }

    pub async fn get_build_date(&self) -> Result<String> {
        Ok(self.metadata().await?.build_date)
    }

    pub async fn get_hash(&self) -> Result<String> {
        Ok(self.metadata().await?.hash)
    }

    /// Number of producer handshakes started over the engine's lifetime.
    pub fn initialization_attempts(&self) -> u64 {
        self.lifecycle.attempts()
    }

    /// Recreates the bridge and returns to `idle`, clearing any error.
    /// [`Engine::initialize`] must be called again before playing.
    pub fn reset(&self) {
        {
            let mut player = self.core.player.lock();
            player.teardown();
            player.sequence = None;
            player.current_time = 0.0;
            player.error = None;
            player.state = PlayerState::Idle;
        }
        self.lifecycle.reset();
    }

    /// Stops playback, closes the device and shuts the producer down.
    pub fn destroy(&self) {
        {
            let mut player = self.core.player.lock();
            self.core.stop_locked(&mut player);
            player.teardown();
            player.device.close();
            player.sequence = None;
        }
        self.lifecycle.destroy();
        debug!("Engine destroyed");
    }
}
