use crate::player::PlayerState;
use tokio::sync::broadcast::error::{RecvError, TryRecvError};
use tokio::sync::broadcast::{self, Receiver, Sender};

/// Lifecycle notifications delivered to the engine's caller.
#[derive(Clone, Debug, PartialEq)]
pub enum EngineEvent {
    Loaded,
    Generating,
    Playing,
    Stopped,
    Ended,
    Error { message: String },
}

impl EngineEvent {
    /// State the player is in right after this event.
    pub fn state(&self) -> PlayerState {
        match self {
            EngineEvent::Loaded | EngineEvent::Ended => PlayerState::Idle,
            EngineEvent::Generating => PlayerState::Generating,
            EngineEvent::Playing => PlayerState::Playing,
            EngineEvent::Stopped => PlayerState::Stopped,
            EngineEvent::Error { .. } => PlayerState::Error,
        }
    }
}

#[derive(Clone)]
pub struct EventBus {
    tx: Sender<EngineEvent>,
}

impl EventBus {
    pub fn new() -> Self {
        let (tx, _rx) = broadcast::channel::<EngineEvent>(100);
        Self { tx }
    }

    pub fn send(&self, event: EngineEvent) {
        // Nobody listening is fine, the engine runs headless in that case
        if let Err(e) = self.tx.send(event) {
            trace!("Dropped event without subscribers: {:?}", e.0);
        }
    }

    pub fn subscribe(&self) -> Subscriber {
        Subscriber::new(self.tx.subscribe())
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

pub struct Subscriber {
    rx: Receiver<EngineEvent>,
}

impl Subscriber {
    pub fn new(rx: Receiver<EngineEvent>) -> Self {
        Self { rx }
    }

    pub fn try_recv(&mut self) -> Result<EngineEvent, TryRecvError> {
        self.rx.try_recv()
    }

    /// Waits for the next event, `None` once every sender is gone.
    pub async fn recv(&mut self) -> Option<EngineEvent> {
        loop {
            let event = self.rx.recv().await;

            match event {
                Ok(event) => break Some(event),
                Err(RecvError::Closed) => break None,
                Err(RecvError::Lagged(skipped)) => {
                    warn!("EventBus::Subscriber lagging behind senders, skipping {skipped} messages");
                }
            }
        }
    }
}

pub fn debug(bus: &EventBus) {
    let bus = bus.clone();
    tokio::spawn(async move {
        let mut bus = bus.subscribe();
        while let Some(event) = bus.recv().await {
            debug!("Received event: {:?}", event);
        }
    });
}
