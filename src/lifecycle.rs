//! Startup and teardown of the producer bridge.
//!
//! Initialization is idempotent: while one handshake is in flight every other
//! caller awaits the same shared future and observes the same outcome.

use crate::{
    bridge::{Bridge, GeneratorFactory},
    config::EngineConfig,
    error::Result,
    sources::BuildInfo,
};
use futures::future::{BoxFuture, FutureExt, Shared};
use parking_lot::{Mutex, RwLock};
use std::sync::Arc;

struct InFlight {
    attempt: u64,
    handle: Shared<BoxFuture<'static, Result<BuildInfo>>>,
}

pub struct Lifecycle {
    factory: GeneratorFactory,
    config: EngineConfig,
    bridge: RwLock<Arc<Bridge>>,
    in_flight: Mutex<Option<InFlight>>,
    attempts: Mutex<u64>,
}

impl Lifecycle {
    pub fn new(factory: GeneratorFactory, config: EngineConfig) -> Self {
        let bridge = Arc::new(Bridge::new(factory.clone(), config.clone()));

        Self {
            factory,
            config,
            bridge: RwLock::new(bridge),
            in_flight: Mutex::new(None),
            attempts: Mutex::new(0),
        }
    }

    /// The current bridge. Replaced by [`Lifecycle::reset`].
    pub fn bridge(&self) -> Arc<Bridge> {
        self.bridge.read().clone()
    }

    pub fn is_ready(&self) -> bool {
        self.bridge().is_ready()
    }

    /// Number of handshakes started so far.
    pub fn attempts(&self) -> u64 {
        *self.attempts.lock()
    }

    pub async fn initialize(&self) -> Result<BuildInfo> {
        let (attempt, handle) = {
            let mut in_flight = self.in_flight.lock();
            let bridge = self.bridge();

            if let Some(metadata) = bridge.metadata() {
                return Ok(metadata);
            }

            match in_flight.as_ref() {
                Some(current) => (current.attempt, current.handle.clone()),
                None => {
                    let attempt = {
                        let mut attempts = self.attempts.lock();
                        *attempts += 1;
                        *attempts
                    };
                    let handle = bridge.start().shared();
                    *in_flight = Some(InFlight {
                        attempt,
                        handle: handle.clone(),
                    });
                    (attempt, handle)
                }
            }
        };

        let result = handle.await;

        // Only the attempt we awaited may be cleared, a reset may have started another
        let mut in_flight = self.in_flight.lock();
        if in_flight
            .as_ref()
            .is_some_and(|current| current.attempt == attempt)
        {
            *in_flight = None;
        }

        result
    }

    /// Tears the bridge down and replaces it with a fresh, uninitialized one.
    pub fn reset(&self) {
        let old = {
            let mut bridge = self.bridge.write();
            std::mem::replace(
                &mut *bridge,
                Arc::new(Bridge::new(self.factory.clone(), self.config.clone())),
            )
        };
        *self.in_flight.lock() = None;
        old.shutdown();
        info!("Bridge reset");
    }

    /// Shuts the bridge down without replacing it.
    pub fn destroy(&self) {
        *self.in_flight.lock() = None;
        self.bridge().shutdown();
    }
}
