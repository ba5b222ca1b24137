#[macro_use]
extern crate log;

use anyhow::{bail, Context, Result};
use seqplay::{
    config,
    constants::DEFAULT_SAMPLE_RATE,
    device::ClockedDevice,
    event::{self, EngineEvent},
    net,
    sources::{sine::SineGenerator, Generator},
    Engine,
};

/// Seconds of audio the monitor tap can hold before frames are dropped.
const TAP_SECONDS: f64 = 2.0;

#[tokio::main]
async fn main() -> Result<()> {
    pretty_env_logger::formatted_builder()
        .filter_level(log::LevelFilter::Info)
        .parse_default_env()
        .init();

    let mut args = std::env::args().skip(1);
    let Some(path) = args.next() else {
        bail!("Usage: seqplay <file> [text|json]");
    };
    let format = args.next().unwrap_or_else(|| "text".to_string());

    let config = config::load().await?;

    let mut device = ClockedDevice::new(config.engine.device_buffer_frames);
    let tap = if config.monitor.enabled {
        let (producer, consumer) = net::monitor_tap(DEFAULT_SAMPLE_RATE, TAP_SECONDS);
        device.set_tap(producer);
        Some(consumer)
    } else {
        None
    };

    let sine = config.sine.clone();
    let engine = Engine::new(
        config.engine.clone(),
        move || -> Box<dyn Generator> { Box::new(SineGenerator::new(sine.clone())) },
        device,
    );
    event::debug(engine.bus());
    let mut events = engine.subscribe();

    engine.initialize().await?;
    info!(
        "Producer version {}, build date {:?}, hash {:?}",
        engine.get_version().await?,
        engine.get_build_date().await?,
        engine.get_hash().await?
    );

    engine
        .load_file(&path, &format)
        .await
        .with_context(|| format!("Failed to load {path}"))?;
    engine.play().await?;

    if let Some(tap) = tap {
        net::init(&config.monitor.listen, tap, engine.get_sample_rate()).await?;
    }

    let result = loop {
        tokio::select! {
            event = events.recv() => match event {
                Some(EngineEvent::Ended) => break Ok(()),
                Some(EngineEvent::Error { message }) => break Err(anyhow::anyhow!(message)),
                Some(_) => {}
                None => break Ok(()),
            },
            signal = tokio::signal::ctrl_c() => {
                signal?;
                info!("Interrupted, stopping playback");
                engine.stop();
                break Ok(());
            }
        }
    };

    info!("Played {:.2}s", engine.get_current_time());
    engine.destroy();

    result
}
