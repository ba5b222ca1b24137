//! Monitor that serves the rendered device output as an endless WAV stream
//! over TCP, so playback can be heard with e.g. `nc 127.0.0.1 7878 | mpv -`.

use crate::{
    constants::{BIT_DEPTH, BYTES_PER_FRAME, CHANNELS},
    sources::Sample,
};
use anyhow::Result;
use byteorder::{LittleEndian, WriteBytesExt};
use hound::{SampleFormat, WavSpec};
use ringbuf::{traits::*, HeapCons, HeapProd, HeapRb};
use std::{net::SocketAddr, sync::Arc, time::Duration};
use tokio::{
    io::AsyncWriteExt,
    net::{TcpListener, TcpStream},
    sync::watch,
};

/// How often the tap is drained and forwarded to clients.
const DRAIN_INTERVAL: Duration = Duration::from_millis(20);

pub type MonitorOutput = watch::Receiver<Arc<Vec<Sample>>>;

/// Creates the ring connecting the device's render thread to the monitor.
///
/// Holds about `seconds` of audio at `sample_rate`. The device drops frames
/// once it is full, so a stalled monitor never stalls rendering.
pub fn monitor_tap(sample_rate: u32, seconds: f64) -> (HeapProd<Sample>, HeapCons<Sample>) {
    let capacity = ((sample_rate as f64 * seconds) as usize).max(1);
    HeapRb::<Sample>::new(capacity).split()
}

/// Binds `listen` and starts serving the tap to every connecting client.
pub async fn init(listen: &str, tap: HeapCons<Sample>, sample_rate: u32) -> Result<SocketAddr> {
    let listener = TcpListener::bind(listen).await?;
    let addr = listener.local_addr()?;
    info!("Monitor listening on {addr}");

    let output = start_drain(tap);

    tokio::spawn(async move {
        loop {
            match accept(&listener, &output, sample_rate).await {
                Ok(addr) => info!("Accepted monitor connection from {addr}"),
                Err(e) => error!("Failed to accept monitor connection: {e}"),
            }
        }
    });

    Ok(addr)
}

fn start_drain(mut tap: HeapCons<Sample>) -> MonitorOutput {
    let (tx, rx) = watch::channel(Arc::new(Vec::new()));

    tokio::spawn(async move {
        let mut interval = tokio::time::interval(DRAIN_INTERVAL);
        loop {
            interval.tick().await;

            let samples: Vec<Sample> = tap.pop_iter().collect();
            if samples.is_empty() {
                continue;
            }
            if tx.send(Arc::new(samples)).is_err() {
                debug!("Monitor output closed, stopping drain");
                break;
            }
        }
    });

    rx
}

async fn accept(listener: &TcpListener, output: &MonitorOutput, sample_rate: u32) -> Result<SocketAddr> {
    let (stream, addr) = listener.accept().await?;
    let output = output.clone();

    tokio::spawn(async move {
        if let Err(e) = serve(stream, output, sample_rate).await {
            debug!("Monitor client {addr} disconnected: {e}");
        }
    });

    Ok(addr)
}

async fn serve(mut stream: TcpStream, mut output: MonitorOutput, sample_rate: u32) -> Result<()> {
    // Lets players recognize the stream as a wav file
    stream.write_all(&wav_header(sample_rate)).await?;

    loop {
        output.changed().await?;

        let samples = output.borrow_and_update().clone();
        stream.write_all(&wav_data(&samples)?).await?;
    }
}

/// Interleaved 16-bit little-endian PCM body for the WAV stream.
pub(crate) fn wav_data(samples: &[Sample]) -> Result<Vec<u8>> {
    let mut data = Vec::with_capacity(samples.len() * BYTES_PER_FRAME);
    for (left, right) in samples {
        // Vec<u8> is also AsyncWrite, so name the sync trait explicitly
        WriteBytesExt::write_i16::<LittleEndian>(&mut data, *left)?;
        WriteBytesExt::write_i16::<LittleEndian>(&mut data, *right)?;
    }
    Ok(data)
}

/// WAV header announcing an endless 16-bit stereo stream at `sample_rate`.
pub(crate) fn wav_header(sample_rate: u32) -> Vec<u8> {
    let spec = WavSpec {
        channels: CHANNELS,
        sample_rate,
        bits_per_sample: BIT_DEPTH,
        sample_format: SampleFormat::Int,
    };

    spec.into_header_for_infinite_file()
}
