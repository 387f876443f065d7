//! TCP transport that pulls mixer frames on a fixed tick.
//!
//! Each connection gets an infinite WAV header followed by one 20ms frame
//! per tick, so any media player pointed at the port plays the session
//! output live.

use crate::constants::{BIT_DEPTH, CHANNELS, FRAME_DURATION_MS, SAMPLE_RATE};
use crate::session::Sessions;
use anyhow::Result;
use hound::{SampleFormat, WavSpec};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::net::TcpListener;

/// Connections stream this session's output.
const SESSION: u64 = 0;

pub async fn start(addr: &str, sessions: Arc<Sessions>) -> Result<()> {
    let listener = TcpListener::bind(addr).await?;
    info!("Listening on {addr}");

    tokio::spawn(async move {
        loop {
            match accept(&listener, &sessions).await {
                Ok(addr) => info!("Accepted connection from {addr}"),
                Err(e) => warn!("Failed to accept connection: {e}"),
            }
        }
    });

    Ok(())
}

async fn accept(listener: &TcpListener, sessions: &Arc<Sessions>) -> Result<SocketAddr> {
    let (mut stream, addr) = listener.accept().await?;
    let sessions = sessions.clone();

    tokio::spawn(async move {
        let spec = WavSpec {
            channels: CHANNELS,
            sample_rate: SAMPLE_RATE,
            bits_per_sample: BIT_DEPTH,
            sample_format: SampleFormat::Int,
        };

        // The header lets players recognize the stream as endless wav
        let header = spec.into_header_for_infinite_file();
        if let Err(e) = stream.write_all(&header[..]).await {
            warn!("Failed to write wav header to {addr}: {e}");
            return;
        }

        let mut ticker = tokio::time::interval(Duration::from_millis(FRAME_DURATION_MS));
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            ticker.tick().await;
            let frame = sessions.next_frame(SESSION);
            if let Err(e) = stream.write_all(&frame).await {
                debug!("Connection {addr} closed: {e}");
                break;
            }
        }
    });

    Ok(addr)
}
