//! Microphone source and playback sink.
//!
//! The service has no audio hardware of its own: microphone audio is read as
//! raw 16 kHz mono s16le PCM from any async reader (stdin by default), and
//! synthesized audio is written to any async writer (a file, or nowhere).

use anyhow::{Context, Result};
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tracing::{debug, info};
use trainer_core::{codec::encode_audio, playback::PlaybackQueue, transport::Transport};

/// 100 ms of 16 kHz mono s16le audio.
pub const MIC_CHUNK_BYTES: usize = 3200;

/// Streams microphone audio to the voice service until the source ends or
/// the connection is closed.
pub async fn stream_microphone<R>(mut source: R, transport: Arc<dyn Transport>) -> Result<()>
where
    R: AsyncRead + Unpin,
{
    let mut buf = vec![0u8; MIC_CHUNK_BYTES];
    let mut chunks = 0usize;
    loop {
        let n = source
            .read(&mut buf)
            .await
            .context("Failed to read microphone audio")?;
        if n == 0 {
            info!(chunks, "Microphone source ended");
            return Ok(());
        }
        let frame = encode_audio(transport.session_id(), &buf[..n])?;
        if let Err(e) = transport.send(frame).await {
            debug!(error = %e, "Connection gone, microphone stream stopping");
            return Ok(());
        }
        chunks += 1;
    }
}

/// Writes queued audio to `sink` as it arrives. Runs until aborted.
pub async fn run_playback<W>(queue: PlaybackQueue, mut sink: W) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    loop {
        let audio = queue.next().await;
        sink.write_all(&audio)
            .await
            .context("Failed to write playback audio")?;
        sink.flush().await?;
    }
}
