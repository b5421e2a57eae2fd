//! Sends instructor utterances to the voice service for synthesis.

use crate::{
    chunker::{DEFAULT_CHUNK_CHARS, split_for_tts},
    codec::encode_tts_chunk,
    transport::Transport,
};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::Mutex;
use tracing::{debug, error, info};

/// Splits utterances into chunks and streams them as ChatTTSText frames.
///
/// Utterances are sent one at a time: a second caller waits until every
/// chunk of the first has been handed to the transport, so chunks of two
/// utterances never interleave on the wire.
pub struct Speaker {
    transport: Arc<dyn Transport>,
    max_chunk_chars: usize,
    in_flight: Mutex<()>,
}

impl Speaker {
    pub fn new(transport: Arc<dyn Transport>) -> Self {
        Self {
            transport,
            max_chunk_chars: DEFAULT_CHUNK_CHARS,
            in_flight: Mutex::new(()),
        }
    }

    /// Speaks `text`. Returns the number of chunks the transport accepted.
    ///
    /// A chunk that cannot be encoded or sent is logged and skipped; the
    /// remaining chunks are still attempted.
    pub async fn speak(&self, text: &str) -> usize {
        let chunks = split_for_tts(text, self.max_chunk_chars);
        if chunks.is_empty() {
            debug!("Nothing to speak");
            return 0;
        }

        let _guard = self.in_flight.lock().await;
        let started = Instant::now();
        let session_id = self.transport.session_id();
        let total = chunks.len();
        let mut sent = 0;
        for (i, chunk) in chunks.iter().enumerate() {
            let frame = match encode_tts_chunk(session_id, chunk, i == 0, i + 1 == total) {
                Ok(frame) => frame,
                Err(e) => {
                    error!(chunk = i + 1, total, error = %e, "Failed to encode TTS chunk");
                    continue;
                }
            };
            match self.transport.send(frame).await {
                Ok(()) => sent += 1,
                Err(e) => error!(chunk = i + 1, total, error = %e, "Failed to send TTS chunk"),
            }
        }
        info!(
            chunks = total,
            sent,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Utterance dispatched for synthesis"
        );
        sent
    }
}
