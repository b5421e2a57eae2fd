//! WebSocket connection to the realtime voice service.

use crate::config::VoiceServiceConfig;
use anyhow::{Context, Result};
use async_trait::async_trait;
use bytes::Bytes;
use futures_util::{
    SinkExt, StreamExt,
    stream::{SplitSink, SplitStream},
};
use serde_json::json;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tokio_tungstenite::{
    MaybeTlsStream, WebSocketStream, connect_async,
    tungstenite::{client::IntoClientRequest, protocol::Message},
};
use tracing::{debug, info, warn};
use trainer_core::{
    codec::{decode_server_frame, encode_connection_event, encode_session_event},
    event::codes,
    session::Session,
    transport::Transport,
};
use uuid::Uuid;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Inbound half of the connection, consumed by [`receive_loop`].
pub type Inbound = SplitStream<WsStream>;

/// Output format requested for synthesized audio.
const TTS_SAMPLE_RATE: u32 = 24_000;

/// The StartSession body: synthesized audio format and the bot's name.
pub fn start_session_payload(bot_name: &str) -> serde_json::Value {
    json!({
        "tts": {
            "audio_config": {
                "channel": 1,
                "format": "pcm",
                "sample_rate": TTS_SAMPLE_RATE,
            }
        },
        "dialog": {
            "bot_name": bot_name,
        }
    })
}

/// The outbound half of a voice-service connection with one open dialog
/// session.
pub struct WsTransport {
    session_id: String,
    sink: Mutex<SplitSink<WsStream, Message>>,
    closed: AtomicBool,
}

impl WsTransport {
    /// Connects, performs the StartConnection/StartSession handshake and
    /// returns the transport together with the inbound stream.
    pub async fn connect(config: &VoiceServiceConfig) -> Result<(Arc<Self>, Inbound)> {
        let mut request = config.url.as_str().into_client_request()?;
        let headers = request.headers_mut();
        headers.insert("X-Api-App-ID", config.app_id.parse()?);
        headers.insert("X-Api-Access-Key", config.access_key.parse()?);
        headers.insert("X-Api-Resource-Id", config.resource_id.parse()?);
        headers.insert("X-Api-App-Key", config.app_key.parse()?);
        headers.insert("X-Api-Connect-Id", Uuid::new_v4().to_string().parse()?);

        let (ws_stream, response) = connect_async(request)
            .await
            .context("Failed to connect to the voice service")?;
        let logid = response
            .headers()
            .get("X-Tt-Logid")
            .and_then(|v| v.to_str().ok())
            .unwrap_or("-")
            .to_string();
        info!(url = %config.url, logid = %logid, "Connected to voice service");

        let (sink, inbound) = ws_stream.split();
        let transport = Arc::new(Self {
            session_id: Uuid::new_v4().to_string(),
            sink: Mutex::new(sink),
            closed: AtomicBool::new(false),
        });

        transport
            .send(encode_connection_event(codes::START_CONNECTION, b"{}")?)
            .await
            .context("Failed to send StartConnection")?;
        let payload = serde_json::to_vec(&start_session_payload(&config.bot_name))?;
        transport
            .send(encode_session_event(
                codes::START_SESSION,
                &transport.session_id,
                &payload,
            )?)
            .await
            .context("Failed to send StartSession")?;
        info!(session_id = %transport.session_id, "Dialog session requested");

        Ok((transport, inbound))
    }
}

#[async_trait]
impl Transport for WsTransport {
    fn session_id(&self) -> &str {
        &self.session_id
    }

    async fn send(&self, frame: Bytes) -> Result<()> {
        if self.closed.load(Ordering::SeqCst) {
            anyhow::bail!("Connection already closed");
        }
        self.sink
            .lock()
            .await
            .send(Message::Binary(frame))
            .await
            .context("WebSocket send failed")
    }

    async fn close(&self) -> Result<()> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        let mut sink = self.sink.lock().await;
        let finish_session = encode_session_event(codes::FINISH_SESSION, &self.session_id, b"{}")?;
        if let Err(e) = sink.send(Message::Binary(finish_session)).await {
            debug!(error = %e, "FinishSession not delivered");
        }
        let finish_connection = encode_connection_event(codes::FINISH_CONNECTION, b"{}")?;
        if let Err(e) = sink.send(Message::Binary(finish_connection)).await {
            debug!(error = %e, "FinishConnection not delivered");
        }
        sink.close().await.context("Failed to close WebSocket")?;
        info!(session_id = %self.session_id, "Connection closed");
        Ok(())
    }
}

/// Decodes every inbound frame and hands it to the session.
///
/// Frames that fail to decode are logged and skipped. When the stream ends
/// the session is told the server side is gone.
pub async fn receive_loop(mut inbound: Inbound, session: Arc<Session>) -> Result<()> {
    while let Some(message) = inbound.next().await {
        let message = match message {
            Ok(message) => message,
            Err(e) => {
                warn!(error = %e, "WebSocket receive failed");
                break;
            }
        };
        match message {
            Message::Binary(data) => match decode_server_frame(&data) {
                Ok(event) => session.route(event).await,
                Err(e) => warn!(error = %e, bytes = data.len(), "Dropping undecodable frame"),
            },
            Message::Close(frame) => {
                info!(?frame, "Voice service closed the connection");
                break;
            }
            _ => {}
        }
    }
    session.mark_server_finished(None).await;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_start_session_payload() {
        let payload = start_session_payload("企业培训讲师");
        assert_eq!(payload["dialog"]["bot_name"], "企业培训讲师");
        assert_eq!(payload["tts"]["audio_config"]["format"], "pcm");
        assert_eq!(payload["tts"]["audio_config"]["sample_rate"], 24_000);
        assert_eq!(payload["tts"]["audio_config"]["channel"], 1);
    }
}
