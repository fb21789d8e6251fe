//! OpenAI Realtime implementation of the translation connector.
//!
//! Session setup is two network steps: a REST call that exchanges the API key
//! for a short-lived session grant, then a WebSocket connection to the granted
//! URL. Audio flows out as binary frames; transcripts, translations and
//! synthesized speech flow back as JSON text and binary frames.

use async_trait::async_trait;
use bytes::Bytes;
use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use tokio::sync::mpsc;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message as WsMessage;

use crate::translation::connector::{
    ConnectorError, SessionEvent, SessionHandle, TranslationConnector,
};
use crate::translation::settings::TranslationSettings;

pub const DEFAULT_SESSION_URL: &str = "https://api.openai.com/v1/realtime/sessions";
pub const DEFAULT_MODEL: &str = "gpt-4o-mini-realtime-preview";

/// Connector backed by the OpenAI Realtime speech API.
pub struct OpenAiRealtimeConnector {
    http: reqwest::Client,
    api_key: String,
    model: String,
    session_url: String,
}

/// Grant returned by the session endpoint. The client secret is opaque to us;
/// it is echoed back verbatim during the WebSocket handshake.
#[derive(Debug, Deserialize)]
struct SessionGrant {
    url: Option<String>,
    client_secret: Option<serde_json::Value>,
}

/// Inbound event on the realtime stream. Unknown event types are ignored.
#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
enum BackendEvent {
    Speech {
        text: String,
        #[serde(default, rename = "final")]
        is_final: bool,
    },
    Transcript {
        text: String,
        #[serde(default, rename = "final")]
        is_final: bool,
    },
    Error {
        message: String,
    },
    #[serde(other)]
    Other,
}

impl OpenAiRealtimeConnector {
    pub fn new(api_key: String, model: String, session_url: String) -> Self {
        Self {
            http: reqwest::Client::new(),
            api_key,
            model,
            session_url,
        }
    }

    /// Exchange the API key for a realtime session grant.
    async fn request_grant(
        &self,
        settings: &TranslationSettings,
    ) -> Result<SessionGrant, ConnectorError> {
        let instructions = translation_instructions(settings);
        let response = self
            .http
            .post(&self.session_url)
            .bearer_auth(&self.api_key)
            .header("OpenAI-Beta", "realtime=v1")
            .json(&serde_json::json!({
                "model": self.model,
                "voice": settings.voice,
                "instructions": instructions,
            }))
            .send()
            .await
            .map_err(|e| ConnectorError::Session(e.to_string()))?;

        if !response.status().is_success() {
            return Err(ConnectorError::Session(format!(
                "HTTP {}",
                response.status()
            )));
        }

        response
            .json::<SessionGrant>()
            .await
            .map_err(|e| ConnectorError::Session(e.to_string()))
    }
}

#[async_trait]
impl TranslationConnector for OpenAiRealtimeConnector {
    fn available(&self) -> bool {
        true
    }

    async fn open_session(
        &self,
        user_id: &str,
        settings: &TranslationSettings,
        events: mpsc::UnboundedSender<SessionEvent>,
    ) -> Result<SessionHandle, ConnectorError> {
        let grant = self.request_grant(settings).await?;
        let url = grant
            .url
            .ok_or_else(|| ConnectorError::Session("grant carried no websocket url".into()))?;

        let (ws_stream, _) = connect_async(url.as_str())
            .await
            .map_err(|e| ConnectorError::Stream(e.to_string()))?;
        let (mut sink, mut stream) = ws_stream.split();

        // Authenticate with the granted client secret, then configure the
        // session before any audio is pushed.
        let auth = serde_json::json!({
            "type": "auth",
            "client_secret": grant.client_secret,
        });
        let init = serde_json::json!({
            "type": "init",
            "model": self.model,
            "voice": settings.voice,
            "use_vad": true,
        });
        for msg in [auth, init] {
            sink.send(WsMessage::text(msg.to_string()))
                .await
                .map_err(|e| ConnectorError::Stream(e.to_string()))?;
        }

        tracing::info!(
            user_id = %user_id,
            source = %settings.source_language,
            target = %settings.target_language,
            "Realtime translation session opened"
        );

        let (audio_tx, mut audio_rx) = mpsc::unbounded_channel::<Bytes>();
        let user = user_id.to_string();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    frame = audio_rx.recv() => match frame {
                        Some(frame) => {
                            if sink.send(WsMessage::binary(frame)).await.is_err() {
                                break;
                            }
                        }
                        // Handle dropped — session torn down by the coordinator.
                        None => break,
                    },
                    msg = stream.next() => match msg {
                        Some(Ok(WsMessage::Text(text))) => {
                            match serde_json::from_str::<BackendEvent>(text.as_str()) {
                                Ok(BackendEvent::Speech { text, is_final }) => {
                                    let _ = events.send(SessionEvent::Translation { text, is_final });
                                }
                                Ok(BackendEvent::Transcript { text, is_final }) => {
                                    let _ = events.send(SessionEvent::Transcript { text, is_final });
                                }
                                Ok(BackendEvent::Error { message }) => {
                                    let _ = events.send(SessionEvent::Error(message));
                                }
                                Ok(BackendEvent::Other) => {}
                                Err(e) => {
                                    tracing::debug!(
                                        user_id = %user,
                                        error = %e,
                                        "Unparseable realtime event"
                                    );
                                }
                            }
                        }
                        Some(Ok(WsMessage::Binary(data))) => {
                            let _ = events.send(SessionEvent::Audio(data));
                        }
                        Some(Ok(_)) => {}
                        Some(Err(e)) => {
                            let _ = events.send(SessionEvent::Error(e.to_string()));
                            break;
                        }
                        None => break,
                    }
                }
            }
            let _ = sink.send(WsMessage::Close(None)).await;
            let _ = events.send(SessionEvent::Closed);
            tracing::debug!(user_id = %user, "Realtime session stream ended");
        });

        Ok(SessionHandle::new(audio_tx))
    }
}

/// System instructions for the realtime model, parameterized by the
/// configured language pair.
fn translation_instructions(settings: &TranslationSettings) -> String {
    let source = language_name(&settings.source_language);
    let target = language_name(&settings.target_language);
    format!(
        "You are a speech translation assistant. Translate everything you hear \
         from {source} to {target}.\n\n\
         Rules:\n\
         1. Translate each sentence literally but grammatically correct in {target}.\n\
         2. Preserve the speaker's meaning and tone.\n\
         3. Do not add your own comments or explanations.\n\
         4. Do not answer questions; translate them.\n\
         5. Be concise, with no introductory phrases."
    )
}

fn language_name(code: &str) -> &str {
    match code {
        "ru" => "Russian",
        "en" => "English",
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn instructions_name_the_language_pair() {
        let settings = TranslationSettings::default();
        let text = translation_instructions(&settings);
        assert!(text.contains("from Russian to English"));
    }

    #[test]
    fn unknown_language_codes_pass_through() {
        assert_eq!(language_name("de"), "de");
    }

    #[test]
    fn backend_events_decode() {
        let ev: BackendEvent =
            serde_json::from_str(r#"{"type":"speech","text":"hello","final":true}"#).unwrap();
        match ev {
            BackendEvent::Speech { text, is_final } => {
                assert_eq!(text, "hello");
                assert!(is_final);
            }
            other => panic!("expected speech event, got {:?}", other),
        }

        let ev: BackendEvent = serde_json::from_str(r#"{"type":"session.updated"}"#).unwrap();
        assert!(matches!(ev, BackendEvent::Other));
    }
}
