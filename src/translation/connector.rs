//! Boundary to the external speech-translation backend.
//!
//! The coordinator only needs a narrow contract: open a per-user session,
//! push raw audio into it, receive transcript/translation/audio events, and
//! tear it down. The backend is treated as unreliable — every open can fail
//! and must degrade to "translation unavailable" without touching the call.

use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::mpsc;

use crate::translation::settings::TranslationSettings;

/// Error type for connector operations.
#[derive(Debug)]
pub enum ConnectorError {
    /// No backend is configured for this deployment.
    NotConfigured,
    /// Session-grant request to the backend failed.
    Session(String),
    /// Streaming connection could not be established.
    Stream(String),
}

impl std::fmt::Display for ConnectorError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConnectorError::NotConfigured => write!(f, "translation backend is not configured"),
            ConnectorError::Session(msg) => write!(f, "session grant failed: {}", msg),
            ConnectorError::Stream(msg) => write!(f, "streaming connection failed: {}", msg),
        }
    }
}

impl std::error::Error for ConnectorError {}

/// Asynchronous event emitted by a live translation session.
#[derive(Debug, Clone)]
pub enum SessionEvent {
    /// Recognized text of the speaker's own speech.
    Transcript { text: String, is_final: bool },
    /// Translated text in the target language.
    Translation { text: String, is_final: bool },
    /// Synthesized translated speech.
    Audio(Bytes),
    /// Backend-reported failure; the session may still be usable.
    Error(String),
    /// The streaming connection ended.
    Closed,
}

/// Handle to one live translation session.
///
/// Audio is pushed through an unbounded channel into the connector's I/O
/// task. Dropping the handle closes the channel, which ends that task and
/// shuts the session down — there is no separate close call.
#[derive(Debug)]
pub struct SessionHandle {
    audio_tx: mpsc::UnboundedSender<Bytes>,
}

impl SessionHandle {
    pub fn new(audio_tx: mpsc::UnboundedSender<Bytes>) -> Self {
        Self { audio_tx }
    }

    /// Forward one raw audio frame. Returns false once the session is gone.
    pub fn push_audio(&self, frame: Bytes) -> bool {
        self.audio_tx.send(frame).is_ok()
    }
}

/// Contract the coordinator holds against the speech-translation backend.
///
/// `open_session` performs the full session setup (grant plus streaming
/// connection) and hands back events on the given channel. At most one
/// session per user exists at a time; the coordinator enforces that.
#[async_trait]
pub trait TranslationConnector: Send + Sync {
    /// Whether a real backend is configured. The call state machine never
    /// consults this; only the coordinator does.
    fn available(&self) -> bool;

    async fn open_session(
        &self,
        user_id: &str,
        settings: &TranslationSettings,
        events: mpsc::UnboundedSender<SessionEvent>,
    ) -> Result<SessionHandle, ConnectorError>;
}

/// Capability-checked stand-in used when no backend is configured. Opening a
/// session always fails, which surfaces to the user as "translation
/// unavailable" while the call itself proceeds untouched.
pub struct UnavailableConnector;

#[async_trait]
impl TranslationConnector for UnavailableConnector {
    fn available(&self) -> bool {
        false
    }

    async fn open_session(
        &self,
        _user_id: &str,
        _settings: &TranslationSettings,
        _events: mpsc::UnboundedSender<SessionEvent>,
    ) -> Result<SessionHandle, ConnectorError> {
        Err(ConnectorError::NotConfigured)
    }
}
