//! Exchange client: the two-phase conversation backend.
//!
//! Phase 1 posts the transcript (with recent history as context) to the
//! conversation endpoint and gets the assistant's reply text. Phase 2 posts
//! that text back with the synthesis flag set and gets base64-encoded audio.
//! Both phases go through the [`ConversationApi`] trait so the controller can
//! be driven by a mock in tests.

use async_trait::async_trait;
use base64::Engine;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::config::ExchangeConfig;
use crate::error::{Result, VoxloopError};
use crate::history::HistoryEntry;

/// Phase 1 request body.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReplyRequest {
    pub message: String,
    pub history: Vec<HistoryEntry>,
    pub user_id: String,
    pub company_id: String,
}

/// Phase 1 response body.
///
/// The backend has shipped the reply under both `response` and `text` over
/// time; accept either, preferring `response`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ReplyResponse {
    pub response: Option<String>,
    pub text: Option<String>,
}

impl ReplyResponse {
    /// The reply text, whichever key carried it.
    pub fn text(&self) -> Option<&str> {
        self.response.as_deref().or(self.text.as_deref())
    }
}

/// Phase 2 request body.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SynthesisRequest {
    pub tts_only: bool,
    pub tts_text: String,
}

impl SynthesisRequest {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            tts_only: true,
            tts_text: text.into(),
        }
    }
}

/// Phase 2 response body.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct SynthesisResponse {
    pub audio: Option<String>,
}

impl SynthesisResponse {
    /// Decode the audio payload, tolerating a data-URI prefix.
    ///
    /// A missing or undecodable payload yields `None`; the turn then resolves
    /// without speaking rather than failing.
    pub fn decode_audio(&self) -> Option<Vec<u8>> {
        let raw = self.audio.as_deref()?;
        let encoded = match raw.rsplit_once("base64,") {
            Some((_, rest)) => rest,
            None => raw,
        };
        match base64::engine::general_purpose::STANDARD.decode(encoded) {
            Ok(bytes) => Some(bytes),
            Err(e) => {
                warn!("discarding undecodable synthesis audio: {e}");
                None
            }
        }
    }
}

/// Conversation backend, both phases.
#[async_trait]
pub trait ConversationApi: Send + Sync {
    /// Phase 1: fetch the assistant's reply text for `message`.
    async fn reply(&self, request: ReplyRequest) -> Result<ReplyResponse>;

    /// Phase 2: synthesize speech audio for `text`.
    async fn synthesize(&self, request: SynthesisRequest) -> Result<SynthesisResponse>;
}

/// HTTP implementation of the conversation backend.
pub struct HttpExchange {
    client: reqwest::Client,
    config: ExchangeConfig,
}

impl HttpExchange {
    pub fn new(config: ExchangeConfig) -> Self {
        Self {
            client: reqwest::Client::new(),
            config,
        }
    }

    async fn post_json<Req, Resp>(&self, url: &str, body: &Req) -> Result<Resp>
    where
        Req: Serialize + Sync,
        Resp: for<'de> Deserialize<'de>,
    {
        let response = self.client.post(url).json(body).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(VoxloopError::ExchangeStatus {
                status: status.as_u16(),
            });
        }
        Ok(response.json::<Resp>().await?)
    }
}

#[async_trait]
impl ConversationApi for HttpExchange {
    async fn reply(&self, request: ReplyRequest) -> Result<ReplyResponse> {
        self.post_json(&self.config.conversation_url, &request).await
    }

    async fn synthesize(&self, request: SynthesisRequest) -> Result<SynthesisResponse> {
        self.post_json(&self.config.synthesis_url, &request).await
    }
}

/// Mock backend for testing.
///
/// Scripted replies are consumed in order; once exhausted, `reply()` echoes
/// the incoming message. Audio, delays, and failure modes are configurable,
/// and both phases count their calls.
pub struct MockExchange {
    replies: parking_lot::Mutex<std::collections::VecDeque<String>>,
    audio: Option<Vec<u8>>,
    reply_delay: std::time::Duration,
    synthesis_delay: std::time::Duration,
    fail_reply: bool,
    fail_synthesis: bool,
    reply_calls: std::sync::atomic::AtomicUsize,
    synthesis_calls: std::sync::atomic::AtomicUsize,
    last_request: parking_lot::Mutex<Option<ReplyRequest>>,
}

impl MockExchange {
    pub fn new() -> Self {
        Self {
            replies: parking_lot::Mutex::new(std::collections::VecDeque::new()),
            audio: Some(vec![0xAA, 0xBB, 0xCC]),
            reply_delay: std::time::Duration::ZERO,
            synthesis_delay: std::time::Duration::ZERO,
            fail_reply: false,
            fail_synthesis: false,
            reply_calls: std::sync::atomic::AtomicUsize::new(0),
            synthesis_calls: std::sync::atomic::AtomicUsize::new(0),
            last_request: parking_lot::Mutex::new(None),
        }
    }

    /// Script the next reply text.
    pub fn with_reply(self, text: &str) -> Self {
        self.replies.lock().push_back(text.to_string());
        self
    }

    /// Audio bytes returned by `synthesize()`, or `None` for an audioless
    /// response.
    pub fn with_audio(mut self, audio: Option<Vec<u8>>) -> Self {
        self.audio = audio;
        self
    }

    pub fn with_reply_delay(mut self, delay: std::time::Duration) -> Self {
        self.reply_delay = delay;
        self
    }

    pub fn with_synthesis_delay(mut self, delay: std::time::Duration) -> Self {
        self.synthesis_delay = delay;
        self
    }

    pub fn failing_reply(mut self) -> Self {
        self.fail_reply = true;
        self
    }

    pub fn failing_synthesis(mut self) -> Self {
        self.fail_synthesis = true;
        self
    }

    pub fn reply_calls(&self) -> usize {
        self.reply_calls.load(std::sync::atomic::Ordering::SeqCst)
    }

    pub fn synthesis_calls(&self) -> usize {
        self.synthesis_calls
            .load(std::sync::atomic::Ordering::SeqCst)
    }

    /// The most recent phase 1 request, for payload assertions.
    pub fn last_request(&self) -> Option<ReplyRequest> {
        self.last_request.lock().clone()
    }
}

impl Default for MockExchange {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ConversationApi for MockExchange {
    async fn reply(&self, request: ReplyRequest) -> Result<ReplyResponse> {
        self.reply_calls
            .fetch_add(1, std::sync::atomic::Ordering::SeqCst);
        *self.last_request.lock() = Some(request.clone());
        tokio::time::sleep(self.reply_delay).await;
        if self.fail_reply {
            return Err(VoxloopError::Exchange {
                message: "mock reply failure".to_string(),
            });
        }
        let text = self
            .replies
            .lock()
            .pop_front()
            .unwrap_or_else(|| format!("echo: {}", request.message));
        Ok(ReplyResponse {
            response: Some(text),
            text: None,
        })
    }

    async fn synthesize(&self, _request: SynthesisRequest) -> Result<SynthesisResponse> {
        self.synthesis_calls
            .fetch_add(1, std::sync::atomic::Ordering::SeqCst);
        tokio::time::sleep(self.synthesis_delay).await;
        if self.fail_synthesis {
            return Err(VoxloopError::Exchange {
                message: "mock synthesis failure".to_string(),
            });
        }
        Ok(SynthesisResponse {
            audio: self
                .audio
                .as_ref()
                .map(|bytes| base64::engine::general_purpose::STANDARD.encode(bytes)),
        })
    }
}
