//! Capture subsystem: the speech-recognition seam and the single-session owner.
//!
//! The platform recognizer (native speech-to-text, browser bridge, test mock)
//! sits behind the [`SpeechCapture`] trait: one call to `recognize()` runs one
//! single-shot, non-interim recognition session to completion. The controller
//! owns the session lifecycle through [`CaptureSession`], which guarantees at
//! most one live recognition task — creating a new one tears down the
//! previous one first.

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::task::JoinHandle;

/// Outcome of one single-shot recognition session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CaptureEvent {
    /// The recognizer produced a final transcript.
    Transcript(String),
    /// The session ended without a result (silence, recognizer gave up).
    End,
    /// The session failed.
    Error(CaptureError),
}

/// Recognition error codes, mirroring the platform recognizer's taxonomy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CaptureError {
    /// Microphone permission revoked or denied. Fatal for the session.
    NotAllowed,
    /// No speech detected before the recognizer timed out.
    NoSpeech,
    /// The session was aborted (usually by our own teardown).
    Aborted,
    /// Anything else the platform reports.
    Other(String),
}

impl CaptureError {
    /// Only permission loss tears the whole session down; everything else is
    /// retried through the restart path.
    pub fn is_fatal(&self) -> bool {
        matches!(self, CaptureError::NotAllowed)
    }
}

impl std::fmt::Display for CaptureError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CaptureError::NotAllowed => write!(f, "not-allowed"),
            CaptureError::NoSpeech => write!(f, "no-speech"),
            CaptureError::Aborted => write!(f, "aborted"),
            CaptureError::Other(code) => write!(f, "{code}"),
        }
    }
}

/// Platform speech-recognition adapter.
///
/// Implementations are expected to configure the underlying recognizer for
/// single-shot, final-results-only recognition in the configured language.
/// `recognize()` must resolve with an event rather than fail: recognizer
/// errors are data here, not `Err` values.
#[async_trait]
pub trait SpeechCapture: Send + Sync {
    /// Run one recognition session to completion.
    async fn recognize(&self) -> CaptureEvent;

    /// Tear down any in-flight recognition session. Idempotent.
    fn cancel(&self);
}

/// Owner of the single live recognition task.
///
/// The handle is the session: aborting it cancels the pending `recognize()`
/// future (including any pre-recognition delay).
#[derive(Debug, Default)]
pub struct CaptureSession {
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl CaptureSession {
    pub fn new() -> Self {
        Self::default()
    }

    /// Install a new session task, aborting any previous one first.
    pub fn replace(&self, handle: JoinHandle<()>) {
        if let Some(previous) = self.handle.lock().replace(handle) {
            previous.abort();
        }
    }

    /// Abort the live session task, if any. Idempotent.
    pub fn stop(&self) {
        if let Some(handle) = self.handle.lock().take() {
            handle.abort();
        }
    }

    /// Whether a session task is currently alive.
    pub fn is_active(&self) -> bool {
        self.handle
            .lock()
            .as_ref()
            .is_some_and(|handle| !handle.is_finished())
    }
}

/// Mock recognizer for testing.
///
/// Plays back a scripted sequence of events, one per `recognize()` call, each
/// after its configured delay. Once the script is exhausted every further
/// call idles briefly and reports a benign [`CaptureEvent::End`].
pub struct MockCapture {
    script: Mutex<std::collections::VecDeque<(std::time::Duration, CaptureEvent)>>,
    idle_delay: std::time::Duration,
    recognize_calls: std::sync::atomic::AtomicUsize,
    cancel_calls: std::sync::atomic::AtomicUsize,
}

impl MockCapture {
    pub fn new() -> Self {
        Self {
            script: Mutex::new(std::collections::VecDeque::new()),
            idle_delay: std::time::Duration::from_millis(20),
            recognize_calls: std::sync::atomic::AtomicUsize::new(0),
            cancel_calls: std::sync::atomic::AtomicUsize::new(0),
        }
    }

    /// Script a transcript delivered after a short delay.
    pub fn with_transcript(self, transcript: &str) -> Self {
        self.with_delayed_event(
            std::time::Duration::from_millis(5),
            CaptureEvent::Transcript(transcript.to_string()),
        )
    }

    /// Script an arbitrary event delivered after a short delay.
    pub fn with_event(self, event: CaptureEvent) -> Self {
        self.with_delayed_event(std::time::Duration::from_millis(5), event)
    }

    /// Script an event delivered after `delay`.
    pub fn with_delayed_event(self, delay: std::time::Duration, event: CaptureEvent) -> Self {
        self.script.lock().push_back((delay, event));
        self
    }

    /// Configure the idle delay used once the script is exhausted.
    pub fn with_idle_delay(mut self, delay: std::time::Duration) -> Self {
        self.idle_delay = delay;
        self
    }

    /// Number of `recognize()` calls observed.
    pub fn recognize_calls(&self) -> usize {
        self.recognize_calls
            .load(std::sync::atomic::Ordering::SeqCst)
    }

    /// Number of `cancel()` calls observed.
    pub fn cancel_calls(&self) -> usize {
        self.cancel_calls.load(std::sync::atomic::Ordering::SeqCst)
    }
}

impl Default for MockCapture {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SpeechCapture for MockCapture {
    async fn recognize(&self) -> CaptureEvent {
        self.recognize_calls
            .fetch_add(1, std::sync::atomic::Ordering::SeqCst);
        let next = self.script.lock().pop_front();
        match next {
            Some((delay, event)) => {
                tokio::time::sleep(delay).await;
                event
            }
            None => {
                tokio::time::sleep(self.idle_delay).await;
                CaptureEvent::End
            }
        }
    }

    fn cancel(&self) {
        self.cancel_calls
            .fetch_add(1, std::sync::atomic::Ordering::SeqCst);
    }
}
