//! Turn controller: the voice-session state machine.
//!
//! Owns the session lifecycle (off, listening, processing, speaking), the
//! bounded history, and the turn counter that invalidates superseded work.
//! All audio and network effects go through the capture, exchange, playback,
//! and activation seams, so the whole loop is drivable by mocks.
//!
//! Concurrency model: public operations are cheap and non-blocking; the slow
//! work (reply fetch, synthesis, playback) runs in spawned tasks that capture
//! the turn token they were started under and re-check it before touching
//! state. A completion whose token is stale does nothing at all.
//!
//! The active flag and the state live under one mutex, and every guarded
//! mutation re-validates the flag or the turn token inside the lock that
//! protects what it mutates. Teardown invalidates the token before taking
//! that lock, so a completion racing `deactivate()` either lands before the
//! teardown (and is then torn down with everything else) or observes the
//! stale token and does nothing.

use parking_lot::{Mutex, RwLock};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::activation::MicrophoneProbe;
use crate::capture::{CaptureEvent, CaptureSession, SpeechCapture};
use crate::config::Config;
use crate::error::VoxloopError;
use crate::exchange::{ConversationApi, ReplyRequest, SynthesisRequest};
use crate::history::{History, HistoryEntry, Role};
use crate::playback::{AudioSink, Playback};
use crate::turn::TurnCounter;

/// Session state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VoiceState {
    /// Session inactive; nothing captured, nothing playing.
    Off,
    /// Microphone live, waiting for a transcript.
    Listening,
    /// A turn is in flight (reply fetch and synthesis).
    Processing,
    /// Assistant audio is playing.
    Speaking,
}

/// Presentation-level mood, derived from [`VoiceState`].
///
/// This is what the embedding application animates; it never feeds back into
/// the controller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mood {
    Idle,
    Listening,
    Thinking,
    Speaking,
}

impl VoiceState {
    pub fn mood(&self) -> Mood {
        match self {
            VoiceState::Off => Mood::Idle,
            VoiceState::Listening => Mood::Listening,
            VoiceState::Processing => Mood::Thinking,
            VoiceState::Speaking => Mood::Speaking,
        }
    }
}

/// Observer invoked on every state change with the derived mood.
pub type MoodCallback = Arc<dyn Fn(Mood) + Send + Sync>;

/// Activation flag and state, mutated only together under one lock.
struct SessionState {
    state: VoiceState,
    active: bool,
}

impl SessionState {
    /// Apply a state transition; returns the mood to announce, if any.
    fn transition(&mut self, next: VoiceState) -> Option<Mood> {
        if self.state == next {
            return None;
        }
        self.state = next;
        Some(next.mood())
    }
}

struct Inner {
    config: Config,
    exchange: Arc<dyn ConversationApi>,
    capture_adapter: Arc<dyn SpeechCapture>,
    probe: Arc<dyn MicrophoneProbe>,
    mood_callback: RwLock<Option<MoodCallback>>,
    session: Mutex<SessionState>,
    turn: TurnCounter,
    processing: AtomicBool,
    history: Mutex<History>,
    capture: CaptureSession,
    playback: Playback,
}

/// Headless turn-based voice-conversation controller.
///
/// Cheap to clone; all clones drive the same session.
#[derive(Clone)]
pub struct VoiceController {
    inner: Arc<Inner>,
}

impl VoiceController {
    pub fn new(
        config: Config,
        exchange: Arc<dyn ConversationApi>,
        capture: Arc<dyn SpeechCapture>,
        probe: Arc<dyn MicrophoneProbe>,
        sink: Arc<dyn AudioSink>,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                config,
                exchange,
                capture_adapter: capture,
                probe,
                mood_callback: RwLock::new(None),
                session: Mutex::new(SessionState {
                    state: VoiceState::Off,
                    active: false,
                }),
                turn: TurnCounter::new(),
                processing: AtomicBool::new(false),
                history: Mutex::new(History::new()),
                capture: CaptureSession::new(),
                playback: Playback::new(sink),
            }),
        }
    }

    /// Register the mood observer, replacing any previous one.
    pub fn on_mood_change(&self, callback: MoodCallback) {
        *self.inner.mood_callback.write() = Some(callback);
    }

    pub fn state(&self) -> VoiceState {
        self.inner.session.lock().state
    }

    pub fn is_active(&self) -> bool {
        self.inner.session.lock().active
    }

    /// Snapshot of the conversation history, oldest first.
    pub fn history(&self) -> Vec<HistoryEntry> {
        self.inner.history.lock().entries()
    }

    pub fn is_capturing(&self) -> bool {
        self.inner.capture.is_active()
    }

    pub fn is_playing(&self) -> bool {
        self.inner.playback.is_playing()
    }

    /// Start a voice session.
    ///
    /// Probes microphone permission first; on denial the session stays off.
    /// Activating an already-active session is a no-op.
    pub async fn activate(&self) {
        let inner = &self.inner;
        if inner.session.lock().active {
            return;
        }
        if let Err(e) = inner.probe.request().await {
            warn!("activation refused: {e}");
            return;
        }

        let mood = {
            let mut session = inner.session.lock();
            if session.active {
                return;
            }
            inner.turn.reset();
            inner.history.lock().clear();
            inner.processing.store(false, Ordering::SeqCst);
            session.active = true;
            session.transition(VoiceState::Listening)
        };
        info!("voice session activated");
        notify(inner, mood);
        start_capture(inner, Duration::ZERO);
    }

    /// Start a voice session by speaking `message` first, then listening.
    ///
    /// The message is recorded as an assistant history entry and synthesized
    /// immediately; capture starts once playback completes.
    pub async fn activate_with_message(&self, message: &str) {
        let inner = &self.inner;
        if inner.session.lock().active {
            return;
        }
        if let Err(e) = inner.probe.request().await {
            warn!("activation refused: {e}");
            return;
        }

        let turn = {
            let mut session = inner.session.lock();
            if session.active {
                return;
            }
            inner.turn.reset();
            inner.history.lock().clear();
            session.active = true;
            inner.processing.store(true, Ordering::SeqCst);
            let turn = inner.turn.next();
            inner.history.lock().push(Role::Assistant, message);
            turn
        };
        info!("voice session activated with greeting");

        let inner = Arc::clone(&self.inner);
        let message = message.to_string();
        tokio::spawn(async move {
            speak(inner, message, turn).await;
        });
    }

    /// Tear the session down. Synchronous, idempotent, immediate.
    ///
    /// Everything in flight is cancelled; completions that outrun the abort
    /// find their turn token stale and do nothing.
    pub fn deactivate(&self) {
        shutdown(&self.inner);
    }

    /// Flip the session on or off.
    pub async fn toggle(&self) {
        if self.is_active() {
            self.deactivate();
        } else {
            self.activate().await;
        }
    }

    /// Submit user text as if it had been captured.
    ///
    /// Fire-and-forget: the turn runs in a spawned task. Ignored while the
    /// session is off, while another turn is in flight, or when the trimmed
    /// text is below the minimum length.
    pub fn process_input(&self, text: &str) {
        submit_transcript(&self.inner, text);
    }
}

/// Announce a mood change. Always called after the session lock is released.
fn notify(inner: &Arc<Inner>, mood: Option<Mood>) {
    let Some(mood) = mood else { return };
    debug!(?mood, "voice state changed");
    let callback = inner.mood_callback.read().clone();
    if let Some(callback) = callback {
        callback(mood);
    }
}

/// Gate a transcript and, if it earns a turn, spawn the turn task.
fn submit_transcript(inner: &Arc<Inner>, text: &str) {
    if !inner.session.lock().active {
        return;
    }
    let trimmed = text.trim();
    if trimmed.chars().count() < inner.config.capture.min_transcript_chars {
        debug!("ignoring sub-minimum transcript");
        return;
    }
    // One turn at a time; a transcript arriving mid-turn is dropped.
    if inner.processing.swap(true, Ordering::SeqCst) {
        debug!("ignoring transcript while a turn is in flight");
        return;
    }

    let (turn, mood) = {
        let mut session = inner.session.lock();
        // Deactivated between the gate and here; hand the gate back.
        if !session.active {
            inner.processing.store(false, Ordering::SeqCst);
            return;
        }
        let turn = inner.turn.next();
        (turn, session.transition(VoiceState::Processing))
    };
    notify(inner, mood);

    let inner = Arc::clone(inner);
    let text = trimmed.to_string();
    tokio::spawn(async move {
        run_turn(inner, text, turn).await;
    });
}

/// Run one turn: fetch the reply, record it, then speak it.
async fn run_turn(inner: Arc<Inner>, text: String, turn: u64) {
    // The microphone goes quiet for the whole turn.
    inner.capture.stop();
    inner.capture_adapter.cancel();

    let request = ReplyRequest {
        message: text.clone(),
        history: inner
            .history
            .lock()
            .context(crate::defaults::HISTORY_CONTEXT),
        user_id: inner.config.exchange.user_id.clone(),
        company_id: inner.config.exchange.company_id.clone(),
    };

    let result = match inner.config.exchange.reply_timeout() {
        Some(limit) => match tokio::time::timeout(limit, inner.exchange.reply(request)).await {
            Ok(result) => result,
            Err(_) => {
                warn!("reply request timed out");
                resume_listening(&inner, turn);
                return;
            }
        },
        None => inner.exchange.reply(request).await,
    };

    // Superseded or deactivated while the request was pending.
    if !inner.turn.is_current(turn) {
        debug!(turn, "discarding stale reply");
        return;
    }

    let reply = match result {
        Ok(response) => response.text().map(str::to_string),
        Err(e) => {
            warn!("reply request failed: {e}");
            resume_listening(&inner, turn);
            return;
        }
    };

    let Some(reply) = reply.filter(|r| !r.trim().is_empty()) else {
        debug!("empty reply, resuming listening");
        resume_listening(&inner, turn);
        return;
    };

    {
        // Teardown invalidates the token before it clears the history, so a
        // push that passes this check is either pre-teardown (and gets
        // cleared with everything else) or the session is still live.
        let mut history = inner.history.lock();
        if !inner.turn.is_current(turn) {
            debug!(turn, "discarding stale reply");
            return;
        }
        history.push(Role::User, text);
        history.push(Role::Assistant, reply.clone());
    }

    speak(inner, reply, turn).await;
}

/// Synthesize `text` and play it; resume listening when playback completes.
async fn speak(inner: Arc<Inner>, text: String, turn: u64) {
    let mood = {
        let mut session = inner.session.lock();
        if !session.active || !inner.turn.is_current(turn) {
            return;
        }
        session.transition(VoiceState::Speaking)
    };
    notify(&inner, mood);

    let limit = inner.config.exchange.synthesis_timeout();
    let result =
        tokio::time::timeout(limit, inner.exchange.synthesize(SynthesisRequest::new(text))).await;

    if !inner.turn.is_current(turn) {
        debug!(turn, "discarding stale synthesis result");
        return;
    }

    let audio = match result {
        Ok(Ok(response)) => response.decode_audio(),
        Ok(Err(e)) => {
            warn!("synthesis failed: {e}");
            None
        }
        Err(_) => {
            let e = VoxloopError::SynthesisTimeout {
                timeout_ms: inner.config.exchange.synthesis_timeout_ms,
            };
            warn!("{e}");
            None
        }
    };

    let Some(audio) = audio else {
        // Text-only turn: the reply stays in history, the session keeps going.
        resume_listening(&inner, turn);
        return;
    };

    let guard_inner = Arc::clone(&inner);
    let done_inner = Arc::clone(&inner);
    let started = inner.playback.play(
        audio,
        move || guard_inner.turn.is_current(turn),
        move || resume_listening(&done_inner, turn),
    );
    if !started {
        debug!(turn, "playback superseded before start");
    }
}

/// Drop back to listening after a turn resolves.
fn resume_listening(inner: &Arc<Inner>, turn: u64) {
    let mood = {
        let mut session = inner.session.lock();
        if !session.active || !inner.turn.is_current(turn) {
            return;
        }
        inner.processing.store(false, Ordering::SeqCst);
        session.transition(VoiceState::Listening)
    };
    notify(inner, mood);
    start_capture(inner, inner.config.timing.resume_delay());
}

/// Install a fresh capture session task after `delay`.
///
/// Playback is stopped first: the microphone and the speaker are never live
/// together. The handle is installed under the session lock so a concurrent
/// teardown either blocks the install or stops the installed task.
fn start_capture(inner: &Arc<Inner>, delay: Duration) {
    let session = inner.session.lock();
    if !session.active {
        return;
    }
    inner.playback.stop();

    let task_inner = Arc::clone(inner);
    let handle = tokio::spawn(async move {
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        capture_loop(task_inner).await;
    });
    inner.capture.replace(handle);
}

/// Recognition loop: one single-shot session per iteration, restarted after
/// benign ends until a transcript arrives or the session shuts down.
async fn capture_loop(inner: Arc<Inner>) {
    loop {
        if !inner.session.lock().active || inner.processing.load(Ordering::SeqCst) {
            return;
        }

        match inner.capture_adapter.recognize().await {
            CaptureEvent::Transcript(text) => {
                debug!("transcript captured");
                submit_transcript(&inner, &text);
                return;
            }
            CaptureEvent::End => {
                tokio::time::sleep(inner.config.timing.restart_delay()).await;
            }
            CaptureEvent::Error(e) if e.is_fatal() => {
                warn!("capture lost microphone access: {e}");
                shutdown(&inner);
                return;
            }
            CaptureEvent::Error(e) => {
                warn!("capture error, restarting: {e}");
                tokio::time::sleep(inner.config.timing.restart_delay()).await;
            }
        }
    }
}

/// Full teardown, reachable from inside spawned tasks.
///
/// The token is invalidated before the session lock is taken: any guarded
/// mutation that slips in ahead of the lock is undone here, and anything
/// after sees the stale token.
fn shutdown(inner: &Arc<Inner>) {
    inner.turn.invalidate();
    let mood = {
        let mut session = inner.session.lock();
        session.active = false;
        session.transition(VoiceState::Off)
    };
    inner.processing.store(false, Ordering::SeqCst);
    inner.capture.stop();
    inner.capture_adapter.cancel();
    inner.playback.stop();
    inner.history.lock().clear();
    notify(inner, mood);
    info!("voice session deactivated");
}
