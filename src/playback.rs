//! Playback subsystem: the audio-output seam and the single-player owner.
//!
//! Synthesized audio goes out through the [`AudioSink`] trait. [`Playback`]
//! owns at most one live playback task; starting a new clip or stopping the
//! subsystem tears the previous one down first. Playback failure is treated
//! as playback completion, so a broken output device degrades the session to
//! text-only turns instead of wedging it.

use parking_lot::Mutex;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::warn;

use crate::error::Result;

/// Audio-output adapter.
///
/// `play()` resolves when the clip has finished playing (or failed). `stop()`
/// must interrupt an in-flight clip and is idempotent.
#[async_trait::async_trait]
pub trait AudioSink: Send + Sync {
    /// Play one encoded audio clip to completion.
    async fn play(&self, audio: &[u8]) -> Result<()>;

    /// Interrupt any in-flight clip. Idempotent.
    fn stop(&self);
}

/// Owner of the single live playback task.
pub struct Playback {
    sink: Arc<dyn AudioSink>,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl Playback {
    pub fn new(sink: Arc<dyn AudioSink>) -> Self {
        Self {
            sink,
            handle: Mutex::new(None),
        }
    }

    /// Start playing `audio`, replacing any clip already in flight.
    ///
    /// `guard` is checked once before the player is created; when it reports
    /// false the clip was superseded before it could start and nothing
    /// happens. `on_done` runs when the clip finishes or fails, but only if
    /// `guard` still holds at that point.
    ///
    /// Returns whether a player was actually started.
    pub fn play<G, F>(&self, audio: Vec<u8>, guard: G, on_done: F) -> bool
    where
        G: Fn() -> bool + Send + Sync + 'static,
        F: FnOnce() + Send + 'static,
    {
        if !guard() {
            return false;
        }

        // The previous clip must be gone before the new task exists; holding
        // the handle lock across abort-and-spawn keeps replacements ordered.
        let mut handle = self.handle.lock();
        if let Some(previous) = handle.take() {
            previous.abort();
        }

        let sink = Arc::clone(&self.sink);
        *handle = Some(tokio::spawn(async move {
            if let Err(e) = sink.play(&audio).await {
                // A failed clip still counts as a finished clip.
                warn!("audio playback failed: {e}");
            }
            if guard() {
                on_done();
            }
        }));
        true
    }

    /// Interrupt the live clip, if any. Idempotent.
    pub fn stop(&self) {
        if let Some(handle) = self.handle.lock().take() {
            handle.abort();
        }
        self.sink.stop();
    }

    /// Whether a playback task is currently alive.
    pub fn is_playing(&self) -> bool {
        self.handle
            .lock()
            .as_ref()
            .is_some_and(|handle| !handle.is_finished())
    }
}

/// Mock sink for testing.
///
/// Records every clip it is asked to play, then sleeps for the configured
/// duration to simulate the clip's length. Can be configured to fail.
pub struct MockSink {
    duration: std::time::Duration,
    fail: bool,
    played: Mutex<Vec<Vec<u8>>>,
    stops: std::sync::atomic::AtomicUsize,
}

impl MockSink {
    pub fn new() -> Self {
        Self {
            duration: std::time::Duration::from_millis(10),
            fail: false,
            played: Mutex::new(Vec::new()),
            stops: std::sync::atomic::AtomicUsize::new(0),
        }
    }

    /// Simulated clip duration.
    pub fn with_duration(mut self, duration: std::time::Duration) -> Self {
        self.duration = duration;
        self
    }

    /// Make every `play()` call fail after recording the clip.
    pub fn failing(mut self) -> Self {
        self.fail = true;
        self
    }

    /// Clips handed to `play()`, in order.
    pub fn played(&self) -> Vec<Vec<u8>> {
        self.played.lock().clone()
    }

    pub fn play_count(&self) -> usize {
        self.played.lock().len()
    }

    pub fn stop_calls(&self) -> usize {
        self.stops.load(std::sync::atomic::Ordering::SeqCst)
    }
}

impl Default for MockSink {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait::async_trait]
impl AudioSink for MockSink {
    async fn play(&self, audio: &[u8]) -> Result<()> {
        // Record before sleeping so aborted clips are still visible to tests.
        self.played.lock().push(audio.to_vec());
        tokio::time::sleep(self.duration).await;
        if self.fail {
            return Err(crate::error::VoxloopError::Playback {
                message: "mock sink failure".to_string(),
            });
        }
        Ok(())
    }

    fn stop(&self) {
        self.stops.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::time::Duration;

    fn completion_flag() -> (Arc<AtomicBool>, impl FnOnce() + Send + 'static) {
        let flag = Arc::new(AtomicBool::new(false));
        let setter = {
            let flag = Arc::clone(&flag);
            move || flag.store(true, Ordering::SeqCst)
        };
        (flag, setter)
    }

    #[tokio::test]
    async fn play_delivers_audio_and_runs_completion() {
        let sink = Arc::new(MockSink::new().with_duration(Duration::from_millis(1)));
        let playback = Playback::new(Arc::clone(&sink) as Arc<dyn AudioSink>);

        let (done, on_done) = completion_flag();
        assert!(playback.play(vec![1, 2, 3], || true, on_done));

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(sink.played(), vec![vec![1, 2, 3]]);
        assert!(done.load(Ordering::SeqCst));
        assert!(!playback.is_playing());
    }

    #[tokio::test]
    async fn stale_guard_refuses_to_start() {
        let sink = Arc::new(MockSink::new());
        let playback = Playback::new(Arc::clone(&sink) as Arc<dyn AudioSink>);

        let (done, on_done) = completion_flag();
        assert!(!playback.play(vec![9], || false, on_done));

        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(sink.play_count(), 0);
        assert!(!done.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn guard_turning_stale_suppresses_completion() {
        let sink = Arc::new(MockSink::new().with_duration(Duration::from_millis(10)));
        let playback = Playback::new(Arc::clone(&sink) as Arc<dyn AudioSink>);

        let live = Arc::new(AtomicBool::new(true));
        let guard_live = Arc::clone(&live);
        let (done, on_done) = completion_flag();
        assert!(playback.play(vec![1], move || guard_live.load(Ordering::SeqCst), on_done));

        // Invalidate mid-clip.
        live.store(false, Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(30)).await;

        assert_eq!(sink.play_count(), 1);
        assert!(!done.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn playback_failure_still_runs_completion() {
        let sink = Arc::new(
            MockSink::new()
                .with_duration(Duration::from_millis(1))
                .failing(),
        );
        let playback = Playback::new(Arc::clone(&sink) as Arc<dyn AudioSink>);

        let (done, on_done) = completion_flag();
        assert!(playback.play(vec![7], || true, on_done));

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(done.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn new_clip_replaces_previous_clip() {
        let sink = Arc::new(MockSink::new().with_duration(Duration::from_millis(100)));
        let playback = Playback::new(Arc::clone(&sink) as Arc<dyn AudioSink>);

        let completions = Arc::new(AtomicUsize::new(0));
        let first_completions = Arc::clone(&completions);
        playback.play(vec![1], || true, move || {
            first_completions.fetch_add(1, Ordering::SeqCst);
        });
        tokio::time::sleep(Duration::from_millis(5)).await;

        let second_completions = Arc::clone(&completions);
        playback.play(vec![2], || true, move || {
            second_completions.fetch_add(1, Ordering::SeqCst);
        });

        tokio::time::sleep(Duration::from_millis(150)).await;
        // The first clip was aborted mid-sleep; only the second completed.
        assert_eq!(completions.load(Ordering::SeqCst), 1);
        assert_eq!(sink.play_count(), 2);
    }

    #[tokio::test]
    async fn stop_interrupts_clip_and_tells_the_sink() {
        let sink = Arc::new(MockSink::new().with_duration(Duration::from_millis(100)));
        let playback = Playback::new(Arc::clone(&sink) as Arc<dyn AudioSink>);

        let (done, on_done) = completion_flag();
        playback.play(vec![1], || true, on_done);
        tokio::time::sleep(Duration::from_millis(5)).await;

        playback.stop();
        tokio::time::sleep(Duration::from_millis(120)).await;

        assert!(!done.load(Ordering::SeqCst));
        assert!(!playback.is_playing());
        assert_eq!(sink.stop_calls(), 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn rapid_replacement_keeps_a_single_player() {
        let sink = Arc::new(MockSink::new().with_duration(Duration::from_millis(50)));
        let playback = Playback::new(Arc::clone(&sink) as Arc<dyn AudioSink>);

        let completions = Arc::new(AtomicUsize::new(0));
        for i in 0..10u8 {
            let counter = Arc::clone(&completions);
            playback.play(vec![i], || true, move || {
                counter.fetch_add(1, Ordering::SeqCst);
            });
            tokio::time::sleep(Duration::from_millis(3)).await;
        }

        tokio::time::sleep(Duration::from_millis(100)).await;
        // Every clip but the survivor was aborted mid-flight.
        assert_eq!(completions.load(Ordering::SeqCst), 1);
        assert_eq!(sink.played().last(), Some(&vec![9]));
        assert!(!playback.is_playing());
    }

    #[tokio::test]
    async fn stop_with_nothing_playing_is_harmless() {
        let sink = Arc::new(MockSink::new());
        let playback = Playback::new(Arc::clone(&sink) as Arc<dyn AudioSink>);

        playback.stop();
        playback.stop();
        assert!(!playback.is_playing());
        assert_eq!(sink.stop_calls(), 2);
    }
}
