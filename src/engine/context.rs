#[cfg(test)]
#[path = "context_test.rs"]
mod tests;

use std::sync::{Mutex, atomic};

use tokio_util::sync::CancellationToken;

/// Shared orchestration state: the cancellation token of the current send
/// batch and the replay/playback pause flags.
///
/// Both pause flags start raised. A replay run lowers its flag when it
/// starts, a playback step lowers its flag when it begins.
pub struct OrchestrationContext {
    batch_token: Mutex<CancellationToken>,
    playback_token: Mutex<CancellationToken>,
    replay_paused: atomic::AtomicBool,
    playback_paused: atomic::AtomicBool,
}

impl Default for OrchestrationContext {
    fn default() -> Self {
        Self {
            batch_token: Mutex::new(CancellationToken::new()),
            playback_token: Mutex::new(CancellationToken::new()),
            replay_paused: atomic::AtomicBool::new(true),
            playback_paused: atomic::AtomicBool::new(true),
        }
    }
}

impl OrchestrationContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start a new send batch. The previous batch is cancelled, the
    /// returned token is shared by every send of the new batch.
    pub fn new_batch(&self) -> CancellationToken {
        replace_token(&self.batch_token)
    }

    pub fn batch_token(&self) -> CancellationToken {
        current_token(&self.batch_token)
    }

    /// Abort every in-flight send of the current batch.
    pub fn cancel_batch(&self) {
        log::debug!("Cancelling current send batch");
        replace_token(&self.batch_token);
    }

    pub fn pause_replay(&self) {
        self.replay_paused.store(true, atomic::Ordering::SeqCst);
    }

    pub fn resume_replay(&self) {
        self.replay_paused.store(false, atomic::Ordering::SeqCst);
    }

    pub fn is_replay_paused(&self) -> bool {
        self.replay_paused.load(atomic::Ordering::SeqCst)
    }

    pub fn playback_token(&self) -> CancellationToken {
        current_token(&self.playback_token)
    }

    pub fn resume_playback(&self) {
        self.playback_paused.store(false, atomic::Ordering::SeqCst);
    }

    pub fn is_playback_paused(&self) -> bool {
        self.playback_paused.load(atomic::Ordering::SeqCst)
    }

    /// Pause playback and interrupt a pending step delay.
    pub fn stop_playback(&self) {
        self.playback_paused.store(true, atomic::Ordering::SeqCst);
        replace_token(&self.playback_token);
    }
}

fn current_token(slot: &Mutex<CancellationToken>) -> CancellationToken {
    slot.lock().unwrap_or_else(|e| e.into_inner()).clone()
}

/// Cancel the token held in `slot` and install a fresh one.
fn replace_token(slot: &Mutex<CancellationToken>) -> CancellationToken {
    let mut token = slot.lock().unwrap_or_else(|e| e.into_inner());
    token.cancel();
    *token = CancellationToken::new();
    token.clone()
}
