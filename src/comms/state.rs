//! Shared state for the comms channels.
//!
//! Channels receive an `Arc<CommsState>` and go through [`CommsState::handle_turn`]
//! for every message. Turns are serialized: one turn (all tools and the model
//! call) completes before the next one starts. A started turn always runs to
//! completion, even when the channel stops waiting for it.

use std::sync::Arc;
use std::time::Instant;

use tokio::sync::{Mutex, OwnedMutexGuard};
use tokio::task::JoinHandle;
use tracing::debug;

use crate::triage::TriageContext;
use crate::triage::dispatch::TurnReply;
use crate::triage::utterance::{Exchange, Utterance};

pub struct CommsState {
    context: Arc<TriageContext>,
    turn_lock: Arc<Mutex<()>>,
    started: Instant,
}

impl CommsState {
    pub fn new(context: Arc<TriageContext>) -> Self {
        Self { context, turn_lock: Arc::new(Mutex::new(())), started: Instant::now() }
    }

    pub fn context(&self) -> &TriageContext {
        &self.context
    }

    pub fn uptime_seconds(&self) -> u64 {
        self.started.elapsed().as_secs()
    }

    /// Run one turn on behalf of `channel_id`, waiting for any turn already
    /// in progress to finish first.
    pub async fn handle_turn(
        &self,
        channel_id: &str,
        utterance: &Utterance,
        history: &[Exchange],
    ) -> TurnReply {
        let _guard = self.turn_lock.lock().await;
        log_turn_start(channel_id, utterance);
        self.context.dispatcher.handle_turn(utterance, history).await
    }

    /// Wait for the turn slot, then run the turn on its own task.
    ///
    /// Returns once the turn has started. Dropping the handle detaches the
    /// turn instead of cancelling it; the slot stays held until it finishes.
    pub async fn start_turn(
        &self,
        channel_id: &str,
        utterance: Utterance,
        history: Vec<Exchange>,
    ) -> JoinHandle<TurnReply> {
        let guard: OwnedMutexGuard<()> = self.turn_lock.clone().lock_owned().await;
        log_turn_start(channel_id, &utterance);
        let context = self.context.clone();
        tokio::spawn(async move {
            let reply = context.dispatcher.handle_turn(&utterance, &history).await;
            drop(guard);
            reply
        })
    }
}

fn log_turn_start(channel_id: &str, utterance: &Utterance) {
    debug!(%channel_id, voice = utterance.is_voice(), image = utterance.image().is_some(), "turn started");
}
