//! Front-end channels.
//!
//! Each channel (console, HTTP) implements [`Component`] and is spawned as an
//! independent task by [`start`]. Channels capture the shared
//! [`Arc<CommsState>`] at construction.

mod state;
#[cfg(feature = "channel-pty")]
pub mod pty;
#[cfg(feature = "channel-axum")]
pub mod axum_channel;

pub use state::CommsState;

use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::config::Config;
use crate::runtime::{Component, ComponentsHandle, spawn_components};

/// Spawn every configured channel. Returns as soon as the tasks are spawned;
/// the handle resolves when all channels have exited.
pub fn start(config: &Config, state: Arc<CommsState>, shutdown: CancellationToken) -> ComponentsHandle {
    let mut components: Vec<Box<dyn Component>> = Vec::new();

    #[cfg(feature = "channel-pty")]
    if config.comms.pty.enabled {
        info!("loading pty channel");
        components.push(Box::new(pty::PtyChannel::new("pty0", state.clone())));
    }

    #[cfg(feature = "channel-axum")]
    if config.comms.axum_channel.enabled {
        info!(bind = %config.comms.axum_channel.bind, "loading axum channel");
        components.push(Box::new(axum_channel::AxumChannel::new(
            "axum0",
            &config.comms.axum_channel,
            &config.bot_name,
            state.clone(),
        )));
    }
    #[cfg(not(feature = "channel-axum"))]
    if config.comms.axum_channel.enabled {
        warn!("[comms.axum_channel] is enabled but this binary was built without `channel-axum`");
    }

    if components.is_empty() {
        warn!("no comms channels enabled, nothing to serve");
    }
    drop(state);

    spawn_components(components, shutdown)
}
