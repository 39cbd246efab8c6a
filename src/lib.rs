//! Room recorder adapter
//!
//! Sits between a live WebRTC media room and a media recorder: keeps per-track
//! RTP statistics, forwards packets to the recorder, relays keyframe requests
//! back into the room and closes the session exactly once.

pub mod config;
pub mod error;
pub mod keyframe;
pub mod media;
pub mod recorder;
pub mod room;
pub mod session;
pub mod stats;

#[cfg(test)]
pub(crate) mod testing;

pub use config::{AdapterConfig, Config, LiveKitConfig};
pub use error::{AdapterError, Result};
pub use keyframe::{KeyframeRequester, KeyframeSender};
pub use media::rtp::RtpPacket;
pub use media::TrackKind;
pub use recorder::{RecorderPort, RecorderStats, RecorderTrackStats};
pub use room::{Room, RoomConnector, RoomError};
pub use session::{PacketSummary, SessionAdapter, SessionState};
pub use stats::{AdapterStats, AdapterTrackStats};

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Install a fmt subscriber honouring `RUST_LOG`, else `default_filter`.
///
/// Meant for binaries and tests embedding the adapter. Returns `false` if a
/// global subscriber was already set.
pub fn init_tracing(default_filter: &str) -> bool {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default_filter.into()),
        )
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .try_init()
        .is_ok()
}
