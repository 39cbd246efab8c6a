//! Room client seam.
//!
//! Joining, negotiation and RTCP transport belong to the room client. The
//! adapter only needs to write RTCP feedback for a track and to hang up.

use std::sync::Arc;

use async_trait::async_trait;

use crate::config::LiveKitConfig;

#[derive(Debug, thiserror::Error)]
pub enum RoomError {
    #[error("room connection failed: {0}")]
    Connect(String),
    #[error("track {0} is not subscribed")]
    TrackNotFound(String),
    #[error("RTCP write failed: {0}")]
    Write(String),
}

/// A joined room.
#[async_trait]
pub trait Room: Send + Sync {
    /// Send an RTCP packet towards the publisher of `track_id`.
    async fn write_rtcp(&self, track_id: &str, packet: &[u8]) -> Result<(), RoomError>;

    /// Leave the room. Must not block on network I/O.
    fn disconnect(&self);
}

/// Joins rooms with the configured credentials.
#[async_trait]
pub trait RoomConnector: Send + Sync {
    async fn join(&self, cfg: &LiveKitConfig, room_id: &str) -> Result<Arc<dyn Room>, RoomError>;
}
