//! Error types surfaced by the adapter.
//!
//! Per-packet problems (unreadable RTP, gaps, failed PLI writes) are counted in
//! the track statistics and logged; only structural problems end up here.

use crate::room::RoomError;

#[derive(Debug, thiserror::Error)]
pub enum AdapterError {
    /// Packets arrived for a track id that was not configured at construction.
    #[error("unknown track id: {0}")]
    UnknownTrack(String),

    /// The session was already closed.
    #[error("session is closed")]
    Closed,

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("failed to join room")]
    RoomJoin(#[source] RoomError),

    #[error("a room is already attached to this session")]
    RoomAlreadyAttached,
}

pub type Result<T> = std::result::Result<T, AdapterError>;
