//! The recorder seen from the adapter: a narrow capability interface.
//!
//! Encoding, muxing and file writing live behind [`RecorderPort`]. The adapter
//! never inspects recorder internals beyond what the trait exposes.

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::keyframe::KeyframeRequester;
use crate::media::rtp::RtpPacket;

/// Recorder-side statistics for one track (what was written, not what arrived).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RecorderTrackStats {
    pub packets_written: u64,
    pub bytes_written: u64,
    pub keyframes_written: u64,
    pub first_timestamp: u32,
    pub last_timestamp: u32,
    pub duration_ms: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RecorderStats {
    pub video: Option<RecorderTrackStats>,
    pub audio: Option<RecorderTrackStats>,
}

/// Capabilities the adapter consumes from a recorder.
///
/// Methods take `&self`; implementors use interior mutability since packets
/// for different tracks are pushed from concurrent tasks. Push calls are fire
/// and forget.
pub trait RecorderPort: Send + Sync {
    fn push_video(&self, packet: &RtpPacket);
    fn push_audio(&self, packet: &RtpPacket);

    /// A sequence number that will never arrive.
    fn notify_skipped_packet(&self, seq: u16);

    fn set_has_audio(&self, has_audio: bool);
    fn has_audio(&self) -> bool;
    fn set_has_video(&self, has_video: bool);
    fn has_video(&self) -> bool;

    fn video_timestamp(&self) -> Duration;
    fn audio_timestamp(&self) -> Duration;

    /// Callback target for "I need a keyframe for track X".
    fn set_keyframe_requester(&self, requester: Arc<dyn KeyframeRequester>);

    fn file_path(&self) -> String;
    fn stats(&self) -> RecorderStats;

    /// Finalize the recording and return its total duration.
    fn close(&self) -> Duration;
}
