//! Test doubles for the recorder and the room.

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;

use crate::config::LiveKitConfig;
use crate::keyframe::KeyframeRequester;
use crate::media::rtp::RtpPacket;
use crate::recorder::{RecorderPort, RecorderStats, RecorderTrackStats};
use crate::room::{Room, RoomConnector, RoomError};

#[derive(Default)]
pub struct MockRecorder {
    pub duration: Duration,
    /// Time spent inside `close`, to widen race windows.
    pub close_delay: Duration,
    /// Time spent inside each push.
    pub push_delay: Duration,
    close_calls: AtomicUsize,
    closed: AtomicBool,
    /// Sequence numbers pushed after `close` was entered.
    late: Mutex<Vec<u16>>,
    /// Runs inside `has_video`, to act from within a recorder callback.
    pub on_has_video: Mutex<Option<Box<dyn Fn() + Send + Sync>>>,
    pub video: Mutex<Vec<u16>>,
    pub audio: Mutex<Vec<u16>>,
    pub skipped: Mutex<Vec<u16>>,
    has_audio: AtomicBool,
    has_video: AtomicBool,
    requester: Mutex<Option<Arc<dyn KeyframeRequester>>>,
}

impl MockRecorder {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn with_duration(duration: Duration, close_delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            duration,
            close_delay,
            ..Default::default()
        })
    }

    pub fn close_calls(&self) -> usize {
        self.close_calls.load(Ordering::SeqCst)
    }

    pub fn with_push_delay(push_delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            push_delay,
            ..Default::default()
        })
    }

    pub fn pushed_after_close(&self) -> Vec<u16> {
        self.late.lock().clone()
    }

    fn record_push(&self, into: &Mutex<Vec<u16>>, seq: u16) {
        if self.closed.load(Ordering::SeqCst) {
            self.late.lock().push(seq);
        }
        if !self.push_delay.is_zero() {
            std::thread::sleep(self.push_delay);
        }
        into.lock().push(seq);
    }

    /// Simulate the recorder asking for a keyframe.
    pub fn need_keyframe(&self, track_id: &str) -> bool {
        match self.requester.lock().as_ref() {
            Some(r) => {
                r.request_keyframe(track_id);
                true
            }
            None => false,
        }
    }
}

impl RecorderPort for MockRecorder {
    fn push_video(&self, packet: &RtpPacket) {
        self.record_push(&self.video, packet.sequence_number);
    }

    fn push_audio(&self, packet: &RtpPacket) {
        self.record_push(&self.audio, packet.sequence_number);
    }

    fn notify_skipped_packet(&self, seq: u16) {
        self.skipped.lock().push(seq);
    }

    fn set_has_audio(&self, has_audio: bool) {
        self.has_audio.store(has_audio, Ordering::SeqCst);
    }

    fn has_audio(&self) -> bool {
        self.has_audio.load(Ordering::SeqCst)
    }

    fn set_has_video(&self, has_video: bool) {
        self.has_video.store(has_video, Ordering::SeqCst);
    }

    fn has_video(&self) -> bool {
        if let Some(hook) = self.on_has_video.lock().as_ref() {
            hook();
        }
        self.has_video.load(Ordering::SeqCst)
    }

    fn video_timestamp(&self) -> Duration {
        Duration::ZERO
    }

    fn audio_timestamp(&self) -> Duration {
        Duration::ZERO
    }

    fn set_keyframe_requester(&self, requester: Arc<dyn KeyframeRequester>) {
        *self.requester.lock() = Some(requester);
    }

    fn file_path(&self) -> String {
        "test.webm".to_string()
    }

    fn stats(&self) -> RecorderStats {
        RecorderStats {
            video: Some(RecorderTrackStats::default()),
            audio: Some(RecorderTrackStats::default()),
        }
    }

    fn close(&self) -> Duration {
        self.close_calls.fetch_add(1, Ordering::SeqCst);
        self.closed.store(true, Ordering::SeqCst);
        if !self.close_delay.is_zero() {
            std::thread::sleep(self.close_delay);
        }
        self.duration
    }
}

#[derive(Default)]
pub struct MockRoom {
    writes: Mutex<Vec<(String, Vec<u8>)>>,
    fail: AtomicBool,
    disconnects: AtomicUsize,
    /// When set, only these tracks accept RTCP.
    subscribed: Option<HashSet<String>>,
}

impl MockRoom {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn with_tracks(tracks: &[&str]) -> Arc<Self> {
        Arc::new(Self {
            subscribed: Some(tracks.iter().map(|t| t.to_string()).collect()),
            ..Default::default()
        })
    }

    pub fn writes(&self) -> Vec<(String, Vec<u8>)> {
        self.writes.lock().clone()
    }

    pub fn fail_writes(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }

    pub fn disconnects(&self) -> usize {
        self.disconnects.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Room for MockRoom {
    async fn write_rtcp(&self, track_id: &str, packet: &[u8]) -> Result<(), RoomError> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(RoomError::Write("mock failure".to_string()));
        }
        if let Some(subscribed) = &self.subscribed {
            if !subscribed.contains(track_id) {
                return Err(RoomError::TrackNotFound(track_id.to_string()));
            }
        }
        self.writes
            .lock()
            .push((track_id.to_string(), packet.to_vec()));
        Ok(())
    }

    fn disconnect(&self) {
        self.disconnects.fetch_add(1, Ordering::SeqCst);
    }
}

/// Hands out a fixed room, or refuses to join.
pub struct MockConnector {
    pub room: Option<Arc<MockRoom>>,
}

#[async_trait]
impl RoomConnector for MockConnector {
    async fn join(&self, _cfg: &LiveKitConfig, room_id: &str) -> Result<Arc<dyn Room>, RoomError> {
        match &self.room {
            Some(room) => Ok(room.clone() as Arc<dyn Room>),
            None => Err(RoomError::Connect(format!("room {} unreachable", room_id))),
        }
    }
}
