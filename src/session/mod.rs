//! Session adapter: binds one room session to one recorder.
//!
//! Owns the per-track wire statistics, forwards packets to the recorder, runs
//! the keyframe broker and guarantees that teardown happens exactly once no
//! matter how many callers race on [`SessionAdapter::close`].

use std::cell::RefCell;
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, OnceLock};
use std::time::Duration;

use chrono::Utc;
use parking_lot::{Mutex, RwLock};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::config::{AdapterConfig, LiveKitConfig};
use crate::error::{AdapterError, Result};
use crate::keyframe::{self, KeyframeBroker, KeyframeReason, KeyframeSender, PliSink};
use crate::media::rtp::{self, RtpPacket};
use crate::media::TrackKind;
use crate::recorder::RecorderPort;
use crate::room::{Room, RoomConnector};
use crate::stats::{AdapterStats, AdapterTrackStats, MAX_REPORTED_GAP};

/// Lifecycle of a session. `Closed` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Active,
    Closing,
    Closed,
}

impl SessionState {
    fn from_u8(v: u8) -> Self {
        match v {
            0 => SessionState::Active,
            1 => SessionState::Closing,
            _ => SessionState::Closed,
        }
    }
}

/// Result of applying one batch of packets to a track.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PacketSummary {
    pub packets: usize,
    /// Rollovers detected inside this batch.
    pub wraparounds: u64,
    /// Packets missing in front of packets of this batch.
    pub lost: u64,
    /// Enumerated skipped sequence numbers, in detection order.
    pub skipped: Vec<u16>,
}

/// State shared with the keyframe broker task.
struct Shared {
    track_stats: Mutex<HashMap<String, AdapterTrackStats>>,
    room: Mutex<Option<Arc<dyn Room>>>,
}

impl PliSink for Shared {
    fn room(&self) -> Option<Arc<dyn Room>> {
        self.room.lock().clone()
    }

    fn media_ssrc(&self, track_id: &str) -> Option<u32> {
        self.track_stats.lock().get(track_id).map(|s| s.ssrc)
    }

    fn record_pli(&self, track_id: &str) {
        if let Some(stats) = self.track_stats.lock().get_mut(track_id) {
            stats.pli_requests += 1;
        }
    }
}

thread_local! {
    /// Adapters with a `handle_packets` call running on this thread.
    static FORWARDING: RefCell<Vec<usize>> = const { RefCell::new(Vec::new()) };
}

/// Marks the current thread as forwarding for one adapter until dropped.
struct ForwardingMark(usize);

impl ForwardingMark {
    fn key(adapter: &SessionAdapter) -> usize {
        adapter as *const SessionAdapter as usize
    }

    fn enter(adapter: &SessionAdapter) -> Self {
        let key = Self::key(adapter);
        FORWARDING.with(|f| f.borrow_mut().push(key));
        ForwardingMark(key)
    }

    fn is_set(adapter: &SessionAdapter) -> bool {
        let key = Self::key(adapter);
        FORWARDING.with(|f| f.borrow().contains(&key))
    }
}

impl Drop for ForwardingMark {
    fn drop(&mut self) {
        FORWARDING.with(|f| {
            let mut f = f.borrow_mut();
            if let Some(pos) = f.iter().rposition(|k| *k == self.0) {
                f.remove(pos);
            }
        });
    }
}

pub struct SessionAdapter {
    session_id: String,
    room_id: String,
    livekit: LiveKitConfig,
    track_ids: Vec<String>,
    shared: Arc<Shared>,
    recorder: Arc<dyn RecorderPort>,
    /// Allocated once, never replaced; outlives close.
    keyframe_tx: KeyframeSender,
    cancel: CancellationToken,
    state: AtomicU8,
    /// Held shared by forwarding, exclusively by teardown around `recorder.close()`.
    forward_gate: RwLock<()>,
    /// Close latch; holds the recorder's duration once teardown ran.
    duration: OnceLock<Duration>,
    broker: Mutex<Option<JoinHandle<u64>>>,
}

impl SessionAdapter {
    /// Create an adapter without a room. Must be called inside a Tokio runtime.
    ///
    /// The broker task stops when `ctx` is cancelled or the adapter is closed.
    pub fn new(
        ctx: &CancellationToken,
        livekit: &LiveKitConfig,
        adapter_cfg: &AdapterConfig,
        recorder: Arc<dyn RecorderPort>,
        session_id: impl Into<String>,
        room_id: impl Into<String>,
        track_ids: Vec<String>,
    ) -> Arc<Self> {
        let session_id = session_id.into();
        let room_id = room_id.into();

        let mut ids: Vec<String> = Vec::with_capacity(track_ids.len());
        for id in track_ids {
            if !ids.contains(&id) {
                ids.push(id);
            }
        }

        let track_stats = ids
            .iter()
            .map(|id| (id.clone(), AdapterTrackStats::default()))
            .collect();
        let shared = Arc::new(Shared {
            track_stats: Mutex::new(track_stats),
            room: Mutex::new(None),
        });

        let cancel = ctx.child_token();
        let (keyframe_tx, keyframe_rx) = keyframe::channel(adapter_cfg.keyframe_queue_capacity);

        let sender_ssrc = {
            let id = uuid::Uuid::new_v4();
            let bytes = id.as_bytes();
            u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]])
        };
        let broker = KeyframeBroker::new(
            keyframe_rx,
            shared.clone(),
            cancel.clone(),
            adapter_cfg.pli_throttle(),
            sender_ssrc,
        )
        .spawn();

        recorder.set_keyframe_requester(Arc::new(keyframe_tx.clone()));

        tracing::info!(
            "Session {} created for room {} ({} tracks, file: {})",
            session_id,
            room_id,
            ids.len(),
            recorder.file_path()
        );

        Arc::new(SessionAdapter {
            session_id,
            room_id,
            livekit: livekit.clone(),
            track_ids: ids,
            shared,
            recorder,
            keyframe_tx,
            cancel,
            state: AtomicU8::new(SessionState::Active as u8),
            forward_gate: RwLock::new(()),
            duration: OnceLock::new(),
            broker: Mutex::new(Some(broker)),
        })
    }

    /// Join `room_id` through `connector`, then create the adapter around it.
    #[allow(clippy::too_many_arguments)]
    pub async fn connect(
        ctx: &CancellationToken,
        livekit: &LiveKitConfig,
        adapter_cfg: &AdapterConfig,
        recorder: Arc<dyn RecorderPort>,
        session_id: impl Into<String>,
        room_id: impl Into<String>,
        track_ids: Vec<String>,
        connector: &dyn RoomConnector,
    ) -> Result<Arc<Self>> {
        livekit.validate()?;
        let room_id = room_id.into();

        tracing::info!("Joining room {} on {}", room_id, livekit.host);
        let room = tokio::select! {
            _ = ctx.cancelled() => return Err(AdapterError::Closed),
            joined = connector.join(livekit, &room_id) => joined.map_err(AdapterError::RoomJoin)?,
        };

        let adapter = Self::new(
            ctx,
            livekit,
            adapter_cfg,
            recorder,
            session_id,
            room_id,
            track_ids,
        );
        adapter.attach_room(room)?;
        Ok(adapter)
    }

    /// Hand the joined room to the adapter.
    pub fn attach_room(&self, room: Arc<dyn Room>) -> Result<()> {
        // Checked under the room lock so teardown cannot miss a late attach.
        let mut slot = self.shared.room.lock();
        if self.state() != SessionState::Active {
            return Err(AdapterError::Closed);
        }
        if slot.is_some() {
            return Err(AdapterError::RoomAlreadyAttached);
        }
        *slot = Some(room);
        tracing::debug!("Room {} attached to session {}", self.room_id, self.session_id);
        Ok(())
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn room_id(&self) -> &str {
        &self.room_id
    }

    pub fn livekit_host(&self) -> &str {
        &self.livekit.host
    }

    pub fn track_ids(&self) -> &[String] {
        &self.track_ids
    }

    pub fn has_room(&self) -> bool {
        self.shared.room.lock().is_some()
    }

    pub fn state(&self) -> SessionState {
        SessionState::from_u8(self.state.load(Ordering::Acquire))
    }

    pub fn is_closed(&self) -> bool {
        self.state() == SessionState::Closed
    }

    /// The keyframe queue producer. Valid for the adapter's whole lifetime.
    pub fn keyframe_requester(&self) -> &KeyframeSender {
        &self.keyframe_tx
    }

    fn ensure_active(&self) -> Result<()> {
        if self.state() == SessionState::Active {
            Ok(())
        } else {
            Err(AdapterError::Closed)
        }
    }

    fn ensure_tracked(&self, track_id: &str) -> Result<()> {
        if self.track_ids.iter().any(|id| id == track_id) {
            Ok(())
        } else {
            Err(AdapterError::UnknownTrack(track_id.to_string()))
        }
    }

    /// Apply a batch of packets to the track's statistics, in call order.
    ///
    /// The whole batch is applied under one lock so `get_stats` never sees a
    /// partially applied packet.
    pub fn process_packet_stats(
        &self,
        track_id: &str,
        packets: &[RtpPacket],
    ) -> Result<PacketSummary> {
        self.ensure_tracked(track_id)?;

        let mut summary = PacketSummary {
            packets: packets.len(),
            ..Default::default()
        };
        if packets.is_empty() {
            return Ok(summary);
        }

        let now = Utc::now().timestamp();
        let mut map = self.shared.track_stats.lock();
        let stats = map.entry(track_id.to_string()).or_default();

        for pkt in packets {
            let update = stats.record_sequence(pkt.sequence_number);
            stats.ssrc = pkt.ssrc;
            if update.wrapped {
                summary.wraparounds += 1;
            }

            let missing = update.missing_count();
            if missing == 0 {
                continue;
            }
            summary.lost += missing as u64;
            if missing <= MAX_REPORTED_GAP as u32 {
                summary.skipped.extend(update.missing_seqs());
            } else {
                tracing::debug!(
                    "Track {}: {} packets missing before seq {}, resyncing",
                    track_id,
                    missing,
                    pkt.sequence_number
                );
            }
        }
        stats.touch(now);

        if summary.wraparounds > 0 {
            tracing::trace!(
                "Track {}: sequence wrapped (total: {})",
                track_id,
                stats.seq_num_wrap_arounds
            );
        }

        Ok(summary)
    }

    /// Update stats for a batch and forward it to the recorder.
    ///
    /// A batch is forwarded whole or not at all with respect to a concurrent
    /// [`close`](Self::close): teardown waits for in-flight batches before it
    /// closes the recorder. A recorder callback that closes the session stops
    /// forwarding at the next packet and the call returns `Closed`.
    pub fn handle_packets(
        &self,
        track_id: &str,
        kind: TrackKind,
        packets: &[RtpPacket],
    ) -> Result<PacketSummary> {
        let _gate = if ForwardingMark::is_set(self) {
            self.forward_gate.read_recursive()
        } else {
            self.forward_gate.read()
        };
        let _mark = ForwardingMark::enter(self);
        self.ensure_active()?;

        let summary = self.process_packet_stats(track_id, packets)?;

        for seq in &summary.skipped {
            self.ensure_active()?;
            self.recorder.notify_skipped_packet(*seq);
        }

        match kind {
            TrackKind::Video => {
                if !self.recorder.has_video() {
                    self.ensure_active()?;
                    self.recorder.set_has_video(true);
                }
                for pkt in packets {
                    self.ensure_active()?;
                    self.recorder.push_video(pkt);
                }
            }
            TrackKind::Audio => {
                if !self.recorder.has_audio() {
                    self.ensure_active()?;
                    self.recorder.set_has_audio(true);
                }
                for pkt in packets {
                    self.ensure_active()?;
                    self.recorder.push_audio(pkt);
                }
            }
        }

        if kind == TrackKind::Video && summary.lost > 0 {
            self.keyframe_tx.request(track_id, KeyframeReason::PacketLoss);
        }

        Ok(summary)
    }

    /// Decode one raw RTP packet and forward it.
    ///
    /// Returns `Ok(false)` when the bytes were not valid RTP; the failure is
    /// counted in the track's `rtp_read_errors`.
    pub fn handle_raw_packet(&self, track_id: &str, kind: TrackKind, data: &[u8]) -> Result<bool> {
        self.ensure_tracked(track_id)?;

        match rtp::decode(data) {
            Ok(pkt) => {
                self.handle_packets(track_id, kind, std::slice::from_ref(&pkt))?;
                Ok(true)
            }
            Err(e) => {
                tracing::trace!("Track {}: unreadable RTP packet: {}", track_id, e);
                self.record_read_error(track_id)?;
                Ok(false)
            }
        }
    }

    /// Count a transport-level read failure against a track.
    pub fn record_read_error(&self, track_id: &str) -> Result<()> {
        self.ensure_tracked(track_id)?;
        self.shared
            .track_stats
            .lock()
            .entry(track_id.to_string())
            .or_default()
            .rtp_read_errors += 1;
        Ok(())
    }

    pub fn track_stats(&self, track_id: &str) -> Option<AdapterTrackStats> {
        self.shared.track_stats.lock().get(track_id).cloned()
    }

    pub fn get_stats(&self) -> AdapterStats {
        let tracks: BTreeMap<String, AdapterTrackStats> = self
            .shared
            .track_stats
            .lock()
            .iter()
            .map(|(id, s)| (id.clone(), s.clone()))
            .collect();

        AdapterStats {
            session_id: self.session_id.clone(),
            room_id: self.room_id.clone(),
            file_path: self.recorder.file_path(),
            audio_timestamp_ms: self.recorder.audio_timestamp().as_millis() as u64,
            video_timestamp_ms: self.recorder.video_timestamp().as_millis() as u64,
            tracks,
            recorder: self.recorder.stats(),
            duration_ms: self.duration.get().map(|d| d.as_millis() as u64),
        }
    }

    /// Close the session and return the recorded duration.
    ///
    /// Teardown runs once. Concurrent callers wait for it and all get the same
    /// duration; later calls return the cached value.
    pub fn close(&self) -> Duration {
        *self.duration.get_or_init(|| self.teardown())
    }

    fn teardown(&self) -> Duration {
        // A close from inside a recorder callback already holds the gate shared.
        let _gate = (!ForwardingMark::is_set(self)).then(|| self.forward_gate.write());
        self.state
            .store(SessionState::Closing as u8, Ordering::Release);
        tracing::info!("Closing session {} (room {})", self.session_id, self.room_id);

        self.cancel.cancel();
        if let Some(handle) = self.broker.lock().take() {
            handle.abort();
        }

        let duration = self.recorder.close();

        if let Some(room) = self.shared.room.lock().take() {
            room.disconnect();
        }

        self.state
            .store(SessionState::Closed as u8, Ordering::Release);
        tracing::info!(
            "Session {} closed, recorded {:?} to {}",
            self.session_id,
            duration,
            self.recorder.file_path()
        );
        duration
    }
}

impl Drop for SessionAdapter {
    fn drop(&mut self) {
        self.cancel.cancel();
        if let Some(h) = self.broker.lock().take() {
            h.abort();
        }
    }
}
