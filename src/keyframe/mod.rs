//! Keyframe request brokering.
//!
//! Whoever notices that a keyframe is needed (the recorder after a decode gap,
//! the ingestion path after packet loss) enqueues a request through a
//! [`KeyframeSender`]. A single [`KeyframeBroker`] task drains the queue and
//! writes a PLI into the room.
//!
//! The producer side never blocks: a full queue or a stopped broker simply
//! drops the request.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::media::rtcp;
use crate::room::Room;

/// Capability handed to the recorder so it can ask for keyframes.
pub trait KeyframeRequester: Send + Sync {
    fn request_keyframe(&self, track_id: &str);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyframeReason {
    Recorder,
    PacketLoss,
}

#[derive(Debug, Clone)]
pub struct KeyframeRequest {
    pub track_id: String,
    pub reason: KeyframeReason,
}

/// Producer half of the keyframe queue.
#[derive(Debug, Clone)]
pub struct KeyframeSender {
    tx: mpsc::Sender<KeyframeRequest>,
}

/// Create a bounded keyframe queue.
pub fn channel(capacity: usize) -> (KeyframeSender, mpsc::Receiver<KeyframeRequest>) {
    let (tx, rx) = mpsc::channel(capacity.max(1));
    (KeyframeSender { tx }, rx)
}

impl KeyframeSender {
    /// Enqueue a request. Returns `false` if it was dropped.
    pub fn request(&self, track_id: &str, reason: KeyframeReason) -> bool {
        let req = KeyframeRequest {
            track_id: track_id.to_string(),
            reason,
        };
        match self.tx.try_send(req) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(req)) => {
                tracing::debug!(
                    "Keyframe queue full, dropping request for {} ({:?})",
                    req.track_id,
                    req.reason
                );
                false
            }
            Err(mpsc::error::TrySendError::Closed(req)) => {
                tracing::debug!(
                    "Keyframe broker stopped, dropping request for {}",
                    req.track_id
                );
                false
            }
        }
    }

    /// Whether the broker side is gone (session closed).
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

impl KeyframeRequester for KeyframeSender {
    fn request_keyframe(&self, track_id: &str) {
        self.request(track_id, KeyframeReason::Recorder);
    }
}

/// What the broker needs from the session that owns it.
pub trait PliSink: Send + Sync {
    /// Current room handle, `None` once the session is closed.
    fn room(&self) -> Option<Arc<dyn Room>>;
    /// Media SSRC of `track_id`, `None` if the track is unknown.
    fn media_ssrc(&self, track_id: &str) -> Option<u32>;
    /// A PLI for `track_id` was written successfully.
    fn record_pli(&self, track_id: &str);
}

/// Consumer loop turning keyframe requests into PLIs.
pub struct KeyframeBroker {
    rx: mpsc::Receiver<KeyframeRequest>,
    sink: Arc<dyn PliSink>,
    cancel: CancellationToken,
    throttle: Duration,
    sender_ssrc: u32,
    last_sent: HashMap<String, Instant>,
}

impl KeyframeBroker {
    pub fn new(
        rx: mpsc::Receiver<KeyframeRequest>,
        sink: Arc<dyn PliSink>,
        cancel: CancellationToken,
        throttle: Duration,
        sender_ssrc: u32,
    ) -> Self {
        Self {
            rx,
            sink,
            cancel,
            throttle,
            sender_ssrc,
            last_sent: HashMap::new(),
        }
    }

    /// Run the loop on its own task. The task yields the number of PLIs sent.
    pub fn spawn(self) -> JoinHandle<u64> {
        tokio::spawn(self.run())
    }

    /// Drain requests until cancelled or every sender is dropped.
    pub async fn run(mut self) -> u64 {
        let mut sent = 0u64;
        tracing::debug!("Keyframe broker started (throttle: {:?})", self.throttle);

        loop {
            tokio::select! {
                biased;
                _ = self.cancel.cancelled() => break,
                req = self.rx.recv() => match req {
                    Some(req) => {
                        if self.handle(req).await {
                            sent += 1;
                        }
                    }
                    None => break,
                },
            }
        }

        // Anything still queued is dropped with the receiver.
        self.rx.close();
        tracing::debug!("Keyframe broker stopped after {} PLIs", sent);
        sent
    }

    async fn handle(&mut self, req: KeyframeRequest) -> bool {
        let Some(media_ssrc) = self.sink.media_ssrc(&req.track_id) else {
            tracing::warn!("Keyframe requested for unknown track {}", req.track_id);
            return false;
        };

        if !self.throttle.is_zero() {
            if let Some(last) = self.last_sent.get(&req.track_id) {
                if last.elapsed() < self.throttle {
                    tracing::trace!("PLI for {} throttled", req.track_id);
                    return false;
                }
            }
        }

        let Some(room) = self.sink.room() else {
            tracing::debug!("No room, dropping keyframe request for {}", req.track_id);
            return false;
        };

        let pli = rtcp::build_pli(self.sender_ssrc, media_ssrc);
        match room.write_rtcp(&req.track_id, &pli).await {
            Ok(()) => {
                self.sink.record_pli(&req.track_id);
                self.last_sent.insert(req.track_id.clone(), Instant::now());
                tracing::debug!(
                    "Sent PLI for {} (media SSRC: {:#010x}, reason: {:?})",
                    req.track_id,
                    media_ssrc,
                    req.reason
                );
                true
            }
            Err(e) => {
                tracing::warn!("Failed to send PLI for {}: {}", req.track_id, e);
                false
            }
        }
    }
}
