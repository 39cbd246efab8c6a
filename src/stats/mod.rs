//! Per-track RTP statistics as observed on the wire.
//!
//! Sequence numbers live in a cyclic 16-bit space. Every packet is compared
//! against the previously recorded `last_seq_num` only, so the result does not
//! depend on how packets were split into batches.

use std::collections::BTreeMap;
use std::ops::Range;

use serde::{Deserialize, Serialize};

use crate::media::rtp::SEQ_NUM_CYCLE;
use crate::recorder::RecorderStats;

/// A backward jump larger than this is a rollover, anything smaller is reordering.
const HALF_CYCLE: u16 = (SEQ_NUM_CYCLE / 2) as u16;

/// Gaps wider than this are counted as lost but not enumerated.
pub const MAX_REPORTED_GAP: u16 = 1000;

/// Wire-side statistics for one track.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AdapterTrackStats {
    /// Unix seconds of the first recorded packet.
    pub start_time: i64,
    /// Unix seconds of the latest recorded packet.
    pub end_time: i64,
    pub first_seq_num: u16,
    pub last_seq_num: u16,
    pub seq_num_wrap_arounds: u64,
    pub pli_requests: u64,
    pub rtp_read_errors: u64,
    pub packets_received: u64,
    pub packets_lost: u64,
    /// SSRC of the latest packet; the PLI media source.
    pub ssrc: u32,
}

/// Outcome of recording a single sequence number.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SequenceUpdate {
    pub wrapped: bool,
    /// Sequence numbers skipped between the previous packet and this one.
    pub missing: Range<u32>,
}

impl SequenceUpdate {
    pub fn missing_count(&self) -> u32 {
        self.missing.end - self.missing.start
    }

    /// Skipped sequence numbers, folded back into the 16-bit space.
    pub fn missing_seqs(&self) -> impl Iterator<Item = u16> {
        self.missing.clone().map(|s| (s % SEQ_NUM_CYCLE) as u16)
    }
}

impl AdapterTrackStats {
    /// Record one packet's sequence number in call order.
    pub fn record_sequence(&mut self, seq: u16) -> SequenceUpdate {
        if self.packets_received == 0 {
            self.first_seq_num = seq;
            self.last_seq_num = seq;
            self.packets_received = 1;
            return SequenceUpdate {
                wrapped: false,
                missing: 0..0,
            };
        }

        let last = self.last_seq_num;
        let wrapped = seq < last && last - seq > HALF_CYCLE;
        if wrapped {
            self.seq_num_wrap_arounds += 1;
        }

        // Forward distance in the cyclic space; >= HALF_CYCLE means reordered.
        let distance = seq.wrapping_sub(last);
        let missing = if distance > 1 && distance < HALF_CYCLE {
            let start = last as u32 + 1;
            start..start + (distance as u32 - 1)
        } else {
            0..0
        };

        self.last_seq_num = seq;
        self.packets_received += 1;
        let update = SequenceUpdate { wrapped, missing };
        self.packets_lost += update.missing_count() as u64;
        update
    }

    /// Refresh the activity window bounds.
    pub fn touch(&mut self, now: i64) {
        if self.start_time == 0 {
            self.start_time = now;
        }
        self.end_time = now;
    }

    /// Total extended sequence span seen so far, counting rollovers.
    pub fn extended_last_seq(&self) -> u64 {
        self.seq_num_wrap_arounds * SEQ_NUM_CYCLE as u64 + self.last_seq_num as u64
    }
}

/// Merged read-only report: wire stats per track next to the recorder's own.
#[derive(Debug, Clone, Serialize)]
pub struct AdapterStats {
    pub session_id: String,
    pub room_id: String,
    pub file_path: String,
    pub audio_timestamp_ms: u64,
    pub video_timestamp_ms: u64,
    pub tracks: BTreeMap<String, AdapterTrackStats>,
    pub recorder: RecorderStats,
    /// Recorded duration, present once the session is closed.
    pub duration_ms: Option<u64>,
}

impl AdapterStats {
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }
}
