//! Outgoing Payload Encoding
//!
//! Chooses between a single base64 frame and a cycling fountain
//! transmission based on payload size, and produces the frame strings
//! the display loop renders.

use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use super::fountain::FountainEncoder;
use super::ur::{self, UrType};
use super::{QrError, QrResult, FRAGMENT_SIZE, FRAME_INTERVAL_MS, MAX_SINGLE_QR_BYTES};

/// Binary body carried inside each UR fragment string.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FountainFrame {
    /// Random id tying fragments of one transmission together
    pub message_id: u64,
    /// Emission sequence number
    pub seq: u32,
    /// Number of source fragments
    pub fragment_count: u32,
    /// Original payload length in bytes
    pub message_len: u32,
    /// CRC32 of the complete payload
    pub checksum: u32,
    /// Source fragment indexes XORed into `data`
    pub indexes: Vec<u32>,
    /// XOR of the selected fragments
    pub data: Vec<u8>,
}

/// An encoded outgoing payload.
pub enum EncodedPayload {
    /// Fits one QR frame
    Single(String),
    /// Needs a cycling multi-frame transmission
    Fountain(FountainStream),
}

impl EncodedPayload {
    /// Frame count hint for the display: 1 for single, the fragment
    /// count for fountain transmissions.
    pub fn frame_count(&self) -> usize {
        match self {
            EncodedPayload::Single(_) => 1,
            EncodedPayload::Fountain(stream) => stream.fragment_count(),
        }
    }
}

/// Cycling fountain-frame producer. The sender has no feedback channel:
/// the display loop keeps asking for the next frame at a fixed cadence
/// until the user leaves the screen.
pub struct FountainStream {
    encoder: FountainEncoder,
    ur_type: UrType,
    message_id: u64,
    checksum: u32,
    next_seq: u32,
}

impl FountainStream {
    pub(crate) fn new(payload: &[u8], ur_type: UrType) -> Self {
        Self {
            encoder: FountainEncoder::new(payload, FRAGMENT_SIZE),
            ur_type,
            message_id: rand::thread_rng().gen(),
            checksum: crc32fast::hash(payload),
            next_seq: 0,
        }
    }

    pub fn fragment_count(&self) -> usize {
        self.encoder.fragment_count()
    }

    /// Interval the display loop should wait between frames.
    pub fn frame_interval(&self) -> Duration {
        Duration::from_millis(FRAME_INTERVAL_MS)
    }

    /// Produce the next frame string, advancing the sequence.
    pub fn next_frame(&mut self) -> QrResult<String> {
        let part = self.encoder.part(self.next_seq);
        let frame = FountainFrame {
            message_id: self.message_id,
            seq: part.seq,
            fragment_count: self.encoder.fragment_count() as u32,
            message_len: self.encoder.message_len() as u32,
            checksum: self.checksum,
            indexes: part.indexes,
            data: part.data,
        };
        let body =
            bincode::serialize(&frame).map_err(|e| QrError::InvalidData(e.to_string()))?;
        let text = ur::format_fragment(
            self.ur_type,
            part.seq + 1,
            frame.fragment_count,
            &body,
        );
        self.next_seq = self.next_seq.wrapping_add(1);
        Ok(text)
    }
}

/// Encode an outgoing payload, selecting single-frame or fountain
/// transmission by size.
pub fn encode_payload(payload: &[u8], ur_type: UrType) -> EncodedPayload {
    let base64_len = payload.len().div_ceil(3) * 4;
    if base64_len <= MAX_SINGLE_QR_BYTES {
        EncodedPayload::Single(BASE64.encode(payload))
    } else {
        EncodedPayload::Fountain(FountainStream::new(payload, ur_type))
    }
}
