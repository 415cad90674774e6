//! QR Transport Codec
//!
//! Turns byte payloads into QR-encodable strings and scanned strings back
//! into payloads. Small payloads travel as a single base64 frame; larger
//! ones are split into LT fountain-coded fragments wrapped in `ur:`
//! strings, cycled indefinitely by the sender (there is no feedback
//! channel) until the receiver has assembled enough distinct fragments.
//!
//! # Wire formats
//! - Fountain fragment: `ur:<type>/<seq>-<seqlen>/<bytewords>` where the
//!   bytewords body is a checksummed binary frame (see [`encoder`]).
//! - Single-shot: plain base64 of the raw payload; hex is also accepted
//!   on the incoming side.

pub mod decoder;
pub mod encoder;
pub mod fountain;
pub mod ur;

pub use decoder::TransportDecoder;
pub use encoder::{encode_payload, EncodedPayload, FountainStream};
pub use fountain::{FountainDecoder, FountainEncoder, FountainPart};
pub use ur::UrType;

use thiserror::Error;

/// QR transport errors
#[derive(Error, Debug)]
pub enum QrError {
    #[error("Invalid QR data: {0}")]
    InvalidData(String),

    #[error("Invalid UR format: {0}")]
    InvalidUrFormat(String),

    #[error("Unsupported UR type: {0}")]
    UnsupportedUrType(String),

    #[error("Checksum mismatch")]
    ChecksumMismatch,

    #[error("Fragment does not belong to the transmission in progress")]
    SessionMismatch,

    #[error("Decoding incomplete")]
    DecodingIncomplete,
}

/// Result type for QR operations
pub type QrResult<T> = Result<T, QrError>;

/// Maximum bytes for one QR frame at error correction level M.
pub const MAX_SINGLE_QR_BYTES: usize = 2331;

/// Payload-byte budget per fountain fragment.
pub const FRAGMENT_SIZE: usize = 100;

/// Wall-clock interval between outgoing fountain frames.
pub const FRAME_INTERVAL_MS: u64 = 250;

/// Result of feeding one scanned string into the transport decoder.
#[derive(Debug, Clone, PartialEq)]
pub enum ScanOutcome {
    /// A full payload was reconstructed.
    Complete(Vec<u8>),
    /// A fountain transmission is in flight.
    FountainProgress {
        /// Distinct fragments received so far
        received: usize,
        /// Fragments the sender split the payload into
        expected: usize,
        /// Estimated completion, 0.0 to 1.0
        progress: f32,
    },
    /// The string matches neither transport scheme. The caller decides
    /// whether to interpret it some other way.
    Ignored,
}
