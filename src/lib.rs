//! Core library for an air-gapped Bitcoin signing device.
//!
//! The device never touches a network: payloads arrive and leave as QR
//! codes. This crate covers the full offline path: entropy collection
//! and key derivation, encrypted key storage with mirrored persistence,
//! the QR fountain transport, PSBT summarization and partial signing,
//! BIP-137 message signing, and the session state machine gluing the
//! screens together. Rendering and camera hardware live in the host
//! application, behind the traits in [`camera`].

pub mod camera;
pub mod entropy;
pub mod error;
pub mod keys;
pub mod qr;
pub mod router;
pub mod session;
pub mod sign;
pub mod storage;
pub mod summary;
pub mod vault;

pub use error::{SignerError, SignerResult};
pub use keys::{KeyManager, Network};
pub use session::{Command, Feedback, SessionManager, SessionState};
