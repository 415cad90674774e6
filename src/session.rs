//! Session State Machine
//!
//! Drives the signer through its screens: idle, scanning, confirming,
//! passphrase entry, and displaying the signed result. All state lives
//! in the active variant, so leaving a state releases whatever it held
//! (camera, pending request). An idle timer locks the session after
//! five minutes without user input.

use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use serde::Serialize;
use zeroize::Zeroizing;

use crate::camera::{CameraProvider, CaptureLoop};
use crate::error::{SignerError, SignerResult};
use crate::keys::{KeyManager, Network};
use crate::qr::{encode_payload, EncodedPayload, ScanOutcome, TransportDecoder, UrType};
use crate::router::{route, RoutedPayload, SignableMessage};
use crate::sign;
use crate::summary::{self, TransactionSummary};
use crate::vault::VaultError;

/// Inactivity window before the session locks itself.
pub const LOCK_TIMEOUT: Duration = Duration::from_secs(300);

/// What the user approved and is about to sign.
pub enum PendingRequest {
    Transaction(TransactionSummary),
    Message(SignableMessage),
}

pub enum SessionState {
    Idle,
    Scanning {
        camera: CaptureLoop,
        transport: TransportDecoder,
    },
    Confirming {
        pending: PendingRequest,
        key_id: u64,
    },
    AwaitingPassphrase {
        pending: PendingRequest,
        key_id: u64,
        error: Option<String>,
    },
    Signed {
        outgoing: EncodedPayload,
    },
}

impl SessionState {
    pub fn name(&self) -> &'static str {
        match self {
            SessionState::Idle => "idle",
            SessionState::Scanning { .. } => "scanning",
            SessionState::Confirming { .. } => "confirming",
            SessionState::AwaitingPassphrase { .. } => "awaiting_passphrase",
            SessionState::Signed { .. } => "signed",
        }
    }
}

/// Everything the UI can do to the session.
#[derive(Debug, Clone)]
pub enum Command {
    StartScan,
    CancelScan,
    /// Poll the camera for a frame while scanning
    CameraTick,
    /// Switch the signing key for a pending message
    SelectKey(u64),
    Approve,
    Reject,
    SubmitPassphrase(String),
    /// Advance the outgoing QR display
    DisplayTick,
    /// Leave the signed-result screen
    Done,
    /// Idle heartbeat, drives the lock timer
    Tick,
}

impl Command {
    /// Ticks never count as user activity for the lock timer.
    fn is_user_input(&self) -> bool {
        !matches!(
            self,
            Command::CameraTick | Command::DisplayTick | Command::Tick
        )
    }
}

/// What the UI should show after handling a command.
#[derive(Debug, Clone, PartialEq)]
pub enum Feedback {
    /// Nothing changed on screen
    None,
    ScanProgress {
        received: usize,
        expected: usize,
        progress: f32,
    },
    ConfirmTransaction {
        total_out: u64,
        fee: u64,
        key_name: String,
    },
    ConfirmMessage {
        message: String,
        address_index: u32,
        key_name: String,
    },
    PassphrasePrompt {
        error: Option<String>,
    },
    /// Render this string as the outgoing QR frame
    Frame(String),
    Locked,
    /// Recoverable error, current screen stays up
    Warning(String),
    /// The session fell back to idle with this error
    Aborted(String),
}

#[derive(Serialize)]
struct SignatureEnvelope<'a> {
    address: &'a str,
    signature: String,
    message: &'a str,
}

pub struct SessionManager {
    state: SessionState,
    keys: KeyManager,
    network: Network,
    camera: Box<dyn CameraProvider>,
    last_activity: Instant,
}

impl SessionManager {
    pub fn new(keys: KeyManager, network: Network, camera: Box<dyn CameraProvider>) -> Self {
        Self {
            state: SessionState::Idle,
            keys,
            network,
            camera,
            last_activity: Instant::now(),
        }
    }

    pub fn state(&self) -> &SessionState {
        &self.state
    }

    pub fn keys(&self) -> &KeyManager {
        &self.keys
    }

    pub fn keys_mut(&mut self) -> &mut KeyManager {
        &mut self.keys
    }

    /// Record that the device was connected to a network. Every stored
    /// key is stamped as possibly exposed.
    pub fn set_online(&mut self, at: DateTime<Utc>) -> SignerResult<()> {
        self.keys.mark_online(at)?;
        Ok(())
    }

    /// Handle one command at the given instant.
    pub fn handle(&mut self, cmd: Command, now: Instant) -> SignerResult<Feedback> {
        if !matches!(self.state, SessionState::Idle)
            && now.duration_since(self.last_activity) >= LOCK_TIMEOUT
        {
            log::info!("Session locked after inactivity");
            self.state = SessionState::Idle;
            self.last_activity = now;
            return Ok(Feedback::Locked);
        }
        if cmd.is_user_input() {
            self.last_activity = now;
        }

        match cmd {
            Command::StartScan => self.start_scan(),
            Command::CancelScan => self.cancel_scan(),
            Command::CameraTick => self.camera_tick(),
            Command::SelectKey(id) => self.select_key(id),
            Command::Approve => self.approve(),
            Command::Reject => self.reject(),
            Command::SubmitPassphrase(passphrase) => self.submit_passphrase(passphrase),
            Command::DisplayTick => self.display_tick(),
            Command::Done => self.done(),
            Command::Tick => Ok(Feedback::None),
        }
    }

    fn invalid(&self, cmd: &str) -> SignerError {
        SignerError::InvalidCommand(format!("{} not valid while {}", cmd, self.state.name()))
    }

    fn start_scan(&mut self) -> SignerResult<Feedback> {
        if !matches!(self.state, SessionState::Idle) {
            return Err(self.invalid("start_scan"));
        }
        let source = self.camera.acquire()?;
        let camera = CaptureLoop::start(source)?;
        self.state = SessionState::Scanning {
            camera,
            transport: TransportDecoder::new(),
        };
        Ok(Feedback::None)
    }

    fn cancel_scan(&mut self) -> SignerResult<Feedback> {
        match self.state {
            SessionState::Scanning { .. } => {
                // Dropping the capture loop releases the camera
                self.state = SessionState::Idle;
                Ok(Feedback::None)
            }
            _ => Err(self.invalid("cancel_scan")),
        }
    }

    fn camera_tick(&mut self) -> SignerResult<Feedback> {
        let SessionState::Scanning { camera, transport } = &mut self.state else {
            return Err(self.invalid("camera_tick"));
        };
        let Some(text) = camera.poll()? else {
            return Ok(Feedback::None);
        };
        match transport.decode(&text) {
            Ok(ScanOutcome::Complete(payload)) => self.payload_received(&payload),
            Ok(ScanOutcome::FountainProgress {
                received,
                expected,
                progress,
            }) => Ok(Feedback::ScanProgress {
                received,
                expected,
                progress,
            }),
            // Not a transport frame; the scanned text itself is the payload
            Ok(ScanOutcome::Ignored) => self.payload_received(text.as_bytes()),
            Err(e) => {
                log::warn!("Dropped unreadable frame: {e}");
                // A corrupt frame may belong to a broken transmission;
                // start the assembly over rather than mixing fragments.
                transport.reset();
                Ok(Feedback::Warning(e.to_string()))
            }
        }
    }

    /// A complete payload arrived; classify it and move to confirmation.
    fn payload_received(&mut self, payload: &[u8]) -> SignerResult<Feedback> {
        let routed = match route(payload) {
            Ok(routed) => routed,
            Err(e) => {
                log::warn!("Unroutable payload: {e}");
                return Ok(Feedback::Warning(e.to_string()));
            }
        };
        match routed {
            RoutedPayload::Transaction(bytes) => {
                let summary = match summary::summarize(&bytes, &self.keys, self.network) {
                    Ok(s) => s,
                    Err(e) => return self.abort(e.to_string()),
                };
                let Some(matched) = summary.matched_key.clone() else {
                    return self.abort("No stored key can sign this transaction".into());
                };
                let feedback = Feedback::ConfirmTransaction {
                    total_out: summary.total_out,
                    fee: summary.fee,
                    key_name: matched.name,
                };
                self.state = SessionState::Confirming {
                    pending: PendingRequest::Transaction(summary),
                    key_id: matched.id,
                };
                Ok(feedback)
            }
            RoutedPayload::Message(message) => {
                let Some(record) = self.keys.list().first() else {
                    return self.abort("No key stored on this device".into());
                };
                let feedback = Feedback::ConfirmMessage {
                    message: message.message.clone(),
                    address_index: message.address_index,
                    key_name: record.name.clone(),
                };
                let key_id = record.id;
                self.state = SessionState::Confirming {
                    pending: PendingRequest::Message(message),
                    key_id,
                };
                Ok(feedback)
            }
        }
    }

    fn select_key(&mut self, id: u64) -> SignerResult<Feedback> {
        match &mut self.state {
            SessionState::Confirming {
                pending: PendingRequest::Message(message),
                key_id,
            } => {
                let record = self
                    .keys
                    .get(id)
                    .ok_or_else(|| SignerError::InvalidCommand(format!("No key with id {id}")))?;
                *key_id = id;
                Ok(Feedback::ConfirmMessage {
                    message: message.message.clone(),
                    address_index: message.address_index,
                    key_name: record.name.clone(),
                })
            }
            _ => Err(self.invalid("select_key")),
        }
    }

    fn approve(&mut self) -> SignerResult<Feedback> {
        let state = std::mem::replace(&mut self.state, SessionState::Idle);
        match state {
            SessionState::Confirming { pending, key_id } => {
                self.state = SessionState::AwaitingPassphrase {
                    pending,
                    key_id,
                    error: None,
                };
                Ok(Feedback::PassphrasePrompt { error: None })
            }
            other => {
                self.state = other;
                Err(self.invalid("approve"))
            }
        }
    }

    /// Discard the parsed payload and resume scanning.
    fn reject(&mut self) -> SignerResult<Feedback> {
        match self.state {
            SessionState::Confirming { .. } => {
                self.state = SessionState::Idle;
                self.start_scan()
            }
            _ => Err(self.invalid("reject")),
        }
    }

    fn submit_passphrase(&mut self, passphrase: String) -> SignerResult<Feedback> {
        let state = std::mem::replace(&mut self.state, SessionState::Idle);
        let SessionState::AwaitingPassphrase {
            pending, key_id, ..
        } = state
        else {
            self.state = state;
            return Err(self.invalid("submit_passphrase"));
        };
        let passphrase = Zeroizing::new(passphrase);

        let secret = match self.keys.decrypt_secret(key_id, &passphrase) {
            Ok(secret) => secret,
            Err(crate::keys::KeyError::Vault(VaultError::WrongPassphrase)) => {
                self.state = SessionState::AwaitingPassphrase {
                    pending,
                    key_id,
                    error: Some("Wrong passphrase".into()),
                };
                return Ok(Feedback::PassphrasePrompt {
                    error: Some("Wrong passphrase".into()),
                });
            }
            Err(e) => return self.abort(e.to_string()),
        };

        let outgoing = match &pending {
            PendingRequest::Transaction(summary) => {
                let fingerprint = match self.keys.get(key_id) {
                    Some(record) => record.fingerprint.clone(),
                    None => return self.abort("Signing key disappeared".into()),
                };
                match sign::sign_psbt(&summary.raw, &secret, &fingerprint, self.network) {
                    Ok(signed) => encode_payload(&signed, UrType::Psbt),
                    Err(e) => return self.abort(e.to_string()),
                }
            }
            PendingRequest::Message(message) => {
                let signed = match sign::sign_message(
                    &secret,
                    message.address_index,
                    &message.message,
                    self.network,
                ) {
                    Ok(s) => s,
                    Err(e) => return self.abort(e.to_string()),
                };
                let envelope = SignatureEnvelope {
                    address: &signed.address,
                    signature: {
                        use base64::{engine::general_purpose::STANDARD, Engine as _};
                        STANDARD.encode(&signed.signature)
                    },
                    message: &signed.message,
                };
                match serde_json::to_vec(&envelope) {
                    Ok(bytes) => encode_payload(&bytes, UrType::Signature),
                    Err(e) => return self.abort(e.to_string()),
                }
            }
        };

        self.state = SessionState::Signed { outgoing };
        self.display_tick()
    }

    fn display_tick(&mut self) -> SignerResult<Feedback> {
        let SessionState::Signed { outgoing } = &mut self.state else {
            return Err(self.invalid("display_tick"));
        };
        match outgoing {
            EncodedPayload::Single(text) => Ok(Feedback::Frame(text.clone())),
            EncodedPayload::Fountain(stream) => Ok(Feedback::Frame(stream.next_frame()?)),
        }
    }

    fn done(&mut self) -> SignerResult<Feedback> {
        match self.state {
            SessionState::Signed { .. } => {
                self.state = SessionState::Idle;
                Ok(Feedback::None)
            }
            _ => Err(self.invalid("done")),
        }
    }

    /// Drop everything in flight and return to idle with an error.
    fn abort(&mut self, reason: String) -> SignerResult<Feedback> {
        log::warn!("Session aborted: {reason}");
        self.state = SessionState::Idle;
        Ok(Feedback::Aborted(reason))
    }
}
