//! Camera Frame Acquisition
//!
//! Thin abstraction over whatever supplies decoded QR strings. The
//! session layer owns a [`CaptureLoop`] while scanning and polls it on
//! every tick; the hardware is released the moment scanning stops, and
//! unconditionally on drop.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum CameraError {
    #[error("Camera unavailable: {0}")]
    Unavailable(String),

    #[error("Camera read failed: {0}")]
    ReadFailed(String),
}

pub type CameraResult<T> = Result<T, CameraError>;

/// A source of decoded QR strings, one per captured frame.
pub trait FrameSource: Send {
    fn open(&mut self) -> CameraResult<()>;

    /// Grab one frame and return its decoded QR content, if the frame
    /// contained a readable code.
    fn grab(&mut self) -> CameraResult<Option<String>>;

    fn release(&mut self);
}

/// Hands out frame sources. The session layer acquires one per scanning
/// session so tests can substitute scripted sources.
pub trait CameraProvider: Send {
    fn acquire(&mut self) -> CameraResult<Box<dyn FrameSource>>;
}

/// Owns an open frame source for the duration of one scanning session.
pub struct CaptureLoop {
    source: Box<dyn FrameSource>,
    open: bool,
}

impl CaptureLoop {
    pub fn start(mut source: Box<dyn FrameSource>) -> CameraResult<Self> {
        source.open()?;
        Ok(Self { source, open: true })
    }

    /// Poll for the next decoded QR string.
    pub fn poll(&mut self) -> CameraResult<Option<String>> {
        if !self.open {
            return Ok(None);
        }
        self.source.grab()
    }

    /// Release the hardware now rather than waiting for drop.
    pub fn stop(&mut self) {
        if self.open {
            self.source.release();
            self.open = false;
        }
    }
}

impl Drop for CaptureLoop {
    fn drop(&mut self) {
        self.stop();
    }
}
