//! Sources of raw HCI frames.
//!
//! The agent only needs "give me the next frame"; [`FrameSource`] is that
//! seam. The raw Linux HCI socket backend lives in [`hci`] behind the `hci`
//! feature, and tests substitute scripted sources.

#[cfg(feature = "hci")]
pub mod hci;

use std::future::Future;
use std::io;
use std::pin::Pin;
use thiserror::Error;

/// Largest HCI event: 3 header bytes plus up to 255 parameter bytes.
pub const MAX_FRAME_LEN: usize = 258;

/// Errors opening or configuring a frame source. Fatal at startup.
#[derive(Error, Debug)]
pub enum ScanError {
    /// Bluetooth/adapter related error
    #[error("Bluetooth error: {0}")]
    Bluetooth(String),
    /// Backend not available (not compiled in)
    #[error("Backend '{0}' not available (not compiled in)")]
    BackendNotAvailable(String),
}

/// Runtime read failures. Never fatal; the agent counts them.
#[derive(Error, Debug)]
pub enum ReceiveError {
    #[error("Controller read failed: {0}")]
    Io(#[from] io::Error),
    /// The controller went away (a zero-length read on the raw socket).
    #[error("Controller socket closed")]
    Closed,
}

/// Boxed future returned by [`FrameSource::receive`].
pub type ReceiveFuture<'a> = Pin<Box<dyn Future<Output = Result<usize, ReceiveError>> + Send + 'a>>;

/// Something that yields one raw HCI frame per read.
pub trait FrameSource: Send {
    /// Read the next frame into `buf` and return its length.
    ///
    /// May wait indefinitely; callers bound the wait with a timeout. A return
    /// of `Ok(0)` means the read produced nothing.
    fn receive<'a>(&'a mut self, buf: &'a mut [u8]) -> ReceiveFuture<'a>;
}

impl<S: FrameSource + ?Sized> FrameSource for Box<S> {
    fn receive<'a>(&'a mut self, buf: &'a mut [u8]) -> ReceiveFuture<'a> {
        (**self).receive(buf)
    }
}

/// Open the raw HCI socket for controller `hci{device}`.
pub fn open(device: u16) -> Result<Box<dyn FrameSource>, ScanError> {
    #[cfg(feature = "hci")]
    {
        let source = hci::HciSource::open(device)?;
        Ok(Box::new(source))
    }
    #[cfg(not(feature = "hci"))]
    {
        let _ = device;
        Err(ScanError::BackendNotAvailable("hci".into()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scan_error_display() {
        let err = ScanError::Bluetooth("Failed to bind HCI socket".to_string());
        assert_eq!(err.to_string(), "Bluetooth error: Failed to bind HCI socket");

        let err = ScanError::BackendNotAvailable("hci".to_string());
        assert_eq!(err.to_string(), "Backend 'hci' not available (not compiled in)");
    }

    #[test]
    fn test_receive_error_display() {
        let err = ReceiveError::from(io::Error::from(io::ErrorKind::ConnectionReset));
        assert!(err.to_string().starts_with("Controller read failed:"));
        assert_eq!(ReceiveError::Closed.to_string(), "Controller socket closed");
    }
}
