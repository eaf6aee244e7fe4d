//! Reader transport abstraction.
//!
//! Defines the `ReaderDriver` / `ReaderTransport` traits for contactless
//! readers, allowing different implementations (PN533 over USB, mock, etc.).

use std::fmt;
use std::time::Duration;

use thiserror::Error;

use crate::protocol::Target;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    #[error("Device not found: {0}")]
    DeviceNotFound(String),

    #[error("Failed to open device: {0}")]
    OpenFailed(String),

    #[error("USB I/O error: {0}")]
    Usb(String),

    #[error("Timeout")]
    Timeout,

    #[error("RF transmission error")]
    RfTransmission,

    #[error("Mifare authentication failed")]
    AuthFailed,

    #[error("Chip reported status 0x{0:02X}")]
    Chip(u8),

    #[error("Malformed frame: {0}")]
    Frame(String),

    #[error("Unexpected response length: expected {expected}, got {actual}")]
    UnexpectedLength { expected: usize, actual: usize },

    #[error("Command aborted")]
    Aborted,

    #[error("Device disconnected")]
    Disconnected,

    #[error("Device closed")]
    Closed,
}

impl TransportError {
    /// Whether the reader itself is gone and the session cannot continue.
    pub fn is_unrecoverable(&self) -> bool {
        matches!(
            self,
            TransportError::Disconnected | TransportError::Closed | TransportError::Usb(_)
        )
    }
}

/// Reader-level options toggled through `set_property`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReaderProperty {
    /// Let the reader wrap frames (CRC, Mifare crypto) for the selected target.
    EasyFraming,
    /// RF field on/off.
    ActivateField,
    /// Append/check CRC in raw (non easy framing) exchanges.
    HandleCrc,
}

impl fmt::Display for ReaderProperty {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ReaderProperty::EasyFraming => write!(f, "easy-framing"),
            ReaderProperty::ActivateField => write!(f, "activate-field"),
            ReaderProperty::HandleCrc => write!(f, "handle-crc"),
        }
    }
}

/// Identity of an opened reader.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeviceInfo {
    /// Human readable device name.
    pub name: String,
    /// Connection string used to open the device.
    pub connstring: String,
    /// Free-text capability description.
    pub capabilities: String,
}

/// An opened reader handle.
///
/// The handle is not reentrant: exactly one caller drives it at a time.
pub trait ReaderTransport: Send {
    /// Put the reader in initiator (PCD) mode.
    fn initiator_init(&mut self) -> Result<(), TransportError>;

    /// Poll once for an ISO14443-A target at 106 kbps.
    ///
    /// `Ok(None)` means no card is in the field.
    fn select_passive_target(&mut self) -> Result<Option<Target>, TransportError>;

    /// Exchange a frame with the selected target.
    ///
    /// `timeout` bounds the wait for the answer; `None` uses the transport's
    /// default bound. Expiry is [`TransportError::Timeout`].
    fn transceive(
        &mut self,
        frame: &[u8],
        timeout: Option<Duration>,
    ) -> Result<Vec<u8>, TransportError>;

    /// Toggle a reader property.
    fn set_property(
        &mut self,
        property: ReaderProperty,
        enabled: bool,
    ) -> Result<(), TransportError>;

    /// Abort whatever command the reader is running.
    fn abort_command(&mut self) -> Result<(), TransportError>;

    /// Describe the opened device.
    fn device_info(&self) -> DeviceInfo;

    /// Release the device. Further calls fail with `Closed`.
    fn close(&mut self);
}

/// Factory for reader handles.
pub trait ReaderDriver: Send + Sync {
    type Reader: ReaderTransport + 'static;

    /// Connection strings of attached readers, at most `max`.
    fn list_devices(&self, max: usize) -> Result<Vec<String>, TransportError>;

    /// Open a reader by connection string, or the first one available.
    fn open(&self, device: Option<&str>) -> Result<Self::Reader, TransportError>;

    /// Version of the driver library.
    fn library_version(&self) -> String {
        env!("CARGO_PKG_VERSION").to_string()
    }
}
