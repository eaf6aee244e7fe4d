//! Card engine - turns a selected target into a memory image.
//!
//! The engine is synchronous and owns no state between calls; the session
//! worker hands it the reader for the duration of one transaction.

pub mod classic;
pub mod layout;
pub mod ultralight;

use thiserror::Error;
use tracing::{debug, info};

use crate::keyring::{AuthError, KeyRing};
use crate::protocol::constants::*;
use crate::protocol::{CardKind, Target};
use crate::state::CancelToken;
use crate::transport::{ReaderTransport, TransportError};

pub use layout::{SectorLayout, is_key_boundary};

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CardError {
    #[error(transparent)]
    Transport(#[from] TransportError),
    #[error("No key in the key ring authenticated block {block}")]
    AuthExhausted { block: u8 },
    #[error("unable to reselect tag")]
    ReselectFailed,
    #[error("Read of page {page} denied")]
    ReadDenied { page: u8 },
    #[error("Operation cancelled")]
    Cancelled,
    #[error("Writing {0} cards is not supported")]
    Unsupported(CardKind),
    #[error("Image must be {expected} bytes, got {actual}")]
    ImageSize { expected: usize, actual: usize },
}

impl From<AuthError> for CardError {
    fn from(e: AuthError) -> Self {
        match e {
            AuthError::Exhausted { block } => CardError::AuthExhausted { block },
            AuthError::Reselect => CardError::ReselectFailed,
            AuthError::Transport(e) => CardError::Transport(e),
        }
    }
}

/// Blocks gathered by one read path, in ascending address order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockDump {
    /// Address of the first block in `data`.
    pub first_block: u8,
    pub data: Vec<u8>,
    pub error: Option<CardError>,
}

impl BlockDump {
    fn failed(error: CardError) -> Self {
        Self {
            first_block: 0,
            data: Vec::new(),
            error: Some(error),
        }
    }
}

/// The result of reading one card.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CardImage {
    /// Connection string of the reader.
    pub device_id: String,
    /// Human-readable reader name.
    pub device_name: String,
    /// Colon-separated lowercase hex UID.
    pub uid: String,
    /// ATQA second byte.
    pub type_byte: u8,
    pub kind: CardKind,
    /// Card memory, lowest address first.
    pub data: Vec<u8>,
    /// Block (Classic) or page (Ultralight) address of `data[0]`.
    pub first_block: u8,
    /// Where application data starts within `data`.
    pub offset: usize,
    /// Set when the read stopped early; `data` then holds what was read.
    pub error: Option<String>,
}

impl CardImage {
    /// Application data, i.e. `data` past `offset`.
    pub fn payload(&self) -> &[u8] {
        self.data.get(self.offset..).unwrap_or(&[])
    }

    pub fn is_complete(&self) -> bool {
        self.error.is_none()
    }
}

/// Read the card behind `target`.
///
/// Per-card failures end up in [`CardImage::error`] alongside the partial
/// data. Only cancellation is returned as `Err`.
pub fn read_card<T: ReaderTransport + ?Sized>(
    reader: &mut T,
    target: &Target,
    keys: &KeyRing,
    cancel: &CancelToken,
) -> Result<CardImage, CardError> {
    let kind = target.kind();
    debug!(uid = %target.uid_hex(), %kind, "Reading card");

    let (dump, full_offset) = match kind {
        CardKind::Classic => (
            classic::read(reader, target, keys, cancel),
            CLASSIC_DATA_OFFSET,
        ),
        CardKind::Ultralight => (ultralight::read(reader, cancel), ULTRALIGHT_DATA_OFFSET),
        CardKind::Unknown => (
            BlockDump {
                first_block: 0,
                data: Vec::new(),
                error: None,
            },
            0,
        ),
    };

    let error = match dump.error {
        Some(CardError::Cancelled) => return Err(CardError::Cancelled),
        other => other,
    };

    // A truncated Classic dump no longer starts at block 0, so the sector 0
    // offset does not apply to it.
    let offset = match kind {
        CardKind::Classic if error.is_some() || dump.first_block != 0 => 0,
        _ if dump.data.len() < full_offset => 0,
        _ => full_offset,
    };

    let info = reader.device_info();
    let image = CardImage {
        device_id: info.connstring,
        device_name: info.name,
        uid: target.uid_hex(),
        type_byte: target.type_byte(),
        kind,
        data: dump.data,
        first_block: dump.first_block,
        offset,
        error: error.map(|e| e.to_string()),
    };

    info!(
        uid = %image.uid,
        kind = %image.kind,
        bytes = image.data.len(),
        complete = image.is_complete(),
        "Card read"
    );
    Ok(image)
}

/// A full Ultralight memory image.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UltralightImage([u8; ULTRALIGHT_IMAGE_SIZE]);

impl UltralightImage {
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, CardError> {
        let image = bytes
            .try_into()
            .map_err(|_| CardError::ImageSize {
                expected: ULTRALIGHT_IMAGE_SIZE,
                actual: bytes.len(),
            })?;
        Ok(Self(image))
    }

    /// Contents of `page`.
    pub fn page(&self, page: u8) -> &[u8] {
        let start = page as usize * PAGE_SIZE;
        &self.0[start..start + PAGE_SIZE]
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WriteOptions {
    /// Also write page 2 (lock bytes).
    pub write_lock: bool,
    /// Also write page 3 (one-time-programmable bits).
    pub write_otp: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WriteReport {
    pub pages_written: usize,
    pub error: Option<CardError>,
}

/// Write `image` to the card behind `target`. Only Ultralight cards are
/// writable; anything else is `Unsupported`.
pub fn write_card<T: ReaderTransport + ?Sized>(
    reader: &mut T,
    target: &Target,
    image: &UltralightImage,
    options: WriteOptions,
    cancel: &CancelToken,
) -> Result<WriteReport, CardError> {
    match target.kind() {
        CardKind::Ultralight => Ok(ultralight::write(reader, image, options, cancel)),
        kind => Err(CardError::Unsupported(kind)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::mock::{MockCall, MockReader, SimCard};

    fn read(card: SimCard) -> CardImage {
        let mut reader = MockReader::with_card(card);
        let target = reader.present_target().unwrap();
        read_card(&mut reader, &target, &KeyRing::default(), &CancelToken::new()).unwrap()
    }

    #[test]
    fn test_classic_image() {
        let image = read(SimCard::classic_1k());
        assert_eq!(image.kind, CardKind::Classic);
        assert_eq!(image.uid, "de:ad:be:ef");
        assert_eq!(image.type_byte, 0x04);
        assert_eq!(image.device_id, "mock:001:001");
        assert_eq!(image.data.len(), 1024);
        assert_eq!(image.offset, 64);
        assert_eq!(image.payload()[0], 4);
        assert!(image.is_complete());
    }

    #[test]
    fn test_plus_2k_image() {
        let ats = [0x0C, 0x75, 0x77, 0x80, 0x02, 0xC1, 0x05, 0x2F, 0x2F, 0x01];
        let mut reader = MockReader::with_card(SimCard::classic(0x04, 0x08, 128).with_ats(&ats));
        let target = reader.present_target().unwrap();

        let image =
            read_card(&mut reader, &target, &KeyRing::default(), &CancelToken::new()).unwrap();
        assert!(image.is_complete());
        assert_eq!(image.data.len(), 128 * 16);

        let calls = reader.calls();
        let probe = [
            MockCall::SetProperty(crate::transport::ReaderProperty::EasyFraming, false),
            MockCall::Raw(RATS.to_vec()),
            MockCall::SetProperty(crate::transport::ReaderProperty::ActivateField, false),
            MockCall::SetProperty(crate::transport::ReaderProperty::ActivateField, true),
        ];
        assert!(calls.windows(4).any(|w| w == probe));
    }

    #[test]
    fn test_truncated_classic_image() {
        let image = read(SimCard::classic_1k().with_key_b(14, [0x42; 6]));
        assert_eq!(image.first_block, 60);
        assert_eq!(image.offset, 0);
        assert_eq!(image.data.len(), 64);
        assert_eq!(
            image.error.as_deref(),
            Some("No key in the key ring authenticated block 59")
        );
    }

    #[test]
    fn test_ultralight_image() {
        let image = read(SimCard::ultralight());
        assert_eq!(image.kind, CardKind::Ultralight);
        assert_eq!(image.uid, "04:11:22:33:44:55:66");
        assert_eq!(image.offset, 16);
        assert_eq!(image.data.len(), 64);
    }

    #[test]
    fn test_ultralight_denied_chunk_is_flagged() {
        let image = read(SimCard::ultralight().deny_block(4));
        assert!(!image.is_complete());
        assert_eq!(image.error.as_deref(), Some("Read of page 4 denied"));
        assert_eq!(image.offset, 16);
        assert_eq!(&image.payload()[..16], &[0u8; 16]);
        assert_eq!(&image.payload()[16..20], &[0x88; 4]);
    }

    #[test]
    fn test_unknown_card_is_empty() {
        let image = read(SimCard::unknown());
        assert_eq!(image.kind, CardKind::Unknown);
        assert!(image.data.is_empty());
        assert!(image.error.is_none());
        assert!(image.payload().is_empty());
    }

    #[test]
    fn test_write_classic_unsupported() {
        let mut reader = MockReader::with_card(SimCard::classic_1k());
        let target = reader.present_target().unwrap();
        let image = UltralightImage::from_bytes(&[0u8; 64]).unwrap();

        let err = write_card(
            &mut reader,
            &target,
            &image,
            WriteOptions::default(),
            &CancelToken::new(),
        )
        .unwrap_err();
        assert_eq!(err, CardError::Unsupported(CardKind::Classic));
    }

    #[test]
    fn test_image_size() {
        assert_eq!(
            UltralightImage::from_bytes(&[0u8; 63]),
            Err(CardError::ImageSize {
                expected: 64,
                actual: 63
            })
        );
    }

    #[test]
    fn test_cancel_is_err() {
        let mut reader = MockReader::with_card(SimCard::ultralight());
        let target = reader.present_target().unwrap();
        let cancel = CancelToken::new();
        cancel.cancel();
        assert_eq!(
            read_card(&mut reader, &target, &KeyRing::default(), &cancel),
            Err(CardError::Cancelled)
        );
    }
}
