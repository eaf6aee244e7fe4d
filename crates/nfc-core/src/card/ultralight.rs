//! Mifare Ultralight read and write paths.

use tracing::{debug, info, warn};

use super::{BlockDump, CardError, UltralightImage, WriteOptions, WriteReport};
use crate::protocol::constants::*;
use crate::protocol::{MifareFrame, MifareReply, exchange};
use crate::state::CancelToken;
use crate::transport::{ReaderProperty, ReaderTransport};

/// Read pages 0 to 15, four pages per READ.
///
/// A denied read is zero-filled so later pages keep their addresses; the
/// first denied page is recorded as the dump error. Any other failure ends
/// the dump.
pub fn read<T: ReaderTransport + ?Sized>(reader: &mut T, cancel: &CancelToken) -> BlockDump {
    if let Err(e) = reader.set_property(ReaderProperty::EasyFraming, true) {
        return BlockDump::failed(e.into());
    }

    let mut data = Vec::with_capacity(ULTRALIGHT_IMAGE_SIZE);
    let mut error = None;

    for page in (0..=ULTRALIGHT_LAST_PAGE).step_by(ULTRALIGHT_PAGES_PER_READ as usize) {
        if cancel.is_cancelled() {
            error = Some(CardError::Cancelled);
            break;
        }
        match exchange(reader, &MifareFrame::read(page)) {
            Ok(MifareReply::Data(chunk)) => data.extend_from_slice(&chunk),
            Ok(_) => {
                debug!(page, "Read denied, zero-filling");
                data.extend_from_slice(&[0u8; BLOCK_SIZE]);
                error.get_or_insert(CardError::ReadDenied { page });
            }
            Err(e) => {
                warn!(page, error = %e, "Read failed");
                error = Some(e.into());
                break;
            }
        }
    }

    BlockDump {
        first_block: 0,
        data,
        error,
    }
}

/// Write `image` page by page from page 2.
///
/// The lock page and the OTP page are only written when `options` asks for
/// them. A failed page halts the card; it is re-selected before the next page
/// and the write gives up if that fails.
pub fn write<T: ReaderTransport + ?Sized>(
    reader: &mut T,
    image: &UltralightImage,
    options: WriteOptions,
    cancel: &CancelToken,
) -> WriteReport {
    let mut report = WriteReport::default();
    let mut halted = false;

    for page in ULTRALIGHT_FIRST_WRITABLE_PAGE..=ULTRALIGHT_LAST_PAGE {
        if page == ULTRALIGHT_LOCK_PAGE && !options.write_lock {
            continue;
        }
        if page == ULTRALIGHT_OTP_PAGE && !options.write_otp {
            continue;
        }
        if cancel.is_cancelled() {
            report.error = Some(CardError::Cancelled);
            break;
        }

        if halted {
            match reader.select_passive_target() {
                Ok(Some(_)) => halted = false,
                Ok(None) => {
                    report.error = Some(CardError::ReselectFailed);
                    break;
                }
                Err(e) => {
                    warn!(page, error = %e, "Reselect failed");
                    report.error = Some(CardError::ReselectFailed);
                    break;
                }
            }
        }

        // Compatibility WRITE: 16 bytes on the wire, only the first 4 land.
        let mut payload = [0u8; BLOCK_SIZE];
        payload[..PAGE_SIZE].copy_from_slice(image.page(page));

        match exchange(reader, &MifareFrame::write(page, payload)) {
            Ok(MifareReply::Done) | Ok(MifareReply::Data(_)) => report.pages_written += 1,
            Ok(MifareReply::Denied) => {
                warn!(page, "Write denied");
                halted = true;
            }
            Err(e) => {
                warn!(page, error = %e, "Write failed");
                halted = true;
            }
        }
    }

    info!(pages = report.pages_written, "Ultralight write finished");
    report
}
