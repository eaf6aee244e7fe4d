//! Mifare Classic read path.
//!
//! Blocks are walked from the highest index down to 0, authenticating with
//! the key ring every time a sector trailer is reached.

use std::time::Duration;

use tracing::{debug, info, warn};

use super::layout::{SectorLayout, is_key_boundary};
use super::{BlockDump, CardError};
use crate::keyring::KeyRing;
use crate::protocol::constants::{BLOCK_SIZE, RATS};
use crate::protocol::{MifareFrame, MifareReply, Target, colon_hex, exchange};
use crate::state::CancelToken;
use crate::transport::{ReaderProperty, ReaderTransport};

/// How long to wait for an ATS.
const ATS_PROBE_TIMEOUT: Duration = Duration::from_millis(100);

/// Probe the ATS, infer the layout, and re-select the card.
///
/// Leaves easy framing enabled whatever the outcome of the probe.
pub fn probe_layout<T: ReaderTransport + ?Sized>(
    reader: &mut T,
    target: &Target,
) -> Result<SectorLayout, CardError> {
    let mut layout = SectorLayout::infer(target);

    reader.set_property(ReaderProperty::EasyFraming, false)?;
    let probe = reader.transceive(&RATS, Some(ATS_PROBE_TIMEOUT));

    // An ISO14443-4 answer leaves the card in layer 4; cycling the field
    // brings it back to the Mifare command set.
    let field = match &probe {
        Ok(ats) if !ats.is_empty() => reader
            .set_property(ReaderProperty::ActivateField, false)
            .and_then(|_| reader.set_property(ReaderProperty::ActivateField, true)),
        _ => Ok(()),
    };
    reader.set_property(ReaderProperty::EasyFraming, true)?;
    field?;

    match probe {
        Ok(ats) => {
            debug!(ats = %colon_hex(&ats), "ATS probe answered");
            layout = layout.refine_with_ats(target, &ats);
        }
        Err(e) => debug!(error = %e, "No ATS"),
    }

    match reader.select_passive_target() {
        Ok(Some(again)) if again.uid() == target.uid() => {}
        Ok(_) => return Err(CardError::ReselectFailed),
        Err(e) => {
            warn!(error = %e, "Reselect failed");
            return Err(CardError::ReselectFailed);
        }
    }

    info!(
        uid = %target.uid_hex(),
        max_block = %format!("0x{:02X}", layout.max_block),
        "Classic layout"
    );
    Ok(layout)
}

/// Read every block the layout covers.
pub fn read<T: ReaderTransport + ?Sized>(
    reader: &mut T,
    target: &Target,
    keys: &KeyRing,
    cancel: &CancelToken,
) -> BlockDump {
    let layout = match probe_layout(reader, target) {
        Ok(layout) => layout,
        Err(e) => return BlockDump::failed(e),
    };

    // Collected top down.
    let mut blocks: Vec<[u8; BLOCK_SIZE]> = Vec::with_capacity(layout.block_count());
    let mut error = None;

    for block in (0..=layout.max_block).rev() {
        if cancel.is_cancelled() {
            error = Some(CardError::Cancelled);
            break;
        }

        if is_key_boundary(block) {
            if let Err(e) = keys.authenticate(reader, target, block) {
                warn!(block, error = %e, "Authentication failed");
                error = Some(e.into());
                break;
            }
        }

        match exchange(reader, &MifareFrame::read(block)) {
            Ok(MifareReply::Data(data)) => blocks.push(data),
            Ok(_) => {
                debug!(block, "Read denied, keeping blocks read so far");
                break;
            }
            Err(e) => {
                warn!(block, error = %e, "Read failed");
                error = Some(e.into());
                break;
            }
        }
    }

    let first_block = if blocks.is_empty() {
        0
    } else {
        (layout.block_count() - blocks.len()) as u8
    };
    let data = blocks.iter().rev().flatten().copied().collect();

    BlockDump {
        first_block,
        data,
        error,
    }
}
