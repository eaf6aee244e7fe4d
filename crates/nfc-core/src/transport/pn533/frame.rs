//! PN533 host frames.
//!
//! Normal frame:   `00 00 FF LEN LCS TFI PD0..PDn DCS 00`
//! Extended frame: `00 00 FF FF FF LENM LENL LCS TFI PD0..PDn DCS 00`
//! ACK frame:      `00 00 FF 00 FF 00`

use byteorder::{BigEndian, ByteOrder, WriteBytesExt};
use thiserror::Error;

/// Frame identifier, host to controller.
pub const TFI_HOST: u8 = 0xD4;
/// Frame identifier, controller to host.
pub const TFI_CHIP: u8 = 0xD5;

pub const ACK_FRAME: [u8; 6] = [0x00, 0x00, 0xFF, 0x00, 0xFF, 0x00];
pub const NACK_FRAME: [u8; 6] = [0x00, 0x00, 0xFF, 0xFF, 0x00, 0x00];
const ERROR_FRAME: [u8; 8] = [0x00, 0x00, 0xFF, 0x01, 0xFF, 0x7F, 0x81, 0x00];
const PREAMBLE: [u8; 3] = [0x00, 0x00, 0xFF];

/// Largest payload (TFI + command + data) that fits a normal frame.
const NORMAL_FRAME_MAX: usize = 0xFF;

#[derive(Error, Debug, PartialEq, Eq)]
pub enum FrameError {
    #[error("Frame too short: {0} bytes")]
    TooShort(usize),
    #[error("Missing 00 00 FF preamble")]
    BadPreamble,
    #[error("Length checksum mismatch")]
    LengthChecksum,
    #[error("Data checksum mismatch")]
    DataChecksum,
    #[error("Controller reported a syntax error")]
    ErrorFrame,
    #[error("Unexpected frame identifier 0x{0:02X}")]
    BadTfi(u8),
    #[error("Response to 0x{actual:02X}, expected 0x{expected:02X}")]
    WrongCommand { expected: u8, actual: u8 },
}

/// Kinds of frames read back from the controller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Incoming {
    Ack,
    Nack,
    /// Response payload after `D5 <cmd+1>`.
    Response { command: u8, data: Vec<u8> },
}

fn checksum(bytes: &[u8]) -> u8 {
    bytes
        .iter()
        .fold(0u8, |acc, b| acc.wrapping_add(*b))
        .wrapping_neg()
}

/// Build a host command frame for `command` with `params`.
pub fn encode(command: u8, params: &[u8]) -> Vec<u8> {
    let len = params.len() + 2;
    let mut frame = Vec::with_capacity(len + 10);
    frame.extend_from_slice(&PREAMBLE);

    if len <= NORMAL_FRAME_MAX {
        frame.push(len as u8);
        frame.push((len as u8).wrapping_neg());
    } else {
        frame.extend_from_slice(&[0xFF, 0xFF]);
        // Writing into a Vec cannot fail.
        let _ = frame.write_u16::<BigEndian>(len as u16);
        frame.push(checksum(&frame[5..7]));
    }

    let body_start = frame.len();
    frame.push(TFI_HOST);
    frame.push(command);
    frame.extend_from_slice(params);
    let dcs = checksum(&frame[body_start..]);
    frame.push(dcs);
    frame.push(0x00);
    frame
}

/// Parse one frame read from the controller.
pub fn decode(raw: &[u8]) -> Result<Incoming, FrameError> {
    if raw.len() < 6 {
        return Err(FrameError::TooShort(raw.len()));
    }
    if raw[..3] != PREAMBLE {
        return Err(FrameError::BadPreamble);
    }
    if raw[..6] == ACK_FRAME {
        return Ok(Incoming::Ack);
    }
    if raw[..6] == NACK_FRAME {
        return Ok(Incoming::Nack);
    }
    if raw.len() >= ERROR_FRAME.len() && raw[..ERROR_FRAME.len()] == ERROR_FRAME {
        return Err(FrameError::ErrorFrame);
    }

    let (len, body_start) = if raw[3] == 0xFF && raw[4] == 0xFF {
        if raw.len() < 8 {
            return Err(FrameError::TooShort(raw.len()));
        }
        if checksum(&raw[5..7]) != raw[7] {
            return Err(FrameError::LengthChecksum);
        }
        (BigEndian::read_u16(&raw[5..7]) as usize, 8)
    } else {
        if raw[3].wrapping_add(raw[4]) != 0 {
            return Err(FrameError::LengthChecksum);
        }
        (raw[3] as usize, 5)
    };

    if len < 2 || raw.len() < body_start + len + 1 {
        return Err(FrameError::TooShort(raw.len()));
    }
    let body = &raw[body_start..body_start + len];
    if checksum(body) != raw[body_start + len] {
        return Err(FrameError::DataChecksum);
    }
    if body[0] != TFI_CHIP {
        return Err(FrameError::BadTfi(body[0]));
    }

    Ok(Incoming::Response {
        command: body[1].wrapping_sub(1),
        data: body[2..].to_vec(),
    })
}

/// Decode a response and check it answers `command`.
pub fn decode_response(raw: &[u8], command: u8) -> Result<Vec<u8>, FrameError> {
    match decode(raw)? {
        Incoming::Response { command: c, data } if c == command => Ok(data),
        Incoming::Response { command: c, .. } => Err(FrameError::WrongCommand {
            expected: command,
            actual: c,
        }),
        Incoming::Ack | Incoming::Nack => Err(FrameError::TooShort(6)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_get_firmware_version() {
        assert_eq!(
            encode(0x02, &[]),
            vec![0x00, 0x00, 0xFF, 0x02, 0xFE, 0xD4, 0x02, 0x2A, 0x00]
        );
    }

    #[test]
    fn test_encode_extended() {
        let params = vec![0x11; 300];
        let frame = encode(0x40, &params);
        assert_eq!(&frame[..5], &[0x00, 0x00, 0xFF, 0xFF, 0xFF]);
        assert_eq!(BigEndian::read_u16(&frame[5..7]), 302);
        assert_eq!(frame[5].wrapping_add(frame[6]).wrapping_add(frame[7]), 0);
        assert_eq!(frame.len(), 8 + 302 + 2);
    }

    #[test]
    fn test_decode_ack_and_response() {
        assert_eq!(decode(&ACK_FRAME).unwrap(), Incoming::Ack);

        // D5 03 <IC=33> <Ver=2> <Rev=7> <Support=7>
        let body = [0xD5, 0x03, 0x33, 0x02, 0x07, 0x07];
        let mut raw = vec![0x00, 0x00, 0xFF, 6, 6u8.wrapping_neg()];
        raw.extend_from_slice(&body);
        raw.push(checksum(&body));
        raw.push(0x00);

        assert_eq!(
            decode_response(&raw, 0x02).unwrap(),
            vec![0x33, 0x02, 0x07, 0x07]
        );
        assert!(matches!(
            decode_response(&raw, 0x4A),
            Err(FrameError::WrongCommand { .. })
        ));
    }

    #[test]
    fn test_decode_rejects_corruption() {
        let body = [0xD5, 0x41, 0x00];
        let mut raw = vec![0x00, 0x00, 0xFF, 3, 3u8.wrapping_neg()];
        raw.extend_from_slice(&body);
        raw.push(checksum(&body).wrapping_add(1));
        raw.push(0x00);
        assert_eq!(decode(&raw), Err(FrameError::DataChecksum));

        raw[4] = 0x00;
        assert_eq!(decode(&raw), Err(FrameError::LengthChecksum));

        assert_eq!(decode(&[0x01, 0x02]), Err(FrameError::TooShort(2)));
        assert_eq!(
            decode(&[0x00, 0x00, 0xFF, 0x01, 0xFF, 0x7F, 0x81, 0x00]),
            Err(FrameError::ErrorFrame)
        );
    }
}
