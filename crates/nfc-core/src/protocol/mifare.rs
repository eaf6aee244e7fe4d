//! Mifare command frames.
//!
//! Every frame is `[command, block, params...]`. The reader's easy framing
//! mode takes care of CRC and Crypto1, so frames are always sent with it on.

use tracing::{debug, trace};

use super::constants::*;
use crate::transport::{ReaderProperty, ReaderTransport, TransportError};

/// Mifare command set.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MifareCommand {
    AuthA,
    AuthB,
    Read,
    Write,
    Transfer,
    Decrement,
    Increment,
    Store,
}

impl MifareCommand {
    pub fn code(self) -> u8 {
        match self {
            MifareCommand::AuthA => MC_AUTH_A,
            MifareCommand::AuthB => MC_AUTH_B,
            MifareCommand::Read => MC_READ,
            MifareCommand::Write => MC_WRITE,
            MifareCommand::Transfer => MC_TRANSFER,
            MifareCommand::Decrement => MC_DECREMENT,
            MifareCommand::Increment => MC_INCREMENT,
            MifareCommand::Store => MC_STORE,
        }
    }
}

/// Command parameters, shaped per command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MifareParam {
    None,
    Auth {
        key: [u8; KEY_SIZE],
        uid: [u8; AUTH_UID_SIZE],
    },
    Data([u8; BLOCK_SIZE]),
    Value([u8; VALUE_SIZE]),
}

/// A single Mifare command frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MifareFrame {
    command: MifareCommand,
    block: u8,
    param: MifareParam,
}

impl MifareFrame {
    pub fn read(block: u8) -> Self {
        Self {
            command: MifareCommand::Read,
            block,
            param: MifareParam::None,
        }
    }

    pub fn write(block: u8, data: [u8; BLOCK_SIZE]) -> Self {
        Self {
            command: MifareCommand::Write,
            block,
            param: MifareParam::Data(data),
        }
    }

    pub fn auth_a(block: u8, key: [u8; KEY_SIZE], uid: [u8; AUTH_UID_SIZE]) -> Self {
        Self {
            command: MifareCommand::AuthA,
            block,
            param: MifareParam::Auth { key, uid },
        }
    }

    pub fn auth_b(block: u8, key: [u8; KEY_SIZE], uid: [u8; AUTH_UID_SIZE]) -> Self {
        Self {
            command: MifareCommand::AuthB,
            block,
            param: MifareParam::Auth { key, uid },
        }
    }

    /// Value command. `Transfer` carries no operand on the wire.
    pub fn value(command: MifareCommand, block: u8, operand: [u8; VALUE_SIZE]) -> Option<Self> {
        let param = match command {
            MifareCommand::Increment | MifareCommand::Decrement | MifareCommand::Store => {
                MifareParam::Value(operand)
            }
            MifareCommand::Transfer => MifareParam::None,
            _ => return None,
        };
        Some(Self {
            command,
            block,
            param,
        })
    }

    pub fn command(&self) -> MifareCommand {
        self.command
    }

    pub fn block(&self) -> u8 {
        self.block
    }

    /// Encode to wire bytes.
    pub fn encode(&self) -> Vec<u8> {
        let mut frame = Vec::with_capacity(2 + BLOCK_SIZE);
        frame.push(self.command.code());
        frame.push(self.block);
        match &self.param {
            MifareParam::None => {}
            MifareParam::Auth { key, uid } => {
                frame.extend_from_slice(key);
                frame.extend_from_slice(uid);
            }
            MifareParam::Data(data) => frame.extend_from_slice(data),
            MifareParam::Value(value) => frame.extend_from_slice(value),
        }
        frame
    }

    /// Interpret the reader's answer to this frame.
    pub fn decode(
        &self,
        response: Result<Vec<u8>, TransportError>,
    ) -> Result<MifareReply, TransportError> {
        match response {
            Ok(bytes) => match self.command {
                MifareCommand::Read => {
                    if bytes.len() != BLOCK_SIZE {
                        return Err(TransportError::UnexpectedLength {
                            expected: BLOCK_SIZE,
                            actual: bytes.len(),
                        });
                    }
                    let mut data = [0u8; BLOCK_SIZE];
                    data.copy_from_slice(&bytes);
                    Ok(MifareReply::Data(data))
                }
                _ => Ok(MifareReply::Done),
            },
            // Invalid received frame: authenticated, but the access bits
            // deny this operation with the current key.
            Err(TransportError::RfTransmission) => Ok(MifareReply::Denied),
            Err(TransportError::UnexpectedLength { .. }) if self.command != MifareCommand::Read => {
                Ok(MifareReply::Denied)
            }
            Err(e) => Err(e),
        }
    }
}

/// Outcome of a Mifare command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MifareReply {
    /// Command accepted.
    Done,
    /// Block contents returned by READ.
    Data([u8; BLOCK_SIZE]),
    /// Access conditions refused the command.
    Denied,
}

/// Send one Mifare frame with easy framing enabled.
pub fn exchange<T: ReaderTransport + ?Sized>(
    reader: &mut T,
    frame: &MifareFrame,
) -> Result<MifareReply, TransportError> {
    reader.set_property(ReaderProperty::EasyFraming, true)?;

    let bytes = frame.encode();
    trace!(cmd = %format!("0x{:02X}", bytes[0]), block = frame.block, "Mifare frame");

    let reply = frame.decode(reader.transceive(&bytes, None))?;
    if reply == MifareReply::Denied {
        debug!(block = frame.block, command = ?frame.command, "Access denied");
    }
    Ok(reply)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_read() {
        assert_eq!(MifareFrame::read(0x3F).encode(), vec![0x30, 0x3F]);
    }

    #[test]
    fn test_encode_auth() {
        let frame = MifareFrame::auth_b(7, [0xFF; 6], [1, 2, 3, 4]);
        assert_eq!(
            frame.encode(),
            vec![0x61, 7, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 1, 2, 3, 4]
        );
        assert_eq!(MifareFrame::auth_a(7, [0; 6], [0; 4]).encode()[0], 0x60);
    }

    #[test]
    fn test_encode_write_and_value() {
        let frame = MifareFrame::write(4, [0xAB; 16]);
        let bytes = frame.encode();
        assert_eq!(bytes.len(), 18);
        assert_eq!(&bytes[..2], &[0xA0, 4]);

        let inc = MifareFrame::value(MifareCommand::Increment, 5, [1, 0, 0, 0]).unwrap();
        assert_eq!(inc.encode(), vec![0xC1, 5, 1, 0, 0, 0]);

        let transfer = MifareFrame::value(MifareCommand::Transfer, 5, [0; 4]).unwrap();
        assert_eq!(transfer.encode(), vec![0xB0, 5]);

        assert!(MifareFrame::value(MifareCommand::Read, 5, [0; 4]).is_none());
    }

    #[test]
    fn test_decode_read() {
        let frame = MifareFrame::read(1);
        assert_eq!(
            frame.decode(Ok(vec![7u8; 16])).unwrap(),
            MifareReply::Data([7u8; 16])
        );
        assert!(matches!(
            frame.decode(Ok(vec![0u8; 4])),
            Err(TransportError::UnexpectedLength {
                expected: 16,
                actual: 4
            })
        ));
        assert_eq!(
            frame.decode(Err(TransportError::RfTransmission)).unwrap(),
            MifareReply::Denied
        );
    }

    #[test]
    fn test_decode_benign_errors() {
        let write = MifareFrame::write(4, [0; 16]);
        let short = Err(TransportError::UnexpectedLength {
            expected: 0,
            actual: 1,
        });
        assert_eq!(write.decode(short).unwrap(), MifareReply::Denied);
        assert_eq!(write.decode(Ok(vec![])).unwrap(), MifareReply::Done);
        assert!(write.decode(Err(TransportError::Timeout)).is_err());
    }
}
