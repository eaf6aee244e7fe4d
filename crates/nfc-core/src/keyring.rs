//! Key ring - ordered candidate keys for Mifare Classic authentication.

use thiserror::Error;
use tracing::{debug, trace};

use crate::protocol::{KEY_SIZE, MifareFrame, MifareReply, Target, exchange};
use crate::transport::{ReaderTransport, TransportError};

/// Well-known transport and vendor keys, tried in this order.
pub const DEFAULT_KEYS: [[u8; KEY_SIZE]; 8] = [
    [0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF],
    [0xD3, 0xF7, 0xD3, 0xF7, 0xD3, 0xF7],
    [0xA0, 0xA1, 0xA2, 0xA3, 0xA4, 0xA5],
    [0xB0, 0xB1, 0xB2, 0xB3, 0xB4, 0xB5],
    [0x4D, 0x3A, 0x99, 0xC3, 0x51, 0xDD],
    [0x1A, 0x98, 0x2C, 0x7E, 0x45, 0x9A],
    [0x00, 0x00, 0x00, 0x00, 0x00, 0x00],
    [0xAB, 0xCD, 0xEF, 0x12, 0x34, 0x56],
];

#[derive(Error, Debug, PartialEq, Eq)]
pub enum KeyParseError {
    #[error("Key '{key}' must be {expected} hex digits")]
    BadLength { key: String, expected: usize },
    #[error("Key '{0}' is not valid hex")]
    BadHex(String),
    #[error("Key ring is empty")]
    Empty,
}

/// Why a boundary could not be authenticated.
#[derive(Error, Debug, PartialEq, Eq)]
pub enum AuthError {
    #[error("No key in the ring authenticated block {block}")]
    Exhausted { block: u8 },
    #[error("Unable to reselect tag after failed key")]
    Reselect,
    #[error(transparent)]
    Transport(#[from] TransportError),
}

/// Immutable, ordered list of candidate keys.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyRing {
    keys: Vec<[u8; KEY_SIZE]>,
}

impl Default for KeyRing {
    fn default() -> Self {
        Self {
            keys: DEFAULT_KEYS.to_vec(),
        }
    }
}

impl KeyRing {
    pub fn new(keys: Vec<[u8; KEY_SIZE]>) -> Result<Self, KeyParseError> {
        if keys.is_empty() {
            return Err(KeyParseError::Empty);
        }
        Ok(Self { keys })
    }

    /// Build a ring from hex strings such as `"ffffffffffff"` or `"ff:ff:ff:ff:ff:ff"`.
    pub fn from_hex<S: AsRef<str>>(keys: &[S]) -> Result<Self, KeyParseError> {
        let parsed = keys
            .iter()
            .map(|k| parse_key(k.as_ref()))
            .collect::<Result<Vec<_>, _>>()?;
        Self::new(parsed)
    }

    pub fn keys(&self) -> &[[u8; KEY_SIZE]] {
        &self.keys
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    /// Authenticate `block` with key B, trying each key in ring order.
    ///
    /// A failed attempt halts the card, so the target is re-selected before
    /// the next key is tried.
    pub fn authenticate<T: ReaderTransport + ?Sized>(
        &self,
        reader: &mut T,
        target: &Target,
        block: u8,
    ) -> Result<usize, AuthError> {
        let uid = target.uid_suffix();

        for (index, key) in self.keys.iter().enumerate() {
            let frame = MifareFrame::auth_b(block, *key, uid);
            match exchange(reader, &frame) {
                Ok(MifareReply::Done) | Ok(MifareReply::Data(_)) => {
                    debug!(block, key_index = index, "Authenticated");
                    return Ok(index);
                }
                Ok(MifareReply::Denied)
                | Err(TransportError::AuthFailed)
                | Err(TransportError::Timeout)
                | Err(TransportError::Chip(_)) => {
                    trace!(block, key_index = index, "Key rejected");
                }
                Err(e) => return Err(e.into()),
            }

            if index + 1 < self.keys.len() {
                match reader.select_passive_target() {
                    Ok(Some(_)) => {}
                    Ok(None) => return Err(AuthError::Reselect),
                    Err(e) if e.is_unrecoverable() => return Err(e.into()),
                    Err(_) => return Err(AuthError::Reselect),
                }
            }
        }

        Err(AuthError::Exhausted { block })
    }
}

fn parse_key(text: &str) -> Result<[u8; KEY_SIZE], KeyParseError> {
    let digits: String = text
        .chars()
        .filter(|c| !matches!(c, ':' | ' ' | '-'))
        .collect();
    if digits.len() != KEY_SIZE * 2 {
        return Err(KeyParseError::BadLength {
            key: text.to_string(),
            expected: KEY_SIZE * 2,
        });
    }

    let mut key = [0u8; KEY_SIZE];
    hex::decode_to_slice(&digits, &mut key)
        .map_err(|_| KeyParseError::BadHex(text.to_string()))?;
    Ok(key)
}
