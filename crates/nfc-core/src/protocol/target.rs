//! Selected target identity and card-kind discrimination.

use std::fmt;

use serde::{Deserialize, Serialize};

use super::constants::{ATQA_CLASSIC, ATQA_CLASSIC_4K, ATQA_ULTRALIGHT, AUTH_UID_SIZE};

/// Card family, derived from the ATQA discriminator byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CardKind {
    Classic,
    Ultralight,
    Unknown,
}

impl CardKind {
    /// Classify a card from its ATQA second byte.
    ///
    /// `0x04` is Classic and `0x44` is Ultralight. `0x02`, the ATQA of 4K
    /// Classic cards, is also taken as Classic so their 16-block sectors are
    /// walked instead of reporting identity only.
    pub fn from_discriminator(atqa1: u8) -> Self {
        match atqa1 {
            ATQA_CLASSIC | ATQA_CLASSIC_4K => CardKind::Classic,
            ATQA_ULTRALIGHT => CardKind::Ultralight,
            _ => CardKind::Unknown,
        }
    }
}

impl fmt::Display for CardKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CardKind::Classic => write!(f, "mifare-classic"),
            CardKind::Ultralight => write!(f, "mifare-ultralight"),
            CardKind::Unknown => write!(f, "unknown"),
        }
    }
}

/// A passive ISO14443-A target as reported by the reader.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Target {
    uid: Vec<u8>,
    atqa: [u8; 2],
    sak: u8,
    ats: Vec<u8>,
}

impl Target {
    pub fn new(uid: impl Into<Vec<u8>>, atqa: [u8; 2], sak: u8) -> Self {
        Self {
            uid: uid.into(),
            atqa,
            sak,
            ats: Vec::new(),
        }
    }

    /// Attach the ATS returned during selection (ISO14443-4 capable cards).
    pub fn with_ats(mut self, ats: impl Into<Vec<u8>>) -> Self {
        self.ats = ats.into();
        self
    }

    pub fn uid(&self) -> &[u8] {
        &self.uid
    }

    pub fn atqa(&self) -> [u8; 2] {
        self.atqa
    }

    pub fn sak(&self) -> u8 {
        self.sak
    }

    pub fn ats(&self) -> &[u8] {
        &self.ats
    }

    /// Discriminator byte (ATQA[1]), reported as the numeric card type.
    pub fn type_byte(&self) -> u8 {
        self.atqa[1]
    }

    pub fn kind(&self) -> CardKind {
        CardKind::from_discriminator(self.type_byte())
    }

    /// Last four UID bytes, as sent in Classic authentication frames.
    ///
    /// Shorter UIDs are zero padded on the left.
    pub fn uid_suffix(&self) -> [u8; AUTH_UID_SIZE] {
        let mut out = [0u8; AUTH_UID_SIZE];
        let take = self.uid.len().min(AUTH_UID_SIZE);
        out[AUTH_UID_SIZE - take..].copy_from_slice(&self.uid[self.uid.len() - take..]);
        out
    }

    /// UID as lowercase colon separated hex, e.g. `04:a2:2b:1a`.
    pub fn uid_hex(&self) -> String {
        colon_hex(&self.uid)
    }
}

/// Format bytes as lowercase colon separated hex.
pub fn colon_hex(bytes: &[u8]) -> String {
    bytes
        .iter()
        .map(|b| format!("{:02x}", b))
        .collect::<Vec<_>>()
        .join(":")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_from_discriminator() {
        assert_eq!(CardKind::from_discriminator(0x04), CardKind::Classic);
        assert_eq!(CardKind::from_discriminator(0x02), CardKind::Classic);
        assert_eq!(CardKind::from_discriminator(0x44), CardKind::Ultralight);
        assert_eq!(CardKind::from_discriminator(0x08), CardKind::Unknown);
        assert_eq!(CardKind::Ultralight.to_string(), "mifare-ultralight");
    }

    #[test]
    fn test_uid_formatting() {
        let target = Target::new(vec![0x04, 0xA2, 0x2B, 0x1A], [0x00, 0x04], 0x08);
        assert_eq!(target.uid_hex(), "04:a2:2b:1a");
        assert_eq!(target.type_byte(), 0x04);
    }

    #[test]
    fn test_uid_suffix() {
        let seven = Target::new(vec![1, 2, 3, 4, 5, 6, 7], [0x00, 0x44], 0x00);
        assert_eq!(seven.uid_suffix(), [4, 5, 6, 7]);

        let short = Target::new(vec![9, 8], [0x00, 0x04], 0x08);
        assert_eq!(short.uid_suffix(), [0, 0, 9, 8]);
    }
}
