//! Classic memory layout inference.

use crate::protocol::Target;
use crate::protocol::constants::*;

/// Highest block index to read from a Classic card.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SectorLayout {
    pub max_block: u8,
}

impl SectorLayout {
    /// Guess the layout from ATQA and SAK.
    pub fn infer(target: &Target) -> Self {
        let max_block = if target.atqa()[1] & ATQA_CAPACITY_4K == ATQA_CAPACITY_4K {
            MAX_BLOCK_4K
        } else if target.sak() & SAK_MINI == SAK_MINI {
            MAX_BLOCK_MINI
        } else {
            MAX_BLOCK_1K
        };
        Self { max_block }
    }

    /// Refine with the ATS probe answer: a Mifare Plus 2K in SL1 reports a
    /// 1K ATQA but carries a fixed signature in its historical bytes.
    pub fn refine_with_ats(self, target: &Target, ats: &[u8]) -> Self {
        let capacity_clear = target.atqa()[1] & ATQA_CAPACITY_4K == 0;
        let signature = ATS_SIGNATURE_OFFSET..ATS_SIGNATURE_OFFSET + ATS_PLUS_2K_SIGNATURE.len();

        if capacity_clear
            && ats.len() >= ATS_SIGNATURE_MIN_LEN
            && ats[signature] == ATS_PLUS_2K_SIGNATURE
        {
            return Self {
                max_block: MAX_BLOCK_2K,
            };
        }
        self
    }

    /// Number of blocks covered by the layout.
    pub fn block_count(&self) -> usize {
        self.max_block as usize + 1
    }
}

/// Whether `block` ends a sector, i.e. a new key is needed when walking down.
pub fn is_key_boundary(block: u8) -> bool {
    let step = if block < LARGE_SECTOR_START {
        SMALL_SECTOR_BLOCKS
    } else {
        LARGE_SECTOR_BLOCKS
    };
    (block as u16 + 1) % step as u16 == 0
}

#[cfg(test)]
mod tests {
    use super::*;

    fn target(atqa1: u8, sak: u8) -> Target {
        Target::new(vec![1, 2, 3, 4], [0x00, atqa1], sak)
    }

    #[test]
    fn test_infer() {
        assert_eq!(SectorLayout::infer(&target(0x04, 0x08)).max_block, 0x3F);
        assert_eq!(SectorLayout::infer(&target(0x02, 0x18)).max_block, 0xFF);
        assert_eq!(SectorLayout::infer(&target(0x04, 0x09)).max_block, 0x13);
        // Capacity bit wins over the SAK bit.
        assert_eq!(SectorLayout::infer(&target(0x02, 0x09)).max_block, 0xFF);
    }

    #[test]
    fn test_plus_2k_signature() {
        let ats = [0x0C, 0x75, 0x77, 0x80, 0x02, 0xC1, 0x05, 0x2F, 0x2F, 0x01];
        let t = target(0x04, 0x08);
        let layout = SectorLayout::infer(&t).refine_with_ats(&t, &ats);
        assert_eq!(layout.max_block, 0x7F);
        assert_eq!(layout.block_count(), 128);

        // Too short.
        let layout = SectorLayout::infer(&t).refine_with_ats(&t, &ats[..9]);
        assert_eq!(layout.max_block, 0x3F);

        // Wrong signature.
        let mut other = ats;
        other[8] = 0x00;
        assert_eq!(
            SectorLayout::infer(&t).refine_with_ats(&t, &other).max_block,
            0x3F
        );

        // Capacity bit set.
        let big = target(0x02, 0x18);
        assert_eq!(
            SectorLayout::infer(&big).refine_with_ats(&big, &ats).max_block,
            0xFF
        );
    }

    #[test]
    fn test_key_boundaries() {
        assert!(is_key_boundary(3));
        assert!(is_key_boundary(63));
        assert!(!is_key_boundary(62));
        assert!(is_key_boundary(127));
        assert!(!is_key_boundary(131));
        assert!(is_key_boundary(143));
        assert!(is_key_boundary(255));
    }
}
