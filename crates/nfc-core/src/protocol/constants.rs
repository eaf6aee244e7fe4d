//! Protocol constants for ISO14443-A Mifare cards.
//!
//! Command bytes follow the NXP MF1S50/MF0ICU1 datasheets; layout and
//! signature values follow libnfc's `nfc-mfclassic` / `nfc-mfultralight`.

// ============================================================================
// Mifare Commands
// ============================================================================

/// Authenticate with key A.
pub const MC_AUTH_A: u8 = 0x60;
/// Authenticate with key B.
pub const MC_AUTH_B: u8 = 0x61;
/// Read 16 bytes (one Classic block, four Ultralight pages).
pub const MC_READ: u8 = 0x30;
/// Write 16 bytes (Classic block, or Ultralight compatibility write).
pub const MC_WRITE: u8 = 0xA0;
/// Transfer the value buffer to a block.
pub const MC_TRANSFER: u8 = 0xB0;
/// Decrement a value block into the value buffer.
pub const MC_DECREMENT: u8 = 0xC0;
/// Increment a value block into the value buffer.
pub const MC_INCREMENT: u8 = 0xC1;
/// Restore a value block into the value buffer.
pub const MC_STORE: u8 = 0xC2;

// ============================================================================
// Sizes
// ============================================================================

/// Classic block size, also the size of every READ response.
pub const BLOCK_SIZE: usize = 16;
/// Ultralight page size.
pub const PAGE_SIZE: usize = 4;
/// Key length for Classic authentication.
pub const KEY_SIZE: usize = 6;
/// Number of UID bytes sent with an authentication frame.
pub const AUTH_UID_SIZE: usize = 4;
/// Value operand length for increment/decrement/transfer.
pub const VALUE_SIZE: usize = 4;

// ============================================================================
// Card Discrimination (ATQA second byte)
// ============================================================================

/// ATQA[1] of Mifare Classic 1K / Mini / Plus 2K (SL1).
pub const ATQA_CLASSIC: u8 = 0x04;
/// ATQA[1] of Mifare Classic 4K.
pub const ATQA_CLASSIC_4K: u8 = 0x02;
/// ATQA[1] of Mifare Ultralight.
pub const ATQA_ULTRALIGHT: u8 = 0x44;

/// ATQA[1] capacity bit signalling a 4K layout.
pub const ATQA_CAPACITY_4K: u8 = 0x02;
/// SAK bit signalling the 320-byte Mini layout.
pub const SAK_MINI: u8 = 0x01;

// ============================================================================
// Classic Layout
// ============================================================================

/// Highest block of a 4K card.
pub const MAX_BLOCK_4K: u8 = 0xFF;
/// Highest block of a 2K (Plus SL1) card.
pub const MAX_BLOCK_2K: u8 = 0x7F;
/// Highest block of a 1K card.
pub const MAX_BLOCK_1K: u8 = 0x3F;
/// Highest block of a 320-byte Mini card.
pub const MAX_BLOCK_MINI: u8 = 0x13;

/// First block of the large (16 block) sectors.
pub const LARGE_SECTOR_START: u8 = 128;
/// Blocks per sector below `LARGE_SECTOR_START`.
pub const SMALL_SECTOR_BLOCKS: u8 = 4;
/// Blocks per sector at or above `LARGE_SECTOR_START`.
pub const LARGE_SECTOR_BLOCKS: u8 = 16;

/// Bytes of sector 0 (manufacturer block, data, trailer) skipped by consumers.
pub const CLASSIC_DATA_OFFSET: usize = 4 * BLOCK_SIZE;

// ============================================================================
// ATS Probe
// ============================================================================

/// RATS frame: FSDI=5 (64 bytes), CID=0.
pub const RATS: [u8; 2] = [0xE0, 0x50];

/// Minimum ATS length for the 2K signature check.
pub const ATS_SIGNATURE_MIN_LEN: usize = 10;
/// Offset of the 2K signature within the ATS.
pub const ATS_SIGNATURE_OFFSET: usize = 5;
/// Historical bytes identifying a Mifare Plus 2K in SL1.
pub const ATS_PLUS_2K_SIGNATURE: [u8; 4] = [0xC1, 0x05, 0x2F, 0x2F];

// ============================================================================
// Ultralight Layout
// ============================================================================

/// Highest page read from an Ultralight card.
pub const ULTRALIGHT_LAST_PAGE: u8 = 15;
/// Pages returned by a single READ.
pub const ULTRALIGHT_PAGES_PER_READ: u8 = 4;
/// Size of a full Ultralight image (16 pages).
pub const ULTRALIGHT_IMAGE_SIZE: usize = 16 * PAGE_SIZE;
/// First page that is not part of the UID.
pub const ULTRALIGHT_FIRST_WRITABLE_PAGE: u8 = 2;
/// Lock bytes page.
pub const ULTRALIGHT_LOCK_PAGE: u8 = 2;
/// One-time-programmable page.
pub const ULTRALIGHT_OTP_PAGE: u8 = 3;
/// Bytes of the manufacturer page skipped by consumers.
pub const ULTRALIGHT_DATA_OFFSET: usize = BLOCK_SIZE;
