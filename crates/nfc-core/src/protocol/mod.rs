//! Protocol module - Mifare command set and target identity.

pub mod constants;
pub mod mifare;
pub mod target;

pub use constants::*;
pub use mifare::{MifareCommand, MifareFrame, MifareParam, MifareReply, exchange};
pub use target::{CardKind, Target, colon_hex};
