//! NFC-Core: Mifare Classic / Ultralight card reading over PN533 readers.
//!
//! # Architecture
//!
//! The crate is organized into layers:
//!
//! - **Protocol**: Mifare command frames, target identity, constants
//! - **Transport**: reader abstraction (PN533 over USB, mock)
//! - **Key Ring**: ordered key B candidates for Classic authentication
//! - **Card**: read and write engines per card family
//! - **Events**: result reporter trait and stock reporters
//! - **Session**: worker thread running the select / read / report cycle
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use nfc_core::{Pn533Driver, ScanSession, SessionConfig, TracingReporter};
//!
//! let mut session = ScanSession::start(
//!     &Pn533Driver::new(),
//!     SessionConfig::default(),
//!     Arc::new(TracingReporter),
//! )
//! .expect("no reader");
//! std::thread::sleep(std::time::Duration::from_secs(10));
//! session.stop();
//! session.wait();
//! ```

pub mod card;
pub mod events;
pub mod keyring;
pub mod protocol;
pub mod session;
pub mod state;
pub mod transport;

// Re-exports for convenience
pub use card::{CardError, CardImage, UltralightImage, WriteOptions, WriteReport};
pub use events::{
    ChannelReporter, NullReporter, Reported, ResultReporter, ScanEvent, TracingReporter,
};
pub use keyring::{DEFAULT_KEYS, KeyRing};
pub use protocol::{CardKind, Target};
pub use session::{ScanSession, SessionConfig, SessionError};
pub use state::{CancelToken, ScanPhase};
pub use transport::{
    DeviceInfo, MockDriver, MockReader, Pn533Driver, ReaderDriver, ReaderTransport,
    TransportError,
};
