//! Transport layer module.

pub mod mock;
pub mod pn533;
pub mod traits;

pub use mock::{MockDriver, MockReader, SimCard};
pub use pn533::{Pn533Driver, Pn533Reader};
pub use traits::{DeviceInfo, ReaderDriver, ReaderProperty, ReaderTransport, TransportError};
