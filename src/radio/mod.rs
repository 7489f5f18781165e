//! SX1276 radio: register map, transport seam and blocking driver

pub mod driver;
pub mod registers;
pub mod traits;

pub use driver::{RadioStatus, Sx1276Driver};
pub use traits::{Radio, RadioConfig, RadioError, RegisterTransport, RxPacket, TransportError};
