pub mod message;
pub mod transport;

pub use message::{Delivery, DispatchOutcome, RawMessage};
pub use transport::{Transport, TransportError};
