// communication/mod.rs
pub mod amqp;
pub mod messages;
pub mod transport;

pub use messages::{Envelope, MessageError};
pub use transport::{LocalBus, Mailbox, Transport, TransportError};
