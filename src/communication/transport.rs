use crate::global_variables::MAILBOX_CAPACITY;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use thiserror::Error;
use tokio::sync::mpsc::{self, error::TrySendError};

#[derive(Debug, Clone, Error, PartialEq)]
pub enum TransportError {
    #[error("no mailbox registered for '{0}'")]
    UnknownDestination(String),
    #[error("mailbox of '{0}' is full")]
    MailboxFull(String),
    #[error("mailbox of '{0}' is closed")]
    MailboxClosed(String),
    #[error("failed to encode message: {0}")]
    Encode(String),
    #[error("broker error: {0}")]
    Broker(String),
}

/// Receiving end of an agent's inbound payloads.
pub type Mailbox = mpsc::Receiver<Vec<u8>>;

/// Addressed, fire-and-forget delivery of opaque payloads.
///
/// `send` never waits for the receiver. An `Ok` means the payload was handed to the
/// substrate, not that anyone read it.
pub trait Transport: Send + Sync {
    fn send(&self, destination: &str, payload: &[u8]) -> Result<(), TransportError>;
}

impl<T: Transport + ?Sized> Transport for Arc<T> {
    fn send(&self, destination: &str, payload: &[u8]) -> Result<(), TransportError> {
        (**self).send(destination, payload)
    }
}

/// In-process transport: one bounded mailbox per registered address.
#[derive(Debug, Clone)]
pub struct LocalBus {
    mailboxes: Arc<Mutex<HashMap<String, mpsc::Sender<Vec<u8>>>>>,
    capacity: usize,
}

impl Default for LocalBus {
    fn default() -> Self {
        Self::new(MAILBOX_CAPACITY)
    }
}

impl LocalBus {
    pub fn new(capacity: usize) -> Self {
        Self {
            mailboxes: Arc::new(Mutex::new(HashMap::new())),
            capacity: capacity.max(1),
        }
    }

    /// Opens a mailbox for `address`, replacing any previous one.
    pub fn register(&self, address: &str) -> Mailbox {
        let (tx, rx) = mpsc::channel(self.capacity);
        let mut mailboxes = self.mailboxes.lock().unwrap_or_else(|e| e.into_inner());
        mailboxes.insert(address.to_string(), tx);
        rx
    }

    pub fn unregister(&self, address: &str) -> bool {
        let mut mailboxes = self.mailboxes.lock().unwrap_or_else(|e| e.into_inner());
        mailboxes.remove(address).is_some()
    }

    pub fn addresses(&self) -> Vec<String> {
        let mailboxes = self.mailboxes.lock().unwrap_or_else(|e| e.into_inner());
        let mut addresses: Vec<String> = mailboxes.keys().cloned().collect();
        addresses.sort();
        addresses
    }
}

impl Transport for LocalBus {
    fn send(&self, destination: &str, payload: &[u8]) -> Result<(), TransportError> {
        let sender = {
            let mailboxes = self.mailboxes.lock().unwrap_or_else(|e| e.into_inner());
            mailboxes
                .get(destination)
                .cloned()
                .ok_or_else(|| TransportError::UnknownDestination(destination.to_string()))?
        };
        sender.try_send(payload.to_vec()).map_err(|e| match e {
            TrySendError::Full(_) => TransportError::MailboxFull(destination.to_string()),
            TrySendError::Closed(_) => TransportError::MailboxClosed(destination.to_string()),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn delivers_to_registered_mailbox() {
        let bus = LocalBus::new(4);
        let mut inbox = bus.register("A");
        bus.send("A", b"hello").unwrap();
        assert_eq!(inbox.recv().await.unwrap(), b"hello".to_vec());
        assert_eq!(bus.addresses(), vec!["A".to_string()]);
    }

    #[test]
    fn reports_unknown_full_and_closed() {
        let bus = LocalBus::new(1);
        assert_eq!(
            bus.send("nobody", b"x"),
            Err(TransportError::UnknownDestination("nobody".into()))
        );

        let _inbox = bus.register("A");
        bus.send("A", b"1").unwrap();
        assert_eq!(bus.send("A", b"2"), Err(TransportError::MailboxFull("A".into())));

        let inbox = bus.register("B");
        drop(inbox);
        assert_eq!(bus.send("B", b"1"), Err(TransportError::MailboxClosed("B".into())));

        assert!(bus.unregister("B"));
        assert!(!bus.unregister("B"));
    }
}
