//! RabbitMQ transport. Each agent address is a durable-less queue on the default exchange,
//! so publishing to an address is `basic_publish("", address)`.

use crate::communication::transport::{Mailbox, Transport, TransportError};
use amiquip::{
    Channel, Connection, ConsumerMessage, ConsumerOptions, Publish, QueueDeclareOptions,
    Result as AmiquipResult,
};
use std::sync::Mutex;
use std::thread;
use tokio::sync::mpsc;

fn broker(e: amiquip::Error) -> TransportError {
    TransportError::Broker(e.to_string())
}

pub struct AmqpTransport {
    channel: Mutex<Channel>,
    connection: Mutex<Option<Connection>>,
}

impl AmqpTransport {
    /// Opens a connection and declares a queue for each of `addresses`.
    pub fn connect(url: &str, addresses: &[String]) -> Result<Self, TransportError> {
        let mut connection = Connection::insecure_open(url).map_err(broker)?;
        let channel = connection.open_channel(None).map_err(broker)?;
        for address in addresses {
            channel
                .queue_declare(address.as_str(), QueueDeclareOptions::default())
                .map_err(broker)?;
        }
        log::info!("Connected to {} with {} queues", url, addresses.len());
        Ok(Self {
            channel: Mutex::new(channel),
            connection: Mutex::new(Some(connection)),
        })
    }

    pub fn close(&self) -> AmiquipResult<()> {
        let connection = self
            .connection
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take();
        match connection {
            Some(connection) => connection.close(),
            None => Ok(()),
        }
    }
}

impl Transport for AmqpTransport {
    fn send(&self, destination: &str, payload: &[u8]) -> Result<(), TransportError> {
        let channel = self.channel.lock().unwrap_or_else(|e| e.into_inner());
        channel
            .basic_publish("", Publish::new(payload, destination))
            .map_err(broker)
    }
}

/// Consumes the queue named `address` on a dedicated thread and forwards every delivery
/// into the returned mailbox. The thread ends when the mailbox is dropped or the broker
/// closes the consumer.
pub fn spawn_consumer(url: &str, address: &str, capacity: usize) -> Result<Mailbox, TransportError> {
    let connection = Connection::insecure_open(url).map_err(broker)?;
    let (tx, rx) = mpsc::channel(capacity.max(1));
    let address = address.to_string();

    thread::spawn(move || {
        if let Err(e) = consume(connection, &address, tx) {
            log::error!("[{}] Consumer failed: {}", address, e);
        }
    });
    Ok(rx)
}

fn consume(mut connection: Connection, address: &str, tx: mpsc::Sender<Vec<u8>>) -> AmiquipResult<()> {
    let channel = connection.open_channel(None)?;
    let queue = channel.queue_declare(address, QueueDeclareOptions::default())?;
    let consumer = queue.consume(ConsumerOptions::default())?;
    log::info!("[{}] Waiting for messages on '{}'", address, address);

    for message in consumer.receiver() {
        match message {
            ConsumerMessage::Delivery(delivery) => {
                let forwarded = tx.blocking_send(delivery.body.clone());
                consumer.ack(delivery)?;
                if forwarded.is_err() {
                    log::info!("[{}] Mailbox dropped, stopping consumer", address);
                    break;
                }
            }
            other => {
                log::warn!("[{}] Consumer ended: {:?}", address, other);
                break;
            }
        }
    }
    connection.close()
}
