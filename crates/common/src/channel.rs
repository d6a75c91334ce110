//! Async channel bridge between the reader thread and async consumers

use async_channel::{Receiver, Sender, bounded};

/// Default number of events buffered before the reader blocks
pub const DEFAULT_CHANNEL_CAPACITY: usize = 256;

/// Events produced by the background reader
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SerialEvent {
    /// Bytes received from the port
    Data(Vec<u8>),
    /// Reading stopped because of this error; no further events follow
    Error(String),
}

/// Receiving side, usable from async code or plain threads
#[derive(Clone)]
pub struct SerialEvents {
    event_rx: Receiver<SerialEvent>,
}

impl SerialEvents {
    /// Receive the next event; fails once the reader has stopped and the
    /// channel is drained
    pub async fn recv(&self) -> crate::Result<SerialEvent> {
        self.event_rx
            .recv()
            .await
            .map_err(|e| crate::Error::Channel(e.to_string()))
    }

    /// Receive the next event (blocking)
    pub fn recv_blocking(&self) -> crate::Result<SerialEvent> {
        self.event_rx
            .recv_blocking()
            .map_err(|e| crate::Error::Channel(e.to_string()))
    }

    /// Try to receive an event without blocking
    pub fn try_recv(&self) -> Option<SerialEvent> {
        self.event_rx.try_recv().ok()
    }

    pub fn is_closed(&self) -> bool {
        self.event_rx.is_closed()
    }
}

/// Sending side, owned by the reader thread
#[derive(Clone)]
pub struct EventSender {
    event_tx: Sender<SerialEvent>,
}

impl EventSender {
    /// Send an event (blocking while the channel is full)
    pub fn send_event(&self, event: SerialEvent) -> crate::Result<()> {
        self.event_tx
            .send_blocking(event)
            .map_err(|e| crate::Error::Channel(e.to_string()))
    }

    /// Close the channel; pending events can still be received
    pub fn close(&self) {
        self.event_tx.close();
    }
}

/// Create the channel bridge between the reader thread and its consumers
///
/// Returns (EventSender for the reader thread, SerialEvents for consumers)
pub fn create_event_channel(capacity: usize) -> (EventSender, SerialEvents) {
    let (event_tx, event_rx) = bounded(capacity.max(1));
    (EventSender { event_tx }, SerialEvents { event_rx })
}
