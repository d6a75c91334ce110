//! Background reader
//!
//! [`SerialInputManager`] services one port from a dedicated thread and
//! forwards everything it reads into a bounded event channel. Consumers can
//! receive from async code or from plain threads.
//!
//! [`SerialInputManager::stop`] closes the event channel, which unblocks a
//! worker waiting on a full channel. With the default infinite read timeout
//! it also closes the port to unblock the pending read.

use crate::port::SerialPort;
use common::{
    Error, EventSender, Result, SerialEvent, SerialEvents, create_event_channel,
};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::JoinHandle;
use std::time::Duration;
use tracing::{debug, info, trace, warn};

/// Buffer size when the port has no read endpoint yet
pub const DEFAULT_BUFFER_SIZE: usize = 4096;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReaderState {
    Stopped,
    Running,
    Stopping,
}

pub struct SerialInputManager {
    port: Arc<SerialPort>,
    read_timeout: Duration,
    buffer_size: usize,
    state: Arc<Mutex<ReaderState>>,
    sender: Option<EventSender>,
    thread: Option<JoinHandle<()>>,
}

fn lock(state: &Mutex<ReaderState>) -> MutexGuard<'_, ReaderState> {
    state.lock().unwrap_or_else(PoisonError::into_inner)
}

impl SerialInputManager {
    pub fn new(port: Arc<SerialPort>) -> Self {
        let buffer_size = port
            .read_endpoint()
            .map(|ep| ep.max_packet_size as usize)
            .filter(|&size| size > 0)
            .unwrap_or(DEFAULT_BUFFER_SIZE);
        Self {
            port,
            read_timeout: Duration::ZERO,
            buffer_size,
            state: Arc::new(Mutex::new(ReaderState::Stopped)),
            sender: None,
            thread: None,
        }
    }

    /// Per-read timeout; zero (the default) blocks until data arrives
    pub fn with_read_timeout(mut self, timeout: Duration) -> Self {
        self.read_timeout = timeout;
        self
    }

    pub fn with_buffer_size(mut self, size: usize) -> Self {
        self.buffer_size = size.max(1);
        self
    }

    pub fn read_timeout(&self) -> Duration {
        self.read_timeout
    }

    pub fn buffer_size(&self) -> usize {
        self.buffer_size
    }

    pub fn state(&self) -> ReaderState {
        *lock(&self.state)
    }

    /// Spawn the reader thread and return the receiving end of its channel
    pub fn start(&mut self, capacity: usize) -> Result<SerialEvents> {
        {
            let mut state = lock(&self.state);
            if *state != ReaderState::Stopped {
                return Err(Error::Io("Already started".to_string()));
            }
            *state = ReaderState::Running;
        }
        if let Some(previous) = self.thread.take() {
            let _ = previous.join();
        }

        let (sender, events) = create_event_channel(capacity);
        let worker = ReaderWorker {
            port: self.port.clone(),
            read_timeout: self.read_timeout,
            buffer_size: self.buffer_size,
            state: self.state.clone(),
            sender: sender.clone(),
        };
        let handle = std::thread::Builder::new()
            .name("serial-reader".to_string())
            .spawn(move || worker.run())
            .map_err(|e| {
                *lock(&self.state) = ReaderState::Stopped;
                Error::Io(format!("Failed to spawn reader thread: {}", e))
            })?;
        self.sender = Some(sender);
        self.thread = Some(handle);
        Ok(events)
    }

    /// Ask the reader to stop; returns immediately
    pub fn stop(&self) {
        let mut state = lock(&self.state);
        if *state != ReaderState::Running {
            return;
        }
        info!("Stop requested");
        *state = ReaderState::Stopping;
        drop(state);

        // wakes a worker blocked on a full channel
        if let Some(sender) = &self.sender {
            sender.close();
        }

        if self.read_timeout.is_zero()
            && let Err(e) = self.port.close()
        {
            debug!("Closing port to stop reader: {}", e);
        }
    }

    /// Wait for the reader thread to exit
    pub fn join(&mut self) {
        if let Some(handle) = self.thread.take()
            && handle.join().is_err()
        {
            warn!("Reader thread panicked");
        }
    }
}

impl Drop for SerialInputManager {
    fn drop(&mut self) {
        self.stop();
        self.join();
    }
}

struct ReaderWorker {
    port: Arc<SerialPort>,
    read_timeout: Duration,
    buffer_size: usize,
    state: Arc<Mutex<ReaderState>>,
    sender: EventSender,
}

impl ReaderWorker {
    fn is_running(&self) -> bool {
        *lock(&self.state) == ReaderState::Running
    }

    fn run(self) {
        info!("Running ...");
        let mut buffer = vec![0u8; self.buffer_size];
        while self.is_running() {
            match self.port.read(&mut buffer, self.read_timeout) {
                Ok(0) => {}
                Ok(n) => {
                    trace!("Read data len={}", n);
                    if self
                        .sender
                        .send_event(SerialEvent::Data(buffer[..n].to_vec()))
                        .is_err()
                    {
                        debug!("Event channel closed");
                        break;
                    }
                }
                Err(e) => {
                    if self.is_running() {
                        warn!("Run ending due to exception: {}", e);
                        if let Err(send_err) =
                            self.sender.send_event(SerialEvent::Error(e.to_string()))
                        {
                            debug!("Error event not delivered: {}", send_err);
                        }
                    } else {
                        debug!("Read ended by stop: {}", e);
                    }
                    break;
                }
            }
        }
        *lock(&self.state) = ReaderState::Stopped;
        info!("Stopped");
        self.sender.close();
    }
}
