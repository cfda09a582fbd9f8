//! Transport channel contract
//!
//! A [`Channel`] is one open transport connection: a websocket, or the
//! response side of a single long-poll request. The transport adapter owns the
//! actual I/O; the session layer only hands it batches of packets.
//!
//! Two implementations ship with the crate:
//!
//! - [`MpscChannel`] forwards packets into a bounded Tokio channel, for adapters
//!   that drive the socket from their own task
//! - [`MemoryChannel`] records every write, for tests

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::Mutex;
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::error::ChannelError;
use crate::protocol::Packet;

/// Unique identifier for a transport channel
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct ChannelId(Uuid);

impl ChannelId {
    /// Create a new unique channel ID
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Get the underlying UUID
    #[must_use]
    pub fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl Default for ChannelId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for ChannelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ChannelId({})", self.0)
    }
}

impl fmt::Display for ChannelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Callback run once when a channel closes
pub type CloseCallback = Box<dyn FnOnce() + Send>;

/// One open transport connection
///
/// `write` must not block: implementations queue the batch and return. A batch
/// is one flush of a session's transport queue, in enqueue order.
pub trait Channel: Send + Sync + fmt::Debug {
    /// Channel identifier
    fn id(&self) -> ChannelId;

    /// Hand a batch of packets to the transport
    fn write(&self, packets: Vec<Packet>) -> Result<(), ChannelError>;

    /// Whether the transport is still open
    fn is_open(&self) -> bool;

    /// Close the transport; runs close callbacks on the first call only
    fn close(&self);

    /// Register a callback run when the channel closes
    ///
    /// Registering on an already closed channel runs the callback immediately.
    fn on_close(&self, callback: CloseCallback);
}

#[derive(Default)]
struct CloseState {
    closed: bool,
    callbacks: Vec<CloseCallback>,
}

impl CloseState {
    fn close(&mut self) -> Vec<CloseCallback> {
        if self.closed {
            return Vec::new();
        }
        self.closed = true;
        std::mem::take(&mut self.callbacks)
    }

    fn register(&mut self, callback: CloseCallback) -> Option<CloseCallback> {
        if self.closed {
            return Some(callback);
        }
        self.callbacks.push(callback);
        None
    }
}

/// Channel backed by a bounded Tokio mpsc sender
///
/// The receiving half is drained by the transport task, which encodes and
/// writes frames to the socket.
pub struct MpscChannel {
    id: ChannelId,
    sender: mpsc::Sender<Packet>,
    state: Mutex<CloseState>,
}

impl MpscChannel {
    /// Create a channel and the receiver the transport task reads from
    #[must_use]
    pub fn new(capacity: usize) -> (Self, mpsc::Receiver<Packet>) {
        let (sender, receiver) = mpsc::channel(capacity);
        let channel = Self {
            id: ChannelId::new(),
            sender,
            state: Mutex::new(CloseState::default()),
        };
        (channel, receiver)
    }
}

impl fmt::Debug for MpscChannel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MpscChannel")
            .field("id", &self.id)
            .field("open", &self.is_open())
            .finish()
    }
}

impl Channel for MpscChannel {
    fn id(&self) -> ChannelId {
        self.id
    }

    fn write(&self, packets: Vec<Packet>) -> Result<(), ChannelError> {
        if !self.is_open() {
            return Err(ChannelError::Closed(self.id.to_string()));
        }
        for packet in packets {
            self.sender
                .try_send(packet)
                .map_err(|e| ChannelError::WriteFailed {
                    channel: self.id.to_string(),
                    reason: e.to_string(),
                })?;
        }
        Ok(())
    }

    fn is_open(&self) -> bool {
        !self.state.lock().closed && !self.sender.is_closed()
    }

    fn close(&self) {
        let callbacks = self.state.lock().close();
        for callback in callbacks {
            callback();
        }
    }

    fn on_close(&self, callback: CloseCallback) {
        let immediate = self.state.lock().register(callback);
        if let Some(callback) = immediate {
            callback();
        }
    }
}

/// Recording channel for tests and embedding
///
/// Every successful write is kept as one batch.
pub struct MemoryChannel {
    id: ChannelId,
    batches: Mutex<Vec<Vec<Packet>>>,
    fail_writes: AtomicBool,
    state: Mutex<CloseState>,
}

impl MemoryChannel {
    /// Create an open recording channel
    #[must_use]
    pub fn new() -> Self {
        Self {
            id: ChannelId::new(),
            batches: Mutex::new(Vec::new()),
            fail_writes: AtomicBool::new(false),
            state: Mutex::new(CloseState::default()),
        }
    }

    /// Make subsequent writes fail
    pub fn fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    /// Every packet written so far, in write order
    #[must_use]
    pub fn packets(&self) -> Vec<Packet> {
        self.batches.lock().iter().flatten().cloned().collect()
    }

    /// Number of write calls that succeeded
    #[must_use]
    pub fn batch_count(&self) -> usize {
        self.batches.lock().len()
    }

    /// Forget everything recorded so far
    pub fn clear(&self) {
        self.batches.lock().clear();
    }
}

impl Default for MemoryChannel {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for MemoryChannel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MemoryChannel")
            .field("id", &self.id)
            .field("batches", &self.batch_count())
            .finish()
    }
}

impl Channel for MemoryChannel {
    fn id(&self) -> ChannelId {
        self.id
    }

    fn write(&self, packets: Vec<Packet>) -> Result<(), ChannelError> {
        if !self.is_open() {
            return Err(ChannelError::Closed(self.id.to_string()));
        }
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(ChannelError::WriteFailed {
                channel: self.id.to_string(),
                reason: "write failure injected".to_string(),
            });
        }
        self.batches.lock().push(packets);
        Ok(())
    }

    fn is_open(&self) -> bool {
        !self.state.lock().closed
    }

    fn close(&self) {
        let callbacks = self.state.lock().close();
        for callback in callbacks {
            callback();
        }
    }

    fn on_close(&self, callback: CloseCallback) {
        let immediate = self.state.lock().register(callback);
        if let Some(callback) = immediate {
            callback();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::PacketType;
    use std::sync::atomic::AtomicUsize;
    use std::sync::Arc;

    #[test]
    fn test_channel_id_uniqueness() {
        assert_ne!(ChannelId::new(), ChannelId::new());
    }

    #[test]
    fn test_memory_channel_records_batches() {
        let channel = MemoryChannel::new();
        channel
            .write(vec![Packet::new(PacketType::Ping), Packet::new(PacketType::Pong)])
            .unwrap();
        channel.write(vec![Packet::new(PacketType::Noop)]).unwrap();

        assert_eq!(channel.batch_count(), 2);
        let types: Vec<_> = channel.packets().iter().map(|p| p.packet_type).collect();
        assert_eq!(types, vec![PacketType::Ping, PacketType::Pong, PacketType::Noop]);
    }

    #[test]
    fn test_close_runs_callbacks_once() {
        let channel = MemoryChannel::new();
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        channel.on_close(Box::new(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        }));

        channel.close();
        channel.close();
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(channel.write(vec![]).is_err());

        // Late registration runs immediately
        let counter = calls.clone();
        channel.on_close(Box::new(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        }));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_injected_write_failure() {
        let channel = MemoryChannel::new();
        channel.fail_writes(true);
        assert!(matches!(
            channel.write(vec![Packet::new(PacketType::Ping)]),
            Err(ChannelError::WriteFailed { .. })
        ));
        assert_eq!(channel.batch_count(), 0);
    }

    #[tokio::test]
    async fn test_mpsc_channel_forwards_packets() {
        let (channel, mut rx) = MpscChannel::new(8);
        channel
            .write(vec![Packet::event("a", vec![]), Packet::event("b", vec![])])
            .unwrap();

        assert_eq!(rx.recv().await.unwrap().name.as_deref(), Some("a"));
        assert_eq!(rx.recv().await.unwrap().name.as_deref(), Some("b"));

        drop(rx);
        assert!(!channel.is_open());
    }

    #[tokio::test]
    async fn test_mpsc_channel_full_is_write_failure() {
        let (channel, _rx) = MpscChannel::new(1);
        let result = channel.write(vec![Packet::new(PacketType::Ping), Packet::new(PacketType::Ping)]);
        assert!(matches!(result, Err(ChannelError::WriteFailed { .. })));
    }
}
