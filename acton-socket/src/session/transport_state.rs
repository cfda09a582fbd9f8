use std::collections::VecDeque;
use std::sync::Arc;

use crate::channel::Channel;
use crate::error::ChannelError;
use crate::protocol::{Packet, Transport};

/// Bound channel and outbound queue for one transport
#[derive(Debug, Default)]
pub(crate) struct TransportState {
    pub(crate) channel: Option<Arc<dyn Channel>>,
    pub(crate) queue: VecDeque<Packet>,
    /// Polling answers each request once; set after the response was written
    pub(crate) write_once: bool,
}

impl TransportState {
    /// Bind `channel`, returning the channel it replaced
    pub(crate) fn replace_channel(&mut self, channel: Arc<dyn Channel>) -> Option<Arc<dyn Channel>> {
        self.write_once = false;
        self.channel.replace(channel)
    }

    /// Drain the queue into the bound channel as one batch
    ///
    /// Packets stay queued while no channel is bound, and for a polling
    /// channel that already answered its request.
    pub(crate) fn flush(&mut self, transport: Transport) -> Result<(), ChannelError> {
        let Some(channel) = self.channel.as_ref() else {
            return Ok(());
        };
        if self.queue.is_empty() || (transport == Transport::Polling && self.write_once) {
            return Ok(());
        }

        let batch: Vec<Packet> = self.queue.drain(..).collect();
        channel.write(batch)?;

        if transport == Transport::Polling {
            self.write_once = true;
        }
        Ok(())
    }
}

/// All transport slots of a session plus the authoritative transport
#[derive(Debug)]
pub(crate) struct TransportTable {
    pub(crate) current: Transport,
    upgraded: bool,
    polling: TransportState,
    websocket: TransportState,
}

impl TransportTable {
    pub(crate) fn new(current: Transport) -> Self {
        Self {
            current,
            upgraded: false,
            polling: TransportState::default(),
            websocket: TransportState::default(),
        }
    }

    pub(crate) fn state(&self, transport: Transport) -> &TransportState {
        match transport {
            Transport::Polling => &self.polling,
            Transport::WebSocket => &self.websocket,
        }
    }

    pub(crate) fn state_mut(&mut self, transport: Transport) -> &mut TransportState {
        match transport {
            Transport::Polling => &mut self.polling,
            Transport::WebSocket => &mut self.websocket,
        }
    }

    pub(crate) fn states(&self) -> [(Transport, &TransportState); 2] {
        [
            (Transport::Polling, &self.polling),
            (Transport::WebSocket, &self.websocket),
        ]
    }

    /// Make `target` authoritative, moving every other queue onto it
    ///
    /// Only one upgrade per session, and only to websocket. Anything else
    /// returns `Ok(false)` and leaves the table untouched.
    pub(crate) fn upgrade(&mut self, target: Transport) -> Result<bool, ChannelError> {
        if self.upgraded || self.current == target || target != Transport::WebSocket {
            return Ok(false);
        }
        self.upgraded = true;

        let moved: Vec<Packet> = Transport::ALL
            .iter()
            .filter(|t| **t != target)
            .flat_map(|t| self.state_mut(*t).queue.drain(..).collect::<Vec<_>>())
            .collect();

        let state = self.state_mut(target);
        state.queue.extend(moved);
        self.current = target;

        self.state_mut(target).flush(target).map(|()| true)
    }
}
