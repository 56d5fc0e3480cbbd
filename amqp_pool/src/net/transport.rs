//! Interface to the protocol encoder/decoder that owns the socket.
//!
//! The transport turns [`Method`]s into wire frames and decoded broker frames
//! into [`IncomingEvent`]s pushed on the sender half returned by
//! [`incoming_channel`]. Handshake, framing and reconnect live behind it.
use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::{
    api::Result,
    frame::{AmqpChannelId, Incoming, Method},
};

#[async_trait]
pub trait Transport: Send + Sync {
    /// Send `method` on channel `channel_id`.
    ///
    /// Returns once the transport accepted the method for writing.
    async fn send_method(&self, channel_id: AmqpChannelId, method: Method) -> Result<()>;

    /// Send a heartbeat frame.
    async fn heartbeat(&self) -> Result<()>;

    /// Close the AMQP connection and the underlying socket.
    async fn close(&self) -> Result<()>;
}

/// Event decoded by the transport, in the order the broker produced it.
#[derive(Debug, Clone)]
pub enum IncomingEvent {
    Channel(AmqpChannelId, Incoming),
    Heartbeat,
    /// `connection.blocked` with its reason.
    Blocked(String),
    /// `connection.unblocked`.
    Unblocked,
    /// Socket level failure.
    TransportError(String),
    /// Socket is closed, no event follows.
    TransportClosed,
}

pub type IncomingSender = mpsc::UnboundedSender<IncomingEvent>;
pub type IncomingReceiver = mpsc::UnboundedReceiver<IncomingEvent>;

/// Channel carrying [`IncomingEvent`]s from the transport to a [`Connection`].
///
/// [`Connection`]: crate::connection::Connection
pub fn incoming_channel() -> (IncomingSender, IncomingReceiver) {
    mpsc::unbounded_channel()
}
