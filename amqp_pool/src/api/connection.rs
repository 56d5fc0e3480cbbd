//! AMQP connection as seen by channels: one [`Transport`] to send methods,
//! and one router task delivering the transport's [`IncomingEvent`]s to the
//! channels they belong to.
//!
//! # Example
//! ```rust,no_run
//! # use std::sync::Arc;
//! # use amqp_pool::{connection::Connection, net::{incoming_channel, Transport}};
//! # async fn run(transport: Arc<dyn Transport>) {
//! // the transport pushes decoded frames on `incoming_tx`
//! let (incoming_tx, incoming_rx) = incoming_channel();
//! # drop(incoming_tx);
//! let connection = Connection::open(transport, incoming_rx);
//!
//! let channel = connection.open_channel(1).await.unwrap();
//! // ... use the channel ...
//! channel.close().await.unwrap();
//! connection.close().await.unwrap();
//! # }
//! ```
//!
//! [`Transport`]: crate::net::Transport
//! [`IncomingEvent`]: crate::net::IncomingEvent

use std::{
    collections::HashMap,
    fmt,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
};

use parking_lot::Mutex;
use tokio::sync::{broadcast, watch};
#[cfg(feature = "traces")]
use tracing::{debug, error, info, trace, warn};

use crate::{
    frame::{AmqpChannelId, Incoming},
    net::{IncomingEvent, IncomingReceiver, Transport},
};

use super::{
    channel::{Channel, WeakChannel},
    error::Error,
    Result,
};

const CONNECTION_EVENT_BUFFER_SIZE: usize = 64;

/// Out-of-band notification of a connection, see [`Connection::subscribe`].
#[derive(Debug, Clone)]
pub enum ConnectionEvent {
    Connected,
    Disconnected,
    /// Transport failure, or an error on one of the pooled channels.
    Error(Error),
    /// Server stopped accepting publishes, with its reason.
    Blocked(String),
    Unblocked,
    Heartbeat,
}

/// Represent an AMQP connection shared by channels.
///
/// It is cheap to clone, all clones refer to the same connection.
#[derive(Clone)]
pub struct Connection {
    shared: Arc<SharedConnectionInner>,
}

struct SharedConnectionInner {
    transport: Arc<dyn Transport>,
    is_open: AtomicBool,
    channels: Mutex<HashMap<AmqpChannelId, WeakChannel>>,
    events_tx: broadcast::Sender<ConnectionEvent>,
    /// Count of heartbeats received so far.
    heartbeat_tx: watch::Sender<u64>,
}

impl Connection {
    /// Start routing `incoming` to the channels of a new connection.
    ///
    /// The transport is expected to be connected already. Must be called
    /// within a tokio runtime.
    pub fn open(transport: Arc<dyn Transport>, incoming: IncomingReceiver) -> Self {
        let (events_tx, _) = broadcast::channel(CONNECTION_EVENT_BUFFER_SIZE);
        let (heartbeat_tx, _) = watch::channel(0);
        let connection = Self {
            shared: Arc::new(SharedConnectionInner {
                transport,
                is_open: AtomicBool::new(true),
                channels: Mutex::new(HashMap::new()),
                events_tx,
                heartbeat_tx,
            }),
        };
        tokio::spawn(connection.clone().route(incoming));
        connection.emit(ConnectionEvent::Connected);
        connection
    }

    pub fn is_open(&self) -> bool {
        self.shared.is_open.load(Ordering::Relaxed)
    }

    pub(crate) fn transport(&self) -> &Arc<dyn Transport> {
        &self.shared.transport
    }

    /// Subscribe to out-of-band events of this connection.
    pub fn subscribe(&self) -> broadcast::Receiver<ConnectionEvent> {
        self.shared.events_tx.subscribe()
    }

    pub(crate) fn emit(&self, event: ConnectionEvent) {
        // no subscriber is fine
        let _ = self.shared.events_tx.send(event);
    }

    /// Receiver that is marked changed on every heartbeat received after
    /// this call.
    pub(crate) fn heartbeat_receiver(&self) -> watch::Receiver<u64> {
        self.shared.heartbeat_tx.subscribe()
    }

    /// Number of heartbeats received so far.
    pub fn heartbeats(&self) -> u64 {
        *self.shared.heartbeat_tx.borrow()
    }

    /// Send a heartbeat to the server.
    pub async fn heartbeat(&self) -> Result<()> {
        if !self.is_open() {
            return Err(Error::ConnectionUseError(format!("{} is closed", self)));
        }
        self.shared.transport.heartbeat().await
    }

    /// Create a channel with `channel_id`, not opened yet.
    ///
    /// Incoming methods for `channel_id` are routed to the returned channel
    /// from now on, replacing any earlier channel with the same id.
    pub fn channel(&self, channel_id: AmqpChannelId) -> Channel {
        let channel = Channel::new(channel_id, self.clone());
        self.shared
            .channels
            .lock()
            .insert(channel_id, channel.downgrade());
        channel
    }

    /// Create and open a channel with `channel_id`.
    ///
    /// # Errors
    ///
    /// Returns error if the connection is closed, or the channel fails to open.
    pub async fn open_channel(&self, channel_id: AmqpChannelId) -> Result<Channel> {
        if !self.is_open() {
            return Err(Error::ConnectionUseError(format!("{} is closed", self)));
        }
        let channel = self.channel(channel_id);
        channel.open().await?;
        Ok(channel)
    }

    fn lookup(&self, channel_id: AmqpChannelId) -> Option<Channel> {
        let mut channels = self.shared.channels.lock();
        match channels.get(&channel_id).map(WeakChannel::upgrade) {
            Some(Some(channel)) => Some(channel),
            Some(None) => {
                // every handle of the channel is dropped
                channels.remove(&channel_id);
                None
            }
            None => None,
        }
    }

    /// Close the transport, and every channel with it.
    pub async fn close(&self) -> Result<()> {
        if !self.is_open() {
            return Ok(());
        }
        let res = self.shared.transport.close().await;
        self.shutdown(Error::NetworkError("connection closed by client".to_string()));
        res
    }

    /// Mark the connection closed and close all channels with `err`.
    fn shutdown(&self, err: Error) {
        if !self.shared.is_open.swap(false, Ordering::Relaxed) {
            return;
        }
        let channels: Vec<Channel> = self
            .shared
            .channels
            .lock()
            .drain()
            .filter_map(|(_, channel)| channel.upgrade())
            .collect();
        #[cfg(feature = "traces")]
        info!("{} is closed, closing {} channels", self, channels.len());
        for channel in channels {
            channel.shutdown(err.clone());
        }
        self.emit(ConnectionEvent::Disconnected);
    }

    /// Router loop, runs until the transport is closed.
    async fn route(self, mut incoming: IncomingReceiver) {
        while let Some(event) = incoming.recv().await {
            match event {
                IncomingEvent::Channel(channel_id, method) => {
                    self.route_to_channel(channel_id, method)
                }
                IncomingEvent::Heartbeat => {
                    #[cfg(feature = "traces")]
                    trace!("heartbeat received on {}", self);
                    self.shared
                        .heartbeat_tx
                        .send_modify(|count| *count = count.wrapping_add(1));
                    self.emit(ConnectionEvent::Heartbeat);
                }
                IncomingEvent::Blocked(reason) => {
                    #[cfg(feature = "traces")]
                    warn!("{} is blocked by server, reason: {}", self, reason);
                    self.emit(ConnectionEvent::Blocked(reason));
                }
                IncomingEvent::Unblocked => {
                    #[cfg(feature = "traces")]
                    info!("{} is unblocked by server", self);
                    self.emit(ConnectionEvent::Unblocked);
                }
                IncomingEvent::TransportError(msg) => {
                    #[cfg(feature = "traces")]
                    error!("{} transport error: {}", self, msg);
                    self.emit(ConnectionEvent::Error(Error::NetworkError(msg)));
                }
                IncomingEvent::TransportClosed => break,
            }
        }
        #[cfg(feature = "traces")]
        debug!("exit router of {}", self);
        self.shutdown(Error::NetworkError("connection closed".to_string()));
    }

    fn route_to_channel(&self, channel_id: AmqpChannelId, method: Incoming) {
        match self.lookup(channel_id) {
            Some(channel) => channel.handle_incoming(method),
            None => {
                #[cfg(feature = "traces")]
                error!(
                    "no channel {} on {}, discard {:?}",
                    channel_id,
                    self,
                    method.header()
                );
                #[cfg(not(feature = "traces"))]
                let _ = method;
            }
        }
    }
}

impl fmt::Display for Connection {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "connection {:p}", Arc::as_ptr(&self.shared))
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use crate::{
        api::error::Error,
        net::IncomingEvent,
        test_utils::{setup_logging, MockTransport},
    };

    use super::ConnectionEvent;

    #[tokio::test]
    async fn test_events_are_forwarded() {
        setup_logging();
        let (connection, transport) = MockTransport::connect();
        let mut events = connection.subscribe();

        transport.push_event(IncomingEvent::Blocked("low on memory".to_string()));
        transport.push_event(IncomingEvent::Unblocked);
        transport.push_event(IncomingEvent::Heartbeat);

        assert!(matches!(events.recv().await, Ok(ConnectionEvent::Blocked(reason)) if reason == "low on memory"));
        assert!(matches!(events.recv().await, Ok(ConnectionEvent::Unblocked)));
        assert!(matches!(events.recv().await, Ok(ConnectionEvent::Heartbeat)));
        assert_eq!(1, connection.heartbeats());
    }

    #[tokio::test]
    async fn test_transport_closed_closes_channels() {
        setup_logging();
        let (connection, transport) = MockTransport::connect();
        transport.reply_ok(true);
        let channel = connection.open_channel(1).await.unwrap();
        let mut events = connection.subscribe();

        transport.push_event(IncomingEvent::TransportClosed);
        assert!(matches!(events.recv().await, Ok(ConnectionEvent::Disconnected)));
        assert!(channel.is_closed());
        assert!(!connection.is_open());
        assert!(matches!(
            connection.open_channel(2).await,
            Err(Error::ConnectionUseError(_))
        ));
    }

    #[tokio::test]
    async fn test_unknown_channel_is_discarded() {
        let (connection, transport) = MockTransport::connect();
        transport.push(9, crate::frame::Incoming::from(crate::frame::OpenChannelOk));
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(connection.is_open());
    }

    #[tokio::test]
    async fn test_close() {
        let (connection, transport) = MockTransport::connect();
        transport.reply_ok(true);
        let channel = connection.open_channel(1).await.unwrap();
        connection.close().await.unwrap();
        assert!(channel.is_closed());
        assert!(transport.is_closed());
        // idempotent
        connection.close().await.unwrap();
    }
}
