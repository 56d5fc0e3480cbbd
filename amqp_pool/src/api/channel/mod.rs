//! API implementation of AMQP Channel
//!
//! A [`Channel`] is opened on a [`Connection`] with a given id. All AMQP
//! methods of a channel are implemented as methods of [`Channel`], grouped by
//! AMQP class in the sub-modules.
//!
//! [`Connection`]: crate::connection::Connection

use std::{
    collections::HashMap,
    fmt,
    sync::{Arc, Weak},
};

use parking_lot::Mutex;
use tokio::sync::{broadcast, mpsc, watch};
#[cfg(feature = "traces")]
use tracing::{debug, error, info, trace, warn};

use crate::{
    api::{connection::Connection, error::Error, Result},
    frame::{
        AmqpChannelId, AmqpDeliveryTag, BasicProperties, CancelOk, CloseChannel, CloseChannelOk,
        Deliver, Flow, FlowOk, Incoming, Method, OpenChannel, ReplyKind, REPLY_SUCCESS,
    },
};

mod ack_strategy;
mod basic;
mod confirm;
mod correlation;
mod exchange;
mod queue;
mod tx;

pub use ack_strategy::*;
pub use basic::*;
pub use confirm::*;
pub use exchange::*;
pub use queue::*;
pub use tx::*;

use correlation::{Confirms, PendingConfirm, PendingReply, Responders};

const CHANNEL_EVENT_BUFFER_SIZE: usize = 64;

/////////////////////////////////////////////////////////////////////////////
/// Lifecycle state of a channel.
#[derive(Debug, Clone)]
pub enum ChannelStatus {
    Opening,
    Open,
    Closing,
    /// Closed, with the error that closed it if it did not close cleanly.
    Closed(Option<Error>),
}

impl ChannelStatus {
    pub fn is_open(&self) -> bool {
        matches!(self, ChannelStatus::Open)
    }

    pub fn is_closed(&self) -> bool {
        matches!(self, ChannelStatus::Closed(_))
    }
}

/// Out-of-band notification of a channel, see [`Channel::subscribe`].
#[derive(Debug, Clone)]
pub enum ChannelEvent {
    Opened,
    /// Carries the error if the channel was closed by the server or the network.
    Closed(Option<Error>),
    /// A mandatory or immediate publish is returned by the server.
    Returned(crate::api::error::RouteError),
    Errored(Error),
    /// Server asked to pause (`false`) or restart (`true`) content delivery.
    Flow(bool),
}

/// Represent an AMQP Channel.
///
/// It is cheap to clone, all clones refer to the same channel.
#[derive(Clone)]
pub struct Channel {
    shared: Arc<SharedChannelInner>,
}

struct SharedChannelInner {
    channel_id: AmqpChannelId,
    connection: Connection,
    status_tx: watch::Sender<ChannelStatus>,
    events_tx: broadcast::Sender<ChannelEvent>,
    state: Mutex<ChannelState>,
}

struct ChannelState {
    confirm_mode: bool,
    last_message_id: u64,
    last_delivery_tag: AmqpDeliveryTag,
    last_consumer_id: u64,
    publish_strategy: AckStrategy,
    responders: Responders,
    confirms: Confirms,
    consumers: HashMap<String, mpsc::UnboundedSender<Deliver>>,
}

/// Handle held by the connection to route incoming methods.
#[derive(Clone)]
pub(crate) struct WeakChannel(Weak<SharedChannelInner>);

impl WeakChannel {
    pub(crate) fn upgrade(&self) -> Option<Channel> {
        self.0.upgrade().map(|shared| Channel { shared })
    }
}

/////////////////////////////////////////////////////////////////////////////
impl Channel {
    /// New channel can only be created by [`Connection::channel`].
    ///
    /// [`Connection::channel`]: crate::connection::Connection::channel
    pub(crate) fn new(channel_id: AmqpChannelId, connection: Connection) -> Self {
        let (status_tx, _) = watch::channel(ChannelStatus::Closed(None));
        let (events_tx, _) = broadcast::channel(CHANNEL_EVENT_BUFFER_SIZE);
        Self {
            shared: Arc::new(SharedChannelInner {
                channel_id,
                connection,
                status_tx,
                events_tx,
                state: Mutex::new(ChannelState {
                    confirm_mode: false,
                    last_message_id: 0,
                    last_delivery_tag: 0,
                    last_consumer_id: 0,
                    publish_strategy: AckStrategy::default(),
                    responders: Responders::default(),
                    confirms: Confirms::default(),
                    consumers: HashMap::new(),
                }),
            }),
        }
    }

    pub(crate) fn downgrade(&self) -> WeakChannel {
        WeakChannel(Arc::downgrade(&self.shared))
    }

    /// `true` if both handles refer to the same channel instance.
    pub(crate) fn same_channel(&self, other: &Channel) -> bool {
        Arc::ptr_eq(&self.shared, &other.shared)
    }

    pub fn channel_id(&self) -> AmqpChannelId {
        self.shared.channel_id
    }

    pub fn connection(&self) -> &Connection {
        &self.shared.connection
    }

    pub fn status(&self) -> ChannelStatus {
        self.shared.status_tx.borrow().clone()
    }

    pub fn is_open(&self) -> bool {
        self.shared.status_tx.borrow().is_open()
    }

    pub fn is_closed(&self) -> bool {
        self.shared.status_tx.borrow().is_closed()
    }

    /// `true` once `confirm.select` succeeded, until the channel is opened again.
    pub fn is_confirm_mode(&self) -> bool {
        self.shared.state.lock().confirm_mode
    }

    pub(crate) fn set_confirm_mode(&self, confirm_mode: bool) {
        let mut state = self.shared.state.lock();
        if confirm_mode && !state.confirm_mode {
            // the server numbers confirms from 1 after `confirm.select`
            state.last_delivery_tag = 0;
        }
        state.confirm_mode = confirm_mode;
    }

    /// Strategy used by [`basic_publish`] when the arguments do not name one.
    ///
    /// [`basic_publish`]: Channel::basic_publish
    pub fn publish_strategy(&self) -> AckStrategy {
        self.shared.state.lock().publish_strategy
    }

    pub fn set_publish_strategy(&self, strategy: AckStrategy) {
        self.shared.state.lock().publish_strategy = strategy;
    }

    /// Subscribe to out-of-band events of this channel.
    pub fn subscribe(&self) -> broadcast::Receiver<ChannelEvent> {
        self.shared.events_tx.subscribe()
    }

    fn emit(&self, event: ChannelEvent) {
        // no subscriber is fine
        let _ = self.shared.events_tx.send(event);
    }

    /// Resolve once the channel is closed, with the error to report to
    /// whoever was still waiting on it.
    pub(crate) async fn wait_closed(&self) -> Error {
        let mut status_rx = self.shared.status_tx.subscribe();
        let status = match status_rx.wait_for(ChannelStatus::is_closed).await {
            Ok(status) => status.clone(),
            Err(_) => ChannelStatus::Closed(None),
        };
        match status {
            ChannelStatus::Closed(Some(err)) => err,
            _ => Error::ChannelClosed(self.channel_id()),
        }
    }

    fn check_open(&self) -> Result<()> {
        if self.is_open() {
            Ok(())
        } else {
            Err(Error::ChannelUseError(format!("{} is not open", self)))
        }
    }

    /// Send a method without waiting for any reply.
    pub(crate) async fn send<M: Into<Method>>(&self, method: M) -> Result<()> {
        let method = method.into();
        #[cfg(feature = "traces")]
        trace!("send {:?} on {}", method.header(), self);
        self.connection()
            .transport()
            .send_method(self.channel_id(), method)
            .await
    }

    fn register_responder(&self, kind: ReplyKind) -> Result<PendingReply> {
        let mut state = self.shared.state.lock();
        match (kind, self.status()) {
            (ReplyKind::OpenChannel, ChannelStatus::Opening)
            | (ReplyKind::CloseChannel, ChannelStatus::Closing) => {}
            (_, ChannelStatus::Open) => {}
            _ => return Err(Error::ChannelUseError(format!("{} is not open", self))),
        }
        Ok(state.responders.register(kind))
    }

    /// Send a synchronous method and wait for its reply, or for the channel
    /// to be closed, whichever comes first.
    pub(crate) async fn request<M: Into<Method>>(
        &self,
        method: M,
        kind: ReplyKind,
    ) -> Result<Incoming> {
        let pending = self.register_responder(kind)?;
        self.send(method).await?;
        pending.wait().await
    }

    pub(crate) fn register_confirm(&self, delivery_tag: AmqpDeliveryTag) -> Result<PendingConfirm> {
        let mut state = self.shared.state.lock();
        self.check_open()?;
        Ok(state.confirms.register(delivery_tag))
    }

    pub(crate) fn forget_confirm(&self, delivery_tag: AmqpDeliveryTag) {
        self.shared.state.lock().confirms.forget(delivery_tag);
    }

    /// Fill in the message id if missing, and take the next confirm
    /// sequence number if the channel is in confirm mode.
    pub(crate) fn prepare_publish(
        &self,
        mut properties: BasicProperties,
    ) -> (BasicProperties, Option<AmqpDeliveryTag>) {
        let mut state = self.shared.state.lock();
        state.last_message_id += 1;
        if properties.message_id().is_none() {
            properties.with_message_id(&format!("_{}", state.last_message_id));
        }
        let delivery_tag = if state.confirm_mode {
            state.last_delivery_tag += 1;
            Some(state.last_delivery_tag)
        } else {
            None
        };
        (properties, delivery_tag)
    }

    pub(crate) fn register_consumer(
        &self,
        consumer_tag: &str,
    ) -> Result<mpsc::UnboundedReceiver<Deliver>> {
        let mut state = self.shared.state.lock();
        self.check_open()?;
        if state.consumers.contains_key(consumer_tag) {
            return Err(Error::ChannelUseError(format!(
                "consumer {} already exists on {}",
                consumer_tag, self
            )));
        }
        let (tx, rx) = mpsc::unbounded_channel();
        state.consumers.insert(consumer_tag.to_owned(), tx);
        Ok(rx)
    }

    pub(crate) fn deregister_consumer(&self, consumer_tag: &str) -> bool {
        self.shared
            .state
            .lock()
            .consumers
            .remove(consumer_tag)
            .is_some()
    }

    pub(crate) fn generate_consumer_tag(&self) -> String {
        let mut state = self.shared.state.lock();
        state.last_consumer_id += 1;
        format!("amq.ctag-{}-{}", self.channel_id(), state.last_consumer_id)
    }

    /// Open the channel on the server.
    ///
    /// # Errors
    ///
    /// Returns error if the channel is not closed, or if the server or the
    /// network fails the request.
    pub async fn open(&self) -> Result<()> {
        {
            let mut state = self.shared.state.lock();
            if !self.is_closed() {
                return Err(Error::ChannelOpenError(format!("{} is not closed", self)));
            }
            if !self.connection().is_open() {
                return Err(Error::ConnectionUseError(format!(
                    "{} is closed",
                    self.connection()
                )));
            }
            state.confirm_mode = false;
            self.shared.status_tx.send_replace(ChannelStatus::Opening);
        }

        match self.request(OpenChannel, ReplyKind::OpenChannel).await {
            Ok(_) => {
                let opened = self.shared.status_tx.send_if_modified(|status| {
                    if matches!(status, ChannelStatus::Opening) {
                        *status = ChannelStatus::Open;
                        true
                    } else {
                        false
                    }
                });
                if !opened {
                    // close requested while opening
                    return Err(Error::ChannelOpenError(format!(
                        "{} is closed while opening",
                        self
                    )));
                }
                #[cfg(feature = "traces")]
                debug!("{} is open", self);
                self.emit(ChannelEvent::Opened);
                Ok(())
            }
            Err(err) => {
                #[cfg(feature = "traces")]
                warn!("failed to open {}, cause: {}", self, err);
                self.finish_close(Some(err.clone()));
                Err(err)
            }
        }
    }

    /// Close the channel on the server.
    ///
    /// Closing a closed channel is a no-op.
    ///
    /// # Errors
    ///
    /// Returns error if the server or the network fails the request.
    pub async fn close(&self) -> Result<()> {
        {
            let _state = self.shared.state.lock();
            match self.status() {
                ChannelStatus::Closed(_) => return Ok(()),
                ChannelStatus::Closing => {
                    return Err(Error::ChannelCloseError(format!("{} is closing", self)))
                }
                _ => {
                    self.shared.status_tx.send_replace(ChannelStatus::Closing);
                }
            }
        }

        match self
            .request(CloseChannel::default(), ReplyKind::CloseChannel)
            .await
        {
            Ok(_) => {
                self.finish_close(None);
                Ok(())
            }
            Err(err) => {
                // no-op if a server close already did it
                self.finish_close(Some(err.clone()));
                Err(err)
            }
        }
    }

    /// Ask the server to pause (`false`) or restart (`true`) content delivery.
    ///
    /// Returns the flow state confirmed by the server.
    pub async fn flow(&self, active: bool) -> Result<bool> {
        let flow_ok = get_expected_method!(
            self.request(Flow { active }, ReplyKind::Flow).await?,
            Incoming::FlowOk
        )?;
        Ok(flow_ok.active)
    }

    /// Move to `Closed`, wake every waiter with the close error and notify
    /// subscribers. Returns `false` if the channel was closed already.
    fn finish_close(&self, reason: Option<Error>) -> bool {
        let err = reason
            .clone()
            .unwrap_or(Error::ChannelClosed(self.channel_id()));
        let (replies, confirms) = {
            let mut state = self.shared.state.lock();
            // keep the first reason
            let transitioned = self.shared.status_tx.send_if_modified(|status| {
                if status.is_closed() {
                    false
                } else {
                    *status = ChannelStatus::Closed(reason.clone());
                    true
                }
            });
            if !transitioned {
                return false;
            }
            state.consumers.clear();
            (state.responders.fail_all(&err), state.confirms.fail_all(&err))
        };
        #[cfg(feature = "traces")]
        info!(
            "{} is closed, {} pending replies and {} pending confirms are failed",
            self, replies, confirms
        );
        #[cfg(not(feature = "traces"))]
        let _ = (replies, confirms);
        self.emit(ChannelEvent::Closed(reason));
        true
    }

    /// Close the channel locally because the connection is gone.
    pub(crate) fn shutdown(&self, err: Error) {
        self.finish_close(Some(err));
    }

    /////////////////////////////////////////////////////////////////////////
    /// Handle a method received from the server for this channel.
    pub(crate) fn handle_incoming(&self, incoming: Incoming) {
        match incoming {
            Incoming::CloseChannel(close) => self.handle_server_close(close),
            Incoming::Return(ret) => {
                let route_error = crate::api::error::RouteError::from(&ret);
                #[cfg(feature = "traces")]
                warn!("{} on {}", route_error, self);
                let failed = self
                    .shared
                    .state
                    .lock()
                    .confirms
                    .fail_all(&Error::RouteError(route_error.clone()));
                #[cfg(feature = "traces")]
                debug!("return failed {} pending confirms on {}", failed, self);
                #[cfg(not(feature = "traces"))]
                let _ = failed;
                self.emit(ChannelEvent::Returned(route_error.clone()));
                self.emit(ChannelEvent::Errored(Error::RouteError(route_error)));
            }
            Incoming::Ack(ack) => {
                self.shared
                    .state
                    .lock()
                    .confirms
                    .ack(ack.delivery_tag, ack.multiple);
            }
            Incoming::Nack(nack) => {
                self.shared
                    .state
                    .lock()
                    .confirms
                    .nack(nack.delivery_tag, nack.multiple);
            }
            Incoming::Deliver(deliver) => {
                let state = self.shared.state.lock();
                match state.consumers.get(&deliver.consumer_tag) {
                    Some(consumer_tx) => {
                        if consumer_tx.send(deliver).is_err() {
                            #[cfg(feature = "traces")]
                            debug!("consumer on {} is gone, message dropped", self);
                        }
                    }
                    None => {
                        #[cfg(feature = "traces")]
                        error!(
                            "no consumer {} on {}, message dropped",
                            deliver.consumer_tag, self
                        );
                    }
                }
            }
            Incoming::Cancel(cancel) => {
                self.deregister_consumer(&cancel.consumer_tag);
                #[cfg(feature = "traces")]
                info!("consumer {} cancelled by server on {}", cancel.consumer_tag, self);
                if !cancel.no_wait {
                    self.reply_in_background(CancelOk {
                        consumer_tag: cancel.consumer_tag,
                    });
                }
            }
            Incoming::Flow(flow) => {
                self.emit(ChannelEvent::Flow(flow.active));
                self.reply_in_background(FlowOk {
                    active: flow.active,
                });
            }
            reply => match reply.reply_kind() {
                Some(kind) => {
                    if let Some(_unclaimed) = self.shared.state.lock().responders.resolve(kind, reply)
                    {
                        #[cfg(feature = "traces")]
                        debug!("nobody waits for {:?} on {}, dropped", _unclaimed.header(), self);
                    }
                }
                None => {
                    #[cfg(feature = "traces")]
                    error!("unhandled {:?} on {}", reply.header(), self);
                }
            },
        }
    }

    fn handle_server_close(&self, close: CloseChannel) {
        let is_error = close.reply_code != REPLY_SUCCESS;
        let err = Error::BrokerError(close.into());
        #[cfg(feature = "traces")]
        warn!("{} {}", self, err);
        self.finish_close(Some(err.clone()));
        if is_error {
            self.emit(ChannelEvent::Errored(err));
        }
        // complete the close handshake
        self.reply_in_background(CloseChannelOk);
    }

    fn reply_in_background<M: Into<Method> + Send + 'static>(&self, method: M) {
        let channel = self.clone();
        tokio::spawn(async move {
            if let Err(err) = channel.send(method).await {
                #[cfg(feature = "traces")]
                error!("failed to reply on {}, cause: {}", channel, err);
                channel.emit(ChannelEvent::Errored(err));
            }
        });
    }
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "channel {}", self.channel_id())
    }
}

impl fmt::Debug for Channel {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("Channel")
            .field("channel_id", &self.channel_id())
            .field("status", &self.status())
            .finish()
    }
}
