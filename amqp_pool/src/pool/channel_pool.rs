//! Bounded pool of channels multiplexed over one connection.
//!
//! Every channel id of the pool is either unallocated, `busy` (leased to
//! exactly one holder) or `free` (open and idle). A lease is returned with
//! [`PooledChannel::done`], or when the last handle is dropped. Free channels
//! are closed right away or after an idle timeout, see
//! [`ChannelPoolArguments`].
//!
//! # Example
//! ```rust,no_run
//! # use amqp_pool::{connection::Connection, pool::{ChannelPool, ChannelPoolArguments}};
//! # async fn run(connection: Connection) {
//! let args = ChannelPoolArguments::new().capacity(10).finish();
//! let pool = ChannelPool::new(connection, args);
//!
//! let channel = pool.get_channel().await.unwrap();
//! // ... use the channel ...
//! channel.done();
//! # }
//! ```
use std::{
    collections::{BTreeSet, HashMap, HashSet},
    fmt,
    ops::Deref,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc, Weak,
    },
    time::Duration,
};

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::{
    sync::{broadcast::error::RecvError, mpsc},
    task::JoinHandle,
    time,
};
#[cfg(feature = "traces")]
use tracing::{debug, error, info, warn};

use crate::{
    api::{
        channel::{BasicPublishArguments, Channel, ChannelEvent},
        connection::{Connection, ConnectionEvent},
        error::Error,
        Result,
    },
    frame::{AmqpChannelId, BasicProperties, REPLY_SUCCESS},
};

pub const DEFAULT_POOL_CAPACITY: u16 = 100;
pub const DEFAULT_IDLE_TIMEOUT: Duration = Duration::from_secs(30);

/// Configuration of a [`ChannelPool`].
///
/// # Example
/// ```
/// use std::time::Duration;
/// use amqp_pool::pool::ChannelPoolArguments;
///
/// let args: ChannelPoolArguments =
///     serde_json::from_str(r#"{"capacity": 8, "close_on_release": true}"#).unwrap();
/// assert_eq!(8, args.get_capacity());
/// assert_eq!(Duration::from_secs(30), args.get_idle_timeout());
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChannelPoolArguments {
    capacity: u16,
    close_on_release: bool,
    idle_timeout: Duration,
}

impl Default for ChannelPoolArguments {
    fn default() -> Self {
        Self {
            capacity: DEFAULT_POOL_CAPACITY,
            close_on_release: false,
            idle_timeout: DEFAULT_IDLE_TIMEOUT,
        }
    }
}

impl ChannelPoolArguments {
    pub fn new() -> Self {
        Self::default()
    }

    /// Highest channel id the pool allocates, ids start at 1.
    pub fn capacity(&mut self, capacity: u16) -> &mut Self {
        self.capacity = capacity;
        self
    }

    /// Close a channel as soon as it is released, instead of after the idle timeout.
    pub fn close_on_release(&mut self, close_on_release: bool) -> &mut Self {
        self.close_on_release = close_on_release;
        self
    }

    pub fn idle_timeout(&mut self, idle_timeout: Duration) -> &mut Self {
        self.idle_timeout = idle_timeout;
        self
    }

    pub fn finish(&mut self) -> Self {
        self.clone()
    }

    pub fn get_capacity(&self) -> u16 {
        self.capacity
    }

    pub fn get_close_on_release(&self) -> bool {
        self.close_on_release
    }

    pub fn get_idle_timeout(&self) -> Duration {
        self.idle_timeout
    }
}

/// Snapshot of a pool, see [`ChannelPool::stats`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ChannelPoolStats {
    pub capacity: u16,
    pub busy: usize,
    pub free: usize,
}

/////////////////////////////////////////////////////////////////////////////
/// Pool of channels on one connection, cheap to clone.
#[derive(Clone)]
pub struct ChannelPool {
    shared: Arc<SharedPoolInner>,
}

struct SharedPoolInner {
    connection: Connection,
    capacity: u16,
    close_on_release: bool,
    idle_timeout: Duration,
    state: Mutex<PoolState>,
}

struct PoolState {
    last_used: AmqpChannelId,
    busy: HashSet<AmqpChannelId>,
    free: BTreeSet<AmqpChannelId>,
    channels: HashMap<AmqpChannelId, Channel>,
    idle_timers: HashMap<AmqpChannelId, JoinHandle<()>>,
    freed_listeners: Vec<mpsc::UnboundedSender<usize>>,
}

impl PoolState {
    fn is_allocated(&self, channel_id: AmqpChannelId) -> bool {
        self.busy.contains(&channel_id) || self.free.contains(&channel_id)
    }

    fn is_current(&self, channel: &Channel) -> bool {
        self.channels
            .get(&channel.channel_id())
            .map_or(false, |current| current.same_channel(channel))
    }

    /// Wrap-around scan for an unallocated id, starting from the last one used.
    fn next_unallocated(&mut self, capacity: u16) -> Option<AmqpChannelId> {
        let found = (self.last_used..=capacity)
            .chain(1..=self.last_used)
            .find(|id| !self.is_allocated(*id));
        match found {
            Some(channel_id) => {
                self.last_used = channel_id;
                Some(channel_id)
            }
            None => {
                self.last_used = 1;
                None
            }
        }
    }

    fn set_busy(&mut self, channel_id: AmqpChannelId) {
        if let Some(timer) = self.idle_timers.remove(&channel_id) {
            timer.abort();
        }
        self.free.remove(&channel_id);
        self.busy.insert(channel_id);
    }

    /// Drop `channel` from every set, `false` if the id was reused since.
    fn remove(&mut self, channel: &Channel) -> bool {
        if !self.is_current(channel) {
            return false;
        }
        let channel_id = channel.channel_id();
        self.channels.remove(&channel_id);
        self.busy.remove(&channel_id);
        self.free.remove(&channel_id);
        if let Some(timer) = self.idle_timers.remove(&channel_id) {
            timer.abort();
        }
        #[cfg(feature = "traces")]
        debug!("{} removed from pool", channel);
        true
    }

    fn notify_freed(&mut self) {
        let busy = self.busy.len();
        self.freed_listeners
            .retain(|listener| listener.send(busy).is_ok());
    }
}

impl ChannelPool {
    /// Must be called within a tokio runtime.
    pub fn new(connection: Connection, args: ChannelPoolArguments) -> Self {
        let capacity = args.capacity.max(1);
        #[cfg(feature = "traces")]
        if capacity != args.capacity {
            warn!("channel pool capacity must be positive, use {}", capacity);
        }
        Self {
            shared: Arc::new(SharedPoolInner {
                connection,
                capacity,
                close_on_release: args.close_on_release,
                idle_timeout: args.idle_timeout,
                state: Mutex::new(PoolState {
                    last_used: 1,
                    busy: HashSet::new(),
                    free: BTreeSet::new(),
                    channels: HashMap::new(),
                    idle_timers: HashMap::new(),
                    freed_listeners: vec![],
                }),
            }),
        }
    }

    pub fn capacity(&self) -> u16 {
        self.shared.capacity
    }

    pub fn connection(&self) -> &Connection {
        &self.shared.connection
    }

    pub fn stats(&self) -> ChannelPoolStats {
        let state = self.shared.state.lock();
        ChannelPoolStats {
            capacity: self.shared.capacity,
            busy: state.busy.len(),
            free: state.free.len(),
        }
    }

    /// Receive the number of busy channels every time a channel is released
    /// or removed from the pool.
    pub fn subscribe_freed(&self) -> mpsc::UnboundedReceiver<usize> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.shared.state.lock().freed_listeners.push(tx);
        rx
    }

    /// Lease the channel with `channel_id`, opening it if needed.
    ///
    /// # Errors
    ///
    /// Returns error if the id is out of range, already leased or being
    /// closed, or if the channel fails to open.
    pub async fn open_channel_by_id(&self, channel_id: AmqpChannelId) -> Result<PooledChannel> {
        let channel = {
            let mut state = self.shared.state.lock();
            if channel_id == 0 || channel_id > self.shared.capacity {
                return Err(Error::ChannelUseError(format!(
                    "channel id {} is out of pool range 1..={}",
                    channel_id, self.shared.capacity
                )));
            }
            if state.busy.contains(&channel_id) {
                return Err(Error::ChannelBusy(channel_id));
            }
            if state.free.contains(&channel_id) {
                return match state.channels.get(&channel_id).filter(|c| c.is_open()) {
                    Some(channel) => {
                        let channel = channel.clone();
                        state.set_busy(channel_id);
                        Ok(self.lease(channel))
                    }
                    // idle close in progress
                    None => Err(Error::ChannelBusy(channel_id)),
                };
            }
            self.reserve(&mut state, channel_id)
        };
        self.finish_open(channel).await
    }

    /// Lease a newly opened channel with the next unallocated id.
    ///
    /// # Errors
    ///
    /// Returns [`Error::AllChannelsOpened`] if every id is allocated.
    pub async fn open_channel(&self) -> Result<PooledChannel> {
        let channel = {
            let mut state = self.shared.state.lock();
            let channel_id = state
                .next_unallocated(self.shared.capacity)
                .ok_or(Error::AllChannelsOpened)?;
            self.reserve(&mut state, channel_id)
        };
        self.finish_open(channel).await
    }

    /// Lease a free channel, or open a new one.
    ///
    /// # Errors
    ///
    /// Returns [`Error::AllChannelsBusy`] if nothing is free and every id is
    /// allocated.
    pub async fn get_channel(&self) -> Result<PooledChannel> {
        let reused = {
            let mut state = self.shared.state.lock();
            let found = state
                .free
                .iter()
                .copied()
                .find(|id| state.channels.get(id).map_or(false, Channel::is_open));
            found.and_then(|channel_id| {
                state.set_busy(channel_id);
                state.channels.get(&channel_id).cloned()
            })
        };
        if let Some(channel) = reused {
            #[cfg(feature = "traces")]
            debug!("reuse free {}", channel);
            return Ok(self.lease(channel));
        }
        match self.open_channel().await {
            Err(Error::AllChannelsOpened) => Err(Error::AllChannelsBusy),
            res => res,
        }
    }

    fn reserve(&self, state: &mut PoolState, channel_id: AmqpChannelId) -> Channel {
        state.set_busy(channel_id);
        let channel = self.shared.connection.channel(channel_id);
        state.channels.insert(channel_id, channel.clone());
        channel
    }

    async fn finish_open(&self, channel: Channel) -> Result<PooledChannel> {
        if let Err(err) = channel.open().await {
            #[cfg(feature = "traces")]
            warn!("pool failed to open {}, cause: {}", channel, err);
            // the id was never usable, waiters are not told it is freed
            self.remove(&channel);
            return Err(err);
        }
        self.watch(&channel);
        Ok(self.lease(channel))
    }

    fn lease(&self, channel: Channel) -> PooledChannel {
        PooledChannel {
            channel: channel.clone(),
            lease: Arc::new(Lease {
                pool: self.clone(),
                channel,
                released: AtomicBool::new(false),
            }),
        }
    }

    /// Remove the channel from the pool once it is closed, and forward its
    /// errors to the connection.
    fn watch(&self, channel: &Channel) {
        let pool = Arc::downgrade(&self.shared);
        let channel = channel.clone();
        let mut events = channel.subscribe();
        tokio::spawn(async move {
            while !channel.is_closed() {
                match events.recv().await {
                    Ok(ChannelEvent::Errored(err)) => {
                        channel.connection().emit(ConnectionEvent::Error(err))
                    }
                    Ok(ChannelEvent::Closed(reason)) => {
                        // a server close with error is reported after `Closed`
                        if let Some(Error::BrokerError(err)) = reason {
                            if err.reply_code != REPLY_SUCCESS {
                                channel
                                    .connection()
                                    .emit(ConnectionEvent::Error(Error::BrokerError(err)));
                            }
                        }
                        break;
                    }
                    Ok(_) | Err(RecvError::Lagged(_)) => {}
                    Err(RecvError::Closed) => break,
                }
            }
            if let Some(shared) = Weak::upgrade(&pool) {
                ChannelPool { shared }.purge(&channel);
            }
        });
    }

    /// Forget a closed channel and notify the freed listeners.
    fn purge(&self, channel: &Channel) {
        let mut state = self.shared.state.lock();
        if state.remove(channel) {
            state.notify_freed();
        }
    }

    /// Forget a reservation whose channel failed to open.
    fn remove(&self, channel: &Channel) {
        self.shared.state.lock().remove(channel);
    }

    /// Move a leased channel from busy to free.
    fn release(&self, channel: &Channel) {
        let channel_id = channel.channel_id();
        let mut state = self.shared.state.lock();
        // a stale lease never frees a newer channel reusing the id
        if !state.is_current(channel) || !state.busy.remove(&channel_id) {
            return;
        }
        state.free.insert(channel_id);
        if self.shared.close_on_release {
            self.spawn_close(channel.clone());
        } else {
            self.arm_idle_timer(&mut state, channel.clone());
        }
        state.notify_freed();
    }

    fn spawn_close(&self, channel: Channel) {
        if let Ok(handle) = tokio::runtime::Handle::try_current() {
            handle.spawn(async move {
                if let Err(err) = channel.close().await {
                    #[cfg(feature = "traces")]
                    error!("failed to close released {}, cause: {}", channel, err);
                    #[cfg(not(feature = "traces"))]
                    let _ = err;
                }
            });
        }
    }

    fn arm_idle_timer(&self, state: &mut PoolState, channel: Channel) {
        let handle = match tokio::runtime::Handle::try_current() {
            Ok(handle) => handle,
            Err(_) => return,
        };
        let channel_id = channel.channel_id();
        let pool = Arc::downgrade(&self.shared);
        let idle_timeout = self.shared.idle_timeout;
        let timer = handle.spawn(async move {
            time::sleep(idle_timeout).await;
            let expired = match Weak::upgrade(&pool) {
                Some(shared) => {
                    let mut state = shared.state.lock();
                    let expired = state.free.contains(&channel_id) && state.is_current(&channel);
                    if expired {
                        state.idle_timers.remove(&channel_id);
                    }
                    expired
                }
                None => true,
            };
            if expired {
                #[cfg(feature = "traces")]
                info!("close idle {}", channel);
                if let Err(err) = channel.close().await {
                    #[cfg(feature = "traces")]
                    error!("failed to close idle {}, cause: {}", channel, err);
                    #[cfg(not(feature = "traces"))]
                    let _ = err;
                }
            }
        });
        if let Some(previous) = state.idle_timers.insert(channel_id, timer) {
            previous.abort();
        }
    }
}

impl fmt::Debug for ChannelPool {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("ChannelPool")
            .field("stats", &self.stats())
            .finish()
    }
}

/////////////////////////////////////////////////////////////////////////////
/// Right to use a busy channel, returned to the pool exactly once.
pub struct Lease {
    pool: ChannelPool,
    channel: Channel,
    released: AtomicBool,
}

impl Lease {
    /// Return the channel to the pool. Calling it again is a no-op.
    pub fn release(&self) {
        if !self.released.swap(true, Ordering::AcqRel) {
            self.pool.release(&self.channel);
        }
    }

    pub fn is_released(&self) -> bool {
        self.released.load(Ordering::Acquire)
    }
}

impl Drop for Lease {
    fn drop(&mut self) {
        if !self.is_released() {
            #[cfg(feature = "traces")]
            warn!("{} dropped without release, release it now", self.channel);
            self.release();
        }
    }
}

/// A channel leased from a [`ChannelPool`].
///
/// Derefs to [`Channel`] for every AMQP method. Clones share the lease, the
/// channel goes back to the pool on [`done`](PooledChannel::done) or when
/// the last clone is dropped.
#[derive(Clone)]
pub struct PooledChannel {
    channel: Channel,
    lease: Arc<Lease>,
}

impl PooledChannel {
    pub fn channel(&self) -> &Channel {
        &self.channel
    }

    /// Return the channel to the pool.
    pub fn done(&self) {
        self.lease.release();
    }

    pub fn is_released(&self) -> bool {
        self.lease.is_released()
    }

    pub(crate) fn lease(&self) -> Arc<Lease> {
        self.lease.clone()
    }

    /// Same as [`Channel::basic_publish`], and releases the channel when the
    /// publish settles if the strategy is
    /// [`WaitAckButMakeChanFree`](crate::channel::AckStrategy::WaitAckButMakeChanFree).
    pub async fn basic_publish(
        &self,
        properties: BasicProperties,
        content: Vec<u8>,
        mut args: BasicPublishArguments,
    ) -> Result<()> {
        let strategy = args
            .ack_strategy
            .unwrap_or_else(|| self.channel.publish_strategy());
        args.ack_strategy = Some(strategy);
        let res = self.channel.basic_publish(properties, content, args).await;
        if strategy.releases_channel() {
            self.done();
        }
        res
    }
}

impl Deref for PooledChannel {
    type Target = Channel;

    fn deref(&self) -> &Self::Target {
        &self.channel
    }
}

impl fmt::Debug for PooledChannel {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("PooledChannel")
            .field("channel", &self.channel)
            .field("released", &self.is_released())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use crate::{
        api::error::Error,
        frame::{CloseChannel, Incoming},
        test_utils::{setup_logging, MockTransport},
    };

    use super::{ChannelPool, ChannelPoolArguments, ChannelPoolStats};

    #[tokio::test]
    async fn test_capacity_and_release() {
        setup_logging();
        let (connection, transport) = MockTransport::connect();
        transport.reply_ok(true);
        let pool = ChannelPool::new(connection, ChannelPoolArguments::new().capacity(2).finish());

        let first = pool.get_channel().await.unwrap();
        let second = pool.get_channel().await.unwrap();
        assert_eq!(1, first.channel_id());
        assert_eq!(2, second.channel_id());
        assert!(matches!(pool.get_channel().await, Err(Error::AllChannelsBusy)));
        assert!(matches!(pool.open_channel().await, Err(Error::AllChannelsOpened)));

        first.done();
        // idempotent
        first.done();
        assert_eq!(
            ChannelPoolStats {
                capacity: 2,
                busy: 1,
                free: 1
            },
            pool.stats()
        );
        let third = pool.get_channel().await.unwrap();
        assert_eq!(1, third.channel_id());
        assert!(third.same_channel(&first));
    }

    #[tokio::test]
    async fn test_open_by_id() {
        let (connection, transport) = MockTransport::connect();
        transport.reply_ok(true);
        let pool = ChannelPool::new(connection, ChannelPoolArguments::new().capacity(5).finish());

        let channel = pool.open_channel_by_id(3).await.unwrap();
        assert!(matches!(pool.open_channel_by_id(3).await, Err(Error::ChannelBusy(3))));
        assert!(matches!(
            pool.open_channel_by_id(6).await,
            Err(Error::ChannelUseError(_))
        ));
        drop(channel);
        // released on drop, the free channel is leased again
        let again = pool.open_channel_by_id(3).await.unwrap();
        assert!(again.is_open());
        assert_eq!(1, transport.sent_methods(3).len());
    }

    #[tokio::test]
    async fn test_open_failure_purges_reservation() {
        let (connection, transport) = MockTransport::connect();
        let pool = ChannelPool::new(connection, ChannelPoolArguments::new().capacity(1).finish());
        let mut freed = pool.subscribe_freed();

        let opener = pool.clone();
        let pending = tokio::spawn(async move { opener.get_channel().await });
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(1, pool.stats().busy);
        transport.push(
            1,
            Incoming::CloseChannel(CloseChannel {
                reply_code: 504,
                reply_text: "CHANNEL_ERROR".to_string(),
                class_id: 20,
                method_id: 10,
            }),
        );
        assert!(matches!(pending.await.unwrap(), Err(Error::BrokerError(_))));
        assert_eq!(0, pool.stats().busy);
        // a channel that never opened is not announced as freed
        assert!(freed.try_recv().is_err());

        transport.reply_ok(true);
        assert!(pool.get_channel().await.is_ok());
    }

    #[tokio::test]
    async fn test_closed_channel_is_purged() {
        let (connection, transport) = MockTransport::connect();
        transport.reply_ok(true);
        let pool = ChannelPool::new(connection, ChannelPoolArguments::new().capacity(1).finish());
        let mut freed = pool.subscribe_freed();

        let channel = pool.get_channel().await.unwrap();
        transport.push(1, Incoming::CloseChannel(CloseChannel::default()));
        assert_eq!(Some(0), freed.recv().await);
        assert_eq!(0, pool.stats().busy);

        // stale lease does not touch the pool
        let fresh = pool.get_channel().await.unwrap();
        channel.done();
        assert_eq!(1, pool.stats().busy);
        assert!(!fresh.is_released());
    }

    #[tokio::test]
    async fn test_close_on_release() {
        let (connection, transport) = MockTransport::connect();
        transport.reply_ok(true);
        let args = ChannelPoolArguments::new()
            .capacity(1)
            .close_on_release(true)
            .finish();
        let pool = ChannelPool::new(connection, args);
        let channel = pool.get_channel().await.unwrap();
        let inner = channel.channel().clone();
        channel.done();
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(inner.is_closed());
        assert_eq!(0, pool.stats().free);
    }

    #[tokio::test(start_paused = true)]
    async fn test_idle_timeout() {
        let (connection, transport) = MockTransport::connect();
        transport.reply_ok(true);
        let args = ChannelPoolArguments::new()
            .capacity(1)
            .idle_timeout(Duration::from_secs(5))
            .finish();
        let pool = ChannelPool::new(connection, args);

        let channel = pool.get_channel().await.unwrap();
        let inner = channel.channel().clone();
        channel.done();

        // leased again before expiry, the timer is cancelled
        tokio::time::sleep(Duration::from_secs(3)).await;
        let channel = pool.get_channel().await.unwrap();
        tokio::time::sleep(Duration::from_secs(10)).await;
        assert!(inner.is_open());

        channel.done();
        tokio::time::sleep(Duration::from_secs(6)).await;
        assert!(inner.is_closed());
        assert_eq!(0, pool.stats().free);
    }

    #[test]
    fn test_arguments_from_json() {
        let args: ChannelPoolArguments = serde_json::from_str(r#"{"capacity": 3}"#).unwrap();
        assert_eq!(3, args.get_capacity());
        assert!(!args.get_close_on_release());
        assert_eq!(ChannelPoolArguments::default().get_idle_timeout(), args.get_idle_timeout());
    }
}
