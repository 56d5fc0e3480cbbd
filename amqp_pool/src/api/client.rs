//! Client wiring a [`Connection`], its [`ChannelPool`] and a [`TaskPool`].
//!
//! The client pauses the task pool when the transport fails, the server
//! blocks the connection or the connection is lost, and resumes it on
//! heartbeat or unblock. It sends a heartbeat every `heartbeat_interval`.
//!
//! # Example
//! ```rust,no_run
//! # use std::sync::Arc;
//! # use amqp_pool::{client::{Client, ClientArguments}, net::{IncomingReceiver, Transport}};
//! # use amqp_pool::pool::{Completion, PooledChannel};
//! # async fn run(transport: Arc<dyn Transport>, incoming: IncomingReceiver) {
//! let client = Client::connect(transport, incoming, ClientArguments::default());
//!
//! client
//!     .get_channel(|channel: PooledChannel, completion: Completion| async move {
//!         let res = channel.tx_select().await;
//!         completion.complete(res, false);
//!     })
//!     .unwrap();
//!
//! // waits for the task above
//! client.disconnect().await.unwrap();
//! # }
//! ```
use std::{
    fmt,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    time::Duration,
};

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::{
    sync::broadcast::{self, error::RecvError},
    task::JoinHandle,
    time,
};
#[cfg(feature = "traces")]
use tracing::{debug, error, info, warn};

use crate::{
    net::{IncomingReceiver, Transport},
    pool::{
        ChannelPool, ChannelPoolArguments, PooledChannel, Task, TaskId, TaskPool,
        TaskPoolArguments,
    },
};

use super::{
    connection::{Connection, ConnectionEvent},
    error::Error,
    Result,
};

pub const DEFAULT_HEARTBEAT_INTERVAL: Duration = Duration::from_secs(1);

/// Configuration of a [`Client`].
///
/// # Example
/// ```
/// use std::time::Duration;
/// use amqp_pool::client::ClientArguments;
///
/// let args: ClientArguments = serde_json::from_str(
///     r#"{"channel_pool": {"capacity": 8}, "heartbeat_interval": {"secs": 5, "nanos": 0}}"#,
/// )
/// .unwrap();
/// assert_eq!(8, args.get_channel_pool().get_capacity());
/// assert_eq!(Duration::from_secs(5), args.get_heartbeat_interval());
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientArguments {
    channel_pool: ChannelPoolArguments,
    task_pool: TaskPoolArguments,
    heartbeat_interval: Duration,
}

impl Default for ClientArguments {
    fn default() -> Self {
        Self {
            channel_pool: ChannelPoolArguments::default(),
            task_pool: TaskPoolArguments::default(),
            heartbeat_interval: DEFAULT_HEARTBEAT_INTERVAL,
        }
    }
}

impl ClientArguments {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn channel_pool(&mut self, channel_pool: ChannelPoolArguments) -> &mut Self {
        self.channel_pool = channel_pool;
        self
    }

    pub fn task_pool(&mut self, task_pool: TaskPoolArguments) -> &mut Self {
        self.task_pool = task_pool;
        self
    }

    /// Interval of heartbeats sent to the server, zero disables them.
    pub fn heartbeat_interval(&mut self, heartbeat_interval: Duration) -> &mut Self {
        self.heartbeat_interval = heartbeat_interval;
        self
    }

    pub fn finish(&mut self) -> Self {
        self.clone()
    }

    pub fn get_channel_pool(&self) -> &ChannelPoolArguments {
        &self.channel_pool
    }

    pub fn get_task_pool(&self) -> &TaskPoolArguments {
        &self.task_pool
    }

    pub fn get_heartbeat_interval(&self) -> Duration {
        self.heartbeat_interval
    }
}

/////////////////////////////////////////////////////////////////////////////
/// AMQP client running tasks on pooled channels, cheap to clone.
#[derive(Clone)]
pub struct Client {
    shared: Arc<SharedClientInner>,
}

struct SharedClientInner {
    connection: Connection,
    channel_pool: ChannelPool,
    task_pool: TaskPool,
    disconnecting: AtomicBool,
    heartbeat_task: Mutex<Option<JoinHandle<()>>>,
}

impl Client {
    /// Open a connection on `transport` and start scheduling tasks.
    ///
    /// Must be called within a tokio runtime.
    pub fn connect(
        transport: Arc<dyn Transport>,
        incoming: IncomingReceiver,
        args: ClientArguments,
    ) -> Self {
        Self::with_connection(Connection::open(transport, incoming), args)
    }

    /// Start scheduling tasks on channels of an open `connection`.
    ///
    /// Must be called within a tokio runtime.
    pub fn with_connection(connection: Connection, args: ClientArguments) -> Self {
        let events = connection.subscribe();
        let channel_pool = ChannelPool::new(connection.clone(), args.channel_pool);
        let task_pool = TaskPool::new(args.task_pool);
        task_pool.attach(channel_pool.clone());

        // exits once the connection is closed
        tokio::spawn(supervise(events, task_pool.clone()));
        let heartbeat_task = (!args.heartbeat_interval.is_zero()).then(|| {
            tokio::spawn(send_heartbeats(
                connection.clone(),
                args.heartbeat_interval,
            ))
        });
        #[cfg(feature = "traces")]
        info!("client started on {}", connection);

        Self {
            shared: Arc::new(SharedClientInner {
                connection,
                channel_pool,
                task_pool,
                disconnecting: AtomicBool::new(false),
                heartbeat_task: Mutex::new(heartbeat_task),
            }),
        }
    }

    pub fn connection(&self) -> &Connection {
        &self.shared.connection
    }

    pub fn channel_pool(&self) -> &ChannelPool {
        &self.shared.channel_pool
    }

    pub fn task_pool(&self) -> &TaskPool {
        &self.shared.task_pool
    }

    /// Subscribe to the events of the connection.
    pub fn subscribe(&self) -> broadcast::Receiver<ConnectionEvent> {
        self.shared.connection.subscribe()
    }

    /// `true` if the connection is open and no disconnect was requested.
    pub fn is_connected(&self) -> bool {
        self.shared.connection.is_open() && !self.shared.disconnecting.load(Ordering::Acquire)
    }

    /// Schedule `task` on the next available channel.
    ///
    /// # Errors
    ///
    /// Returns error if the client is disconnecting or disconnected.
    pub fn get_channel<T: Task>(&self, task: T) -> Result<TaskId> {
        if !self.shared.connection.is_open() {
            return Err(Error::ConnectionUseError("client is disconnected".to_string()));
        }
        if self.shared.disconnecting.load(Ordering::Acquire) {
            return Err(Error::ConnectionUseError(
                "client is in process of disconnect".to_string(),
            ));
        }
        self.shared.task_pool.submit(task)
    }

    /// Lease a channel right away, without going through the scheduler.
    pub async fn get_channel_direct(&self) -> Result<PooledChannel> {
        self.shared.task_pool.get_channel_direct().await
    }

    /// Stop sending heartbeats, wait for every scheduled task to complete,
    /// then close the connection.
    ///
    /// Tasks submitted before the call still run; new ones are rejected.
    pub async fn disconnect(&self) -> Result<()> {
        if self.shared.disconnecting.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        if let Some(heartbeat_task) = self.shared.heartbeat_task.lock().take() {
            heartbeat_task.abort();
        }
        if !self.shared.connection.is_open() {
            return Ok(());
        }
        #[cfg(feature = "traces")]
        debug!("client waits for tasks before disconnect");
        self.shared.task_pool.wait_empty().await?;
        self.shared.connection.close().await
    }
}

impl fmt::Debug for Client {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("Client")
            .field("connection", &self.shared.connection.to_string())
            .field("connected", &self.is_connected())
            .finish()
    }
}

/// Pause or resume the task pool according to the connection events.
async fn supervise(mut events: broadcast::Receiver<ConnectionEvent>, task_pool: TaskPool) {
    loop {
        match events.recv().await {
            Ok(ConnectionEvent::Error(err)) => {
                // channel errors are reported too, only transport errors pause
                if let Error::NetworkError(_) = err {
                    task_pool.pause();
                }
                #[cfg(feature = "traces")]
                warn!("connection error: {}", err);
            }
            Ok(ConnectionEvent::Blocked(_)) => task_pool.pause(),
            Ok(ConnectionEvent::Disconnected) => {
                task_pool.pause();
                break;
            }
            Ok(ConnectionEvent::Heartbeat) | Ok(ConnectionEvent::Unblocked) => task_pool.resume(),
            Ok(ConnectionEvent::Connected) | Err(RecvError::Lagged(_)) => {}
            Err(RecvError::Closed) => break,
        }
    }
    #[cfg(feature = "traces")]
    debug!("client supervisor exits");
}

async fn send_heartbeats(connection: Connection, heartbeat_interval: Duration) {
    let mut ticker = time::interval(heartbeat_interval);
    ticker.tick().await;
    loop {
        ticker.tick().await;
        if let Err(err) = connection.heartbeat().await {
            #[cfg(feature = "traces")]
            error!("failed to send heartbeat on {}, cause: {}", connection, err);
            #[cfg(not(feature = "traces"))]
            let _ = err;
            if !connection.is_open() {
                break;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use crate::{
        api::{
            connection::ConnectionEvent,
            error::{BrokerError, Error},
        },
        net::IncomingEvent,
        pool::{ChannelPoolArguments, Completion, PooledChannel},
        test_utils::{setup_logging, MockTransport},
    };

    use super::{Client, ClientArguments};

    fn connect(args: ClientArguments) -> (Client, std::sync::Arc<MockTransport>) {
        let (connection, transport) = MockTransport::connect();
        transport.reply_ok(true);
        (Client::with_connection(connection, args), transport)
    }

    #[tokio::test]
    async fn test_blocked_pauses_and_heartbeat_resumes() {
        setup_logging();
        let (client, transport) = connect(ClientArguments::default());
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(!client.task_pool().stats().await.unwrap().paused);

        transport.push_event(IncomingEvent::Blocked("disk alarm".to_string()));
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(client.task_pool().stats().await.unwrap().paused);

        transport.push_event(IncomingEvent::Heartbeat);
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(!client.task_pool().stats().await.unwrap().paused);

        transport.push_event(IncomingEvent::Blocked("disk alarm".to_string()));
        transport.push_event(IncomingEvent::Unblocked);
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(!client.task_pool().stats().await.unwrap().paused);
    }

    #[tokio::test]
    async fn test_transport_error_pauses_but_channel_error_does_not() {
        let (client, transport) = connect(ClientArguments::default());
        client
            .connection()
            .emit(ConnectionEvent::Error(Error::BrokerError(
                BrokerError {
                    reply_code: 404,
                    reply_text: "NOT_FOUND".to_string(),
                    class_id: 40,
                    method_id: 10,
                },
            )));
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(!client.task_pool().stats().await.unwrap().paused);

        transport.push_event(IncomingEvent::TransportError("connection reset".to_string()));
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(client.task_pool().stats().await.unwrap().paused);
    }

    #[tokio::test]
    async fn test_disconnect_waits_for_tasks() {
        let args = ClientArguments::new()
            .channel_pool(ChannelPoolArguments::new().capacity(2).finish())
            .finish();
        let (client, transport) = connect(args);
        let (release_tx, release_rx) = tokio::sync::oneshot::channel::<()>();
        let release_rx = parking_lot::Mutex::new(Some(release_rx));

        client
            .get_channel(move |_channel: PooledChannel, completion: Completion| {
                let release_rx = release_rx.lock().take();
                async move {
                    if let Some(release_rx) = release_rx {
                        release_rx.await.ok();
                    }
                    completion.done();
                }
            })
            .unwrap();
        tokio::time::sleep(Duration::from_millis(10)).await;

        let disconnecting = client.clone();
        let pending = tokio::spawn(async move { disconnecting.disconnect().await });
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(!pending.is_finished());
        assert!(!transport.is_closed());
        assert!(matches!(
            client.get_channel(|_: PooledChannel, c: Completion| async move { c.done() }),
            Err(Error::ConnectionUseError(msg)) if msg.contains("disconnect")
        ));

        release_tx.send(()).unwrap();
        pending.await.unwrap().unwrap();
        assert!(transport.is_closed());
        assert!(!client.is_connected());
        assert!(matches!(
            client.get_channel(|_: PooledChannel, c: Completion| async move { c.done() }),
            Err(Error::ConnectionUseError(msg)) if msg == "client is disconnected"
        ));
    }

    #[tokio::test]
    async fn test_get_channel_direct() {
        let (client, _transport) = connect(ClientArguments::default());
        let channel = client.get_channel_direct().await.unwrap();
        assert!(channel.is_open());
        assert_eq!(1, client.channel_pool().stats().busy);
        channel.done();
        assert_eq!(1, client.channel_pool().stats().free);
    }

    #[tokio::test(start_paused = true)]
    async fn test_heartbeats_sent_until_disconnect() {
        let (client, transport) = connect(ClientArguments::default());
        tokio::time::sleep(Duration::from_millis(3500)).await;
        assert_eq!(3, transport.heartbeats_sent());

        client.disconnect().await.unwrap();
        tokio::time::sleep(Duration::from_secs(5)).await;
        assert_eq!(3, transport.heartbeats_sent());
    }
}
