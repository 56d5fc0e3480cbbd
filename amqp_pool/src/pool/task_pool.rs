//! Bounded concurrency scheduler running tasks on pooled channels.
//!
//! All scheduling state is owned by one actor task, fed through an unbounded
//! command channel. Dispatch is triggered by a submission, a resume, a pool
//! attach, a channel released to the pool, a completion or the retry timer.
//!
//! A task that could not get a channel, or that completed with an error and
//! asked to be requeued, is redelivered: redelivered tasks are dispatched
//! before any queued task, in no particular order among themselves.
use std::{
    collections::HashMap,
    fmt,
    future::Future,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
    time::Duration,
};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::{
    sync::{broadcast, mpsc, oneshot},
    time,
};
#[cfg(feature = "traces")]
use tracing::{debug, error, info, trace, warn};

use crate::api::{error::Error, Result};

use super::{
    channel_pool::{ChannelPool, Lease, PooledChannel},
    task_queue::{TaskQueue, DEFAULT_QUEUE_CAPACITY},
};

pub const DEFAULT_TASK_CAPACITY: usize = 32364;
pub const DEFAULT_RETRY_INTERVAL: Duration = Duration::from_secs(1);

const TASK_EVENT_BUFFER_SIZE: usize = 256;

/// Identifier given to a task when submitted, kept across redeliveries.
pub type TaskId = u64;

/// Configuration of a [`TaskPool`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TaskPoolArguments {
    capacity: usize,
    queue_capacity: usize,
    retry_interval: Duration,
}

impl Default for TaskPoolArguments {
    fn default() -> Self {
        Self {
            capacity: DEFAULT_TASK_CAPACITY,
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            retry_interval: DEFAULT_RETRY_INTERVAL,
        }
    }
}

impl TaskPoolArguments {
    pub fn new() -> Self {
        Self::default()
    }

    /// Maximum number of tasks running at once, capped by the channel pool capacity.
    pub fn capacity(&mut self, capacity: usize) -> &mut Self {
        self.capacity = capacity;
        self
    }

    /// Queue length above which submissions are logged as a warning.
    pub fn queue_capacity(&mut self, queue_capacity: usize) -> &mut Self {
        self.queue_capacity = queue_capacity;
        self
    }

    /// Delay before retrying tasks that could not get a channel.
    pub fn retry_interval(&mut self, retry_interval: Duration) -> &mut Self {
        self.retry_interval = retry_interval;
        self
    }

    pub fn finish(&mut self) -> Self {
        self.clone()
    }

    pub fn get_capacity(&self) -> usize {
        self.capacity
    }

    pub fn get_queue_capacity(&self) -> usize {
        self.queue_capacity
    }

    pub fn get_retry_interval(&self) -> Duration {
        self.retry_interval
    }
}

/// Snapshot of a task pool, see [`TaskPool::stats`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct TaskPoolStats {
    pub capacity: usize,
    pub paused: bool,
    pub queued: usize,
    pub redelivered: usize,
    /// Tasks acquiring a channel or running.
    pub in_flight: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskPoolEvent {
    /// The task got a channel and is running.
    Dispatched(TaskId),
    Completed {
        task_id: TaskId,
        error: Option<String>,
        redelivered: bool,
    },
    /// Nothing queued, redelivered or in flight.
    Empty,
}

/////////////////////////////////////////////////////////////////////////////
/// Unit of work run on a leased channel.
///
/// The task must settle `completion` when it is done with the channel, see
/// [`Completion`]. A redelivered task is run again with a new channel.
///
/// Any `Fn(PooledChannel, Completion) -> impl Future<Output = ()>` closure is
/// a task.
#[async_trait]
pub trait Task: Send + Sync + 'static {
    async fn run(&self, channel: PooledChannel, completion: Completion);
}

#[async_trait]
impl<F, Fut> Task for F
where
    F: Fn(PooledChannel, Completion) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    async fn run(&self, channel: PooledChannel, completion: Completion) {
        (self)(channel, completion).await
    }
}

/// Completion handle of a dispatched task.
///
/// Consumed by [`complete`](Completion::complete) or
/// [`done`](Completion::done). Either way the task leaves the in-flight set
/// and its channel goes back to the pool. Dropping it without completing
/// counts as a success.
#[must_use = "a task must complete to release its channel"]
pub struct Completion {
    task_id: TaskId,
    commands: mpsc::UnboundedSender<Command>,
    lease: Option<Arc<Lease>>,
    completed: bool,
}

impl Completion {
    pub fn task_id(&self) -> TaskId {
        self.task_id
    }

    /// Settle the task. It is redelivered if `result` is an error and `requeue` is set.
    pub fn complete<E: fmt::Display>(mut self, result: std::result::Result<(), E>, requeue: bool) {
        self.send(result.err().map(|err| err.to_string()), requeue);
    }

    /// Settle the task with success.
    pub fn done(mut self) {
        self.send(None, false);
    }

    fn send(&mut self, error: Option<String>, requeue: bool) {
        self.completed = true;
        let completed = Command::Completed {
            task_id: self.task_id,
            error,
            requeue,
            lease: self.lease.take(),
        };
        if let Err(mpsc::error::SendError(Command::Completed {
            lease: Some(lease), ..
        })) = self.commands.send(completed)
        {
            // scheduler is gone, still give the channel back
            lease.release();
        }
    }
}

impl Drop for Completion {
    fn drop(&mut self) {
        if !self.completed {
            #[cfg(feature = "traces")]
            warn!("task {} dropped its completion, complete it now", self.task_id);
            self.send(None, false);
        }
    }
}

impl fmt::Debug for Completion {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("Completion")
            .field("task_id", &self.task_id)
            .finish()
    }
}

/////////////////////////////////////////////////////////////////////////////
enum Command {
    Submit(TaskId, Arc<dyn Task>),
    AcquireFailed { task_id: TaskId, error: Error },
    Completed {
        task_id: TaskId,
        error: Option<String>,
        requeue: bool,
        lease: Option<Arc<Lease>>,
    },
    Freed,
    Pause,
    Resume,
    Attach(ChannelPool),
    Retry,
    GetPool(oneshot::Sender<Option<ChannelPool>>),
    Stats(oneshot::Sender<TaskPoolStats>),
    WaitEmpty(oneshot::Sender<()>),
}

/// Handle of the scheduler, cheap to clone.
///
/// # Example
/// ```rust,no_run
/// # use amqp_pool::pool::{ChannelPool, Completion, PooledChannel, TaskPool, TaskPoolArguments};
/// # async fn run(channel_pool: ChannelPool) {
/// let task_pool = TaskPool::new(TaskPoolArguments::default());
/// task_pool.attach(channel_pool);
///
/// task_pool
///     .submit(|channel: PooledChannel, completion: Completion| async move {
///         let res = channel.tx_select().await;
///         // retry later on error
///         completion.complete(res, true);
///     })
///     .unwrap();
/// task_pool.wait_empty().await.unwrap();
/// # }
/// ```
#[derive(Clone)]
pub struct TaskPool {
    commands: mpsc::UnboundedSender<Command>,
    events_tx: broadcast::Sender<TaskPoolEvent>,
    last_task_id: Arc<AtomicU64>,
}

impl TaskPool {
    /// Start the scheduler, paused until a channel pool is attached.
    ///
    /// Must be called within a tokio runtime.
    pub fn new(args: TaskPoolArguments) -> Self {
        let (commands, commands_rx) = mpsc::unbounded_channel();
        let (events_tx, _) = broadcast::channel(TASK_EVENT_BUFFER_SIZE);
        let scheduler = Scheduler {
            configured_capacity: args.capacity.max(1),
            capacity: args.capacity.max(1),
            retry_interval: args.retry_interval,
            paused: true,
            pool: None,
            queue: TaskQueue::new(args.queue_capacity),
            redelivered: HashMap::new(),
            in_flight: HashMap::new(),
            retry_armed: false,
            idle: true,
            empty_waiters: vec![],
            events_tx: events_tx.clone(),
            commands: commands.downgrade(),
        };
        tokio::spawn(scheduler.run(commands_rx));
        Self {
            commands,
            events_tx,
            last_task_id: Arc::new(AtomicU64::new(0)),
        }
    }

    fn command(&self, command: Command) -> Result<()> {
        self.commands
            .send(command)
            .map_err(|_| Error::InternalChannelError("task pool is stopped".to_string()))
    }

    /// Use `pool` to acquire channels, capping the capacity to the pool's,
    /// and resume dispatching.
    pub fn attach(&self, pool: ChannelPool) {
        // only fails if the runtime is shutting down
        let _ = self.command(Command::Attach(pool));
    }

    /// Queue a task, returns the id it is reported with.
    pub fn submit<T: Task>(&self, task: T) -> Result<TaskId> {
        let task_id = self.last_task_id.fetch_add(1, Ordering::Relaxed) + 1;
        self.command(Command::Submit(task_id, Arc::new(task)))?;
        Ok(task_id)
    }

    /// Stop dispatching, tasks in flight are not affected.
    pub fn pause(&self) {
        let _ = self.command(Command::Pause);
    }

    pub fn resume(&self) {
        let _ = self.command(Command::Resume);
    }

    /// Lease a channel from the attached pool, bypassing the scheduler.
    ///
    /// # Errors
    ///
    /// Returns error if no pool is attached, or the pool has no channel.
    pub async fn get_channel_direct(&self) -> Result<PooledChannel> {
        let (tx, rx) = oneshot::channel();
        self.command(Command::GetPool(tx))?;
        match rx.await? {
            Some(pool) => pool.get_channel().await,
            None => Err(Error::ConnectionUseError(
                "no channel pool is attached".to_string(),
            )),
        }
    }

    pub async fn stats(&self) -> Result<TaskPoolStats> {
        let (tx, rx) = oneshot::channel();
        self.command(Command::Stats(tx))?;
        Ok(rx.await?)
    }

    /// Resolve once nothing is queued, redelivered or in flight.
    pub async fn wait_empty(&self) -> Result<()> {
        let (tx, rx) = oneshot::channel();
        self.command(Command::WaitEmpty(tx))?;
        Ok(rx.await?)
    }

    pub fn subscribe(&self) -> broadcast::Receiver<TaskPoolEvent> {
        self.events_tx.subscribe()
    }
}

/////////////////////////////////////////////////////////////////////////////
struct Scheduler {
    configured_capacity: usize,
    capacity: usize,
    retry_interval: Duration,
    paused: bool,
    pool: Option<ChannelPool>,
    queue: TaskQueue<(TaskId, Arc<dyn Task>)>,
    redelivered: HashMap<TaskId, Arc<dyn Task>>,
    in_flight: HashMap<TaskId, Arc<dyn Task>>,
    retry_armed: bool,
    // no work since the last `Empty` event
    idle: bool,
    empty_waiters: Vec<oneshot::Sender<()>>,
    events_tx: broadcast::Sender<TaskPoolEvent>,
    // weak, the scheduler stops once every handle and completion is dropped
    commands: mpsc::WeakUnboundedSender<Command>,
}

impl Scheduler {
    async fn run(mut self, mut commands_rx: mpsc::UnboundedReceiver<Command>) {
        while let Some(command) = commands_rx.recv().await {
            self.handle(command);
        }
        #[cfg(feature = "traces")]
        debug!("task pool stopped");
    }

    fn handle(&mut self, command: Command) {
        match command {
            Command::Submit(task_id, task) => {
                self.queue.add((task_id, task));
                if self.queue.is_over_capacity() {
                    #[cfg(feature = "traces")]
                    warn!(
                        "task queue length {} exceeds capacity {}",
                        self.queue.len(),
                        self.queue.capacity()
                    );
                }
                self.dispatch();
            }
            Command::AcquireFailed { task_id, error } => {
                if let Some(task) = self.in_flight.remove(&task_id) {
                    #[cfg(feature = "traces")]
                    if error.is_resource_exhausted() {
                        trace!("task {} waits for a channel: {}", task_id, error);
                    } else {
                        warn!("task {} failed to get a channel: {}", task_id, error);
                    }
                    #[cfg(not(feature = "traces"))]
                    let _ = error;
                    self.redelivered.insert(task_id, task);
                    self.arm_retry();
                }
            }
            Command::Completed {
                task_id,
                error,
                requeue,
                lease,
            } => {
                let mut redelivered = false;
                if let Some(task) = self.in_flight.remove(&task_id) {
                    if error.is_some() && requeue {
                        self.redelivered.insert(task_id, task);
                        redelivered = true;
                    }
                }
                #[cfg(feature = "traces")]
                match &error {
                    Some(err) => info!(
                        "task {} failed: {}, redelivered: {}",
                        task_id, err, redelivered
                    ),
                    None => trace!("task {} done", task_id),
                }
                if let Some(lease) = lease {
                    lease.release();
                }
                self.emit(TaskPoolEvent::Completed {
                    task_id,
                    error,
                    redelivered,
                });
                self.dispatch();
            }
            Command::Freed => self.dispatch(),
            Command::Pause => {
                #[cfg(feature = "traces")]
                if !self.paused {
                    info!("task pool paused");
                }
                self.paused = true;
            }
            Command::Resume => {
                self.paused = false;
                self.dispatch();
            }
            Command::Attach(pool) => {
                self.capacity = self.configured_capacity.min(pool.capacity() as usize);
                self.forward_freed(&pool);
                self.pool = Some(pool);
                self.paused = false;
                #[cfg(feature = "traces")]
                debug!("channel pool attached, capacity {}", self.capacity);
                self.dispatch();
            }
            Command::Retry => {
                self.retry_armed = false;
                self.dispatch();
                if !self.redelivered.is_empty() {
                    self.arm_retry();
                }
            }
            Command::GetPool(tx) => {
                let _ = tx.send(self.pool.clone());
            }
            Command::Stats(tx) => {
                let _ = tx.send(TaskPoolStats {
                    capacity: self.capacity,
                    paused: self.paused,
                    queued: self.queue.len(),
                    redelivered: self.redelivered.len(),
                    in_flight: self.in_flight.len(),
                });
            }
            Command::WaitEmpty(tx) => {
                if self.is_empty() {
                    let _ = tx.send(());
                } else {
                    self.empty_waiters.push(tx);
                }
            }
        }
    }

    fn is_empty(&self) -> bool {
        self.in_flight.is_empty() && self.queue.is_empty() && self.redelivered.is_empty()
    }

    fn emit(&self, event: TaskPoolEvent) {
        let _ = self.events_tx.send(event);
    }

    /// Dispatch as many tasks as the capacity allows.
    fn dispatch(&mut self) {
        loop {
            if self.paused || self.in_flight.len() >= self.capacity {
                return;
            }
            let pool = match &self.pool {
                Some(pool) => pool.clone(),
                None => return,
            };
            let next = match self.redelivered.keys().next().copied() {
                Some(task_id) => self.redelivered.remove_entry(&task_id),
                None => self.queue.pop(),
            };
            let (task_id, task) = match next {
                Some(next) => next,
                None => {
                    if self.in_flight.is_empty() {
                        self.notify_empty();
                    }
                    return;
                }
            };
            self.idle = false;
            self.in_flight.insert(task_id, task.clone());
            self.acquire(pool, task_id, task);
        }
    }

    fn notify_empty(&mut self) {
        for waiter in self.empty_waiters.drain(..) {
            let _ = waiter.send(());
        }
        if !self.idle {
            self.idle = true;
            self.emit(TaskPoolEvent::Empty);
        }
    }

    fn acquire(&self, pool: ChannelPool, task_id: TaskId, task: Arc<dyn Task>) {
        let commands = match self.commands.upgrade() {
            Some(commands) => commands,
            None => return,
        };
        let events_tx = self.events_tx.clone();
        tokio::spawn(async move {
            match pool.get_channel().await {
                Ok(channel) => {
                    #[cfg(feature = "traces")]
                    trace!("task {} runs on {}", task_id, channel.channel());
                    let completion = Completion {
                        task_id,
                        commands,
                        lease: Some(channel.lease()),
                        completed: false,
                    };
                    let _ = events_tx.send(TaskPoolEvent::Dispatched(task_id));
                    task.run(channel, completion).await;
                }
                Err(error) => {
                    if commands
                        .send(Command::AcquireFailed { task_id, error })
                        .is_err()
                    {
                        #[cfg(feature = "traces")]
                        error!("task pool stopped, task {} is lost", task_id);
                    }
                }
            }
        });
    }

    fn arm_retry(&mut self) {
        if self.retry_armed {
            return;
        }
        let commands = match self.commands.upgrade() {
            Some(commands) => commands,
            None => return,
        };
        self.retry_armed = true;
        let retry_interval = self.retry_interval;
        tokio::spawn(async move {
            time::sleep(retry_interval).await;
            let _ = commands.send(Command::Retry);
        });
    }

    fn forward_freed(&self, pool: &ChannelPool) {
        let mut freed = pool.subscribe_freed();
        let commands = self.commands.clone();
        tokio::spawn(async move {
            while freed.recv().await.is_some() {
                match commands.upgrade() {
                    Some(commands) if commands.send(Command::Freed).is_ok() => {}
                    _ => break,
                }
            }
        });
    }
}
