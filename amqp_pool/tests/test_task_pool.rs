use std::{
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    },
    time::Duration,
};

use amqp_pool::{
    connection::ConnectionEvent,
    error::Error,
    net::IncomingEvent,
    pool::{
        ChannelPool, ChannelPoolArguments, Completion, PooledChannel, TaskPool,
        TaskPoolArguments, TaskPoolEvent,
    },
};
use common::ScriptedBroker;
use tokio::sync::mpsc;
mod common;

fn channel_pool(capacity: u16) -> ChannelPool {
    let (connection, _broker) = ScriptedBroker::connect();
    ChannelPool::new(
        connection,
        ChannelPoolArguments::new().capacity(capacity).finish(),
    )
}

#[tokio::test]
async fn test_tasks_run_in_submission_order() {
    common::setup_logging();
    let task_pool = TaskPool::new(TaskPoolArguments::default());
    task_pool.attach(channel_pool(1));
    let (tx, mut rx) = mpsc::unbounded_channel();

    for n in 0..5 {
        let tx = tx.clone();
        task_pool
            .submit(move |channel: PooledChannel, completion: Completion| {
                let tx = tx.clone();
                async move {
                    // never two tasks at once with a single channel
                    assert_eq!(1, channel.channel_id());
                    tx.send(n).unwrap();
                    completion.done();
                }
            })
            .unwrap();
    }
    task_pool.wait_empty().await.unwrap();
    drop(tx);

    let mut order = vec![];
    while let Some(n) = rx.recv().await {
        order.push(n);
    }
    assert_eq!(vec![0, 1, 2, 3, 4], order);
}

#[tokio::test]
async fn test_requeued_task_runs_before_queued_ones() {
    let task_pool = TaskPool::new(TaskPoolArguments::default());
    task_pool.pause();
    let (tx, mut rx) = mpsc::unbounded_channel();

    let attempts = Arc::new(AtomicUsize::new(0));
    let flaky_tx = tx.clone();
    task_pool
        .submit(move |_channel: PooledChannel, completion: Completion| {
            let tx = flaky_tx.clone();
            let attempt = attempts.fetch_add(1, Ordering::SeqCst);
            async move {
                tx.send(format!("flaky {}", attempt)).unwrap();
                if attempt == 0 {
                    completion.complete(Err("queue not found"), true);
                } else {
                    completion.done();
                }
            }
        })
        .unwrap();
    let steady_tx = tx.clone();
    task_pool
        .submit(move |_channel: PooledChannel, completion: Completion| {
            let tx = steady_tx.clone();
            async move {
                tx.send("steady".to_string()).unwrap();
                completion.done();
            }
        })
        .unwrap();

    task_pool.attach(channel_pool(1));
    task_pool.wait_empty().await.unwrap();
    drop(tx);

    let mut order = vec![];
    while let Some(run) = rx.recv().await {
        order.push(run);
    }
    assert_eq!(vec!["flaky 0", "flaky 1", "steady"], order);
}

#[tokio::test]
async fn test_failed_task_without_requeue_is_dropped() {
    let task_pool = TaskPool::new(TaskPoolArguments::default());
    task_pool.attach(channel_pool(2));
    let mut events = task_pool.subscribe();
    let runs = Arc::new(AtomicUsize::new(0));

    let counter = runs.clone();
    let task_id = task_pool
        .submit(move |_channel: PooledChannel, completion: Completion| {
            counter.fetch_add(1, Ordering::SeqCst);
            async move {
                completion.complete(Err(Error::ChannelUseError("bad input".to_string())), false);
            }
        })
        .unwrap();
    task_pool.wait_empty().await.unwrap();
    assert_eq!(1, runs.load(Ordering::SeqCst));

    loop {
        if let TaskPoolEvent::Completed {
            task_id: completed,
            error,
            redelivered,
        } = events.recv().await.unwrap()
        {
            assert_eq!(task_id, completed);
            assert!(error.unwrap().contains("bad input"));
            assert!(!redelivered);
            break;
        }
    }
}

#[tokio::test(start_paused = true)]
async fn test_task_waits_for_a_channel() {
    let args = TaskPoolArguments::new()
        .retry_interval(Duration::from_secs(1))
        .finish();
    let task_pool = TaskPool::new(args);
    task_pool.attach(channel_pool(1));

    // occupy the only channel outside of the scheduler
    let direct = task_pool.get_channel_direct().await.unwrap();
    let (tx, mut rx) = mpsc::unbounded_channel();
    task_pool
        .submit(move |channel: PooledChannel, completion: Completion| {
            let tx = tx.clone();
            async move {
                tx.send(channel.channel_id()).unwrap();
                completion.done();
            }
        })
        .unwrap();

    tokio::time::sleep(Duration::from_millis(100)).await;
    let stats = task_pool.stats().await.unwrap();
    assert_eq!(1, stats.redelivered);
    assert_eq!(0, stats.in_flight);
    assert!(rx.try_recv().is_err());

    // released channel is picked up without waiting for the retry timer
    direct.done();
    assert_eq!(Some(1), rx.recv().await);
    task_pool.wait_empty().await.unwrap();
}

#[tokio::test]
async fn test_concurrency_is_bounded() {
    let task_pool = TaskPool::new(TaskPoolArguments::new().capacity(2).finish());
    task_pool.attach(channel_pool(10));
    let running = Arc::new(AtomicUsize::new(0));
    let peak = Arc::new(AtomicUsize::new(0));

    for _ in 0..8 {
        let running = running.clone();
        let peak = peak.clone();
        task_pool
            .submit(move |_channel: PooledChannel, completion: Completion| {
                let running = running.clone();
                let peak = peak.clone();
                async move {
                    let now = running.fetch_add(1, Ordering::SeqCst) + 1;
                    peak.fetch_max(now, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_millis(5)).await;
                    running.fetch_sub(1, Ordering::SeqCst);
                    completion.done();
                }
            })
            .unwrap();
    }
    task_pool.wait_empty().await.unwrap();
    assert_eq!(2, peak.load(Ordering::SeqCst));
    assert_eq!(2, task_pool.stats().await.unwrap().capacity);
}

#[tokio::test(start_paused = true)]
async fn test_failed_open_waits_for_retry_interval() {
    let (connection, broker) = ScriptedBroker::connect();
    let mut connection_events = connection.subscribe();
    let pool = ChannelPool::new(connection, ChannelPoolArguments::new().capacity(1).finish());
    let mut freed = pool.subscribe_freed();
    let task_pool = TaskPool::new(
        TaskPoolArguments::new()
            .retry_interval(Duration::from_secs(1))
            .finish(),
    );
    task_pool.attach(pool.clone());

    // no client supervisor, the task pool keeps dispatching
    broker.push_event(IncomingEvent::TransportClosed);
    while !matches!(
        connection_events.recv().await.unwrap(),
        ConnectionEvent::Disconnected
    ) {}

    let runs = Arc::new(AtomicUsize::new(0));
    let counter = runs.clone();
    task_pool
        .submit(move |_channel: PooledChannel, completion: Completion| {
            counter.fetch_add(1, Ordering::SeqCst);
            async move { completion.done() }
        })
        .unwrap();

    tokio::time::sleep(Duration::from_millis(100)).await;
    let stats = task_pool.stats().await.unwrap();
    assert_eq!(1, stats.redelivered);
    assert_eq!(0, stats.in_flight);
    assert!(freed.try_recv().is_err());

    // a few retries later the task is still parked, one attempt per interval
    tokio::time::sleep(Duration::from_millis(3500)).await;
    assert_eq!(1, task_pool.stats().await.unwrap().redelivered);
    assert!(freed.try_recv().is_err());
    assert_eq!(0, pool.stats().busy);
    assert_eq!(0, runs.load(Ordering::SeqCst));
}
