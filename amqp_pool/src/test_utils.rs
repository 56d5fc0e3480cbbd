use std::sync::{
    atomic::{AtomicBool, AtomicUsize, Ordering},
    Arc,
};

use async_trait::async_trait;
use parking_lot::Mutex;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use crate::{
    api::{connection::Connection, Result},
    frame::*,
    net::{incoming_channel, IncomingEvent, IncomingSender, Transport},
};

//////////////////////////////////////////////////////////////////
// construct a subscriber that prints formatted traces to stdout
pub fn setup_logging() {
    // global subscriber with log level according to RUST_LOG
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(EnvFilter::from_default_env())
        .try_init()
        .ok();
}

//////////////////////////////////////////////////////////////////
/// In-memory transport recording every method sent, and optionally
/// answering synchronous requests with their `-ok` method.
pub struct MockTransport {
    incoming_tx: IncomingSender,
    reply_ok: AtomicBool,
    echo_heartbeat: AtomicBool,
    closed: AtomicBool,
    heartbeats: AtomicUsize,
    sent: Mutex<Vec<(AmqpChannelId, Method)>>,
}

impl MockTransport {
    pub fn connect() -> (Connection, Arc<MockTransport>) {
        let (incoming_tx, incoming_rx) = incoming_channel();
        let transport = Arc::new(MockTransport {
            incoming_tx,
            reply_ok: AtomicBool::new(false),
            echo_heartbeat: AtomicBool::new(false),
            closed: AtomicBool::new(false),
            heartbeats: AtomicUsize::new(0),
            sent: Mutex::new(vec![]),
        });
        let connection = Connection::open(transport.clone(), incoming_rx);
        (connection, transport)
    }

    pub fn reply_ok(&self, enabled: bool) {
        self.reply_ok.store(enabled, Ordering::SeqCst);
    }

    /// Answer every heartbeat sent with a heartbeat received.
    pub fn echo_heartbeat(&self, enabled: bool) {
        self.echo_heartbeat.store(enabled, Ordering::SeqCst);
    }

    pub fn push(&self, channel_id: AmqpChannelId, incoming: Incoming) {
        self.push_event(IncomingEvent::Channel(channel_id, incoming));
    }

    pub fn push_event(&self, event: IncomingEvent) {
        self.incoming_tx.send(event).unwrap();
    }

    pub fn sent_methods(&self, channel_id: AmqpChannelId) -> Vec<Method> {
        self.sent
            .lock()
            .iter()
            .filter(|(id, _)| *id == channel_id)
            .map(|(_, method)| method.clone())
            .collect()
    }

    pub fn heartbeats_sent(&self) -> usize {
        self.heartbeats.load(Ordering::SeqCst)
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn send_method(&self, channel_id: AmqpChannelId, method: Method) -> Result<()> {
        if self.is_closed() {
            return Err(crate::api::error::Error::NetworkError(
                "transport is closed".to_string(),
            ));
        }
        self.sent.lock().push((channel_id, method.clone()));
        if self.reply_ok.load(Ordering::SeqCst) {
            if let Some(reply) = ok_reply(&method) {
                self.push(channel_id, reply);
            }
        }
        Ok(())
    }

    async fn heartbeat(&self) -> Result<()> {
        self.heartbeats.fetch_add(1, Ordering::SeqCst);
        if self.echo_heartbeat.load(Ordering::SeqCst) {
            self.push_event(IncomingEvent::Heartbeat);
        }
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        self.closed.store(true, Ordering::SeqCst);
        Ok(())
    }
}

/// The `-ok` method a broker answers `method` with, if it expects one.
pub fn ok_reply(method: &Method) -> Option<Incoming> {
    let reply: Incoming = match method {
        Method::OpenChannel(_) => OpenChannelOk.into(),
        Method::CloseChannel(_) => CloseChannelOk.into(),
        Method::Flow(flow) => FlowOk {
            active: flow.active,
        }
        .into(),
        Method::ExchangeDeclare(m) if !m.no_wait => ExchangeDeclareOk.into(),
        Method::ExchangeDelete(m) if !m.no_wait => ExchangeDeleteOk.into(),
        Method::ExchangeBind(m) if !m.no_wait => ExchangeBindOk.into(),
        Method::ExchangeUnbind(m) if !m.no_wait => ExchangeUnbindOk.into(),
        Method::QueueDeclare(m) if !m.no_wait => QueueDeclareOk {
            queue: m.queue.clone(),
            message_count: 0,
            consumer_count: 0,
        }
        .into(),
        Method::QueueBind(m) if !m.no_wait => QueueBindOk.into(),
        Method::QueuePurge(m) if !m.no_wait => QueuePurgeOk { message_count: 0 }.into(),
        Method::QueueDelete(m) if !m.no_wait => QueueDeleteOk { message_count: 0 }.into(),
        Method::QueueUnbind(_) => QueueUnbindOk.into(),
        Method::Qos(_) => QosOk.into(),
        Method::Consume(m) if !m.no_wait => ConsumeOk {
            consumer_tag: m.consumer_tag.clone(),
        }
        .into(),
        Method::Cancel(m) if !m.no_wait => CancelOk {
            consumer_tag: m.consumer_tag.clone(),
        }
        .into(),
        Method::Get(_) => GetEmpty.into(),
        Method::Recover(_) => RecoverOk.into(),
        Method::ConfirmSelect(m) if !m.no_wait => ConfirmSelectOk.into(),
        Method::TxSelect(_) => TxSelectOk.into(),
        Method::TxCommit(_) => TxCommitOk.into(),
        Method::TxRollback(_) => TxRollbackOk.into(),
        _ => return None,
    };
    Some(reply)
}
