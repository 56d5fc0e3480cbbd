#![allow(dead_code)]
use std::{collections::HashMap, sync::Arc};

use amqp_pool::{
    connection::Connection,
    error::Error,
    frame::*,
    net::{incoming_channel, IncomingEvent, IncomingReceiver, IncomingSender, Transport},
    Result,
};
use async_trait::async_trait;
use parking_lot::Mutex;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Routing key the broker returns mandatory publishes for.
pub const UNROUTABLE: &str = "nowhere";

// construct a subscriber that prints formatted traces to stdout
pub fn setup_logging() {
    // global subscriber with log level according to RUST_LOG
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(EnvFilter::from_default_env())
        .try_init()
        .ok();
}

/// In-memory broker answering channel requests, confirming publishes in
/// confirm mode and returning mandatory publishes routed to [`UNROUTABLE`].
pub struct ScriptedBroker {
    incoming_tx: IncomingSender,
    state: Mutex<BrokerState>,
}

#[derive(Default)]
struct BrokerState {
    auto_ack: bool,
    closed: bool,
    heartbeats: usize,
    /// Last delivery tag per channel in confirm mode.
    confirms: HashMap<AmqpChannelId, AmqpDeliveryTag>,
    published: Vec<(AmqpChannelId, Publish)>,
}

impl ScriptedBroker {
    pub fn start() -> (Arc<ScriptedBroker>, IncomingReceiver) {
        let (incoming_tx, incoming_rx) = incoming_channel();
        let broker = Arc::new(ScriptedBroker {
            incoming_tx,
            state: Mutex::new(BrokerState {
                auto_ack: true,
                ..Default::default()
            }),
        });
        (broker, incoming_rx)
    }

    pub fn connect() -> (Connection, Arc<ScriptedBroker>) {
        let (broker, incoming_rx) = Self::start();
        (Connection::open(broker.clone(), incoming_rx), broker)
    }

    /// Confirm publishes right away, or leave them to [`push`](Self::push).
    pub fn auto_ack(&self, enabled: bool) {
        self.state.lock().auto_ack = enabled;
    }

    pub fn push(&self, channel_id: AmqpChannelId, incoming: Incoming) {
        self.push_event(IncomingEvent::Channel(channel_id, incoming));
    }

    pub fn push_event(&self, event: IncomingEvent) {
        self.incoming_tx.send(event).unwrap();
    }

    pub fn published(&self) -> Vec<(AmqpChannelId, Publish)> {
        self.state.lock().published.clone()
    }

    pub fn heartbeats(&self) -> usize {
        self.state.lock().heartbeats
    }

    pub fn is_closed(&self) -> bool {
        self.state.lock().closed
    }

    fn replies(&self, channel_id: AmqpChannelId, method: Method) -> Vec<Incoming> {
        let mut state = self.state.lock();
        match method {
            Method::OpenChannel(_) => vec![OpenChannelOk.into()],
            Method::CloseChannel(_) => {
                state.confirms.remove(&channel_id);
                vec![CloseChannelOk.into()]
            }
            Method::ConfirmSelect(select) => {
                state.confirms.entry(channel_id).or_insert(0);
                if select.no_wait {
                    vec![]
                } else {
                    vec![ConfirmSelectOk.into()]
                }
            }
            Method::Publish(publish) => {
                let mut replies = vec![];
                if publish.mandatory && publish.routing_key == UNROUTABLE {
                    replies.push(
                        Return {
                            reply_code: 312,
                            reply_text: "NO_ROUTE".to_string(),
                            exchange: publish.exchange.clone(),
                            routing_key: publish.routing_key.clone(),
                            properties: publish.properties.clone(),
                            content: publish.content.clone(),
                        }
                        .into(),
                    );
                }
                let auto_ack = state.auto_ack;
                if let Some(delivery_tag) = state.confirms.get_mut(&channel_id) {
                    *delivery_tag += 1;
                    if auto_ack {
                        replies.push(
                            Ack {
                                delivery_tag: *delivery_tag,
                                multiple: false,
                            }
                            .into(),
                        );
                    }
                }
                state.published.push((channel_id, publish));
                replies
            }
            Method::Qos(_) => vec![QosOk.into()],
            Method::QueueDeclare(declare) if !declare.no_wait => vec![QueueDeclareOk {
                queue: declare.queue,
                message_count: 0,
                consumer_count: 0,
            }
            .into()],
            Method::QueueBind(bind) if !bind.no_wait => vec![QueueBindOk.into()],
            Method::Consume(consume) if !consume.no_wait => vec![ConsumeOk {
                consumer_tag: consume.consumer_tag,
            }
            .into()],
            Method::Cancel(cancel) if !cancel.no_wait => vec![CancelOk {
                consumer_tag: cancel.consumer_tag,
            }
            .into()],
            Method::TxSelect(_) => vec![TxSelectOk.into()],
            Method::TxCommit(_) => vec![TxCommitOk.into()],
            Method::TxRollback(_) => vec![TxRollbackOk.into()],
            _ => vec![],
        }
    }
}

#[async_trait]
impl Transport for ScriptedBroker {
    async fn send_method(&self, channel_id: AmqpChannelId, method: Method) -> Result<()> {
        if self.is_closed() {
            return Err(Error::NetworkError("broker connection is closed".to_string()));
        }
        for reply in self.replies(channel_id, method) {
            self.push(channel_id, reply);
        }
        Ok(())
    }

    async fn heartbeat(&self) -> Result<()> {
        self.state.lock().heartbeats += 1;
        self.push_event(IncomingEvent::Heartbeat);
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        self.state.lock().closed = true;
        Ok(())
    }
}
