use tokio::sync::mpsc;
#[cfg(feature = "traces")]
use tracing::debug;

use crate::{
    api::{error::Error, Result},
    frame::{
        Ack, AmqpDeliveryTag, BasicProperties, Cancel, Consume, Deliver, FieldTable, Get, GetOk,
        Incoming, Nack, Publish, Qos, Recover, RecoverAsync, Reject, ReplyKind,
    },
};

use super::{ack_strategy::send_or_closed, AckStrategy, Channel};

/// Prefetch count applied by [`BasicQosArguments::default`].
pub const DEFAULT_PREFETCH_COUNT: u16 = 10;

#[derive(Debug, Clone)]
pub struct BasicQosArguments {
    pub prefetch_size: u32,
    pub prefetch_count: u16,
    pub global: bool,
}

impl BasicQosArguments {
    pub fn new(prefetch_size: u32, prefetch_count: u16, global: bool) -> Self {
        Self {
            prefetch_size,
            prefetch_count,
            global,
        }
    }
}

impl Default for BasicQosArguments {
    fn default() -> Self {
        Self::new(0, DEFAULT_PREFETCH_COUNT, false)
    }
}

#[derive(Debug, Clone)]
pub struct BasicConsumeArguments {
    pub queue: String,
    /// Generated as `amq.ctag-<channel id>-<n>` if empty.
    pub consumer_tag: String,
    pub no_local: bool,
    // In automatic acknowledgement mode,
    // a message is considered to be successfully delivered immediately after it is sent
    pub no_ack: bool,
    pub exclusive: bool,
    pub no_wait: bool,
    pub arguments: FieldTable,
}

impl BasicConsumeArguments {
    pub fn new(queue: &str, consumer_tag: &str) -> Self {
        Self {
            queue: queue.to_string(),
            consumer_tag: consumer_tag.to_string(),
            no_local: false,
            no_ack: false,
            exclusive: false,
            no_wait: false,
            arguments: FieldTable::new(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct BasicCancelArguments {
    pub consumer_tag: String,
    pub no_wait: bool,
}

impl BasicCancelArguments {
    pub fn new(consumer_tag: &str) -> Self {
        Self {
            consumer_tag: consumer_tag.to_string(),
            no_wait: false,
        }
    }
}

#[derive(Debug, Clone)]
pub struct BasicGetArguments {
    pub queue: String,
    pub no_ack: bool,
}

impl BasicGetArguments {
    pub fn new(queue: &str) -> Self {
        Self {
            queue: queue.to_string(),
            no_ack: false,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct BasicAckArguments {
    pub delivery_tag: AmqpDeliveryTag,
    pub multiple: bool,
}

impl BasicAckArguments {
    pub fn new(delivery_tag: AmqpDeliveryTag, multiple: bool) -> Self {
        Self {
            delivery_tag,
            multiple,
        }
    }
}

#[derive(Debug, Clone)]
pub struct BasicNackArguments {
    pub delivery_tag: AmqpDeliveryTag,
    pub multiple: bool,
    pub requeue: bool,
}

impl BasicNackArguments {
    pub fn new(delivery_tag: AmqpDeliveryTag, multiple: bool, requeue: bool) -> Self {
        Self {
            delivery_tag,
            multiple,
            requeue,
        }
    }
}

impl Default for BasicNackArguments {
    fn default() -> Self {
        Self::new(0, false, true)
    }
}

#[derive(Debug, Clone)]
pub struct BasicRejectArguments {
    pub delivery_tag: AmqpDeliveryTag,
    pub requeue: bool,
}

impl BasicRejectArguments {
    pub fn new(delivery_tag: AmqpDeliveryTag, requeue: bool) -> Self {
        Self {
            delivery_tag,
            requeue,
        }
    }
}

/// Arguments of [`Channel::basic_publish`].
///
/// # Example
/// ```
/// use amqp_pool::channel::{AckStrategy, BasicPublishArguments};
///
/// let args = BasicPublishArguments::new("amq.topic", "order.created")
///     .mandatory(true)
///     .ack_strategy(AckStrategy::WaitAck)
///     .finish();
/// assert_eq!(Some(AckStrategy::WaitAck), args.ack_strategy);
/// ```
#[derive(Debug, Clone, Default)]
pub struct BasicPublishArguments {
    pub exchange: String,
    pub routing_key: String,
    pub mandatory: bool,
    pub immediate: bool,
    /// Channel default if `None`, see [`Channel::set_publish_strategy`].
    pub ack_strategy: Option<AckStrategy>,
}

impl BasicPublishArguments {
    pub fn new(exchange: &str, routing_key: &str) -> Self {
        Self {
            exchange: exchange.to_string(),
            routing_key: routing_key.to_string(),
            mandatory: false,
            immediate: false,
            ack_strategy: None,
        }
    }

    pub fn mandatory(&mut self, mandatory: bool) -> &mut Self {
        self.mandatory = mandatory;
        self
    }

    pub fn immediate(&mut self, immediate: bool) -> &mut Self {
        self.immediate = immediate;
        self
    }

    pub fn ack_strategy(&mut self, ack_strategy: AckStrategy) -> &mut Self {
        self.ack_strategy = Some(ack_strategy);
        self
    }

    pub fn finish(&mut self) -> Self {
        self.clone()
    }
}

/////////////////////////////////////////////////////////////////////////////
impl Channel {
    pub async fn basic_qos(&self, args: BasicQosArguments) -> Result<()> {
        let qos = Qos {
            prefetch_size: args.prefetch_size,
            prefetch_count: args.prefetch_count,
            global: args.global,
        };
        synchronous_request!(self, qos, ReplyKind::Qos, Incoming::QosOk)?;
        Ok(())
    }

    /// Start a consumer, return its consumer tag and the receiver of its
    /// deliveries.
    ///
    /// The receiver ends when the consumer is cancelled or the channel closes.
    pub async fn basic_consume(
        &self,
        args: BasicConsumeArguments,
    ) -> Result<(String, mpsc::UnboundedReceiver<Deliver>)> {
        let consumer_tag = if args.consumer_tag.is_empty() {
            self.generate_consumer_tag()
        } else {
            args.consumer_tag
        };
        // deliveries may arrive right after consume-ok
        let deliveries = self.register_consumer(&consumer_tag)?;

        let consume = Consume {
            queue: args.queue,
            consumer_tag: consumer_tag.clone(),
            no_local: args.no_local,
            no_ack: args.no_ack,
            exclusive: args.exclusive,
            no_wait: args.no_wait,
            arguments: args.arguments,
        };
        let res = if args.no_wait {
            self.send(consume).await
        } else {
            synchronous_request!(self, consume, ReplyKind::Consume, Incoming::ConsumeOk)
                .map(|_| ())
        };
        match res {
            Ok(()) => {
                #[cfg(feature = "traces")]
                debug!("consumer {} started on {}", consumer_tag, self);
                Ok((consumer_tag, deliveries))
            }
            Err(err) => {
                self.deregister_consumer(&consumer_tag);
                Err(err)
            }
        }
    }

    /// Cancel a consumer, return the consumer tag.
    pub async fn basic_cancel(&self, args: BasicCancelArguments) -> Result<String> {
        let cancel = Cancel {
            consumer_tag: args.consumer_tag.clone(),
            no_wait: args.no_wait,
        };
        if args.no_wait {
            self.send(cancel).await?;
        } else {
            synchronous_request!(self, cancel, ReplyKind::Cancel, Incoming::CancelOk)?;
        }
        self.deregister_consumer(&args.consumer_tag);
        Ok(args.consumer_tag)
    }

    /// Publish a message, resolving the way its [`AckStrategy`] says.
    ///
    /// A missing message id is filled in as `_<n>`, `n` counting the
    /// messages published on this channel.
    ///
    /// # Errors
    ///
    /// Returns error if the channel is not open, or fails before the
    /// strategy is satisfied.
    pub async fn basic_publish(
        &self,
        properties: BasicProperties,
        content: Vec<u8>,
        args: BasicPublishArguments,
    ) -> Result<()> {
        if !self.is_open() {
            return Err(Error::ChannelUseError(format!(
                "{} is closed, can not publish to it",
                self
            )));
        }
        let strategy = args
            .ack_strategy
            .unwrap_or_else(|| self.publish_strategy());
        let (properties, delivery_tag) = self.prepare_publish(properties);
        let publish = Publish {
            exchange: args.exchange,
            routing_key: args.routing_key,
            mandatory: args.mandatory,
            immediate: args.immediate,
            properties,
            content,
        };
        strategy.publish(self, publish, delivery_tag).await
    }

    /// Fetch one message, `None` if the queue is empty.
    pub async fn basic_get(&self, args: BasicGetArguments) -> Result<Option<GetOk>> {
        let get = Get {
            queue: args.queue,
            no_ack: args.no_ack,
        };
        match self.request(get, ReplyKind::Get).await? {
            Incoming::GetOk(get_ok) => Ok(Some(get_ok)),
            Incoming::GetEmpty(_) => Ok(None),
            unexpected => Err(Error::UnexpectedReply(format!("{:?}", unexpected.header()))),
        }
    }

    pub async fn basic_ack(&self, args: BasicAckArguments) -> Result<()> {
        let ack = Ack {
            delivery_tag: args.delivery_tag,
            multiple: args.multiple,
        };
        send_or_closed(self, ack).await
    }

    pub async fn basic_nack(&self, args: BasicNackArguments) -> Result<()> {
        let nack = Nack {
            delivery_tag: args.delivery_tag,
            multiple: args.multiple,
            requeue: args.requeue,
        };
        send_or_closed(self, nack).await
    }

    pub async fn basic_reject(&self, args: BasicRejectArguments) -> Result<()> {
        let reject = Reject {
            delivery_tag: args.delivery_tag,
            requeue: args.requeue,
        };
        send_or_closed(self, reject).await
    }

    /// Redeliver unacknowledged messages, wait for the server to confirm.
    pub async fn basic_recover(&self, requeue: bool) -> Result<()> {
        synchronous_request!(
            self,
            Recover { requeue },
            ReplyKind::Recover,
            Incoming::RecoverOk
        )?;
        Ok(())
    }

    /// Redeliver unacknowledged messages, without waiting for any reply.
    pub async fn basic_recover_async(&self, requeue: bool) -> Result<()> {
        send_or_closed(self, RecoverAsync { requeue }).await
    }
}
