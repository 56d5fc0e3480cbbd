use serde::{Deserialize, Serialize};

use crate::frame::{
    AmqpDeliveryTag, AmqpMessageCount, AmqpReplyCode, BasicProperties, FieldTable,
};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Qos {
    pub prefetch_size: u32,
    pub prefetch_count: u16,
    pub global: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct QosOk;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Consume {
    pub queue: String,
    pub consumer_tag: String,
    pub no_local: bool,
    pub no_ack: bool,
    pub exclusive: bool,
    pub no_wait: bool,
    pub arguments: FieldTable,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConsumeOk {
    pub consumer_tag: String,
}

/// `basic.cancel`, sent by the client, or by the server when a consumer is
/// cancelled for reasons other than the client asking for it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Cancel {
    pub consumer_tag: String,
    pub no_wait: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CancelOk {
    pub consumer_tag: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Publish {
    pub exchange: String,
    pub routing_key: String,
    pub mandatory: bool,
    pub immediate: bool,
    pub properties: BasicProperties,
    pub content: Vec<u8>,
}

/// `basic.return` together with the returned content.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Return {
    pub reply_code: AmqpReplyCode,
    pub reply_text: String,
    pub exchange: String,
    pub routing_key: String,
    pub properties: BasicProperties,
    pub content: Vec<u8>,
}

/// `basic.deliver` together with the delivered content.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Deliver {
    pub consumer_tag: String,
    pub delivery_tag: AmqpDeliveryTag,
    pub redelivered: bool,
    pub exchange: String,
    pub routing_key: String,
    pub properties: BasicProperties,
    pub content: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Get {
    pub queue: String,
    pub no_ack: bool,
}

/// `basic.get-ok` together with the fetched content.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GetOk {
    pub delivery_tag: AmqpDeliveryTag,
    pub redelivered: bool,
    pub exchange: String,
    pub routing_key: String,
    pub message_count: AmqpMessageCount,
    pub properties: BasicProperties,
    pub content: Vec<u8>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GetEmpty;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Ack {
    pub delivery_tag: AmqpDeliveryTag,
    pub multiple: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Nack {
    pub delivery_tag: AmqpDeliveryTag,
    pub multiple: bool,
    pub requeue: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Reject {
    pub delivery_tag: AmqpDeliveryTag,
    pub requeue: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Recover {
    pub requeue: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecoverAsync {
    pub requeue: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RecoverOk;
