use serde::{Deserialize, Serialize};

use crate::frame::{AmqpMessageCount, FieldTable};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueueDeclare {
    pub queue: String,
    pub passive: bool,
    pub durable: bool,
    pub exclusive: bool,
    pub auto_delete: bool,
    pub no_wait: bool,
    pub arguments: FieldTable,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueueDeclareOk {
    pub queue: String,
    pub message_count: AmqpMessageCount,
    pub consumer_count: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueueBind {
    pub queue: String,
    pub exchange: String,
    pub routing_key: String,
    pub no_wait: bool,
    pub arguments: FieldTable,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct QueueBindOk;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueuePurge {
    pub queue: String,
    pub no_wait: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueuePurgeOk {
    pub message_count: AmqpMessageCount,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueueDelete {
    pub queue: String,
    pub if_unused: bool,
    pub if_empty: bool,
    pub no_wait: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueueDeleteOk {
    pub message_count: AmqpMessageCount,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueueUnbind {
    pub queue: String,
    pub exchange: String,
    pub routing_key: String,
    pub arguments: FieldTable,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct QueueUnbindOk;
