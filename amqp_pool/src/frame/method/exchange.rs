use serde::{Deserialize, Serialize};

use crate::frame::FieldTable;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExchangeDeclare {
    pub exchange: String,
    pub typ: String,
    pub passive: bool,
    pub durable: bool,
    pub auto_delete: bool,
    pub internal: bool,
    pub no_wait: bool,
    pub arguments: FieldTable,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExchangeDeclareOk;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExchangeDelete {
    pub exchange: String,
    pub if_unused: bool,
    pub no_wait: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExchangeDeleteOk;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExchangeBind {
    pub destination: String,
    pub source: String,
    pub routing_key: String,
    pub no_wait: bool,
    pub arguments: FieldTable,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExchangeBindOk;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExchangeUnbind {
    pub destination: String,
    pub source: String,
    pub routing_key: String,
    pub no_wait: bool,
    pub arguments: FieldTable,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExchangeUnbindOk;
