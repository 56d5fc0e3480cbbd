use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

pub type AmqpChannelId = u16;
pub type AmqpReplyCode = u16;
pub type AmqpClassId = u16;
pub type AmqpMethodId = u16;
pub type AmqpDeliveryTag = u64;
pub type AmqpMessageCount = u32;
pub type AmqpTimeStamp = u64;

/// `reply-success` code, used by a peer closing a channel without error.
pub const REPLY_SUCCESS: AmqpReplyCode = 200;

/// Class id and method id identifying an AMQP method.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MethodHeader {
    class_id: AmqpClassId,
    method_id: AmqpMethodId,
}

impl MethodHeader {
    pub const fn new(class_id: AmqpClassId, method_id: AmqpMethodId) -> Self {
        Self {
            class_id,
            method_id,
        }
    }

    pub fn class_id(&self) -> AmqpClassId {
        self.class_id
    }

    pub fn method_id(&self) -> AmqpMethodId {
        self.method_id
    }
}

/// Table of typed values, used for message headers and server specific arguments.
pub type FieldTable = BTreeMap<String, FieldValue>;

/// Typed value of a [`FieldTable`] entry.
///
/// Plain Rust values convert with `From`, picking the AMQP type the same way for
/// every caller: integers become signed 64-bit, floats become 64-bit float,
/// strings become long strings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum FieldValue {
    Boolean(bool),
    LongLongInt(i64),
    Double(f64),
    LongString(String),
    Array(Vec<FieldValue>),
    Timestamp(AmqpTimeStamp),
    Table(FieldTable),
    Void,
}

impl From<bool> for FieldValue {
    fn from(v: bool) -> Self {
        FieldValue::Boolean(v)
    }
}

impl From<i64> for FieldValue {
    fn from(v: i64) -> Self {
        FieldValue::LongLongInt(v)
    }
}

impl From<i32> for FieldValue {
    fn from(v: i32) -> Self {
        FieldValue::LongLongInt(v.into())
    }
}

impl From<f64> for FieldValue {
    fn from(v: f64) -> Self {
        if v.is_nan() {
            FieldValue::Void
        } else {
            FieldValue::Double(v)
        }
    }
}

impl From<&str> for FieldValue {
    fn from(v: &str) -> Self {
        FieldValue::LongString(v.to_owned())
    }
}

impl From<String> for FieldValue {
    fn from(v: String) -> Self {
        FieldValue::LongString(v)
    }
}

impl<T: Into<FieldValue>> From<Vec<T>> for FieldValue {
    fn from(v: Vec<T>) -> Self {
        FieldValue::Array(v.into_iter().map(Into::into).collect())
    }
}

impl From<FieldTable> for FieldValue {
    fn from(v: FieldTable) -> Self {
        FieldValue::Table(v)
    }
}

impl<T: Into<FieldValue>> From<Option<T>> for FieldValue {
    fn from(v: Option<T>) -> Self {
        match v {
            Some(v) => v.into(),
            None => FieldValue::Void,
        }
    }
}
