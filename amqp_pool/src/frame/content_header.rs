use serde::{Deserialize, Serialize};

use super::{AmqpTimeStamp, FieldTable, FieldValue};

pub const DELIVERY_MODE_TRANSIENT: u8 = 1;
pub const DELIVERY_MODE_PERSISTENT: u8 = 2;

/// Message metadata carried by the content header of `basic.publish`,
/// `basic.deliver`, `basic.get-ok` and `basic.return`.
///
/// # Example
/// ```
/// use amqp_pool::BasicProperties;
///
/// let props = BasicProperties::default()
///     .with_content_type("application/json")
///     .with_persistence(true)
///     .with_header("retry", 3i64)
///     .finish();
/// assert_eq!(Some(2), props.delivery_mode());
/// ```
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BasicProperties {
    content_type: Option<String>,
    content_encoding: Option<String>,
    headers: Option<FieldTable>,
    delivery_mode: Option<u8>,
    priority: Option<u8>,
    correlation_id: Option<String>,
    reply_to: Option<String>,
    expiration: Option<String>,
    message_id: Option<String>,
    timestamp: Option<AmqpTimeStamp>,
    typ: Option<String>,
    user_id: Option<String>,
    app_id: Option<String>,
    cluster_id: Option<String>,
}

impl BasicProperties {
    pub fn with_content_type(&mut self, content_type: &str) -> &mut Self {
        self.content_type = Some(content_type.to_owned());
        self
    }

    pub fn with_content_encoding(&mut self, content_encoding: &str) -> &mut Self {
        self.content_encoding = Some(content_encoding.to_owned());
        self
    }

    pub fn with_headers(&mut self, headers: FieldTable) -> &mut Self {
        self.headers = Some(headers);
        self
    }

    /// Insert a single header, converting the value to its AMQP type.
    pub fn with_header<V: Into<FieldValue>>(&mut self, key: &str, value: V) -> &mut Self {
        self.headers
            .get_or_insert_with(FieldTable::new)
            .insert(key.to_owned(), value.into());
        self
    }

    pub fn with_delivery_mode(&mut self, delivery_mode: u8) -> &mut Self {
        self.delivery_mode = Some(delivery_mode);
        self
    }

    pub fn with_persistence(&mut self, persistent: bool) -> &mut Self {
        if persistent {
            self.delivery_mode = Some(DELIVERY_MODE_PERSISTENT);
        } else {
            self.delivery_mode = Some(DELIVERY_MODE_TRANSIENT);
        }
        self
    }

    pub fn with_priority(&mut self, priority: u8) -> &mut Self {
        self.priority = Some(priority);
        self
    }

    pub fn with_correlation_id(&mut self, correlation_id: &str) -> &mut Self {
        self.correlation_id = Some(correlation_id.to_owned());
        self
    }

    pub fn with_reply_to(&mut self, reply_to: &str) -> &mut Self {
        self.reply_to = Some(reply_to.to_owned());
        self
    }

    pub fn with_expiration(&mut self, expiration: &str) -> &mut Self {
        self.expiration = Some(expiration.to_owned());
        self
    }

    pub fn with_message_id(&mut self, message_id: &str) -> &mut Self {
        self.message_id = Some(message_id.to_owned());
        self
    }

    pub fn with_timestamp(&mut self, timestamp: AmqpTimeStamp) -> &mut Self {
        self.timestamp = Some(timestamp);
        self
    }

    pub fn with_message_type(&mut self, message_type: &str) -> &mut Self {
        self.typ = Some(message_type.to_owned());
        self
    }

    pub fn with_user_id(&mut self, user_id: &str) -> &mut Self {
        self.user_id = Some(user_id.to_owned());
        self
    }

    pub fn with_app_id(&mut self, app_id: &str) -> &mut Self {
        self.app_id = Some(app_id.to_owned());
        self
    }

    pub fn with_cluster_id(&mut self, cluster_id: &str) -> &mut Self {
        self.cluster_id = Some(cluster_id.to_owned());
        self
    }

    pub fn finish(&mut self) -> Self {
        self.clone()
    }

    pub fn content_type(&self) -> Option<&String> {
        self.content_type.as_ref()
    }

    pub fn content_encoding(&self) -> Option<&String> {
        self.content_encoding.as_ref()
    }

    pub fn headers(&self) -> Option<&FieldTable> {
        self.headers.as_ref()
    }

    pub fn delivery_mode(&self) -> Option<u8> {
        self.delivery_mode
    }

    pub fn priority(&self) -> Option<u8> {
        self.priority
    }

    pub fn correlation_id(&self) -> Option<&String> {
        self.correlation_id.as_ref()
    }

    pub fn reply_to(&self) -> Option<&String> {
        self.reply_to.as_ref()
    }

    pub fn expiration(&self) -> Option<&String> {
        self.expiration.as_ref()
    }

    pub fn message_id(&self) -> Option<&String> {
        self.message_id.as_ref()
    }

    pub fn timestamp(&self) -> Option<AmqpTimeStamp> {
        self.timestamp
    }

    pub fn message_type(&self) -> Option<&String> {
        self.typ.as_ref()
    }

    pub fn user_id(&self) -> Option<&String> {
        self.user_id.as_ref()
    }

    pub fn app_id(&self) -> Option<&String> {
        self.app_id.as_ref()
    }

    pub fn cluster_id(&self) -> Option<&String> {
        self.cluster_id.as_ref()
    }
}
