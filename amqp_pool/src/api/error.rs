//! Error type can be returned by the APIs.

use std::fmt;

use thiserror::Error;
use tokio::sync::{mpsc::error::SendError, oneshot::error::RecvError};

use crate::frame::{
    AmqpChannelId, AmqpClassId, AmqpDeliveryTag, AmqpMethodId, AmqpReplyCode, CloseChannel,
    Return,
};

/// A list of errors can be returned by the APIs.
#[derive(Debug, Clone, Error)]
#[non_exhaustive]
pub enum Error {
    /// Error when using the connection. Usually due to incorrect usage by user.
    #[error("AMQP connection usage error: {0}")]
    ConnectionUseError(String),
    /// Error during openning a channel.
    #[error("AMQP channel open error: {0}")]
    ChannelOpenError(String),
    /// Error during closing a channel.
    #[error("AMQP channel close error: {0}")]
    ChannelCloseError(String),
    /// Error when using the channel. Usually due to incorrect usage by user.
    #[error("AMQP channel usage error: {0}")]
    ChannelUseError(String),
    /// Channel closed while a request was waiting for its reply.
    #[error("AMQP channel {0} is closed")]
    ChannelClosed(AmqpChannelId),
    /// Channel or connection closed by the broker.
    #[error("{0}")]
    BrokerError(BrokerError),
    /// Published message returned as unroutable or undeliverable.
    #[error("{0}")]
    RouteError(RouteError),
    /// Broker refused a published message in confirm mode.
    #[error("message {0} is nacked by server")]
    Nacked(AmqpDeliveryTag),
    /// Every channel id of the pool is allocated.
    #[error("all channels are opened")]
    AllChannelsOpened,
    /// No free channel and no id left to open a new one.
    #[error("all channels are busy")]
    AllChannelsBusy,
    /// The requested channel id is leased by someone else.
    #[error("channel {0} is busy")]
    ChannelBusy(AmqpChannelId),
    /// Broker replied with a method that does not match the request.
    #[error("unexpected reply: {0}")]
    UnexpectedReply(String),
    /// Error occurs in network layer.
    #[error("AMQP network error: {0}")]
    NetworkError(String),
    /// Error in sending or receiving messages via internal communication channel.
    /// Usually due to incorrect usage by user.
    #[error("internal communication error: {0}")]
    InternalChannelError(String),
}

impl Error {
    /// `true` for failures the task pool answers by redelivering the task.
    pub fn is_resource_exhausted(&self) -> bool {
        matches!(
            self,
            Error::AllChannelsOpened | Error::AllChannelsBusy | Error::ChannelBusy(_)
        )
    }
}

impl<T> From<SendError<T>> for Error {
    fn from(err: SendError<T>) -> Self {
        Self::InternalChannelError(err.to_string())
    }
}

impl From<RecvError> for Error {
    fn from(err: RecvError) -> Self {
        Self::InternalChannelError(err.to_string())
    }
}

/////////////////////////////////////////////////////////////////////////////
/// Reason given by the broker when it closes a channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BrokerError {
    pub reply_code: AmqpReplyCode,
    pub reply_text: String,
    pub class_id: AmqpClassId,
    pub method_id: AmqpMethodId,
}

impl From<CloseChannel> for BrokerError {
    fn from(close: CloseChannel) -> Self {
        Self {
            reply_code: close.reply_code,
            reply_text: close.reply_text,
            class_id: close.class_id,
            method_id: close.method_id,
        }
    }
}

impl fmt::Display for BrokerError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "closed by server: {}: '{}', caused by method ({}, {})",
            self.reply_code, self.reply_text, self.class_id, self.method_id
        )
    }
}

impl std::error::Error for BrokerError {}

/// Why the broker returned a published message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RouteError {
    pub reply_code: AmqpReplyCode,
    pub reply_text: String,
    pub exchange: String,
    pub routing_key: String,
}

impl From<&Return> for RouteError {
    fn from(ret: &Return) -> Self {
        Self {
            reply_code: ret.reply_code,
            reply_text: ret.reply_text.clone(),
            exchange: ret.exchange.clone(),
            routing_key: ret.routing_key.clone(),
        }
    }
}

impl fmt::Display for RouteError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "returned by server: {}: '{}', exchange '{}', routing key '{}'",
            self.reply_code, self.reply_text, self.exchange, self.routing_key
        )
    }
}

impl std::error::Error for RouteError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_broker_error_from_close() {
        let close = CloseChannel {
            reply_code: 404,
            reply_text: "NOT_FOUND - no exchange 'x'".to_string(),
            class_id: 60,
            method_id: 40,
        };
        let err = Error::BrokerError(close.into());
        assert_eq!(
            "closed by server: 404: 'NOT_FOUND - no exchange 'x'', caused by method (60, 40)",
            err.to_string()
        );
    }

    #[test]
    fn test_resource_exhausted() {
        assert!(Error::AllChannelsBusy.is_resource_exhausted());
        assert!(Error::ChannelBusy(3).is_resource_exhausted());
        assert!(!Error::ChannelClosed(3).is_resource_exhausted());
    }
}
