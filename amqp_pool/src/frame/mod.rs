//! Typed AMQP methods exchanged with the [`Transport`].
//!
//! [`Method`] is what the client asks the transport to send, [`Incoming`] is
//! what the transport decoded from the broker for a given channel. Encoding
//! and decoding the wire frames is entirely the transport's business.
//!
//! [`Transport`]: crate::net::Transport
use serde::{Deserialize, Serialize};

////////////////////////////////////////////////////////////////////////
// macros should appear before module declaration
#[macro_use]
mod helpers {
    // `$enum` wraps every listed method type in a variant of the same name,
    // and knows the class id and method id of each variant.
    macro_rules! impl_method_enum {
        ($(#[$meta:meta])* $enum:ident { $($class_id:literal => $($method_id:literal : $method:ident),+);+ $(;)? }) => {
            $(#[$meta])*
            #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
            pub enum $enum {
                $($($method($method),)+)+
            }

            impl $enum {
                pub fn header(&self) -> MethodHeader {
                    match self {
                        $($($enum::$method(_) => MethodHeader::new($class_id, $method_id),)+)+
                    }
                }
            }

            $($(
                impl From<$method> for $enum {
                    fn from(method: $method) -> Self {
                        $enum::$method(method)
                    }
                }
            )+)+
        };
    }
}

mod content_header;
mod method;
mod types;

pub use content_header::*;
pub use method::*;
pub use types::*;

impl_method_enum! {
    /// Methods the client sends on a channel.
    Method {
        20 => 10: OpenChannel, 20: Flow, 21: FlowOk, 40: CloseChannel, 41: CloseChannelOk;
        40 => 10: ExchangeDeclare, 20: ExchangeDelete, 30: ExchangeBind, 40: ExchangeUnbind;
        50 => 10: QueueDeclare, 20: QueueBind, 30: QueuePurge, 40: QueueDelete, 50: QueueUnbind;
        60 => 10: Qos, 20: Consume, 30: Cancel, 31: CancelOk, 40: Publish, 70: Get, 80: Ack, 90: Reject,
              100: RecoverAsync, 110: Recover, 120: Nack;
        85 => 10: ConfirmSelect;
        90 => 10: TxSelect, 20: TxCommit, 30: TxRollback;
    }
}

impl_method_enum! {
    /// Methods the broker sends on a channel, as decoded by the transport.
    ///
    /// Content carrying methods (`Deliver`, `GetOk`, `Return`) include their
    /// properties and body.
    Incoming {
        20 => 11: OpenChannelOk, 20: Flow, 21: FlowOk, 40: CloseChannel, 41: CloseChannelOk;
        40 => 11: ExchangeDeclareOk, 21: ExchangeDeleteOk, 31: ExchangeBindOk, 51: ExchangeUnbindOk;
        50 => 11: QueueDeclareOk, 21: QueueBindOk, 31: QueuePurgeOk, 41: QueueDeleteOk, 51: QueueUnbindOk;
        60 => 11: QosOk, 21: ConsumeOk, 30: Cancel, 31: CancelOk, 50: Return, 60: Deliver,
              71: GetOk, 72: GetEmpty, 80: Ack, 111: RecoverOk, 120: Nack;
        85 => 11: ConfirmSelectOk;
        90 => 11: TxSelectOk, 21: TxCommitOk, 31: TxRollbackOk;
    }
}

/// Key of a synchronous request awaiting its reply on a channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ReplyKind {
    OpenChannel,
    CloseChannel,
    Flow,
    Qos,
    Consume,
    Cancel,
    Get,
    Recover,
    ConfirmSelect,
    ExchangeDeclare,
    ExchangeDelete,
    ExchangeBind,
    ExchangeUnbind,
    QueueDeclare,
    QueueBind,
    QueuePurge,
    QueueDelete,
    QueueUnbind,
    TxSelect,
    TxCommit,
    TxRollback,
}

impl Incoming {
    /// The request this method replies to, `None` for asynchronous methods.
    pub fn reply_kind(&self) -> Option<ReplyKind> {
        let kind = match self {
            Incoming::OpenChannelOk(_) => ReplyKind::OpenChannel,
            Incoming::CloseChannelOk(_) => ReplyKind::CloseChannel,
            Incoming::FlowOk(_) => ReplyKind::Flow,
            Incoming::QosOk(_) => ReplyKind::Qos,
            Incoming::ConsumeOk(_) => ReplyKind::Consume,
            Incoming::CancelOk(_) => ReplyKind::Cancel,
            Incoming::GetOk(_) | Incoming::GetEmpty(_) => ReplyKind::Get,
            Incoming::RecoverOk(_) => ReplyKind::Recover,
            Incoming::ConfirmSelectOk(_) => ReplyKind::ConfirmSelect,
            Incoming::ExchangeDeclareOk(_) => ReplyKind::ExchangeDeclare,
            Incoming::ExchangeDeleteOk(_) => ReplyKind::ExchangeDelete,
            Incoming::ExchangeBindOk(_) => ReplyKind::ExchangeBind,
            Incoming::ExchangeUnbindOk(_) => ReplyKind::ExchangeUnbind,
            Incoming::QueueDeclareOk(_) => ReplyKind::QueueDeclare,
            Incoming::QueueBindOk(_) => ReplyKind::QueueBind,
            Incoming::QueuePurgeOk(_) => ReplyKind::QueuePurge,
            Incoming::QueueDeleteOk(_) => ReplyKind::QueueDelete,
            Incoming::QueueUnbindOk(_) => ReplyKind::QueueUnbind,
            Incoming::TxSelectOk(_) => ReplyKind::TxSelect,
            Incoming::TxCommitOk(_) => ReplyKind::TxCommit,
            Incoming::TxRollbackOk(_) => ReplyKind::TxRollback,
            Incoming::Flow(_)
            | Incoming::CloseChannel(_)
            | Incoming::Cancel(_)
            | Incoming::Return(_)
            | Incoming::Deliver(_)
            | Incoming::Ack(_)
            | Incoming::Nack(_) => return None,
        };
        Some(kind)
    }
}
