use std::fmt;

use crate::{
    api::Result,
    frame::{
        ExchangeBind, ExchangeDeclare, ExchangeDelete, ExchangeUnbind, FieldTable, Incoming,
        ReplyKind,
    },
};

use super::Channel;

/// Exchange types supported by RabbitMQ.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExchangeType {
    Direct,
    Fanout,
    Topic,
    Headers,
}

impl fmt::Display for ExchangeType {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            ExchangeType::Direct => write!(f, "direct"),
            ExchangeType::Fanout => write!(f, "fanout"),
            ExchangeType::Topic => write!(f, "topic"),
            ExchangeType::Headers => write!(f, "headers"),
        }
    }
}

/// Arguments for [`exchange_declare`]
///
/// [`exchange_declare`]: crate::api::channel::Channel::exchange_declare
#[derive(Debug, Clone)]
pub struct ExchangeDeclareArguments {
    pub exchange: String,
    /// Default: `topic`
    pub typ: String,
    pub passive: bool,
    pub durable: bool,
    pub auto_delete: bool,
    pub internal: bool,
    pub no_wait: bool,
    pub arguments: FieldTable,
}

impl ExchangeDeclareArguments {
    /// Create declare arguments with defaults
    pub fn new(exchange: &str) -> Self {
        Self::of_type(exchange, ExchangeType::Topic)
    }

    pub fn of_type(exchange: &str, typ: ExchangeType) -> Self {
        Self {
            exchange: exchange.to_string(),
            typ: typ.to_string(),
            passive: false,
            durable: false,
            auto_delete: false,
            internal: false,
            no_wait: false,
            arguments: FieldTable::new(),
        }
    }

    /// RabbitMQ server's feature [`Alternate Exchange`]
    ///
    /// [`Alternate Exchange`]: https://www.rabbitmq.com/ae.html
    pub fn set_alternate_exchange(&mut self, alternate_exchange: &str) {
        self.arguments
            .insert("alternate-exchange".to_string(), alternate_exchange.into());
    }
}

/// Arguments for [`exchange_delete`]
///
/// [`exchange_delete`]: crate::api::channel::Channel::exchange_delete
#[derive(Debug, Clone)]
pub struct ExchangeDeleteArguments {
    pub exchange: String,
    pub if_unused: bool,
    pub no_wait: bool,
}

impl ExchangeDeleteArguments {
    /// Create arguments with defaults
    pub fn new(exchange: &str) -> Self {
        Self {
            exchange: exchange.to_string(),
            if_unused: false,
            no_wait: false,
        }
    }
}

/// Arguments for [`exchange_bind`] and [`exchange_unbind`]
///
/// [`exchange_bind`]: crate::api::channel::Channel::exchange_bind
/// [`exchange_unbind`]: crate::api::channel::Channel::exchange_unbind
#[derive(Debug, Clone)]
pub struct ExchangeBindArguments {
    pub destination: String,
    pub source: String,
    pub routing_key: String,
    pub no_wait: bool,
    pub arguments: FieldTable,
}

impl ExchangeBindArguments {
    pub fn new(destination: &str, source: &str, routing_key: &str) -> Self {
        Self {
            destination: destination.to_string(),
            source: source.to_string(),
            routing_key: routing_key.to_string(),
            no_wait: false,
            arguments: FieldTable::new(),
        }
    }
}

pub type ExchangeUnbindArguments = ExchangeBindArguments;

/////////////////////////////////////////////////////////////////////////////
/// API for Exchange methods
impl Channel {
    pub async fn exchange_declare(&self, args: ExchangeDeclareArguments) -> Result<()> {
        let declare = ExchangeDeclare {
            exchange: args.exchange,
            typ: args.typ,
            passive: args.passive,
            durable: args.durable,
            auto_delete: args.auto_delete,
            internal: args.internal,
            no_wait: args.no_wait,
            arguments: args.arguments,
        };
        if args.no_wait {
            self.send(declare).await
        } else {
            synchronous_request!(
                self,
                declare,
                ReplyKind::ExchangeDeclare,
                Incoming::ExchangeDeclareOk
            )?;
            Ok(())
        }
    }

    pub async fn exchange_delete(&self, args: ExchangeDeleteArguments) -> Result<()> {
        let delete = ExchangeDelete {
            exchange: args.exchange,
            if_unused: args.if_unused,
            no_wait: args.no_wait,
        };
        if args.no_wait {
            self.send(delete).await
        } else {
            synchronous_request!(
                self,
                delete,
                ReplyKind::ExchangeDelete,
                Incoming::ExchangeDeleteOk
            )?;
            Ok(())
        }
    }

    pub async fn exchange_bind(&self, args: ExchangeBindArguments) -> Result<()> {
        let bind = ExchangeBind {
            destination: args.destination,
            source: args.source,
            routing_key: args.routing_key,
            no_wait: args.no_wait,
            arguments: args.arguments,
        };
        if args.no_wait {
            self.send(bind).await
        } else {
            synchronous_request!(
                self,
                bind,
                ReplyKind::ExchangeBind,
                Incoming::ExchangeBindOk
            )?;
            Ok(())
        }
    }

    pub async fn exchange_unbind(&self, args: ExchangeUnbindArguments) -> Result<()> {
        let unbind = ExchangeUnbind {
            destination: args.destination,
            source: args.source,
            routing_key: args.routing_key,
            no_wait: args.no_wait,
            arguments: args.arguments,
        };
        if args.no_wait {
            self.send(unbind).await
        } else {
            synchronous_request!(
                self,
                unbind,
                ReplyKind::ExchangeUnbind,
                Incoming::ExchangeUnbindOk
            )?;
            Ok(())
        }
    }
}
