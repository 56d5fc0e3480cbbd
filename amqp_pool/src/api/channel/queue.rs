use crate::{
    api::Result,
    frame::{
        AmqpMessageCount, FieldTable, Incoming, QueueBind, QueueDeclare, QueueDelete, QueuePurge,
        QueueUnbind, ReplyKind,
    },
};

use super::Channel;

#[derive(Debug, Clone)]
pub struct QueueDeclareArguments {
    /// Server generates a name if empty.
    pub queue: String,
    pub passive: bool,
    pub durable: bool,
    pub exclusive: bool,
    pub auto_delete: bool,
    pub no_wait: bool,
    pub arguments: FieldTable,
}

impl QueueDeclareArguments {
    pub fn new(queue: &str) -> Self {
        Self {
            queue: queue.to_string(),
            passive: false,
            durable: false,
            exclusive: false,
            auto_delete: false,
            no_wait: false,
            arguments: FieldTable::new(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct QueueBindArguments {
    pub queue: String,
    pub exchange: String,
    pub routing_key: String,
    pub no_wait: bool,
    pub arguments: FieldTable,
}

impl QueueBindArguments {
    pub fn new(queue: &str, exchange: &str, routing_key: &str) -> Self {
        Self {
            queue: queue.to_string(),
            exchange: exchange.to_string(),
            routing_key: routing_key.to_string(),
            no_wait: false,
            arguments: FieldTable::new(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct QueuePurgeArguments {
    pub queue: String,
    pub no_wait: bool,
}

impl QueuePurgeArguments {
    pub fn new(queue: &str) -> Self {
        Self {
            queue: queue.to_string(),
            no_wait: false,
        }
    }
}

#[derive(Debug, Clone)]
pub struct QueueDeleteArguments {
    pub queue: String,
    pub if_unused: bool,
    pub if_empty: bool,
    pub no_wait: bool,
}

impl QueueDeleteArguments {
    pub fn new(queue: &str) -> Self {
        Self {
            queue: queue.to_string(),
            if_unused: false,
            if_empty: false,
            no_wait: false,
        }
    }
}

#[derive(Debug, Clone)]
pub struct QueueUnbindArguments {
    pub queue: String,
    pub exchange: String,
    pub routing_key: String,
    pub arguments: FieldTable,
}

impl QueueUnbindArguments {
    pub fn new(queue: &str, exchange: &str, routing_key: &str) -> Self {
        Self {
            queue: queue.to_string(),
            exchange: exchange.to_string(),
            routing_key: routing_key.to_string(),
            arguments: FieldTable::new(),
        }
    }
}

/////////////////////////////////////////////////////////////////////////////
impl Channel {
    /// When result is Ok
    ///     - no_wait = false, which means require synchronous response, return `(queue_name, message_count, consumer_count)` wrapped in `Some`
    ///     - no_wait = true, which means no response required, return `None`
    ///
    pub async fn queue_declare(
        &self,
        args: QueueDeclareArguments,
    ) -> Result<Option<(String, AmqpMessageCount, u32)>> {
        let declare = QueueDeclare {
            queue: args.queue,
            passive: args.passive,
            durable: args.durable,
            exclusive: args.exclusive,
            auto_delete: args.auto_delete,
            no_wait: args.no_wait,
            arguments: args.arguments,
        };
        if args.no_wait {
            self.send(declare).await?;
            Ok(None)
        } else {
            let declare_ok = synchronous_request!(
                self,
                declare,
                ReplyKind::QueueDeclare,
                Incoming::QueueDeclareOk
            )?;
            Ok(Some((
                declare_ok.queue,
                declare_ok.message_count,
                declare_ok.consumer_count,
            )))
        }
    }

    pub async fn queue_bind(&self, args: QueueBindArguments) -> Result<()> {
        let bind = QueueBind {
            queue: args.queue,
            exchange: args.exchange,
            routing_key: args.routing_key,
            no_wait: args.no_wait,
            arguments: args.arguments,
        };
        if args.no_wait {
            self.send(bind).await
        } else {
            synchronous_request!(self, bind, ReplyKind::QueueBind, Incoming::QueueBindOk)?;
            Ok(())
        }
    }

    /// Return the number of purged messages, `None` if `no_wait`.
    pub async fn queue_purge(&self, args: QueuePurgeArguments) -> Result<Option<AmqpMessageCount>> {
        let purge = QueuePurge {
            queue: args.queue,
            no_wait: args.no_wait,
        };
        if args.no_wait {
            self.send(purge).await?;
            Ok(None)
        } else {
            let purge_ok =
                synchronous_request!(self, purge, ReplyKind::QueuePurge, Incoming::QueuePurgeOk)?;
            Ok(Some(purge_ok.message_count))
        }
    }

    /// Return the number of deleted messages, `None` if `no_wait`.
    pub async fn queue_delete(
        &self,
        args: QueueDeleteArguments,
    ) -> Result<Option<AmqpMessageCount>> {
        let delete = QueueDelete {
            queue: args.queue,
            if_unused: args.if_unused,
            if_empty: args.if_empty,
            no_wait: args.no_wait,
        };
        if args.no_wait {
            self.send(delete).await?;
            Ok(None)
        } else {
            let delete_ok = synchronous_request!(
                self,
                delete,
                ReplyKind::QueueDelete,
                Incoming::QueueDeleteOk
            )?;
            Ok(Some(delete_ok.message_count))
        }
    }

    pub async fn queue_unbind(&self, args: QueueUnbindArguments) -> Result<()> {
        let unbind = QueueUnbind {
            queue: args.queue,
            exchange: args.exchange,
            routing_key: args.routing_key,
            arguments: args.arguments,
        };
        synchronous_request!(
            self,
            unbind,
            ReplyKind::QueueUnbind,
            Incoming::QueueUnbindOk
        )?;
        Ok(())
    }
}
