//! Matching replies and publisher confirms to the requests waiting for them.
//!
//! Each waiter is a `oneshot` resolved by whichever comes first: its reply,
//! or the failure of the channel. The sender is consumed on resolution, so a
//! late reply after a close finds nobody to wake.
use std::collections::{BTreeMap, HashMap, VecDeque};

use tokio::sync::oneshot;

use crate::{
    api::{error::Error, Result},
    frame::{AmqpDeliveryTag, Incoming, ReplyKind},
};

type Responder = oneshot::Sender<Result<Incoming>>;

/// Future side of a registered request.
#[must_use = "a pending reply does nothing unless awaited"]
pub(crate) struct PendingReply {
    rx: oneshot::Receiver<Result<Incoming>>,
}

impl PendingReply {
    pub(crate) async fn wait(self) -> Result<Incoming> {
        self.rx.await?
    }
}

/// Requests waiting for their reply, FIFO per reply kind.
#[derive(Default)]
pub(crate) struct Responders {
    waiting: HashMap<ReplyKind, VecDeque<Responder>>,
}

impl Responders {
    pub(crate) fn register(&mut self, kind: ReplyKind) -> PendingReply {
        let (tx, rx) = oneshot::channel();
        let queue = self.waiting.entry(kind).or_default();
        // requests that were never sent dropped their receiver
        queue.retain(|responder| !responder.is_closed());
        queue.push_back(tx);
        PendingReply { rx }
    }

    /// Hand `incoming` to the oldest live waiter of `kind`.
    ///
    /// Give `incoming` back if nobody is waiting for it.
    pub(crate) fn resolve(&mut self, kind: ReplyKind, incoming: Incoming) -> Option<Incoming> {
        let queue = match self.waiting.get_mut(&kind) {
            Some(queue) => queue,
            None => return Some(incoming),
        };
        let mut reply = Ok(incoming);
        while let Some(responder) = queue.pop_front() {
            match responder.send(reply) {
                Ok(()) => return None,
                // receiver dropped, try next waiter
                Err(returned) => reply = returned,
            }
        }
        reply.ok()
    }

    /// Resolve every waiter with `err`, return how many were still waiting.
    pub(crate) fn fail_all(&mut self, err: &Error) -> usize {
        let mut count = 0;
        for (_, queue) in self.waiting.drain() {
            for responder in queue {
                if responder.send(Err(err.clone())).is_ok() {
                    count += 1;
                }
            }
        }
        count
    }

    pub(crate) fn len(&self) -> usize {
        self.waiting
            .values()
            .flat_map(|queue| queue.iter())
            .filter(|responder| !responder.is_closed())
            .count()
    }
}

/////////////////////////////////////////////////////////////////////////////
/// Future side of a publish waiting for its confirm.
#[must_use = "a pending confirm does nothing unless awaited"]
pub(crate) struct PendingConfirm {
    delivery_tag: AmqpDeliveryTag,
    rx: oneshot::Receiver<Result<()>>,
}

impl PendingConfirm {
    pub(crate) fn delivery_tag(&self) -> AmqpDeliveryTag {
        self.delivery_tag
    }

    pub(crate) async fn wait(self) -> Result<()> {
        self.rx.await?
    }
}

/// Publishes waiting for `basic.ack`, keyed by delivery tag.
#[derive(Default)]
pub(crate) struct Confirms {
    waiting: BTreeMap<AmqpDeliveryTag, oneshot::Sender<Result<()>>>,
}

impl Confirms {
    pub(crate) fn register(&mut self, delivery_tag: AmqpDeliveryTag) -> PendingConfirm {
        let (tx, rx) = oneshot::channel();
        self.waiting.insert(delivery_tag, tx);
        PendingConfirm { delivery_tag, rx }
    }

    pub(crate) fn forget(&mut self, delivery_tag: AmqpDeliveryTag) {
        self.waiting.remove(&delivery_tag);
    }

    /// Settle the confirmed tags, return how many waiters were woken.
    ///
    /// Tags nobody waits for are ignored.
    pub(crate) fn ack(&mut self, delivery_tag: AmqpDeliveryTag, multiple: bool) -> usize {
        self.settle(delivery_tag, multiple, |_| Ok(()))
    }

    pub(crate) fn nack(&mut self, delivery_tag: AmqpDeliveryTag, multiple: bool) -> usize {
        self.settle(delivery_tag, multiple, |tag| Err(Error::Nacked(tag)))
    }

    pub(crate) fn fail_all(&mut self, err: &Error) -> usize {
        let waiting = std::mem::take(&mut self.waiting);
        waiting
            .into_values()
            .filter(|tx| !tx.is_closed())
            .map(|tx| tx.send(Err(err.clone())))
            .filter(|res| res.is_ok())
            .count()
    }

    pub(crate) fn len(&self) -> usize {
        self.waiting.len()
    }

    fn settle<F>(&mut self, delivery_tag: AmqpDeliveryTag, multiple: bool, outcome: F) -> usize
    where
        F: Fn(AmqpDeliveryTag) -> Result<()>,
    {
        let tags: Vec<AmqpDeliveryTag> = if multiple {
            self.waiting.range(..=delivery_tag).map(|(tag, _)| *tag).collect()
        } else if self.waiting.contains_key(&delivery_tag) {
            vec![delivery_tag]
        } else {
            vec![]
        };

        tags.into_iter()
            .filter_map(|tag| self.waiting.remove(&tag).map(|tx| (tag, tx)))
            .map(|(tag, tx)| tx.send(outcome(tag)))
            .filter(|res| res.is_ok())
            .count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::{CloseChannelOk, GetEmpty, OpenChannelOk};

    #[tokio::test]
    async fn test_reply_resolves_oldest_waiter() {
        let mut responders = Responders::default();
        let first = responders.register(ReplyKind::Get);
        let second = responders.register(ReplyKind::Get);

        assert!(responders
            .resolve(ReplyKind::Get, GetEmpty.into())
            .is_none());
        assert!(matches!(first.wait().await, Ok(Incoming::GetEmpty(_))));
        assert_eq!(1, responders.len());
        drop(second);
    }

    #[tokio::test]
    async fn test_reply_after_close_is_dropped() {
        let mut responders = Responders::default();
        let pending = responders.register(ReplyKind::OpenChannel);

        assert_eq!(1, responders.fail_all(&Error::ChannelClosed(1)));
        // the late reply finds nobody waiting
        let late = responders.resolve(ReplyKind::OpenChannel, OpenChannelOk.into());
        assert!(late.is_some());

        assert!(matches!(pending.wait().await, Err(Error::ChannelClosed(1))));
    }

    #[tokio::test]
    async fn test_dropped_waiter_is_skipped() {
        let mut responders = Responders::default();
        let never_sent = responders.register(ReplyKind::CloseChannel);
        let sent = responders.register(ReplyKind::CloseChannel);
        drop(never_sent);

        assert!(responders
            .resolve(ReplyKind::CloseChannel, CloseChannelOk.into())
            .is_none());
        assert!(sent.wait().await.is_ok());
        assert_eq!(0, responders.len());
    }

    #[tokio::test]
    async fn test_confirm_exact_and_multiple() {
        let mut confirms = Confirms::default();
        let one = confirms.register(1);
        let two = confirms.register(2);
        let three = confirms.register(3);
        let four = confirms.register(4);

        assert_eq!(1, confirms.ack(2, false));
        assert!(two.wait().await.is_ok());
        // unknown tag is a no-op
        assert_eq!(0, confirms.ack(2, false));

        assert_eq!(2, confirms.ack(3, true));
        assert!(one.wait().await.is_ok());
        assert!(three.wait().await.is_ok());

        assert_eq!(1, confirms.nack(4, false));
        assert!(matches!(four.wait().await, Err(Error::Nacked(4))));
        assert_eq!(0, confirms.len());
    }

    #[tokio::test]
    async fn test_confirm_fail_all_then_ack_is_noop() {
        let mut confirms = Confirms::default();
        let pending = confirms.register(7);
        assert_eq!(7, pending.delivery_tag());

        assert_eq!(1, confirms.fail_all(&Error::ChannelClosed(1)));
        assert_eq!(0, confirms.ack(7, false));
        assert!(matches!(pending.wait().await, Err(Error::ChannelClosed(1))));
    }
}
