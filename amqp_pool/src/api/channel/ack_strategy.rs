//! When a publish is considered done.
//!
//! AMQP `basic.publish` has no reply. Each [`AckStrategy`] decides what the
//! publishing future waits for before resolving. Every strategy resolves with
//! the close error if the channel closes first.
use std::{fmt, str::FromStr, time::Duration};

use serde::{Deserialize, Serialize};
use tokio::time;
#[cfg(feature = "traces")]
use tracing::trace;

use crate::{
    api::{error::Error, Result},
    frame::{AmqpDeliveryTag, Method, Publish},
};

use super::Channel;

/// Default delay of [`AckStrategy::WaitTimeout`] and
/// [`AckStrategy::WaitHeartbeatOrTimeout`].
pub const DEFAULT_ACK_TIMEOUT: Duration = Duration::from_millis(100);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AckStrategy {
    /// Done once the transport accepted the message.
    #[default]
    JustCallback,
    /// Done once the server confirmed the message, channel must be in confirm mode.
    WaitAck,
    /// As [`WaitAck`](AckStrategy::WaitAck), and the pooled channel is
    /// released when the confirm settles.
    WaitAckButMakeChanFree,
    /// Done after the given delay once the message is sent.
    WaitTimeout(Duration),
    /// Done on the first heartbeat received after the message is sent.
    WaitHeartbeat,
    /// Done on the first of the given delay, or a heartbeat received in
    /// answer to one we send after the message.
    WaitHeartbeatOrTimeout(Duration),
}

impl AckStrategy {
    pub fn wait_timeout() -> Self {
        AckStrategy::WaitTimeout(DEFAULT_ACK_TIMEOUT)
    }

    pub fn wait_heartbeat_or_timeout() -> Self {
        AckStrategy::WaitHeartbeatOrTimeout(DEFAULT_ACK_TIMEOUT)
    }

    /// `true` if the strategy waits for a publisher confirm.
    pub fn needs_confirm(&self) -> bool {
        matches!(
            self,
            AckStrategy::WaitAck | AckStrategy::WaitAckButMakeChanFree
        )
    }

    /// `true` if a pooled channel is released as soon as the publish settles.
    pub fn releases_channel(&self) -> bool {
        matches!(self, AckStrategy::WaitAckButMakeChanFree)
    }

    /// Send `publish` on `channel` and resolve the way the strategy says.
    ///
    /// `delivery_tag` is the confirm sequence number of the message, `None`
    /// if the channel is not in confirm mode.
    pub(crate) async fn publish(
        self,
        channel: &Channel,
        publish: Publish,
        delivery_tag: Option<AmqpDeliveryTag>,
    ) -> Result<()> {
        #[cfg(feature = "traces")]
        trace!(
            "publish {:?} on {} with {}",
            publish.properties.message_id(),
            channel,
            self
        );
        match self {
            AckStrategy::JustCallback => send_or_closed(channel, publish).await,
            AckStrategy::WaitAck | AckStrategy::WaitAckButMakeChanFree => {
                wait_ack(channel, publish, delivery_tag).await
            }
            AckStrategy::WaitTimeout(timeout) => {
                or_closed(channel, async {
                    channel.send(publish).await?;
                    time::sleep(timeout).await;
                    Ok(())
                })
                .await
            }
            AckStrategy::WaitHeartbeat => {
                or_closed(channel, async {
                    channel.send(publish).await?;
                    let mut heartbeat = channel.connection().heartbeat_receiver();
                    heartbeat_received(&mut heartbeat).await
                })
                .await
            }
            AckStrategy::WaitHeartbeatOrTimeout(timeout) => {
                or_closed(channel, async {
                    channel.send(publish).await?;
                    let mut heartbeat = channel.connection().heartbeat_receiver();
                    let expired = time::sleep(timeout);
                    tokio::pin!(expired);
                    tokio::select! {
                        _ = &mut expired => Ok(()),
                        res = async {
                            channel.connection().heartbeat().await?;
                            heartbeat_received(&mut heartbeat).await
                        } => res,
                    }
                })
                .await
            }
        }
    }
}

impl fmt::Display for AckStrategy {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            AckStrategy::JustCallback => write!(f, "just_callback"),
            AckStrategy::WaitAck => write!(f, "wait_ack"),
            AckStrategy::WaitAckButMakeChanFree => write!(f, "wait_ack_but_make_chan_free"),
            AckStrategy::WaitTimeout(_) => write!(f, "wait_timeout"),
            AckStrategy::WaitHeartbeat => write!(f, "wait_heartbeat"),
            AckStrategy::WaitHeartbeatOrTimeout(_) => write!(f, "wait_heartbeat_or_timeout"),
        }
    }
}

/// Parse a strategy by name, timers use [`DEFAULT_ACK_TIMEOUT`].
impl FromStr for AckStrategy {
    type Err = Error;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "just_callback" => Ok(AckStrategy::JustCallback),
            "wait_ack" => Ok(AckStrategy::WaitAck),
            "wait_ack_but_make_chan_free" => Ok(AckStrategy::WaitAckButMakeChanFree),
            "wait_timeout" => Ok(AckStrategy::wait_timeout()),
            "wait_heartbeat" => Ok(AckStrategy::WaitHeartbeat),
            "wait_heartbeat_or_timeout" => Ok(AckStrategy::wait_heartbeat_or_timeout()),
            unknown => Err(Error::ChannelUseError(format!(
                "unknown publish ack strategy: {}",
                unknown
            ))),
        }
    }
}

/// Resolve with `fut`, or with the close error if the channel closes first.
async fn or_closed<F>(channel: &Channel, fut: F) -> Result<()>
where
    F: std::future::Future<Output = Result<()>>,
{
    tokio::select! {
        biased;
        err = channel.wait_closed() => Err(err),
        res = fut => res,
    }
}

/// Send `method` and resolve once the transport accepted it.
pub(crate) async fn send_or_closed<M: Into<Method>>(channel: &Channel, method: M) -> Result<()> {
    or_closed(channel, channel.send(method)).await
}

async fn wait_ack(
    channel: &Channel,
    publish: Publish,
    delivery_tag: Option<AmqpDeliveryTag>,
) -> Result<()> {
    let delivery_tag = delivery_tag.ok_or_else(|| {
        Error::ChannelUseError(format!(
            "{} is not in confirm mode, call `confirm_select` first",
            channel
        ))
    })?;
    // registered before sending, the confirm may arrive before `send` returns
    let pending = channel.register_confirm(delivery_tag)?;
    if let Err(err) = channel.send(publish).await {
        channel.forget_confirm(pending.delivery_tag());
        return Err(err);
    }
    pending.wait().await
}

async fn heartbeat_received(heartbeat: &mut tokio::sync::watch::Receiver<u64>) -> Result<()> {
    heartbeat
        .changed()
        .await
        .map_err(|_| Error::NetworkError("connection closed".to_string()))
}
