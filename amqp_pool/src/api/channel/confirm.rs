use crate::{
    api::Result,
    frame::{ConfirmSelect, Incoming, ReplyKind},
};

use super::Channel;

/// Arguments for [`confirm_select`]
///
/// See [AMQP_0-9-1 Reference](https://www.rabbitmq.com/amqp-0-9-1-reference.html#confirm.select).
///
/// [`confirm_select`]: struct.Channel.html#method.confirm_select
#[derive(Debug, Clone, Default)]
pub struct ConfirmSelectArguments {
    /// Default: `false`
    pub no_wait: bool,
}

impl ConfirmSelectArguments {
    /// Create new arguments with defaults.
    pub fn new(no_wait: bool) -> Self {
        Self { no_wait }
    }
}

/// APIs for AMQP confirm class.
impl Channel {
    /// Put the channel in confirm mode.
    ///
    /// From now on every publish takes the next delivery tag, and the
    /// `wait_ack` strategies can wait for its confirm. The mode lasts until
    /// the channel is opened again.
    ///
    /// # Errors
    ///
    /// Returns error if any failure in comunication with server.
    pub async fn confirm_select(&self, args: ConfirmSelectArguments) -> Result<()> {
        let select = ConfirmSelect {
            no_wait: args.no_wait,
        };
        if args.no_wait {
            self.send(select).await?;
        } else {
            synchronous_request!(
                self,
                select,
                ReplyKind::ConfirmSelect,
                Incoming::ConfirmSelectOk
            )?;
        }
        self.set_confirm_mode(true);
        Ok(())
    }
}
