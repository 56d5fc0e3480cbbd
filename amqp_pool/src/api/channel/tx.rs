use crate::{
    api::Result,
    frame::{Incoming, ReplyKind, TxCommit, TxRollback, TxSelect},
};

use super::Channel;

/// APIs for AMQP transaction class.
impl Channel {
    /// Put the channel in transaction mode.
    pub async fn tx_select(&self) -> Result<()> {
        synchronous_request!(self, TxSelect, ReplyKind::TxSelect, Incoming::TxSelectOk)?;
        Ok(())
    }

    pub async fn tx_commit(&self) -> Result<()> {
        synchronous_request!(self, TxCommit, ReplyKind::TxCommit, Incoming::TxCommitOk)?;
        Ok(())
    }

    pub async fn tx_rollback(&self) -> Result<()> {
        synchronous_request!(
            self,
            TxRollback,
            ReplyKind::TxRollback,
            Incoming::TxRollbackOk
        )?;
        Ok(())
    }
}
