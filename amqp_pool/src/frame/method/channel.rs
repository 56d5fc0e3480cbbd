use serde::{Deserialize, Serialize};

use crate::frame::{AmqpClassId, AmqpMethodId, AmqpReplyCode, REPLY_SUCCESS};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OpenChannel;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OpenChannelOk;

/// `channel.close`, sent by either peer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CloseChannel {
    pub reply_code: AmqpReplyCode,
    pub reply_text: String,
    pub class_id: AmqpClassId,
    pub method_id: AmqpMethodId,
}

impl Default for CloseChannel {
    fn default() -> Self {
        Self {
            reply_code: REPLY_SUCCESS,
            reply_text: String::from("client close"),
            class_id: 0,
            method_id: 0,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CloseChannelOk;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Flow {
    pub active: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FlowOk {
    pub active: bool,
}
