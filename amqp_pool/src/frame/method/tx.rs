use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TxSelect;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TxSelectOk;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TxCommit;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TxCommitOk;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TxRollback;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TxRollbackOk;
