//! 错误类型与恢复动作
//!
//! 与 RecoveryEngine 配合：根据 TallyError 决定 Resync / ReportNonFatal / Surface。

use thiserror::Error;

use crate::model::{ConversationId, PersonId, TaskId};
use crate::remote::RemoteError;

/// 同步与账本流程中可能出现的错误
#[derive(Error, Debug)]
pub enum TallyError {
    /// 读取失败：缓存已清空
    #[error("Failed to fetch tasks for conversation {conversation_id}: {source}")]
    Fetch {
        conversation_id: ConversationId,
        #[source]
        source: RemoteError,
    },

    #[error("{kind} {id} not found")]
    NotFound { kind: &'static str, id: String },

    #[error("Task {task_id} has no positive reward (got {amount})")]
    InvalidReward { task_id: TaskId, amount: i64 },

    #[error("Ledger amount must be positive, got {0}")]
    InvalidAmount(i64),

    /// 无付款方：完成已生效，只跳过账本
    #[error("Task {task_id} has no payer, ledger entry skipped")]
    MissingPayer { task_id: TaskId },

    /// 本次完成没有成功入账，撤销时不再冲正
    #[error("Task {task_id} has no posted reward to reverse")]
    Unsettled { task_id: TaskId },

    /// 远端拒绝状态更新：未改缓存、未记账
    #[error("Remote task update rejected for {task_id}: {source}")]
    RemoteUpdate {
        task_id: TaskId,
        #[source]
        source: RemoteError,
    },

    /// 状态已提交后账本提交失败（非致命）
    #[error("Ledger submission failed for task {task_id}: {source}")]
    LedgerSubmission {
        task_id: TaskId,
        #[source]
        source: RemoteError,
    },

    #[error("Summary refresh failed for {person_id}: {source}")]
    SummaryRefresh {
        person_id: PersonId,
        #[source]
        source: RemoteError,
    },

    /// 本地与远端不一致（乐观更新前置条件不满足）
    #[error("Cache state violation: {0}")]
    StateViolation(String),

    #[error("Config error: {0}")]
    Config(String),
}

impl TallyError {
    pub fn not_found(kind: &'static str, id: impl Into<String>) -> Self {
        Self::NotFound {
            kind,
            id: id.into(),
        }
    }
}

/// 恢复引擎根据错误类型给出的建议动作
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecoveryAction {
    /// 丢弃本地状态，从 Task Store 全量重载
    Resync,
    /// 通过通知通道上报，不回滚可见状态
    ReportNonFatal(String),
    /// 直接返回给调用方
    Surface,
}
