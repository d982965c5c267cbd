//! 数据模型：任务、人员、账本条目、收益汇总
//!
//! 所有记录在构造时校验不变量，非法的远端数据在反序列化时即被拒绝。

pub mod ledger;
pub mod person;
pub mod summary;
pub mod task;

use thiserror::Error;

pub use ledger::{EntryContext, LedgerDirection, LedgerEntry};
pub use person::{derive_people, first_name, ColorBook, Person, PALETTE};
pub use summary::{day_key, month_key, week_key, PersonEarningsSummary};
pub use task::{
    ConversationId, PersonId, StatusUpdate, Task, TaskId, TaskRecord, TaskStatus, UserRef,
};

/// 构造期不变量校验失败
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ModelError {
    #[error("task {0}: completed status requires completed_by")]
    CompletedWithoutCompleter(TaskId),

    #[error("task {0}: completed_by set on a task that is not completed")]
    CompleterWithoutCompletion(TaskId),

    #[error("empty {0} id")]
    EmptyId(&'static str),

    #[error("ledger amount must be positive, got {0}")]
    NonPositiveAmount(i64),
}
