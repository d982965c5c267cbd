//! 状态定义：BoardState 投影与通知
//!
//! UI 只持有轻量的 BoardState（当前会话、两类任务、人员与进度、忙碌标记、错误）；
//! 账本 / 汇总等非致命问题通过 Notice 走独立的广播通道，不阻塞渲染。

use serde::Serialize;

use crate::core::Progress;
use crate::model::{ConversationId, Person, PersonId, Task, TaskId};

/// UI 看到的「投影」状态
#[derive(Clone, Debug, Default, Serialize)]
pub struct BoardState {
    pub conversation_id: Option<ConversationId>,
    pub active: Vec<Task>,
    pub completed: Vec<Task>,
    pub people: Vec<PersonProgress>,
    /// 当前会话有待决的完成 / 撤销流程
    pub busy: bool,
    pub error_message: Option<String>,
}

#[derive(Clone, Debug, Serialize)]
pub struct PersonProgress {
    pub person: Person,
    pub progress: Progress,
}

/// 次要通道上的通知
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub enum Notice {
    TaskCompleted { task_id: TaskId, person_id: PersonId },
    TaskReopened { task_id: TaskId },
    LedgerPosted { task_id: TaskId, amount: i64 },
    /// 非致命问题（无付款方、账本失败、汇总缺口）
    Problem { message: String },
    Resynced { conversation_id: ConversationId },
    ResyncFailed { message: String },
}
