//! 任务记录：状态、参与者与奖励计算
//!
//! Task 只能经由 `Task::new` 系列构造器或 `TryFrom<TaskRecord>`（远端线格式）得到，
//! 构造时校验「status == Completed ⇔ completed_by 存在」。

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::model::ModelError;

pub type TaskId = String;
pub type PersonId = String;
pub type ConversationId = String;

/// 任务状态（InProgress 保留，完成流程不会产生）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    NotStarted,
    InProgress,
    Completed,
}

/// 任务上的用户引用（创建者 / 指派人 / 完成者）
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserRef {
    pub id: PersonId,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub avatar_url: Option<String>,
}

impl UserRef {
    pub fn new(id: impl Into<PersonId>) -> Self {
        Self {
            id: id.into(),
            name: None,
            avatar_url: None,
        }
    }

    pub fn named(id: impl Into<PersonId>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: Some(name.into()),
            avatar_url: None,
        }
    }
}

/// 远端 Task Store 的线格式，字段与 JSON 一一对应
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskRecord {
    pub id: TaskId,
    pub title: String,
    pub conversation_id: ConversationId,
    pub status: TaskStatus,
    #[serde(default)]
    pub created_by: Option<UserRef>,
    #[serde(default)]
    pub assigned_to: Option<UserRef>,
    #[serde(default)]
    pub completed_by: Option<UserRef>,
    #[serde(default)]
    pub budget: Option<i64>,
    #[serde(default)]
    pub estimated_minutes: Option<u32>,
    #[serde(default)]
    pub progress: u8,
    pub updated_at: DateTime<Utc>,
}

/// 已校验的任务
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "TaskRecord", into = "TaskRecord")]
pub struct Task {
    id: TaskId,
    title: String,
    conversation_id: ConversationId,
    status: TaskStatus,
    created_by: Option<UserRef>,
    assigned_to: Option<UserRef>,
    completed_by: Option<UserRef>,
    budget: Option<i64>,
    estimated_minutes: Option<u32>,
    progress: u8,
    updated_at: DateTime<Utc>,
}

impl Task {
    /// 新建未开始的任务
    pub fn new(
        id: impl Into<TaskId>,
        title: impl Into<String>,
        conversation_id: impl Into<ConversationId>,
    ) -> Self {
        Self {
            id: id.into(),
            title: title.into(),
            conversation_id: conversation_id.into(),
            status: TaskStatus::NotStarted,
            created_by: None,
            assigned_to: None,
            completed_by: None,
            budget: None,
            estimated_minutes: None,
            progress: 0,
            updated_at: Utc::now(),
        }
    }

    pub fn with_creator(mut self, creator: UserRef) -> Self {
        self.created_by = Some(creator);
        self
    }

    pub fn with_assignee(mut self, assignee: UserRef) -> Self {
        self.assigned_to = Some(assignee);
        self
    }

    pub fn with_budget(mut self, budget: i64) -> Self {
        self.budget = Some(budget);
        self
    }

    pub fn with_estimated_minutes(mut self, minutes: u32) -> Self {
        self.estimated_minutes = Some(minutes);
        self
    }

    /// 以已完成状态构造（同时写入完成者，保持不变量）
    pub fn completed(mut self, by: UserRef, at: DateTime<Utc>) -> Self {
        self.mark_completed(by, at);
        self
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn title(&self) -> &str {
        &self.title
    }

    pub fn conversation_id(&self) -> &str {
        &self.conversation_id
    }

    pub fn status(&self) -> TaskStatus {
        self.status
    }

    pub fn is_completed(&self) -> bool {
        self.status == TaskStatus::Completed
    }

    pub fn created_by(&self) -> Option<&UserRef> {
        self.created_by.as_ref()
    }

    pub fn assigned_to(&self) -> Option<&UserRef> {
        self.assigned_to.as_ref()
    }

    pub fn completed_by(&self) -> Option<&UserRef> {
        self.completed_by.as_ref()
    }

    /// 付款方（任务创建者）
    pub fn created_by_user_id(&self) -> Option<&str> {
        self.created_by.as_ref().map(|u| u.id.as_str())
    }

    pub fn completed_by_user_id(&self) -> Option<&str> {
        self.completed_by.as_ref().map(|u| u.id.as_str())
    }

    pub fn budget(&self) -> Option<i64> {
        self.budget
    }

    pub fn estimated_minutes(&self) -> Option<u32> {
        self.estimated_minutes
    }

    pub fn progress(&self) -> u8 {
        self.progress
    }

    pub fn updated_at(&self) -> DateTime<Utc> {
        self.updated_at
    }

    /// 奖励积分：正数预算优先，否则按预估分钟数每 10 分钟 1 分向上取整；
    /// 两者皆无为 0
    pub fn reward_amount(&self) -> i64 {
        match (self.budget, self.estimated_minutes) {
            (Some(budget), _) if budget > 0 => budget,
            (_, Some(minutes)) => i64::from(minutes.div_ceil(10)),
            _ => 0,
        }
    }

    /// 改为已完成；只由本地乐观更新与测试替身调用
    pub(crate) fn mark_completed(&mut self, by: UserRef, at: DateTime<Utc>) {
        self.status = TaskStatus::Completed;
        self.completed_by = Some(by);
        self.progress = 100;
        self.updated_at = at;
    }

    pub(crate) fn mark_not_started(&mut self, at: DateTime<Utc>) {
        self.status = TaskStatus::NotStarted;
        self.completed_by = None;
        self.progress = 0;
        self.updated_at = at;
    }

    pub(crate) fn set_budget(&mut self, budget: Option<i64>) {
        self.budget = budget;
    }
}

impl TryFrom<TaskRecord> for Task {
    type Error = ModelError;

    fn try_from(record: TaskRecord) -> Result<Self, Self::Error> {
        if record.id.trim().is_empty() {
            return Err(ModelError::EmptyId("task"));
        }
        match (record.status, record.completed_by.is_some()) {
            (TaskStatus::Completed, false) => {
                return Err(ModelError::CompletedWithoutCompleter(record.id))
            }
            (TaskStatus::NotStarted | TaskStatus::InProgress, true) => {
                return Err(ModelError::CompleterWithoutCompletion(record.id))
            }
            _ => {}
        }
        Ok(Self {
            id: record.id,
            title: record.title,
            conversation_id: record.conversation_id,
            status: record.status,
            created_by: record.created_by,
            assigned_to: record.assigned_to,
            completed_by: record.completed_by,
            budget: record.budget,
            estimated_minutes: record.estimated_minutes,
            progress: record.progress.min(100),
            updated_at: record.updated_at,
        })
    }
}

impl From<Task> for TaskRecord {
    fn from(task: Task) -> Self {
        Self {
            id: task.id,
            title: task.title,
            conversation_id: task.conversation_id,
            status: task.status,
            created_by: task.created_by,
            assigned_to: task.assigned_to,
            completed_by: task.completed_by,
            budget: task.budget,
            estimated_minutes: task.estimated_minutes,
            progress: task.progress,
            updated_at: task.updated_at,
        }
    }
}

/// 发往 Task Store 的状态更新
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StatusUpdate {
    pub status: TaskStatus,
    pub completed_by_user_id: Option<PersonId>,
    pub progress: u8,
}

impl StatusUpdate {
    pub fn completed(by: impl Into<PersonId>) -> Self {
        Self {
            status: TaskStatus::Completed,
            completed_by_user_id: Some(by.into()),
            progress: 100,
        }
    }

    pub fn not_started() -> Self {
        Self {
            status: TaskStatus::NotStarted,
            completed_by_user_id: None,
            progress: 0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reward_prefers_budget() {
        let task = Task::new("t1", "Dishes", "c1")
            .with_budget(12)
            .with_estimated_minutes(999);
        assert_eq!(task.reward_amount(), 12);
    }

    #[test]
    fn test_reward_from_estimate_rounds_up() {
        let task = Task::new("t1", "Laundry", "c1").with_estimated_minutes(25);
        assert_eq!(task.reward_amount(), 3);

        let exact = Task::new("t2", "Vacuum", "c1").with_estimated_minutes(30);
        assert_eq!(exact.reward_amount(), 3);
    }

    #[test]
    fn test_reward_without_budget_or_estimate_is_zero() {
        let task = Task::new("t1", "Nothing", "c1");
        assert_eq!(task.reward_amount(), 0);

        let zero_budget = Task::new("t2", "Free", "c1").with_budget(0);
        assert_eq!(zero_budget.reward_amount(), 0);
    }

    #[test]
    fn test_record_rejects_completed_without_completer() {
        let json = serde_json::json!({
            "id": "t1",
            "title": "Dishes",
            "conversation_id": "c1",
            "status": "completed",
            "updated_at": "2026-10-01T10:00:00Z"
        });
        let err = serde_json::from_value::<Task>(json).unwrap_err();
        assert!(err.to_string().contains("completed_by"));
    }

    #[test]
    fn test_record_rejects_completer_on_open_task() {
        let record = TaskRecord {
            id: "t1".into(),
            title: "Dishes".into(),
            conversation_id: "c1".into(),
            status: TaskStatus::NotStarted,
            created_by: None,
            assigned_to: None,
            completed_by: Some(UserRef::new("u2")),
            budget: None,
            estimated_minutes: None,
            progress: 0,
            updated_at: Utc::now(),
        };
        assert_eq!(
            Task::try_from(record),
            Err(ModelError::CompleterWithoutCompletion("t1".into()))
        );
    }

    #[test]
    fn test_record_parses_wire_task() {
        let json = serde_json::json!({
            "id": "t1",
            "title": "Take out trash",
            "conversation_id": "c1",
            "status": "completed",
            "created_by": { "id": "u1", "name": "Ada Lovelace" },
            "completed_by": { "id": "u2" },
            "budget": 50,
            "progress": 100,
            "updated_at": "2026-10-01T10:00:00Z"
        });
        let task: Task = serde_json::from_value(json).unwrap();
        assert!(task.is_completed());
        assert_eq!(task.created_by_user_id(), Some("u1"));
        assert_eq!(task.completed_by_user_id(), Some("u2"));
        assert_eq!(task.reward_amount(), 50);
    }

    #[test]
    fn test_mark_transitions_keep_invariant() {
        let mut task = Task::new("t1", "Dishes", "c1");
        task.mark_completed(UserRef::new("u2"), Utc::now());
        assert_eq!(task.status(), TaskStatus::Completed);
        assert_eq!(task.progress(), 100);

        task.mark_not_started(Utc::now());
        assert_eq!(task.status(), TaskStatus::NotStarted);
        assert!(task.completed_by().is_none());
        assert_eq!(task.progress(), 0);
    }
}
