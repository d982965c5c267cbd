//! 账本条目（只产生、不持有）
//!
//! 正向条目 `send` 金额为正，冲正条目 `unsend` 金额为负；条目一经提交不再修改，冲正总是新条目。
//! 关联任务 id 放在 metadata 里，不写入远端账本带类型的关联列。

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::model::{ConversationId, ModelError, PersonId, TaskId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum LedgerDirection {
    #[serde(rename = "send")]
    Forward,
    #[serde(rename = "unsend")]
    Reversal,
}

impl LedgerDirection {
    pub fn tag(&self) -> &'static str {
        match self {
            Self::Forward => "send",
            Self::Reversal => "unsend",
        }
    }

    /// 按方向给金额加符号
    pub fn signed(&self, magnitude: i64) -> i64 {
        match self {
            Self::Forward => magnitude,
            Self::Reversal => -magnitude,
        }
    }
}

/// 条目关联的任务上下文
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntryContext {
    pub task_id: TaskId,
    pub conversation_id: ConversationId,
    pub task_title: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LedgerEntry {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub direction: LedgerDirection,
    pub from_person_id: PersonId,
    pub to_person_id: PersonId,
    pub amount: i64,
    pub currency: String,
    pub description: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
    #[serde(default)]
    pub metadata: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
}

impl LedgerEntry {
    /// 构造条目；magnitude 必须为正，符号由方向决定
    pub fn new(
        direction: LedgerDirection,
        from: impl Into<PersonId>,
        to: impl Into<PersonId>,
        magnitude: i64,
        currency: impl Into<String>,
        context: &EntryContext,
    ) -> Result<Self, ModelError> {
        if magnitude <= 0 {
            return Err(ModelError::NonPositiveAmount(magnitude));
        }
        let description = match direction {
            LedgerDirection::Forward => format!("Reward for \"{}\"", context.task_title),
            LedgerDirection::Reversal => {
                format!("Reversal of reward for \"{}\"", context.task_title)
            }
        };
        Ok(Self {
            id: None,
            direction,
            from_person_id: from.into(),
            to_person_id: to.into(),
            amount: direction.signed(magnitude),
            currency: currency.into(),
            description,
            notes: None,
            metadata: json!({
                "related_task_id": context.task_id,
                "conversation_id": context.conversation_id,
                "task_title": context.task_title,
                "client_ref": uuid::Uuid::new_v4().to_string(),
            }),
            created_at: None,
        })
    }

    pub fn with_notes(mut self, notes: impl Into<String>) -> Self {
        self.notes = Some(notes.into());
        self
    }

    pub fn related_task_id(&self) -> Option<&str> {
        self.metadata.get("related_task_id").and_then(Value::as_str)
    }
}
