//! 任务缓存：单个会话的进行中 / 已完成任务与人员列表
//!
//! 渲染的唯一数据源。加载时整体替换；切换会话后迟到的旧响应按会话 + 代数丢弃。
//! 读写锁从不跨远端调用持有。

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::RwLock;

use crate::core::TallyError;
use crate::model::{derive_people, ColorBook, ConversationId, Person, Task, TaskStatus};
use crate::remote::{Session, TaskStore};

/// load 的结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadOutcome {
    Loaded { active: usize, completed: usize },
    /// 响应返回时已切换到别的会话或有更新的加载，已丢弃
    Stale,
}

#[derive(Debug, Default)]
struct CacheState {
    conversation_id: Option<ConversationId>,
    generation: u64,
    active: Vec<Task>,
    completed: Vec<Task>,
    people: Vec<Person>,
    colors: ColorBook,
}

impl CacheState {
    fn is_current(&self, conversation_id: &str, generation: u64) -> bool {
        self.generation == generation && self.conversation_id.as_deref() == Some(conversation_id)
    }

    fn clear(&mut self) {
        self.active.clear();
        self.completed.clear();
        self.people.clear();
    }

    fn replace(&mut self, tasks: Vec<Task>, session: &Session) {
        let people = derive_people(session.user(), &tasks, &mut self.colors);
        let (completed, active): (Vec<Task>, Vec<Task>) =
            tasks.into_iter().partition(|t| t.status() == TaskStatus::Completed);
        self.active = active;
        self.completed = completed;
        self.people = people;
    }

    fn find(&self, task_id: &str) -> Option<&Task> {
        self.active
            .iter()
            .chain(self.completed.iter())
            .find(|t| t.id() == task_id)
    }
}

pub struct TaskCache {
    store: Arc<dyn TaskStore>,
    session: Session,
    state: RwLock<CacheState>,
}

impl TaskCache {
    pub fn new(store: Arc<dyn TaskStore>, session: Session) -> Self {
        Self {
            store,
            session,
            state: RwLock::new(CacheState::default()),
        }
    }

    /// 选中会话并拉取任务，成功后整体替换两个集合与人员列表；失败时清空，不保留旧数据
    pub async fn load(&self, conversation_id: &str) -> Result<LoadOutcome, TallyError> {
        let generation = {
            let mut state = self.state.write().await;
            state.generation += 1;
            state.conversation_id = Some(conversation_id.to_string());
            state.generation
        };

        let fetched = self.store.fetch_tasks(&self.session, conversation_id).await;

        let mut state = self.state.write().await;
        if !state.is_current(conversation_id, generation) {
            tracing::debug!(
                "Discarding stale task list for {} (generation {})",
                conversation_id,
                generation
            );
            return Ok(LoadOutcome::Stale);
        }

        match fetched {
            Ok(tasks) => {
                let (tasks, foreign): (Vec<Task>, Vec<Task>) = tasks
                    .into_iter()
                    .partition(|t| t.conversation_id() == conversation_id);
                if !foreign.is_empty() {
                    tracing::warn!(
                        "Dropped {} tasks not belonging to conversation {}",
                        foreign.len(),
                        conversation_id
                    );
                }
                state.replace(tasks, &self.session);
                tracing::debug!(
                    "Loaded conversation {}: {} active, {} completed, {} people",
                    conversation_id,
                    state.active.len(),
                    state.completed.len(),
                    state.people.len()
                );
                Ok(LoadOutcome::Loaded {
                    active: state.active.len(),
                    completed: state.completed.len(),
                })
            }
            Err(source) => {
                state.clear();
                tracing::warn!("Task fetch failed for {}: {}", conversation_id, source);
                Err(TallyError::Fetch {
                    conversation_id: conversation_id.to_string(),
                    source,
                })
            }
        }
    }

    /// 丢弃乐观状态，重新加载当前会话
    pub async fn revert_to_remote(&self) -> Result<LoadOutcome, TallyError> {
        let conversation_id = self
            .conversation_id()
            .await
            .ok_or_else(|| TallyError::StateViolation("no conversation selected".into()))?;
        tracing::info!("Resyncing conversation {} from task store", conversation_id);
        self.load(&conversation_id).await
    }

    /// 进行中 → 已完成；任务必须在进行中集合里
    pub async fn apply_optimistic_completion(
        &self,
        task_id: &str,
        person: &Person,
        at: DateTime<Utc>,
    ) -> Result<Task, TallyError> {
        let mut state = self.state.write().await;
        let idx = state
            .active
            .iter()
            .position(|t| t.id() == task_id)
            .ok_or_else(|| TallyError::StateViolation(format!("task {} is not active", task_id)))?;
        let mut task = state.active.remove(idx);
        task.mark_completed(person.to_user_ref(), at);
        state.completed.insert(0, task.clone());
        Ok(task)
    }

    /// 已完成 → 进行中，清除完成者
    pub async fn apply_optimistic_reversal(
        &self,
        task_id: &str,
        at: DateTime<Utc>,
    ) -> Result<Task, TallyError> {
        let mut state = self.state.write().await;
        let idx = state
            .completed
            .iter()
            .position(|t| t.id() == task_id)
            .ok_or_else(|| {
                TallyError::StateViolation(format!("task {} is not completed", task_id))
            })?;
        let mut task = state.completed.remove(idx);
        task.mark_not_started(at);
        state.active.insert(0, task.clone());
        Ok(task)
    }

    pub async fn conversation_id(&self) -> Option<ConversationId> {
        self.state.read().await.conversation_id.clone()
    }

    pub async fn is_current(&self, conversation_id: &str) -> bool {
        self.state.read().await.conversation_id.as_deref() == Some(conversation_id)
    }

    pub async fn active_tasks(&self) -> Vec<Task> {
        self.state.read().await.active.clone()
    }

    pub async fn completed_tasks(&self) -> Vec<Task> {
        self.state.read().await.completed.clone()
    }

    pub async fn people(&self) -> Vec<Person> {
        self.state.read().await.people.clone()
    }

    pub async fn task(&self, task_id: &str) -> Option<Task> {
        self.state.read().await.find(task_id).cloned()
    }

    pub async fn person(&self, person_id: &str) -> Option<Person> {
        self.state
            .read()
            .await
            .people
            .iter()
            .find(|p| p.id == person_id)
            .cloned()
    }

    /// 某人完成的任务（用于本地收益估算）
    pub async fn completed_by(&self, person_id: &str) -> Vec<Task> {
        self.state
            .read()
            .await
            .completed
            .iter()
            .filter(|t| t.completed_by_user_id() == Some(person_id))
            .cloned()
            .collect()
    }
}
