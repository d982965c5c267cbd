//! 内存远端（用于测试与未配置 base_url 时的本地运行）
//!
//! 同时实现 TaskStore / LedgerApi / SummaryApi；可注入故障并统计调用次数。
//! 每个调用先让出一次执行权，模拟网络挂起点，使并发场景在单线程运行时下可复现。

use std::collections::{HashMap, HashSet};
use std::sync::{Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use chrono::Utc;

use crate::model::{
    LedgerEntry, PersonEarningsSummary, PersonId, StatusUpdate, Task, TaskStatus, UserRef,
};
use crate::remote::{LedgerApi, RemoteError, Session, SummaryApi, TaskStore};

/// 各接口调用次数
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct CallCounts {
    pub fetch: usize,
    pub update: usize,
    pub ledger: usize,
    pub summary: usize,
}

#[derive(Debug, Default)]
struct Faults {
    fetch: bool,
    update: bool,
    ledger: bool,
    summary: HashSet<PersonId>,
}

#[derive(Debug, Default)]
struct Inner {
    tasks: Vec<Task>,
    ledger: Vec<LedgerEntry>,
    summaries: HashMap<PersonId, PersonEarningsSummary>,
    faults: Faults,
    calls: CallCounts,
}

#[derive(Debug, Default)]
pub struct InMemoryRemote {
    inner: Mutex<Inner>,
}

impl InMemoryRemote {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_tasks(tasks: impl IntoIterator<Item = Task>) -> Self {
        let remote = Self::new();
        for task in tasks {
            remote.upsert_task(task);
        }
        remote
    }

    fn inner(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn upsert_task(&self, task: Task) {
        let mut inner = self.inner();
        match inner.tasks.iter_mut().find(|t| t.id() == task.id()) {
            Some(existing) => *existing = task,
            None => inner.tasks.push(task),
        }
    }

    /// 远端直接修改预算（模拟别处的编辑）
    pub fn set_budget(&self, task_id: &str, budget: Option<i64>) {
        if let Some(task) = self.inner().tasks.iter_mut().find(|t| t.id() == task_id) {
            task.set_budget(budget);
        }
    }

    pub fn task(&self, task_id: &str) -> Option<Task> {
        self.inner().tasks.iter().find(|t| t.id() == task_id).cloned()
    }

    /// 固定某人的汇总（否则由已提交的账本条目聚合）
    pub fn set_summary(&self, summary: PersonEarningsSummary) {
        self.inner()
            .summaries
            .insert(summary.person_id.clone(), summary);
    }

    pub fn fail_fetch(&self, fail: bool) {
        self.inner().faults.fetch = fail;
    }

    pub fn fail_update(&self, fail: bool) {
        self.inner().faults.update = fail;
    }

    pub fn fail_ledger(&self, fail: bool) {
        self.inner().faults.ledger = fail;
    }

    pub fn fail_summary_for(&self, person_id: &str) {
        self.inner().faults.summary.insert(person_id.to_string());
    }

    pub fn ledger_entries(&self) -> Vec<LedgerEntry> {
        self.inner().ledger.clone()
    }

    pub fn entries_for_task(&self, task_id: &str) -> Vec<LedgerEntry> {
        self.inner()
            .ledger
            .iter()
            .filter(|e| e.related_task_id() == Some(task_id))
            .cloned()
            .collect()
    }

    pub fn calls(&self) -> CallCounts {
        self.inner().calls
    }

    fn user_ref(tasks: &[Task], id: &str) -> UserRef {
        tasks
            .iter()
            .flat_map(|t| [t.created_by(), t.assigned_to(), t.completed_by()])
            .flatten()
            .find(|u| u.id == id && u.name.is_some())
            .cloned()
            .unwrap_or_else(|| UserRef::new(id))
    }
}

#[async_trait]
impl TaskStore for InMemoryRemote {
    async fn fetch_tasks(
        &self,
        _session: &Session,
        conversation_id: &str,
    ) -> Result<Vec<Task>, RemoteError> {
        tokio::task::yield_now().await;
        let mut inner = self.inner();
        inner.calls.fetch += 1;
        if inner.faults.fetch {
            return Err(RemoteError::Unavailable("task store offline".into()));
        }
        Ok(inner
            .tasks
            .iter()
            .filter(|t| t.conversation_id() == conversation_id)
            .cloned()
            .collect())
    }

    async fn update_task_status(
        &self,
        _session: &Session,
        task_id: &str,
        update: &StatusUpdate,
    ) -> Result<Task, RemoteError> {
        tokio::task::yield_now().await;
        let mut inner = self.inner();
        inner.calls.update += 1;
        if inner.faults.update {
            return Err(RemoteError::Status {
                status: 503,
                body: "update rejected".into(),
            });
        }
        let completer = update
            .completed_by_user_id
            .as_deref()
            .map(|id| Self::user_ref(&inner.tasks, id));
        let task = inner
            .tasks
            .iter_mut()
            .find(|t| t.id() == task_id)
            .ok_or_else(|| RemoteError::Status {
                status: 404,
                body: format!("task {} not found", task_id),
            })?;
        match (update.status, completer) {
            (TaskStatus::Completed, Some(by)) => task.mark_completed(by, Utc::now()),
            (TaskStatus::Completed, None) => {
                return Err(RemoteError::Status {
                    status: 422,
                    body: "completed_by_user_id required".into(),
                })
            }
            _ => task.mark_not_started(Utc::now()),
        }
        Ok(task.clone())
    }
}

#[async_trait]
impl LedgerApi for InMemoryRemote {
    async fn submit_ledger_entry(
        &self,
        _session: &Session,
        entry: &LedgerEntry,
    ) -> Result<LedgerEntry, RemoteError> {
        tokio::task::yield_now().await;
        let mut inner = self.inner();
        inner.calls.ledger += 1;
        if inner.faults.ledger {
            return Err(RemoteError::Unavailable("ledger offline".into()));
        }
        let mut stored = entry.clone();
        stored.id = Some(format!("entry_{}", inner.ledger.len() + 1));
        stored.created_at = Some(Utc::now());
        inner.ledger.push(stored.clone());
        Ok(stored)
    }
}

#[async_trait]
impl SummaryApi for InMemoryRemote {
    async fn fetch_person_summary(
        &self,
        _session: &Session,
        person_id: &str,
    ) -> Result<PersonEarningsSummary, RemoteError> {
        tokio::task::yield_now().await;
        let mut inner = self.inner();
        inner.calls.summary += 1;
        if inner.faults.summary.contains(person_id) {
            return Err(RemoteError::Unavailable(format!(
                "summary for {} unavailable",
                person_id
            )));
        }
        if let Some(summary) = inner.summaries.get(person_id) {
            return Ok(summary.clone());
        }
        let mut summary = PersonEarningsSummary::empty(person_id);
        for entry in inner.ledger.iter().filter(|e| e.to_person_id == person_id) {
            let date = entry.created_at.unwrap_or_else(Utc::now).date_naive();
            summary.record(date, entry.amount);
        }
        Ok(summary)
    }
}
