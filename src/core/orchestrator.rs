//! 完成编排器：NotStarted ⇄ Completed 状态机
//!
//! 负责：解析任务 / 人员、同一会话单个待决流程的守卫、远端状态更新、乐观缓存变更、
//! 账本记账与汇总刷新。完成与记账有意不做事务绑定：状态一旦被远端接受就保留，
//! 账本失败只通过通知通道上报。远端状态更新失败或本地前置条件不满足时全量重载缓存。

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use chrono::Utc;
use tokio::sync::broadcast;

use crate::core::{
    Notice, RecoveryAction, RecoveryEngine, RewardLedgerClient, SummaryReconciler, TallyError,
    TaskCache,
};
use crate::model::{
    ConversationId, EntryContext, LedgerEntry, PersonId, StatusUpdate, Task, TaskId, TaskStatus,
};
use crate::remote::{Session, TaskStore};

/// 账本一侧的结果（完成本身已生效）
#[derive(Debug)]
pub enum LedgerOutcome {
    Posted(LedgerEntry),
    /// 未尝试提交（无付款方 / 无可冲正的入账）
    Skipped(TallyError),
    /// 远端拒绝
    Failed(TallyError),
}

/// 一次 complete / uncomplete 请求的结果
#[derive(Debug)]
pub enum Transition {
    Applied { task: Task, ledger: LedgerOutcome },
    /// 任务已处于目标状态，什么也没做
    AlreadyInState(TaskStatus),
    /// 同一会话已有待决流程，请求被忽略
    Busy,
}

impl Transition {
    pub fn is_applied(&self) -> bool {
        matches!(self, Self::Applied { .. })
    }

    pub fn ledger_entry(&self) -> Option<&LedgerEntry> {
        match self {
            Self::Applied {
                ledger: LedgerOutcome::Posted(entry),
                ..
            } => Some(entry),
            _ => None,
        }
    }

    pub fn ledger_error(&self) -> Option<&TallyError> {
        match self {
            Self::Applied {
                ledger: LedgerOutcome::Skipped(err) | LedgerOutcome::Failed(err),
                ..
            } => Some(err),
            _ => None,
        }
    }
}

/// 当前这次完成的入账情况，撤销时据此冲正
#[derive(Debug, Clone, PartialEq, Eq)]
enum Settlement {
    Paid {
        payer: PersonId,
        payee: PersonId,
        amount: i64,
        entry_id: Option<String>,
    },
    Unpaid { payee: Option<PersonId> },
}

impl Settlement {
    fn unpaid(payee: &str) -> Self {
        Self::Unpaid {
            payee: Some(payee.to_string()),
        }
    }

    /// 记录仍对应任务当前的创建者与完成者
    fn matches(&self, task: &Task) -> bool {
        match self {
            Self::Paid { payer, payee, .. } => {
                task.created_by_user_id() == Some(payer.as_str())
                    && task.completed_by_user_id() == Some(payee.as_str())
            }
            Self::Unpaid { payee } => task.completed_by_user_id() == payee.as_deref(),
        }
    }
}

/// 会话级待决守卫，drop 时释放
struct PendingGuard<'a> {
    pending: &'a Mutex<HashSet<ConversationId>>,
    conversation_id: ConversationId,
}

impl Drop for PendingGuard<'_> {
    fn drop(&mut self) {
        lock(self.pending).remove(&self.conversation_id);
    }
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

pub struct CompletionOrchestrator {
    cache: Arc<TaskCache>,
    store: Arc<dyn TaskStore>,
    session: Session,
    ledger: RewardLedgerClient,
    summaries: Arc<SummaryReconciler>,
    recovery: RecoveryEngine,
    pending: Mutex<HashSet<ConversationId>>,
    settlements: Mutex<HashMap<TaskId, Settlement>>,
    notices: broadcast::Sender<Notice>,
    refresh_after_transition: bool,
}

impl CompletionOrchestrator {
    pub fn new(
        cache: Arc<TaskCache>,
        store: Arc<dyn TaskStore>,
        session: Session,
        ledger: RewardLedgerClient,
        summaries: Arc<SummaryReconciler>,
        notices: broadcast::Sender<Notice>,
    ) -> Self {
        Self {
            cache,
            store,
            session,
            ledger,
            summaries,
            recovery: RecoveryEngine::new(),
            pending: Mutex::new(HashSet::new()),
            settlements: Mutex::new(HashMap::new()),
            notices,
            refresh_after_transition: true,
        }
    }

    pub fn with_summary_refresh(mut self, enabled: bool) -> Self {
        self.refresh_after_transition = enabled;
        self
    }

    fn try_begin(&self, conversation_id: &str) -> Option<PendingGuard<'_>> {
        let mut pending = lock(&self.pending);
        if !pending.insert(conversation_id.to_string()) {
            return None;
        }
        Some(PendingGuard {
            pending: &self.pending,
            conversation_id: conversation_id.to_string(),
        })
    }

    /// 会话内是否有待决的完成 / 撤销流程
    pub fn is_pending(&self, conversation_id: &str) -> bool {
        lock(&self.pending).contains(conversation_id)
    }

    fn notify(&self, notice: Notice) {
        // 没有订阅者时发送失败，忽略
        let _ = self.notices.send(notice);
    }

    /// 按恢复引擎的建议处理错误：重载或上报
    pub(crate) async fn recover(&self, err: &TallyError) {
        match self.recovery.handle(err) {
            RecoveryAction::Resync => match self.cache.revert_to_remote().await {
                Ok(_) => {
                    self.forget_stale_settlements().await;
                    if let Some(conversation_id) = self.cache.conversation_id().await {
                        self.notify(Notice::Resynced { conversation_id });
                    }
                }
                Err(e) => {
                    tracing::warn!("Resync failed: {}", e);
                    self.notify(Notice::ResyncFailed {
                        message: e.to_string(),
                    });
                }
            },
            RecoveryAction::ReportNonFatal(message) => {
                tracing::warn!("{}", message);
                self.notify(Notice::Problem { message });
            }
            RecoveryAction::Surface => {}
        }
    }

    /// 丢弃与缓存中任务不再对应的入账记录（任务在别处被撤销或换了完成者）。
    /// 不在当前会话里的任务保留记录。
    pub async fn forget_stale_settlements(&self) {
        let active = self.cache.active_tasks().await;
        let completed = self.cache.completed_tasks().await;
        lock(&self.settlements).retain(|task_id, settlement| {
            if active.iter().any(|t| t.id() == task_id) {
                return false;
            }
            completed
                .iter()
                .find(|t| t.id() == task_id)
                .map_or(true, |t| settlement.matches(t))
        });
    }

    fn context(task: &Task) -> EntryContext {
        EntryContext {
            task_id: task.id().to_string(),
            conversation_id: task.conversation_id().to_string(),
            task_title: task.title().to_string(),
        }
    }

    /// 完成任务：远端确认后乐观更新缓存，再由创建者向完成者记一笔正向条目
    pub async fn complete_task(
        &self,
        task_id: &str,
        person_id: &str,
    ) -> Result<Transition, TallyError> {
        let task = self
            .cache
            .task(task_id)
            .await
            .ok_or_else(|| TallyError::not_found("task", task_id))?;
        let person = self
            .cache
            .person(person_id)
            .await
            .ok_or_else(|| TallyError::not_found("person", person_id))?;

        let Some(_guard) = self.try_begin(task.conversation_id()) else {
            tracing::info!(
                "Completion already pending in {}, ignoring {}",
                task.conversation_id(),
                task_id
            );
            return Ok(Transition::Busy);
        };

        let task = self
            .cache
            .task(task_id)
            .await
            .ok_or_else(|| TallyError::not_found("task", task_id))?;
        if task.is_completed() {
            tracing::debug!("Task {} already completed", task_id);
            return Ok(Transition::AlreadyInState(TaskStatus::Completed));
        }

        let reward = task.reward_amount();
        if reward <= 0 {
            return Err(TallyError::InvalidReward {
                task_id: task_id.to_string(),
                amount: reward,
            });
        }

        let remote = match self
            .store
            .update_task_status(&self.session, task_id, &StatusUpdate::completed(person_id))
            .await
        {
            Ok(remote) => remote,
            Err(source) => {
                let err = TallyError::RemoteUpdate {
                    task_id: task_id.to_string(),
                    source,
                };
                self.recover(&err).await;
                return Err(err);
            }
        };

        let visible = if self.cache.is_current(task.conversation_id()).await {
            match self
                .cache
                .apply_optimistic_completion(task_id, &person, Utc::now())
                .await
            {
                Ok(applied) => applied,
                Err(err) => {
                    self.recover(&err).await;
                    remote
                }
            }
        } else {
            tracing::debug!("Conversation switched, completion of {} not applied locally", task_id);
            remote
        };
        tracing::info!("Task {} completed by {}", task_id, person_id);
        self.notify(Notice::TaskCompleted {
            task_id: task_id.to_string(),
            person_id: person_id.to_string(),
        });

        let ledger = match task.created_by_user_id() {
            None => {
                self.record_settlement(task_id, Settlement::unpaid(person_id));
                LedgerOutcome::Skipped(TallyError::MissingPayer {
                    task_id: task_id.to_string(),
                })
            }
            Some(payer) => match self
                .ledger
                .submit_forward(payer, person_id, reward, &Self::context(&task))
                .await
            {
                Ok(entry) => {
                    self.record_settlement(
                        task_id,
                        Settlement::Paid {
                            payer: payer.to_string(),
                            payee: person_id.to_string(),
                            amount: reward,
                            entry_id: entry.id.clone(),
                        },
                    );
                    LedgerOutcome::Posted(entry)
                }
                Err(err) => {
                    self.record_settlement(task_id, Settlement::unpaid(person_id));
                    LedgerOutcome::Failed(err)
                }
            },
        };
        self.finish_ledger(&ledger).await;

        let mut people = vec![person_id.to_string()];
        if let Some(payer) = task.created_by_user_id() {
            people.push(payer.to_string());
        }
        self.refresh_summaries(&people).await;

        Ok(Transition::Applied {
            task: visible,
            ledger,
        })
    }

    /// 撤销完成：先捕获完成时的金额与参与者，再更新远端、回退缓存，用捕获的金额冲正
    pub async fn uncomplete_task(&self, task_id: &str) -> Result<Transition, TallyError> {
        let task = self
            .cache
            .task(task_id)
            .await
            .ok_or_else(|| TallyError::not_found("task", task_id))?;

        let Some(_guard) = self.try_begin(task.conversation_id()) else {
            tracing::info!(
                "Completion already pending in {}, ignoring {}",
                task.conversation_id(),
                task_id
            );
            return Ok(Transition::Busy);
        };

        let task = self
            .cache
            .task(task_id)
            .await
            .ok_or_else(|| TallyError::not_found("task", task_id))?;
        if !task.is_completed() {
            tracing::debug!("Task {} is not completed", task_id);
            return Ok(Transition::AlreadyInState(task.status()));
        }

        let captured = self.capture_settlement(&task)?;

        let remote = match self
            .store
            .update_task_status(&self.session, task_id, &StatusUpdate::not_started())
            .await
        {
            Ok(remote) => remote,
            Err(source) => {
                let err = TallyError::RemoteUpdate {
                    task_id: task_id.to_string(),
                    source,
                };
                self.recover(&err).await;
                return Err(err);
            }
        };

        let visible = if self.cache.is_current(task.conversation_id()).await {
            match self.cache.apply_optimistic_reversal(task_id, Utc::now()).await {
                Ok(applied) => applied,
                Err(err) => {
                    self.recover(&err).await;
                    remote
                }
            }
        } else {
            remote
        };
        lock(&self.settlements).remove(task_id);
        tracing::info!("Task {} reopened", task_id);
        self.notify(Notice::TaskReopened {
            task_id: task_id.to_string(),
        });

        let mut people = Vec::new();
        let ledger = match captured {
            Settlement::Paid {
                payer,
                payee,
                amount,
                entry_id,
            } => {
                people.push(payee.clone());
                people.push(payer.clone());
                match self
                    .ledger
                    .submit_reversal(
                        &payer,
                        &payee,
                        amount,
                        entry_id.as_deref(),
                        &Self::context(&task),
                    )
                    .await
                {
                    Ok(entry) => LedgerOutcome::Posted(entry),
                    Err(err) => LedgerOutcome::Failed(err),
                }
            }
            Settlement::Unpaid { .. } => {
                let err = if task.created_by_user_id().is_none() {
                    TallyError::MissingPayer {
                        task_id: task_id.to_string(),
                    }
                } else {
                    TallyError::Unsettled {
                        task_id: task_id.to_string(),
                    }
                };
                LedgerOutcome::Skipped(err)
            }
        };
        self.finish_ledger(&ledger).await;
        self.refresh_summaries(&people).await;

        Ok(Transition::Applied {
            task: visible,
            ledger,
        })
    }

    fn record_settlement(&self, task_id: &str, settlement: Settlement) {
        lock(&self.settlements).insert(task_id.to_string(), settlement);
    }

    /// 本会话记录的入账优先，但只在它仍对应任务当前的参与者时使用；
    /// 没有记录（如上次启动前完成）或记录已过期，则按当前奖励与参与者推定
    fn capture_settlement(&self, task: &Task) -> Result<Settlement, TallyError> {
        {
            let mut settlements = lock(&self.settlements);
            if let Some(settlement) = settlements.remove(task.id()) {
                if settlement.matches(task) {
                    settlements.insert(task.id().to_string(), settlement.clone());
                    return Ok(settlement);
                }
                tracing::debug!(
                    "Recorded settlement for {} no longer matches its completion",
                    task.id()
                );
            }
        }
        let (Some(payer), Some(payee)) = (task.created_by_user_id(), task.completed_by_user_id())
        else {
            return Ok(Settlement::Unpaid {
                payee: task.completed_by_user_id().map(str::to_string),
            });
        };
        let amount = task.reward_amount();
        if amount <= 0 {
            return Err(TallyError::InvalidReward {
                task_id: task.id().to_string(),
                amount,
            });
        }
        Ok(Settlement::Paid {
            payer: payer.to_string(),
            payee: payee.to_string(),
            amount,
            entry_id: None,
        })
    }

    async fn finish_ledger(&self, outcome: &LedgerOutcome) {
        match outcome {
            LedgerOutcome::Posted(entry) => self.notify(Notice::LedgerPosted {
                task_id: entry.related_task_id().unwrap_or_default().to_string(),
                amount: entry.amount,
            }),
            LedgerOutcome::Skipped(err) | LedgerOutcome::Failed(err) => self.recover(err).await,
        }
    }

    /// 尽力刷新，失败只上报
    async fn refresh_summaries(&self, person_ids: &[PersonId]) {
        if !self.refresh_after_transition || person_ids.is_empty() {
            return;
        }
        let report = self.summaries.refresh_all(person_ids).await;
        for err in &report.failed {
            self.recover(err).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{LedgerDirection, UserRef};
    use crate::remote::InMemoryRemote;

    struct Fixture {
        remote: Arc<InMemoryRemote>,
        cache: Arc<TaskCache>,
        orchestrator: CompletionOrchestrator,
        notices: broadcast::Receiver<Notice>,
    }

    async fn fixture(tasks: Vec<Task>) -> Fixture {
        let remote = Arc::new(InMemoryRemote::with_tasks(tasks));
        let session = Session::new(UserRef::named("p2", "Sam Two"));
        let cache = Arc::new(TaskCache::new(remote.clone(), session.clone()));
        cache.load("c1").await.unwrap();
        let summaries = Arc::new(SummaryReconciler::new(
            remote.clone(),
            session.clone(),
            cache.clone(),
        ));
        let ledger = RewardLedgerClient::new(remote.clone(), session.clone(), "PTS");
        let (tx, notices) = broadcast::channel(32);
        let orchestrator = CompletionOrchestrator::new(
            cache.clone(),
            remote.clone(),
            session,
            ledger,
            summaries,
            tx,
        );
        Fixture {
            remote,
            cache,
            orchestrator,
            notices,
        }
    }

    fn chore(budget: i64) -> Task {
        Task::new("t1", "Dishes", "c1")
            .with_creator(UserRef::named("p1", "Pat One"))
            .with_budget(budget)
    }

    #[tokio::test]
    async fn test_complete_posts_forward_entry() {
        let f = fixture(vec![chore(50)]).await;

        let t = f.orchestrator.complete_task("t1", "p2").await.unwrap();
        let entry = t.ledger_entry().unwrap();
        assert_eq!(entry.direction, LedgerDirection::Forward);
        assert_eq!(entry.from_person_id, "p1");
        assert_eq!(entry.to_person_id, "p2");
        assert_eq!(entry.amount, 50);

        let completed = f.cache.completed_tasks().await;
        assert_eq!(completed[0].completed_by_user_id(), Some("p2"));
        assert!(f.cache.active_tasks().await.is_empty());
    }

    #[tokio::test]
    async fn test_complete_twice_is_idempotent() {
        let f = fixture(vec![chore(50)]).await;

        f.orchestrator.complete_task("t1", "p2").await.unwrap();
        let second = f.orchestrator.complete_task("t1", "p2").await.unwrap();

        assert!(matches!(second, Transition::AlreadyInState(TaskStatus::Completed)));
        assert_eq!(f.remote.calls().update, 1);
        assert_eq!(f.remote.entries_for_task("t1").len(), 1);
    }

    #[tokio::test]
    async fn test_concurrent_request_is_ignored_while_pending() {
        let f = fixture(vec![
            chore(50),
            Task::new("t2", "Trash", "c1")
                .with_creator(UserRef::new("p1"))
                .with_budget(5),
        ])
        .await;

        let (first, second) = tokio::join!(
            f.orchestrator.complete_task("t1", "p2"),
            f.orchestrator.complete_task("t2", "p2"),
        );

        assert!(first.unwrap().is_applied());
        assert!(matches!(second.unwrap(), Transition::Busy));
        assert_eq!(f.remote.calls().update, 1);
        assert!(!f.orchestrator.is_pending("c1"));
    }

    #[tokio::test]
    async fn test_complete_then_uncomplete_sums_to_zero() {
        let f = fixture(vec![chore(50)]).await;

        let done = f.orchestrator.complete_task("t1", "p2").await.unwrap();
        let forward_id = done.ledger_entry().unwrap().id.clone().unwrap();
        let t = f.orchestrator.uncomplete_task("t1").await.unwrap();

        let reversal = t.ledger_entry().unwrap();
        assert_eq!(reversal.direction, LedgerDirection::Reversal);
        assert_eq!(reversal.amount, -50);
        assert_eq!(reversal.from_person_id, "p1");
        assert_eq!(reversal.to_person_id, "p2");
        assert_eq!(
            reversal.notes.as_deref(),
            Some(format!("Reverses entry {}", forward_id).as_str())
        );

        let sum: i64 = f.remote.entries_for_task("t1").iter().map(|e| e.amount).sum();
        assert_eq!(sum, 0);
        let active = f.cache.active_tasks().await;
        assert_eq!(active[0].id(), "t1");
        assert!(active[0].completed_by().is_none());
    }

    #[tokio::test]
    async fn test_reversal_uses_amount_captured_at_completion() {
        let f = fixture(vec![chore(50)]).await;

        f.orchestrator.complete_task("t1", "p2").await.unwrap();
        f.remote.set_budget("t1", Some(80));
        f.cache.revert_to_remote().await.unwrap();

        let t = f.orchestrator.uncomplete_task("t1").await.unwrap();
        assert_eq!(t.ledger_entry().unwrap().amount, -50);
    }

    #[tokio::test]
    async fn test_missing_payer_completes_without_entry() {
        let f = fixture(vec![Task::new("t1", "Dishes", "c1")
            .with_assignee(UserRef::new("p3"))
            .with_budget(10)])
        .await;
        let mut notices = f.notices;

        let t = f.orchestrator.complete_task("t1", "p2").await.unwrap();

        assert!(matches!(t.ledger_error(), Some(TallyError::MissingPayer { .. })));
        assert!(f.cache.completed_tasks().await[0].is_completed());
        assert!(f.remote.ledger_entries().is_empty());

        let mut saw_problem = false;
        while let Ok(notice) = notices.try_recv() {
            if matches!(notice, Notice::Problem { .. }) {
                saw_problem = true;
            }
        }
        assert!(saw_problem);
    }

    #[tokio::test]
    async fn test_remote_update_failure_leaves_cache_untouched() {
        let f = fixture(vec![chore(50)]).await;
        f.remote.fail_update(true);

        let err = f.orchestrator.complete_task("t1", "p2").await.unwrap_err();

        assert!(matches!(err, TallyError::RemoteUpdate { .. }));
        assert_eq!(f.cache.active_tasks().await[0].id(), "t1");
        assert!(f.remote.ledger_entries().is_empty());
        // 失败后全量重载
        assert_eq!(f.remote.calls().fetch, 2);
    }

    #[tokio::test]
    async fn test_ledger_failure_keeps_completion() {
        let f = fixture(vec![chore(50)]).await;
        f.remote.fail_ledger(true);

        let t = f.orchestrator.complete_task("t1", "p2").await.unwrap();
        assert!(matches!(t.ledger_error(), Some(TallyError::LedgerSubmission { .. })));
        assert!(f.cache.completed_tasks().await[0].is_completed());

        // 未入账的完成被撤销时不冲正
        f.remote.fail_ledger(false);
        let t = f.orchestrator.uncomplete_task("t1").await.unwrap();
        assert!(matches!(t.ledger_error(), Some(TallyError::Unsettled { .. })));
        assert!(f.remote.ledger_entries().is_empty());
    }

    #[tokio::test]
    async fn test_invalid_reward_aborts_before_remote_call() {
        let f = fixture(vec![Task::new("t1", "Free", "c1").with_creator(UserRef::new("p1"))]).await;

        let err = f.orchestrator.complete_task("t1", "p2").await.unwrap_err();
        assert!(matches!(err, TallyError::InvalidReward { amount: 0, .. }));
        assert_eq!(f.remote.calls().update, 0);
    }

    #[tokio::test]
    async fn test_not_found_does_not_mutate() {
        let f = fixture(vec![chore(50)]).await;

        let err = f.orchestrator.complete_task("t9", "p2").await.unwrap_err();
        assert!(matches!(err, TallyError::NotFound { kind: "task", .. }));
        let err = f.orchestrator.complete_task("t1", "ghost").await.unwrap_err();
        assert!(matches!(err, TallyError::NotFound { kind: "person", .. }));
        assert_eq!(f.remote.calls().update, 0);
        assert_eq!(f.cache.active_tasks().await.len(), 1);
    }

    #[tokio::test]
    async fn test_uncomplete_not_started_is_noop() {
        let f = fixture(vec![chore(50)]).await;

        let t = f.orchestrator.uncomplete_task("t1").await.unwrap();
        assert!(matches!(t, Transition::AlreadyInState(TaskStatus::NotStarted)));
        assert_eq!(f.remote.calls().update, 0);
    }

    #[tokio::test]
    async fn test_uncomplete_task_completed_in_earlier_session() {
        let f = fixture(vec![chore(20).completed(UserRef::new("p3"), Utc::now())]).await;

        let t = f.orchestrator.uncomplete_task("t1").await.unwrap();
        let entry = t.ledger_entry().unwrap();
        assert_eq!(entry.amount, -20);
        assert_eq!(entry.to_person_id, "p3");
    }

    fn second_conversation() -> Task {
        Task::new("t9", "Sweep", "c2")
            .with_creator(UserRef::new("p1"))
            .with_budget(5)
    }

    fn drain(notices: &mut broadcast::Receiver<Notice>) -> Vec<Notice> {
        let mut seen = Vec::new();
        while let Ok(notice) = notices.try_recv() {
            seen.push(notice);
        }
        seen
    }

    #[tokio::test]
    async fn test_reversal_follows_current_completer_after_reload() {
        let f = fixture(vec![chore(50)]).await;
        f.orchestrator.complete_task("t1", "p2").await.unwrap();

        // 别处撤销后改由 p3 完成，预算同时改为 30
        f.remote
            .upsert_task(chore(30).completed(UserRef::new("p3"), Utc::now()));
        f.cache.revert_to_remote().await.unwrap();
        assert_eq!(f.cache.task("t1").await.unwrap().completed_by_user_id(), Some("p3"));

        let t = f.orchestrator.uncomplete_task("t1").await.unwrap();
        let reversal = t.ledger_entry().unwrap();
        assert_eq!(reversal.from_person_id, "p1");
        assert_eq!(reversal.to_person_id, "p3");
        assert_eq!(reversal.amount, -30);
        assert!(reversal.notes.is_none());
    }

    #[tokio::test]
    async fn test_reload_forgets_settlement_of_task_reopened_elsewhere() {
        let f = fixture(vec![chore(50)]).await;
        f.orchestrator.complete_task("t1", "p2").await.unwrap();

        f.remote.upsert_task(chore(80));
        f.cache.revert_to_remote().await.unwrap();
        f.orchestrator.forget_stale_settlements().await;

        // 同一对参与者再次完成，奖励已不同
        f.remote
            .upsert_task(chore(80).completed(UserRef::named("p2", "Sam Two"), Utc::now()));
        f.cache.revert_to_remote().await.unwrap();

        let t = f.orchestrator.uncomplete_task("t1").await.unwrap();
        assert_eq!(t.ledger_entry().unwrap().amount, -80);
    }

    #[tokio::test]
    async fn test_uncomplete_remote_failure_keeps_completion() {
        let f = fixture(vec![chore(50)]).await;
        let mut notices = f.notices;
        f.orchestrator.complete_task("t1", "p2").await.unwrap();
        drain(&mut notices);

        f.remote.fail_update(true);
        let err = f.orchestrator.uncomplete_task("t1").await.unwrap_err();

        assert!(matches!(err, TallyError::RemoteUpdate { .. }));
        let completed = f.cache.completed_tasks().await;
        assert_eq!(completed[0].completed_by_user_id(), Some("p2"));
        assert_eq!(f.remote.entries_for_task("t1").len(), 1);
        assert_eq!(f.remote.calls().fetch, 2);
        assert!(drain(&mut notices)
            .iter()
            .any(|n| matches!(n, Notice::Resynced { .. })));

        // 重载后入账记录仍有效，恢复后按原金额冲正
        f.remote.fail_update(false);
        let t = f.orchestrator.uncomplete_task("t1").await.unwrap();
        assert_eq!(t.ledger_entry().unwrap().amount, -50);
    }

    #[tokio::test]
    async fn test_rejected_reversal_keeps_reopen() {
        let f = fixture(vec![chore(50)]).await;
        f.orchestrator.complete_task("t1", "p2").await.unwrap();
        f.remote.fail_ledger(true);

        let t = f.orchestrator.uncomplete_task("t1").await.unwrap();

        assert!(matches!(t.ledger_error(), Some(TallyError::LedgerSubmission { .. })));
        match &t {
            Transition::Applied { task, .. } => assert_eq!(task.status(), TaskStatus::NotStarted),
            other => panic!("Expected applied reopen, got {:?}", other),
        }
        assert_eq!(f.cache.active_tasks().await[0].id(), "t1");
        assert_eq!(f.remote.task("t1").unwrap().status(), TaskStatus::NotStarted);
        assert_eq!(f.remote.entries_for_task("t1").len(), 1);
    }

    #[tokio::test]
    async fn test_completion_commits_when_conversation_switches_mid_flight() {
        let f = fixture(vec![chore(50), second_conversation()]).await;

        let (done, loaded) = tokio::join!(
            f.orchestrator.complete_task("t1", "p2"),
            f.cache.load("c2"),
        );

        assert!(matches!(loaded.unwrap(), crate::core::LoadOutcome::Loaded { .. }));
        match done.unwrap() {
            Transition::Applied {
                task,
                ledger: LedgerOutcome::Posted(entry),
            } => {
                assert!(task.is_completed());
                assert_eq!(entry.amount, 50);
            }
            other => panic!("Expected applied completion, got {:?}", other),
        }
        assert!(f.remote.task("t1").unwrap().is_completed());
        let active: Vec<String> = f
            .cache
            .active_tasks()
            .await
            .iter()
            .map(|t| t.id().to_string())
            .collect();
        assert_eq!(active, vec!["t9".to_string()]);
        assert!(f.cache.completed_tasks().await.is_empty());
    }

    #[tokio::test]
    async fn test_reopen_commits_when_conversation_switches_mid_flight() {
        let f = fixture(vec![chore(50), second_conversation()]).await;
        f.orchestrator.complete_task("t1", "p2").await.unwrap();

        let (undone, loaded) = tokio::join!(
            f.orchestrator.uncomplete_task("t1"),
            f.cache.load("c2"),
        );

        assert!(loaded.is_ok());
        let undone = undone.unwrap();
        assert_eq!(undone.ledger_entry().unwrap().amount, -50);
        assert_eq!(f.remote.task("t1").unwrap().status(), TaskStatus::NotStarted);
        assert!(f.cache.task("t1").await.is_none());
        let sum: i64 = f.remote.entries_for_task("t1").iter().map(|e| e.amount).sum();
        assert_eq!(sum, 0);
    }

    #[tokio::test]
    async fn test_failed_resync_is_reported() {
        let f = fixture(vec![chore(50)]).await;
        let mut notices = f.notices;
        f.remote.fail_update(true);
        f.remote.fail_fetch(true);

        let err = f.orchestrator.complete_task("t1", "p2").await.unwrap_err();

        assert!(matches!(err, TallyError::RemoteUpdate { .. }));
        assert!(drain(&mut notices)
            .iter()
            .any(|n| matches!(n, Notice::ResyncFailed { .. })));
        assert!(f.cache.active_tasks().await.is_empty());
    }
}
