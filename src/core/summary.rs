//! 收益汇总对账
//!
//! refresh_all 逐人独立拉取远端汇总，单人失败不影响其他人（记录缺口，保留此人上一次的汇总）；
//! 每次成功都整体替换，不做增量修补。没有远端汇总时用缓存中已完成任务的奖励估算。

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use chrono::{Datelike, NaiveDate, Utc};
use futures_util::future::join_all;
use serde::Serialize;
use tokio::sync::RwLock;

use crate::core::{TallyError, TaskCache};
use crate::model::{PersonEarningsSummary, PersonId};
use crate::remote::{Session, SummaryApi};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ProgressSource {
    Remote,
    LocalEstimate,
}

/// 带符号的周期合计（净额视图）
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct NetTotals {
    pub daily: i64,
    pub weekly: i64,
    pub monthly: i64,
    pub lifetime: i64,
}

/// 进度条使用的幅度（绝对值），同时保留净额
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Progress {
    pub daily: u64,
    pub weekly: u64,
    pub monthly: u64,
    pub lifetime: u64,
    pub net: NetTotals,
    pub source: ProgressSource,
}

impl Progress {
    fn from_net(net: NetTotals, source: ProgressSource) -> Self {
        Self {
            daily: net.daily.unsigned_abs(),
            weekly: net.weekly.unsigned_abs(),
            monthly: net.monthly.unsigned_abs(),
            lifetime: net.lifetime.unsigned_abs(),
            net,
            source,
        }
    }
}

/// 一次 refresh_all 的结果
#[derive(Debug, Default)]
pub struct RefreshReport {
    pub refreshed: Vec<PersonId>,
    pub failed: Vec<TallyError>,
}

impl RefreshReport {
    pub fn is_complete(&self) -> bool {
        self.failed.is_empty()
    }
}

pub struct SummaryReconciler {
    api: Arc<dyn SummaryApi>,
    session: Session,
    cache: Arc<TaskCache>,
    summaries: RwLock<HashMap<PersonId, PersonEarningsSummary>>,
}

impl SummaryReconciler {
    pub fn new(api: Arc<dyn SummaryApi>, session: Session, cache: Arc<TaskCache>) -> Self {
        Self {
            api,
            session,
            cache,
            summaries: RwLock::new(HashMap::new()),
        }
    }

    /// 并发拉取每个人的汇总；失败的人保留旧值并记入报告
    pub async fn refresh_all(&self, person_ids: &[PersonId]) -> RefreshReport {
        let mut seen = HashSet::new();
        let ids: Vec<&PersonId> = person_ids.iter().filter(|id| seen.insert(*id)).collect();

        let results = join_all(ids.iter().map(|id| async move {
            let result = self.api.fetch_person_summary(&self.session, id).await;
            ((*id).clone(), result)
        }))
        .await;

        let mut report = RefreshReport::default();
        let mut summaries = self.summaries.write().await;
        for (person_id, result) in results {
            match result {
                Ok(summary) => {
                    summaries.insert(person_id.clone(), summary);
                    report.refreshed.push(person_id);
                }
                Err(source) => {
                    tracing::warn!("Summary refresh failed for {}: {}", person_id, source);
                    report.failed.push(TallyError::SummaryRefresh { person_id, source });
                }
            }
        }
        report
    }

    pub async fn summary(&self, person_id: &str) -> Option<PersonEarningsSummary> {
        self.summaries.read().await.get(person_id).cloned()
    }

    /// 以今天为基准的进度
    pub async fn progress(&self, person_id: &str) -> Progress {
        self.derive_progress(person_id, Utc::now().date_naive()).await
    }

    /// 有远端汇总时取对应日 / 周 / 月桶，否则按缓存中此人完成的任务奖励估算
    pub async fn derive_progress(&self, person_id: &str, today: NaiveDate) -> Progress {
        if let Some(summary) = self.summaries.read().await.get(person_id) {
            let net = NetTotals {
                daily: summary.day_total(today),
                weekly: summary.week_total(today),
                monthly: summary.month_total(today),
                lifetime: summary.lifetime,
            };
            return Progress::from_net(net, ProgressSource::Remote);
        }

        let mut net = NetTotals::default();
        for task in self.cache.completed_by(person_id).await {
            let reward = task.reward_amount();
            let date = task.updated_at().date_naive();
            net.lifetime += reward;
            if date == today {
                net.daily += reward;
            }
            if date.iso_week() == today.iso_week() {
                net.weekly += reward;
            }
            if date.year() == today.year() && date.month() == today.month() {
                net.monthly += reward;
            }
        }
        Progress::from_net(net, ProgressSource::LocalEstimate)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    use crate::model::{Task, UserRef};
    use crate::remote::InMemoryRemote;

    fn session() -> Session {
        Session::new(UserRef::new("me"))
    }

    fn day(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    async fn setup(remote: Arc<InMemoryRemote>) -> SummaryReconciler {
        let cache = Arc::new(TaskCache::new(remote.clone(), session()));
        cache.load("c1").await.unwrap();
        SummaryReconciler::new(remote, session(), cache)
    }

    fn completed_tasks() -> Vec<Task> {
        let at = |d: u32| Utc.with_ymd_and_hms(2026, 10, d, 9, 0, 0).unwrap();
        vec![
            Task::new("t1", "Dishes", "c1")
                .with_creator(UserRef::new("p1"))
                .with_budget(50)
                .completed(UserRef::new("p2"), at(16)),
            Task::new("t2", "Laundry", "c1")
                .with_creator(UserRef::new("p1"))
                .with_estimated_minutes(25)
                .completed(UserRef::new("p2"), at(2)),
            Task::new("t3", "Trash", "c1")
                .with_creator(UserRef::new("p2"))
                .with_budget(7)
                .completed(UserRef::new("p1"), at(16)),
        ]
    }

    #[tokio::test]
    async fn test_fallback_sums_completed_rewards() {
        let remote = Arc::new(InMemoryRemote::with_tasks(completed_tasks()));
        let reconciler = setup(remote).await;

        let progress = reconciler.derive_progress("p2", day(2026, 10, 16)).await;
        assert_eq!(progress.source, ProgressSource::LocalEstimate);
        assert_eq!(progress.lifetime, 53);
        assert_eq!(progress.daily, 50);
        assert_eq!(progress.monthly, 53);
        // 10-02 与 10-16 不在同一 ISO 周
        assert_eq!(progress.weekly, 50);
    }

    #[tokio::test]
    async fn test_fallback_for_unknown_person_is_zero_not_absent() {
        let remote = Arc::new(InMemoryRemote::with_tasks(completed_tasks()));
        let reconciler = setup(remote).await;

        let progress = reconciler.derive_progress("nobody", day(2026, 10, 16)).await;
        assert_eq!(progress.lifetime, 0);
        assert_eq!(progress.source, ProgressSource::LocalEstimate);
    }

    #[tokio::test]
    async fn test_remote_summary_wins_and_keeps_sign() {
        let remote = Arc::new(InMemoryRemote::with_tasks(completed_tasks()));
        let today = day(2026, 10, 16);
        let mut summary = PersonEarningsSummary::empty("p2");
        summary.record(today, 20);
        summary.record(today, -50);
        remote.set_summary(summary);
        let reconciler = setup(remote).await;

        let report = reconciler.refresh_all(&["p2".to_string()]).await;
        assert!(report.is_complete());

        let progress = reconciler.derive_progress("p2", today).await;
        assert_eq!(progress.source, ProgressSource::Remote);
        assert_eq!(progress.daily, 30);
        assert_eq!(progress.net.daily, -30);
        assert_eq!(progress.net.lifetime, -30);
    }

    #[tokio::test]
    async fn test_one_failure_does_not_block_others() {
        let remote = Arc::new(InMemoryRemote::with_tasks(completed_tasks()));
        remote.fail_summary_for("p1");
        let reconciler = setup(remote.clone()).await;

        let ids = vec!["p1".to_string(), "p2".to_string(), "p2".to_string()];
        let report = reconciler.refresh_all(&ids).await;

        assert_eq!(report.refreshed, vec!["p2".to_string()]);
        assert_eq!(report.failed.len(), 1);
        assert!(reconciler.summary("p1").await.is_none());
        assert!(reconciler.summary("p2").await.is_some());
        // 重复 id 只拉一次
        assert_eq!(remote.calls().summary, 2);
    }
}
