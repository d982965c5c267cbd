//! 任务看板：供 UI 调用的门面
//!
//! 组装 TaskCache / CompletionOrchestrator / SummaryReconciler，对外暴露
//! active_tasks / completed_tasks / people / progress / complete_task / uncomplete_task。
//! `spawn_board` 建立 cmd / state / notice 三通道，在后台任务中消费 UI 命令。

use std::sync::Arc;

use tokio::sync::{broadcast, mpsc, watch};

use crate::config::AppConfig;
use crate::core::{
    BoardState, CompletionOrchestrator, LoadOutcome, Notice, PersonProgress, Progress,
    RewardLedgerClient, SummaryReconciler, TallyError, TaskCache, Transition,
};
use crate::model::{Person, PersonId, Task};
use crate::remote::{RemoteHandles, Session};

/// 看板参数（来自 [app] / [summary] 段）
#[derive(Debug, Clone)]
pub struct BoardSettings {
    pub currency: String,
    pub refresh_after_transition: bool,
}

impl Default for BoardSettings {
    fn default() -> Self {
        Self {
            currency: "PTS".to_string(),
            refresh_after_transition: true,
        }
    }
}

impl From<&AppConfig> for BoardSettings {
    fn from(cfg: &AppConfig) -> Self {
        Self {
            currency: cfg.app.currency.clone(),
            refresh_after_transition: cfg.summary.refresh_after_transition,
        }
    }
}

pub struct TaskBoard {
    cache: Arc<TaskCache>,
    orchestrator: CompletionOrchestrator,
    summaries: Arc<SummaryReconciler>,
    notices: broadcast::Sender<Notice>,
}

impl TaskBoard {
    pub fn new(remote: RemoteHandles, session: Session, settings: BoardSettings) -> Self {
        let cache = Arc::new(TaskCache::new(remote.tasks.clone(), session.clone()));
        let summaries = Arc::new(SummaryReconciler::new(
            remote.summaries.clone(),
            session.clone(),
            cache.clone(),
        ));
        let ledger =
            RewardLedgerClient::new(remote.ledger.clone(), session.clone(), settings.currency);
        let (notices, _) = broadcast::channel(64);
        let orchestrator = CompletionOrchestrator::new(
            cache.clone(),
            remote.tasks,
            session,
            ledger,
            summaries.clone(),
            notices.clone(),
        )
        .with_summary_refresh(settings.refresh_after_transition);

        Self {
            cache,
            orchestrator,
            summaries,
            notices,
        }
    }

    /// 订阅非致命通知
    pub fn subscribe(&self) -> broadcast::Receiver<Notice> {
        self.notices.subscribe()
    }

    /// 切换会话：加载任务，成功后尽力刷新会话内所有人的汇总；
    /// 刷新失败与完成流程走同一套恢复策略
    pub async fn select_conversation(
        &self,
        conversation_id: &str,
    ) -> Result<LoadOutcome, TallyError> {
        let outcome = self.cache.load(conversation_id).await?;
        if let LoadOutcome::Loaded { .. } = outcome {
            self.orchestrator.forget_stale_settlements().await;
            let ids: Vec<PersonId> = self.cache.people().await.into_iter().map(|p| p.id).collect();
            let report = self.summaries.refresh_all(&ids).await;
            for err in &report.failed {
                self.orchestrator.recover(err).await;
            }
        }
        Ok(outcome)
    }

    pub async fn active_tasks(&self) -> Vec<Task> {
        self.cache.active_tasks().await
    }

    pub async fn completed_tasks(&self) -> Vec<Task> {
        self.cache.completed_tasks().await
    }

    pub async fn people(&self) -> Vec<Person> {
        self.cache.people().await
    }

    pub async fn progress(&self, person_id: &str) -> Progress {
        self.summaries.progress(person_id).await
    }

    pub async fn complete_task(
        &self,
        task_id: &str,
        person_id: &str,
    ) -> Result<Transition, TallyError> {
        self.orchestrator.complete_task(task_id, person_id).await
    }

    pub async fn uncomplete_task(&self, task_id: &str) -> Result<Transition, TallyError> {
        self.orchestrator.uncomplete_task(task_id).await
    }

    /// 当前缓存的渲染快照
    pub async fn snapshot(&self) -> BoardState {
        let conversation_id = self.cache.conversation_id().await;
        let mut people = Vec::new();
        for person in self.cache.people().await {
            let progress = self.summaries.progress(&person.id).await;
            people.push(PersonProgress { person, progress });
        }
        let busy = conversation_id
            .as_deref()
            .map(|c| self.orchestrator.is_pending(c))
            .unwrap_or(false);
        BoardState {
            conversation_id,
            active: self.cache.active_tasks().await,
            completed: self.cache.completed_tasks().await,
            people,
            busy,
            error_message: None,
        }
    }
}

/// 从 UI 发往看板的命令
#[derive(Debug, Clone)]
pub enum Command {
    Select(String),
    Complete { task_id: String, person_id: String },
    Uncomplete(String),
    Quit,
}

/// 启动看板运行时：返回命令发送端、状态接收端、通知接收端。
/// 每条命令在独立任务中执行，UI 不被远端调用阻塞；结束后推送新的快照。
pub fn spawn_board(
    board: Arc<TaskBoard>,
) -> (
    mpsc::UnboundedSender<Command>,
    watch::Receiver<BoardState>,
    broadcast::Receiver<Notice>,
) {
    let (cmd_tx, mut cmd_rx) = mpsc::unbounded_channel::<Command>();
    let (state_tx, state_rx) = watch::channel(BoardState::default());
    let state_tx = Arc::new(state_tx);
    let notice_rx = board.subscribe();

    tokio::spawn(async move {
        while let Some(cmd) = cmd_rx.recv().await {
            if let Command::Quit = cmd {
                break;
            }
            let board = board.clone();
            let state_tx = state_tx.clone();
            tokio::spawn(async move {
                let result = match cmd {
                    Command::Select(conversation_id) => {
                        board.select_conversation(&conversation_id).await.map(|_| ())
                    }
                    Command::Complete { task_id, person_id } => {
                        board.complete_task(&task_id, &person_id).await.map(|_| ())
                    }
                    Command::Uncomplete(task_id) => {
                        board.uncomplete_task(&task_id).await.map(|_| ())
                    }
                    Command::Quit => Ok(()),
                };
                let mut state = board.snapshot().await;
                if let Err(e) = result {
                    tracing::warn!("Board command failed: {}", e);
                    state.error_message = Some(e.to_string());
                }
                let _ = state_tx.send(state);
            });
        }
    });

    (cmd_tx, state_rx, notice_rx)
}
