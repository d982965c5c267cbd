//! 核心层：任务缓存、完成编排、奖励账本、汇总对账、错误与恢复、状态投影

pub mod cache;
pub mod error;
pub mod ledger;
pub mod orchestrator;
pub mod recovery;
pub mod state;
pub mod summary;

pub use cache::{LoadOutcome, TaskCache};
pub use error::{RecoveryAction, TallyError};
pub use ledger::RewardLedgerClient;
pub use orchestrator::{CompletionOrchestrator, LedgerOutcome, Transition};
pub use recovery::RecoveryEngine;
pub use state::{BoardState, Notice, PersonProgress};
pub use summary::{NetTotals, Progress, ProgressSource, RefreshReport, SummaryReconciler};
