//! 远端协作方抽象
//!
//! Task Store / Ledger / Summary 三个接口，线格式由远端所有；HTTP 与内存实现都实现这三个 trait。

use async_trait::async_trait;
use thiserror::Error;

use crate::model::{LedgerEntry, PersonEarningsSummary, StatusUpdate, Task};
use crate::remote::Session;

/// 远端调用错误
#[derive(Error, Debug)]
pub enum RemoteError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Remote returned {status}: {body}")]
    Status { status: u16, body: String },

    #[error("Invalid payload: {0}")]
    Decode(String),

    #[error("Remote unavailable: {0}")]
    Unavailable(String),

    #[error("Invalid URL: {0}")]
    InvalidUrl(String),
}

#[async_trait]
pub trait TaskStore: Send + Sync {
    /// 拉取会话内全部任务
    async fn fetch_tasks(
        &self,
        session: &Session,
        conversation_id: &str,
    ) -> Result<Vec<Task>, RemoteError>;

    /// 更新任务状态，返回远端确认后的任务
    async fn update_task_status(
        &self,
        session: &Session,
        task_id: &str,
        update: &StatusUpdate,
    ) -> Result<Task, RemoteError>;
}

#[async_trait]
pub trait LedgerApi: Send + Sync {
    async fn submit_ledger_entry(
        &self,
        session: &Session,
        entry: &LedgerEntry,
    ) -> Result<LedgerEntry, RemoteError>;
}

#[async_trait]
pub trait SummaryApi: Send + Sync {
    async fn fetch_person_summary(
        &self,
        session: &Session,
        person_id: &str,
    ) -> Result<PersonEarningsSummary, RemoteError>;
}
