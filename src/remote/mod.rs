//! 远端层：Task Store / Ledger / Summary 抽象与实现（HTTP / 内存）

pub mod http;
pub mod mock;
pub mod session;
pub mod traits;

use std::sync::Arc;

pub use http::HttpRemote;
pub use mock::{CallCounts, InMemoryRemote};
pub use session::Session;
pub use traits::{LedgerApi, RemoteError, SummaryApi, TaskStore};

use crate::config::AppConfig;
use crate::core::TallyError;

/// 三个远端接口的共享句柄
#[derive(Clone)]
pub struct RemoteHandles {
    pub tasks: Arc<dyn TaskStore>,
    pub ledger: Arc<dyn LedgerApi>,
    pub summaries: Arc<dyn SummaryApi>,
}

impl RemoteHandles {
    /// 同一个后端同时提供三个接口
    pub fn shared<R>(remote: Arc<R>) -> Self
    where
        R: TaskStore + LedgerApi + SummaryApi + 'static,
    {
        Self {
            tasks: remote.clone(),
            ledger: remote.clone(),
            summaries: remote,
        }
    }
}

/// 根据配置选择后端：配置了 base_url 走 HTTP，否则用内存远端
pub fn create_remote_from_config(cfg: &AppConfig) -> Result<RemoteHandles, TallyError> {
    match cfg.remote.base_url.as_deref().filter(|u| !u.trim().is_empty()) {
        Some(url) => {
            tracing::info!("Using remote API at {}", url);
            let remote = HttpRemote::new(url, cfg.remote.request_timeout_secs)
                .map_err(|e| TallyError::Config(format!("remote.base_url: {}", e)))?;
            Ok(RemoteHandles::shared(Arc::new(remote)))
        }
        None => {
            tracing::warn!("No remote.base_url configured, using in-memory remote");
            Ok(RemoteHandles::shared(Arc::new(InMemoryRemote::new())))
        }
    }
}
