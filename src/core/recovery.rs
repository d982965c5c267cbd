//! 错误恢复引擎
//!
//! 将 TallyError 映射为 RecoveryAction：本地与远端真相出现歧义时一律全量重载，
//! 账本 / 汇总失败只上报，不回滚已可见的完成状态。

use crate::core::{RecoveryAction, TallyError};

#[derive(Debug, Default, Clone, Copy)]
pub struct RecoveryEngine;

impl RecoveryEngine {
    pub fn new() -> Self {
        Self
    }

    pub fn handle(&self, err: &TallyError) -> RecoveryAction {
        match err {
            TallyError::RemoteUpdate { .. } | TallyError::StateViolation(_) => {
                RecoveryAction::Resync
            }
            TallyError::MissingPayer { .. }
            | TallyError::Unsettled { .. }
            | TallyError::LedgerSubmission { .. }
            | TallyError::SummaryRefresh { .. } => RecoveryAction::ReportNonFatal(err.to_string()),
            TallyError::Fetch { .. }
            | TallyError::NotFound { .. }
            | TallyError::InvalidReward { .. }
            | TallyError::InvalidAmount(_)
            | TallyError::Config(_) => RecoveryAction::Surface,
        }
    }
}
