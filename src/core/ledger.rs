//! 奖励账本客户端
//!
//! submit_forward / submit_reversal 只在方向标签与金额符号上不同（冲正另带 notes）；
//! 金额 ≤ 0 在调用远端前拒绝。
//! 不自动重试，由调用方按流程决定是否致命。

use std::sync::Arc;

use crate::core::TallyError;
use crate::model::{EntryContext, LedgerDirection, LedgerEntry};
use crate::remote::{LedgerApi, Session};

pub struct RewardLedgerClient {
    api: Arc<dyn LedgerApi>,
    session: Session,
    currency: String,
}

impl RewardLedgerClient {
    pub fn new(api: Arc<dyn LedgerApi>, session: Session, currency: impl Into<String>) -> Self {
        Self {
            api,
            session,
            currency: currency.into(),
        }
    }

    /// 正向条目：付款方 → 完成者，+amount
    pub async fn submit_forward(
        &self,
        payer_id: &str,
        payee_id: &str,
        amount: i64,
        context: &EntryContext,
    ) -> Result<LedgerEntry, TallyError> {
        self.submit(LedgerDirection::Forward, payer_id, payee_id, amount, None, context)
            .await
    }

    /// 冲正条目：同一对参与者，-amount；已知被冲正的条目 id 时写入 notes
    pub async fn submit_reversal(
        &self,
        payer_id: &str,
        payee_id: &str,
        amount: i64,
        reverses: Option<&str>,
        context: &EntryContext,
    ) -> Result<LedgerEntry, TallyError> {
        let notes = reverses.map(|id| format!("Reverses entry {}", id));
        self.submit(LedgerDirection::Reversal, payer_id, payee_id, amount, notes, context)
            .await
    }

    async fn submit(
        &self,
        direction: LedgerDirection,
        payer_id: &str,
        payee_id: &str,
        amount: i64,
        notes: Option<String>,
        context: &EntryContext,
    ) -> Result<LedgerEntry, TallyError> {
        let mut entry =
            LedgerEntry::new(direction, payer_id, payee_id, amount, &self.currency, context)
                .map_err(|_| TallyError::InvalidAmount(amount))?;
        if let Some(notes) = notes {
            entry = entry.with_notes(notes);
        }

        let posted = self
            .api
            .submit_ledger_entry(&self.session, &entry)
            .await
            .map_err(|source| TallyError::LedgerSubmission {
                task_id: context.task_id.clone(),
                source,
            })?;

        tracing::info!(
            "Ledger {} {} -> {} {} {} (task {}, by {})",
            direction.tag(),
            payer_id,
            payee_id,
            posted.amount,
            posted.currency,
            context.task_id,
            self.session.user_id()
        );
        Ok(posted)
    }
}
