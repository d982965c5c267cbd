//! REST 客户端
//!
//! 通过 reqwest 调用远端 JSON 接口，Bearer 令牌取自调用方传入的 Session。
//! 路径中的 id 按路径段编码：
//! - `GET   {base}/conversations/{id}/tasks`
//! - `PATCH {base}/tasks/{id}`
//! - `POST  {base}/ledger/entries`
//! - `GET   {base}/people/{id}/summary`

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, Response, Url};
use serde::de::DeserializeOwned;

use crate::model::{LedgerEntry, PersonEarningsSummary, StatusUpdate, Task};
use crate::remote::{LedgerApi, RemoteError, Session, SummaryApi, TaskStore};

pub struct HttpRemote {
    client: Client,
    base_url: Url,
}

impl HttpRemote {
    pub fn new(base_url: &str, timeout_secs: u64) -> Result<Self, RemoteError> {
        let base_url = Url::parse(base_url)
            .map_err(|e| RemoteError::InvalidUrl(format!("{}: {}", base_url, e)))?;
        if base_url.cannot_be_a_base() {
            return Err(RemoteError::InvalidUrl(format!(
                "{} cannot be used as a base",
                base_url
            )));
        }
        let client = Client::builder()
            .timeout(Duration::from_secs(timeout_secs.max(1)))
            .build()?;
        Ok(Self { client, base_url })
    }

    /// 在 base_url 之后追加路径段，每段单独转义
    fn endpoint(&self, segments: &[&str]) -> Result<Url, RemoteError> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|_| RemoteError::InvalidUrl(self.base_url.to_string()))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    fn authed(&self, req: RequestBuilder, session: &Session) -> RequestBuilder {
        match session.access_token() {
            Some(token) => req.bearer_auth(token),
            None => req,
        }
    }

    /// 非 2xx 转为 Status 错误，成功时按 JSON 解码
    async fn decode<T: DeserializeOwned>(resp: Response) -> Result<T, RemoteError> {
        let status = resp.status();
        let body = resp.text().await?;
        if !status.is_success() {
            return Err(RemoteError::Status {
                status: status.as_u16(),
                body,
            });
        }
        serde_json::from_str(&body).map_err(|e| RemoteError::Decode(e.to_string()))
    }
}

#[async_trait]
impl TaskStore for HttpRemote {
    async fn fetch_tasks(
        &self,
        session: &Session,
        conversation_id: &str,
    ) -> Result<Vec<Task>, RemoteError> {
        let url = self.endpoint(&["conversations", conversation_id, "tasks"])?;
        tracing::debug!("GET {}", url);
        let resp = self.authed(self.client.get(url), session).send().await?;
        Self::decode(resp).await
    }

    async fn update_task_status(
        &self,
        session: &Session,
        task_id: &str,
        update: &StatusUpdate,
    ) -> Result<Task, RemoteError> {
        let url = self.endpoint(&["tasks", task_id])?;
        tracing::debug!("PATCH {} -> {:?}", url, update.status);
        let resp = self
            .authed(self.client.patch(url), session)
            .json(update)
            .send()
            .await?;
        Self::decode(resp).await
    }
}

#[async_trait]
impl LedgerApi for HttpRemote {
    async fn submit_ledger_entry(
        &self,
        session: &Session,
        entry: &LedgerEntry,
    ) -> Result<LedgerEntry, RemoteError> {
        let url = self.endpoint(&["ledger", "entries"])?;
        tracing::debug!("POST {} ({} {})", url, entry.direction.tag(), entry.amount);
        let resp = self
            .authed(self.client.post(url), session)
            .json(entry)
            .send()
            .await?;
        Self::decode(resp).await
    }
}

#[async_trait]
impl SummaryApi for HttpRemote {
    async fn fetch_person_summary(
        &self,
        session: &Session,
        person_id: &str,
    ) -> Result<PersonEarningsSummary, RemoteError> {
        let url = self.endpoint(&["people", person_id, "summary"])?;
        let resp = self.authed(self.client.get(url), session).send().await?;
        Self::decode(resp).await
    }
}
