//! 自动化后端客户端
//!
//! 远端 REST 服务的最小契约：入队任务拿句柄、按句柄查状态。
//! 永远不假设同步完成，派发器只靠轮询。

use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::json;
use thiserror::Error;

use crate::planner::Task;

/// 远端任务状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RemoteTaskState {
    Queued,
    InProgress,
    Completed,
    Failed,
}

/// 一次状态查询的结果
#[derive(Debug, Clone, Deserialize)]
pub struct RemoteStatus {
    pub state: RemoteTaskState,
    #[serde(default)]
    pub detail: Option<String>,
}

#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("automation backend http error: {0}")]
    Http(String),

    #[error("automation backend timed out")]
    Timeout,

    #[error("automation backend rejected task: {0}")]
    Rejected(String),
}

impl DispatchError {
    /// 瞬态错误可重试；明确拒绝不重试
    pub fn is_transient(&self) -> bool {
        !matches!(self, DispatchError::Rejected(_))
    }
}

#[async_trait]
pub trait AutomationClient: Send + Sync {
    /// 入队一个任务，返回远端句柄
    async fn enqueue(&self, user_id: &str, task: &Task) -> Result<String, DispatchError>;

    async fn status(&self, handle: &str) -> Result<RemoteStatus, DispatchError>;

    async fn health(&self) -> bool {
        true
    }
}

/// HTTP 实现：POST /api/v1/tasks 入队，GET /api/v1/tasks/{handle} 查询
pub struct HttpAutomationClient {
    base_url: String,
    api_token: Option<String>,
    http: reqwest::Client,
}

#[derive(Deserialize)]
struct EnqueueResponse {
    handle: String,
}

impl HttpAutomationClient {
    pub fn new(base_url: impl Into<String>, api_token: Option<String>, timeout_secs: u64) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_token,
            http: reqwest::Client::builder()
                .timeout(std::time::Duration::from_secs(timeout_secs))
                .build()
                .unwrap_or_default(),
        }
    }

    fn authorize(&self, builder: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.api_token {
            Some(token) => builder.bearer_auth(token),
            None => builder,
        }
    }

    fn map_error(e: reqwest::Error) -> DispatchError {
        if e.is_timeout() {
            DispatchError::Timeout
        } else {
            DispatchError::Http(e.to_string())
        }
    }
}

#[async_trait]
impl AutomationClient for HttpAutomationClient {
    async fn enqueue(&self, user_id: &str, task: &Task) -> Result<String, DispatchError> {
        let url = format!("{}/api/v1/tasks", self.base_url);
        let body = json!({
            "user_id": user_id,
            "task_id": task.task_id,
            "category": task.category,
            "scheduled_offset_minutes": task.scheduled_offset_minutes,
            "parameters": task.parameters,
        });

        let response = self
            .authorize(self.http.post(&url))
            .json(&body)
            .send()
            .await
            .map_err(Self::map_error)?;

        let status = response.status();
        if status.as_u16() == 422 || status.as_u16() == 400 {
            let detail = response.text().await.unwrap_or_default();
            return Err(DispatchError::Rejected(detail));
        }
        if !status.is_success() {
            return Err(DispatchError::Http(format!("enqueue returned {}", status)));
        }

        let parsed: EnqueueResponse = response
            .json()
            .await
            .map_err(|e| DispatchError::Http(e.to_string()))?;
        Ok(parsed.handle)
    }

    async fn status(&self, handle: &str) -> Result<RemoteStatus, DispatchError> {
        let url = format!("{}/api/v1/tasks/{}", self.base_url, handle);
        let response = self
            .authorize(self.http.get(&url))
            .send()
            .await
            .map_err(Self::map_error)?;

        if !response.status().is_success() {
            return Err(DispatchError::Http(format!(
                "status returned {}",
                response.status()
            )));
        }

        response
            .json()
            .await
            .map_err(|e| DispatchError::Http(e.to_string()))
    }

    async fn health(&self) -> bool {
        let url = format!("{}/health", self.base_url);
        match self.http.get(&url).send().await {
            Ok(r) => r.status().is_success(),
            Err(_) => false,
        }
    }
}

/// Mock 客户端（测试用）：可配置前 N 次入队瞬态失败、整体拒绝、轮询延迟完成
#[derive(Default)]
pub struct MockAutomationClient {
    /// 前 N 次 enqueue 返回瞬态 Http 错误
    pub fail_first: AtomicUsize,
    /// 全部入队直接拒绝（非瞬态）
    pub reject_all: bool,
    /// 前 N 次 status 返回 in_progress，之后 completed
    pub polls_until_done: AtomicUsize,
    /// 远端最终失败而非完成
    pub fail_remotely: bool,
    pub enqueued: AtomicUsize,
}

impl MockAutomationClient {
    pub fn completing() -> Self {
        Self::default()
    }

    pub fn failing_first(n: usize) -> Self {
        Self {
            fail_first: AtomicUsize::new(n),
            ..Self::default()
        }
    }

    pub fn rejecting() -> Self {
        Self {
            reject_all: true,
            ..Self::default()
        }
    }
}

#[async_trait]
impl AutomationClient for MockAutomationClient {
    async fn enqueue(&self, _user_id: &str, task: &Task) -> Result<String, DispatchError> {
        if self.reject_all {
            return Err(DispatchError::Rejected("task class disabled".to_string()));
        }
        let remaining = self.fail_first.load(Ordering::SeqCst);
        if remaining > 0 {
            self.fail_first.fetch_sub(1, Ordering::SeqCst);
            return Err(DispatchError::Http("connection refused".to_string()));
        }
        self.enqueued.fetch_add(1, Ordering::SeqCst);
        Ok(format!("remote_{}", task.task_id))
    }

    async fn status(&self, _handle: &str) -> Result<RemoteStatus, DispatchError> {
        let remaining = self.polls_until_done.load(Ordering::SeqCst);
        if remaining > 0 {
            self.polls_until_done.fetch_sub(1, Ordering::SeqCst);
            return Ok(RemoteStatus {
                state: RemoteTaskState::InProgress,
                detail: None,
            });
        }
        if self.fail_remotely {
            return Ok(RemoteStatus {
                state: RemoteTaskState::Failed,
                detail: Some("remote action blocked".to_string()),
            });
        }
        Ok(RemoteStatus {
            state: RemoteTaskState::Completed,
            detail: None,
        })
    }
}
