//! Mock LLM 客户端（用于测试，无需 API）
//!
//! 默认回显最后一条 User 消息；可注入固定回复或固定失败，便于驱动各组件的失败分支。

use async_trait::async_trait;

use crate::llm::{ChatRequest, LlmClient, LlmError, Role};

/// Mock 客户端：固定回复 / 固定失败 / 回显
#[derive(Debug, Default)]
pub struct MockLlmClient {
    canned: Option<String>,
    fail: bool,
}

impl MockLlmClient {
    pub fn new() -> Self {
        Self::default()
    }

    /// 每次调用都返回同一段固定文本
    pub fn with_response(response: impl Into<String>) -> Self {
        Self {
            canned: Some(response.into()),
            fail: false,
        }
    }

    /// 每次调用都失败（Api 错误）
    pub fn failing() -> Self {
        Self {
            canned: None,
            fail: true,
        }
    }
}

#[async_trait]
impl LlmClient for MockLlmClient {
    async fn complete(&self, request: ChatRequest) -> Result<String, LlmError> {
        if self.fail {
            return Err(LlmError::Api("mock failure".to_string()));
        }

        if let Some(canned) = &self.canned {
            return Ok(canned.clone());
        }

        let last_user = request
            .messages
            .iter()
            .rev()
            .find(|m| matches!(m.role, Role::User))
            .map(|m| m.content.as_str())
            .unwrap_or("(no input)");

        Ok(format!("Echo from Mock: {}", last_user))
    }
}
