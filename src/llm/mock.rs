//! Mock LLM 客户端（用于测试，无需 API）
//!
//! 按脚本依次返回预设回复，并记录收到的每个 ModelRequest；脚本耗尽后使用 fallback，
//! 没有 fallback 时回显最后一条 User 消息作为最终回复。

use std::collections::VecDeque;
use std::sync::Mutex;

use async_trait::async_trait;

use crate::llm::{LlmClient, LlmError, ModelReply, ModelRequest, Role};

/// 脚本化 Mock 客户端
#[derive(Debug, Default)]
pub struct MockLlmClient {
    script: Mutex<VecDeque<Result<ModelReply, LlmError>>>,
    fallback: Option<ModelReply>,
    requests: Mutex<Vec<ModelRequest>>,
}

impl MockLlmClient {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn scripted<I>(replies: I) -> Self
    where
        I: IntoIterator<Item = Result<ModelReply, LlmError>>,
    {
        Self {
            script: Mutex::new(replies.into_iter().collect()),
            ..Self::default()
        }
    }

    /// 脚本耗尽后每次都返回该回复（用于模拟失控的工具调用循环）
    pub fn with_fallback(mut self, reply: ModelReply) -> Self {
        self.fallback = Some(reply);
        self
    }

    /// 已收到的请求（按调用顺序）
    pub fn requests(&self) -> Vec<ModelRequest> {
        self.requests.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    pub fn call_count(&self) -> usize {
        self.requests.lock().unwrap_or_else(|e| e.into_inner()).len()
    }
}

#[async_trait]
impl LlmClient for MockLlmClient {
    async fn complete(&self, request: &ModelRequest) -> Result<ModelReply, LlmError> {
        self.requests
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(request.clone());

        if let Some(next) = self.script.lock().unwrap_or_else(|e| e.into_inner()).pop_front() {
            return next;
        }
        if let Some(reply) = &self.fallback {
            return Ok(reply.clone());
        }

        let last_user = request
            .conversation
            .iter()
            .rev()
            .find(|m| m.role == Role::User)
            .map(|m| m.content.as_str())
            .unwrap_or("(no input)");
        Ok(ModelReply::text(format!("Echo from Mock: {last_user}")))
    }
}
