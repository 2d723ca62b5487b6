//! LLM 客户端抽象
//!
//! 所有后端（OpenAI 兼容 / Mock）实现 LlmClient：输入 ModelRequest，输出文本或工具调用。
//! 模型调用失败对本次调用是致命的，编排层不做重试。

use async_trait::async_trait;
use thiserror::Error;

use crate::core::AgentError;
use crate::llm::{ModelReply, ModelRequest};

/// 模型通信错误
#[derive(Error, Debug, Clone)]
pub enum LlmError {
    #[error("HTTP error: {0}")]
    Http(String),

    #[error("API returned {status}: {body}")]
    Status { status: u16, body: String },

    #[error("Request timed out")]
    Timeout,

    /// 回复无法解析（JSON 非法、缺少 choices、参数不是合法 JSON 等）
    #[error("Malformed model output: {0}")]
    Malformed(String),
}

impl From<LlmError> for AgentError {
    fn from(e: LlmError) -> Self {
        AgentError::ModelCommunication(e.to_string())
    }
}

/// LLM 客户端 trait
#[async_trait]
pub trait LlmClient: Send + Sync {
    async fn complete(&self, request: &ModelRequest) -> Result<ModelReply, LlmError>;

    /// 获取累计 token 使用统计：(prompt_tokens, completion_tokens, total_tokens)
    /// 默认返回 (0, 0, 0)，具体实现可覆盖
    fn token_usage(&self) -> (u64, u64, u64) {
        (0, 0, 0)
    }
}
