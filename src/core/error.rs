//! Agent 错误类型
//!
//! 所有能力模块在失败到达调度器之前都必须归类为以下某一种；未归类的失败落入 Other 并保留原始信息。
//! TransientNetwork 由 RetryPolicy 重试，重试耗尽后包装为 RetryExhausted。

use std::time::Duration;

use thiserror::Error;

/// 可重试的瞬时失败类别（重试白名单）
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransientKind {
    /// 请求超时或连接不可达
    Timeout,
    /// 被限流（HTTP 429）
    RateLimited,
    /// 服务端错误（HTTP 5xx）
    ServerError,
}

impl TransientKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransientKind::Timeout => "timeout",
            TransientKind::RateLimited => "rate_limited",
            TransientKind::ServerError => "server_error",
        }
    }
}

impl std::fmt::Display for TransientKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Agent 调用过程中可能出现的错误
#[derive(Error, Debug, Clone)]
pub enum AgentError {
    /// 工具不存在、参数缺失或类型错误；不重试
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Transient network error ({kind}): {message}")]
    TransientNetwork {
        kind: TransientKind,
        message: String,
        /// 服务端建议的等待时间（如 Retry-After）
        retry_after: Option<Duration>,
    },

    #[error("Retry exhausted after {attempts} attempts: {last}")]
    RetryExhausted {
        attempts: u32,
        last: Box<AgentError>,
    },

    /// 鉴权失败、请求非法等，立即失败
    #[error("Permanent network error: {0}")]
    PermanentNetwork(String),

    #[error("Model communication error: {0}")]
    ModelCommunication(String),

    #[error("Tool-call loop exceeded {0} iterations")]
    LoopLimitExceeded(usize),

    /// 会话未获取或已释放时使用网络客户端
    #[error("Resource state error: {0}")]
    ResourceState(String),

    #[error("Cancelled")]
    Cancelled,

    #[error("{0}")]
    Other(String),
}

impl AgentError {
    pub fn validation(msg: impl Into<String>) -> Self {
        AgentError::Validation(msg.into())
    }

    pub fn transient(kind: TransientKind, msg: impl Into<String>) -> Self {
        AgentError::TransientNetwork {
            kind,
            message: msg.into(),
            retry_after: None,
        }
    }

    /// 是否属于重试白名单
    pub fn is_transient(&self) -> bool {
        matches!(self, AgentError::TransientNetwork { .. })
    }

    /// 错误负载中的 kind 字段
    pub fn kind(&self) -> &'static str {
        match self {
            AgentError::Validation(_) => "validation_error",
            AgentError::TransientNetwork { .. } => "transient_network_error",
            AgentError::RetryExhausted { .. } => "retry_exhausted",
            AgentError::PermanentNetwork(_) => "permanent_network_error",
            AgentError::ModelCommunication(_) => "model_communication_error",
            AgentError::LoopLimitExceeded(_) => "loop_limit_exceeded",
            AgentError::ResourceState(_) => "resource_state_error",
            AgentError::Cancelled => "cancelled",
            AgentError::Other(_) => "error",
        }
    }
}

impl From<serde_json::Error> for AgentError {
    fn from(e: serde_json::Error) -> Self {
        AgentError::Other(format!("JSON error: {e}"))
    }
}
