//! 调用前后钩子：可改写请求或响应，默认不做处理

use async_trait::async_trait;

use crate::agent::{AgentRequest, AgentResponse};

#[async_trait]
pub trait AgentHooks: Send + Sync {
    /// 返回 Some 时替换原请求
    async fn before_call(&self, _request: &AgentRequest) -> Option<AgentRequest> {
        None
    }

    /// 返回 Some 时替换原响应
    async fn after_call(&self, _response: &AgentResponse) -> Option<AgentResponse> {
        None
    }
}
