//! Mesh Agent - 智能体执行引擎
//!
//! 模块划分：
//! - **agent**: 调度器（call_agent）、请求/响应协议、事件与钩子
//! - **capabilities**: 能力模块（CoinGecko）
//! - **config**: 应用配置加载（TOML + 环境变量）
//! - **core**: 错误分类、重试、缓存、会话生命周期
//! - **llm**: LLM 客户端抽象与实现（OpenAI 兼容 / Mock）、文本协议解析
//! - **observability**: tracing 初始化
//! - **tools**: 工具 Schema、注册表、执行器、HTTP 上下文

pub mod agent;
pub mod capabilities;
pub mod config;
pub mod core;
pub mod llm;
pub mod observability;
pub mod tools;

pub use agent::{Agent, AgentBuilder, AgentMetadata, AgentRequest, AgentResponse};
pub use core::AgentError;
