//! LLM 层：客户端抽象与实现（OpenAI 兼容 / Mock）、消息类型、文本协议解析

pub mod message;
pub mod mock;
pub mod openai;
pub mod parser;
pub mod traits;

pub use message::{Message, ModelReply, ModelRequest, Role, ToolCallDirective};
pub use mock::MockLlmClient;
pub use openai::{OpenAiClient, OpenAiSettings, TokenUsage};
pub use parser::{directive_schema_json, parse_reply_text};
pub use traits::{LlmClient, LlmError};
