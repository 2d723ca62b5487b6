//! 对话消息、模型请求与模型回复

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::tools::ToolSchema;

/// 消息角色
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
    Tool,
}

/// 模型发出的工具调用指令
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ToolCallDirective {
    /// 回传工具结果时用于关联
    pub id: String,
    pub name: String,
    pub arguments: Value,
}

/// 单条消息
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
    /// Assistant 消息携带的工具调用
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_calls: Vec<ToolCallDirective>,
    /// Tool 消息对应的 directive id
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
    /// Tool 消息对应的工具名
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

impl Message {
    fn plain(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
            tool_calls: Vec::new(),
            tool_call_id: None,
            name: None,
        }
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self::plain(Role::System, content)
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::plain(Role::User, content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::plain(Role::Assistant, content)
    }

    pub fn assistant_tool_calls(content: impl Into<String>, calls: Vec<ToolCallDirective>) -> Self {
        Self {
            tool_calls: calls,
            ..Self::plain(Role::Assistant, content)
        }
    }

    pub fn tool_result(call_id: impl Into<String>, tool: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            tool_call_id: Some(call_id.into()),
            name: Some(tool.into()),
            ..Self::plain(Role::Tool, content)
        }
    }
}

/// 一次模型调用的输入：system prompt + 工具 Schema + 对话
#[derive(Clone, Debug)]
pub struct ModelRequest {
    pub system_prompt: String,
    pub tools: Vec<ToolSchema>,
    pub conversation: Vec<Message>,
    /// 覆盖客户端默认模型
    pub model: Option<String>,
}

/// 模型回复：最终文本，或零到多个工具调用
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ModelReply {
    pub content: String,
    pub tool_calls: Vec<ToolCallDirective>,
}

impl ModelReply {
    pub fn text(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            tool_calls: Vec::new(),
        }
    }

    pub fn calls(tool_calls: Vec<ToolCallDirective>) -> Self {
        Self {
            content: String::new(),
            tool_calls,
        }
    }

    pub fn has_directives(&self) -> bool {
        !self.tool_calls.is_empty()
    }
}
