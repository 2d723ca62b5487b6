//! 调用方协议：请求与响应
//!
//! 请求：`{"query": "..."}` 或 `{"tool": "...", "tool_arguments": {...}}`，二者必须且只能有一个；
//! 可选 raw_data_only / session_context / task_id / origin_task_id。
//! 响应：`{"status": "success", "response": ..., "data": ...}` 或 `{"status": "error", "error": ..., "kind": ...}`。

use serde::Deserialize;
use serde_json::{json, Value};

use crate::core::AgentError;

/// 调用模式
#[derive(Debug, Clone, PartialEq)]
pub enum Invocation {
    /// 自然语言，由模型选择工具
    Query(String),
    /// 直接调用工具，绕过模型
    Tool { name: String, arguments: Value },
}

#[derive(Debug, Clone, PartialEq)]
pub struct AgentRequest {
    pub invocation: Invocation,
    /// 自然语言模式下，第一轮工具执行后直接返回工具数据，不再调用模型
    pub raw_data_only: bool,
    /// 透传给每个工具
    pub session_context: Value,
    pub task_id: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RawRequest {
    #[serde(default)]
    query: Option<String>,
    #[serde(default)]
    tool: Option<String>,
    #[serde(default)]
    tool_arguments: Option<Value>,
    #[serde(default)]
    raw_data_only: bool,
    #[serde(default)]
    session_context: Option<Value>,
    #[serde(default)]
    task_id: Option<String>,
    #[serde(default)]
    origin_task_id: Option<String>,
}

impl AgentRequest {
    fn with_invocation(invocation: Invocation) -> Self {
        Self {
            invocation,
            raw_data_only: false,
            session_context: Value::Null,
            task_id: None,
        }
    }

    pub fn query(query: impl Into<String>) -> Self {
        Self::with_invocation(Invocation::Query(query.into()))
    }

    pub fn tool(name: impl Into<String>, arguments: Value) -> Self {
        Self::with_invocation(Invocation::Tool {
            name: name.into(),
            arguments,
        })
    }

    pub fn raw_data_only(mut self, raw: bool) -> Self {
        self.raw_data_only = raw;
        self
    }

    pub fn session_context(mut self, ctx: Value) -> Self {
        self.session_context = ctx;
        self
    }

    pub fn task_id(mut self, id: impl Into<String>) -> Self {
        self.task_id = Some(id.into());
        self
    }

    /// 从调用方 JSON 解析；origin_task_id 优先于 task_id
    pub fn from_json(value: &Value) -> Result<Self, AgentError> {
        let raw: RawRequest = serde_json::from_value(value.clone())
            .map_err(|e| AgentError::validation(format!("invalid request: {e}")))?;

        let query = raw.query.filter(|q| !q.trim().is_empty());
        let tool = raw.tool.filter(|t| !t.trim().is_empty());
        let invocation = match (query, tool) {
            (Some(q), None) => Invocation::Query(q),
            (None, Some(name)) => Invocation::Tool {
                name,
                arguments: raw.tool_arguments.unwrap_or_else(|| json!({})),
            },
            (Some(_), Some(_)) => {
                return Err(AgentError::validation(
                    "provide either 'query' or 'tool', not both",
                ))
            }
            (None, None) => {
                return Err(AgentError::validation(
                    "Either 'query' or 'tool' must be provided in the parameters.",
                ))
            }
        };

        Ok(Self {
            invocation,
            raw_data_only: raw.raw_data_only,
            session_context: raw.session_context.unwrap_or(Value::Null),
            task_id: raw.origin_task_id.or(raw.task_id),
        })
    }
}

/// 一次调用的结果：成功或错误，二者只居其一
#[derive(Debug, Clone, PartialEq)]
pub enum AgentResponse {
    Success {
        /// 模型给出的最终文本（直接调用工具时为空）
        response: String,
        data: Value,
    },
    Error {
        message: String,
        kind: String,
        /// 出错的工具（若有）
        tool: Option<String>,
    },
}

impl AgentResponse {
    pub fn success(response: impl Into<String>, data: Value) -> Self {
        AgentResponse::Success {
            response: response.into(),
            data,
        }
    }

    pub fn from_error(err: &AgentError, tool: Option<String>) -> Self {
        AgentResponse::Error {
            message: err.to_string(),
            kind: err.kind().to_string(),
            tool,
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, AgentResponse::Success { .. })
    }

    pub fn error_kind(&self) -> Option<&str> {
        match self {
            AgentResponse::Error { kind, .. } => Some(kind),
            AgentResponse::Success { .. } => None,
        }
    }

    pub fn data(&self) -> Option<&Value> {
        match self {
            AgentResponse::Success { data, .. } => Some(data),
            AgentResponse::Error { .. } => None,
        }
    }

    pub fn to_json(&self) -> Value {
        match self {
            AgentResponse::Success { response, data } => json!({
                "status": "success",
                "response": response,
                "data": data,
            }),
            AgentResponse::Error {
                message,
                kind,
                tool,
            } => {
                let mut v = json!({
                    "status": "error",
                    "error": message,
                    "kind": kind,
                });
                if let Some(tool) = tool {
                    v["tool"] = json!(tool);
                }
                v
            }
        }
    }
}
