//! 调用过程事件：思考、工具调用、工具结果、完成或出错，可序列化为 JSON 推送给前端

use chrono::{DateTime, Utc};
use serde::Serialize;

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AgentEvent {
    /// 正在调用模型
    Thinking { agent: String, iteration: usize },
    ToolCall {
        tool: String,
        args: serde_json::Value,
    },
    /// 工具返回（预览，避免过长）
    ToolResult {
        tool: String,
        ok: bool,
        preview: String,
    },
    Final { elapsed_ms: u64 },
    Error { kind: String, message: String },
}

/// 带任务 ID 与时间戳的事件
#[derive(Debug, Clone, Serialize)]
pub struct AgentUpdate {
    pub task_id: Option<String>,
    pub at: DateTime<Utc>,
    #[serde(flatten)]
    pub event: AgentEvent,
}

impl AgentUpdate {
    pub fn new(task_id: Option<String>, event: AgentEvent) -> Self {
        Self {
            task_id,
            at: Utc::now(),
            event,
        }
    }
}
