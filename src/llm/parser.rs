//! 文本协议下的 Tool Call 解析（模型不支持原生 function calling 时使用）
//!
//! 约定格式：`{"tool": "...", "args": {...}}`，或此类对象的数组；可包裹在 ```json 代码块中。
//! 不是合法调用 JSON（每项都带 tool 字符串）的文本视为最终回复；带 tool 键但损坏的 JSON 报 Malformed。directive_schema_json 生成该格式的 JSON Schema，拼入 system prompt。

use std::collections::HashMap;

use schemars::{schema_for, JsonSchema};
use serde::Deserialize;
use serde_json::Value;

use crate::llm::{LlmError, ModelReply, ToolCallDirective};

/// 文本协议中的一条工具调用（仅用于解析与 Schema 生成）
#[derive(Debug, Deserialize, JsonSchema)]
struct DirectiveFormat {
    /// 工具名，必须是已声明的工具之一
    pub tool: String,
    /// 工具参数，依工具 Schema 而定
    #[serde(default)]
    pub args: HashMap<String, Value>,
}

/// 返回工具调用格式的 JSON Schema 字符串，可拼入 system prompt
pub fn directive_schema_json() -> String {
    let schema = schema_for!(DirectiveFormat);
    serde_json::to_string_pretty(&schema).unwrap_or_else(|_| String::new())
}

/// 解析模型文本输出：JSON 形式的调用解析为 directive，其余为最终回复
pub fn parse_reply_text(output: &str) -> Result<ModelReply, LlmError> {
    let trimmed = output.trim();

    let json_str = if let Some(start) = trimmed.find("```json") {
        let rest = &trimmed[start + 7..];
        rest.find("```").map(|end| rest[..end].trim()).unwrap_or(rest.trim())
    } else if trimmed.starts_with('{') || trimmed.starts_with('[') {
        trimmed
    } else {
        return Ok(ModelReply::text(trimmed));
    };

    // 只有带 "tool" 键的 JSON 才算调用意图；其余（含普通方括号、花括号文本）都是最终回复
    let value: Value = match serde_json::from_str(json_str) {
        Ok(value) => value,
        Err(e) if json_str.contains("\"tool\"") => {
            return Err(LlmError::Malformed(format!("{}: {}", e, json_str)));
        }
        Err(_) => return Ok(ModelReply::text(trimmed)),
    };

    let items = match value {
        Value::Array(items) => items,
        single => vec![single],
    };
    if items.is_empty() || !items.iter().all(|item| item.get("tool").is_some_and(Value::is_string)) {
        return Ok(ModelReply::text(trimmed));
    }

    let mut calls = Vec::with_capacity(items.len());
    for item in items {
        let parsed: DirectiveFormat = serde_json::from_value(item)
            .map_err(|e| LlmError::Malformed(format!("invalid tool call: {e}")))?;
        if parsed.tool.is_empty() {
            continue;
        }
        calls.push(ToolCallDirective {
            id: format!("call_{}", uuid::Uuid::new_v4().simple()),
            name: parsed.tool,
            arguments: Value::Object(parsed.args.into_iter().collect()),
        });
    }

    if calls.is_empty() {
        Ok(ModelReply::text(trimmed))
    } else {
        Ok(ModelReply::calls(calls))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_plain_text_is_final_answer() {
        let reply = parse_reply_text("  ETH is trading at $3,000.  ").unwrap();
        assert!(!reply.has_directives());
        assert_eq!(reply.content, "ETH is trading at $3,000.");
    }

    #[test]
    fn test_single_and_fenced_directive() {
        let reply = parse_reply_text(r#"{"tool": "get_price", "args": {"symbol": "ETH"}}"#).unwrap();
        assert_eq!(reply.tool_calls.len(), 1);
        assert_eq!(reply.tool_calls[0].name, "get_price");
        assert_eq!(reply.tool_calls[0].arguments, json!({"symbol": "ETH"}));

        let fenced = "Let me check.\n```json\n{\"tool\": \"get_price\", \"args\": {\"symbol\": \"BTC\"}}\n```";
        let reply = parse_reply_text(fenced).unwrap();
        assert_eq!(reply.tool_calls[0].arguments["symbol"], "BTC");
    }

    #[test]
    fn test_array_of_directives_get_distinct_ids() {
        let reply = parse_reply_text(
            r#"[{"tool": "get_price", "args": {"symbol": "ETH"}}, {"tool": "get_price", "args": {"symbol": "BTC"}}]"#,
        )
        .unwrap();
        assert_eq!(reply.tool_calls.len(), 2);
        assert_ne!(reply.tool_calls[0].id, reply.tool_calls[1].id);
    }

    #[test]
    fn test_broken_json_is_malformed() {
        assert!(matches!(
            parse_reply_text(r#"{"tool": "get_price", "args": "#),
            Err(LlmError::Malformed(_))
        ));
    }

    #[test]
    fn test_bracketed_prose_is_final_answer() {
        for text in ["[1] ETH is trading at $3,000.", "{Summary} ETH is $3000"] {
            let reply = parse_reply_text(text).unwrap();
            assert!(!reply.has_directives());
            assert_eq!(reply.content, text);
        }
    }

    #[test]
    fn test_json_without_tool_key_is_final_answer() {
        let text = "Here is the data:\n```json\n{\"price\": 3000}\n```";
        let reply = parse_reply_text(text).unwrap();
        assert!(!reply.has_directives());
        assert_eq!(reply.content, text);

        let reply = parse_reply_text(r#"[{"tool": "get_price"}, {"price": 1}]"#).unwrap();
        assert!(!reply.has_directives());
    }

    #[test]
    fn test_directive_with_bad_args_is_malformed() {
        assert!(matches!(
            parse_reply_text(r#"{"tool": "get_price", "args": "ETH"}"#),
            Err(LlmError::Malformed(_))
        ));
    }

    #[test]
    fn test_schema_mentions_fields() {
        let schema = directive_schema_json();
        assert!(schema.contains("tool"));
        assert!(schema.contains("args"));
    }
}
