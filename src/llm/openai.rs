//! OpenAI 兼容 API 客户端
//!
//! 通过 async_openai 调用任意 OpenAI 兼容端点（可配置 base_url）。
//! native_tools=true 时使用原生 function calling；否则把工具列表与调用格式写入 system prompt，按文本协议解析回复。

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_openai::config::OpenAIConfig;
use async_openai::types::chat::{
    ChatCompletionRequestAssistantMessageArgs, ChatCompletionRequestMessage,
    ChatCompletionRequestSystemMessageArgs, ChatCompletionRequestUserMessageArgs,
    CreateChatCompletionRequest, CreateChatCompletionRequestArgs, CreateChatCompletionResponse,
};
use async_openai::Client;
use async_trait::async_trait;
use serde_json::{json, Value};

use crate::llm::parser::{directive_schema_json, parse_reply_text};
use crate::llm::{LlmClient, LlmError, Message, ModelReply, ModelRequest, Role, ToolCallDirective};

/// Token 使用统计（累计值）
#[derive(Debug, Clone, Default)]
pub struct TokenUsage {
    pub prompt_tokens: Arc<AtomicU64>,
    pub completion_tokens: Arc<AtomicU64>,
    pub total_tokens: Arc<AtomicU64>,
}

impl TokenUsage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&self, prompt: u64, completion: u64) {
        self.prompt_tokens.fetch_add(prompt, Ordering::Relaxed);
        self.completion_tokens.fetch_add(completion, Ordering::Relaxed);
        self.total_tokens.fetch_add(prompt + completion, Ordering::Relaxed);
    }

    pub fn get(&self) -> (u64, u64, u64) {
        (
            self.prompt_tokens.load(Ordering::Relaxed),
            self.completion_tokens.load(Ordering::Relaxed),
            self.total_tokens.load(Ordering::Relaxed),
        )
    }
}

/// 客户端参数
#[derive(Debug, Clone)]
pub struct OpenAiSettings {
    pub base_url: String,
    pub model: String,
    pub api_key: Option<String>,
    pub temperature: f32,
    pub timeout: Duration,
    pub native_tools: bool,
}

/// OpenAI 兼容客户端：持有 Client 与参数，complete 时转 ModelRequest 为 API 请求并解析首条 choice
pub struct OpenAiClient {
    client: Client<OpenAIConfig>,
    settings: OpenAiSettings,
    /// 累计 token 使用统计
    pub usage: TokenUsage,
}

impl OpenAiClient {
    pub fn new(settings: OpenAiSettings) -> Self {
        // 未配置 key 时 OpenAIConfig 回退到 OPENAI_API_KEY 环境变量
        let mut config = OpenAIConfig::new().with_api_base(settings.base_url.trim_end_matches('/'));
        if let Some(key) = &settings.api_key {
            config = config.with_api_key(key.clone());
        }

        Self {
            client: Client::with_config(config),
            settings,
            usage: TokenUsage::new(),
        }
    }

    /// 构造 /chat/completions 请求
    pub fn build_request(&self, request: &ModelRequest) -> Result<CreateChatCompletionRequest, LlmError> {
        let native = self.settings.native_tools;
        let system = if native || request.tools.is_empty() {
            request.system_prompt.clone()
        } else {
            text_protocol_prompt(request)
        };

        let mut messages = vec![ChatCompletionRequestMessage::System(
            ChatCompletionRequestSystemMessageArgs::default()
                .content(system)
                .build()
                .map_err(invalid_request)?,
        )];
        for m in &request.conversation {
            messages.push(to_openai_message(m, native)?);
        }

        let mut req = CreateChatCompletionRequestArgs::default()
            .model(request.model.as_deref().unwrap_or(&self.settings.model))
            .messages(messages)
            .temperature(self.settings.temperature)
            .build()
            .map_err(invalid_request)?;

        if native && !request.tools.is_empty() {
            let tools: Vec<Value> = request.tools.iter().map(|t| t.to_function_json()).collect();
            req.tools = Some(serde_json::from_value(Value::Array(tools)).map_err(invalid_request)?);
        }
        Ok(req)
    }

    /// 解析 /chat/completions 响应
    pub fn parse_response(&self, response: CreateChatCompletionResponse) -> Result<ModelReply, LlmError> {
        if let Some(usage) = &response.usage {
            self.usage
                .add(usage.prompt_tokens as u64, usage.completion_tokens as u64);
        }

        let message = response
            .choices
            .into_iter()
            .next()
            .map(|c| c.message)
            .ok_or_else(|| LlmError::Malformed("response has no choices".to_string()))?;
        let content = message.content.unwrap_or_default();

        let mut tool_calls = Vec::new();
        for call in message.tool_calls.unwrap_or_default() {
            let wire = serde_json::to_value(&call).map_err(|e| LlmError::Malformed(e.to_string()))?;
            tool_calls.push(directive_from_tool_call(&wire)?);
        }

        if !tool_calls.is_empty() {
            return Ok(ModelReply { content, tool_calls });
        }
        if self.settings.native_tools {
            Ok(ModelReply::text(content))
        } else {
            parse_reply_text(&content)
        }
    }
}

fn invalid_request(e: impl std::fmt::Display) -> LlmError {
    LlmError::Http(format!("invalid request: {e}"))
}

/// 原生 tool call → ToolCallDirective；arguments 为空视作 {}
fn directive_from_tool_call(call: &Value) -> Result<ToolCallDirective, LlmError> {
    let name = call
        .pointer("/function/name")
        .and_then(Value::as_str)
        .ok_or_else(|| LlmError::Malformed("tool call without function name".to_string()))?;
    let raw_args = call
        .pointer("/function/arguments")
        .and_then(Value::as_str)
        .unwrap_or("");
    let arguments = if raw_args.trim().is_empty() {
        json!({})
    } else {
        serde_json::from_str(raw_args)
            .map_err(|e| LlmError::Malformed(format!("arguments for '{name}' are not JSON: {e}")))?
    };
    let id = call["id"]
        .as_str()
        .filter(|id| !id.is_empty())
        .map(String::from)
        .unwrap_or_else(|| format!("call_{}", uuid::Uuid::new_v4().simple()));
    Ok(ToolCallDirective {
        id,
        name: name.to_string(),
        arguments,
    })
}

/// 文本协议：工具清单 + 调用格式 Schema 拼入 system prompt
fn text_protocol_prompt(request: &ModelRequest) -> String {
    let tools: Vec<Value> = request.tools.iter().map(|t| t.to_function_json()).collect();
    format!(
        "{}\n\nAvailable tools:\n{}\n\nTo call tools, reply with ONLY a JSON object (or a JSON array of objects) matching this schema:\n{}\nOtherwise reply with the final answer as plain text.",
        request.system_prompt,
        serde_json::to_string_pretty(&tools).unwrap_or_else(|_| "[]".to_string()),
        directive_schema_json()
    )
}

fn user_message(content: String) -> Result<ChatCompletionRequestMessage, LlmError> {
    Ok(ChatCompletionRequestMessage::User(
        ChatCompletionRequestUserMessageArgs::default()
            .content(content)
            .build()
            .map_err(invalid_request)?,
    ))
}

fn assistant_message(content: String) -> Result<ChatCompletionRequestMessage, LlmError> {
    Ok(ChatCompletionRequestMessage::Assistant(
        ChatCompletionRequestAssistantMessageArgs::default()
            .content(content)
            .build()
            .map_err(invalid_request)?,
    ))
}

fn to_openai_message(m: &Message, native: bool) -> Result<ChatCompletionRequestMessage, LlmError> {
    match m.role {
        Role::System => Ok(ChatCompletionRequestMessage::System(
            ChatCompletionRequestSystemMessageArgs::default()
                .content(m.content.clone())
                .build()
                .map_err(invalid_request)?,
        )),
        Role::User => user_message(m.content.clone()),
        Role::Assistant if m.tool_calls.is_empty() => assistant_message(m.content.clone()),
        // tool_calls / tool 消息按线上格式反序列化为 async_openai 类型
        Role::Assistant if native => {
            let calls: Vec<Value> = m
                .tool_calls
                .iter()
                .map(|c| {
                    json!({
                        "id": c.id,
                        "type": "function",
                        "function": {"name": c.name, "arguments": c.arguments.to_string()},
                    })
                })
                .collect();
            let content = if m.content.is_empty() {
                Value::Null
            } else {
                json!(m.content)
            };
            serde_json::from_value(json!({"role": "assistant", "content": content, "tool_calls": calls}))
                .map_err(invalid_request)
        }
        Role::Assistant => {
            let calls: Vec<Value> = m
                .tool_calls
                .iter()
                .map(|c| json!({"tool": c.name, "args": c.arguments}))
                .collect();
            assistant_message(Value::Array(calls).to_string())
        }
        Role::Tool if native => serde_json::from_value(json!({
            "role": "tool",
            "tool_call_id": m.tool_call_id.clone().unwrap_or_default(),
            "content": m.content,
        }))
        .map_err(invalid_request),
        Role::Tool => user_message(format!(
            "Tool result ({}): {}",
            m.name.as_deref().unwrap_or("tool"),
            m.content
        )),
    }
}

#[async_trait]
impl LlmClient for OpenAiClient {
    fn token_usage(&self) -> (u64, u64, u64) {
        self.usage.get()
    }

    async fn complete(&self, request: &ModelRequest) -> Result<ModelReply, LlmError> {
        let req = self.build_request(request)?;

        let response = tokio::time::timeout(self.settings.timeout, self.client.chat().create(req))
            .await
            .map_err(|_| LlmError::Timeout)?
            .map_err(|e| LlmError::Http(e.to_string()))?;

        self.parse_response(response)
    }
}
