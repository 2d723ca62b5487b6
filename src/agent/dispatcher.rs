//! 调度器：call_agent 入口
//!
//! 直接模式：校验参数 -> 执行单个工具 -> 原样返回工具数据（不调用模型）。
//! 自然语言模式：system prompt + 工具 Schema + 对话 -> 模型 -> 若有工具调用则并发执行并回写结果 ->
//! 再次调用模型，直到模型给出最终文本或超过最大轮数。
//! 任何失败都转换为结构化错误响应，不向调用方抛出。

use std::sync::Arc;
use std::time::Instant;

use serde_json::{json, Value};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::agent::{
    AgentEvent, AgentHooks, AgentMetadata, AgentRequest, AgentResponse, AgentUpdate, Invocation,
};
use crate::core::{AgentError, HttpSettings, SessionGuard, SessionManager};
use crate::llm::{LlmClient, Message, ModelRequest};
use crate::tools::{CallContext, Tool, ToolExecutor, ToolRegistry, ToolSchema};

/// 默认最大工具轮数
pub const DEFAULT_MAX_ITERATIONS: usize = 6;
const DEFAULT_TOOL_TIMEOUT_SECS: u64 = 30;
const DEFAULT_TOOL_CONCURRENCY: usize = 4;
/// ToolResult 事件预览最大字符数
const RESULT_PREVIEW_CHARS: usize = 200;

/// 调度失败：错误 + 出错的工具名
struct Failure {
    error: AgentError,
    tool: Option<String>,
}

impl From<AgentError> for Failure {
    fn from(error: AgentError) -> Self {
        Self { error, tool: None }
    }
}

impl Failure {
    fn at_tool(error: AgentError, tool: &str) -> Self {
        Self {
            error,
            tool: Some(tool.to_string()),
        }
    }
}

/// Agent：元数据 + 工具注册表 + 模型客户端 + 会话
pub struct Agent {
    metadata: AgentMetadata,
    system_prompt: String,
    registry: ToolRegistry,
    schemas: Vec<ToolSchema>,
    llm: Arc<dyn LlmClient>,
    executor: ToolExecutor,
    session: Arc<SessionManager>,
    max_iterations: usize,
    hooks: Option<Arc<dyn AgentHooks>>,
    event_tx: Option<mpsc::UnboundedSender<AgentUpdate>>,
}

impl Agent {
    pub fn builder(metadata: AgentMetadata, llm: Arc<dyn LlmClient>) -> AgentBuilder {
        AgentBuilder::new(metadata, llm)
    }

    pub fn metadata(&self) -> &AgentMetadata {
        &self.metadata
    }

    pub fn system_prompt(&self) -> &str {
        &self.system_prompt
    }

    /// 已注册工具的 Schema（注册顺序）
    pub fn get_tool_schemas(&self) -> &[ToolSchema] {
        &self.schemas
    }

    pub fn registry(&self) -> &ToolRegistry {
        &self.registry
    }

    pub fn session(&self) -> &Arc<SessionManager> {
        &self.session
    }

    pub fn max_iterations(&self) -> usize {
        self.max_iterations
    }

    pub fn token_usage(&self) -> (u64, u64, u64) {
        self.llm.token_usage()
    }

    /// 进入会话作用域；guard 释放后（最后一个持有者）会话不可再用
    pub fn open(&self) -> Result<SessionGuard, AgentError> {
        self.session.acquire()
    }

    /// 调用方 JSON 协议：解析请求 -> 调用 -> 序列化响应
    pub async fn call_agent_json(&self, request: &Value) -> Value {
        match AgentRequest::from_json(request) {
            Ok(req) => self.call_agent(req).await.to_json(),
            Err(e) => AgentResponse::from_error(&e, None).to_json(),
        }
    }

    pub async fn call_agent(&self, request: AgentRequest) -> AgentResponse {
        self.call_agent_with_cancel(request, CancellationToken::new()).await
    }

    /// 可取消的调用：取消后丢弃进行中的模型/工具调用，返回 Cancelled 错误
    pub async fn call_agent_with_cancel(
        &self,
        request: AgentRequest,
        cancel: CancellationToken,
    ) -> AgentResponse {
        let start = Instant::now();
        // 调用期间保持会话客户端存活
        let _scope = self.session.retain();

        let request = match &self.hooks {
            Some(h) => h.before_call(&request).await.unwrap_or(request),
            None => request,
        };
        let mode = match &request.invocation {
            Invocation::Query(_) => "query",
            Invocation::Tool { .. } => "tool",
        };
        tracing::info!(
            agent = %self.metadata.name,
            mode,
            task_id = ?request.task_id,
            "call_agent start"
        );

        let result = tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(Failure::from(AgentError::Cancelled)),
            r = self.dispatch(&request) => r,
        };

        let mut response = match result {
            Ok(r) => r,
            Err(Failure { error, tool }) => {
                tracing::warn!(
                    agent = %self.metadata.name,
                    kind = error.kind(),
                    tool = ?tool,
                    "call_agent failed: {}",
                    error
                );
                AgentResponse::from_error(&error, tool)
            }
        };
        if let Some(h) = &self.hooks {
            if let Some(replaced) = h.after_call(&response).await {
                response = replaced;
            }
        }

        let elapsed_ms = start.elapsed().as_millis() as u64;
        let event = match &response {
            AgentResponse::Success { .. } => AgentEvent::Final { elapsed_ms },
            AgentResponse::Error { message, kind, .. } => AgentEvent::Error {
                kind: kind.clone(),
                message: message.clone(),
            },
        };
        self.emit(&request, event);
        tracing::info!(
            agent = %self.metadata.name,
            mode,
            ok = response.is_success(),
            elapsed_ms,
            "call_agent finished"
        );
        response
    }

    async fn dispatch(&self, request: &AgentRequest) -> Result<AgentResponse, Failure> {
        let ctx = CallContext {
            session_context: request.session_context.clone(),
            task_id: request.task_id.clone(),
        };
        match &request.invocation {
            Invocation::Tool { name, arguments } => {
                let data = self.call_tool(request, name, arguments, &ctx).await?;
                Ok(AgentResponse::success("", data))
            }
            Invocation::Query(query) => self.run_query(request, query, &ctx).await,
        }
    }

    /// 直接调用：参数不合法时 handler 不会被执行
    async fn call_tool(
        &self,
        request: &AgentRequest,
        name: &str,
        arguments: &Value,
        ctx: &CallContext,
    ) -> Result<Value, Failure> {
        let call = self
            .registry
            .prepare(name, arguments)
            .map_err(|e| Failure::at_tool(e, name))?;
        self.emit(
            request,
            AgentEvent::ToolCall {
                tool: name.to_string(),
                args: Value::Object(call.args.clone()),
            },
        );
        let result = self.executor.execute(&call, ctx).await;
        self.emit(request, tool_result_event(name, &result));
        result.map_err(|e| Failure::at_tool(e, name))
    }

    async fn run_query(
        &self,
        request: &AgentRequest,
        query: &str,
        ctx: &CallContext,
    ) -> Result<AgentResponse, Failure> {
        let mut conversation = vec![Message::user(query)];
        let mut results: Vec<Value> = Vec::new();
        let mut turns = 0usize;

        loop {
            self.emit(
                request,
                AgentEvent::Thinking {
                    agent: self.metadata.name.clone(),
                    iteration: turns,
                },
            );
            let model_request = ModelRequest {
                system_prompt: self.system_prompt.clone(),
                tools: self.schemas.clone(),
                conversation: conversation.clone(),
                model: self.metadata.large_model_id.clone(),
            };
            let reply = self
                .llm
                .complete(&model_request)
                .await
                .map_err(AgentError::from)?;

            if !reply.has_directives() {
                let text = reply.content.trim();
                if text.is_empty() {
                    return Err(AgentError::ModelCommunication(
                        "model returned neither text nor tool calls".to_string(),
                    )
                    .into());
                }
                return Ok(AgentResponse::success(text, collected_data(results)));
            }

            if turns >= self.max_iterations {
                return Err(AgentError::LoopLimitExceeded(self.max_iterations).into());
            }
            turns += 1;
            tracing::debug!(
                agent = %self.metadata.name,
                turn = turns,
                calls = reply.tool_calls.len(),
                "tool turn"
            );

            for d in &reply.tool_calls {
                self.emit(
                    request,
                    AgentEvent::ToolCall {
                        tool: d.name.clone(),
                        args: d.arguments.clone(),
                    },
                );
            }
            let outcomes = self
                .executor
                .execute_turn(&self.registry, &reply.tool_calls, ctx)
                .await;

            conversation.push(Message::assistant_tool_calls(
                reply.content.clone(),
                reply.tool_calls.clone(),
            ));
            for (directive, outcome) in reply.tool_calls.iter().zip(outcomes) {
                self.emit(request, tool_result_event(&outcome.tool, &outcome.result));
                let (content, record) = match &outcome.result {
                    Ok(v) => (
                        v.to_string(),
                        json!({"tool": outcome.tool, "arguments": directive.arguments, "result": v}),
                    ),
                    Err(e) => {
                        let err = json!({"error": e.to_string(), "kind": e.kind()});
                        (
                            err.to_string(),
                            json!({"tool": outcome.tool, "arguments": directive.arguments, "error": err}),
                        )
                    }
                };
                conversation.push(Message::tool_result(&outcome.call_id, &outcome.tool, content));
                results.push(record);
            }

            if request.raw_data_only {
                return Ok(AgentResponse::success("", collected_data(results)));
            }
        }
    }

    fn emit(&self, request: &AgentRequest, event: AgentEvent) {
        if let Some(tx) = &self.event_tx {
            let _ = tx.send(AgentUpdate::new(request.task_id.clone(), event));
        }
    }
}

fn collected_data(results: Vec<Value>) -> Value {
    if results.is_empty() {
        json!({})
    } else {
        json!({ "tool_results": results })
    }
}

fn tool_result_event(tool: &str, result: &Result<Value, AgentError>) -> AgentEvent {
    let text = match result {
        Ok(v) => v.to_string(),
        Err(e) => e.to_string(),
    };
    let preview = if text.chars().count() > RESULT_PREVIEW_CHARS {
        format!("{}...", text.chars().take(RESULT_PREVIEW_CHARS).collect::<String>())
    } else {
        text
    };
    AgentEvent::ToolResult {
        tool: tool.to_string(),
        ok: result.is_ok(),
        preview,
    }
}

/// Agent 构建器：工具注册错误在 build 时返回
pub struct AgentBuilder {
    metadata: AgentMetadata,
    llm: Arc<dyn LlmClient>,
    system_prompt: String,
    tools: Vec<Arc<dyn Tool>>,
    session: Option<Arc<SessionManager>>,
    max_iterations: usize,
    tool_timeout_secs: u64,
    tool_concurrency: usize,
    hooks: Option<Arc<dyn AgentHooks>>,
    event_tx: Option<mpsc::UnboundedSender<AgentUpdate>>,
}

impl AgentBuilder {
    pub fn new(metadata: AgentMetadata, llm: Arc<dyn LlmClient>) -> Self {
        Self {
            metadata,
            llm,
            system_prompt: String::new(),
            tools: Vec::new(),
            session: None,
            max_iterations: DEFAULT_MAX_ITERATIONS,
            tool_timeout_secs: DEFAULT_TOOL_TIMEOUT_SECS,
            tool_concurrency: DEFAULT_TOOL_CONCURRENCY,
            hooks: None,
            event_tx: None,
        }
    }

    pub fn system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.system_prompt = prompt.into();
        self
    }

    pub fn tool(mut self, tool: impl Tool + 'static) -> Self {
        self.tools.push(Arc::new(tool));
        self
    }

    pub fn tool_arc(mut self, tool: Arc<dyn Tool>) -> Self {
        self.tools.push(tool);
        self
    }

    /// 共享会话（工具的 ApiContext 应使用同一个 SessionManager）
    pub fn session(mut self, session: Arc<SessionManager>) -> Self {
        self.session = Some(session);
        self
    }

    pub fn max_iterations(mut self, n: usize) -> Self {
        self.max_iterations = n;
        self
    }

    pub fn tool_timeout_secs(mut self, secs: u64) -> Self {
        self.tool_timeout_secs = secs;
        self
    }

    pub fn tool_concurrency(mut self, n: usize) -> Self {
        self.tool_concurrency = n;
        self
    }

    pub fn hooks(mut self, hooks: Arc<dyn AgentHooks>) -> Self {
        self.hooks = Some(hooks);
        self
    }

    pub fn event_sender(mut self, tx: mpsc::UnboundedSender<AgentUpdate>) -> Self {
        self.event_tx = Some(tx);
        self
    }

    pub fn build(self) -> Result<Agent, AgentError> {
        let mut registry = ToolRegistry::new();
        for tool in self.tools {
            registry.register_arc(tool)?;
        }
        let schemas = registry.get_tool_schemas();
        tracing::info!(
            agent = %self.metadata.name,
            tools = ?registry.tool_names(),
            "agent built"
        );
        Ok(Agent {
            metadata: self.metadata,
            system_prompt: self.system_prompt,
            registry,
            schemas,
            llm: self.llm,
            executor: ToolExecutor::new(self.tool_timeout_secs, self.tool_concurrency),
            session: self
                .session
                .unwrap_or_else(|| SessionManager::new(HttpSettings::default())),
            max_iterations: self.max_iterations,
            hooks: self.hooks,
            event_tx: self.event_tx,
        })
    }
}
