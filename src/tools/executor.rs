//! 工具执行器
//!
//! 对每次调用施加超时，并输出结构化审计日志（JSON）；
//! execute_turn 并发执行同一轮的全部 directive（Semaphore 限制并发），结果按 directive 顺序返回，
//! 全部完成后才返回（轮与轮之间的屏障）。

use std::sync::Arc;
use std::time::{Duration, Instant};

use futures_util::future::join_all;
use serde_json::Value;
use tokio::sync::Semaphore;
use tokio::time::timeout;

use crate::core::{AgentError, TransientKind};
use crate::llm::ToolCallDirective;
use crate::tools::{CallContext, PreparedCall, ToolRegistry};

/// 单个 directive 的执行结果
#[derive(Debug, Clone)]
pub struct ToolOutcome {
    pub call_id: String,
    pub tool: String,
    pub result: Result<Value, AgentError>,
}

/// 工具执行器：超时 + 并发上限
#[derive(Debug, Clone)]
pub struct ToolExecutor {
    timeout: Duration,
    permits: Arc<Semaphore>,
}

impl ToolExecutor {
    pub fn new(timeout_secs: u64, max_concurrent: usize) -> Self {
        Self {
            timeout: Duration::from_secs(timeout_secs),
            permits: Arc::new(Semaphore::new(max_concurrent.max(1))),
        }
    }

    /// 执行已校验的调用；超时归类为 Timeout 瞬时错误
    pub async fn execute(&self, call: &PreparedCall, ctx: &CallContext) -> Result<Value, AgentError> {
        let _permit = self
            .permits
            .acquire()
            .await
            .map_err(|_| AgentError::Other("tool executor closed".to_string()))?;

        let start = Instant::now();
        let args_preview = args_preview(&Value::Object(call.args.clone()));
        let result = timeout(self.timeout, call.invoke(ctx)).await;

        let outcome = match &result {
            Ok(Ok(_)) => "ok",
            Ok(Err(e)) => e.kind(),
            Err(_) => "timeout",
        };
        let audit = serde_json::json!({
            "event": "tool_audit",
            "tool": call.name,
            "ok": matches!(result, Ok(Ok(_))),
            "outcome": outcome,
            "duration_ms": start.elapsed().as_millis() as u64,
            "args_preview": args_preview,
            "task_id": ctx.task_id,
        });
        tracing::info!(audit = %audit.to_string(), "tool");

        match result {
            Ok(r) => r,
            Err(_) => Err(AgentError::transient(
                TransientKind::Timeout,
                format!("tool '{}' timed out after {:?}", call.name, self.timeout),
            )),
        }
    }

    /// 并发执行一轮 directive；未知工具或参数错误作为该 directive 的失败结果，不影响其它 directive
    pub async fn execute_turn(
        &self,
        registry: &ToolRegistry,
        directives: &[ToolCallDirective],
        ctx: &CallContext,
    ) -> Vec<ToolOutcome> {
        let futures = directives.iter().map(|d| async move {
            let result = match registry.prepare(&d.name, &d.arguments) {
                Ok(call) => self.execute(&call, ctx).await,
                Err(e) => Err(e),
            };
            ToolOutcome {
                call_id: d.id.clone(),
                tool: d.name.clone(),
                result,
            }
        });
        join_all(futures).await
    }
}

fn args_preview(args: &Value) -> String {
    let s = args.to_string();
    if s.len() > 200 {
        format!("{}...", s.chars().take(200).collect::<String>())
    } else {
        s
    }
}
