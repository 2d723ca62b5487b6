//! 工具注册表
//!
//! 所有工具实现 Tool trait（schema / execute），由 ToolRegistry 按声明顺序注册。
//! 注册时校验 Schema 与名称唯一；调用前 prepare 解析工具名并校验参数，得到 PreparedCall。

use std::sync::Arc;

use async_trait::async_trait;
use indexmap::IndexMap;
use serde_json::{Map, Value};

use crate::core::AgentError;
use crate::tools::ToolSchema;

/// 单次调用的上下文：调用方透传的 session_context 与任务 ID
#[derive(Debug, Clone, Default)]
pub struct CallContext {
    pub session_context: Value,
    pub task_id: Option<String>,
}

/// 工具 trait：声明 Schema，并在已校验的参数上异步执行
#[async_trait]
pub trait Tool: Send + Sync {
    /// 注册时读取一次
    fn schema(&self) -> ToolSchema;

    /// 执行工具；失败须归类为 AgentError
    async fn execute(&self, args: Map<String, Value>, ctx: &CallContext) -> Result<Value, AgentError>;
}

struct RegisteredTool {
    schema: ToolSchema,
    handler: Arc<dyn Tool>,
}

/// 已解析、已校验的调用：handler + 补全默认值后的参数
#[derive(Clone)]
pub struct PreparedCall {
    pub name: String,
    pub args: Map<String, Value>,
    handler: Arc<dyn Tool>,
}

impl PreparedCall {
    pub async fn invoke(&self, ctx: &CallContext) -> Result<Value, AgentError> {
        self.handler.execute(self.args.clone(), ctx).await
    }
}

impl std::fmt::Debug for PreparedCall {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PreparedCall")
            .field("name", &self.name)
            .field("args", &self.args)
            .finish()
    }
}

/// 工具注册表：名称 -> (Schema, handler)，保持注册顺序
#[derive(Default)]
pub struct ToolRegistry {
    tools: IndexMap<String, RegisteredTool>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, tool: impl Tool + 'static) -> Result<(), AgentError> {
        self.register_arc(Arc::new(tool))
    }

    pub fn register_arc(&mut self, tool: Arc<dyn Tool>) -> Result<(), AgentError> {
        let schema = tool.schema();
        schema.check()?;
        if self.tools.contains_key(schema.name()) {
            return Err(AgentError::validation(format!(
                "tool '{}' registered twice",
                schema.name()
            )));
        }
        self.tools.insert(
            schema.name().to_string(),
            RegisteredTool {
                schema,
                handler: tool,
            },
        );
        Ok(())
    }

    /// 按注册顺序返回全部 Schema
    pub fn get_tool_schemas(&self) -> Vec<ToolSchema> {
        self.tools.values().map(|t| t.schema.clone()).collect()
    }

    pub fn schema(&self, name: &str) -> Option<&ToolSchema> {
        self.tools.get(name).map(|t| &t.schema)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.tools.contains_key(name)
    }

    pub fn tool_names(&self) -> Vec<String> {
        self.tools.keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    /// 解析工具名并校验参数；未知工具名是错误，不会静默忽略
    pub fn prepare(&self, name: &str, args: &Value) -> Result<PreparedCall, AgentError> {
        let tool = self
            .tools
            .get(name)
            .ok_or_else(|| AgentError::validation(format!("Unknown tool: {name}")))?;
        let args = tool.schema.validate_args(args)?;
        Ok(PreparedCall {
            name: name.to_string(),
            args,
            handler: tool.handler.clone(),
        })
    }

    /// OpenAI function calling 格式的工具列表
    pub fn to_function_json(&self) -> Vec<Value> {
        self.tools
            .values()
            .map(|t| t.schema.to_function_json())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::ParamSpec;
    use serde_json::json;

    struct Named(&'static str);

    #[async_trait]
    impl Tool for Named {
        fn schema(&self) -> ToolSchema {
            ToolSchema::new(self.0, "test tool")
                .required_param("text", ParamSpec::string("text to echo"))
        }

        async fn execute(&self, args: Map<String, Value>, _ctx: &CallContext) -> Result<Value, AgentError> {
            Ok(args.get("text").cloned().unwrap_or(Value::Null))
        }
    }

    #[test]
    fn test_schemas_keep_registration_order() {
        let mut reg = ToolRegistry::new();
        for name in ["zeta", "alpha", "mid"] {
            reg.register(Named(name)).unwrap();
        }
        let names: Vec<String> = reg
            .get_tool_schemas()
            .iter()
            .map(|s| s.name().to_string())
            .collect();
        assert_eq!(names, vec!["zeta", "alpha", "mid"]);
        assert_eq!(reg.get_tool_schemas(), reg.get_tool_schemas());
    }

    #[test]
    fn test_duplicate_registration_rejected() {
        let mut reg = ToolRegistry::new();
        reg.register(Named("echo")).unwrap();
        assert!(matches!(reg.register(Named("echo")), Err(AgentError::Validation(_))));
        assert_eq!(reg.len(), 1);
    }

    #[tokio::test]
    async fn test_prepare_resolves_and_validates() {
        let mut reg = ToolRegistry::new();
        reg.register(Named("echo")).unwrap();

        let err = reg.prepare("echo_xyz", &json!({"text": "hi"})).unwrap_err();
        assert!(matches!(err, AgentError::Validation(ref m) if m.contains("echo_xyz")));
        assert!(reg.prepare("echo", &json!({})).is_err());

        let call = reg.prepare("echo", &json!({"text": "hi"})).unwrap();
        let out = call.invoke(&CallContext::default()).await.unwrap();
        assert_eq!(out, json!("hi"));
    }
}
