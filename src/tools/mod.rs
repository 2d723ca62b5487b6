//! 工具层：Schema、注册表、执行器与能力模块的 HTTP 上下文

pub mod executor;
pub mod http;
pub mod registry;
pub mod schema;

pub use executor::{ToolExecutor, ToolOutcome};
pub use http::{classify_status, classify_transport_error, permanent_status, ApiContext, ApiRequest, CacheMode};
pub use registry::{CallContext, PreparedCall, Tool, ToolRegistry};
pub use schema::{ParamSpec, ParamType, ToolSchema};
