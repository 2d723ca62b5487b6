//! Agent 层：元数据、调用协议、事件、钩子与调度器

pub mod dispatcher;
pub mod events;
pub mod hooks;
pub mod metadata;
pub mod request;

pub use dispatcher::{Agent, AgentBuilder, DEFAULT_MAX_ITERATIONS};
pub use events::{AgentEvent, AgentUpdate};
pub use hooks::AgentHooks;
pub use metadata::{AgentMetadata, IoDescriptor};
pub use request::{AgentRequest, AgentResponse, Invocation};
