//! 核心层：错误分类、重试、缓存、会话管理

pub mod cache;
pub mod error;
pub mod retry;
pub mod session;

pub use cache::{CacheKey, CacheStats, ResponseCache};
pub use error::{AgentError, TransientKind};
pub use retry::{RetryConfig, RetryPolicy, RetryState};
pub use session::{HttpSettings, SessionGuard, SessionManager, SessionState};
