//! 会话管理：每个 Agent 实例持有一个池化 HTTP 客户端
//!
//! 状态机：Uninitialized -> Acquired（首次 acquire）-> Released（最后一个 guard 释放）；Released 为终态。
//! 作用域由 SessionGuard 表示，Drop 时释放，因此错误返回、panic、取消等路径都会释放且只释放一次。
//! 并发 / 嵌套 acquire 按引用计数处理。

use std::sync::{Arc, Mutex};
use std::time::Duration;

use reqwest::Client;

use crate::core::AgentError;

/// 会话状态
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Uninitialized,
    Acquired,
    Released,
}

impl SessionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionState::Uninitialized => "uninitialized",
            SessionState::Acquired => "acquired",
            SessionState::Released => "released",
        }
    }
}

/// 池化客户端参数
#[derive(Debug, Clone)]
pub struct HttpSettings {
    pub timeout: Duration,
    pub pool_max_idle_per_host: usize,
    pub user_agent: String,
}

impl Default for HttpSettings {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(30),
            pool_max_idle_per_host: 8,
            user_agent: concat!("mesh-agent/", env!("CARGO_PKG_VERSION")).to_string(),
        }
    }
}

#[derive(Debug)]
struct SessionInner {
    state: SessionState,
    holders: usize,
    client: Option<Client>,
}

/// 会话管理器
#[derive(Debug)]
pub struct SessionManager {
    inner: Mutex<SessionInner>,
    settings: HttpSettings,
}

impl SessionManager {
    pub fn new(settings: HttpSettings) -> Arc<Self> {
        Arc::new(Self {
            inner: Mutex::new(SessionInner {
                state: SessionState::Uninitialized,
                holders: 0,
                client: None,
            }),
            settings,
        })
    }

    pub fn state(&self) -> SessionState {
        self.lock().state
    }

    /// 当前持有作用域的数量
    pub fn holders(&self) -> usize {
        self.lock().holders
    }

    /// 进入作用域：首次进入时创建客户端；已释放则失败
    pub fn acquire(self: &Arc<Self>) -> Result<SessionGuard, AgentError> {
        let mut inner = self.lock();
        match inner.state {
            SessionState::Released => {
                return Err(AgentError::ResourceState(
                    "session already released".to_string(),
                ))
            }
            SessionState::Uninitialized => {
                let client = self.build_client()?;
                inner.client = Some(client);
                inner.state = SessionState::Acquired;
                tracing::info!("session acquired");
            }
            SessionState::Acquired => {}
        }
        inner.holders += 1;
        Ok(SessionGuard {
            manager: Arc::clone(self),
            released: false,
        })
    }

    /// 仅在已获取时嵌套进入（调用期间保持客户端存活），否则返回 None
    pub fn retain(self: &Arc<Self>) -> Option<SessionGuard> {
        let mut inner = self.lock();
        if inner.state != SessionState::Acquired {
            return None;
        }
        inner.holders += 1;
        Some(SessionGuard {
            manager: Arc::clone(self),
            released: false,
        })
    }

    /// 获取池化客户端（克隆共享同一连接池）；未获取或已释放时立即失败
    pub fn client(&self) -> Result<Client, AgentError> {
        let inner = self.lock();
        match (&inner.state, &inner.client) {
            (SessionState::Acquired, Some(client)) => Ok(client.clone()),
            (state, _) => Err(AgentError::ResourceState(format!(
                "network client used while session is {}",
                state.as_str()
            ))),
        }
    }

    fn build_client(&self) -> Result<Client, AgentError> {
        Client::builder()
            .timeout(self.settings.timeout)
            .pool_max_idle_per_host(self.settings.pool_max_idle_per_host)
            .user_agent(self.settings.user_agent.clone())
            .build()
            .map_err(|e| AgentError::ResourceState(format!("failed to build HTTP client: {e}")))
    }

    fn release_one(&self) {
        let mut inner = self.lock();
        inner.holders = inner.holders.saturating_sub(1);
        if inner.holders == 0 && inner.state == SessionState::Acquired {
            inner.client = None;
            inner.state = SessionState::Released;
            tracing::info!("session released");
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, SessionInner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// 作用域守卫：显式 release 或 Drop 时释放一次
#[derive(Debug)]
pub struct SessionGuard {
    manager: Arc<SessionManager>,
    released: bool,
}

impl SessionGuard {
    pub fn client(&self) -> Result<Client, AgentError> {
        self.manager.client()
    }

    pub fn release(mut self) {
        self.release_inner();
    }

    fn release_inner(&mut self) {
        if !self.released {
            self.released = true;
            self.manager.release_one();
        }
    }
}

impl Drop for SessionGuard {
    fn drop(&mut self) {
        self.release_inner();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn manager() -> Arc<SessionManager> {
        SessionManager::new(HttpSettings::default())
    }

    #[test]
    fn test_client_before_acquire_fails() {
        let m = manager();
        assert_eq!(m.state(), SessionState::Uninitialized);
        assert!(matches!(m.client(), Err(AgentError::ResourceState(_))));
        assert!(m.retain().is_none());
    }

    #[test]
    fn test_scope_exit_releases_and_is_terminal() {
        let m = manager();
        {
            let guard = m.acquire().unwrap();
            assert_eq!(m.state(), SessionState::Acquired);
            assert!(guard.client().is_ok());
        }
        assert_eq!(m.state(), SessionState::Released);
        assert_eq!(m.holders(), 0);
        assert!(matches!(m.client(), Err(AgentError::ResourceState(_))));
        assert!(matches!(m.acquire(), Err(AgentError::ResourceState(_))));
    }

    #[test]
    fn test_nested_scopes_release_once() {
        let m = manager();
        let outer = m.acquire().unwrap();
        let inner = m.acquire().unwrap();
        let retained = m.retain().unwrap();
        assert_eq!(m.holders(), 3);

        inner.release();
        drop(retained);
        assert_eq!(m.state(), SessionState::Acquired);
        assert!(m.client().is_ok());

        outer.release();
        assert_eq!(m.state(), SessionState::Released);
        assert_eq!(m.holders(), 0);
    }

    #[test]
    fn test_error_path_inside_scope_still_releases() {
        fn fails_mid_scope(m: &Arc<SessionManager>) -> Result<(), AgentError> {
            let guard = m.acquire()?;
            let _client = guard.client()?;
            Err(AgentError::PermanentNetwork("HTTP 400".into()))
        }

        let m = manager();
        assert!(fails_mid_scope(&m).is_err());
        assert_eq!(m.state(), SessionState::Released);
        assert!(matches!(m.client(), Err(AgentError::ResourceState(_))));
    }

    #[test]
    fn test_panic_inside_scope_still_releases() {
        let m = manager();
        let m2 = m.clone();
        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(move || {
            let _guard = m2.acquire().unwrap();
            panic!("handler blew up");
        }));
        assert!(result.is_err());
        assert_eq!(m.state(), SessionState::Released);
    }

    #[tokio::test]
    async fn test_concurrent_scopes_share_one_client() {
        let m = manager();
        let outer = m.acquire().unwrap();

        let mut handles = Vec::new();
        for _ in 0..8 {
            let m = m.clone();
            handles.push(tokio::spawn(async move {
                let guard = m.acquire().unwrap();
                tokio::task::yield_now().await;
                guard.client().is_ok()
            }));
        }
        for h in handles {
            assert!(h.await.unwrap());
        }

        assert_eq!(m.holders(), 1);
        assert_eq!(m.state(), SessionState::Acquired);
        drop(outer);
        assert_eq!(m.state(), SessionState::Released);
    }
}
