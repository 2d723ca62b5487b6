//! 重试包装：对瞬时失败（超时 / 限流 / 5xx）按指数退避重试
//!
//! 非瞬时失败立即返回；重试次数耗尽时返回 RetryExhausted（携带最后一次错误）。
//! 被包装的操作必须可重复执行（读类请求），幂等性由调用方保证。

use std::future::Future;
use std::time::Duration;

use crate::core::AgentError;

/// 重试配置：最大尝试次数与退避区间
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// 最大尝试次数（含首次），最小为 1
    pub max_attempts: u32,
    /// 首次重试前的等待时间，之后每次翻倍
    pub base_delay: Duration,
    /// 单次等待上限
    pub max_delay: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
        }
    }
}

impl RetryConfig {
    /// 第 attempt 次（从 1 开始）失败后的退避时间：base * 2^(attempt-1)，不超过 max_delay
    pub fn backoff(&self, attempt: u32) -> Duration {
        let exp = attempt.saturating_sub(1).min(16);
        self.base_delay
            .saturating_mul(1u32 << exp)
            .min(self.max_delay)
    }
}

/// 一次重试过程的状态：已尝试次数与最后一次错误
#[derive(Debug, Clone, Default)]
pub struct RetryState {
    pub attempts: u32,
    pub last_error: Option<AgentError>,
}

/// 重试策略：由能力模块显式持有（不使用全局单例）
#[derive(Debug, Clone, Default)]
pub struct RetryPolicy {
    config: RetryConfig,
}

impl RetryPolicy {
    pub fn new(config: RetryConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &RetryConfig {
        &self.config
    }

    /// 执行 op，瞬时失败时重试
    pub async fn run<T, F, Fut>(&self, op_name: &str, op: F) -> Result<T, AgentError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, AgentError>>,
    {
        self.run_with_state(op_name, op).await.0
    }

    /// 同 run，额外返回 RetryState（观察实际尝试次数）
    pub async fn run_with_state<T, F, Fut>(
        &self,
        op_name: &str,
        mut op: F,
    ) -> (Result<T, AgentError>, RetryState)
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, AgentError>>,
    {
        let max_attempts = self.config.max_attempts.max(1);
        let mut state = RetryState::default();

        loop {
            state.attempts += 1;
            match op().await {
                Ok(value) => {
                    if state.attempts > 1 {
                        tracing::debug!(op = op_name, attempts = state.attempts, "succeeded after retry");
                    }
                    return (Ok(value), state);
                }
                Err(e) if !e.is_transient() => {
                    state.last_error = Some(e.clone());
                    return (Err(e), state);
                }
                Err(e) => {
                    state.last_error = Some(e.clone());
                    if state.attempts >= max_attempts {
                        tracing::error!(op = op_name, attempts = state.attempts, error = %e, "all retries failed");
                        let exhausted = AgentError::RetryExhausted {
                            attempts: state.attempts,
                            last: Box::new(e),
                        };
                        return (Err(exhausted), state);
                    }
                    let delay = self.delay_for(state.attempts, &e);
                    tracing::warn!(
                        op = op_name,
                        attempt = state.attempts,
                        max_attempts,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "transient failure, retrying"
                    );
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }

    /// 退避时间；若服务端给出 Retry-After 则至少等待该时长，仍受 max_delay 约束
    fn delay_for(&self, attempt: u32, err: &AgentError) -> Duration {
        let backoff = self.config.backoff(attempt);
        match err {
            AgentError::TransientNetwork {
                retry_after: Some(hint),
                ..
            } => backoff.max(*hint).min(self.config.max_delay),
            _ => backoff,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::TransientKind;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    fn policy(max_attempts: u32) -> RetryPolicy {
        RetryPolicy::new(RetryConfig {
            max_attempts,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
        })
    }

    #[test]
    fn test_backoff_doubles_and_caps() {
        let cfg = RetryConfig {
            max_attempts: 10,
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(3),
        };
        assert_eq!(cfg.backoff(1), Duration::from_millis(500));
        assert_eq!(cfg.backoff(2), Duration::from_secs(1));
        assert_eq!(cfg.backoff(3), Duration::from_secs(2));
        assert_eq!(cfg.backoff(4), Duration::from_secs(3));
        assert_eq!(cfg.backoff(40), Duration::from_secs(3));
    }

    #[tokio::test(start_paused = true)]
    async fn test_rate_limited_twice_then_success() {
        let calls = Arc::new(AtomicU32::new(0));
        let c = calls.clone();
        let start = tokio::time::Instant::now();

        let (result, state) = policy(3)
            .run_with_state("get_price", || {
                let c = c.clone();
                async move {
                    let n = c.fetch_add(1, Ordering::SeqCst) + 1;
                    if n < 3 {
                        Err(AgentError::transient(TransientKind::RateLimited, "HTTP 429"))
                    } else {
                        Ok(3000.5)
                    }
                }
            })
            .await;

        assert_eq!(result.unwrap(), 3000.5);
        assert_eq!(state.attempts, 3);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        // 1s + 2s 退避
        assert!(start.elapsed() >= Duration::from_secs(3));
    }

    #[tokio::test(start_paused = true)]
    async fn test_always_transient_exhausts() {
        let calls = Arc::new(AtomicU32::new(0));
        let c = calls.clone();

        let (result, state) = policy(4)
            .run_with_state("flaky", || {
                let c = c.clone();
                async move {
                    c.fetch_add(1, Ordering::SeqCst);
                    Err::<(), _>(AgentError::transient(TransientKind::ServerError, "HTTP 502"))
                }
            })
            .await;

        assert_eq!(calls.load(Ordering::SeqCst), 4);
        assert_eq!(state.attempts, 4);
        match result {
            Err(AgentError::RetryExhausted { attempts, last }) => {
                assert_eq!(attempts, 4);
                assert!(last.is_transient());
            }
            other => panic!("expected RetryExhausted, got {other:?}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_permanent_failure_is_not_retried() {
        let calls = Arc::new(AtomicU32::new(0));
        let c = calls.clone();

        let result = policy(5)
            .run("bad_request", || {
                let c = c.clone();
                async move {
                    c.fetch_add(1, Ordering::SeqCst);
                    Err::<(), _>(AgentError::PermanentNetwork("HTTP 400".into()))
                }
            })
            .await;

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(matches!(result, Err(AgentError::PermanentNetwork(_))));
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_after_hint_extends_backoff() {
        let calls = Arc::new(AtomicU32::new(0));
        let c = calls.clone();
        let start = tokio::time::Instant::now();

        let result = policy(2)
            .run("hinted", || {
                let c = c.clone();
                async move {
                    if c.fetch_add(1, Ordering::SeqCst) == 0 {
                        Err(AgentError::TransientNetwork {
                            kind: TransientKind::RateLimited,
                            message: "slow down".into(),
                            retry_after: Some(Duration::from_secs(7)),
                        })
                    } else {
                        Ok("ok")
                    }
                }
            })
            .await;

        assert_eq!(result.unwrap(), "ok");
        assert!(start.elapsed() >= Duration::from_secs(7));
    }
}
