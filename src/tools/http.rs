//! 能力模块共用的 HTTP 请求封装
//!
//! ApiContext 持有会话、缓存与重试策略（构建 Agent 时显式注入）：
//! send = 缓存（仅 GET）-> 重试 -> 会话内的池化客户端发请求；HTTP 失败按状态码归类为瞬时 / 永久错误。

use std::sync::Arc;
use std::time::Duration;

use reqwest::header::{HeaderMap, RETRY_AFTER};
use reqwest::{Method, StatusCode};
use serde_json::{json, Value};

use crate::core::{AgentError, ResponseCache, RetryPolicy, SessionManager, TransientKind};

/// 缓存方式
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheMode {
    /// 使用缓存默认 TTL
    Default,
    Ttl(Duration),
    /// 不读也不写缓存
    Bypass,
}

/// 一次 JSON API 请求
#[derive(Debug, Clone)]
pub struct ApiRequest {
    pub method: Method,
    pub url: String,
    pub query: Vec<(String, String)>,
    pub headers: Vec<(String, String)>,
    pub body: Option<Value>,
    pub cache: CacheMode,
}

impl ApiRequest {
    pub fn get(url: impl Into<String>) -> Self {
        Self {
            method: Method::GET,
            url: url.into(),
            query: Vec::new(),
            headers: Vec::new(),
            body: None,
            cache: CacheMode::Default,
        }
    }

    /// POST 默认不缓存
    pub fn post(url: impl Into<String>, body: Value) -> Self {
        Self {
            method: Method::POST,
            body: Some(body),
            cache: CacheMode::Bypass,
            ..Self::get(url)
        }
    }

    pub fn query(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.query.push((key.into(), value.into()));
        self
    }

    pub fn header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((key.into(), value.into()));
        self
    }

    pub fn cache_for(mut self, ttl: Duration) -> Self {
        self.cache = CacheMode::Ttl(ttl);
        self
    }

    pub fn no_cache(mut self) -> Self {
        self.cache = CacheMode::Bypass;
        self
    }

    /// 参与缓存键的参数（不含请求头，避免把密钥写入键）
    pub(crate) fn cache_args(&self) -> Value {
        let mut query = self.query.clone();
        query.sort();
        json!({
            "method": self.method.as_str(),
            "url": self.url,
            "query": query,
            "body": self.body,
        })
    }
}

/// 能力模块的网络上下文
#[derive(Debug, Clone)]
pub struct ApiContext {
    session: Arc<SessionManager>,
    cache: Arc<ResponseCache>,
    retry: RetryPolicy,
}

impl ApiContext {
    pub fn new(session: Arc<SessionManager>, cache: Arc<ResponseCache>, retry: RetryPolicy) -> Self {
        Self {
            session,
            cache,
            retry,
        }
    }

    pub fn session(&self) -> &Arc<SessionManager> {
        &self.session
    }

    pub fn cache(&self) -> &Arc<ResponseCache> {
        &self.cache
    }

    pub fn retry(&self) -> &RetryPolicy {
        &self.retry
    }

    /// 发送请求；op 为操作名，参与缓存键与日志
    pub async fn send(&self, op: &str, req: ApiRequest) -> Result<Value, AgentError> {
        let ttl = match (req.method == Method::GET, req.cache) {
            (true, CacheMode::Default) => Some(None),
            (true, CacheMode::Ttl(ttl)) => Some(Some(ttl)),
            _ => None,
        };

        match ttl {
            Some(ttl) => {
                let args = req.cache_args();
                self.cache
                    .get_or_fetch(op, &args, ttl, || self.retry.run(op, || self.execute_once(&req)))
                    .await
            }
            None => self.retry.run(op, || self.execute_once(&req)).await,
        }
    }

    async fn execute_once(&self, req: &ApiRequest) -> Result<Value, AgentError> {
        let client = self.session.client()?;
        let mut builder = client.request(req.method.clone(), &req.url).query(&req.query);
        for (k, v) in &req.headers {
            builder = builder.header(k.as_str(), v.as_str());
        }
        if let Some(body) = &req.body {
            builder = builder.json(body);
        }

        let resp = builder.send().await.map_err(classify_transport_error)?;
        let status = resp.status();
        if !status.is_success() {
            let retry_after = parse_retry_after(resp.headers());
            let body = resp.text().await.unwrap_or_default();
            return Err(classify_status(status, retry_after, &body));
        }

        resp.json::<Value>()
            .await
            .map_err(|e| AgentError::Other(format!("invalid JSON response from {}: {e}", req.url)))
    }
}

/// 传输层错误归类：超时与连接失败可重试
pub fn classify_transport_error(e: reqwest::Error) -> AgentError {
    if e.is_timeout() || e.is_connect() {
        AgentError::transient(TransientKind::Timeout, e.to_string())
    } else if e.is_builder() {
        AgentError::PermanentNetwork(format!("invalid request: {e}"))
    } else {
        AgentError::Other(format!("request failed: {e}"))
    }
}

/// HTTP 状态码归类：429 限流、408 超时、5xx 服务端错误可重试，其余 4xx 为永久错误
pub fn classify_status(status: StatusCode, retry_after: Option<Duration>, body: &str) -> AgentError {
    let snippet: String = body.chars().take(200).collect();
    let message = if snippet.is_empty() {
        format!("HTTP {status}")
    } else {
        format!("HTTP {status}: {snippet}")
    };

    if status == StatusCode::TOO_MANY_REQUESTS {
        AgentError::TransientNetwork {
            kind: TransientKind::RateLimited,
            message,
            retry_after,
        }
    } else if status == StatusCode::REQUEST_TIMEOUT {
        AgentError::transient(TransientKind::Timeout, message)
    } else if status.is_server_error() {
        AgentError::transient(TransientKind::ServerError, message)
    } else {
        AgentError::PermanentNetwork(message)
    }
}

/// 从 classify_status 生成的永久错误中取回 HTTP 状态码
pub fn permanent_status(err: &AgentError) -> Option<u16> {
    match err {
        AgentError::PermanentNetwork(message) => message.strip_prefix("HTTP ")?.get(..3)?.parse().ok(),
        _ => None,
    }
}

fn parse_retry_after(headers: &HeaderMap) -> Option<Duration> {
    headers
        .get(RETRY_AFTER)?
        .to_str()
        .ok()?
        .trim()
        .parse::<u64>()
        .ok()
        .map(Duration::from_secs)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{HttpSettings, RetryConfig};

    fn context() -> ApiContext {
        ApiContext::new(
            SessionManager::new(HttpSettings::default()),
            Arc::new(ResponseCache::default()),
            RetryPolicy::new(RetryConfig::default()),
        )
    }

    #[test]
    fn test_status_classification() {
        let rl = classify_status(StatusCode::TOO_MANY_REQUESTS, Some(Duration::from_secs(2)), "");
        assert!(matches!(
            rl,
            AgentError::TransientNetwork { kind: TransientKind::RateLimited, retry_after: Some(_), .. }
        ));
        assert!(classify_status(StatusCode::BAD_GATEWAY, None, "").is_transient());
        assert!(classify_status(StatusCode::REQUEST_TIMEOUT, None, "").is_transient());
        let bad = classify_status(StatusCode::UNAUTHORIZED, None, "invalid api key");
        assert!(matches!(bad, AgentError::PermanentNetwork(ref m) if m.contains("invalid api key")));
        assert_eq!(permanent_status(&bad), Some(401));
        assert_eq!(permanent_status(&classify_status(StatusCode::NOT_FOUND, None, "")), Some(404));
        assert_eq!(permanent_status(&AgentError::PermanentNetwork("invalid request".into())), None);
    }

    #[test]
    fn test_retry_after_header() {
        let mut headers = HeaderMap::new();
        headers.insert(RETRY_AFTER, "12".parse().unwrap());
        assert_eq!(parse_retry_after(&headers), Some(Duration::from_secs(12)));
        headers.insert(RETRY_AFTER, "Wed, 21 Oct 2015 07:28:00 GMT".parse().unwrap());
        assert_eq!(parse_retry_after(&headers), None);
    }

    #[test]
    fn test_cache_args_ignore_query_order_and_headers() {
        let a = ApiRequest::get("https://api.example.com/price")
            .query("ids", "ethereum")
            .query("vs", "usd")
            .header("x-api-key", "secret-1");
        let b = ApiRequest::get("https://api.example.com/price")
            .query("vs", "usd")
            .query("ids", "ethereum")
            .header("x-api-key", "secret-2");
        assert_eq!(a.cache_args(), b.cache_args());
    }

    #[tokio::test]
    async fn test_send_without_session_fails_fast() {
        let ctx = context();
        let err = ctx
            .send("price", ApiRequest::get("http://127.0.0.1:9/price"))
            .await
            .unwrap_err();
        assert!(matches!(err, AgentError::ResourceState(_)));
        assert_eq!(ctx.cache().stats().entries, 0);
    }

    #[tokio::test]
    async fn test_cache_hit_skips_network() {
        let ctx = context();
        let req = ApiRequest::get("http://127.0.0.1:9/price").query("ids", "ethereum");
        ctx.cache().insert(
            crate::core::CacheKey::new("price", &req.cache_args()),
            json!({"ethereum": {"usd": 3000}}),
            Duration::from_secs(60),
        );

        // 会话未获取：若真的发请求会得到 ResourceState
        let value = ctx.send("price", req).await.unwrap();
        assert_eq!(value["ethereum"]["usd"], 3000);
        assert_eq!(ctx.cache().stats().hits, 1);
    }
}
