//! 响应缓存：按「操作名 + 规范化参数」做键，带 TTL
//!
//! 参数中对象的键顺序不影响缓存键；过期条目视为不存在；只缓存成功结果。
//! 并发的同键请求可能都未命中并各自写入（后写覆盖），不做 single-flight 合并。

use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::RwLock;
use std::time::Duration;

use serde_json::{Map, Value};
use tokio::time::Instant;

use crate::core::AgentError;

/// 单条目 TTL 上限（约 100 年）
const MAX_TTL: Duration = Duration::from_secs(100 * 365 * 24 * 3600);

/// 缓存键：`{op}:{规范化 JSON 参数}`
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey(String);

impl CacheKey {
    pub fn new(op: &str, args: &Value) -> Self {
        Self(format!("{}:{}", op, canonicalize(args)))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// 递归按键名排序对象，得到与插入顺序无关的 JSON
fn canonicalize(value: &Value) -> Value {
    match value {
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            let mut sorted = Map::with_capacity(map.len());
            for k in keys {
                sorted.insert(k.clone(), canonicalize(&map[k]));
            }
            Value::Object(sorted)
        }
        Value::Array(items) => Value::Array(items.iter().map(canonicalize).collect()),
        other => other.clone(),
    }
}

#[derive(Debug, Clone)]
struct CacheEntry {
    value: Value,
    inserted_at: Instant,
    expires_at: Instant,
}

impl CacheEntry {
    fn is_fresh(&self, now: Instant) -> bool {
        now < self.expires_at
    }
}

/// 命中 / 未命中统计
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub entries: usize,
}

/// 缓存：由 Agent 构建时创建并显式注入能力模块
#[derive(Debug)]
pub struct ResponseCache {
    entries: RwLock<HashMap<CacheKey, CacheEntry>>,
    default_ttl: Duration,
    max_entries: usize,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl Default for ResponseCache {
    fn default() -> Self {
        Self::new(Duration::from_secs(300), 10_000)
    }
}

impl ResponseCache {
    pub fn new(default_ttl: Duration, max_entries: usize) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            default_ttl,
            max_entries: max_entries.max(1),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    pub fn default_ttl(&self) -> Duration {
        self.default_ttl
    }

    /// 读取未过期的条目
    pub fn get(&self, key: &CacheKey) -> Option<Value> {
        let now = Instant::now();
        let entries = self.entries.read().unwrap_or_else(|e| e.into_inner());
        entries
            .get(key)
            .filter(|entry| entry.is_fresh(now))
            .map(|entry| entry.value.clone())
    }

    /// 写入条目；超过容量时先清理过期条目，再按写入时间批量淘汰最旧的，降到容量的九成
    pub fn insert(&self, key: CacheKey, value: Value, ttl: Duration) {
        let now = Instant::now();
        // TTL 过大时按上限截断，避免 Instant 溢出
        let expires_at = now
            .checked_add(ttl)
            .or_else(|| now.checked_add(MAX_TTL))
            .unwrap_or(now);
        let mut entries = self.entries.write().unwrap_or_else(|e| e.into_inner());
        entries.insert(
            key.clone(),
            CacheEntry {
                value,
                inserted_at: now,
                expires_at,
            },
        );

        if entries.len() <= self.max_entries {
            return;
        }
        let before = entries.len();
        entries.retain(|_, entry| entry.is_fresh(now));

        let target = (self.max_entries * 9 / 10).max(1);
        if entries.len() > target {
            let mut by_age: Vec<(CacheKey, Instant)> = entries
                .iter()
                .filter(|(k, _)| **k != key)
                .map(|(k, entry)| (k.clone(), entry.inserted_at))
                .collect();
            by_age.sort_by_key(|(_, at)| *at);
            let excess = entries.len() - target;
            for (k, _) in by_age.into_iter().take(excess) {
                entries.remove(&k);
            }
        }
        tracing::debug!(evicted = before - entries.len(), remaining = entries.len(), "cache trimmed");
    }

    /// 显式失效某个操作 + 参数的条目
    pub fn invalidate(&self, op: &str, args: &Value) -> bool {
        let key = CacheKey::new(op, args);
        let mut entries = self.entries.write().unwrap_or_else(|e| e.into_inner());
        entries.remove(&key).is_some()
    }

    pub fn clear(&self) {
        self.entries
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .clear();
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            entries: self.entries.read().unwrap_or_else(|e| e.into_inner()).len(),
        }
    }

    /// 命中则直接返回缓存值（不调用 fetch）；未命中则调用 fetch，成功时按 ttl（缺省用 default_ttl）写入
    pub async fn get_or_fetch<F, Fut>(
        &self,
        op: &str,
        args: &Value,
        ttl: Option<Duration>,
        fetch: F,
    ) -> Result<Value, AgentError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<Value, AgentError>>,
    {
        let key = CacheKey::new(op, args);
        if let Some(hit) = self.get(&key) {
            self.hits.fetch_add(1, Ordering::Relaxed);
            tracing::debug!(op, key = key.as_str(), "cache hit");
            return Ok(hit);
        }

        self.misses.fetch_add(1, Ordering::Relaxed);
        tracing::debug!(op, key = key.as_str(), "cache miss");

        let value = fetch().await?;
        self.insert(key, value.clone(), ttl.unwrap_or(self.default_ttl));
        Ok(value)
    }
}
