//! 应用配置：从 config/default.toml 与环境变量加载
//!
//! 加载顺序：先读 TOML 文件，再用环境变量 `MESH__*` 覆盖（双下划线表示嵌套，如 `MESH__LLM__MODEL=gpt-4o-mini`）。

use std::path::PathBuf;
use std::time::Duration;

use serde::Deserialize;

use crate::capabilities::CoinGeckoSettings;
use crate::core::{HttpSettings, RetryConfig};
use crate::llm::OpenAiSettings;

/// 应用配置根（对应 config/default.toml 的顶层）
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct AppConfig {
    pub llm: LlmSection,
    pub agent: AgentSection,
    pub retry: RetrySection,
    pub cache: CacheSection,
    pub http: HttpSection,
    pub coingecko: CoinGeckoSection,
}

/// [llm] 段：OpenAI 兼容端点
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LlmSection {
    pub base_url: String,
    /// 保存 API Key 的环境变量名
    pub api_key_env: String,
    pub model: String,
    pub temperature: f32,
    /// 请求超时（秒）
    pub request_timeout_secs: u64,
    /// true 使用原生 function calling；false 使用文本 JSON 协议
    pub native_tools: bool,
}

impl Default for LlmSection {
    fn default() -> Self {
        Self {
            base_url: "https://api.openai.com/v1".to_string(),
            api_key_env: "OPENAI_API_KEY".to_string(),
            model: "gpt-4o-mini".to_string(),
            temperature: 0.1,
            request_timeout_secs: 60,
            native_tools: true,
        }
    }
}

impl LlmSection {
    /// API Key 从 api_key_env 指定的环境变量读取
    pub fn to_settings(&self) -> OpenAiSettings {
        OpenAiSettings {
            base_url: self.base_url.clone(),
            model: self.model.clone(),
            api_key: std::env::var(&self.api_key_env).ok().filter(|k| !k.is_empty()),
            temperature: self.temperature,
            timeout: Duration::from_secs(self.request_timeout_secs),
            native_tools: self.native_tools,
        }
    }
}

/// [agent] 段：工具循环与执行
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AgentSection {
    pub max_iterations: usize,
    /// 同一轮内并发执行的工具数上限
    pub tool_concurrency: usize,
    pub tool_timeout_secs: u64,
}

impl Default for AgentSection {
    fn default() -> Self {
        Self {
            max_iterations: 6,
            tool_concurrency: 4,
            tool_timeout_secs: 30,
        }
    }
}

/// [retry] 段
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RetrySection {
    pub max_attempts: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
}

impl Default for RetrySection {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay_ms: 1000,
            max_delay_ms: 30_000,
        }
    }
}

impl RetrySection {
    pub fn to_config(&self) -> RetryConfig {
        RetryConfig {
            max_attempts: self.max_attempts.max(1),
            base_delay: Duration::from_millis(self.base_delay_ms),
            max_delay: Duration::from_millis(self.max_delay_ms),
        }
    }
}

/// [cache] 段
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CacheSection {
    pub default_ttl_secs: u64,
    pub max_entries: usize,
}

impl Default for CacheSection {
    fn default() -> Self {
        Self {
            default_ttl_secs: 300,
            max_entries: 10_000,
        }
    }
}

impl CacheSection {
    pub fn default_ttl(&self) -> Duration {
        Duration::from_secs(self.default_ttl_secs)
    }
}

/// [http] 段：能力模块共享的 HTTP 客户端
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct HttpSection {
    pub timeout_secs: u64,
    pub pool_max_idle_per_host: usize,
    pub user_agent: Option<String>,
}

impl Default for HttpSection {
    fn default() -> Self {
        Self {
            timeout_secs: 30,
            pool_max_idle_per_host: 8,
            user_agent: None,
        }
    }
}

impl HttpSection {
    pub fn to_settings(&self) -> HttpSettings {
        let defaults = HttpSettings::default();
        HttpSettings {
            timeout: Duration::from_secs(self.timeout_secs),
            pool_max_idle_per_host: self.pool_max_idle_per_host,
            user_agent: self.user_agent.clone().unwrap_or(defaults.user_agent),
        }
    }
}

/// [coingecko] 段
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CoinGeckoSection {
    /// 保存 Pro API Key 的环境变量名；未设置时使用公共端点
    pub api_key_env: String,
}

impl Default for CoinGeckoSection {
    fn default() -> Self {
        Self {
            api_key_env: "COINGECKO_API_KEY".to_string(),
        }
    }
}

impl CoinGeckoSection {
    pub fn to_settings(&self) -> CoinGeckoSettings {
        CoinGeckoSettings::from_api_key(std::env::var(&self.api_key_env).ok())
    }
}

/// 从 config 目录加载配置，环境变量 MESH__* 可覆盖
///
/// 1. 按顺序查找 config/default.toml、../config/default.toml、default.toml，找到则作为第一源
/// 2. 若传入 config_path 且文件存在，则追加该文件（可覆盖前面的键）
/// 3. 最后叠加环境变量 MESH__*（双下划线表示嵌套键）
pub fn load_config(config_path: Option<PathBuf>) -> Result<AppConfig, config::ConfigError> {
    let mut builder = config::Config::builder();

    let default_names = ["config/default", "../config/default", "default"];
    for name in default_names {
        let path = format!("{}.toml", name);
        if std::path::Path::new(&path).exists() {
            builder = builder.add_source(config::File::with_name(name).required(false));
            break;
        }
    }

    if let Some(ref path) = config_path {
        if path.exists() {
            builder = builder.add_source(config::File::from(path.clone()).required(false));
        }
    }

    builder = builder.add_source(
        config::Environment::with_prefix("MESH")
            .prefix_separator("__")
            .separator("__")
            .try_parsing(true),
    );

    builder.build()?.try_deserialize()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_without_sources() {
        let cfg: AppConfig = config::Config::builder()
            .build()
            .unwrap()
            .try_deserialize()
            .unwrap();
        assert_eq!(cfg.agent.max_iterations, 6);
        assert_eq!(cfg.retry.to_config().base_delay, Duration::from_secs(1));
        assert_eq!(cfg.cache.default_ttl(), Duration::from_secs(300));
        assert_eq!(cfg.cache.max_entries, 10_000);
    }

    #[test]
    fn test_partial_toml_keeps_other_defaults() {
        let toml = r#"
            [agent]
            max_iterations = 3

            [retry]
            max_attempts = 0
        "#;
        let cfg: AppConfig = config::Config::builder()
            .add_source(config::File::from_str(toml, config::FileFormat::Toml))
            .build()
            .unwrap()
            .try_deserialize()
            .unwrap();
        assert_eq!(cfg.agent.max_iterations, 3);
        assert_eq!(cfg.agent.tool_concurrency, 4);
        // 至少尝试一次
        assert_eq!(cfg.retry.to_config().max_attempts, 1);
        assert_eq!(cfg.http.to_settings().pool_max_idle_per_host, 8);
    }
}
