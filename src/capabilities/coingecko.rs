//! CoinGecko 能力模块：get_price / get_token_info
//!
//! 所有请求经由 ApiContext（缓存 5 分钟 + 重试 + 会话客户端）。

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Map, Value};

use crate::agent::{Agent, AgentBuilder, AgentMetadata, IoDescriptor};
use crate::core::AgentError;
use crate::llm::LlmClient;
use crate::tools::{permanent_status, ApiContext, ApiRequest, CallContext, ParamSpec, Tool, ToolSchema};

pub const PUBLIC_API_URL: &str = "https://api.coingecko.com/api/v3";
pub const PRO_API_URL: &str = "https://pro-api.coingecko.com/api/v3";
const PRO_KEY_HEADER: &str = "x-cg-pro-api-key";
const CACHE_TTL: Duration = Duration::from_secs(300);
/// 该 Agent 的最大工具轮数
const MAX_ITERATIONS: usize = 6;

const SYSTEM_PROMPT: &str = "\
IDENTITY:
You are a crypto data specialist that can fetch token prices and token information from CoinGecko.

CAPABILITIES:
- Get the current price of a token by symbol or name (get_price)
- Get detailed token information and market data by CoinGecko ID (get_token_info)

RESPONSE GUIDELINES:
- Keep responses focused on what was specifically asked
- Format numbers in a human-readable way (e.g., \"$150.4M\")
- Provide only relevant metrics for the query context

IMPORTANT:
- Never invent or assume CoinGecko IDs
- Use multiple tool calls when needed to get comprehensive information";

/// CoinGecko 连接设置
#[derive(Debug, Clone)]
pub struct CoinGeckoSettings {
    pub base_url: String,
    pub api_key: Option<String>,
}

impl Default for CoinGeckoSettings {
    fn default() -> Self {
        Self {
            base_url: PUBLIC_API_URL.to_string(),
            api_key: None,
        }
    }
}

impl CoinGeckoSettings {
    /// 有 API key 时使用 Pro 端点
    pub fn from_api_key(api_key: Option<String>) -> Self {
        match api_key.filter(|k| !k.is_empty()) {
            Some(key) => Self {
                base_url: PRO_API_URL.to_string(),
                api_key: Some(key),
            },
            None => Self::default(),
        }
    }

    fn request(&self, path: &str) -> ApiRequest {
        let url = format!("{}{}", self.base_url.trim_end_matches('/'), path);
        let req = ApiRequest::get(url).cache_for(CACHE_TTL);
        match &self.api_key {
            Some(key) => req.header(PRO_KEY_HEADER, key),
            None => req,
        }
    }

    /// /coins/{id}：只取市场数据，不要本地化、交易对、社区与开发者数据
    fn coin_request(&self, id: &str) -> ApiRequest {
        self.request(&format!("/coins/{id}"))
            .query("localization", "false")
            .query("tickers", "false")
            .query("community_data", "false")
            .query("developer_data", "false")
    }
}

/// 两个工具共享的客户端
#[derive(Debug, Clone)]
struct CoinGecko {
    api: ApiContext,
    settings: Arc<CoinGeckoSettings>,
}

impl CoinGecko {
    /// 按名称或符号搜索，返回最匹配的 CoinGecko ID
    async fn search_id(&self, query: &str) -> Result<String, AgentError> {
        let results = self
            .api
            .send("coingecko.search", self.settings.request("/search").query("query", query))
            .await?;
        best_match(&results, query)
            .ok_or_else(|| AgentError::validation(format!("no CoinGecko token matches '{query}'")))
    }
}

/// 搜索结果选择：名称或符号完全匹配优先，其次市值排名最高，最后取第一个
pub fn best_match(search: &Value, query: &str) -> Option<String> {
    let coins = search.get("coins")?.as_array()?;
    let q = query.to_lowercase();
    let field = |c: &Value, k: &str| c.get(k).and_then(Value::as_str).map(str::to_lowercase);

    let exact = coins
        .iter()
        .filter(|c| field(c, "symbol").as_deref() == Some(q.as_str()) || field(c, "name").as_deref() == Some(q.as_str()));
    let exact: Vec<&Value> = exact.collect();
    let chosen = top_ranked(exact.iter().copied())
        .or_else(|| exact.first().copied())
        .or_else(|| top_ranked(coins.iter()))
        .or_else(|| coins.first())?;
    chosen.get("id").and_then(Value::as_str).map(str::to_string)
}

fn top_ranked<'a>(coins: impl Iterator<Item = &'a Value>) -> Option<&'a Value> {
    coins
        .filter_map(|c| c.get("market_cap_rank").and_then(Value::as_u64).map(|r| (r, c)))
        .min_by_key(|(r, _)| *r)
        .map(|(_, c)| c)
}

pub struct GetPrice(CoinGecko);

#[async_trait]
impl Tool for GetPrice {
    fn schema(&self) -> ToolSchema {
        ToolSchema::new(
            "get_price",
            "Get the current price of a cryptocurrency by its symbol or name (e.g. ETH, bitcoin).",
        )
        .required_param("symbol", ParamSpec::string("Token symbol or name, e.g. ETH"))
        .param(
            "vs_currency",
            ParamSpec::string("Target currency, e.g. usd, eur, btc").with_default(json!("usd")),
        )
    }

    async fn execute(&self, args: Map<String, Value>, _ctx: &CallContext) -> Result<Value, AgentError> {
        let symbol = str_arg(&args, "symbol")?;
        let vs = str_arg(&args, "vs_currency")?.to_lowercase();
        let id = self.0.search_id(symbol).await?;

        let prices = self
            .0
            .api
            .send(
                "coingecko.simple_price",
                self.0
                    .settings
                    .request("/simple/price")
                    .query("ids", id.as_str())
                    .query("vs_currencies", vs.as_str())
                    .query("include_24hr_change", "true"),
            )
            .await?;

        let entry = prices
            .get(&id)
            .ok_or_else(|| AgentError::Other(format!("no price data for '{id}'")))?;
        let price = entry
            .get(&vs)
            .cloned()
            .ok_or_else(|| AgentError::validation(format!("unsupported vs_currency '{vs}'")))?;
        Ok(json!({
            "symbol": symbol.to_uppercase(),
            "coingecko_id": id,
            "vs_currency": vs,
            "price": price,
            "price_change_percentage_24h": entry.get(format!("{vs}_24h_change")).cloned().unwrap_or(Value::Null),
        }))
    }
}

pub struct GetTokenInfo(CoinGecko);

#[async_trait]
impl Tool for GetTokenInfo {
    fn schema(&self) -> ToolSchema {
        ToolSchema::new(
            "get_token_info",
            "Get detailed token information and market data using CoinGecko ID. Includes current price, market cap, trading volume and price changes.",
        )
        .required_param("coingecko_id", ParamSpec::string("The CoinGecko ID of the token"))
    }

    async fn execute(&self, args: Map<String, Value>, _ctx: &CallContext) -> Result<Value, AgentError> {
        let id = str_arg(&args, "coingecko_id")?;
        let settings = &self.0.settings;

        let data = match self.0.api.send("coingecko.coin", settings.coin_request(id)).await {
            Ok(data) => data,
            // ID 不存在（404）时按名称搜索一次
            Err(e) if permanent_status(&e) == Some(404) => {
                let fallback = self.0.search_id(id).await?;
                if fallback == id {
                    return Err(e);
                }
                tracing::debug!(id, fallback = %fallback, "unknown coingecko id, retrying with search result");
                self.0.api.send("coingecko.coin", settings.coin_request(&fallback)).await?
            }
            Err(e) => return Err(e),
        };
        Ok(format_token_info(&data))
    }
}

fn str_arg<'a>(args: &'a Map<String, Value>, key: &str) -> Result<&'a str, AgentError> {
    args.get(key)
        .and_then(Value::as_str)
        .ok_or_else(|| AgentError::validation(format!("missing string argument '{key}'")))
}

/// 只保留常用字段
pub fn format_token_info(data: &Value) -> Value {
    let market = data.get("market_data").cloned().unwrap_or_else(|| json!({}));
    let usd = |k: &str| market.get(k).and_then(|v| v.get("usd")).cloned().unwrap_or(Value::Null);
    let plain = |k: &str| market.get(k).cloned().unwrap_or(Value::Null);
    json!({
        "token_info": {
            "id": data.get("id").cloned().unwrap_or(Value::Null),
            "name": data.get("name").cloned().unwrap_or(Value::Null),
            "symbol": data.get("symbol").and_then(Value::as_str).map(str::to_uppercase),
            "market_cap_rank": data.get("market_cap_rank").cloned().unwrap_or(Value::Null),
            "categories": data.get("categories").cloned().unwrap_or_else(|| json!([])),
        },
        "market_metrics": {
            "current_price_usd": usd("current_price"),
            "market_cap_usd": usd("market_cap"),
            "fully_diluted_valuation_usd": usd("fully_diluted_valuation"),
            "total_volume_usd": usd("total_volume"),
        },
        "price_metrics": {
            "ath_usd": usd("ath"),
            "high_24h_usd": usd("high_24h"),
            "low_24h_usd": usd("low_24h"),
            "price_change_24h": plain("price_change_24h"),
            "price_change_percentage_24h": plain("price_change_percentage_24h"),
        },
        "supply_info": {
            "total_supply": plain("total_supply"),
            "max_supply": plain("max_supply"),
            "circulating_supply": plain("circulating_supply"),
        },
    })
}

/// 注册 CoinGecko 工具
pub fn register(builder: AgentBuilder, api: ApiContext, settings: CoinGeckoSettings) -> AgentBuilder {
    let client = CoinGecko {
        api,
        settings: Arc::new(settings),
    };
    builder
        .tool(GetPrice(client.clone()))
        .tool(GetTokenInfo(client))
}

pub fn metadata() -> AgentMetadata {
    AgentMetadata::new("CoinGecko Agent")
        .version("1.0.0")
        .author("Heurist team")
        .description("This agent can fetch token prices and token information from CoinGecko.")
        .input(IoDescriptor::new("query", "str", "Natural language query about a token price or token information"))
        .input(IoDescriptor::new("tool", "str", "Tool to call directly instead of a query (get_price or get_token_info)"))
        .input(IoDescriptor::new("tool_arguments", "dict", "Arguments for the direct tool call"))
        .input(
            IoDescriptor::new("raw_data_only", "bool", "If true, return the tool data without a model summary")
                .with_default(json!(false)),
        )
        .output(IoDescriptor::new("response", "str", "Natural language answer"))
        .output(IoDescriptor::new("data", "dict", "Structured CoinGecko data"))
        .tag("Trading")
        .tag("Data")
        .external_api("Coingecko")
        .example("What is the price of ETH?")
        .example("Get information about bitcoin")
}

/// CoinGecko Agent 的构建器（可在 build 前覆盖轮数、并发等）；工具与 Agent 共用 ApiContext 的会话
pub fn builder(llm: Arc<dyn LlmClient>, api: ApiContext, settings: CoinGeckoSettings) -> AgentBuilder {
    let builder = Agent::builder(metadata(), llm)
        .system_prompt(SYSTEM_PROMPT)
        .session(Arc::clone(api.session()))
        .max_iterations(MAX_ITERATIONS);
    register(builder, api, settings)
}

pub fn build_agent(
    llm: Arc<dyn LlmClient>,
    api: ApiContext,
    settings: CoinGeckoSettings,
) -> Result<Agent, AgentError> {
    builder(llm, api, settings).build()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{HttpSettings, ResponseCache, RetryConfig, RetryPolicy, SessionManager};
    use crate::llm::MockLlmClient;

    fn api() -> ApiContext {
        ApiContext::new(
            SessionManager::new(HttpSettings::default()),
            Arc::new(ResponseCache::default()),
            RetryPolicy::new(RetryConfig::default()),
        )
    }

    #[test]
    fn test_best_match_prefers_exact_symbol_then_rank() {
        let search = json!({"coins": [
            {"id": "ethereum-classic", "name": "Ethereum Classic", "symbol": "ETC", "market_cap_rank": 30},
            {"id": "bridged-eth", "name": "Bridged ETH", "symbol": "ETH", "market_cap_rank": 900},
            {"id": "ethereum", "name": "Ethereum", "symbol": "ETH", "market_cap_rank": 2}
        ]});
        assert_eq!(best_match(&search, "eth").as_deref(), Some("ethereum"));
        assert_eq!(best_match(&search, "Ethereum Classic").as_deref(), Some("ethereum-classic"));
        // 无完全匹配时取排名最高
        assert_eq!(best_match(&search, "ether").as_deref(), Some("ethereum"));
        assert_eq!(best_match(&json!({"coins": []}), "eth"), None);
    }

    #[test]
    fn test_format_token_info_picks_usd_fields() {
        let raw = json!({
            "id": "ethereum",
            "name": "Ethereum",
            "symbol": "eth",
            "market_cap_rank": 2,
            "market_data": {
                "current_price": {"usd": 3500.5, "eur": 3200.0},
                "total_supply": 120000000.0
            }
        });
        let v = format_token_info(&raw);
        assert_eq!(v["token_info"]["symbol"], "ETH");
        assert_eq!(v["market_metrics"]["current_price_usd"], 3500.5);
        assert_eq!(v["supply_info"]["total_supply"], 120000000.0);
        assert!(v["market_metrics"]["market_cap_usd"].is_null());
    }

    #[test]
    fn test_build_agent_declares_tools_in_order() {
        let agent = build_agent(Arc::new(MockLlmClient::new()), api(), CoinGeckoSettings::default()).unwrap();
        let names: Vec<&str> = agent.get_tool_schemas().iter().map(|s| s.name()).collect();
        assert_eq!(names, vec!["get_price", "get_token_info"]);
        assert_eq!(agent.max_iterations(), 6);
        assert_eq!(agent.metadata().external_apis, vec!["Coingecko".to_string()]);
        let inputs: Vec<&str> = agent.metadata().inputs.iter().map(|i| i.name.as_str()).collect();
        assert_eq!(inputs, vec!["query", "tool", "tool_arguments", "raw_data_only"]);
        assert_eq!(agent.metadata().outputs.len(), 2);
    }

    #[test]
    fn test_api_key_switches_to_pro_endpoint() {
        let s = CoinGeckoSettings::from_api_key(Some("k".into()));
        assert_eq!(s.base_url, PRO_API_URL);
        let req = s.request("/search");
        assert!(req.url.starts_with(PRO_API_URL));
        assert_eq!(req.headers, vec![(PRO_KEY_HEADER.to_string(), "k".to_string())]);
        assert_eq!(CoinGeckoSettings::from_api_key(Some(String::new())).base_url, PUBLIC_API_URL);
    }

    #[test]
    fn test_coin_request_trims_payload() {
        let req = CoinGeckoSettings::default().coin_request("ethereum");
        assert_eq!(req.url, format!("{PUBLIC_API_URL}/coins/ethereum"));
        for key in ["localization", "tickers", "community_data", "developer_data"] {
            assert!(req.query.contains(&(key.to_string(), "false".to_string())));
        }
    }

    #[tokio::test]
    async fn test_direct_call_without_session_is_resource_error() {
        let agent = build_agent(Arc::new(MockLlmClient::new()), api(), CoinGeckoSettings::default()).unwrap();
        let resp = agent
            .call_agent(crate::agent::AgentRequest::tool("get_token_info", json!({"coingecko_id": "ethereum"})))
            .await;
        assert_eq!(resp.error_kind(), Some("resource_state_error"));
    }
}
