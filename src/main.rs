//! Mesh Agent 命令行入口
//!
//! 用法：`mesh-agent '<request json>'`，省略参数时从 stdin 读取请求；`mesh-agent --tools` 打印工具 Schema。
//! 请求示例：`{"query": "what is the price of ETH?"}` 或 `{"tool": "get_price", "tool_arguments": {"symbol": "ETH"}}`

use std::io::Read;
use std::sync::Arc;

use anyhow::Context;
use mesh_agent::capabilities::coingecko;
use mesh_agent::config::load_config;
use mesh_agent::core::{ResponseCache, RetryPolicy, SessionManager};
use mesh_agent::llm::{LlmClient, OpenAiClient};
use mesh_agent::observability;
use mesh_agent::tools::ApiContext;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    observability::init();

    let cfg = load_config(None).context("Failed to load config")?;
    let llm: Arc<dyn LlmClient> = Arc::new(OpenAiClient::new(cfg.llm.to_settings()));

    let session = SessionManager::new(cfg.http.to_settings());
    let cache = Arc::new(ResponseCache::new(cfg.cache.default_ttl(), cfg.cache.max_entries));
    let api = ApiContext::new(session, cache, RetryPolicy::new(cfg.retry.to_config()));

    let agent = coingecko::builder(llm, api, cfg.coingecko.to_settings())
        .max_iterations(cfg.agent.max_iterations)
        .tool_concurrency(cfg.agent.tool_concurrency)
        .tool_timeout_secs(cfg.agent.tool_timeout_secs)
        .build()
        .context("Failed to build agent")?;

    let arg = std::env::args().nth(1);
    if arg.as_deref() == Some("--tools") {
        let tools = agent.registry().to_function_json();
        println!("{}", serde_json::to_string_pretty(&tools)?);
        return Ok(());
    }

    let raw = match arg {
        Some(s) => s,
        None => {
            let mut buf = String::new();
            std::io::stdin()
                .read_to_string(&mut buf)
                .context("Failed to read request from stdin")?;
            buf
        }
    };
    let request: serde_json::Value =
        serde_json::from_str(raw.trim()).context("Request is not valid JSON")?;

    // 会话作用域覆盖整个调用
    let scope = agent.open().context("Failed to open session")?;
    let response = agent.call_agent_json(&request).await;
    scope.release();

    println!("{}", serde_json::to_string_pretty(&response)?);
    let (prompt, completion, total) = agent.token_usage();
    tracing::info!(prompt, completion, total, "token usage");
    Ok(())
}
