//! 可观测性：tracing 订阅器初始化
//!
//! 日志级别由 RUST_LOG 控制，未设置时为 info。

use tracing_subscriber::{fmt, prelude::*, EnvFilter};

pub fn init() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    // 重复初始化（如测试中）时忽略
    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(std::io::stderr))
        .try_init();
}
