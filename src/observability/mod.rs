//! 可观测性

use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// 日志初始化：默认 info，可用 RUST_LOG 覆盖；写 stderr，stdout 留给 REPL
pub fn init() {
    tracing_subscriber::registry()
        .with(EnvFilter::from_default_env().add_directive("info".parse().unwrap()))
        .with(fmt::layer().with_writer(std::io::stderr))
        .init();
}
