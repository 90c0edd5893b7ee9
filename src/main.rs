//! Hive - 命令行 REPL
//!
//! 入口：初始化日志、加载配置、按配置注册工具服务器，然后循环读 stdin 处理查询。
//! 命令：/clear 清空对话，exit / quit 退出。

use std::io::Write;

use anyhow::Context;
use tokio::io::{AsyncBufReadExt, BufReader};

use hive::{load_config, Agent, AppConfig};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    hive::observability::init();

    let cfg = load_config(None).unwrap_or_else(|e| {
        tracing::warn!("配置加载失败 ({})，使用默认配置", e);
        AppConfig::default()
    });

    let servers = cfg.tools.servers.clone();
    let mut agent = Agent::new(cfg);

    for (name, path) in servers {
        if let Err(e) = agent.add_tool(&path, Some(&name)).await {
            tracing::error!(server = %name, "注册工具服务器失败: {}", e);
        }
    }

    if let Err(e) = agent.initialize().await {
        tracing::error!("初始化失败: {}", e);
    }

    println!("hive agent 已就绪（exit 退出，/clear 清空对话）");

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        print!("you> ");
        std::io::stdout().flush().context("flush stdout")?;

        let Some(line) = lines.next_line().await.context("read stdin")? else {
            break; // EOF
        };
        let input = line.trim();

        match input {
            "" => continue,
            "exit" | "quit" => break,
            "/clear" => {
                agent.clear_history();
                println!("对话已清空");
                continue;
            }
            _ => {}
        }

        let response = agent.process_query(input).await;
        println!("agent> {}\n", response);
    }

    agent.shutdown().await.context("shutdown agent")?;
    let (prompt, completion, total) = agent.token_usage();
    tracing::info!(prompt, completion, total, "会话结束，token 统计");
    Ok(())
}
