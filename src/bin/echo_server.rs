//! 测试用工具服务器：stdin/stdout 换行 JSON-RPC
//!
//! 提供单个 echo 工具，把 arguments.text 原样返回。用于集成测试与本地联调：
//! 在配置 [tools.servers] 里指向本可执行文件即可。

use std::io::{BufRead, Write};

fn response(id: serde_json::Value, result: serde_json::Value) -> serde_json::Value {
    serde_json::json!({"jsonrpc": "2.0", "id": id, "result": result})
}

fn error_response(id: serde_json::Value, code: i64, message: &str) -> serde_json::Value {
    serde_json::json!({
        "jsonrpc": "2.0",
        "id": id,
        "error": {"code": code, "message": message}
    })
}

fn handle(request: &serde_json::Value) -> Option<serde_json::Value> {
    let id = request.get("id").cloned();
    let method = request.get("method").and_then(|m| m.as_str()).unwrap_or("");

    // 无 id 即通知，不回复
    let id = id?;

    let reply = match method {
        "initialize" => response(
            id,
            serde_json::json!({
                "protocolVersion": "2024-11-05",
                "serverInfo": {"name": "echo-server", "version": env!("CARGO_PKG_VERSION")},
                "capabilities": {"tools": {}}
            }),
        ),
        "tools/list" => response(
            id,
            serde_json::json!({
                "tools": [{
                    "name": "echo",
                    "description": "Echo the given text back",
                    "inputSchema": {
                        "type": "object",
                        "properties": {"text": {"type": "string"}},
                        "required": ["text"]
                    }
                }]
            }),
        ),
        "tools/call" => {
            let name = request
                .pointer("/params/name")
                .and_then(|n| n.as_str())
                .unwrap_or("");
            if name != "echo" {
                response(
                    id,
                    serde_json::json!({
                        "content": [{"type": "text", "text": format!("unknown tool: {}", name)}],
                        "isError": true
                    }),
                )
            } else {
                let text = request
                    .pointer("/params/arguments/text")
                    .and_then(|t| t.as_str())
                    .unwrap_or("");
                response(
                    id,
                    serde_json::json!({
                        "content": [{"type": "text", "text": format!("echo: {}", text)}],
                        "isError": false
                    }),
                )
            }
        }
        _ => error_response(id, -32601, "Method not found"),
    };
    Some(reply)
}

fn main() {
    let stdin = std::io::stdin();
    let stdout = std::io::stdout();
    let mut out = stdout.lock();

    for line in stdin.lock().lines() {
        let Ok(line) = line else { break };
        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        let Ok(request) = serde_json::from_str::<serde_json::Value>(line) else {
            continue; // 非 JSON 行直接忽略
        };

        if let Some(reply) = handle(&request) {
            if writeln!(out, "{}", reply).and_then(|_| out.flush()).is_err() {
                break;
            }
        }
    }
}
