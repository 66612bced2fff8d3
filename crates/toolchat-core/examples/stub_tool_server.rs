//! Minimal MCP tool server over stdio, used by the connection tests
//!
//! Tools:
//! - `echo`: returns the `text` argument
//! - `fail`: returns a result flagged `isError`
//! - `slow`: sleeps `ms` milliseconds, then reports how many calls were in flight
//!
//! Environment:
//! - `STUB_LIST_DELAY_MS`: delay before answering `tools/list`
//! - `STUB_PID_FILE`: file this process appends its id to on start

use std::io::Write;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use rmcp::model::{
    CallToolRequestParams, CallToolResult, Content, ErrorData, ListToolsResult,
    PaginatedRequestParams, ServerCapabilities, ServerInfo, Tool,
};
use rmcp::service::{RequestContext, RoleServer};
use rmcp::transport::stdio;
use rmcp::{ServerHandler, ServiceExt};
use serde_json::{json, Map, Value};

struct StubServer {
    list_delay: Duration,
    in_flight: AtomicUsize,
}

fn object_schema(properties: Value) -> Arc<Map<String, Value>> {
    let mut schema = Map::new();
    schema.insert("type".to_string(), json!("object"));
    schema.insert("properties".to_string(), properties);
    Arc::new(schema)
}

impl ServerHandler for StubServer {
    fn get_info(&self) -> ServerInfo {
        ServerInfo {
            capabilities: ServerCapabilities::builder().enable_tools().build(),
            ..Default::default()
        }
    }

    async fn list_tools(
        &self,
        _request: Option<PaginatedRequestParams>,
        _context: RequestContext<RoleServer>,
    ) -> Result<ListToolsResult, ErrorData> {
        tokio::time::sleep(self.list_delay).await;

        Ok(ListToolsResult::with_all_items(vec![
            Tool::new(
                "echo",
                "Echo the text argument",
                object_schema(json!({ "text": { "type": "string" } })),
            ),
            Tool::new("fail", "Always reports an error", object_schema(json!({}))),
            Tool::new(
                "slow",
                "Sleep, then report the calls in flight",
                object_schema(json!({ "ms": { "type": "integer" } })),
            ),
        ]))
    }

    async fn call_tool(
        &self,
        request: CallToolRequestParams,
        _context: RequestContext<RoleServer>,
    ) -> Result<CallToolResult, ErrorData> {
        let args = request.arguments.unwrap_or_default();

        match request.name.as_ref() {
            "echo" => {
                let text = args.get("text").and_then(Value::as_str).unwrap_or_default();
                Ok(CallToolResult::success(vec![Content::text(text)]))
            }
            "fail" => Ok(CallToolResult::error(vec![Content::text("boom")])),
            "slow" => {
                let ms = args.get("ms").and_then(Value::as_u64).unwrap_or(100);
                let concurrent = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
                tokio::time::sleep(Duration::from_millis(ms)).await;
                self.in_flight.fetch_sub(1, Ordering::SeqCst);
                Ok(CallToolResult::success(vec![Content::text(concurrent.to_string())]))
            }
            other => Err(ErrorData::invalid_params(format!("unknown tool: {}", other), None)),
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    if let Ok(path) = std::env::var("STUB_PID_FILE") {
        let mut file = std::fs::OpenOptions::new().create(true).append(true).open(path)?;
        writeln!(file, "{}", std::process::id())?;
    }

    let list_delay = std::env::var("STUB_LIST_DELAY_MS")
        .ok()
        .and_then(|ms| ms.parse().ok())
        .map(Duration::from_millis)
        .unwrap_or_default();

    let server = StubServer {
        list_delay,
        in_flight: AtomicUsize::new(0),
    };
    server.serve(stdio()).await?.waiting().await?;
    Ok(())
}
