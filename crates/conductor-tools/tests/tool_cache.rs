#![allow(clippy::unwrap_used, clippy::expect_used)]

use conductor_tools::{ToolDescriptor, ToolRegistry};
use serde_json::json;
use std::sync::Arc;

// ---------------------------------------------------------------------------
// 1. Unknown execution contexts see exactly the system tools
// ---------------------------------------------------------------------------

#[tokio::test]
async fn unknown_context_falls_back_to_system_tools() {
    let registry = ToolRegistry::new();
    registry
        .register_system_tool(
            ToolDescriptor::new("current_time")
                .with_description("Returns the current UTC time")
                .with_endpoint("builtin://time"),
        )
        .await;

    let tools = registry.lookup("guest", "never-loaded").await;
    assert_eq!(tools, registry.system_tools().await);
    assert_eq!(tools.len(), 1);
}

// ---------------------------------------------------------------------------
// 2. Concurrent loads for different requests stay isolated
// ---------------------------------------------------------------------------

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_loads_are_isolated() {
    let registry = Arc::new(ToolRegistry::with_system_tools(vec![ToolDescriptor::new(
        "web_search",
    )]));

    let mut handles = Vec::new();
    for i in 0..16 {
        let registry = Arc::clone(&registry);
        handles.push(tokio::spawn(async move {
            let tool = ToolDescriptor::new(format!("user_tool_{i}")).with_schema(json!({
                "type": "object",
                "properties": {"n": {"type": "integer"}}
            }));
            registry
                .load(vec![tool], "alice", &format!("req-{i}"))
                .await
                .unwrap();
        }));
    }
    for handle in handles {
        handle.await.unwrap();
    }

    assert_eq!(registry.cached_scopes().await.len(), 16);
    for i in 0..16 {
        let tools = registry.lookup("alice", &format!("req-{i}")).await;
        let names: Vec<_> = tools.iter().map(|t| t.name.clone()).collect();
        assert_eq!(names, vec![format!("user_tool_{i}"), "web_search".to_string()]);
    }
}

// ---------------------------------------------------------------------------
// 3. Descriptors survive a JSON round trip through a cached entry
// ---------------------------------------------------------------------------

#[tokio::test]
async fn descriptors_from_json_are_cached_verbatim() {
    let tools: Vec<ToolDescriptor> = serde_json::from_value(json!([
        {
            "name": "search_jobs",
            "description": "Search job postings",
            "parameters_schema": {"type": "object", "required": ["keyword"]},
            "endpoint": "http://localhost:9000/jobs"
        }
    ]))
    .unwrap();

    let registry = ToolRegistry::new();
    registry.load(tools.clone(), "bob", "req-7").await.unwrap();
    assert_eq!(registry.lookup("bob", "req-7").await, tools);
}
