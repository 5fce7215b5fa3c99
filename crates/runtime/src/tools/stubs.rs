//! Deterministic stub tools for tests and stub-mode registries.
//!
//! Stubs return canned, reproducible data and mark themselves so trace
//! consumers can tell simulated results from real ones.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::json;

use axon_interchange::ToolDecl;

use super::{Tool, ToolResult};

/// The stub registered for a declared tool name. Names without a dedicated
/// stub get the echo stub, so stub-mode registries always cover every
/// declaration.
pub fn stub_for(name: &str) -> Arc<dyn Tool> {
    match name {
        "WebSearch" => Arc::new(WebSearchStub),
        "Calculator" => Arc::new(CalculatorStub),
        "CodeExecutor" => Arc::new(CodeExecutorStub),
        "Sleep" => Arc::new(SleepStub { sleep_ms: 2_000 }),
        other => Arc::new(EchoStub {
            name: other.to_string(),
        }),
    }
}

/// Canned search results, trimmed to the declared `max_results`.
pub struct WebSearchStub;

#[async_trait]
impl Tool for WebSearchStub {
    fn name(&self) -> &str {
        "WebSearch"
    }

    fn is_stub(&self) -> bool {
        true
    }

    async fn invoke(&self, argument: &str, config: &ToolDecl) -> ToolResult {
        let max = config.max_results.unwrap_or(5) as usize;
        let results: Vec<serde_json::Value> = (1..=max.min(5))
            .map(|i| {
                json!({
                    "title": format!("Result {} for '{}'", i, argument),
                    "url": format!("https://example.com/{}/{}", argument.replace(' ', "-"), i),
                    "snippet": format!("Simulated snippet {} about {}", i, argument),
                })
            })
            .collect();
        ToolResult::success(json!({ "query": argument, "results": results }))
    }
}

/// Evaluates `a <op> b` for `+ - * /`.
pub struct CalculatorStub;

#[async_trait]
impl Tool for CalculatorStub {
    fn name(&self) -> &str {
        "Calculator"
    }

    fn is_stub(&self) -> bool {
        true
    }

    async fn invoke(&self, argument: &str, _config: &ToolDecl) -> ToolResult {
        let parts: Vec<&str> = argument.split_whitespace().collect();
        let evaluated = match parts.as_slice() {
            [a, op, b] => {
                let lhs = a.parse::<f64>();
                let rhs = b.parse::<f64>();
                match (lhs, rhs) {
                    (Ok(x), Ok(y)) => match *op {
                        "+" => Some(x + y),
                        "-" => Some(x - y),
                        "*" => Some(x * y),
                        "/" if y != 0.0 => Some(x / y),
                        _ => None,
                    },
                    _ => None,
                }
            }
            _ => None,
        };
        match evaluated {
            Some(value) => ToolResult::success(json!({ "expression": argument, "value": value })),
            None => ToolResult::failure(format!("cannot evaluate '{}'", argument)),
        }
    }
}

/// Pretends to run code and reports a zero exit status.
pub struct CodeExecutorStub;

#[async_trait]
impl Tool for CodeExecutorStub {
    fn name(&self) -> &str {
        "CodeExecutor"
    }

    fn is_stub(&self) -> bool {
        true
    }

    async fn invoke(&self, argument: &str, config: &ToolDecl) -> ToolResult {
        ToolResult::success(json!({
            "stdout": format!("[simulated] executed {} bytes of code", argument.len()),
            "exit_code": 0,
            "sandbox": config.sandbox.unwrap_or(true),
        }))
    }
}

/// Sleeps before answering; exists to exercise dispatch timeouts.
pub struct SleepStub {
    pub sleep_ms: u64,
}

#[async_trait]
impl Tool for SleepStub {
    fn name(&self) -> &str {
        "Sleep"
    }

    fn is_stub(&self) -> bool {
        true
    }

    async fn invoke(&self, argument: &str, _config: &ToolDecl) -> ToolResult {
        tokio::time::sleep(Duration::from_millis(self.sleep_ms)).await;
        ToolResult::success(json!({ "slept_ms": self.sleep_ms, "argument": argument }))
    }
}

/// Fallback stub: echoes its input.
pub struct EchoStub {
    pub name: String,
}

#[async_trait]
impl Tool for EchoStub {
    fn name(&self) -> &str {
        &self.name
    }

    fn is_stub(&self) -> bool {
        true
    }

    async fn invoke(&self, argument: &str, _config: &ToolDecl) -> ToolResult {
        ToolResult::success(json!({ "tool": self.name, "echo": argument }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn web_search_honors_max_results() {
        let config = ToolDecl {
            max_results: Some(2),
            ..ToolDecl::default()
        };
        let result = WebSearchStub.invoke("rust lang", &config).await;
        assert!(result.ok);
        assert_eq!(result.value["results"].as_array().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn web_search_is_deterministic() {
        let config = ToolDecl::default();
        let a = WebSearchStub.invoke("q", &config).await;
        let b = WebSearchStub.invoke("q", &config).await;
        assert_eq!(a, b);
    }

    #[tokio::test]
    async fn calculator_evaluates_and_rejects() {
        let config = ToolDecl::default();
        let ok = CalculatorStub.invoke("6 * 7", &config).await;
        assert_eq!(ok.value["value"], serde_json::json!(42.0));

        let div0 = CalculatorStub.invoke("1 / 0", &config).await;
        assert!(!div0.ok);

        let garbage = CalculatorStub.invoke("what is six by nine", &config).await;
        assert!(!garbage.ok);
    }

    #[tokio::test]
    async fn unknown_names_fall_back_to_echo() {
        let tool = stub_for("PdfExtractor");
        assert_eq!(tool.name(), "PdfExtractor");
        assert!(tool.is_stub());
        let result = tool.invoke("doc.pdf", &ToolDecl::default()).await;
        assert_eq!(result.value["echo"], serde_json::json!("doc.pdf"));
    }
}
