//! 工具执行器
//!
//! 对单个工具调用：解析入参 -> 带超时执行 -> 成功记 Completed，失败记 Failed 并用 fallback 输出替代。
//! 任何失败都不向上传播；每次调用输出一条结构化审计日志（JSON）。

use std::time::{Duration, Instant};

use serde_json::json;
use tokio::time::timeout;

use crate::llm::ToolCallRequest;
use crate::steps::ToolInvocation;
use crate::tools::{ToolError, Toolset};

const ARGS_PREVIEW_CHARS: usize = 200;

/// 执行一次工具调用，返回已终结（Completed / Failed）的调用记录
pub async fn execute_call<T: Toolset>(
    toolset: &mut T,
    request: &ToolCallRequest,
    tool_timeout: Duration,
) -> ToolInvocation {
    let start = Instant::now();
    let mut invocation =
        ToolInvocation::requested(&request.id, &request.name, request.arguments.clone());

    let call = match toolset.parse_call(&request.name, request.arguments.clone()) {
        Ok(call) => call,
        Err(e) => {
            audit(request, "invalid_input", start);
            tracing::warn!(tool = %request.name, error = %e, "tool input rejected");
            return invocation.fail(e.to_string(), json!({ "error": e.to_string() }));
        }
    };

    invocation.start();
    let result = match timeout(tool_timeout, toolset.execute(&call)).await {
        Ok(r) => r,
        Err(_) => Err(ToolError::Timeout(request.name.clone())),
    };

    match result {
        Ok(output) => {
            audit(request, "ok", start);
            invocation.complete(output)
        }
        Err(e) => {
            let outcome = match e {
                ToolError::Timeout(_) => "timeout",
                _ => "error",
            };
            audit(request, outcome, start);
            tracing::warn!(tool = %request.name, error = %e, "tool failed, substituting default output");
            let substitute = toolset.fallback(&call, &e);
            invocation.fail(e.to_string(), substitute)
        }
    }
}

fn audit(request: &ToolCallRequest, outcome: &str, start: Instant) {
    let audit = json!({
        "event": "tool_audit",
        "tool": request.name,
        "call_id": request.id,
        "ok": outcome == "ok",
        "outcome": outcome,
        "duration_ms": start.elapsed().as_millis() as u64,
        "args_preview": args_preview(&request.arguments),
    });
    tracing::info!(audit = %audit, "tool");
}

fn args_preview(args: &serde_json::Value) -> String {
    let s = args.to_string();
    if s.chars().count() > ARGS_PREVIEW_CHARS {
        format!("{}...", s.chars().take(ARGS_PREVIEW_CHARS).collect::<String>())
    } else {
        s
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::ToolDefinition;
    use crate::steps::InvocationStatus;
    use crate::tools::ToolInputError;
    use async_trait::async_trait;
    use serde_json::Value;

    #[derive(Debug)]
    enum Call {
        Echo(String),
        Fail,
        Sleep,
    }

    #[derive(Default)]
    struct TestTools {
        seen: Vec<String>,
    }

    #[async_trait]
    impl Toolset for TestTools {
        type Call = Call;

        fn definitions(&self) -> Vec<ToolDefinition> {
            Vec::new()
        }

        fn parse_call(&self, name: &str, arguments: Value) -> Result<Call, ToolInputError> {
            match name {
                "echo" => arguments["text"]
                    .as_str()
                    .map(|t| Call::Echo(t.to_string()))
                    .ok_or_else(|| ToolInputError::InvalidArguments {
                        tool: name.into(),
                        message: "text missing".into(),
                    }),
                "fail" => Ok(Call::Fail),
                "sleep" => Ok(Call::Sleep),
                other => Err(ToolInputError::UnknownTool(other.into())),
            }
        }

        async fn execute(&mut self, call: &Call) -> Result<Value, ToolError> {
            match call {
                Call::Echo(text) => {
                    self.seen.push(text.clone());
                    Ok(json!({ "text": text }))
                }
                Call::Fail => Err(ToolError::Failed("nope".into())),
                Call::Sleep => {
                    tokio::time::sleep(Duration::from_secs(10)).await;
                    Ok(Value::Null)
                }
            }
        }

        fn fallback(&self, _call: &Call, _error: &ToolError) -> Value {
            json!({ "degraded": true })
        }
    }

    fn req(name: &str, args: Value) -> ToolCallRequest {
        ToolCallRequest::new("c1", name, args)
    }

    #[tokio::test]
    async fn test_success_records_output_and_mutates_state() {
        let mut tools = TestTools::default();
        let inv = execute_call(&mut tools, &req("echo", json!({"text": "hi"})), Duration::from_secs(1)).await;
        assert_eq!(inv.status, InvocationStatus::Completed);
        assert_eq!(inv.output["text"], "hi");
        assert_eq!(tools.seen, vec!["hi"]);
    }

    #[tokio::test]
    async fn test_invalid_input_is_failed_not_executed() {
        let mut tools = TestTools::default();
        let inv = execute_call(&mut tools, &req("echo", json!({})), Duration::from_secs(1)).await;
        assert_eq!(inv.status, InvocationStatus::Failed);
        assert!(inv.output["error"].as_str().unwrap().contains("text missing"));
        assert!(tools.seen.is_empty());
    }

    #[tokio::test]
    async fn test_unknown_tool_is_failed() {
        let mut tools = TestTools::default();
        let inv = execute_call(&mut tools, &req("nope", json!({})), Duration::from_secs(1)).await;
        assert_eq!(inv.status, InvocationStatus::Failed);
        assert!(inv.error.unwrap().contains("Unknown tool"));
    }

    #[tokio::test]
    async fn test_failure_uses_fallback() {
        let mut tools = TestTools::default();
        let inv = execute_call(&mut tools, &req("fail", json!({})), Duration::from_secs(1)).await;
        assert_eq!(inv.status, InvocationStatus::Failed);
        assert_eq!(inv.output["degraded"], true);
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_uses_fallback() {
        let mut tools = TestTools::default();
        let inv = execute_call(&mut tools, &req("sleep", json!({})), Duration::from_secs(1)).await;
        assert_eq!(inv.status, InvocationStatus::Failed);
        assert!(inv.error.unwrap().contains("timed out"));
        assert_eq!(inv.output["degraded"], true);
    }
}
