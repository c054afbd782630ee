//! 步骤循环
//!
//! 每一步：按策略计算 tool_choice -> 调用模型 -> 按下标顺序串行执行模型请求的工具 -> 记录 Step ->
//! 评估停止条件。停止条件按 OR 语义，用户条件先于步数上限评估；取消与墙钟截止在下一步开始前检查。
//! 模型调用失败对本次运行是致命的；工具失败只降级为默认输出。

use std::time::Duration;

use serde::Serialize;
use tokio::sync::mpsc::UnboundedSender;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::core::RunError;
use crate::llm::{ModelClient, TextRequest, ToolChoice};
use crate::memory::Message;
use crate::steps::{last_output, StepEvent, Step, StopCondition, ToolChoicePolicy};
use crate::tools::{execute_call, Toolset};

/// 默认步数上限
pub const DEFAULT_MAX_STEPS: usize = 15;
/// 默认单次工具执行超时
pub const DEFAULT_TOOL_TIMEOUT: Duration = Duration::from_secs(60);
/// ToolResult 事件中的预览长度
const RESULT_PREVIEW_CHARS: usize = 200;

/// 循环结束原因
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum FinishReason {
    /// 某个停止条件满足
    StopCondition { condition: String },
    /// 达到步数上限
    StepLimit { max_steps: usize },
    /// 模型未请求任何工具且本步不要求调用工具
    ModelFinished,
    /// 墙钟截止
    DeadlineExceeded,
    /// 上游取消
    Cancelled,
}

/// 一次运行的结果：完整历史 + 对话 + 结束原因
#[derive(Debug, Clone, Serialize)]
pub struct RunOutcome {
    pub run_id: String,
    pub history: Vec<Step>,
    #[serde(skip)]
    pub messages: Vec<Message>,
    pub finish: FinishReason,
}

impl RunOutcome {
    pub fn fired(&self, tool: &str) -> bool {
        crate::steps::has_fired(&self.history, tool)
    }

    pub fn last_output(&self, tool: &str) -> Option<&serde_json::Value> {
        last_output(&self.history, tool)
    }

    /// 最后一步模型输出的文本
    pub fn final_text(&self) -> &str {
        self.history.last().map(|s| s.text.as_str()).unwrap_or("")
    }
}

/// 步骤循环配置
pub struct StepSession<'a> {
    /// 模型客户端（必需）
    pub model: &'a dyn ModelClient,
    /// 取消令牌（必需）
    pub cancel_token: CancellationToken,
    /// 步数上限，总是生效的停止条件
    pub max_steps: usize,
    /// 整次运行的墙钟上限
    pub timeout: Option<Duration>,
    pub tool_timeout: Duration,
    pub stop_when: Vec<StopCondition>,
    pub prepare_step: ToolChoicePolicy,
    /// 可选：事件推送通道
    pub event_tx: Option<&'a UnboundedSender<StepEvent>>,
    /// 可选：覆盖客户端默认模型
    pub model_name: Option<String>,
}

impl<'a> StepSession<'a> {
    pub fn new(model: &'a dyn ModelClient, cancel_token: CancellationToken) -> Self {
        Self {
            model,
            cancel_token,
            max_steps: DEFAULT_MAX_STEPS,
            timeout: None,
            tool_timeout: DEFAULT_TOOL_TIMEOUT,
            stop_when: Vec::new(),
            prepare_step: ToolChoicePolicy::default(),
            event_tx: None,
            model_name: None,
        }
    }

    pub fn with_max_steps(mut self, max_steps: usize) -> Self {
        self.max_steps = max_steps;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn with_tool_timeout(mut self, timeout: Duration) -> Self {
        self.tool_timeout = timeout;
        self
    }

    pub fn with_stop_condition(mut self, condition: StopCondition) -> Self {
        self.stop_when.push(condition);
        self
    }

    pub fn with_tool_choice_policy(mut self, policy: ToolChoicePolicy) -> Self {
        self.prepare_step = policy;
        self
    }

    pub fn with_event_tx(mut self, tx: &'a UnboundedSender<StepEvent>) -> Self {
        self.event_tx = Some(tx);
        self
    }

    pub fn with_model(mut self, model: Option<String>) -> Self {
        self.model_name = model;
        self
    }

    fn send(&self, ev: StepEvent) {
        if let Some(tx) = self.event_tx {
            let _ = tx.send(ev);
        }
    }
}

/// 运行步骤循环直到停止条件、步数上限、模型自然结束、截止或取消
pub async fn run_steps<T: Toolset>(
    session: &StepSession<'_>,
    tools: &mut T,
    system: Option<&str>,
    mut messages: Vec<Message>,
) -> Result<RunOutcome, RunError> {
    if session.max_steps == 0 {
        return Err(RunError::InvalidRequest("max_steps must be at least 1".into()));
    }
    if messages.is_empty() {
        return Err(RunError::InvalidRequest("initial prompt is empty".into()));
    }

    let run_id = uuid::Uuid::new_v4().to_string();
    let deadline = session.timeout.map(|t| Instant::now() + t);
    let definitions = tools.definitions();
    let mut history: Vec<Step> = Vec::new();
    let (init_prompt, init_completion, _) = session.model.token_usage();

    tracing::info!(run_id = %run_id, max_steps = session.max_steps, tools = definitions.len(), "run started");
    session.send(StepEvent::RunStarted {
        run_id: run_id.clone(),
        max_steps: session.max_steps,
    });

    let finish = loop {
        if session.cancel_token.is_cancelled() {
            break FinishReason::Cancelled;
        }
        if deadline.is_some_and(|d| Instant::now() >= d) {
            break FinishReason::DeadlineExceeded;
        }

        let index = history.len();
        let tool_choice = session.prepare_step.choose(&history);
        session.send(StepEvent::StepStarted {
            step: index,
            tool_choice: tool_choice.clone(),
        });

        let request = TextRequest {
            model: session.model_name.clone(),
            system: system.map(String::from),
            messages: messages.clone(),
            tools: definitions.clone(),
            tool_choice: tool_choice.clone(),
            parallel_tool_calls: false,
            web_search: false,
        };
        let call = session.model.generate_text(request);
        let result = match deadline {
            Some(d) => match tokio::time::timeout_at(d, call).await {
                Ok(r) => r,
                Err(_) => break FinishReason::DeadlineExceeded,
            },
            None => call.await,
        };
        let response = match result {
            Ok(r) => r,
            Err(e) => {
                tracing::error!(run_id = %run_id, step = index, error = %e, "model call failed");
                session.send(StepEvent::Error { text: e.to_string() });
                return Err(RunError::Llm(e));
            }
        };

        if !response.text.is_empty() {
            session.send(StepEvent::Text {
                step: index,
                text: response.text.clone(),
            });
        }
        messages.push(Message::assistant_with_tool_calls(
            response.text.clone(),
            response.tool_calls.clone(),
        ));

        // 串行：&mut tools 保证同一运行内不会有两个工具同时改写累积状态
        let mut invocations = Vec::with_capacity(response.tool_calls.len());
        for request in &response.tool_calls {
            session.send(StepEvent::ToolCall {
                step: index,
                call_id: request.id.clone(),
                tool: request.name.clone(),
                input: request.arguments.clone(),
            });
            let invocation = execute_call(tools, request, session.tool_timeout).await;
            match &invocation.error {
                None => session.send(StepEvent::ToolResult {
                    step: index,
                    call_id: invocation.call_id.clone(),
                    tool: invocation.tool.clone(),
                    preview: preview(&invocation.output),
                }),
                Some(reason) => session.send(StepEvent::ToolFailure {
                    step: index,
                    call_id: invocation.call_id.clone(),
                    tool: invocation.tool.clone(),
                    reason: reason.clone(),
                }),
            }
            messages.push(Message::tool_result(
                invocation.call_id.clone(),
                invocation.output.to_string(),
            ));
            invocations.push(invocation);
        }

        let called_tools = !invocations.is_empty();
        history.push(Step {
            index,
            text: response.text,
            tool_choice: tool_choice.clone(),
            invocations,
        });
        session.send(StepEvent::StepFinished {
            step: index,
            tool_calls: response.tool_calls.len(),
        });

        if let Some(cond) = session.stop_when.iter().find(|c| c.is_met(&history)) {
            break FinishReason::StopCondition {
                condition: cond.name().to_string(),
            };
        }
        if history.len() >= session.max_steps {
            break FinishReason::StepLimit {
                max_steps: session.max_steps,
            };
        }
        if !called_tools {
            match tool_choice {
                ToolChoice::Required | ToolChoice::Tool { .. } => {
                    tracing::warn!(run_id = %run_id, step = index, "model ignored tool_choice directive");
                }
                ToolChoice::Auto | ToolChoice::None => break FinishReason::ModelFinished,
            }
        }
    };

    let (prompt, completion, _) = session.model.token_usage();
    tracing::info!(
        run_id = %run_id,
        steps = history.len(),
        finish = ?finish,
        prompt_tokens = prompt.saturating_sub(init_prompt),
        completion_tokens = completion.saturating_sub(init_completion),
        "run finished"
    );
    session.send(StepEvent::Finished {
        reason: finish.clone(),
    });

    Ok(RunOutcome {
        run_id,
        history,
        messages,
        finish,
    })
}

fn preview(value: &serde_json::Value) -> String {
    let s = value.to_string();
    if s.chars().count() > RESULT_PREVIEW_CHARS {
        format!("{}...", s.chars().take(RESULT_PREVIEW_CHARS).collect::<String>())
    } else {
        s
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::{LlmError, ScriptedModelClient, ToolCallRequest, ToolDefinition};
    use crate::tools::{ToolError, ToolInputError};
    use async_trait::async_trait;
    use serde_json::{json, Value};

    /// 记录每次调用的标记，验证串行与顺序
    #[derive(Default)]
    struct MarkerTools {
        markers: Vec<String>,
    }

    #[async_trait]
    impl Toolset for MarkerTools {
        type Call = String;

        fn definitions(&self) -> Vec<ToolDefinition> {
            ["mark", "finish"]
                .iter()
                .map(|n| ToolDefinition {
                    name: n.to_string(),
                    description: String::new(),
                    parameters: json!({"type": "object"}),
                })
                .collect()
        }

        fn parse_call(&self, name: &str, arguments: Value) -> Result<String, ToolInputError> {
            match name {
                "mark" | "finish" => Ok(arguments["m"].as_str().unwrap_or("").to_string()),
                other => Err(ToolInputError::UnknownTool(other.into())),
            }
        }

        async fn execute(&mut self, call: &String) -> Result<Value, ToolError> {
            if call == "boom" {
                return Err(ToolError::Failed("boom".into()));
            }
            self.markers.push(call.clone());
            Ok(json!({ "count": self.markers.len() }))
        }

        fn fallback(&self, _call: &String, _error: &ToolError) -> Value {
            json!({})
        }
    }

    fn call(id: &str, name: &str, m: &str) -> ToolCallRequest {
        ToolCallRequest::new(id, name, json!({ "m": m }))
    }

    #[tokio::test]
    async fn test_stop_condition_and_ceiling_same_step() {
        let model = ScriptedModelClient::new().with_step(vec![call("1", "finish", "a")]);
        let session = StepSession::new(&model, CancellationToken::new())
            .with_max_steps(1)
            .with_stop_condition(StopCondition::tool_fired("finish"));
        let mut tools = MarkerTools::default();
        let outcome = run_steps(&session, &mut tools, None, vec![Message::user("go")])
            .await
            .unwrap();
        assert_eq!(outcome.history.len(), 1);
        assert_eq!(
            outcome.finish,
            FinishReason::StopCondition {
                condition: "tool_fired(finish)".into()
            }
        );
    }

    #[tokio::test]
    async fn test_ceiling_alone_halts() {
        let model = ScriptedModelClient::new()
            .with_step(vec![call("1", "mark", "a")])
            .with_step(vec![call("2", "mark", "b")])
            .with_step(vec![call("3", "mark", "c")]);
        let session = StepSession::new(&model, CancellationToken::new())
            .with_max_steps(2)
            .with_stop_condition(StopCondition::tool_fired("finish"));
        let mut tools = MarkerTools::default();
        let outcome = run_steps(&session, &mut tools, None, vec![Message::user("go")])
            .await
            .unwrap();
        assert_eq!(outcome.finish, FinishReason::StepLimit { max_steps: 2 });
        assert_eq!(tools.markers, vec!["a", "b"]);
        assert!(!outcome.fired("finish"));
    }

    #[tokio::test]
    async fn test_multiple_calls_in_one_step_run_in_index_order() {
        let model = ScriptedModelClient::new().with_step(vec![
            call("1", "mark", "first"),
            call("2", "mark", "second"),
            call("3", "mark", "third"),
        ]);
        let session = StepSession::new(&model, CancellationToken::new()).with_max_steps(1);
        let mut tools = MarkerTools::default();
        let outcome = run_steps(&session, &mut tools, None, vec![Message::user("go")])
            .await
            .unwrap();
        assert_eq!(tools.markers, vec!["first", "second", "third"]);
        let counts: Vec<_> = outcome.history[0]
            .invocations
            .iter()
            .map(|i| i.output["count"].clone())
            .collect();
        assert_eq!(counts, vec![json!(1), json!(2), json!(3)]);
    }

    #[tokio::test]
    async fn test_tool_failure_does_not_halt() {
        let model = ScriptedModelClient::new()
            .with_step(vec![call("1", "mark", "boom"), call("2", "nope", "x")])
            .with_step(vec![call("3", "finish", "done")]);
        let session = StepSession::new(&model, CancellationToken::new())
            .with_stop_condition(StopCondition::tool_fired("finish"));
        let mut tools = MarkerTools::default();
        let outcome = run_steps(&session, &mut tools, None, vec![Message::user("go")])
            .await
            .unwrap();
        assert_eq!(outcome.history.len(), 2);
        assert!(outcome.history[0].invocations.iter().all(|i| !i.succeeded()));
        assert!(outcome.fired("finish"));
        // 每个工具调用都回填了一条 tool 消息
        let tool_messages = outcome
            .messages
            .iter()
            .filter(|m| m.tool_call_id.is_some())
            .count();
        assert_eq!(tool_messages, 3);
    }

    #[tokio::test]
    async fn test_model_error_is_fatal() {
        let model = ScriptedModelClient::new()
            .with_step(vec![call("1", "mark", "a")])
            .with_step_error("provider down");
        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
        let session = StepSession::new(&model, CancellationToken::new()).with_event_tx(&tx);
        let mut tools = MarkerTools::default();
        let err = run_steps(&session, &mut tools, None, vec![Message::user("go")])
            .await
            .unwrap_err();
        assert!(matches!(err, RunError::Llm(LlmError::Request(_))));
        drop(tx);
        let mut saw_error = false;
        while let Some(ev) = rx.recv().await {
            if matches!(ev, StepEvent::Error { .. }) {
                saw_error = true;
            }
        }
        assert!(saw_error);
    }

    #[tokio::test]
    async fn test_ignored_required_choice_bounded_by_ceiling() {
        let model = ScriptedModelClient::new()
            .with_final_text("I'd rather chat")
            .with_final_text("still chatting")
            .with_final_text("and more");
        let session = StepSession::new(&model, CancellationToken::new())
            .with_max_steps(3)
            .with_tool_choice_policy(ToolChoicePolicy::fixed(ToolChoice::Required));
        let mut tools = MarkerTools::default();
        let outcome = run_steps(&session, &mut tools, None, vec![Message::user("go")])
            .await
            .unwrap();
        assert_eq!(outcome.finish, FinishReason::StepLimit { max_steps: 3 });
        assert_eq!(outcome.final_text(), "and more");
    }

    #[tokio::test]
    async fn test_auto_choice_without_calls_finishes() {
        let model = ScriptedModelClient::new().with_final_text("summary");
        let session = StepSession::new(&model, CancellationToken::new());
        let mut tools = MarkerTools::default();
        let outcome = run_steps(&session, &mut tools, None, vec![Message::user("go")])
            .await
            .unwrap();
        assert_eq!(outcome.finish, FinishReason::ModelFinished);
        assert_eq!(outcome.final_text(), "summary");
    }

    #[tokio::test]
    async fn test_policy_recomputed_each_step() {
        let model = ScriptedModelClient::new()
            .with_step(vec![call("1", "mark", "a")])
            .with_step(vec![call("2", "finish", "b")])
            .with_final_text("wrap up");
        let session = StepSession::new(&model, CancellationToken::new())
            .with_tool_choice_policy(ToolChoicePolicy::required_until(StopCondition::tool_fired(
                "finish",
            )));
        let mut tools = MarkerTools::default();
        let outcome = run_steps(&session, &mut tools, None, vec![Message::user("go")])
            .await
            .unwrap();
        assert_eq!(
            model.recorded_choices(),
            vec![ToolChoice::Required, ToolChoice::Required, ToolChoice::Auto]
        );
        assert_eq!(outcome.finish, FinishReason::ModelFinished);
    }

    #[tokio::test]
    async fn test_cancelled_before_first_step() {
        let model = ScriptedModelClient::new().with_step(vec![call("1", "mark", "a")]);
        let token = CancellationToken::new();
        token.cancel();
        let session = StepSession::new(&model, token);
        let mut tools = MarkerTools::default();
        let outcome = run_steps(&session, &mut tools, None, vec![Message::user("go")])
            .await
            .unwrap();
        assert_eq!(outcome.finish, FinishReason::Cancelled);
        assert!(outcome.history.is_empty());
        assert!(tools.markers.is_empty());
    }

    #[tokio::test]
    async fn test_zero_deadline_stops_before_first_step() {
        let model = ScriptedModelClient::new().with_step(vec![call("1", "mark", "a")]);
        let session =
            StepSession::new(&model, CancellationToken::new()).with_timeout(Duration::ZERO);
        let mut tools = MarkerTools::default();
        let outcome = run_steps(&session, &mut tools, None, vec![Message::user("go")])
            .await
            .unwrap();
        assert_eq!(outcome.finish, FinishReason::DeadlineExceeded);
    }

    #[tokio::test]
    async fn test_rejects_zero_max_steps() {
        let model = ScriptedModelClient::new();
        let session = StepSession::new(&model, CancellationToken::new()).with_max_steps(0);
        let mut tools = MarkerTools::default();
        let err = run_steps(&session, &mut tools, None, vec![Message::user("go")])
            .await
            .unwrap_err();
        assert!(matches!(err, RunError::InvalidRequest(_)));
    }
}
