//! 步骤循环事件：循环是生产者，消费者（CLI / HTTP 层）负责序列化到线上格式

use serde::Serialize;
use serde_json::Value;

use crate::llm::ToolChoice;
use crate::steps::FinishReason;

/// 单个过程事件（可序列化为 JSON 行）
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StepEvent {
    RunStarted {
        run_id: String,
        max_steps: usize,
    },
    /// 即将调用模型
    StepStarted {
        step: usize,
        tool_choice: ToolChoice,
    },
    /// 模型本步输出的文本
    Text { step: usize, text: String },
    ToolCall {
        step: usize,
        call_id: String,
        tool: String,
        input: Value,
    },
    /// 工具返回（预览，避免过长）
    ToolResult {
        step: usize,
        call_id: String,
        tool: String,
        preview: String,
    },
    /// 工具失败（已降级为默认输出）
    ToolFailure {
        step: usize,
        call_id: String,
        tool: String,
        reason: String,
    },
    StepFinished { step: usize, tool_calls: usize },
    Finished { reason: FinishReason },
    /// 致命错误
    Error { text: String },
}
