//! 运行历史：Step 与 ToolInvocation
//!
//! Step 记录后不可变；停止条件与工具选择策略都是 `&[Step]` 上的纯函数。

use serde::Serialize;
use serde_json::Value;

use crate::llm::ToolChoice;

/// requested -> executing -> completed | failed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum InvocationStatus {
    Requested,
    Executing,
    Completed,
    Failed,
}

/// 一次工具调用；call_id 在运行内唯一
#[derive(Debug, Clone, Serialize)]
pub struct ToolInvocation {
    pub call_id: String,
    pub tool: String,
    pub input: Value,
    pub output: Value,
    pub status: InvocationStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ToolInvocation {
    pub fn requested(call_id: impl Into<String>, tool: impl Into<String>, input: Value) -> Self {
        Self {
            call_id: call_id.into(),
            tool: tool.into(),
            input,
            output: Value::Null,
            status: InvocationStatus::Requested,
            error: None,
        }
    }

    pub fn start(&mut self) {
        debug_assert_eq!(self.status, InvocationStatus::Requested);
        self.status = InvocationStatus::Executing;
    }

    pub fn complete(mut self, output: Value) -> Self {
        self.output = output;
        self.status = InvocationStatus::Completed;
        self
    }

    /// 失败的调用同样带输出（降级后的默认值），供模型在下一步继续
    pub fn fail(mut self, error: impl Into<String>, substitute: Value) -> Self {
        self.output = substitute;
        self.error = Some(error.into());
        self.status = InvocationStatus::Failed;
        self
    }

    pub fn succeeded(&self) -> bool {
        self.status == InvocationStatus::Completed
    }
}

/// 一次模型往返
#[derive(Debug, Clone, Serialize)]
pub struct Step {
    pub index: usize,
    pub text: String,
    pub tool_choice: ToolChoice,
    pub invocations: Vec<ToolInvocation>,
}

impl Step {
    /// 本步是否成功执行过名为 tool 的工具
    pub fn fired(&self, tool: &str) -> bool {
        self.invocations
            .iter()
            .any(|inv| inv.tool == tool && inv.succeeded())
    }

    pub fn invocations_of<'a>(&'a self, tool: &'a str) -> impl Iterator<Item = &'a ToolInvocation> {
        self.invocations.iter().filter(move |inv| inv.tool == tool)
    }
}

/// 历史中是否有任一步成功执行过 tool
pub fn has_fired(history: &[Step], tool: &str) -> bool {
    history.iter().any(|s| s.fired(tool))
}

/// 约定：结果取历史中 tool 最后一次成功调用的输出
pub fn last_output<'a>(history: &'a [Step], tool: &str) -> Option<&'a Value> {
    history
        .iter()
        .rev()
        .flat_map(|s| s.invocations.iter().rev())
        .find(|inv| inv.tool == tool && inv.succeeded())
        .map(|inv| &inv.output)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn step(index: usize, invocations: Vec<ToolInvocation>) -> Step {
        Step {
            index,
            text: String::new(),
            tool_choice: ToolChoice::Auto,
            invocations,
        }
    }

    #[test]
    fn test_last_output_skips_failures() {
        let history = vec![
            step(0, vec![ToolInvocation::requested("1", "v", json!({})).complete(json!(1))]),
            step(
                1,
                vec![ToolInvocation::requested("2", "v", json!({})).fail("x", json!({}))],
            ),
        ];
        assert_eq!(last_output(&history, "v"), Some(&json!(1)));
        assert!(has_fired(&history, "v"));
        assert!(!history[1].fired("v"));
        assert_eq!(last_output(&history, "other"), None);
    }

    #[test]
    fn test_last_output_prefers_later_call_in_same_step() {
        let history = vec![step(
            0,
            vec![
                ToolInvocation::requested("1", "v", json!({})).complete(json!("first")),
                ToolInvocation::requested("2", "v", json!({})).complete(json!("second")),
            ],
        )];
        assert_eq!(last_output(&history, "v"), Some(&json!("second")));
        assert_eq!(history[0].invocations_of("v").count(), 2);
    }
}
