//! 停止条件与工具选择策略
//!
//! 两者都是历史上的纯函数，由流水线定义提供；步骤循环本身除历史外不持有状态。

use std::fmt;
use std::sync::Arc;

use serde_json::Value;

use crate::llm::ToolChoice;
use crate::steps::{has_fired, Step};

type Predicate = Arc<dyn Fn(&[Step]) -> bool + Send + Sync>;

/// 命名的停止谓词；任一满足即停止（OR 语义）
#[derive(Clone)]
pub struct StopCondition {
    name: String,
    predicate: Predicate,
}

impl fmt::Debug for StopCondition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StopCondition").field("name", &self.name).finish()
    }
}

impl StopCondition {
    pub fn new(
        name: impl Into<String>,
        predicate: impl Fn(&[Step]) -> bool + Send + Sync + 'static,
    ) -> Self {
        Self {
            name: name.into(),
            predicate: Arc::new(predicate),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_met(&self, history: &[Step]) -> bool {
        (self.predicate)(history)
    }

    /// 已完成 n 步
    pub fn step_count_is(n: usize) -> Self {
        Self::new(format!("step_count_is({n})"), move |h| h.len() >= n)
    }

    /// 工具 name 至少成功执行过一次
    pub fn tool_fired(name: &str) -> Self {
        let tool = name.to_string();
        Self::new(format!("tool_fired({name})"), move |h| has_fired(h, &tool))
    }

    /// 工具 name 的某次成功输出满足 pred
    pub fn tool_output_matches(
        name: &str,
        label: &str,
        pred: impl Fn(&Value) -> bool + Send + Sync + 'static,
    ) -> Self {
        let tool = name.to_string();
        Self::new(label, move |h| {
            h.iter()
                .flat_map(|s| s.invocations.iter())
                .any(|inv| inv.tool == tool && inv.succeeded() && pred(&inv.output))
        })
    }
}

/// 每一步前重新计算的工具选择策略
#[derive(Clone)]
pub struct ToolChoicePolicy(Arc<dyn Fn(&[Step]) -> ToolChoice + Send + Sync>);

impl fmt::Debug for ToolChoicePolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("ToolChoicePolicy")
    }
}

impl Default for ToolChoicePolicy {
    fn default() -> Self {
        Self::fixed(ToolChoice::Auto)
    }
}

impl ToolChoicePolicy {
    pub fn new(f: impl Fn(&[Step]) -> ToolChoice + Send + Sync + 'static) -> Self {
        Self(Arc::new(f))
    }

    pub fn fixed(choice: ToolChoice) -> Self {
        Self::new(move |_| choice.clone())
    }

    /// milestone 满足前强制调用工具，之后放开为 auto
    pub fn required_until(milestone: StopCondition) -> Self {
        Self::new(move |h| {
            if milestone.is_met(h) {
                ToolChoice::Auto
            } else {
                ToolChoice::Required
            }
        })
    }

    pub fn choose(&self, history: &[Step]) -> ToolChoice {
        (self.0)(history)
    }
}
