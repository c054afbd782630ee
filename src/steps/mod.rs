//! 步骤循环层：历史、停止条件 / 工具选择策略、事件、主循环

pub mod events;
pub mod history;
pub mod loop_;
pub mod policy;

pub use events::StepEvent;
pub use history::{has_fired, last_output, InvocationStatus, Step, ToolInvocation};
pub use loop_::{
    run_steps, FinishReason, RunOutcome, StepSession, DEFAULT_MAX_STEPS, DEFAULT_TOOL_TIMEOUT,
};
pub use policy::{StopCondition, ToolChoicePolicy};
