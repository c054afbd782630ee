//! 运行级错误
//!
//! 工具级失败在工具层降级吸收，不会出现在这里；能到达调用方的只有致命的模型错误、非法请求与配置错误。

use thiserror::Error;

use crate::llm::LlmError;

#[derive(Error, Debug)]
pub enum RunError {
    /// 模型调用失败，对当前运行是致命的
    #[error("LLM error: {0}")]
    Llm(#[from] LlmError),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Config error: {0}")]
    Config(String),

    /// 非步骤循环的流水线（brand）在两次模型调用之间收到取消
    #[error("Run cancelled")]
    Cancelled,
}
