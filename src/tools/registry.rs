//! 工具注册表
//!
//! 每条流水线用一个实现 Toolset 的结构体承载本次运行的全部工具：
//! 工具标识是封闭枚举，调用参数是强类型枚举，分发走穷尽 match 而不是按字符串查表。
//! Toolset 同时持有本次运行的累积状态，execute 取 &mut self，保证同一运行内工具串行执行。

use std::fmt;

use async_trait::async_trait;
use schemars::JsonSchema;
use serde::de::DeserializeOwned;
use serde_json::Value;
use thiserror::Error;

use crate::llm::{LlmError, ToolDefinition};
use crate::tools::json_schema_for;

/// 工具入参不符合声明的契约；不会中止运行，调用被记为失败并回填错误给模型
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ToolInputError {
    #[error("Unknown tool: {0}")]
    UnknownTool(String),

    #[error("Tool {0} is not available in this run")]
    Unavailable(String),

    #[error("Invalid arguments for {tool}: {message}")]
    InvalidArguments { tool: String, message: String },

    #[error("Constraint violated for {tool}: {message}")]
    ConstraintViolation { tool: String, message: String },
}

/// 工具执行失败；由 Toolset::fallback 降级为默认输出，运行继续
#[derive(Error, Debug)]
pub enum ToolError {
    #[error("Upstream model call failed: {0}")]
    Upstream(#[from] LlmError),

    #[error("Tool {0} timed out")]
    Timeout(String),

    #[error("Tool failed: {0}")]
    Failed(String),
}

/// 工具入参：serde 反序列化 + schemars 生成 schema + 可选的反序列化后校验
pub trait ToolInput: DeserializeOwned + JsonSchema {
    /// 超出 schema 表达能力的约束（非空、范围等）
    fn validate(&self) -> Result<(), String> {
        Ok(())
    }
}

/// 按 I 的契约解析参数
pub fn parse_input<I: ToolInput>(tool: &str, arguments: Value) -> Result<I, ToolInputError> {
    let input: I =
        serde_json::from_value(arguments).map_err(|e| ToolInputError::InvalidArguments {
            tool: tool.to_string(),
            message: e.to_string(),
        })?;
    input
        .validate()
        .map_err(|message| ToolInputError::ConstraintViolation {
            tool: tool.to_string(),
            message,
        })?;
    Ok(input)
}

/// 由入参类型生成工具声明
pub fn tool_definition<I: ToolInput>(name: &str, description: &str) -> ToolDefinition {
    ToolDefinition {
        name: name.to_string(),
        description: description.to_string(),
        parameters: json_schema_for::<I>(),
    }
}

/// 一次运行可用的工具集合
#[async_trait]
pub trait Toolset: Send {
    /// 强类型调用（通常是「工具标识 + 入参」的枚举）
    type Call: Send + Sync + fmt::Debug;

    /// 暴露给模型的工具声明
    fn definitions(&self) -> Vec<ToolDefinition>;

    /// 名称 + 原始参数 -> 强类型调用；未知工具或参数不合法时返回 ToolInputError
    fn parse_call(&self, name: &str, arguments: Value) -> Result<Self::Call, ToolInputError>;

    /// 执行调用；可嵌套调用模型，并就地更新累积状态
    async fn execute(&mut self, call: &Self::Call) -> Result<Value, ToolError>;

    /// 执行失败时替代的默认输出
    fn fallback(&self, call: &Self::Call, error: &ToolError) -> Value;
}

/// 未知 / 不可用工具的统一判定，供各 Toolset::parse_call 使用
pub fn resolve_tool<K: Copy>(
    name: &str,
    lookup: impl Fn(&str) -> Option<K>,
    offered: &[K],
) -> Result<K, ToolInputError>
where
    K: PartialEq,
{
    let kind = lookup(name).ok_or_else(|| ToolInputError::UnknownTool(name.to_string()))?;
    if offered.contains(&kind) {
        Ok(kind)
    } else {
        Err(ToolInputError::Unavailable(name.to_string()))
    }
}
