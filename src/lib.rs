//! Pathfinder - 营销研究智能体编排
//!
//! 模块划分：
//! - **config**: 应用配置加载（TOML + 环境变量）
//! - **core**: 运行级错误
//! - **evidence**: 证据分群类型与确定性校验器
//! - **llm**: 模型客户端抽象与实现（OpenAI 兼容 / Scripted）
//! - **memory**: 对话记录、旅程阶段状态机与研究累积状态
//! - **observability**: tracing 初始化
//! - **pipelines**: simulate / social-icp / evidence-icp / brand / chat
//! - **social**: 平台识别与结构化输出 schema
//! - **steps**: 有界步骤循环、停止条件、工具选择策略
//! - **tools**: 工具集 trait、参数解析与串行执行器

pub mod config;
pub mod core;
pub mod evidence;
pub mod llm;
pub mod memory;
pub mod observability;
pub mod pipelines;
pub mod social;
pub mod steps;
pub mod tools;

pub use crate::config::{load_config, AppConfig};
pub use crate::core::RunError;
pub use crate::pipelines::{PipelineContext, RunReport, RunStatus};
