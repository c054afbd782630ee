//! 流水线：在步骤循环之上组装各业务流程
//!
//! - **simulate**: 画像驱动的三阶段搜索旅程模拟
//! - **social_icp**: 社交主页 -> 受众分析 -> ICP（v1）
//! - **evidence_icp**: 带证据引用与校验的 ICP（v2）
//! - **brand**: 品牌分析 -> 主题 / ICP -> 分阶段查询
//! - **chat**: 流式对话

pub mod brand;
pub mod chat;
pub mod evidence_icp;
pub mod prompts;
pub mod simulate;
pub mod social_icp;

use std::time::Duration;

use serde::Serialize;
use tokio::sync::mpsc::UnboundedSender;
use tokio_util::sync::CancellationToken;

use crate::config::AppConfig;
use crate::llm::ModelClient;
use crate::steps::{FinishReason, RunOutcome, Step, StepEvent, StepSession, StopCondition, ToolChoicePolicy};

pub use brand::{run_brand_pipeline, BrandAnalysis, BrandPipelineResult, BrandPrompts, JourneyQueries, Pairing};
pub use chat::{stream_chat, ChatRequest};
pub use evidence_icp::{run_evidence_icp, CreatorHints, EvidenceIcpRequest, EvidenceIcpResult, ResearchDepth};
pub use prompts::PromptLibrary;
pub use simulate::{run_simulation, SimulationRequest, SimulationResult};
pub use social_icp::{run_social_icp, SocialIcpRequest, SocialIcpResult};

/// 终止工具是否触发
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Complete,
    /// 步数上限 / 截止 / 取消 / 模型提前结束，终止工具没有触发
    Incomplete,
}

/// 流水线对调用方的结果
#[derive(Debug, Clone, Serialize)]
pub struct RunReport<T> {
    pub run_id: String,
    pub status: RunStatus,
    pub finish: FinishReason,
    pub steps: Vec<Step>,
    /// 仅在 Complete 时存在
    pub result: Option<T>,
    /// 运行结束时的累积状态快照，Incomplete 时用于排查
    pub accumulated: serde_json::Value,
}

impl<T> RunReport<T> {
    pub fn new(
        outcome: RunOutcome,
        result: Option<T>,
        accumulated: serde_json::Value,
    ) -> Self {
        let status = if result.is_some() {
            RunStatus::Complete
        } else {
            RunStatus::Incomplete
        };
        Self {
            run_id: outcome.run_id,
            status,
            finish: outcome.finish,
            steps: outcome.history,
            result,
            accumulated,
        }
    }

    pub fn is_complete(&self) -> bool {
        self.status == RunStatus::Complete
    }
}

/// 各角色使用的模型；None 表示客户端默认（联网搜索时客户端会自动换成搜索模型）
#[derive(Debug, Clone, Default)]
pub struct ModelRoles {
    pub agent: Option<String>,
    pub extraction: Option<String>,
    pub analysis: Option<String>,
}

impl ModelRoles {
    pub fn from_config(cfg: &AppConfig, agent_override: Option<String>) -> Self {
        Self {
            agent: agent_override,
            extraction: Some(cfg.llm.extraction_model.clone()),
            analysis: Some(cfg.llm.analysis_model.clone()),
        }
    }
}

/// 一次流水线运行的外部依赖
#[derive(Clone)]
pub struct PipelineContext<'a> {
    pub model: &'a dyn ModelClient,
    pub cancel_token: CancellationToken,
    pub event_tx: Option<&'a UnboundedSender<StepEvent>>,
    pub config: &'a AppConfig,
    pub prompts: PromptLibrary,
}

impl<'a> PipelineContext<'a> {
    pub fn new(model: &'a dyn ModelClient, config: &'a AppConfig, cancel_token: CancellationToken) -> Self {
        Self {
            model,
            cancel_token,
            event_tx: None,
            config,
            prompts: PromptLibrary::new(config.prompts.dir.clone()),
        }
    }

    pub fn with_event_tx(mut self, tx: &'a UnboundedSender<StepEvent>) -> Self {
        self.event_tx = Some(tx);
        self
    }

    /// 组装步骤循环：terminal 满足前强制调用工具，之后放开
    pub(crate) fn session(
        &self,
        max_steps: usize,
        timeout_secs: u64,
        terminal: StopCondition,
        agent_model: Option<String>,
    ) -> StepSession<'a> {
        let mut session = StepSession::new(self.model, self.cancel_token.clone())
            .with_max_steps(max_steps)
            .with_timeout(Duration::from_secs(timeout_secs))
            .with_tool_timeout(self.config.runner.tool_timeout())
            .with_tool_choice_policy(ToolChoicePolicy::required_until(terminal.clone()))
            .with_stop_condition(terminal)
            .with_model(agent_model);
        if let Some(tx) = self.event_tx {
            session = session.with_event_tx(tx);
        }
        session
    }
}

/// 文本截断到 max 个字符，用于日志与提示词
pub(crate) fn truncate_chars(s: &str, max: usize) -> String {
    if s.chars().count() > max {
        format!("{}...", s.chars().take(max).collect::<String>())
    } else {
        s.to_string()
    }
}
