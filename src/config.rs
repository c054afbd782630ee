//! 应用配置：从 config/default.toml 与环境变量加载
//!
//! 加载顺序：先读 TOML 文件，再用环境变量 `PATHFINDER__*` 覆盖（双下划线表示嵌套，如 `PATHFINDER__LLM__MODEL=gpt-4o`）。
//! 每个字段都有默认值，没有配置文件也能运行。

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use serde::Deserialize;

use crate::evidence::DEFAULT_LOCATION_MARKERS;
use crate::llm::{ModelClient, OpenAiClient, ScriptedModelClient};

/// 应用配置根（对应 config/default.toml 的顶层）
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct AppConfig {
    pub llm: LlmSection,
    pub runner: RunnerSection,
    pub simulation: SimulationSection,
    pub social: SocialSection,
    pub evidence: EvidenceSection,
    pub prompts: PromptsSection,
}

/// [llm] 段：后端与各角色模型
#[derive(Debug, Clone, Deserialize)]
pub struct LlmSection {
    /// openai / mock
    #[serde(default = "default_provider")]
    pub provider: String,
    /// 驱动步骤循环的模型
    #[serde(default = "default_model")]
    pub model: String,
    /// 联网搜索请求使用的模型
    #[serde(default = "default_search_model")]
    pub search_model: String,
    /// 轻量结构化抽取
    #[serde(default = "default_extraction_model")]
    pub extraction_model: String,
    /// 重要的结构化分析（细分领域、分群生成）
    #[serde(default = "default_analysis_model")]
    pub analysis_model: String,
    pub base_url: Option<String>,
    #[serde(default)]
    pub timeouts: LlmTimeoutsSection,
}

impl Default for LlmSection {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            model: default_model(),
            search_model: default_search_model(),
            extraction_model: default_extraction_model(),
            analysis_model: default_analysis_model(),
            base_url: None,
            timeouts: LlmTimeoutsSection::default(),
        }
    }
}

fn default_provider() -> String {
    "openai".to_string()
}

fn default_model() -> String {
    "gpt-4o".to_string()
}

fn default_search_model() -> String {
    "gpt-4o-mini-search-preview".to_string()
}

fn default_extraction_model() -> String {
    "gpt-4o-mini".to_string()
}

fn default_analysis_model() -> String {
    "gpt-4o".to_string()
}

#[derive(Debug, Clone, Deserialize)]
pub struct LlmTimeoutsSection {
    /// 单次 HTTP 请求超时（秒）
    #[serde(default = "default_request_timeout")]
    pub request: u64,
}

impl Default for LlmTimeoutsSection {
    fn default() -> Self {
        Self {
            request: default_request_timeout(),
        }
    }
}

fn default_request_timeout() -> u64 {
    60
}

/// [runner] 段
#[derive(Debug, Clone, Deserialize)]
pub struct RunnerSection {
    /// 单次工具调用超时（秒）；工具内部可能串联多次模型调用
    #[serde(default = "default_tool_timeout_secs")]
    pub tool_timeout_secs: u64,
}

impl Default for RunnerSection {
    fn default() -> Self {
        Self {
            tool_timeout_secs: default_tool_timeout_secs(),
        }
    }
}

impl RunnerSection {
    pub fn tool_timeout(&self) -> Duration {
        Duration::from_secs(self.tool_timeout_secs)
    }
}

fn default_tool_timeout_secs() -> u64 {
    90
}

/// [simulation] 段：旅程模拟
#[derive(Debug, Clone, Deserialize)]
pub struct SimulationSection {
    #[serde(default = "default_simulation_max_steps")]
    pub max_steps: usize,
    #[serde(default = "default_simulation_timeout_secs")]
    pub timeout_secs: u64,
    /// 拒绝越级的阶段完成记录；关闭后任意顺序都接受
    #[serde(default = "default_true")]
    pub enforce_phase_order: bool,
}

impl Default for SimulationSection {
    fn default() -> Self {
        Self {
            max_steps: default_simulation_max_steps(),
            timeout_secs: default_simulation_timeout_secs(),
            enforce_phase_order: true,
        }
    }
}

fn default_simulation_max_steps() -> usize {
    15
}

fn default_simulation_timeout_secs() -> u64 {
    120
}

fn default_true() -> bool {
    true
}

/// [social] 段：social-icp v1
#[derive(Debug, Clone, Deserialize)]
pub struct SocialSection {
    #[serde(default = "default_social_max_steps")]
    pub max_steps: usize,
    #[serde(default = "default_social_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for SocialSection {
    fn default() -> Self {
        Self {
            max_steps: default_social_max_steps(),
            timeout_secs: default_social_timeout_secs(),
        }
    }
}

fn default_social_max_steps() -> usize {
    10
}

fn default_social_timeout_secs() -> u64 {
    120
}

/// [evidence] 段：evidence-icp v2 与校验器
#[derive(Debug, Clone, Deserialize)]
pub struct EvidenceSection {
    #[serde(default = "default_evidence_max_steps")]
    pub max_steps: usize,
    #[serde(default = "default_evidence_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_max_profile_urls")]
    pub max_profile_urls: usize,
    #[serde(default = "default_max_article_urls")]
    pub max_article_urls: usize,
    #[serde(default = "default_min_score")]
    pub min_score: f64,
    #[serde(default = "default_location_markers")]
    pub location_markers: Vec<String>,
}

impl Default for EvidenceSection {
    fn default() -> Self {
        Self {
            max_steps: default_evidence_max_steps(),
            timeout_secs: default_evidence_timeout_secs(),
            max_profile_urls: default_max_profile_urls(),
            max_article_urls: default_max_article_urls(),
            min_score: default_min_score(),
            location_markers: default_location_markers(),
        }
    }
}

fn default_evidence_max_steps() -> usize {
    15
}

fn default_evidence_timeout_secs() -> u64 {
    180
}

fn default_max_profile_urls() -> usize {
    5
}

fn default_max_article_urls() -> usize {
    3
}

fn default_min_score() -> f64 {
    3.0
}

fn default_location_markers() -> Vec<String> {
    DEFAULT_LOCATION_MARKERS.iter().map(|s| s.to_string()).collect()
}

/// [prompts] 段：提示词覆盖目录，文件名为 `<name>.txt`
#[derive(Debug, Clone, Deserialize, Default)]
pub struct PromptsSection {
    pub dir: Option<PathBuf>,
}

/// 从 config 目录加载配置，环境变量 PATHFINDER__* 可覆盖
///
/// 1. 按顺序查找 config/default.toml、../config/default.toml、default.toml，找到则作为第一源
/// 2. 若传入 config_path 且文件存在，则追加该文件（可覆盖前面的键）
/// 3. 最后叠加环境变量 PATHFINDER__*（双下划线表示嵌套键）
pub fn load_config(config_path: Option<PathBuf>) -> Result<AppConfig, config::ConfigError> {
    let mut builder = config::Config::builder();

    for name in ["config/default", "../config/default", "default"] {
        if std::path::Path::new(&format!("{name}.toml")).exists() {
            builder = builder.add_source(config::File::with_name(name).required(false));
            break;
        }
    }

    if let Some(path) = config_path {
        if path.exists() {
            builder = builder.add_source(config::File::from(path).required(false));
        }
    }

    builder = builder.add_source(
        config::Environment::with_prefix("PATHFINDER")
            .prefix_separator("__")
            .separator("__")
            .try_parsing(true),
    );

    builder.build()?.try_deserialize()
}

/// 根据配置与环境变量选择模型后端（OpenAI 兼容 / Scripted）
pub fn create_model_client(cfg: &AppConfig) -> Arc<dyn ModelClient> {
    let provider = cfg.llm.provider.to_lowercase();
    let api_key = std::env::var("OPENAI_API_KEY").ok();

    match (provider.as_str(), api_key) {
        ("openai", Some(key)) => {
            tracing::info!(model = %cfg.llm.model, search_model = %cfg.llm.search_model, "Using OpenAI-compatible LLM");
            Arc::new(
                OpenAiClient::new(cfg.llm.base_url.as_deref(), &cfg.llm.model, Some(&key))
                    .with_search_model(cfg.llm.search_model.clone())
                    .with_request_timeout(Duration::from_secs(cfg.llm.timeouts.request)),
            )
        }
        ("mock", _) => {
            tracing::info!("Using scripted LLM");
            Arc::new(ScriptedModelClient::new())
        }
        _ => {
            tracing::warn!(provider = %provider, "No API key set or provider unknown, using scripted LLM");
            Arc::new(ScriptedModelClient::new())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults_without_file() {
        let cfg = AppConfig::default();
        assert_eq!(cfg.simulation.max_steps, 15);
        assert_eq!(cfg.social.max_steps, 10);
        assert_eq!(cfg.evidence.timeout_secs, 180);
        assert_eq!(cfg.evidence.max_article_urls, 3);
        assert!(cfg.simulation.enforce_phase_order);
        assert_eq!(cfg.evidence.location_markers.len(), 6);
        assert_eq!(cfg.llm.search_model, "gpt-4o-mini-search-preview");
    }

    #[test]
    fn test_partial_file_keeps_defaults() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(
            file,
            "[simulation]\nenforce_phase_order = false\nmax_steps = 8\n\n[evidence]\nmin_score = 4.0\n\n[prompts]\ndir = \"/tmp/prompts\""
        )
        .unwrap();
        let cfg = load_config(Some(file.path().to_path_buf())).unwrap();
        assert!(!cfg.simulation.enforce_phase_order);
        assert_eq!(cfg.simulation.max_steps, 8);
        assert_eq!(cfg.simulation.timeout_secs, 120);
        assert_eq!(cfg.evidence.min_score, 4.0);
        assert_eq!(cfg.evidence.max_steps, 15);
        assert_eq!(cfg.prompts.dir, Some(PathBuf::from("/tmp/prompts")));
    }
}
