//! 品牌流水线：品牌分析 -> 5 个主题 + 5 个 ICP -> 每个 (主题, ICP) 组合三条分阶段查询
//!
//! 不走步骤循环，按固定顺序串行调用模型；任一步失败即整体失败。

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::core::RunError;
use crate::llm::{generate_structured, LlmError, ModelClient, ObjectRequest, TextRequest};
use crate::pipelines::PipelineContext;

const TOPIC_COUNT: usize = 5;
const ICP_COUNT: usize = 5;
const PROGRESS_EVERY: usize = 5;

const TOPIC_GENERATOR_SYSTEM: &str = "ROLE: customer_journey_topic_generator\n\n\
Given a brand analysis, identify five topics that represent real search-intent themes that would lead a user \
to discover and choose the brand, following the progression problem -> category -> brand.\n\
Output exactly 5 topics of 2-4 words each covering product-use intents, category-level searches, \
style or identity-driven motives and practical needs.\n\
Do not use brand slogans, invented product lines or vague cultural abstractions.";

const ICP_GENERATOR_SYSTEM: &str = "ROLE: icp_generator\n\n\
Given a brand analysis, generate five Ideal Customer Profiles based on the brand's products, messaging, tone and positioning.\n\
Output exactly 5 ICPs of 1-2 polished sentences each describing needs, motivations, usage context and behavioral drivers.\n\
Focus on psychographics and behaviors, not generic demographic labels.";

const QUERY_GENERATOR_SYSTEM: &str = "ROLE: journey_stage_query_generator\n\n\
Given an ICP and a Topic, generate three queries a real user would search:\n\
DISCOVERY: informational, open-ended, not brand-specific, framed around the ICP's need.\n\
CONSIDERATION: comparative and category-level, reflecting ICP-specific needs.\n\
ACTIVATION: action-oriented and shopping-focused; may include the brand if natural.\n\
Each query must be realistic, natural and searchable.";

/// 品牌分析文本与其引用来源
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BrandAnalysis {
    pub analysis: String,
    pub sources: Vec<AnalysisSource>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnalysisSource {
    #[serde(rename = "type")]
    pub kind: String,
    pub url: String,
}

#[derive(Debug, Deserialize, JsonSchema)]
struct TopicList {
    #[schemars(description = "Exactly 5 search-intent topics, each 2-4 words")]
    topics: Vec<String>,
}

#[derive(Debug, Deserialize, JsonSchema)]
struct IcpList {
    #[schemars(description = "Exactly 5 Ideal Customer Profiles, each 1-2 sentences")]
    icps: Vec<String>,
}

/// 每个旅程阶段一条查询
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct JourneyQueries {
    #[schemars(description = "Informational, problem-aware query for early-stage exploration")]
    pub discovery: String,
    #[schemars(description = "Comparative, category-level query for mid-stage evaluation")]
    pub consideration: String,
    #[schemars(description = "Action-oriented, purchase-ready query for high-intent conversion")]
    pub activation: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Pairing {
    pub topic: String,
    pub icp: String,
    pub queries: JourneyQueries,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BrandPipelineResult {
    pub url: String,
    pub topics: Vec<String>,
    pub icps: Vec<String>,
    pub pairings: Vec<Pairing>,
}

/// 调用方提供的系统提示词，优先于提示词目录与内置默认
#[derive(Debug, Clone, Default)]
pub struct BrandPrompts {
    pub topics: Option<String>,
    pub icps: Option<String>,
    pub queries: Option<String>,
}

pub async fn analyze_brand(model: &dyn ModelClient, url: &str, model_name: Option<&str>) -> Result<BrandAnalysis, LlmError> {
    let response = model
        .generate_text(
            TextRequest::prompt(format!(
                "Analyze this brand's website and provide a comprehensive overview of their products, messaging, \
                 target audience, brand positioning, and key value propositions: {url}"
            ))
            .with_model(model_name)
            .with_web_search(),
        )
        .await?;

    Ok(BrandAnalysis {
        analysis: response.text,
        sources: response
            .sources
            .into_iter()
            .map(|s| AnalysisSource {
                kind: "url".to_string(),
                url: s.url,
            })
            .collect(),
    })
}

fn exactly(items: Vec<String>, expected: usize, what: &str) -> Result<Vec<String>, LlmError> {
    if items.len() != expected {
        return Err(LlmError::Schema(format!(
            "expected exactly {expected} {what}, got {}",
            items.len()
        )));
    }
    Ok(items)
}

pub async fn generate_topics(
    model: &dyn ModelClient,
    analysis: &str,
    system: &str,
    model_name: Option<&str>,
) -> Result<Vec<String>, LlmError> {
    let list: TopicList = generate_structured(
        model,
        ObjectRequest::new(format!(
            "Based on this brand analysis, generate {TOPIC_COUNT} search-intent topics:\n\n{analysis}"
        ))
        .with_system(system)
        .with_model(model_name),
    )
    .await?;
    exactly(list.topics, TOPIC_COUNT, "topics")
}

pub async fn generate_icps(
    model: &dyn ModelClient,
    analysis: &str,
    system: &str,
    model_name: Option<&str>,
) -> Result<Vec<String>, LlmError> {
    let list: IcpList = generate_structured(
        model,
        ObjectRequest::new(format!(
            "Based on this brand analysis, generate {ICP_COUNT} Ideal Customer Profiles:\n\n{analysis}"
        ))
        .with_system(system)
        .with_model(model_name),
    )
    .await?;
    exactly(list.icps, ICP_COUNT, "ICPs")
}

pub async fn generate_queries(
    model: &dyn ModelClient,
    icp: &str,
    topic: &str,
    system: &str,
    model_name: Option<&str>,
) -> Result<JourneyQueries, LlmError> {
    generate_structured(
        model,
        ObjectRequest::new(format!(
            "ICP: {icp}\nTopic: {topic}\n\nGenerate one query for each journey stage (Discovery, Consideration, Activation)."
        ))
        .with_system(system)
        .with_model(model_name),
    )
    .await
}

/// 串行跑完整条品牌流水线；每次模型调用前检查取消
pub async fn run_brand_pipeline(
    ctx: &PipelineContext<'_>,
    url: &str,
    prompts: BrandPrompts,
) -> Result<BrandPipelineResult, RunError> {
    if url.trim().is_empty() {
        return Err(RunError::InvalidRequest("URL is required".into()));
    }
    let analysis_model = Some(ctx.config.llm.analysis_model.as_str());
    let topic_system = prompts
        .topics
        .unwrap_or_else(|| ctx.prompts.render("topic_generator", TOPIC_GENERATOR_SYSTEM, &[]));
    let icp_system = prompts
        .icps
        .unwrap_or_else(|| ctx.prompts.render("icp_generator", ICP_GENERATOR_SYSTEM, &[]));
    let query_system = prompts
        .queries
        .unwrap_or_else(|| ctx.prompts.render("query_generator", QUERY_GENERATOR_SYSTEM, &[]));
    let ensure_live = || {
        if ctx.cancel_token.is_cancelled() {
            Err(RunError::Cancelled)
        } else {
            Ok(())
        }
    };

    ensure_live()?;
    tracing::info!(url = %url, "[1/4] analyzing brand");
    let brand = analyze_brand(ctx.model, url, None).await?;
    tracing::info!(sources = brand.sources.len(), "brand analyzed");

    ensure_live()?;
    tracing::info!("[2/4] generating topics");
    let topics = generate_topics(ctx.model, &brand.analysis, &topic_system, analysis_model).await?;

    ensure_live()?;
    tracing::info!("[3/4] generating ICPs");
    let icps = generate_icps(ctx.model, &brand.analysis, &icp_system, analysis_model).await?;

    let total = topics.len() * icps.len();
    tracing::info!(total, "[4/4] generating queries for pairings");
    let mut pairings = Vec::with_capacity(total);
    for topic in &topics {
        for icp in &icps {
            ensure_live()?;
            let queries = generate_queries(ctx.model, icp, topic, &query_system, analysis_model).await?;
            pairings.push(Pairing {
                topic: topic.clone(),
                icp: icp.clone(),
                queries,
            });
            if pairings.len() % PROGRESS_EVERY == 0 {
                tracing::info!(completed = pairings.len(), total, "pairings progress");
            }
        }
    }

    Ok(BrandPipelineResult {
        url: url.to_string(),
        topics,
        icps,
        pairings,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AppConfig;
    use crate::llm::{ScriptedModelClient, Source, TextResponse};
    use serde_json::json;
    use tokio_util::sync::CancellationToken;

    fn five(prefix: &str) -> Vec<String> {
        (1..=5).map(|i| format!("{prefix} {i}")).collect()
    }

    fn queries(n: usize) -> serde_json::Value {
        json!({
            "discovery": format!("how to start {n}"),
            "consideration": format!("best options {n}"),
            "activation": format!("buy now {n}")
        })
    }

    #[tokio::test]
    async fn test_analyze_brand_keeps_sources() {
        let model = ScriptedModelClient::new().with_text(TextResponse {
            text: "Vans makes skate shoes".into(),
            tool_calls: vec![],
            sources: vec![Source {
                url: "https://vans.com".into(),
                title: "Vans".into(),
            }],
        });
        let brand = analyze_brand(&model, "https://vans.com", None).await.unwrap();
        assert_eq!(brand.analysis, "Vans makes skate shoes");
        assert_eq!(brand.sources[0].url, "https://vans.com");
        assert_eq!(serde_json::to_value(&brand.sources[0]).unwrap()["type"], "url");
    }

    #[tokio::test]
    async fn test_wrong_topic_count_is_schema_error() {
        let model = ScriptedModelClient::new().with_object(json!({"topics": ["a", "b"]}));
        let err = generate_topics(&model, "analysis", TOPIC_GENERATOR_SYSTEM, None)
            .await
            .unwrap_err();
        assert!(matches!(err, LlmError::Schema(_)));
    }

    #[tokio::test]
    async fn test_pipeline_pairs_every_topic_with_every_icp() {
        let mut model = ScriptedModelClient::new()
            .with_text(TextResponse::text("analysis"))
            .with_object(json!({"topics": five("topic")}))
            .with_object(json!({"icps": five("icp")}));
        for n in 0..25 {
            model = model.with_object(queries(n));
        }
        let config = AppConfig::default();
        let ctx = PipelineContext::new(&model, &config, CancellationToken::new());

        let result = run_brand_pipeline(&ctx, "https://vans.com", BrandPrompts::default())
            .await
            .unwrap();
        assert_eq!(result.pairings.len(), 25);
        assert_eq!(result.pairings[0].topic, "topic 1");
        assert_eq!(result.pairings[0].icp, "icp 1");
        assert_eq!(result.pairings[6].topic, "topic 2");
        assert_eq!(result.pairings[6].icp, "icp 2");
        assert_eq!(result.pairings[24].queries.activation, "buy now 24");
    }

    #[tokio::test]
    async fn test_cancelled_pipeline_stops() {
        let model = ScriptedModelClient::new();
        let config = AppConfig::default();
        let token = CancellationToken::new();
        token.cancel();
        let ctx = PipelineContext::new(&model, &config, token);
        let err = run_brand_pipeline(&ctx, "https://vans.com", BrandPrompts::default())
            .await
            .unwrap_err();
        assert!(matches!(err, RunError::Cancelled));
    }

    #[tokio::test]
    async fn test_blank_url_rejected() {
        let model = ScriptedModelClient::new();
        let config = AppConfig::default();
        let ctx = PipelineContext::new(&model, &config, CancellationToken::new());
        let err = run_brand_pipeline(&ctx, " ", BrandPrompts::default()).await.unwrap_err();
        assert!(matches!(err, RunError::InvalidRequest(_)));
    }
}
