//! 基于证据的 ICP（v2）
//!
//! expandUrls -> deepResearch -> extractArticleContext* -> classifyNiche -> findComparableCreators
//! -> generateEvidenceBasedICPs -> validateICPs。每个分群必须引用证据，validateICPs 用确定性校验器
//! 拆分 accepted / rejected；validateICPs 触发即停止。quick 深度不提供 findComparableCreators。

use std::fmt;
use std::str::FromStr;

use async_trait::async_trait;
use schemars::JsonSchema;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::config::EvidenceSection;
use crate::core::RunError;
use crate::evidence::{validate, EvidenceSegment, ExcludedSegment, ValidationConstraints};
use crate::llm::{generate_structured, LlmError, ModelClient, ObjectRequest, TextRequest, ToolDefinition};
use crate::memory::{Message, ResearchState};
use crate::pipelines::social_icp::resolve_profile;
use crate::pipelines::{ModelRoles, PipelineContext, RunReport};
use crate::social::{
    detect_platform, filter_article_urls, ArticleContext, AudienceConstraints, ComparableCreatorList,
    EnhancedProfile, EvidenceSegmentList, NicheClassification, SocialPlatform, UrlExpansion,
};
use crate::steps::{run_steps, StopCondition};
use crate::tools::{
    parse_input, resolve_tool, tool_definition, ToolError, ToolInput, ToolInputError, Toolset,
};

pub const EXPAND_URLS: &str = "expandUrls";
pub const DEEP_RESEARCH: &str = "deepResearch";
pub const EXTRACT_ARTICLE_CONTEXT: &str = "extractArticleContext";
pub const CLASSIFY_NICHE: &str = "classifyNiche";
pub const FIND_COMPARABLE_CREATORS: &str = "findComparableCreators";
pub const GENERATE_EVIDENCE_ICPS: &str = "generateEvidenceBasedICPs";
pub const VALIDATE_ICPS: &str = "validateICPs";

const MIN_SEGMENTS: usize = 2;
const MAX_SEGMENTS: usize = 6;
/// deepResearch 每次最多额外研究的 URL 数
const MAX_ADDITIONAL_URLS: usize = 3;

const EVIDENCE_SYSTEM: &str = "You are an evidence-based audience intelligence expert. Every ICP segment MUST cite specific evidence. No speculation.\n\n\
Analyze @{handle} on {platform} ({profile_url}).\n\
{hints}\
RESEARCH DEPTH: {research_depth}\n\n\
Execute these steps in order; after each tool result immediately call the next tool:\n\
{flow}\n\
Evidence types: hashtag, content, collaboration, comment, bio, comparable_creator, article.\n\
Scores: 5 direct creator quote or article quote, 4 strong engagement pattern, 3 content themes or hashtags, \
2 comparable creators only, 1 niche norms, 0 none.\n\
Reject segments scoring below 3, segments in the unlikely list, and segments naming locations the creator has no connection to. \
Article evidence outranks inference from hashtags or content.";

const EVIDENCE_KICKOFF: &str = "Generate evidence-based ICPs for @{handle} ({profile_url}).\n{article_urls}";

const URL_INVESTIGATOR_SYSTEM: &str = "You are a social media investigator. Find every URL related to this creator: \
other social platforms, website or Linktree, press coverage and interviews, podcast appearances, \
frequent collaborators and similar creators. Prefer articles discussing the creator's audience. Extract actual URLs.";

const PROFILE_RESEARCH_SYSTEM: &str = "You are a social media researcher extracting evidence. Report the exact bio, follower count, \
content themes with examples, every frequently used hashtag, collaborators, brand mentions, \
geography signals (locations, language, time zones) and content style. Quote actual content when possible.";

const ARTICLE_EXTRACTOR_SYSTEM: &str = "You are an article content extractor. Summarize the key content of this article; \
if it is paywalled, search for summaries, quotes or related coverage. Focus on audience demographics, community, \
brand partnerships, creator quotes about their audience and niche positioning.";

const COMPARABLE_SYSTEM: &str = "You are a social media analyst. Find creators in the same niche and sub-niche, \
within 2-3x of the follower count, whose audiences are documented in interviews, press or analytics tools.";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum ResearchDepth {
    Quick,
    #[default]
    Standard,
    Deep,
}

impl ResearchDepth {
    pub fn as_str(&self) -> &'static str {
        match self {
            ResearchDepth::Quick => "quick",
            ResearchDepth::Standard => "standard",
            ResearchDepth::Deep => "deep",
        }
    }

    /// 本深度下提供给模型的工具
    pub fn offered_tools(&self) -> Vec<EvidenceTool> {
        EvidenceTool::ALL
            .into_iter()
            .filter(|t| *self != ResearchDepth::Quick || *t != EvidenceTool::FindComparableCreators)
            .collect()
    }

    fn guidance(&self) -> &'static str {
        match self {
            ResearchDepth::Quick => "Skip comparative analysis, focus on direct profile data.",
            ResearchDepth::Standard => "Include comparative analysis with similar creators.",
            ResearchDepth::Deep => "Full URL expansion, multiple platforms, comprehensive comparative analysis.",
        }
    }
}

impl fmt::Display for ResearchDepth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ResearchDepth {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "quick" => Ok(ResearchDepth::Quick),
            "standard" => Ok(ResearchDepth::Standard),
            "deep" => Ok(ResearchDepth::Deep),
            other => Err(format!("unknown research depth: {other} (quick|standard|deep)")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EvidenceTool {
    ExpandUrls,
    DeepResearch,
    ExtractArticleContext,
    ClassifyNiche,
    FindComparableCreators,
    GenerateIcps,
    ValidateIcps,
}

impl EvidenceTool {
    pub const ALL: [EvidenceTool; 7] = [
        EvidenceTool::ExpandUrls,
        EvidenceTool::DeepResearch,
        EvidenceTool::ExtractArticleContext,
        EvidenceTool::ClassifyNiche,
        EvidenceTool::FindComparableCreators,
        EvidenceTool::GenerateIcps,
        EvidenceTool::ValidateIcps,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            EvidenceTool::ExpandUrls => EXPAND_URLS,
            EvidenceTool::DeepResearch => DEEP_RESEARCH,
            EvidenceTool::ExtractArticleContext => EXTRACT_ARTICLE_CONTEXT,
            EvidenceTool::ClassifyNiche => CLASSIFY_NICHE,
            EvidenceTool::FindComparableCreators => FIND_COMPARABLE_CREATORS,
            EvidenceTool::GenerateIcps => GENERATE_EVIDENCE_ICPS,
            EvidenceTool::ValidateIcps => VALIDATE_ICPS,
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|t| t.name() == name)
    }
}

/// 模型常把嵌套对象编码成 JSON 字符串传入，两种形式都接受
#[derive(Debug, Clone, Deserialize, JsonSchema)]
#[serde(untagged)]
pub enum Embedded<T> {
    Value(T),
    Encoded(String),
}

impl<T: DeserializeOwned> Embedded<T> {
    pub fn decode(self) -> Result<T, String> {
        match self {
            Embedded::Value(v) => Ok(v),
            Embedded::Encoded(s) => serde_json::from_str(&s).map_err(|e| e.to_string()),
        }
    }
}

#[derive(Debug, Clone, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ExpandUrlsInput {
    #[schemars(description = "The primary handle to research")]
    pub primary_handle: String,
    #[schemars(description = "The platform of the primary handle")]
    pub primary_platform: String,
    #[schemars(description = "Known creator name to help with cross-platform search")]
    pub creator_name: Option<String>,
}

impl ToolInput for ExpandUrlsInput {
    fn validate(&self) -> Result<(), String> {
        if self.primary_handle.trim().is_empty() {
            return Err("primaryHandle must not be empty".into());
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct DeepResearchInput {
    #[schemars(description = "The handle to research")]
    pub handle: String,
    #[schemars(description = "The platform")]
    pub platform: String,
    #[serde(default)]
    #[schemars(description = "Additional URLs to research")]
    pub additional_urls: Vec<String>,
}

impl ToolInput for DeepResearchInput {}

#[derive(Debug, Clone, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ExtractArticleInput {
    #[schemars(description = "The URL of the article to extract insights from")]
    pub article_url: String,
    #[schemars(description = "The creator's name")]
    pub creator_name: Option<String>,
    #[schemars(description = "The creator's social handle")]
    pub creator_handle: Option<String>,
}

impl ToolInput for ExtractArticleInput {
    fn validate(&self) -> Result<(), String> {
        if self.article_url.trim().is_empty() {
            return Err("articleUrl must not be empty".into());
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ClassifyNicheInput {
    #[schemars(description = "Summary of profile data to classify")]
    pub profile_summary: String,
    #[serde(default)]
    #[schemars(description = "Main content themes")]
    pub content_themes: Vec<String>,
    #[serde(default)]
    #[schemars(description = "Hashtags used")]
    pub hashtags: Vec<String>,
}

impl ToolInput for ClassifyNicheInput {}

#[derive(Debug, Clone, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct FindComparableInput {
    #[schemars(description = "The creator's niche")]
    pub niche: String,
    #[schemars(description = "The creator's sub-niche")]
    pub sub_niche: String,
    #[schemars(description = "Approximate follower count")]
    pub follower_count: String,
    #[serde(default)]
    #[schemars(description = "Similar creators already found")]
    pub similar_creators_from_expansion: Vec<String>,
}

impl ToolInput for FindComparableInput {}

#[derive(Debug, Clone, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct GenerateEvidenceIcpsInput {
    #[schemars(description = "Full profile context")]
    pub profile_context: String,
    #[schemars(description = "Niche classification context")]
    pub niche_context: String,
    #[serde(default)]
    #[schemars(description = "Audience templates from comparable creators")]
    pub comparable_audiences: Vec<String>,
    #[serde(default)]
    #[schemars(description = "Segments to AVOID generating")]
    pub unlikely_segments: Vec<String>,
    #[schemars(description = "JSON string of insights extracted from articles/interviews")]
    pub article_insights: Option<String>,
}

impl ToolInput for GenerateEvidenceIcpsInput {}

/// 只取 audienceConstraints，其余字段忽略
#[derive(Debug, Clone, Default, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct NicheConstraintsInput {
    #[serde(default)]
    pub audience_constraints: AudienceConstraints,
}

#[derive(Debug, Clone, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ValidateIcpsInput {
    #[schemars(description = "ICP segments to validate; defaults to the generated segments")]
    pub icp_segments: Option<Embedded<Vec<EvidenceSegment>>>,
    #[schemars(description = "Niche classification with audienceConstraints; defaults to the classified niche")]
    pub niche_constraints: Option<Embedded<NicheConstraintsInput>>,
    #[schemars(description = "Segments that should not exist")]
    pub unlikely_segments: Option<Vec<String>>,
}

impl ToolInput for ValidateIcpsInput {}

/// validateICPs 解码后的调用；None 表示回落到累积状态
#[derive(Debug, Clone)]
pub struct ValidateCall {
    pub segments: Option<Vec<EvidenceSegment>>,
    pub constraints: Option<AudienceConstraints>,
    pub unlikely_segments: Option<Vec<String>>,
}

impl ValidateCall {
    fn decode(input: ValidateIcpsInput) -> Result<Self, ToolInputError> {
        let invalid = |message: String| ToolInputError::InvalidArguments {
            tool: VALIDATE_ICPS.to_string(),
            message,
        };
        Ok(Self {
            segments: input.icp_segments.map(Embedded::decode).transpose().map_err(invalid)?,
            constraints: input
                .niche_constraints
                .map(|c| c.decode().map(|n| n.audience_constraints))
                .transpose()
                .map_err(invalid)?,
            unlikely_segments: input.unlikely_segments,
        })
    }
}

#[derive(Debug)]
pub enum EvidenceCall {
    ExpandUrls(ExpandUrlsInput),
    DeepResearch(DeepResearchInput),
    ExtractArticleContext(ExtractArticleInput),
    ClassifyNiche(ClassifyNicheInput),
    FindComparableCreators(FindComparableInput),
    GenerateIcps(GenerateEvidenceIcpsInput),
    ValidateIcps(ValidateCall),
}

pub struct EvidenceIcpTools<'a> {
    model: &'a dyn ModelClient,
    roles: ModelRoles,
    settings: EvidenceSection,
    primary_url: String,
    provided_articles: usize,
    offered: Vec<EvidenceTool>,
    pub state: ResearchState,
}

impl<'a> EvidenceIcpTools<'a> {
    pub fn new(
        model: &'a dyn ModelClient,
        roles: ModelRoles,
        settings: EvidenceSection,
        primary_url: impl Into<String>,
        provided_articles: usize,
        depth: ResearchDepth,
    ) -> Self {
        Self {
            model,
            roles,
            settings,
            primary_url: primary_url.into(),
            provided_articles,
            offered: depth.offered_tools(),
            state: ResearchState::default(),
        }
    }

    async fn web_search(&mut self, system: Option<&str>, prompt: String) -> Result<String, LlmError> {
        let mut request = TextRequest::prompt(prompt).with_web_search();
        if let Some(system) = system {
            request = request.with_system(system);
        }
        let response = self.model.generate_text(request).await?;
        self.state.sources_analyzed += 1;
        Ok(response.text)
    }

    async fn expand_urls(&mut self, input: &ExpandUrlsInput) -> Result<Value, ToolError> {
        tracing::info!(handle = %input.primary_handle, platform = %input.primary_platform, "expandUrls");
        let who = input.creator_name.as_deref().unwrap_or(&input.primary_handle);
        let search_query = match &input.creator_name {
            Some(name) => format!("\"{name}\" OR \"@{}\" social media profiles", input.primary_handle),
            None => format!(
                "\"@{}\" {} creator social media profiles",
                input.primary_handle, input.primary_platform
            ),
        };
        let research = self
            .web_search(
                Some(URL_INVESTIGATOR_SYSTEM),
                format!(
                    "Find all related URLs and profiles for @{} on {}.\nSearch for: {search_query}; \"{who} interview\"; \"{who} profile article\"",
                    input.primary_handle, input.primary_platform
                ),
            )
            .await?;

        let expansion: UrlExpansion = generate_structured(
            self.model,
            ObjectRequest::new(format!(
                "Extract URL expansion data from this research:\n\n{research}\n\n\
                 Primary URL: {}\nPrimary Handle: @{}\nPrimary Platform: {}\n\n\
                 Put article and interview URLs in interviews and podcast episodes in podcastAppearances. \
                 Note the source of each social URL, the relationship of each collaborator and why each similar creator is similar.",
                self.primary_url, input.primary_handle, input.primary_platform
            ))
            .with_model(self.roles.extraction.as_deref()),
        )
        .await?;

        let found = expansion.article_candidates();
        self.state
            .fill_discovered_articles(found.clone(), self.provided_articles, self.settings.max_article_urls);
        if !self.state.discovered_article_urls.is_empty() {
            tracing::info!(count = self.state.discovered_article_urls.len(), "auto-discovered articles for extraction");
        }

        let discovered = &expansion.discovered_urls;
        let mut output = serde_json::to_value(&expansion).map_err(|e| ToolError::Failed(e.to_string()))?;
        output["message"] = json!(format!(
            "Found {} other platforms, {} collaborators, {} similar creators",
            discovered.other_platforms.len(),
            discovered.collaborators.len(),
            discovered.similar_creators.len()
        ));
        output["articlesDiscovered"] = json!(found.len());
        output["articlesToProcess"] = json!(self.state.discovered_article_urls);
        self.state.url_expansion = Some(expansion);
        Ok(output)
    }

    async fn deep_research(&mut self, input: &DeepResearchInput) -> Result<Value, ToolError> {
        tracing::info!(handle = %input.handle, platform = %input.platform, "deepResearch");
        let profile_text = self
            .web_search(
                Some(PROFILE_RESEARCH_SYSTEM),
                format!("Research @{} on {}. Extract detailed profile data with evidence.", input.handle, input.platform),
            )
            .await?;

        let mut additional = String::new();
        for url in input.additional_urls.iter().take(MAX_ADDITIONAL_URLS) {
            match self
                .web_search(None, format!("Research this URL for additional information about the creator: {url}"))
                .await
            {
                Ok(text) => additional.push_str(&format!("\n\nFrom {url}:\n{text}")),
                Err(e) => tracing::warn!(url = %url, error = %e, "additional url research failed"),
            }
        }

        let additional_section = if additional.is_empty() {
            String::new()
        } else {
            format!("ADDITIONAL SOURCES:{additional}")
        };
        let profile: EnhancedProfile = generate_structured(
            self.model,
            ObjectRequest::new(format!(
                "Extract enhanced profile data with evidence from this research:\n\nPRIMARY PROFILE:\n{profile_text}\n\n{additional_section}\n\n\
                 List every hashtag with frequency (high/medium/low) and category (niche/location/trending/community), \
                 every collaborator with relationship type and every geography signal."
            ))
            .with_model(self.roles.extraction.as_deref()),
        )
        .await?;

        let mut output = serde_json::to_value(&profile).map_err(|e| ToolError::Failed(e.to_string()))?;
        output["evidenceSummary"] = json!({
            "hashtagCount": profile.hashtags.len(),
            "collaboratorCount": profile.collaborators.len(),
            "geographySignalCount": profile.geography_signals.len(),
            "hasStrongLocationData": !profile.geography_signals.is_empty(),
        });
        self.state.profile = Some(profile);
        Ok(output)
    }

    async fn extract_article(&mut self, input: &ExtractArticleInput) -> Result<Value, ToolError> {
        tracing::info!(url = %input.article_url, "extractArticleContext");
        let mut prompt = format!("Extract content from this article: {}", input.article_url);
        if let Some(name) = &input.creator_name {
            prompt.push_str(&format!("\nCreator name: {name}"));
        }
        if let Some(handle) = &input.creator_handle {
            prompt.push_str(&format!("\nCreator handle: @{handle}"));
        }
        let content = self.web_search(Some(ARTICLE_EXTRACTOR_SYSTEM), prompt).await?;

        let subject = input
            .creator_name
            .as_deref()
            .or(input.creator_handle.as_deref())
            .unwrap_or("a content creator");
        let article: ArticleContext = generate_structured(
            self.model,
            ObjectRequest::new(format!(
                "Extract audience insights from this article about {subject}.\n\nARTICLE URL: {}\nARTICLE CONTENT:\n{content}\n\n\
                 Capture demographics, psychographics and behaviors with confidence (high for direct quotes, medium implied, low inferred), \
                 brand mentions, exact creator quotes about their audience, niche signals and geography signals. \
                 Quality score 5 for multiple direct audience quotes down to 1 for no audience insight. \
                 Source type: interview, press, blog, podcast, research or other.",
                input.article_url
            ))
            .with_model(self.roles.analysis.as_deref()),
        )
        .await?;

        let insights = &article.extracted_insights;
        let highlights: Vec<&str> = insights
            .creator_quotes
            .iter()
            .take(2)
            .map(String::as_str)
            .chain(insights.demographics.iter().take(2).map(|d| d.insight.as_str()))
            .take(3)
            .collect();
        let mut output = serde_json::to_value(&article).map_err(|e| ToolError::Failed(e.to_string()))?;
        output["insightCount"] = json!(article.insight_count());
        output["highlights"] = json!(highlights);
        output["message"] = json!(format!(
            "Extracted {} demographics, {} psychographics, {} creator quotes (quality: {}/5)",
            insights.demographics.len(),
            insights.psychographics.len(),
            insights.creator_quotes.len(),
            article.quality_score
        ));
        self.state.article_contexts.push(article);
        Ok(output)
    }

    async fn classify_niche(&mut self, input: &ClassifyNicheInput) -> Result<Value, ToolError> {
        tracing::info!(themes = input.content_themes.len(), hashtags = input.hashtags.len(), "classifyNiche");
        let niche: NicheClassification = generate_structured(
            self.model,
            ObjectRequest::new(format!(
                "Classify this creator's niche and determine audience constraints.\n\nPROFILE DATA:\n{}\n\n\
                 CONTENT THEMES: {}\nHASHTAGS: {}\n\n\
                 You MUST list audiences that do NOT fit this niche in unlikelySegments, including audiences \
                 from locations the creator has no connection to.",
                input.profile_summary,
                input.content_themes.join(", "),
                input.hashtags.join(", ")
            ))
            .with_model(self.roles.analysis.as_deref()),
        )
        .await?;

        let mut output = serde_json::to_value(&niche).map_err(|e| ToolError::Failed(e.to_string()))?;
        output["message"] = json!(format!(
            "Classified as {} > {}. Identified {} unlikely segments.",
            niche.primary_niche.industry,
            niche.primary_niche.sub_niche,
            niche.audience_constraints.unlikely_segments.len()
        ));
        self.state.niche = Some(niche);
        Ok(output)
    }

    async fn find_comparable(&mut self, input: &FindComparableInput) -> Result<Value, ToolError> {
        tracing::info!(niche = %input.niche, sub_niche = %input.sub_niche, "findComparableCreators");
        let known = if input.similar_creators_from_expansion.is_empty() {
            String::new()
        } else {
            format!(
                "\nAlready identified similar creators: {}",
                input.similar_creators_from_expansion.join(", ")
            )
        };
        let research = self
            .web_search(
                Some(COMPARABLE_SYSTEM),
                format!(
                    "Find 3-5 creators similar to a {}/{} creator with {} followers.{known}\n\
                     For each, find any available information about their audience demographics.",
                    input.niche, input.sub_niche, input.follower_count
                ),
            )
            .await?;

        let list: ComparableCreatorList = generate_structured(
            self.model,
            ObjectRequest::new(format!(
                "Extract comparable creator data from this research:\n\n{research}\n\n\
                 For each creator give name, handle, why they are similar, their KNOWN audiences and the evidence source. \
                 Only include audiences backed by evidence."
            ))
            .with_model(self.roles.extraction.as_deref()),
        )
        .await?;

        let templates: Vec<&str> = list
            .comparable_creators
            .iter()
            .flat_map(|c| c.known_audiences.iter().map(String::as_str))
            .collect();
        let output = json!({
            "creators": list.comparable_creators,
            "message": format!("Found {} comparable creators with audience data", list.comparable_creators.len()),
            "audienceTemplates": templates,
        });
        self.state.comparable_creators = list.comparable_creators;
        Ok(output)
    }

    /// 调用方传入的文章证据优先；解析失败时忽略，未传入时用累积的文章
    fn article_section(&self, provided: Option<&str>) -> String {
        let parsed: Option<Vec<ArticleContext>> = provided.and_then(|raw| {
            serde_json::from_str(raw)
                .map_err(|e| tracing::warn!(error = %e, "failed to parse article insights"))
                .ok()
        });
        let articles: &[ArticleContext] = match (&parsed, provided) {
            (Some(list), _) => list,
            (None, None) => &self.state.article_contexts,
            (None, Some(_)) => &[],
        };
        if articles.is_empty() {
            return String::new();
        }
        let blocks: Vec<String> = articles
            .iter()
            .enumerate()
            .map(|(idx, a)| a.evidence_block(idx))
            .collect();
        format!(
            "HIGH-VALUE ARTICLE EVIDENCE (prioritize this):\n{}",
            blocks.join("\n")
        )
    }

    async fn generate_icps(&mut self, input: &GenerateEvidenceIcpsInput) -> Result<Value, ToolError> {
        tracing::info!(unlikely = input.unlikely_segments.len(), "generateEvidenceBasedICPs");
        let article_section = self.article_section(input.article_insights.as_deref());
        let templates = if input.comparable_audiences.is_empty() {
            String::new()
        } else {
            format!(
                "AUDIENCE TEMPLATES FROM SIMILAR CREATORS (use as starting points):\n{}\n",
                input.comparable_audiences.join("\n")
            )
        };

        let list: EvidenceSegmentList = generate_structured(
            self.model,
            ObjectRequest::new(format!(
                "Generate evidence-based ICP segments for this creator.\n\nPROFILE CONTEXT:\n{}\n\nNICHE CLASSIFICATION:\n{}\n\n{article_section}\n\n{templates}\n\
                 FORBIDDEN SEGMENTS (DO NOT GENERATE THESE):\n{}\n\n\
                 Every segment MUST include evidence: primarySources (type, detail, source), confidenceLevel, confidenceReason and score 0-5. \
                 Article quotes score 5 and cite the article URL as source. Do not generate segments scoring below 3, \
                 forbidden segments or locations the creator has no connection to. Segment sizes should roughly total 100%.",
                input.profile_context,
                input.niche_context,
                input.unlikely_segments.join("\n")
            ))
            .with_model(self.roles.analysis.as_deref()),
        )
        .await?;

        let count = list.icp_segments.len();
        if !(MIN_SEGMENTS..=MAX_SEGMENTS).contains(&count) {
            return Err(LlmError::Schema(format!(
                "expected {MIN_SEGMENTS}-{MAX_SEGMENTS} segments, got {count}"
            ))
            .into());
        }

        let average =
            list.icp_segments.iter().map(|s| s.score().unwrap_or(0.0)).sum::<f64>() / count as f64;
        let output = json!({
            "icpSegments": list.icp_segments,
            "segmentCount": count,
            "averageConfidenceScore": average,
            "articleEvidenceUsed": !self.state.article_contexts.is_empty() || input.article_insights.is_some(),
        });
        self.state.generated_segments = list.icp_segments;
        Ok(output)
    }

    fn validate_icps(&mut self, call: &ValidateCall) -> Value {
        let segments = call
            .segments
            .clone()
            .unwrap_or_else(|| self.state.generated_segments.clone());
        let audience = call
            .constraints
            .clone()
            .or_else(|| self.state.niche.as_ref().map(|n| n.audience_constraints.clone()))
            .unwrap_or_default();
        let mut constraints = ValidationConstraints::from_audience(&audience)
            .with_location_markers(self.settings.location_markers.clone())
            .with_min_score(self.settings.min_score);
        if let Some(unlikely) = &call.unlikely_segments {
            constraints.unlikely_segments = unlikely.clone();
        }

        let outcome = validate(&segments, &constraints);
        tracing::info!(
            candidates = segments.len(),
            accepted = outcome.accepted.len(),
            rejected = outcome.rejected.len(),
            "validateICPs"
        );

        let output = json!({
            "validSegments": outcome.accepted,
            "validCount": outcome.accepted.len(),
            "excludedSegments": outcome.rejected,
            "excludedCount": outcome.rejected.len(),
            "message": format!(
                "Validated {} segments, rejected {} for insufficient evidence or constraint violations",
                outcome.accepted.len(),
                outcome.rejected.len()
            ),
        });
        self.state.validated_segments = outcome.accepted;
        self.state.excluded_segments = outcome.rejected;
        output
    }
}

#[async_trait]
impl<'a> Toolset for EvidenceIcpTools<'a> {
    type Call = EvidenceCall;

    fn definitions(&self) -> Vec<ToolDefinition> {
        self.offered
            .iter()
            .map(|tool| match tool {
                EvidenceTool::ExpandUrls => tool_definition::<ExpandUrlsInput>(
                    EXPAND_URLS,
                    "Discover all related URLs: other platforms, website, collaborators, similar creators, and articles or interviews about the creator.",
                ),
                EvidenceTool::DeepResearch => tool_definition::<DeepResearchInput>(
                    DEEP_RESEARCH,
                    "Research the profile with evidence extraction: hashtags, collaborators, geography signals.",
                ),
                EvidenceTool::ExtractArticleContext => tool_definition::<ExtractArticleInput>(
                    EXTRACT_ARTICLE_CONTEXT,
                    "Extract audience insights from an article, interview, or press piece about the creator. Call once per article URL.",
                ),
                EvidenceTool::ClassifyNiche => tool_definition::<ClassifyNicheInput>(
                    CLASSIFY_NICHE,
                    "Classify the creator's niche and determine audience constraints including UNLIKELY segments.",
                ),
                EvidenceTool::FindComparableCreators => tool_definition::<FindComparableInput>(
                    FIND_COMPARABLE_CREATORS,
                    "Find similar creators and research their known audiences as templates for ICP generation.",
                ),
                EvidenceTool::GenerateIcps => tool_definition::<GenerateEvidenceIcpsInput>(
                    GENERATE_EVIDENCE_ICPS,
                    "Generate ICPs with MANDATORY evidence citations, including article insights.",
                ),
                EvidenceTool::ValidateIcps => tool_definition::<ValidateIcpsInput>(
                    VALIDATE_ICPS,
                    "Validate ICPs against evidence and niche constraints. Rejects low-confidence or contradictory segments.",
                ),
            })
            .collect()
    }

    fn parse_call(&self, name: &str, arguments: Value) -> Result<EvidenceCall, ToolInputError> {
        let kind = resolve_tool(name, EvidenceTool::from_name, &self.offered)?;
        Ok(match kind {
            EvidenceTool::ExpandUrls => EvidenceCall::ExpandUrls(parse_input(name, arguments)?),
            EvidenceTool::DeepResearch => EvidenceCall::DeepResearch(parse_input(name, arguments)?),
            EvidenceTool::ExtractArticleContext => {
                EvidenceCall::ExtractArticleContext(parse_input(name, arguments)?)
            }
            EvidenceTool::ClassifyNiche => EvidenceCall::ClassifyNiche(parse_input(name, arguments)?),
            EvidenceTool::FindComparableCreators => {
                EvidenceCall::FindComparableCreators(parse_input(name, arguments)?)
            }
            EvidenceTool::GenerateIcps => EvidenceCall::GenerateIcps(parse_input(name, arguments)?),
            EvidenceTool::ValidateIcps => {
                EvidenceCall::ValidateIcps(ValidateCall::decode(parse_input(name, arguments)?)?)
            }
        })
    }

    async fn execute(&mut self, call: &EvidenceCall) -> Result<Value, ToolError> {
        match call {
            EvidenceCall::ExpandUrls(input) => self.expand_urls(input).await,
            EvidenceCall::DeepResearch(input) => self.deep_research(input).await,
            EvidenceCall::ExtractArticleContext(input) => self.extract_article(input).await,
            EvidenceCall::ClassifyNiche(input) => self.classify_niche(input).await,
            EvidenceCall::FindComparableCreators(input) => self.find_comparable(input).await,
            EvidenceCall::GenerateIcps(input) => self.generate_icps(input).await,
            EvidenceCall::ValidateIcps(call) => Ok(self.validate_icps(call)),
        }
    }

    fn fallback(&self, call: &EvidenceCall, error: &ToolError) -> Value {
        let error = error.to_string();
        match call {
            EvidenceCall::ExpandUrls(_) => json!({
                "primaryUrl": self.primary_url,
                "discoveredUrls": {
                    "otherPlatforms": [],
                    "website": null,
                    "linktree": null,
                    "podcastAppearances": [],
                    "interviews": [],
                    "collaborators": [],
                    "similarCreators": []
                },
                "message": "URL expansion failed",
                "articlesDiscovered": 0,
                "articlesToProcess": [],
                "error": error,
            }),
            EvidenceCall::DeepResearch(input) => json!({
                "handle": input.handle,
                "platform": input.platform,
                "contentThemes": [],
                "hashtags": [],
                "collaborators": [],
                "geographySignals": [],
                "evidenceSummary": {
                    "hashtagCount": 0,
                    "collaboratorCount": 0,
                    "geographySignalCount": 0,
                    "hasStrongLocationData": false
                },
                "error": error,
            }),
            EvidenceCall::ExtractArticleContext(input) => {
                let mut output = serde_json::to_value(ArticleContext::empty(&input.article_url))
                    .unwrap_or_else(|_| json!({ "sourceUrl": input.article_url }));
                output["insightCount"] = json!(0);
                output["highlights"] = json!([]);
                output["message"] = json!("Failed to extract article content");
                output["error"] = json!(error);
                output
            }
            EvidenceCall::ClassifyNiche(_) => json!({
                "audienceConstraints": AudienceConstraints::default(),
                "message": "Niche classification failed",
                "error": error,
            }),
            EvidenceCall::FindComparableCreators(_) => json!({
                "creators": [],
                "message": "Comparable creator search failed",
                "audienceTemplates": [],
                "error": error,
            }),
            EvidenceCall::GenerateIcps(_) => json!({
                "icpSegments": [],
                "segmentCount": 0,
                "averageConfidenceScore": 0,
                "articleEvidenceUsed": false,
                "error": error,
            }),
            EvidenceCall::ValidateIcps(_) => json!({
                "validSegments": [],
                "validCount": 0,
                "excludedSegments": [],
                "excludedCount": 0,
                "error": error,
            }),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreatorHints {
    pub creator_name: Option<String>,
    pub known_niche: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct EvidenceIcpRequest {
    /// 第一个是主页面
    pub profile_urls: Vec<String>,
    pub article_urls: Vec<String>,
    pub hints: CreatorHints,
    pub depth: ResearchDepth,
    pub messages: Vec<Message>,
    pub model: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResearchMetadata {
    pub research_depth: ResearchDepth,
    pub sources_analyzed: u32,
    pub comparable_creators_used: usize,
    pub articles_analyzed: usize,
    pub generated_at: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EvidenceIcpResult {
    pub profile_analyzed: String,
    pub platform: SocialPlatform,
    pub total_followers: String,
    pub url_expansion: Option<UrlExpansion>,
    pub niche_classification: Option<NicheClassification>,
    pub icp_segments: Vec<EvidenceSegment>,
    pub excluded_segments: Vec<ExcludedSegment>,
    pub research_metadata: ResearchMetadata,
}

fn execution_flow(depth: ResearchDepth, articles: &[String]) -> String {
    let mut steps = vec![
        format!("{EXPAND_URLS}: discover related URLs, including articles and interviews"),
        format!("{DEEP_RESEARCH}: research the primary profile with evidence extraction"),
    ];
    if !articles.is_empty() {
        steps.push(format!(
            "{EXTRACT_ARTICLE_CONTEXT}: extract insights from each article ({}) and any discovered in {EXPAND_URLS}",
            articles.join(", ")
        ));
    }
    steps.push(format!("{CLASSIFY_NICHE}: determine the niche and audience constraints"));
    if depth != ResearchDepth::Quick {
        steps.push(format!("{FIND_COMPARABLE_CREATORS}: find similar creators as audience templates"));
    }
    steps.push(format!("{GENERATE_EVIDENCE_ICPS}: generate ICPs with mandatory evidence citations"));
    steps.push(format!("{VALIDATE_ICPS}: validate each ICP against evidence and niche constraints"));
    steps
        .iter()
        .enumerate()
        .map(|(i, s)| format!("STEP {}: {s}\n", i + 1))
        .collect()
}

fn hints_line(hints: &CreatorHints) -> String {
    let mut line = String::new();
    if let Some(name) = &hints.creator_name {
        line.push_str(&format!("Creator name: {name}\n"));
    }
    if let Some(niche) = &hints.known_niche {
        line.push_str(&format!("Known niche: {niche}\n"));
    }
    line
}

pub async fn run_evidence_icp(
    ctx: &PipelineContext<'_>,
    request: EvidenceIcpRequest,
) -> Result<RunReport<EvidenceIcpResult>, RunError> {
    let cfg = &ctx.config.evidence;
    let mut profile_urls: Vec<String> = request
        .profile_urls
        .into_iter()
        .filter(|u| !u.trim().is_empty())
        .collect();
    if profile_urls.is_empty() {
        return Err(RunError::InvalidRequest("At least one profile URL is required".into()));
    }
    if profile_urls.len() > cfg.max_profile_urls {
        tracing::warn!(given = profile_urls.len(), max = cfg.max_profile_urls, "extra profile urls dropped");
        profile_urls.truncate(cfg.max_profile_urls);
    }
    let primary_url = profile_urls[0].clone();
    let (platform, handle) = resolve_profile(&primary_url)?;
    let article_urls = filter_article_urls(&request.article_urls, cfg.max_article_urls);
    let depth = request.depth;

    let roles = ModelRoles::from_config(ctx.config, request.model.clone());
    let flow = execution_flow(depth, &article_urls);
    let hints = hints_line(&request.hints);
    let research_depth = format!("{} ({})", depth.as_str().to_uppercase(), depth.guidance());
    let article_list = if article_urls.is_empty() {
        String::new()
    } else {
        format!("Process these article URLs: {}", article_urls.join(", "))
    };
    let vars = [
        ("profile_url", primary_url.as_str()),
        ("handle", handle.as_str()),
        ("platform", platform.as_str()),
        ("research_depth", research_depth.as_str()),
        ("article_urls", article_list.as_str()),
        ("flow", flow.as_str()),
        ("hints", hints.as_str()),
    ];
    let system = ctx.prompts.render("evidence_icp", EVIDENCE_SYSTEM, &vars);
    let mut messages = request.messages;
    if messages.is_empty() {
        let mut kickoff = ctx.prompts.render("evidence_icp_kickoff", EVIDENCE_KICKOFF, &vars);
        let others: Vec<&str> = profile_urls
            .iter()
            .skip(1)
            .filter(|u| detect_platform(u).is_some())
            .map(String::as_str)
            .collect();
        if !others.is_empty() {
            kickoff.push_str(&format!("\nAdditional profile URLs: {}", others.join(", ")));
        }
        messages.push(Message::user(kickoff));
    }

    tracing::info!(
        primary_url = %primary_url,
        platform = %platform,
        handle = %handle,
        depth = depth.as_str(),
        additional_urls = profile_urls.len() - 1,
        articles = article_urls.len(),
        "evidence icp started"
    );

    let mut tools = EvidenceIcpTools::new(
        ctx.model,
        roles.clone(),
        cfg.clone(),
        primary_url,
        article_urls.len(),
        depth,
    );
    let session = ctx.session(
        cfg.max_steps,
        cfg.timeout_secs,
        StopCondition::tool_fired(VALIDATE_ICPS),
        roles.agent,
    );
    let outcome = run_steps(&session, &mut tools, Some(&system), messages).await?;

    let state = &tools.state;
    let accumulated = serde_json::to_value(state).unwrap_or(Value::Null);
    let result = outcome.fired(VALIDATE_ICPS).then(|| EvidenceIcpResult {
        profile_analyzed: format!("@{handle}"),
        platform,
        total_followers: state.follower_count().unwrap_or("Unknown").to_string(),
        url_expansion: state.url_expansion.clone(),
        niche_classification: state.niche.clone(),
        icp_segments: state.validated_segments.clone(),
        excluded_segments: state.excluded_segments.clone(),
        research_metadata: ResearchMetadata {
            research_depth: depth,
            sources_analyzed: state.sources_analyzed,
            comparable_creators_used: state.comparable_creators.len(),
            articles_analyzed: state.article_contexts.len(),
            generated_at: chrono::Utc::now().to_rfc3339(),
        },
    });
    Ok(RunReport::new(outcome, result, accumulated))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::ScriptedModelClient;

    fn tools(model: &ScriptedModelClient, depth: ResearchDepth) -> EvidenceIcpTools<'_> {
        EvidenceIcpTools::new(
            model,
            ModelRoles::default(),
            EvidenceSection::default(),
            "https://instagram.com/beatmaker",
            0,
            depth,
        )
    }

    pub(crate) fn segment(name: &str, score: Option<f64>) -> Value {
        json!({
            "segmentName": name,
            "personaDescription": "Bedroom producers learning Ableton",
            "evidence": {
                "primarySources": [{"type": "hashtag", "detail": "#ableton", "source": "profile"}],
                "confidenceLevel": "high",
                "confidenceReason": "frequent hashtag",
                "score": score
            },
            "demographics": {"ageRange": "18-24", "gender": "mostly male", "geography": null, "occupation": null},
            "psychographics": {"values": [], "aspirations": [], "painPoints": [], "lifestyle": "night owl"},
            "behaviors": {
                "followReason": "tutorials",
                "engagementStyle": "commenter",
                "purchaseInfluence": "high",
                "contentPreferences": []
            },
            "brandAffinities": ["Ableton"],
            "estimatedSegmentSize": "~40%"
        })
    }

    #[test]
    fn test_quick_depth_hides_comparable_creators() {
        let model = ScriptedModelClient::new();
        let quick = tools(&model, ResearchDepth::Quick);
        let names: Vec<String> = quick.definitions().into_iter().map(|d| d.name).collect();
        assert_eq!(names.len(), 6);
        assert!(!names.contains(&FIND_COMPARABLE_CREATORS.to_string()));
        let err = quick
            .parse_call(
                FIND_COMPARABLE_CREATORS,
                json!({"niche": "music", "subNiche": "edm", "followerCount": "10K"}),
            )
            .unwrap_err();
        assert_eq!(err, ToolInputError::Unavailable(FIND_COMPARABLE_CREATORS.into()));

        let standard = tools(&model, ResearchDepth::Standard);
        assert_eq!(standard.definitions().len(), 7);
    }

    #[test]
    fn test_research_depth_parse() {
        assert_eq!("QUICK".parse::<ResearchDepth>().unwrap(), ResearchDepth::Quick);
        assert!("fast".parse::<ResearchDepth>().is_err());
        assert_eq!(ResearchDepth::default(), ResearchDepth::Standard);
    }

    #[test]
    fn test_validate_accepts_encoded_segments() {
        let model = ScriptedModelClient::new();
        let t = tools(&model, ResearchDepth::Standard);
        let encoded = serde_json::to_string(&json!([segment("Producers", Some(4.0))])).unwrap();
        let call = t
            .parse_call(
                VALIDATE_ICPS,
                json!({
                    "icpSegments": encoded,
                    "nicheConstraints": "{\"audienceConstraints\": {\"likelyGeography\": [\"USA\"]}}",
                    "unlikelySegments": ["Retirees"]
                }),
            )
            .unwrap();
        match call {
            EvidenceCall::ValidateIcps(v) => {
                assert_eq!(v.segments.unwrap().len(), 1);
                assert_eq!(v.constraints.unwrap().likely_geography, vec!["USA"]);
            }
            other => panic!("unexpected call {other:?}"),
        }

        let err = t
            .parse_call(VALIDATE_ICPS, json!({"icpSegments": "not json"}))
            .unwrap_err();
        assert!(matches!(err, ToolInputError::InvalidArguments { .. }));
    }

    #[tokio::test]
    async fn test_validate_falls_back_to_accumulated_state() {
        let model = ScriptedModelClient::new();
        let mut t = tools(&model, ResearchDepth::Quick);
        t.state.generated_segments = vec![
            serde_json::from_value(segment("Ableton Producers", Some(4.5))).unwrap(),
            serde_json::from_value(segment("Berlin Retirees", Some(4.0))).unwrap(),
            serde_json::from_value(segment("Casual Listeners", Some(2.0))).unwrap(),
        ];
        t.state.niche = Some(
            serde_json::from_value(json!({
                "primaryNiche": {"industry": "Music", "subNiche": "Production", "specificGenre": null},
                "nicheEvidence": [],
                "audienceConstraints": {"likelyGeography": ["USA"], "unlikelySegments": ["Retirees"]}
            }))
            .unwrap(),
        );

        let call = t.parse_call(VALIDATE_ICPS, json!({})).unwrap();
        let out = t.execute(&call).await.unwrap();
        assert_eq!(out["validCount"], 1);
        assert_eq!(out["excludedCount"], 2);
        assert_eq!(t.state.validated_segments[0].segment_name, "Ableton Producers");
        let reasons: Vec<&str> = t
            .state
            .excluded_segments
            .iter()
            .map(|e| e.rejection_reason.as_str())
            .collect();
        assert!(reasons[0].starts_with("Matches unlikely segment pattern"));
        assert!(reasons[1].starts_with("Evidence score too low (2/5)"));
    }

    #[tokio::test]
    async fn test_generate_requires_segment_range() {
        let model = ScriptedModelClient::new()
            .with_object(json!({"icpSegments": [segment("Only One", Some(5.0))]}));
        let mut t = tools(&model, ResearchDepth::Quick);
        let call = t
            .parse_call(
                GENERATE_EVIDENCE_ICPS,
                json!({"profileContext": "p", "nicheContext": "n", "unlikelySegments": []}),
            )
            .unwrap();
        let err = t.execute(&call).await.unwrap_err();
        assert!(matches!(err, ToolError::Upstream(LlmError::Schema(_))));
        assert!(t.state.generated_segments.is_empty());
        assert_eq!(t.fallback(&call, &err)["segmentCount"], 0);
    }

    #[test]
    fn test_article_section_prefers_provided_insights() {
        let model = ScriptedModelClient::new();
        let mut t = tools(&model, ResearchDepth::Quick);
        t.state.article_contexts.push(ArticleContext::empty("https://acc.example/a"));

        let provided =
            serde_json::to_string(&vec![ArticleContext::empty("https://given.example/b")]).unwrap();
        let section = t.article_section(Some(&provided));
        assert!(section.contains("given.example"));
        assert!(!section.contains("acc.example"));

        assert!(t.article_section(None).contains("acc.example"));
        assert!(t.article_section(Some("garbage")).is_empty());
    }

    #[tokio::test]
    async fn test_extract_article_failure_keeps_state_and_reports_url() {
        let model = ScriptedModelClient::new().with_object_error("timeout");
        let mut t = tools(&model, ResearchDepth::Standard);
        let call = t
            .parse_call(EXTRACT_ARTICLE_CONTEXT, json!({"articleUrl": "https://forbes.com/x"}))
            .unwrap();
        let err = t.execute(&call).await.unwrap_err();
        let out = t.fallback(&call, &err);
        assert_eq!(out["sourceUrl"], "https://forbes.com/x");
        assert_eq!(out["qualityScore"], 0.0);
        assert_eq!(out["message"], "Failed to extract article content");
        assert!(t.state.article_contexts.is_empty());
        assert_eq!(t.state.sources_analyzed, 1);
    }

    #[test]
    fn test_execution_flow_numbering() {
        let quick = execution_flow(ResearchDepth::Quick, &[]);
        assert!(quick.contains("STEP 4: generateEvidenceBasedICPs"));
        assert!(!quick.contains(FIND_COMPARABLE_CREATORS));
        let deep = execution_flow(ResearchDepth::Deep, &["https://forbes.com/x".into()]);
        assert!(deep.contains("STEP 3: extractArticleContext"));
        assert!(deep.contains("STEP 7: validateICPs"));
    }
}
