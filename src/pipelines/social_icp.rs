//! 社交主页 ICP（v1）：lookupProfile -> analyzeAudience -> generateICPs
//!
//! 不要求证据引用；generateICPs 触发即停止。

use async_trait::async_trait;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::core::RunError;
use crate::llm::{generate_structured, LlmError, ModelClient, ObjectRequest, TextRequest, ToolDefinition};
use crate::memory::{Message, SocialIcpState};
use crate::pipelines::{ModelRoles, PipelineContext, PromptLibrary, RunReport};
use crate::social::{
    detect_platform, extract_handle, AudienceAnalysis, IcpSegment, IcpSegmentList, ProfileLookup,
    SocialPlatform,
};
use crate::steps::{run_steps, StopCondition};
use crate::tools::{
    parse_input, resolve_tool, tool_definition, ToolError, ToolInput, ToolInputError, Toolset,
};

pub const LOOKUP_PROFILE: &str = "lookupProfile";
pub const ANALYZE_AUDIENCE: &str = "analyzeAudience";
pub const GENERATE_ICPS: &str = "generateICPs";

const MIN_SEGMENTS: usize = 3;
const MAX_SEGMENTS: usize = 6;

const SOCIAL_ICP_SYSTEM: &str = "You are an audience intelligence expert who builds Ideal Customer Profiles from social media profiles.\n\n\
Analyze {profile_url} (@{handle} on {platform}) and produce 3-6 distinct follower segments.\n\
Call lookupProfile, then analyzeAudience, then generateICPs. After each tool result immediately call the next tool.\n\
Segments must differ in WHY people follow, not only in age. Avoid generic labels.";

const SOCIAL_ICP_KICKOFF: &str = "Generate audience ICPs for {profile_url}.";

const PROFILE_RESEARCH_SYSTEM: &str = "You are a social media researcher. Compile the bio, approximate follower count, \
content themes, notable recent content, brand collaborations and content style of the profile. \
Be specific and factual; say so when information is unavailable.";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SocialIcpTool {
    LookupProfile,
    AnalyzeAudience,
    GenerateIcps,
}

impl SocialIcpTool {
    pub const ALL: [SocialIcpTool; 3] = [
        SocialIcpTool::LookupProfile,
        SocialIcpTool::AnalyzeAudience,
        SocialIcpTool::GenerateIcps,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            SocialIcpTool::LookupProfile => LOOKUP_PROFILE,
            SocialIcpTool::AnalyzeAudience => ANALYZE_AUDIENCE,
            SocialIcpTool::GenerateIcps => GENERATE_ICPS,
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|t| t.name() == name)
    }
}

#[derive(Debug, Clone, Deserialize, JsonSchema)]
pub struct LookupProfileInput {
    #[schemars(description = "The social media handle to look up")]
    pub handle: String,
    #[schemars(description = "The platform (instagram, tiktok, twitter, youtube, linkedin)")]
    pub platform: String,
}

impl ToolInput for LookupProfileInput {
    fn validate(&self) -> Result<(), String> {
        if self.handle.trim().is_empty() {
            return Err("handle must not be empty".into());
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct AnalyzeAudienceInput {
    #[schemars(description = "Summary of the profile data to analyze")]
    pub profile_summary: String,
}

impl ToolInput for AnalyzeAudienceInput {}

#[derive(Debug, Clone, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct GenerateIcpsInput {
    #[schemars(description = "Context from profile lookup and audience analysis")]
    pub analysis_context: String,
}

impl ToolInput for GenerateIcpsInput {}

#[derive(Debug)]
pub enum SocialIcpCall {
    LookupProfile(LookupProfileInput),
    AnalyzeAudience(AnalyzeAudienceInput),
    GenerateIcps(GenerateIcpsInput),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SocialIcpResult {
    pub profile_analyzed: String,
    pub platform: SocialPlatform,
    pub total_followers: String,
    pub icp_segments: Vec<IcpSegment>,
}

pub struct SocialIcpTools<'a> {
    model: &'a dyn ModelClient,
    roles: ModelRoles,
    handle: String,
    platform: SocialPlatform,
    pub state: SocialIcpState,
    pub result: Option<SocialIcpResult>,
}

impl<'a> SocialIcpTools<'a> {
    pub fn new(model: &'a dyn ModelClient, roles: ModelRoles, handle: String, platform: SocialPlatform) -> Self {
        Self {
            model,
            roles,
            handle,
            platform,
            state: SocialIcpState::default(),
            result: None,
        }
    }

    fn total_followers(&self) -> String {
        self.state
            .profile
            .as_ref()
            .and_then(|p| p.follower_count.clone())
            .unwrap_or_else(|| "Unknown".to_string())
    }

    async fn lookup_profile(&mut self, input: &LookupProfileInput) -> Result<Value, ToolError> {
        tracing::info!(handle = %input.handle, platform = %input.platform, "lookupProfile");
        let research = self
            .model
            .generate_text(
                TextRequest::prompt(format!(
                    "Research the {} profile @{}. What do we know about this creator, their content, and their audience?",
                    input.platform, input.handle
                ))
                .with_system(PROFILE_RESEARCH_SYSTEM)
                .with_web_search(),
            )
            .await?;

        let profile: ProfileLookup = generate_structured(
            self.model,
            ObjectRequest::new(format!(
                "Extract structured profile data from this research about @{} on {}:\n\n{}\n\nUse null or an empty array for unknown fields.",
                input.handle, input.platform, research.text
            ))
            .with_model(self.roles.extraction.as_deref()),
        )
        .await?;

        let mut output = serde_json::to_value(&profile).map_err(|e| ToolError::Failed(e.to_string()))?;
        output["sourceCount"] = json!(research.sources.len());
        self.state.profile = Some(profile);
        Ok(output)
    }

    async fn analyze_audience(&mut self, input: &AnalyzeAudienceInput) -> Result<Value, ToolError> {
        tracing::info!(summary_chars = input.profile_summary.len(), "analyzeAudience");
        let analysis: AudienceAnalysis = generate_structured(
            self.model,
            ObjectRequest::new(format!(
                "Infer the audience of this social media profile:\n\n{}\n\n\
                 Cover content type, tone, follow motivations, likely demographics, purchase behaviors \
                 and 4-6 distinct segment opportunities. Avoid generic labels.",
                input.profile_summary
            ))
            .with_model(self.roles.extraction.as_deref()),
        )
        .await?;
        let output = serde_json::to_value(&analysis).map_err(|e| ToolError::Failed(e.to_string()))?;
        self.state.audience = Some(analysis);
        Ok(output)
    }

    async fn generate_icps(&mut self, input: &GenerateIcpsInput) -> Result<Value, ToolError> {
        tracing::info!(handle = %self.handle, "generateICPs");
        let list: IcpSegmentList = generate_structured(
            self.model,
            ObjectRequest::new(format!(
                "Generate {MIN_SEGMENTS}-{MAX_SEGMENTS} DISTINCT Ideal Customer Profile segments for the followers of this creator.\n\n\
                 Context:\n{}\n\n\
                 Segments must differ in psychographics, include obvious and unexpected follower types, \
                 and their sizes should roughly total 100%.",
                input.analysis_context
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

        let result = SocialIcpResult {
            profile_analyzed: format!("@{}", self.handle),
            platform: self.platform,
            total_followers: self.total_followers(),
            icp_segments: list.icp_segments,
        };
        let output = serde_json::to_value(&result).map_err(|e| ToolError::Failed(e.to_string()))?;
        self.result = Some(result);
        Ok(output)
    }
}

#[async_trait]
impl<'a> Toolset for SocialIcpTools<'a> {
    type Call = SocialIcpCall;

    fn definitions(&self) -> Vec<ToolDefinition> {
        vec![
            tool_definition::<LookupProfileInput>(
                LOOKUP_PROFILE,
                "Look up information about a social media profile using web search. Call this first.",
            ),
            tool_definition::<AnalyzeAudienceInput>(
                ANALYZE_AUDIENCE,
                "Analyze profile data to infer audience characteristics. Call this after lookupProfile.",
            ),
            tool_definition::<GenerateIcpsInput>(
                GENERATE_ICPS,
                "Generate 3-6 distinct ICP segments based on profile and audience analysis. Call this last.",
            ),
        ]
    }

    fn parse_call(&self, name: &str, arguments: Value) -> Result<SocialIcpCall, ToolInputError> {
        let kind = resolve_tool(name, SocialIcpTool::from_name, &SocialIcpTool::ALL)?;
        Ok(match kind {
            SocialIcpTool::LookupProfile => SocialIcpCall::LookupProfile(parse_input(name, arguments)?),
            SocialIcpTool::AnalyzeAudience => SocialIcpCall::AnalyzeAudience(parse_input(name, arguments)?),
            SocialIcpTool::GenerateIcps => SocialIcpCall::GenerateIcps(parse_input(name, arguments)?),
        })
    }

    async fn execute(&mut self, call: &SocialIcpCall) -> Result<Value, ToolError> {
        match call {
            SocialIcpCall::LookupProfile(input) => self.lookup_profile(input).await,
            SocialIcpCall::AnalyzeAudience(input) => self.analyze_audience(input).await,
            SocialIcpCall::GenerateIcps(input) => self.generate_icps(input).await,
        }
    }

    fn fallback(&self, call: &SocialIcpCall, error: &ToolError) -> Value {
        match call {
            SocialIcpCall::LookupProfile(input) => json!({
                "handle": input.handle,
                "platform": input.platform,
                "bio": null,
                "followerCount": null,
                "contentThemes": [],
                "recentContent": null,
                "brandCollaborations": [],
                "contentStyle": null,
                "notableInfo": null,
                "sourceCount": 0,
                "error": error.to_string(),
            }),
            SocialIcpCall::AnalyzeAudience(_) => json!({
                "segmentOpportunities": [],
                "error": error.to_string(),
            }),
            SocialIcpCall::GenerateIcps(_) => json!({
                "profileAnalyzed": format!("@{}", self.handle),
                "platform": self.platform,
                "totalFollowers": self.total_followers(),
                "icpSegments": [],
                "error": error.to_string(),
            }),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct SocialIcpRequest {
    pub profile_url: String,
    pub messages: Vec<Message>,
    pub model: Option<String>,
}

/// URL -> (平台, handle)；不支持的平台或取不到 handle 都是请求错误
pub(crate) fn resolve_profile(url: &str) -> Result<(SocialPlatform, String), RunError> {
    let platform = detect_platform(url).ok_or_else(|| {
        RunError::InvalidRequest(
            "Unsupported platform. Supported: Instagram, TikTok, X/Twitter, YouTube, LinkedIn".into(),
        )
    })?;
    let handle = extract_handle(url, platform)
        .ok_or_else(|| RunError::InvalidRequest("Could not extract handle from URL".into()))?;
    Ok((platform, handle))
}

pub async fn run_social_icp(
    ctx: &PipelineContext<'_>,
    request: SocialIcpRequest,
) -> Result<RunReport<SocialIcpResult>, RunError> {
    if request.profile_url.trim().is_empty() {
        return Err(RunError::InvalidRequest("Profile URL is required".into()));
    }
    let (platform, handle) = resolve_profile(&request.profile_url)?;

    let cfg = &ctx.config.social;
    let roles = ModelRoles::from_config(ctx.config, request.model.clone());
    let prompts: &PromptLibrary = &ctx.prompts;
    let vars = [
        ("profile_url", request.profile_url.as_str()),
        ("handle", handle.as_str()),
        ("platform", platform.as_str()),
    ];
    let system = prompts.render("social_icp", SOCIAL_ICP_SYSTEM, &vars);
    let mut messages = request.messages;
    if messages.is_empty() {
        messages.push(Message::user(prompts.render("social_icp_kickoff", SOCIAL_ICP_KICKOFF, &vars)));
    }

    tracing::info!(profile_url = %request.profile_url, platform = %platform, handle = %handle, "social icp started");

    let mut tools = SocialIcpTools::new(ctx.model, roles.clone(), handle, platform);
    let terminal = StopCondition::tool_fired(GENERATE_ICPS);
    let session = ctx.session(cfg.max_steps, cfg.timeout_secs, terminal, roles.agent);
    let outcome = run_steps(&session, &mut tools, Some(&system), messages).await?;

    let accumulated = serde_json::to_value(&tools.state).unwrap_or(Value::Null);
    let result = if outcome.fired(GENERATE_ICPS) { tools.result.take() } else { None };
    Ok(RunReport::new(outcome, result, accumulated))
}
