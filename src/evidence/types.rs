//! 带证据的受众分群及其拒绝记录

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum EvidenceType {
    Hashtag,
    Content,
    Collaboration,
    Comment,
    Bio,
    ComparableCreator,
    Article,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum ConfidenceLevel {
    High,
    Medium,
    Low,
}

/// 单条证据：类型 + 细节 + 出处
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct EvidenceSource {
    #[serde(rename = "type")]
    pub kind: EvidenceType,
    pub detail: String,
    pub source: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct SegmentEvidence {
    pub primary_sources: Vec<EvidenceSource>,
    pub confidence_level: ConfidenceLevel,
    pub confidence_reason: String,
    /// 0-5；为 null 时一律校验不通过
    pub score: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct SegmentDemographics {
    pub age_range: String,
    pub gender: String,
    pub geography: Option<String>,
    pub occupation: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct Psychographics {
    pub values: Vec<String>,
    pub aspirations: Vec<String>,
    pub pain_points: Vec<String>,
    pub lifestyle: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum EngagementStyle {
    Lurker,
    Liker,
    Commenter,
    Sharer,
    Superfan,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct Behaviors {
    pub follow_reason: String,
    pub engagement_style: EngagementStyle,
    pub purchase_influence: ConfidenceLevel,
    pub content_preferences: Vec<String>,
}

/// 模型提出的候选分群
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct EvidenceSegment {
    pub segment_name: String,
    pub persona_description: String,
    pub evidence: SegmentEvidence,
    pub demographics: SegmentDemographics,
    pub psychographics: Psychographics,
    pub behaviors: Behaviors,
    pub brand_affinities: Vec<String>,
    pub estimated_segment_size: String,
}

impl EvidenceSegment {
    pub fn score(&self) -> Option<f64> {
        self.evidence.score
    }
}

/// 被拒绝的分群；score 仅在因分数被拒时携带
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ExcludedSegment {
    pub segment_name: String,
    pub rejection_reason: String,
    pub score: Option<f64>,
}
