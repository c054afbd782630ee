//! 社交研究流水线的结构化输出类型（由模型按 JSON Schema 生成）

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::evidence::{Behaviors, ConfidenceLevel, Psychographics};

// ---------- v1：画像查询 / 受众分析 / ICP ----------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ProfileLookup {
    pub handle: String,
    pub platform: String,
    pub bio: Option<String>,
    pub follower_count: Option<String>,
    pub content_themes: Vec<String>,
    pub recent_content: Option<String>,
    pub brand_collaborations: Vec<String>,
    pub content_style: Option<String>,
    pub notable_info: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct AudienceSignals {
    pub likely_demographics: String,
    pub interest_clusters: Vec<String>,
    pub motivations_to_follow: Vec<String>,
    pub purchase_behaviors: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct AudienceAnalysis {
    pub content_tone: String,
    pub primary_appeal: String,
    pub audience_signals: AudienceSignals,
    pub segment_opportunities: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct IcpDemographics {
    pub age_range: String,
    pub gender: String,
    pub occupation: Option<String>,
}

/// 不带证据的分群（v1）
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct IcpSegment {
    pub segment_name: String,
    pub persona_description: String,
    pub demographics: IcpDemographics,
    pub psychographics: Psychographics,
    pub behaviors: Behaviors,
    pub brand_affinities: Vec<String>,
    pub estimated_segment_size: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct IcpSegmentList {
    #[schemars(length(min = 3, max = 6))]
    pub icp_segments: Vec<IcpSegment>,
}

// ---------- v2：URL 扩展 / 深度研究 / 文章 / 细分领域 / 可比创作者 ----------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct PlatformLink {
    pub platform: String,
    pub url: String,
    /// bio link / linktree / web search
    pub source: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct Collaborator {
    pub name: String,
    pub url: Option<String>,
    pub relationship: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct SimilarCreator {
    pub name: String,
    pub url: String,
    pub similarity: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct DiscoveredUrls {
    pub other_platforms: Vec<PlatformLink>,
    pub website: Option<String>,
    pub linktree: Option<String>,
    pub podcast_appearances: Vec<String>,
    pub interviews: Vec<String>,
    pub collaborators: Vec<Collaborator>,
    pub similar_creators: Vec<SimilarCreator>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct UrlExpansion {
    pub primary_url: String,
    pub discovered_urls: DiscoveredUrls,
}

impl UrlExpansion {
    /// 采访 + 播客，去掉空串，保持顺序
    pub fn article_candidates(&self) -> Vec<String> {
        self.discovered_urls
            .interviews
            .iter()
            .chain(self.discovered_urls.podcast_appearances.iter())
            .filter(|u| !u.trim().is_empty())
            .cloned()
            .collect()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct HashtagSignal {
    pub tag: String,
    /// high / medium / low
    pub frequency: String,
    /// niche / location / trending / community
    pub category: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct CollaboratorHandle {
    pub handle: String,
    pub platform: Option<String>,
    pub relationship: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct EnhancedProfile {
    pub handle: String,
    pub platform: String,
    pub bio: Option<String>,
    pub follower_count: Option<String>,
    pub content_themes: Vec<String>,
    pub recent_content_summary: Option<String>,
    pub brand_mentions: Vec<String>,
    pub content_style: Option<String>,
    pub hashtags: Vec<HashtagSignal>,
    pub collaborators: Vec<CollaboratorHandle>,
    pub geography_signals: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum ArticleSourceType {
    Interview,
    Press,
    Blog,
    Podcast,
    Research,
    Other,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum ArticleInsightType {
    Demographic,
    Psychographic,
    Behavioral,
    BrandAffinity,
    NicheSignal,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ArticleInsight {
    pub insight: String,
    pub confidence: ConfidenceLevel,
    pub quote: Option<String>,
    pub insight_type: ArticleInsightType,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ExtractedInsights {
    pub demographics: Vec<ArticleInsight>,
    pub psychographics: Vec<ArticleInsight>,
    pub behaviorals: Vec<ArticleInsight>,
    pub brand_mentions: Vec<String>,
    pub niche_signals: Vec<String>,
    pub creator_quotes: Vec<String>,
    pub geography_signals: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ArticleContext {
    pub source_url: String,
    pub source_title: Option<String>,
    pub source_type: ArticleSourceType,
    pub publication_date: Option<String>,
    pub extracted_insights: ExtractedInsights,
    /// 0-5
    pub quality_score: f64,
}

impl ArticleContext {
    /// 提取失败时的空记录
    pub fn empty(source_url: impl Into<String>) -> Self {
        Self {
            source_url: source_url.into(),
            source_title: None,
            source_type: ArticleSourceType::Other,
            publication_date: None,
            extracted_insights: ExtractedInsights::default(),
            quality_score: 0.0,
        }
    }

    pub fn insight_count(&self) -> usize {
        let i = &self.extracted_insights;
        i.demographics.len() + i.psychographics.len() + i.behaviorals.len()
    }

    /// 供 ICP 生成提示词使用的证据块
    pub fn evidence_block(&self, idx: usize) -> String {
        let i = &self.extracted_insights;
        let join_or = |items: Vec<&str>, sep: &str, empty: &str| {
            if items.is_empty() {
                empty.to_string()
            } else {
                items.join(sep)
            }
        };
        let quotes = if i.creator_quotes.is_empty() {
            "None".to_string()
        } else {
            format!("\"{}\"", i.creator_quotes.join("\", \""))
        };
        format!(
            "ARTICLE {}: {}\n- Source Type: {}\n- Quality Score: {}/5\n- Demographics: {}\n- Psychographics: {}\n- Creator Quotes: {}\n- Brand Mentions: {}\n- Geography Signals: {}\n",
            idx + 1,
            self.source_title.as_deref().unwrap_or(&self.source_url),
            serde_json::to_value(self.source_type)
                .ok()
                .and_then(|v| v.as_str().map(String::from))
                .unwrap_or_default(),
            self.quality_score,
            join_or(i.demographics.iter().map(|d| d.insight.as_str()).collect(), "; ", "None found"),
            join_or(i.psychographics.iter().map(|d| d.insight.as_str()).collect(), "; ", "None found"),
            quotes,
            join_or(i.brand_mentions.iter().map(String::as_str).collect(), ", ", "None"),
            join_or(i.geography_signals.iter().map(String::as_str).collect(), ", ", "None"),
        )
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct PrimaryNiche {
    pub industry: String,
    pub sub_niche: String,
    pub specific_genre: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct NicheSignal {
    pub signal: String,
    pub source: String,
    pub confidence: ConfidenceLevel,
}

/// 受众约束；unlikely_segments 是校验器过滤幻觉分群的关键输入
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct AudienceConstraints {
    #[serde(default)]
    pub likely_age_range: String,
    #[serde(default)]
    pub likely_gender_split: String,
    #[serde(default)]
    pub likely_geography: Vec<String>,
    #[serde(default)]
    pub likely_interests: Vec<String>,
    #[serde(default)]
    pub unlikely_segments: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct NicheClassification {
    pub primary_niche: PrimaryNiche,
    pub niche_evidence: Vec<NicheSignal>,
    pub audience_constraints: AudienceConstraints,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ComparableCreator {
    pub name: String,
    pub handle: String,
    pub platform: String,
    pub follower_count: String,
    pub similarity: String,
    pub known_audiences: Vec<String>,
    pub audience_evidence: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ComparableCreatorList {
    pub comparable_creators: Vec<ComparableCreator>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct EvidenceSegmentList {
    #[schemars(length(min = 2, max = 6))]
    pub icp_segments: Vec<crate::evidence::EvidenceSegment>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_article_candidates_order_and_blank_filter() {
        let expansion = UrlExpansion {
            primary_url: "https://instagram.com/a".into(),
            discovered_urls: DiscoveredUrls {
                other_platforms: vec![],
                website: None,
                linktree: None,
                podcast_appearances: vec!["https://pod.example/1".into(), " ".into()],
                interviews: vec!["https://forbes.com/i".into()],
                collaborators: vec![],
                similar_creators: vec![],
            },
        };
        assert_eq!(
            expansion.article_candidates(),
            vec!["https://forbes.com/i", "https://pod.example/1"]
        );
    }

    #[test]
    fn test_evidence_block_formatting() {
        let mut article = ArticleContext::empty("https://forbes.com/i");
        article.source_type = ArticleSourceType::Interview;
        article.quality_score = 5.0;
        article.extracted_insights.creator_quotes = vec!["My fans are producers".into()];
        let block = article.evidence_block(0);
        assert!(block.starts_with("ARTICLE 1: https://forbes.com/i"));
        assert!(block.contains("Source Type: interview"));
        assert!(block.contains("Quality Score: 5/5"));
        assert!(block.contains("\"My fans are producers\""));
        assert!(block.contains("Demographics: None found"));
    }

    #[test]
    fn test_audience_constraints_tolerate_missing_fields() {
        let c: AudienceConstraints =
            serde_json::from_value(serde_json::json!({"unlikelySegments": ["Retirees"]})).unwrap();
        assert_eq!(c.unlikely_segments, vec!["Retirees"]);
        assert!(c.likely_geography.is_empty());
    }
}
