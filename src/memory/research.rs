//! 社交受众研究的累积状态
//!
//! 每个字段只由「拥有」它的工具整体覆盖或追加；后续工具同步读取。

use serde::Serialize;

use crate::evidence::{EvidenceSegment, ExcludedSegment};
use crate::social::{
    ArticleContext, AudienceAnalysis, ComparableCreator, EnhancedProfile, NicheClassification,
    ProfileLookup, UrlExpansion,
};

/// social-icp（v1）：画像 -> 受众分析
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SocialIcpState {
    pub profile: Option<ProfileLookup>,
    pub audience: Option<AudienceAnalysis>,
}

/// evidence-icp（v2）
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ResearchState {
    /// expandUrls
    pub url_expansion: Option<UrlExpansion>,
    /// deepResearch
    pub profile: Option<EnhancedProfile>,
    /// classifyNiche
    pub niche: Option<NicheClassification>,
    /// findComparableCreators
    pub comparable_creators: Vec<ComparableCreator>,
    /// extractArticleContext，只追加
    pub article_contexts: Vec<ArticleContext>,
    /// expandUrls 自动发现、待提取的文章
    pub discovered_article_urls: Vec<String>,
    /// generateEvidenceBasedICPs
    pub generated_segments: Vec<EvidenceSegment>,
    /// validateICPs
    pub validated_segments: Vec<EvidenceSegment>,
    /// validateICPs
    pub excluded_segments: Vec<ExcludedSegment>,
    /// 每次联网搜索计一次
    pub sources_analyzed: u32,
}

impl ResearchState {
    /// 自动发现的文章填补剩余名额（总数 max_articles，含用户提供的）
    pub fn fill_discovered_articles(&mut self, candidates: Vec<String>, provided: usize, max_articles: usize) {
        let slots = max_articles.saturating_sub(provided);
        if slots > 0 && !candidates.is_empty() {
            self.discovered_article_urls = candidates.into_iter().take(slots).collect();
        }
    }

    pub fn follower_count(&self) -> Option<&str> {
        self.profile.as_ref().and_then(|p| p.follower_count.as_deref())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fill_discovered_articles_respects_slots() {
        let mut state = ResearchState::default();
        let found = vec!["a".to_string(), "b".to_string(), "c".to_string()];
        state.fill_discovered_articles(found.clone(), 1, 3);
        assert_eq!(state.discovered_article_urls, vec!["a", "b"]);

        let mut full = ResearchState::default();
        full.fill_discovered_articles(found, 3, 3);
        assert!(full.discovered_article_urls.is_empty());
    }
}
