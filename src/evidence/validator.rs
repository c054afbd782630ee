//! 证据校验器
//!
//! 纯函数：不调用模型、无副作用。每个候选按固定顺序过规则，命中即停：
//! 分数下限 -> 不太可能的分群 -> 地域一致性 -> 接受。

use serde::Serialize;

use crate::evidence::{EvidenceSegment, ExcludedSegment};
use crate::social::AudienceConstraints;

/// 默认地名标记（段落文本命中其一才触发地域检查）
pub const DEFAULT_LOCATION_MARKERS: [&str; 6] =
    ["berlin", "london", "paris", "tokyo", "sydney", "mumbai"];

pub const DEFAULT_MIN_SCORE: f64 = 3.0;

#[derive(Debug, Clone, PartialEq)]
pub struct ValidationConstraints {
    pub unlikely_segments: Vec<String>,
    pub likely_geography: Vec<String>,
    pub location_markers: Vec<String>,
    pub min_score: f64,
}

impl Default for ValidationConstraints {
    fn default() -> Self {
        Self {
            unlikely_segments: Vec::new(),
            likely_geography: Vec::new(),
            location_markers: DEFAULT_LOCATION_MARKERS.iter().map(|s| s.to_string()).collect(),
            min_score: DEFAULT_MIN_SCORE,
        }
    }
}

impl ValidationConstraints {
    pub fn from_audience(constraints: &AudienceConstraints) -> Self {
        Self {
            unlikely_segments: constraints.unlikely_segments.clone(),
            likely_geography: constraints.likely_geography.clone(),
            ..Self::default()
        }
    }

    pub fn with_location_markers(mut self, markers: Vec<String>) -> Self {
        self.location_markers = markers;
        self
    }

    pub fn with_min_score(mut self, min_score: f64) -> Self {
        self.min_score = min_score;
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ValidationOutcome {
    pub accepted: Vec<EvidenceSegment>,
    pub rejected: Vec<ExcludedSegment>,
}

/// 划分 accepted / rejected；相同输入必然得到相同输出
pub fn validate(
    candidates: &[EvidenceSegment],
    constraints: &ValidationConstraints,
) -> ValidationOutcome {
    let mut accepted = Vec::new();
    let mut rejected = Vec::new();

    for segment in candidates {
        match check(segment, constraints) {
            None => accepted.push(segment.clone()),
            Some(excluded) => rejected.push(excluded),
        }
    }

    ValidationOutcome { accepted, rejected }
}

fn check(segment: &EvidenceSegment, constraints: &ValidationConstraints) -> Option<ExcludedSegment> {
    let reject = |reason: String, score: Option<f64>| ExcludedSegment {
        segment_name: segment.segment_name.clone(),
        rejection_reason: reason,
        score,
    };

    // NaN 与 null 同样视为不达标
    let score = segment.score();
    if !score.is_some_and(|s| s >= constraints.min_score) {
        return Some(reject(
            format!(
                "Evidence score too low ({}/5). Minimum required: {}.",
                score.unwrap_or(0.0),
                constraints.min_score
            ),
            score,
        ));
    }

    let name = segment.segment_name.to_lowercase();
    let description = segment.persona_description.to_lowercase();
    let matches_unlikely = constraints
        .unlikely_segments
        .iter()
        .map(|u| u.trim().to_lowercase())
        .filter(|u| !u.is_empty())
        .any(|u| name.contains(&u) || description.contains(&u));
    if matches_unlikely {
        return Some(reject(
            "Matches unlikely segment pattern. This audience doesn't fit the creator's niche.".into(),
            None,
        ));
    }

    let text = format!(
        "{} {} {}",
        segment.segment_name,
        segment.persona_description,
        segment.demographics.geography.as_deref().unwrap_or("")
    )
    .to_lowercase();
    let has_marker = constraints
        .location_markers
        .iter()
        .any(|m| !m.is_empty() && text.contains(&m.to_lowercase()));
    if has_marker && !constraints.likely_geography.is_empty() {
        let location_match = constraints
            .likely_geography
            .iter()
            .any(|g| text.contains(&g.to_lowercase()));
        if !location_match {
            return Some(reject(
                format!(
                    "Location mismatch. Creator's likely geography: {}. No evidence for this location.",
                    constraints.likely_geography.join(", ")
                ),
                None,
            ));
        }
    }

    None
}
