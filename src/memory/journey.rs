//! 旅程模拟的累积状态：阶段状态机 + 旅程上下文
//!
//! 阶段严格线性 discovery -> consideration -> activation -> complete，只由 recordPhaseCompletion 推进。
//! 旅程上下文只追加、允许重复，读取时按首次出现顺序去重。

use std::collections::{BTreeSet, HashSet};

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum JourneyPhase {
    Discovery,
    Consideration,
    Activation,
}

impl JourneyPhase {
    pub const ALL: [JourneyPhase; 3] = [
        JourneyPhase::Discovery,
        JourneyPhase::Consideration,
        JourneyPhase::Activation,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            JourneyPhase::Discovery => "discovery",
            JourneyPhase::Consideration => "consideration",
            JourneyPhase::Activation => "activation",
        }
    }

    pub fn next(&self) -> JourneyStage {
        match self {
            JourneyPhase::Discovery => JourneyStage::Phase(JourneyPhase::Consideration),
            JourneyPhase::Consideration => JourneyStage::Phase(JourneyPhase::Activation),
            JourneyPhase::Activation => JourneyStage::Complete,
        }
    }
}

/// 状态机的位置：某个阶段，或全部完成
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JourneyStage {
    Phase(JourneyPhase),
    Complete,
}

impl JourneyStage {
    pub fn as_str(&self) -> &'static str {
        match self {
            JourneyStage::Phase(p) => p.as_str(),
            JourneyStage::Complete => "complete",
        }
    }
}

impl Serialize for JourneyStage {
    fn serialize<S: serde::Serializer>(&self, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(self.as_str())
    }
}

/// 一次 record 的结果
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PhaseTransition {
    Advanced,
    /// 已完成的阶段再次记录：幂等，无变化
    AlreadyComplete,
    /// 越级记录：被拒绝，状态不变
    OutOfOrder { expected: JourneyPhase },
}

/// 已完成阶段集合，单调增长
#[derive(Debug, Clone, Default)]
pub struct PhaseTracker {
    completed: BTreeSet<JourneyPhase>,
    enforce_order: bool,
}

impl PhaseTracker {
    pub fn new(enforce_order: bool) -> Self {
        Self {
            completed: BTreeSet::new(),
            enforce_order,
        }
    }

    /// 下一个待完成阶段
    pub fn current(&self) -> JourneyStage {
        JourneyPhase::ALL
            .iter()
            .find(|p| !self.completed.contains(p))
            .map(|p| JourneyStage::Phase(*p))
            .unwrap_or(JourneyStage::Complete)
    }

    pub fn record(&mut self, phase: JourneyPhase) -> PhaseTransition {
        if self.completed.contains(&phase) {
            return PhaseTransition::AlreadyComplete;
        }
        if self.enforce_order {
            if let JourneyStage::Phase(expected) = self.current() {
                if expected != phase {
                    return PhaseTransition::OutOfOrder { expected };
                }
            }
        }
        self.completed.insert(phase);
        PhaseTransition::Advanced
    }

    pub fn is_complete(&self, phase: JourneyPhase) -> bool {
        self.completed.contains(&phase)
    }

    pub fn all_complete(&self) -> bool {
        self.completed.len() == JourneyPhase::ALL.len()
    }

    pub fn completed(&self) -> impl Iterator<Item = &JourneyPhase> {
        self.completed.iter()
    }
}

/// 从模型回答里抽取到的实体，跨步累积
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct JourneyContext {
    pub entities_discovered: Vec<String>,
    pub comparisons_explored: Vec<String>,
    pub specific_products: Vec<String>,
    pub price_ranges_found: Vec<String>,
    pub previous_queries: Vec<String>,
}

fn dedup_first_seen(items: &[String]) -> Vec<&str> {
    let mut seen = HashSet::new();
    items
        .iter()
        .map(String::as_str)
        .filter(|s| seen.insert(*s))
        .collect()
}

impl JourneyContext {
    pub fn unique_products(&self) -> Vec<&str> {
        dedup_first_seen(&self.specific_products)
    }

    pub fn unique_comparisons(&self) -> Vec<&str> {
        dedup_first_seen(&self.comparisons_explored)
    }

    pub fn unique_price_ranges(&self) -> Vec<&str> {
        dedup_first_seen(&self.price_ranges_found)
    }

    /// 供提示词拼接的「已累积知识」段落；尚未发现任何产品时为空
    pub fn knowledge_section(&self) -> String {
        if self.specific_products.is_empty() {
            return String::new();
        }
        let or = |items: Vec<&str>, empty: &str| {
            if items.is_empty() {
                empty.to_string()
            } else {
                items.join(", ")
            }
        };
        format!(
            "## Accumulated knowledge\n- Products/brands discovered: {}\n- Comparisons explored: {}\n- Price ranges found: {}\n- Previous queries: {}\n",
            or(self.unique_products(), "none yet"),
            or(self.unique_comparisons(), "none yet"),
            or(self.unique_price_ranges(), "unknown"),
            self.previous_queries.join("; "),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_linear_progression() {
        let mut t = PhaseTracker::new(true);
        assert_eq!(t.current(), JourneyStage::Phase(JourneyPhase::Discovery));
        assert_eq!(t.record(JourneyPhase::Discovery), PhaseTransition::Advanced);
        assert_eq!(t.record(JourneyPhase::Consideration), PhaseTransition::Advanced);
        assert!(!t.all_complete());
        assert_eq!(t.record(JourneyPhase::Activation), PhaseTransition::Advanced);
        assert!(t.all_complete());
        assert_eq!(t.current(), JourneyStage::Complete);
    }

    #[test]
    fn test_out_of_order_rejected_when_enforced() {
        let mut t = PhaseTracker::new(true);
        assert_eq!(
            t.record(JourneyPhase::Activation),
            PhaseTransition::OutOfOrder {
                expected: JourneyPhase::Discovery
            }
        );
        assert!(!t.is_complete(JourneyPhase::Activation));
    }

    #[test]
    fn test_out_of_order_accepted_when_not_enforced() {
        let mut t = PhaseTracker::new(false);
        assert_eq!(t.record(JourneyPhase::Activation), PhaseTransition::Advanced);
        assert!(t.is_complete(JourneyPhase::Activation));
        assert!(!t.all_complete());
    }

    #[test]
    fn test_rerecord_is_idempotent() {
        let mut t = PhaseTracker::new(true);
        t.record(JourneyPhase::Discovery);
        assert_eq!(t.record(JourneyPhase::Discovery), PhaseTransition::AlreadyComplete);
        assert_eq!(t.completed().count(), 1);
    }

    #[test]
    fn test_stage_serialization() {
        assert_eq!(
            serde_json::to_value(JourneyPhase::Discovery.next()).unwrap(),
            "consideration"
        );
        assert_eq!(
            serde_json::to_value(JourneyPhase::Activation.next()).unwrap(),
            "complete"
        );
    }

    #[test]
    fn test_context_dedup_preserves_first_seen_order() {
        let ctx = JourneyContext {
            specific_products: vec!["B".into(), "A".into(), "B".into(), "C".into(), "A".into()],
            ..Default::default()
        };
        assert_eq!(ctx.unique_products(), vec!["B", "A", "C"]);
        assert_eq!(ctx.specific_products.len(), 5);
    }

    #[test]
    fn test_knowledge_section_empty_until_products() {
        let mut ctx = JourneyContext::default();
        ctx.previous_queries.push("q1".into());
        assert!(ctx.knowledge_section().is_empty());
        ctx.specific_products.push("Shun".into());
        let section = ctx.knowledge_section();
        assert!(section.contains("Shun"));
        assert!(section.contains("Price ranges found: unknown"));
        assert!(section.contains("q1"));
    }
}
