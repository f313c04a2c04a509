//! 提案合并
//!
//! 把各专家的提案去重、消解冲突后合成统一策略：
//! - 同一战术的不同表述按规范化语义键折叠，低优先级重复项的理由追加保留
//! - 直接冲突（同类别同主题、不同战术）按专家固定优先级裁决，
//!   败方完整记录在 superseded 中，绝不无痕丢弃

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use super::specialist::{RecommendationCategory, SpecialistKind, StrategyProposal};

/// 被裁决掉的建议（保留败方理由与裁决原因）
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SupersededRecommendation {
    pub specialist: SpecialistKind,
    pub tactic: String,
    pub rationale: String,
    pub reason: String,
}

/// 合并后的单条建议，可追溯到至少一个提案
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UnifiedRecommendation {
    pub category: RecommendationCategory,
    pub topic: String,
    pub tactic: String,
    pub rationale: String,
    pub sources: Vec<SpecialistKind>,
    pub superseded: Vec<SupersededRecommendation>,
}

/// 合并结果
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Strategy {
    pub title: String,
    pub unified_recommendations: Vec<UnifiedRecommendation>,
    pub contributing_specialists: Vec<SpecialistKind>,
}

fn normalize(text: &str) -> String {
    text.to_lowercase()
        .chars()
        .map(|c| if c.is_alphanumeric() { c } else { ' ' })
        .collect::<String>()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

/// 合并提案；调用方保证至少一个提案
pub fn merge_proposals(title: String, proposals: &[StrategyProposal]) -> Strategy {
    let mut ordered: Vec<&StrategyProposal> = proposals.iter().collect();
    ordered.sort_by_key(|p| p.specialist.priority());

    let mut unified: Vec<UnifiedRecommendation> = Vec::new();
    // (category, topic) → unified 下标
    let mut by_conflict_key: HashMap<(RecommendationCategory, String), usize> = HashMap::new();

    for proposal in &ordered {
        for rec in &proposal.recommendations {
            let conflict_key = (rec.category, normalize(&rec.topic));

            match by_conflict_key.get(&conflict_key) {
                Some(&idx) => {
                    let existing = &mut unified[idx];
                    if normalize(&existing.tactic) == normalize(&rec.tactic) {
                        // 同一战术的重复表述：折叠，理由追加
                        if !existing.sources.contains(&proposal.specialist) {
                            existing.sources.push(proposal.specialist);
                        }
                        if !rec.rationale.is_empty()
                            && !existing.rationale.contains(&rec.rationale)
                        {
                            existing.rationale.push_str(&format!(
                                " [{}] {}",
                                proposal.specialist.name(),
                                rec.rationale
                            ));
                        }
                    } else {
                        // 冲突：先到者优先级更高，败方记录在案
                        let winner = existing.sources[0];
                        existing.superseded.push(SupersededRecommendation {
                            specialist: proposal.specialist,
                            tactic: rec.tactic.clone(),
                            rationale: rec.rationale.clone(),
                            reason: format!(
                                "conflicts with the {} specialist's tactic for the same topic; \
                                 resolved by fixed specialist priority",
                                winner.name()
                            ),
                        });
                    }
                }
                None => {
                    by_conflict_key.insert(conflict_key, unified.len());
                    unified.push(UnifiedRecommendation {
                        category: rec.category,
                        topic: rec.topic.clone(),
                        tactic: rec.tactic.clone(),
                        rationale: rec.rationale.clone(),
                        sources: vec![proposal.specialist],
                        superseded: Vec::new(),
                    });
                }
            }
        }
    }

    Strategy {
        title,
        unified_recommendations: unified,
        contributing_specialists: ordered.iter().map(|p| p.specialist).collect(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::strategy::Recommendation;

    fn rec(
        category: RecommendationCategory,
        topic: &str,
        tactic: &str,
        rationale: &str,
    ) -> Recommendation {
        Recommendation {
            category,
            topic: topic.to_string(),
            tactic: tactic.to_string(),
            rationale: rationale.to_string(),
        }
    }

    fn proposal(specialist: SpecialistKind, recommendations: Vec<Recommendation>) -> StrategyProposal {
        StrategyProposal {
            specialist,
            recommendations,
            rationale: String::new(),
        }
    }

    #[test]
    fn test_conflict_resolved_by_growth_priority() {
        let content = proposal(
            SpecialistKind::Content,
            vec![rec(
                RecommendationCategory::PostingCadence,
                "feed posts",
                "post daily",
                "daily momentum builds the algorithm signal",
            )],
        );
        let growth = proposal(
            SpecialistKind::Growth,
            vec![rec(
                RecommendationCategory::PostingCadence,
                "feed posts",
                "post three times weekly",
                "sustainable cadence avoids burnout and reach decay",
            )],
        );

        // 输入顺序不影响结果：growth 永远赢
        let strategy = merge_proposals("t".into(), &[content.clone(), growth.clone()]);
        let unified = &strategy.unified_recommendations[0];
        assert_eq!(unified.tactic, "post three times weekly");
        assert_eq!(unified.sources, vec![SpecialistKind::Growth]);
        assert_eq!(unified.superseded.len(), 1);
        assert_eq!(unified.superseded[0].specialist, SpecialistKind::Content);
        assert!(unified.superseded[0].rationale.contains("momentum"));

        let strategy2 = merge_proposals("t".into(), &[growth, content]);
        assert_eq!(
            strategy2.unified_recommendations[0].tactic,
            "post three times weekly"
        );
    }

    #[test]
    fn test_duplicate_collapses_and_keeps_rationale() {
        let growth = proposal(
            SpecialistKind::Growth,
            vec![rec(
                RecommendationCategory::HashtagStrategy,
                "reach",
                "Use 12 niche hashtags",
                "mid-volume tags convert",
            )],
        );
        let engagement = proposal(
            SpecialistKind::Engagement,
            vec![rec(
                RecommendationCategory::HashtagStrategy,
                "reach",
                "use 12 niche hashtags!",
                "keeps comments relevant",
            )],
        );

        let strategy = merge_proposals("t".into(), &[growth, engagement]);
        assert_eq!(strategy.unified_recommendations.len(), 1);
        let unified = &strategy.unified_recommendations[0];
        assert_eq!(
            unified.sources,
            vec![SpecialistKind::Growth, SpecialistKind::Engagement]
        );
        assert!(unified.rationale.contains("mid-volume tags convert"));
        assert!(unified.rationale.contains("keeps comments relevant"));
        assert!(unified.superseded.is_empty());
    }

    #[test]
    fn test_every_unified_traces_to_a_proposal() {
        let proposals = vec![
            proposal(
                SpecialistKind::Funnel,
                vec![rec(
                    RecommendationCategory::LeadFunnel,
                    "profile",
                    "add lead magnet link",
                    "",
                )],
            ),
            proposal(
                SpecialistKind::Engagement,
                vec![rec(
                    RecommendationCategory::EngagementOutreach,
                    "peers",
                    "engage with 30 niche posts daily",
                    "",
                )],
            ),
        ];
        let strategy = merge_proposals("t".into(), &proposals);
        assert_eq!(strategy.unified_recommendations.len(), 2);
        for unified in &strategy.unified_recommendations {
            assert!(!unified.sources.is_empty());
        }
        // 贡献者按优先级排序
        assert_eq!(
            strategy.contributing_specialists,
            vec![SpecialistKind::Engagement, SpecialistKind::Funnel]
        );
    }

    #[test]
    fn test_normalize() {
        assert_eq!(normalize("Post Daily!"), normalize("post   daily"));
    }
}
