//! 策略专家评估
//!
//! 四类专家（growth / engagement / content / funnel）是封闭集合，
//! 共用一个评估入口：给定目标上下文与调研结果，产出结构化建议提案。
//! 每个专家独立、可并行、LLM 驱动；单个失败只会缺席合并，不拖垮合成。

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::llm::{ChatRequest, LlmClient, LlmError, Message, ModelRouter, QueryIntent};
use crate::research::ResearchResult;
use crate::session::GoalContext;

/// 专家类型（封闭集合）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SpecialistKind {
    Growth,
    Engagement,
    Content,
    Funnel,
}

impl SpecialistKind {
    pub const ALL: [SpecialistKind; 4] = [
        SpecialistKind::Growth,
        SpecialistKind::Engagement,
        SpecialistKind::Content,
        SpecialistKind::Funnel,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            SpecialistKind::Growth => "growth",
            SpecialistKind::Engagement => "engagement",
            SpecialistKind::Content => "content",
            SpecialistKind::Funnel => "funnel",
        }
    }

    /// 合并冲突时的固定全序，数值小者胜：growth > engagement > content > funnel。
    /// 账号健康类建议必须压过更窄的战术建议。
    pub fn priority(&self) -> u8 {
        match self {
            SpecialistKind::Growth => 0,
            SpecialistKind::Engagement => 1,
            SpecialistKind::Content => 2,
            SpecialistKind::Funnel => 3,
        }
    }

    fn role_prompt(&self) -> &'static str {
        match self {
            SpecialistKind::Growth => {
                "You are a growth strategy expert. Design sustainable, compliant account growth \
                 tactics: audience targeting, collaboration angles, safe automation limits, and \
                 analytics checkpoints."
            }
            SpecialistKind::Engagement => {
                "You are an engagement expert. Design hashtag strategy, community interaction \
                 tactics, and algorithm-friendly engagement routines."
            }
            SpecialistKind::Content => {
                "You are a content strategy expert. Design content pillars, formats, and a \
                 posting cadence tailored to the niche."
            }
            SpecialistKind::Funnel => {
                "You are a funnel architecture expert. Design audience-to-lead paths: profile \
                 optimization, lead magnets, and outreach sequencing."
            }
        }
    }
}

/// 建议类别（封闭集合，计划器据此映射任务）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecommendationCategory {
    PostingCadence,
    ContentFormat,
    HashtagStrategy,
    AudienceTargeting,
    EngagementOutreach,
    CommunityBuilding,
    AnalyticsReview,
    LeadFunnel,
    DirectOutreach,
}

impl RecommendationCategory {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "posting_cadence" => Some(Self::PostingCadence),
            "content_format" => Some(Self::ContentFormat),
            "hashtag_strategy" => Some(Self::HashtagStrategy),
            "audience_targeting" => Some(Self::AudienceTargeting),
            "engagement_outreach" => Some(Self::EngagementOutreach),
            "community_building" => Some(Self::CommunityBuilding),
            "analytics_review" => Some(Self::AnalyticsReview),
            "lead_funnel" => Some(Self::LeadFunnel),
            "direct_outreach" => Some(Self::DirectOutreach),
            _ => None,
        }
    }
}

/// 单条类型化建议
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Recommendation {
    pub category: RecommendationCategory,
    /// 建议针对的主题（冲突判定的一部分，如 "reels"、"weekly posts"）
    pub topic: String,
    pub tactic: String,
    pub rationale: String,
}

/// 一位专家的完整提案
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StrategyProposal {
    pub specialist: SpecialistKind,
    pub recommendations: Vec<Recommendation>,
    pub rationale: String,
}

#[derive(Debug, Error)]
pub enum SpecialistError {
    #[error("llm call failed: {0}")]
    Llm(#[from] LlmError),

    #[error("unparseable specialist output: {0}")]
    Parse(String),

    #[error("specialist returned no usable recommendations")]
    Empty,
}

/// LLM 原始输出的宽松负载（未知类别在映射时丢弃）
#[derive(Deserialize)]
struct RecommendationPayload {
    category: String,
    #[serde(default)]
    topic: String,
    tactic: String,
    #[serde(default)]
    rationale: String,
}

/// 专家评估器：一个能力接口覆盖全部专家类型
pub struct SpecialistEvaluator {
    llm: Arc<dyn LlmClient>,
    router: Arc<ModelRouter>,
}

impl SpecialistEvaluator {
    pub fn new(llm: Arc<dyn LlmClient>, router: Arc<ModelRouter>) -> Self {
        Self { llm, router }
    }

    pub async fn evaluate(
        &self,
        kind: SpecialistKind,
        context: &GoalContext,
        research: &ResearchResult,
    ) -> Result<StrategyProposal, SpecialistError> {
        let system = format!(
            "{}\n\nRespond with a JSON array only, no prose. Each element:\n\
             {{\"category\": one of [posting_cadence, content_format, hashtag_strategy, \
             audience_targeting, engagement_outreach, community_building, analytics_review, \
             lead_funnel, direct_outreach], \"topic\": \"what it applies to\", \
             \"tactic\": \"the concrete action\", \"rationale\": \"why\"}}",
            kind.role_prompt()
        );
        let user = format!(
            "USER CONTEXT: {}\n\nRESEARCH INSIGHTS:\n{}\n\n\
             Produce 2-5 recommendations grounded in the research.",
            context.summary(),
            research.synthesized_summary
        );

        let model = self.router.model_for(QueryIntent::Strategy);
        let request = ChatRequest::new(model, vec![Message::system(system), Message::user(user)]);
        let output = self.llm.complete(request).await?;

        let payloads = parse_recommendation_array(&output)?;
        let recommendations: Vec<Recommendation> = payloads
            .into_iter()
            .filter_map(|p| match RecommendationCategory::parse(&p.category) {
                Some(category) => Some(Recommendation {
                    category,
                    topic: p.topic,
                    tactic: p.tactic,
                    rationale: p.rationale,
                }),
                None => {
                    tracing::debug!(
                        "specialist {} produced unknown category {:?}, dropping",
                        kind.name(),
                        p.category
                    );
                    None
                }
            })
            .collect();

        if recommendations.is_empty() {
            return Err(SpecialistError::Empty);
        }

        Ok(StrategyProposal {
            specialist: kind,
            recommendations,
            rationale: format!("{} specialist evaluation", kind.name()),
        })
    }
}

/// 从可能夹杂提示文字的输出中抠出首个 JSON 数组并解析
fn parse_recommendation_array(output: &str) -> Result<Vec<RecommendationPayload>, SpecialistError> {
    let start = output
        .find('[')
        .ok_or_else(|| SpecialistError::Parse("no json array in output".to_string()))?;
    let end = output
        .rfind(']')
        .ok_or_else(|| SpecialistError::Parse("unterminated json array".to_string()))?;
    if end <= start {
        return Err(SpecialistError::Parse("malformed json array".to_string()));
    }
    serde_json::from_str(&output[start..=end]).map_err(|e| SpecialistError::Parse(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::MockLlmClient;
    use crate::research::fingerprint;
    use chrono::Utc;

    fn sample_research() -> ResearchResult {
        ResearchResult {
            query_fingerprint: fingerprint("q"),
            insights: vec![],
            degraded: false,
            synthesized_summary: "- [tavily] reels outperform photos".to_string(),
            retrieved_at: Utc::now(),
        }
    }

    fn sample_context() -> GoalContext {
        let mut ctx = GoalContext::default();
        ctx.absorb("fitness account from 500 to 5000 followers in 60 days");
        ctx
    }

    const VALID_JSON: &str = r#"Here is my plan:
[
  {"category": "posting_cadence", "topic": "feed posts", "tactic": "post daily", "rationale": "momentum"},
  {"category": "hashtag_strategy", "topic": "reach", "tactic": "use 12 niche hashtags", "rationale": "relevance"}
]"#;

    #[tokio::test]
    async fn test_evaluate_parses_recommendations() {
        let evaluator = SpecialistEvaluator::new(
            Arc::new(MockLlmClient::with_response(VALID_JSON)),
            Arc::new(ModelRouter::new()),
        );
        let proposal = evaluator
            .evaluate(SpecialistKind::Content, &sample_context(), &sample_research())
            .await
            .unwrap();
        assert_eq!(proposal.specialist, SpecialistKind::Content);
        assert_eq!(proposal.recommendations.len(), 2);
        assert_eq!(
            proposal.recommendations[0].category,
            RecommendationCategory::PostingCadence
        );
    }

    #[tokio::test]
    async fn test_evaluate_unknown_categories_dropped() {
        let json = r#"[{"category": "mystery", "topic": "x", "tactic": "y", "rationale": ""},
                       {"category": "analytics_review", "topic": "weekly", "tactic": "review metrics", "rationale": ""}]"#;
        let evaluator = SpecialistEvaluator::new(
            Arc::new(MockLlmClient::with_response(json)),
            Arc::new(ModelRouter::new()),
        );
        let proposal = evaluator
            .evaluate(SpecialistKind::Growth, &sample_context(), &sample_research())
            .await
            .unwrap();
        assert_eq!(proposal.recommendations.len(), 1);
    }

    #[tokio::test]
    async fn test_evaluate_llm_failure_propagates() {
        let evaluator = SpecialistEvaluator::new(
            Arc::new(MockLlmClient::failing()),
            Arc::new(ModelRouter::new()),
        );
        let err = evaluator
            .evaluate(SpecialistKind::Funnel, &sample_context(), &sample_research())
            .await
            .unwrap_err();
        assert!(matches!(err, SpecialistError::Llm(_)));
    }

    #[test]
    fn test_parse_rejects_prose_only() {
        assert!(parse_recommendation_array("I think you should post more").is_err());
    }

    #[test]
    fn test_priority_total_order() {
        assert!(SpecialistKind::Growth.priority() < SpecialistKind::Engagement.priority());
        assert!(SpecialistKind::Engagement.priority() < SpecialistKind::Content.priority());
        assert!(SpecialistKind::Content.priority() < SpecialistKind::Funnel.priority());
    }
}
