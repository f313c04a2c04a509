//! 策略合成层：专家评估 + 提案合并

use std::sync::Arc;

use futures_util::future::join_all;
use thiserror::Error;

use crate::llm::{LlmClient, ModelRouter};
use crate::research::ResearchResult;
use crate::session::GoalContext;

pub mod merge;
pub mod specialist;

pub use merge::{merge_proposals, Strategy, SupersededRecommendation, UnifiedRecommendation};
pub use specialist::{
    Recommendation, RecommendationCategory, SpecialistError, SpecialistEvaluator, SpecialistKind,
    StrategyProposal,
};

#[derive(Debug, Error)]
pub enum StrategyError {
    /// 全部专家失败，本轮无法产出策略（调用方可重试）
    #[error("no specialist returned a usable proposal")]
    Unavailable,
}

/// 策略合成引擎：并行运行全部专家并合并
pub struct StrategyEngine {
    evaluator: SpecialistEvaluator,
}

impl StrategyEngine {
    pub fn new(llm: Arc<dyn LlmClient>, router: Arc<ModelRouter>) -> Self {
        Self {
            evaluator: SpecialistEvaluator::new(llm, router),
        }
    }

    pub async fn synthesize(
        &self,
        context: &GoalContext,
        research: &ResearchResult,
    ) -> Result<Strategy, StrategyError> {
        let evaluations = SpecialistKind::ALL.iter().map(|kind| async move {
            (*kind, self.evaluator.evaluate(*kind, context, research).await)
        });

        let mut proposals = Vec::new();
        for (kind, outcome) in join_all(evaluations).await {
            match outcome {
                Ok(proposal) => proposals.push(proposal),
                Err(e) => tracing::warn!("specialist {} omitted from merge: {}", kind.name(), e),
            }
        }

        if proposals.is_empty() {
            return Err(StrategyError::Unavailable);
        }

        let niche = context.niche.as_deref().unwrap_or("account");
        let title = format!("{} growth strategy", niche);
        tracing::info!(
            "synthesized strategy from {}/{} specialists",
            proposals.len(),
            SpecialistKind::ALL.len()
        );
        Ok(merge_proposals(title, &proposals))
    }
}
