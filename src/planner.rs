//! 执行计划器
//!
//! 策略 → 有序任务列表的确定性转换：固定的建议类别 → 任务类别映射表，
//! 调研/分析类任务排前（为后续任务前置数据），其余任务在周期内均匀铺开，
//! 并保证最小间隔避免同刻聚集。无网络与 LLM 调用。

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::session::GoalContext;
use crate::strategy::{RecommendationCategory, Strategy};

/// 任务类别：与安全过滤器共享的封闭集合。
/// 计划器产出的每个任务类别都必须出自这里，派发前无未知类别。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TaskCategory {
    EngagementLike,
    EngagementFollow,
    HashtagResearch,
    AudienceResearch,
    AnalyticsPull,
    ContentPosting,
    DirectMessage,
}

impl TaskCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskCategory::EngagementLike => "engagement-like",
            TaskCategory::EngagementFollow => "engagement-follow",
            TaskCategory::HashtagResearch => "hashtag-research",
            TaskCategory::AudienceResearch => "audience-research",
            TaskCategory::AnalyticsPull => "analytics-pull",
            TaskCategory::ContentPosting => "content-posting",
            TaskCategory::DirectMessage => "direct-message",
        }
    }

    /// 调研/分析类任务：排在计划最前，为后续任务前置数据
    fn is_front_loaded(&self) -> bool {
        matches!(
            self,
            TaskCategory::HashtagResearch
                | TaskCategory::AudienceResearch
                | TaskCategory::AnalyticsPull
        )
    }
}

/// 单个可派发任务
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    pub task_id: String,
    pub category: TaskCategory,
    /// 距计划开始的偏移（分钟）
    pub scheduled_offset_minutes: u64,
    pub parameters: serde_json::Value,
}

/// 有序任务计划
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionPlan {
    pub tasks: Vec<Task>,
    pub timeframe_days: u32,
    pub created_at: DateTime<Utc>,
}

impl ExecutionPlan {
    /// 粗略完成时间估计（按任务量）
    pub fn estimated_completion(&self) -> String {
        let half_hours = self.tasks.len() as u64;
        let minutes = half_hours * 30;
        if minutes < 60 {
            format!("{} minutes", minutes)
        } else if minutes < 24 * 60 {
            format!("{} hours", minutes / 60)
        } else {
            format!("{} days", minutes / (24 * 60))
        }
    }
}

#[derive(Debug, Clone)]
pub struct PlannerConfig {
    /// 相邻任务的最小间隔（分钟）
    pub min_spacing_minutes: u64,
}

impl Default for PlannerConfig {
    fn default() -> Self {
        Self {
            min_spacing_minutes: 45,
        }
    }
}

/// 计划器：纯数据转换
pub struct ExecutionPlanner {
    cfg: PlannerConfig,
}

/// 建议类别 → 任务类别的固定映射表
fn task_categories(category: RecommendationCategory) -> &'static [TaskCategory] {
    match category {
        RecommendationCategory::EngagementOutreach => {
            &[TaskCategory::EngagementLike, TaskCategory::EngagementFollow]
        }
        RecommendationCategory::CommunityBuilding => &[TaskCategory::EngagementLike],
        RecommendationCategory::HashtagStrategy => &[TaskCategory::HashtagResearch],
        RecommendationCategory::AudienceTargeting => &[TaskCategory::AudienceResearch],
        RecommendationCategory::AnalyticsReview => &[TaskCategory::AnalyticsPull],
        RecommendationCategory::PostingCadence | RecommendationCategory::ContentFormat => {
            &[TaskCategory::ContentPosting]
        }
        RecommendationCategory::LeadFunnel => {
            &[TaskCategory::AudienceResearch, TaskCategory::DirectMessage]
        }
        RecommendationCategory::DirectOutreach => &[TaskCategory::DirectMessage],
    }
}

/// 参与类任务的默认日限额
fn default_daily_limit(category: TaskCategory) -> Option<u64> {
    match category {
        TaskCategory::EngagementLike => Some(50),
        TaskCategory::EngagementFollow => Some(20),
        TaskCategory::DirectMessage => Some(5),
        _ => None,
    }
}

impl ExecutionPlanner {
    pub fn new(cfg: PlannerConfig) -> Self {
        Self { cfg }
    }

    pub fn plan(&self, strategy: &Strategy, context: &GoalContext) -> ExecutionPlan {
        let timeframe_days = context.timeframe_days.unwrap_or(30);

        let mut front = Vec::new();
        let mut rest = Vec::new();
        for rec in &strategy.unified_recommendations {
            for &category in task_categories(rec.category) {
                let mut parameters = serde_json::json!({
                    "topic": rec.topic,
                    "tactic": rec.tactic,
                    "specialists": rec.sources.iter().map(|s| s.name()).collect::<Vec<_>>(),
                });
                if let Some(limit) = default_daily_limit(category) {
                    parameters["daily_limit"] = serde_json::json!(limit);
                }
                if let Some(niche) = &context.niche {
                    parameters["niche"] = serde_json::json!(niche);
                }

                let task = Task {
                    task_id: format!("task_{}", uuid::Uuid::new_v4()),
                    category,
                    scheduled_offset_minutes: 0,
                    parameters,
                };
                if category.is_front_loaded() {
                    front.push(task);
                } else {
                    rest.push(task);
                }
            }
        }

        let mut tasks = front;
        tasks.append(&mut rest);

        // 周期内均匀铺开，同时托底最小间隔
        let total = tasks.len() as u64;
        if total > 0 {
            let timeframe_minutes = timeframe_days as u64 * 24 * 60;
            let step = (timeframe_minutes / total).max(self.cfg.min_spacing_minutes);
            for (i, task) in tasks.iter_mut().enumerate() {
                task.scheduled_offset_minutes = i as u64 * step;
            }
        }

        tracing::debug!(
            "planned {} tasks over {} days",
            tasks.len(),
            timeframe_days
        );

        ExecutionPlan {
            tasks,
            timeframe_days,
            created_at: Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::strategy::{SpecialistKind, UnifiedRecommendation};

    fn unified(category: RecommendationCategory, topic: &str) -> UnifiedRecommendation {
        UnifiedRecommendation {
            category,
            topic: topic.to_string(),
            tactic: "do the thing".to_string(),
            rationale: String::new(),
            sources: vec![SpecialistKind::Growth],
            superseded: vec![],
        }
    }

    fn strategy(recs: Vec<UnifiedRecommendation>) -> Strategy {
        Strategy {
            title: "t".to_string(),
            unified_recommendations: recs,
            contributing_specialists: vec![SpecialistKind::Growth],
        }
    }

    fn context_60_days() -> GoalContext {
        let mut ctx = GoalContext::default();
        ctx.absorb("fitness from 500 to 5000 followers in 60 days");
        ctx
    }

    #[test]
    fn test_mapping_table() {
        let plan = ExecutionPlanner::new(PlannerConfig::default()).plan(
            &strategy(vec![
                unified(RecommendationCategory::EngagementOutreach, "peers"),
                unified(RecommendationCategory::HashtagStrategy, "reach"),
            ]),
            &context_60_days(),
        );
        let categories: Vec<TaskCategory> = plan.tasks.iter().map(|t| t.category).collect();
        assert!(categories.contains(&TaskCategory::EngagementLike));
        assert!(categories.contains(&TaskCategory::EngagementFollow));
        assert!(categories.contains(&TaskCategory::HashtagResearch));
    }

    #[test]
    fn test_research_tasks_first() {
        let plan = ExecutionPlanner::new(PlannerConfig::default()).plan(
            &strategy(vec![
                unified(RecommendationCategory::PostingCadence, "feed"),
                unified(RecommendationCategory::AudienceTargeting, "audience"),
                unified(RecommendationCategory::AnalyticsReview, "weekly"),
            ]),
            &context_60_days(),
        );
        assert_eq!(plan.tasks[0].category, TaskCategory::AudienceResearch);
        assert_eq!(plan.tasks[1].category, TaskCategory::AnalyticsPull);
        assert_eq!(plan.tasks[2].category, TaskCategory::ContentPosting);
    }

    #[test]
    fn test_offsets_spread_with_spacing_floor() {
        let cfg = PlannerConfig {
            min_spacing_minutes: 45,
        };
        let recs = (0..6)
            .map(|i| unified(RecommendationCategory::CommunityBuilding, &format!("t{}", i)))
            .collect();
        let plan = ExecutionPlanner::new(cfg).plan(&strategy(recs), &context_60_days());

        let offsets: Vec<u64> = plan
            .tasks
            .iter()
            .map(|t| t.scheduled_offset_minutes)
            .collect();
        for pair in offsets.windows(2) {
            assert!(pair[1] - pair[0] >= 45);
        }
        assert_eq!(offsets[0], 0);
        // 均匀分布：60 天 / 6 任务 = 14400 分钟步长
        assert_eq!(offsets[1], 14400);
    }

    #[test]
    fn test_lead_funnel_emits_direct_message() {
        let plan = ExecutionPlanner::new(PlannerConfig::default()).plan(
            &strategy(vec![unified(RecommendationCategory::LeadFunnel, "profile")]),
            &context_60_days(),
        );
        assert!(plan
            .tasks
            .iter()
            .any(|t| t.category == TaskCategory::DirectMessage));
    }

    #[test]
    fn test_engagement_tasks_carry_daily_limit() {
        let plan = ExecutionPlanner::new(PlannerConfig::default()).plan(
            &strategy(vec![unified(
                RecommendationCategory::EngagementOutreach,
                "peers",
            )]),
            &context_60_days(),
        );
        let like = plan
            .tasks
            .iter()
            .find(|t| t.category == TaskCategory::EngagementLike)
            .unwrap();
        assert_eq!(like.parameters["daily_limit"], 50);
    }

    #[test]
    fn test_estimated_completion() {
        let plan = ExecutionPlan {
            tasks: vec![],
            timeframe_days: 30,
            created_at: Utc::now(),
        };
        assert_eq!(plan.estimated_completion(), "0 minutes");
    }
}
