//! 任务安全过滤
//!
//! 派发前的唯一管控点：任务类别对照固定允许/拒绝清单，默认拒绝。
//! 新任务类别必须显式审核后加入允许清单才能到达自动化后端。
//! 缓存回放的计划也要重新过滤，策略可独立于计划变化。

use serde::{Deserialize, Serialize};

use crate::planner::{Task, TaskCategory};

/// 允许自动执行的任务类别
pub const ALLOWED_CATEGORIES: [TaskCategory; 5] = [
    TaskCategory::EngagementLike,
    TaskCategory::EngagementFollow,
    TaskCategory::HashtagResearch,
    TaskCategory::AudienceResearch,
    TaskCategory::AnalyticsPull,
];

/// 被过滤掉的任务及原因
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RejectedTask {
    pub task: Task,
    pub reason: String,
}

/// 过滤统计摘要
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SafetyReport {
    pub total: usize,
    pub allowed: usize,
    pub rejected: usize,
    pub rejected_categories: Vec<String>,
}

/// 安全过滤器：Task.category 上的纯谓词
#[derive(Debug, Default, Clone)]
pub struct SafetyFilter;

impl SafetyFilter {
    pub fn new() -> Self {
        Self
    }

    /// 返回拒绝原因；None 表示允许
    fn verdict(category: TaskCategory) -> Option<&'static str> {
        match category {
            TaskCategory::DirectMessage => {
                Some("direct-message automation is permanently denied")
            }
            TaskCategory::ContentPosting => {
                Some("content publishing requires manual review, never automated")
            }
            c if ALLOWED_CATEGORIES.contains(&c) => None,
            _ => Some("category is not on the explicit allow list"),
        }
    }

    /// 过滤任务：输入顺序不影响判定，逐任务独立
    pub fn filter(&self, tasks: Vec<Task>) -> (Vec<Task>, Vec<RejectedTask>) {
        let mut allowed = Vec::new();
        let mut rejected = Vec::new();

        for task in tasks {
            match Self::verdict(task.category) {
                None => allowed.push(task),
                Some(reason) => {
                    tracing::warn!(
                        "policy violation: task {} ({}) rejected: {}",
                        task.task_id,
                        task.category.as_str(),
                        reason
                    );
                    rejected.push(RejectedTask {
                        task,
                        reason: reason.to_string(),
                    });
                }
            }
        }

        tracing::info!(
            "safety filter: {} allowed, {} rejected",
            allowed.len(),
            rejected.len()
        );
        (allowed, rejected)
    }

    pub fn report(&self, tasks: &[Task]) -> SafetyReport {
        let total = tasks.len();
        let mut rejected_categories: Vec<String> = tasks
            .iter()
            .filter(|t| Self::verdict(t.category).is_some())
            .map(|t| t.category.as_str().to_string())
            .collect();
        rejected_categories.sort();
        rejected_categories.dedup();
        let rejected = tasks
            .iter()
            .filter(|t| Self::verdict(t.category).is_some())
            .count();

        SafetyReport {
            total,
            allowed: total - rejected,
            rejected,
            rejected_categories,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn task(category: TaskCategory) -> Task {
        Task {
            task_id: format!("task_{}", uuid::Uuid::new_v4()),
            category,
            scheduled_offset_minutes: 0,
            parameters: json!({}),
        }
    }

    #[test]
    fn test_deny_list_always_rejected_any_order() {
        let filter = SafetyFilter::new();
        let forward = vec![
            task(TaskCategory::EngagementLike),
            task(TaskCategory::DirectMessage),
            task(TaskCategory::ContentPosting),
            task(TaskCategory::AnalyticsPull),
        ];
        let mut reversed = forward.clone();
        reversed.reverse();

        for input in [forward, reversed] {
            let (allowed, rejected) = filter.filter(input);
            assert_eq!(allowed.len(), 2);
            assert_eq!(rejected.len(), 2);
            assert!(rejected
                .iter()
                .any(|r| r.task.category == TaskCategory::DirectMessage && !r.reason.is_empty()));
            assert!(!allowed
                .iter()
                .any(|t| t.category == TaskCategory::DirectMessage));
        }
    }

    #[test]
    fn test_all_allow_list_categories_pass() {
        let filter = SafetyFilter::new();
        let (allowed, rejected) =
            filter.filter(ALLOWED_CATEGORIES.iter().map(|c| task(*c)).collect());
        assert_eq!(allowed.len(), ALLOWED_CATEGORIES.len());
        assert!(rejected.is_empty());
    }

    #[test]
    fn test_report_counts() {
        let filter = SafetyFilter::new();
        let tasks = vec![
            task(TaskCategory::EngagementFollow),
            task(TaskCategory::DirectMessage),
            task(TaskCategory::DirectMessage),
        ];
        let report = filter.report(&tasks);
        assert_eq!(report.total, 3);
        assert_eq!(report.allowed, 1);
        assert_eq!(report.rejected, 2);
        assert_eq!(report.rejected_categories, vec!["direct-message"]);
    }
}
