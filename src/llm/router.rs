//! 查询意图分类与模型路由
//!
//! 根据用户输入识别查询意图，用于两个门控：
//! - 调研缓存 TTL（闲聊可长缓存，趋势调研需要新鲜数据）
//! - 模型选择（分类/规划走轻量模型，策略合成走高能力模型）
//!
//! 分类器与路由器都是显式构造的注入依赖，不持有全局状态，测试中可直接替换。

use std::collections::HashMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// 查询意图（用于 TTL 与模型路由决策）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueryIntent {
    /// 闲聊/问候
    SimpleChat,
    /// 增长目标描述（粉丝数 / 周期）
    GrowthGoal,
    /// 领域趋势/话题调研
    NicheResearch,
    /// 竞品分析
    CompetitorAnalysis,
    /// 策略合成
    Strategy,
    /// 计划/日程
    Planning,
    /// 默认/未知
    General,
}

impl QueryIntent {
    /// 该意图下调研结果的缓存 TTL。
    /// 趋势类数据过期快，闲聊类几乎不变。
    pub fn cache_ttl(&self) -> Duration {
        let secs = match self {
            QueryIntent::SimpleChat => 86_400,
            QueryIntent::NicheResearch => 600,
            QueryIntent::CompetitorAnalysis => 1_800,
            QueryIntent::Strategy => 1_800,
            QueryIntent::GrowthGoal => 3_600,
            QueryIntent::Planning => 3_600,
            QueryIntent::General => 3_600,
        };
        Duration::from_secs(secs)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            QueryIntent::SimpleChat => "simple_chat",
            QueryIntent::GrowthGoal => "growth_goal",
            QueryIntent::NicheResearch => "niche_research",
            QueryIntent::CompetitorAnalysis => "competitor_analysis",
            QueryIntent::Strategy => "strategy",
            QueryIntent::Planning => "planning",
            QueryIntent::General => "general",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "simple_chat" => Some(QueryIntent::SimpleChat),
            "growth_goal" => Some(QueryIntent::GrowthGoal),
            "niche_research" => Some(QueryIntent::NicheResearch),
            "competitor_analysis" => Some(QueryIntent::CompetitorAnalysis),
            "strategy" => Some(QueryIntent::Strategy),
            "planning" => Some(QueryIntent::Planning),
            "general" => Some(QueryIntent::General),
            _ => None,
        }
    }
}

/// 意图分类器：关键词快速匹配，不调用 LLM
pub struct IntentClassifier;

impl IntentClassifier {
    pub fn new() -> Self {
        Self
    }

    /// 识别查询意图
    pub fn classify(&self, input: &str) -> QueryIntent {
        let lower = input.trim().to_lowercase();

        if lower.len() < 40
            && ["hi", "hello", "hey", "thanks", "thank you", "good morning"]
                .iter()
                .any(|g| lower == *g || lower.starts_with(&format!("{} ", g)))
        {
            return QueryIntent::SimpleChat;
        }

        if lower.contains("competitor") || lower.contains("competition") {
            return QueryIntent::CompetitorAnalysis;
        }

        if Self::contains_growth_keywords(&lower) {
            return QueryIntent::GrowthGoal;
        }

        if Self::contains_research_keywords(&lower) {
            return QueryIntent::NicheResearch;
        }

        if Self::contains_planning_keywords(&lower) {
            return QueryIntent::Planning;
        }

        QueryIntent::General
    }

    fn contains_growth_keywords(content: &str) -> bool {
        let has_goal_words = ["grow", "followers", "follower", "audience", "reach"]
            .iter()
            .any(|k| content.contains(k));
        has_goal_words && content.chars().any(|c| c.is_ascii_digit())
    }

    fn contains_research_keywords(content: &str) -> bool {
        [
            "hashtag", "trend", "trending", "research", "best time", "what works", "viral",
        ]
        .iter()
        .any(|k| content.contains(k))
    }

    fn contains_planning_keywords(content: &str) -> bool {
        ["plan", "schedule", "calendar", "timeline", "roadmap"]
            .iter()
            .any(|k| content.contains(k))
    }
}

impl Default for IntentClassifier {
    fn default() -> Self {
        Self::new()
    }
}

/// 模型路由器：意图 → 模型标识的纯函数映射，可由配置覆盖
pub struct ModelRouter {
    routes: HashMap<QueryIntent, String>,
    default_model: String,
}

impl ModelRouter {
    /// 默认路由：分类/规划走轻量免费模型，策略与增长目标走高能力模型，调研走中型模型
    pub fn new() -> Self {
        let mut routes = HashMap::new();
        routes.insert(
            QueryIntent::SimpleChat,
            "deepseek/deepseek-chat-v3.1:free".to_string(),
        );
        routes.insert(
            QueryIntent::Planning,
            "deepseek/deepseek-chat-v3.1:free".to_string(),
        );
        routes.insert(QueryIntent::NicheResearch, "microsoft/phi-4".to_string());
        routes.insert(
            QueryIntent::CompetitorAnalysis,
            "microsoft/phi-4".to_string(),
        );
        routes.insert(
            QueryIntent::GrowthGoal,
            "moonshotai/kimi-k2-0905".to_string(),
        );
        routes.insert(
            QueryIntent::Strategy,
            "moonshotai/kimi-k2-0905".to_string(),
        );
        Self {
            routes,
            default_model: "deepseek/deepseek-chat-v3.1:free".to_string(),
        }
    }

    /// 应用配置覆盖（键为意图的 snake_case 名）
    pub fn with_overrides(mut self, overrides: &HashMap<String, String>) -> Self {
        for (key, model) in overrides {
            match QueryIntent::parse(key) {
                Some(intent) => {
                    self.routes.insert(intent, model.clone());
                }
                None => tracing::warn!("unknown model route key in config: {}", key),
            }
        }
        self
    }

    pub fn model_for(&self, intent: QueryIntent) -> &str {
        self.routes
            .get(&intent)
            .map(String::as_str)
            .unwrap_or(&self.default_model)
    }
}

impl Default for ModelRouter {
    fn default() -> Self {
        Self::new()
    }
}
