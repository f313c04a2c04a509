//! 目标上下文抽取
//!
//! 从用户的自然语言输入中累积增长目标属性：领域、当前/目标粉丝数、
//! 周期、受众、经验水平。纯正则与关键词表，不调用 LLM；
//! 同一会话多轮输入逐步补全，后到的值覆盖先到的。

use std::sync::OnceLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

/// 经验水平（影响回复语气与计划密度）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ExperienceLevel {
    Beginner,
    #[default]
    Intermediate,
    Advanced,
}

/// 累积的目标上下文
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct GoalContext {
    pub niche: Option<String>,
    pub current_followers: Option<u64>,
    pub target_followers: Option<u64>,
    pub timeframe_days: Option<u32>,
    pub audience: Option<String>,
    pub experience: ExperienceLevel,
    pub constraints: Vec<String>,
}

fn range_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?i)from\s*([\d,]+k?)\s*(?:followers?)?\s*to\s*([\d,]+k?)").unwrap()
    })
}

fn target_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?i)(?:reach|grow to|get to|hit|want)\s+([\d,]+k?)\s*(?:followers?|subs?)")
            .unwrap()
    })
}

fn current_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?i)(?:have|currently at|currently|sitting at|at)\s+([\d,]+k?)\s*followers?")
            .unwrap()
    })
}

fn timeframe_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?i)(\d{1,4})\s*(day|week|month)s?").unwrap())
}

fn percent_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(\d{1,3})\s*%").unwrap())
}

fn niche_phrase_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?i)(?:in|for)\s+(?:the\s+)?([a-z][a-z\- ]{2,30}?)\s+(?:space|niche|industry)")
            .unwrap()
    })
}

/// "5k" / "1,200" → 数值
fn parse_count(raw: &str) -> Option<u64> {
    let cleaned = raw.trim().to_lowercase().replace(',', "");
    if let Some(stripped) = cleaned.strip_suffix('k') {
        stripped.parse::<u64>().ok().map(|n| n * 1000)
    } else {
        cleaned.parse::<u64>().ok()
    }
}

const NICHE_KEYWORDS: [(&str, &[&str]); 9] = [
    ("fitness", &["fitness", "gym", "workout", "training"]),
    ("breathwork", &["breathwork", "breathing exercises"]),
    ("wellness", &["wellness", "mindfulness", "meditation", "yoga"]),
    ("nutrition", &["nutrition", "diet", "nutritionist"]),
    (
        "business",
        &["business", "entrepreneur", "coaching", "consulting", "startup"],
    ),
    ("fashion", &["fashion", "style", "beauty", "makeup"]),
    ("food", &["food", "recipe", "cooking", "chef"]),
    ("travel", &["travel", "destination"]),
    ("tech", &["tech", "software", "coding", "saas"]),
];

const AUDIENCE_KEYWORDS: [(&str, &[&str]); 5] = [
    (
        "entrepreneurs",
        &["entrepreneur", "founder", "business owner"],
    ),
    ("professionals", &["professional", "executive", "corporate"]),
    ("parents", &["parent", "moms", "dads", "families"]),
    ("students", &["student", "university", "graduate"]),
    ("beginners", &["newcomers", "people starting out"]),
];

const BEGINNER_INDICATORS: [&str; 6] = [
    "new to",
    "just started",
    "beginner",
    "no idea",
    "never done",
    "getting started",
];

const ADVANCED_INDICATORS: [&str; 6] = [
    "scale",
    "optimize",
    "advanced",
    "experienced",
    "established",
    "been doing",
];

impl GoalContext {
    /// 吸收一条用户输入，补全/覆盖已知字段
    pub fn absorb(&mut self, input: &str) {
        let lower = input.to_lowercase();

        if let Some(caps) = range_re().captures(input) {
            if let (Some(current), Some(target)) =
                (parse_count(&caps[1]), parse_count(&caps[2]))
            {
                self.current_followers = Some(current);
                self.target_followers = Some(target);
            }
        } else {
            if let Some(caps) = current_re().captures(input) {
                if let Some(current) = parse_count(&caps[1]) {
                    self.current_followers = Some(current);
                }
            }
            if let Some(caps) = target_re().captures(input) {
                if let Some(target) = parse_count(&caps[1]) {
                    self.target_followers = Some(target);
                }
            }
        }

        // 百分比目标只有在已知当前粉丝数时才能换算
        if self.target_followers.is_none() {
            if let (Some(current), Some(caps)) =
                (self.current_followers, percent_re().captures(input))
            {
                if let Ok(pct) = caps[1].parse::<u64>() {
                    self.target_followers = Some(current + current * pct / 100);
                }
            }
        }

        if let Some(caps) = timeframe_re().captures(input) {
            if let Ok(n) = caps[1].parse::<u32>() {
                let days = match caps[2].to_lowercase().as_str() {
                    "week" => n.saturating_mul(7),
                    "month" => n.saturating_mul(30),
                    _ => n,
                };
                if days > 0 {
                    self.timeframe_days = Some(days);
                }
            }
        }

        if let Some(caps) = niche_phrase_re().captures(input) {
            self.niche = Some(caps[1].trim().to_lowercase());
        } else {
            for (niche, keywords) in NICHE_KEYWORDS {
                if keywords.iter().any(|k| lower.contains(k)) {
                    self.niche = Some(niche.to_string());
                    break;
                }
            }
        }

        for (audience, keywords) in AUDIENCE_KEYWORDS {
            if keywords.iter().any(|k| lower.contains(k)) {
                self.audience = Some(audience.to_string());
                break;
            }
        }

        let beginner = BEGINNER_INDICATORS
            .iter()
            .filter(|k| lower.contains(*k))
            .count();
        let advanced = ADVANCED_INDICATORS
            .iter()
            .filter(|k| lower.contains(*k))
            .count();
        if beginner > advanced {
            self.experience = ExperienceLevel::Beginner;
        } else if advanced > beginner {
            self.experience = ExperienceLevel::Advanced;
        }

        if lower.contains("no posting") || lower.contains("don't post") {
            let constraint = "no content posting".to_string();
            if !self.constraints.contains(&constraint) {
                self.constraints.push(constraint);
            }
        }
    }

    /// 目标粉丝增量；当前与目标都已知时可计算
    pub fn growth_delta(&self) -> Option<u64> {
        match (self.current_followers, self.target_followers) {
            (Some(current), Some(target)) => Some(target.saturating_sub(current)),
            _ => None,
        }
    }

    /// 离开信息收集阶段的最低要求：领域 + 数值增量 + 周期
    pub fn is_ready(&self) -> bool {
        self.niche.is_some() && self.growth_delta().is_some() && self.timeframe_days.is_some()
    }

    pub fn missing_fields(&self) -> Vec<&'static str> {
        let mut missing = Vec::new();
        if self.niche.is_none() {
            missing.push("niche");
        }
        if self.growth_delta().is_none() {
            missing.push("followers");
        }
        if self.timeframe_days.is_none() {
            missing.push("timeframe");
        }
        missing
    }

    /// 针对第一个缺失字段的定向追问；信息齐全时返回 None
    pub fn follow_up_question(&self) -> Option<String> {
        self.missing_fields().first().map(|field| {
            match *field {
                "niche" => "What niche or topic is your account focused on?".to_string(),
                "followers" => {
                    "What's your current follower count, and what target do you want to reach?"
                        .to_string()
                }
                _ => "What timeframe are you working with (for example, 60 days)?".to_string(),
            }
        })
    }

    /// 供提示词使用的紧凑描述
    pub fn summary(&self) -> String {
        let mut parts = Vec::new();
        if let Some(niche) = &self.niche {
            parts.push(format!("niche: {}", niche));
        }
        if let (Some(current), Some(target)) = (self.current_followers, self.target_followers) {
            parts.push(format!("followers: {} -> {}", current, target));
        }
        if let Some(days) = self.timeframe_days {
            parts.push(format!("timeframe: {} days", days));
        }
        if let Some(audience) = &self.audience {
            parts.push(format!("audience: {}", audience));
        }
        parts.push(format!("experience: {:?}", self.experience).to_lowercase());
        if !self.constraints.is_empty() {
            parts.push(format!("constraints: {}", self.constraints.join(", ")));
        }
        parts.join("; ")
    }
}
