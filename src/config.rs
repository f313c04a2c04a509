//! 应用配置：从 config/default.toml 与环境变量加载
//!
//! 加载顺序：先读 TOML 文件，再用环境变量 `BLOOM__*` 覆盖
//! （双下划线表示嵌套，如 `BLOOM__LLM__API_KEY=...`）。

use std::collections::HashMap;
use std::path::PathBuf;

use serde::Deserialize;

/// 应用配置根（对应 config/default.toml 的顶层）
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct AppConfig {
    pub app: AppSection,
    pub store: StoreSection,
    pub llm: LlmSection,
    pub research: ResearchSection,
    pub planner: PlannerSection,
    pub dispatch: DispatchSection,
    pub session: SessionSection,
}

/// [app] 段
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct AppSection {
    pub name: Option<String>,
}

/// [store] 段：后端选择，启动时定一次
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct StoreSection {
    /// memory / file
    pub backend: String,
    pub file_root: PathBuf,
}

impl Default for StoreSection {
    fn default() -> Self {
        Self {
            backend: "memory".to_string(),
            file_root: PathBuf::from(".bloom/store"),
        }
    }
}

/// [llm] 段：OpenRouter 兼容端点与意图路由覆盖
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LlmSection {
    pub base_url: String,
    pub api_key: Option<String>,
    pub request_timeout_secs: u64,
    /// 意图名（snake_case）→ 模型标识的路由覆盖
    pub models: HashMap<String, String>,
    pub embedding: EmbeddingSection,
}

impl Default for LlmSection {
    fn default() -> Self {
        Self {
            base_url: "https://openrouter.ai/api/v1".to_string(),
            api_key: None,
            request_timeout_secs: 60,
            models: HashMap::new(),
            embedding: EmbeddingSection::default(),
        }
    }
}

/// [llm.embedding] 段：可选的洞察重排
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct EmbeddingSection {
    pub enabled: bool,
    pub model: String,
}

impl Default for EmbeddingSection {
    fn default() -> Self {
        Self {
            enabled: false,
            model: "text-embedding-3-small".to_string(),
        }
    }
}

/// [research] 段：扇出超时、降级阈值与提供方凭据
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ResearchSection {
    pub provider_timeout_secs: u64,
    /// 必须大于单个提供方超时
    pub overall_timeout_secs: u64,
    pub min_providers: usize,
    pub max_summary_chars: usize,
    /// 是否向用户披露降级调研（否则仅日志）
    pub disclose_degraded: bool,
    pub tavily: TavilySection,
    pub parallel: ParallelSection,
    pub apify: ApifySection,
}

impl Default for ResearchSection {
    fn default() -> Self {
        Self {
            provider_timeout_secs: 12,
            overall_timeout_secs: 30,
            min_providers: 2,
            max_summary_chars: 4000,
            disclose_degraded: false,
            tavily: TavilySection::default(),
            parallel: ParallelSection::default(),
            apify: ApifySection::default(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct TavilySection {
    pub api_key: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ParallelSection {
    pub api_key: Option<String>,
    pub base_url: String,
}

impl Default for ParallelSection {
    fn default() -> Self {
        Self {
            api_key: None,
            base_url: "https://api.parallel.ai".to_string(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ApifySection {
    pub api_token: Option<String>,
    pub actor: String,
}

impl Default for ApifySection {
    fn default() -> Self {
        Self {
            api_token: None,
            actor: "apify~instagram-hashtag-scraper".to_string(),
        }
    }
}

/// [planner] 段
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PlannerSection {
    pub min_spacing_minutes: u64,
}

impl Default for PlannerSection {
    fn default() -> Self {
        Self {
            min_spacing_minutes: 45,
        }
    }
}

/// [dispatch] 段：自动化后端与节奏控制
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DispatchSection {
    pub base_url: String,
    pub api_token: Option<String>,
    pub request_timeout_secs: u64,
    /// 拟人化延迟范围（秒）
    pub min_delay_secs: u64,
    pub max_delay_secs: u64,
    pub max_concurrent: usize,
    pub max_attempts: u32,
    pub retry_base_ms: u64,
    pub poll_interval_ms: u64,
    pub max_polls: u32,
}

impl Default for DispatchSection {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:8080".to_string(),
            api_token: None,
            request_timeout_secs: 30,
            min_delay_secs: 10,
            max_delay_secs: 120,
            max_concurrent: 3,
            max_attempts: 3,
            retry_base_ms: 500,
            poll_interval_ms: 2_000,
            max_polls: 10,
        }
    }
}

/// [session] 段：按用户咨询锁
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SessionSection {
    pub lock_ttl_secs: u64,
    pub lock_wait_secs: u64,
}

impl Default for SessionSection {
    fn default() -> Self {
        Self {
            lock_ttl_secs: 120,
            lock_wait_secs: 30,
        }
    }
}

/// 从 config 目录加载配置，环境变量 BLOOM__* 可覆盖
///
/// 1. 按顺序查找 config/default.toml、../config/default.toml、default.toml，找到则作为第一源
/// 2. 若传入 config_path 且文件存在，则追加该文件（可覆盖前面的键）
/// 3. 最后叠加环境变量 BLOOM__*（双下划线表示嵌套键）
pub fn load_config(config_path: Option<PathBuf>) -> Result<AppConfig, config::ConfigError> {
    let mut builder = config::Config::builder();

    let default_names = ["config/default", "../config/default", "default"];
    for name in default_names {
        let path = format!("{}.toml", name);
        if std::path::Path::new(&path).exists() {
            builder = builder.add_source(config::File::with_name(name).required(false));
            break;
        }
    }

    if let Some(ref path) = config_path {
        if path.exists() {
            builder = builder.add_source(config::File::from(path.clone()).required(false));
        }
    }

    builder = builder.add_source(
        config::Environment::with_prefix("BLOOM")
            .separator("__")
            .try_parsing(true),
    );

    let c = builder.build()?;
    c.try_deserialize()
}
