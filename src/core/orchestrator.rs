//! 组合根
//!
//! 在这里显式构造并装配全部组件：存储后端（启动时选定一次）、LLM 客户端、
//! 意图分类器与模型路由、调研提供方、策略引擎、计划器、安全过滤器与派发器。
//! 没有全局单例，所有依赖注入式传入，测试可逐件替换。

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use crate::config::{load_config, AppConfig, LlmSection, ResearchSection};
use crate::core::error::CoachError;
use crate::dispatch::{
    AutomationClient, DispatchConfig, Dispatcher, ExecutionStatus, HttpAutomationClient,
    MockAutomationClient,
};
use crate::llm::{
    create_embedder_from_config, IntentClassifier, LlmClient, MockLlmClient, ModelRouter,
    OpenRouterClient,
};
use crate::planner::{ExecutionPlanner, PlannerConfig};
use crate::research::{
    ApifyProvider, ParallelProvider, ResearchConfig, ResearchCoordinator, ResearchProvider,
    SimulatedProvider, TavilyProvider,
};
use crate::safety::SafetyFilter;
use crate::session::{
    ConversationMachine, MachineConfig, SessionSummary, TurnRequest, TurnResponse,
};
use crate::store::{create_store, FileStore};

/// 面向调用方（HTTP 层等）的核心外观
pub struct GrowthCoach {
    machine: ConversationMachine,
    dispatcher: Arc<Dispatcher>,
    research: Arc<ResearchCoordinator>,
    llm: Arc<dyn LlmClient>,
}

/// 根据配置与环境变量选择 LLM 后端（OpenRouter 兼容 / Mock）
fn create_llm_from_config(cfg: &LlmSection) -> Arc<dyn LlmClient> {
    let api_key = cfg
        .api_key
        .clone()
        .or_else(|| std::env::var("OPENROUTER_API_KEY").ok())
        .filter(|k| !k.is_empty());

    match api_key {
        Some(key) => {
            tracing::info!("using OpenRouter-compatible LLM at {}", cfg.base_url);
            Arc::new(OpenRouterClient::new(
                &cfg.base_url,
                &key,
                cfg.request_timeout_secs,
            ))
        }
        None => {
            tracing::warn!("no LLM api key configured, using mock client");
            Arc::new(MockLlmClient::new())
        }
    }
}

/// 按已配置凭据装配提供方；顺序即优先级排名
fn create_providers_from_config(cfg: &ResearchSection) -> Vec<Arc<dyn ResearchProvider>> {
    let mut providers: Vec<Arc<dyn ResearchProvider>> = Vec::new();

    if let Some(key) = cfg.tavily.api_key.as_deref().filter(|k| !k.is_empty()) {
        providers.push(Arc::new(TavilyProvider::new(key, cfg.provider_timeout_secs)));
    }
    if let Some(key) = cfg.parallel.api_key.as_deref().filter(|k| !k.is_empty()) {
        providers.push(Arc::new(ParallelProvider::new(
            key,
            cfg.parallel.base_url.clone(),
            cfg.provider_timeout_secs,
        )));
    }
    if let Some(token) = cfg.apify.api_token.as_deref().filter(|t| !t.is_empty()) {
        providers.push(Arc::new(ApifyProvider::new(
            token,
            cfg.apify.actor.clone(),
            cfg.provider_timeout_secs,
        )));
    }

    if providers.is_empty() {
        tracing::warn!("no research providers configured; every run will use the fallback");
    }
    providers
}

impl GrowthCoach {
    /// 从显式装配好的组件创建（测试注入用）
    pub fn new(
        machine: ConversationMachine,
        dispatcher: Arc<Dispatcher>,
        research: Arc<ResearchCoordinator>,
        llm: Arc<dyn LlmClient>,
    ) -> Self {
        Self {
            machine,
            dispatcher,
            research,
            llm,
        }
    }

    /// 加载配置并构建整套组件
    pub fn from_env(config_path: Option<PathBuf>) -> anyhow::Result<Self> {
        let cfg = load_config(config_path).unwrap_or_else(|e| {
            tracing::warn!("config load failed ({}), using defaults", e);
            AppConfig::default()
        });
        Ok(Self::from_config(cfg))
    }

    pub fn from_config(cfg: AppConfig) -> Self {
        let store = create_store(&cfg.store.backend, Some(cfg.store.file_root.as_path()));

        let llm = create_llm_from_config(&cfg.llm);
        let classifier = Arc::new(IntentClassifier::new());
        let router = Arc::new(ModelRouter::new().with_overrides(&cfg.llm.models));

        let embed_key = cfg
            .llm
            .api_key
            .clone()
            .or_else(|| std::env::var("OPENROUTER_API_KEY").ok());
        let embedder = create_embedder_from_config(
            cfg.llm.embedding.enabled,
            &cfg.llm.base_url,
            &cfg.llm.embedding.model,
            embed_key.as_deref(),
        );

        let research = Arc::new(ResearchCoordinator::new(
            create_providers_from_config(&cfg.research),
            Arc::new(SimulatedProvider),
            store.clone(),
            classifier,
            embedder,
            ResearchConfig {
                provider_timeout: Duration::from_secs(cfg.research.provider_timeout_secs),
                overall_timeout: Duration::from_secs(cfg.research.overall_timeout_secs),
                min_providers: cfg.research.min_providers,
                max_summary_chars: cfg.research.max_summary_chars,
            },
        ));

        let strategy = Arc::new(crate::strategy::StrategyEngine::new(llm.clone(), router));

        // 派发记录的本地降级存储；建不出来也不致命
        let fallback = FileStore::new(cfg.store.file_root.join("dispatch-fallback"))
            .map(Arc::new)
            .map_err(|e| tracing::warn!("dispatch fallback store unavailable: {}", e))
            .ok();

        let automation: Arc<dyn AutomationClient> = if cfg.dispatch.base_url.is_empty() {
            tracing::warn!("no automation backend configured, using mock client");
            Arc::new(MockAutomationClient::completing())
        } else {
            Arc::new(HttpAutomationClient::new(
                cfg.dispatch.base_url.clone(),
                cfg.dispatch.api_token.clone(),
                cfg.dispatch.request_timeout_secs,
            ))
        };

        let dispatcher = Arc::new(Dispatcher::new(
            automation,
            store.clone(),
            fallback,
            DispatchConfig {
                min_delay_ms: cfg.dispatch.min_delay_secs * 1000,
                max_delay_ms: cfg.dispatch.max_delay_secs * 1000,
                max_concurrent: cfg.dispatch.max_concurrent,
                max_attempts: cfg.dispatch.max_attempts,
                retry_base_ms: cfg.dispatch.retry_base_ms,
                poll_interval_ms: cfg.dispatch.poll_interval_ms,
                max_polls: cfg.dispatch.max_polls,
            },
        ));

        let machine = ConversationMachine::new(
            store,
            research.clone(),
            strategy,
            ExecutionPlanner::new(PlannerConfig {
                min_spacing_minutes: cfg.planner.min_spacing_minutes,
            }),
            SafetyFilter::new(),
            dispatcher.clone(),
            MachineConfig {
                lock_ttl: Duration::from_secs(cfg.session.lock_ttl_secs),
                lock_wait: Duration::from_secs(cfg.session.lock_wait_secs),
                lock_retry: Duration::from_millis(50),
                disclose_degraded: cfg.research.disclose_degraded,
            },
        );

        Self::new(machine, dispatcher, research, llm)
    }

    /// 处理一个用户回合：(阶段, 回复文本, 可选执行 ID)
    pub async fn handle_turn(
        &self,
        user_id: &str,
        input: &str,
    ) -> Result<TurnResponse, CoachError> {
        self.machine.advance(user_id, TurnRequest::new(input)).await
    }

    pub async fn handle_request(
        &self,
        user_id: &str,
        request: TurnRequest,
    ) -> Result<TurnResponse, CoachError> {
        self.machine.advance(user_id, request).await
    }

    /// 一次执行的当前 DispatchRecord 集合
    pub async fn execution_status(&self, execution_id: &str) -> Option<ExecutionStatus> {
        self.dispatcher.execution_status(execution_id).await
    }

    pub async fn consultation_status(
        &self,
        user_id: &str,
    ) -> Result<Option<SessionSummary>, CoachError> {
        self.machine.status(user_id).await
    }

    pub async fn reset(&self, user_id: &str) -> Result<(), CoachError> {
        self.machine.reset(user_id).await
    }

    /// 调研缓存命中统计 (hits, misses)
    pub fn cache_stats(&self) -> (u64, u64) {
        self.research.cache_stats()
    }

    /// LLM token 使用统计
    pub fn token_usage(&self) -> (u64, u64, u64) {
        self.llm.token_usage()
    }
}
