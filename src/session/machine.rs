//! 会话状态机
//!
//! 每用户一台状态机，按固定阶段单向推进：
//! greeting → context_gathering → researching → strategizing → planning →
//! executing → monitoring → completed，error 为带外可恢复态。
//!
//! 不变量：
//! - 阶段序只进不退（显式 reset 除外；error 恢复是带外路径）
//! - 每次阶段变更先落盘再调用下一个组件，部分进展永远是可恢复的合法状态
//! - 同一用户的回合经存储咨询锁串行化，不同用户完全独立

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use crate::core::error::CoachError;
use crate::dispatch::Dispatcher;
use crate::planner::{ExecutionPlan, ExecutionPlanner};
use crate::research::{ResearchCoordinator, ResearchResult};
use crate::safety::SafetyFilter;
use crate::store::KvStore;
use crate::strategy::{Strategy, StrategyEngine};

use super::context::GoalContext;

/// 会话阶段
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Greeting,
    ContextGathering,
    Researching,
    Strategizing,
    Planning,
    Executing,
    Monitoring,
    Completed,
    Error,
}

impl Stage {
    /// 前向序；Error 为带外态，无序号
    pub fn forward_rank(&self) -> Option<u8> {
        match self {
            Stage::Greeting => Some(0),
            Stage::ContextGathering => Some(1),
            Stage::Researching => Some(2),
            Stage::Strategizing => Some(3),
            Stage::Planning => Some(4),
            Stage::Executing => Some(5),
            Stage::Monitoring => Some(6),
            Stage::Completed => Some(7),
            Stage::Error => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Greeting => "greeting",
            Stage::ContextGathering => "context_gathering",
            Stage::Researching => "researching",
            Stage::Strategizing => "strategizing",
            Stage::Planning => "planning",
            Stage::Executing => "executing",
            Stage::Monitoring => "monitoring",
            Stage::Completed => "completed",
            Stage::Error => "error",
        }
    }
}

/// 每用户一条的会话记录；整体覆盖写入存储
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversationSession {
    pub user_id: String,
    pub stage: Stage,
    pub context: GoalContext,
    pub research: Option<ResearchResult>,
    pub strategy: Option<Strategy>,
    pub plan: Option<ExecutionPlan>,
    pub execution_id: Option<String>,
    pub last_error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ConversationSession {
    pub fn new(user_id: &str) -> Self {
        let now = Utc::now();
        Self {
            user_id: user_id.to_string(),
            stage: Stage::Greeting,
            context: GoalContext::default(),
            research: None,
            strategy: None,
            plan: None,
            execution_id: None,
            last_error: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// 前向推进；只接受序号增大的目标阶段
    fn advance_stage(&mut self, to: Stage) {
        debug_assert!(
            match (self.stage.forward_rank(), to.forward_rank()) {
                (Some(from), Some(to)) => to > from,
                _ => true,
            },
            "stage must advance monotonically"
        );
        self.stage = to;
    }
}

/// 状态轮询用的会话摘要
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionSummary {
    pub user_id: String,
    pub stage: Stage,
    pub execution_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// 一次用户回合的请求
#[derive(Debug, Clone)]
pub struct TurnRequest {
    pub input: String,
    pub create_if_missing: bool,
    /// 调用方指定阶段时校验；与当前阶段不符即 InvalidTransition
    pub requested_stage: Option<Stage>,
}

impl TurnRequest {
    pub fn new(input: impl Into<String>) -> Self {
        Self {
            input: input.into(),
            create_if_missing: true,
            requested_stage: None,
        }
    }

    /// 仅允许已有会话；不存在时报 SessionNotFound
    pub fn existing_only(mut self) -> Self {
        self.create_if_missing = false;
        self
    }

    pub fn at_stage(mut self, stage: Stage) -> Self {
        self.requested_stage = Some(stage);
        self
    }
}

/// 一次回合的结构化响应
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TurnResponse {
    pub stage: Stage,
    pub response_text: String,
    pub execution_id: Option<String>,
}

#[derive(Debug, Clone)]
pub struct MachineConfig {
    /// 会话咨询锁的自动失效时间
    pub lock_ttl: Duration,
    /// 等待在途回合释放锁的上限
    pub lock_wait: Duration,
    pub lock_retry: Duration,
    /// 是否向用户披露降级调研（否则仅记日志）
    pub disclose_degraded: bool,
}

impl Default for MachineConfig {
    fn default() -> Self {
        Self {
            lock_ttl: Duration::from_secs(120),
            lock_wait: Duration::from_secs(10),
            lock_retry: Duration::from_millis(50),
            disclose_degraded: false,
        }
    }
}

/// 会话状态机：顶层协调器
pub struct ConversationMachine {
    store: Arc<dyn KvStore>,
    research: Arc<ResearchCoordinator>,
    strategy: Arc<StrategyEngine>,
    planner: ExecutionPlanner,
    safety: SafetyFilter,
    dispatcher: Arc<Dispatcher>,
    cfg: MachineConfig,
}

impl ConversationMachine {
    pub fn new(
        store: Arc<dyn KvStore>,
        research: Arc<ResearchCoordinator>,
        strategy: Arc<StrategyEngine>,
        planner: ExecutionPlanner,
        safety: SafetyFilter,
        dispatcher: Arc<Dispatcher>,
        cfg: MachineConfig,
    ) -> Self {
        Self {
            store,
            research,
            strategy,
            planner,
            safety,
            dispatcher,
            cfg,
        }
    }

    fn session_key(user_id: &str) -> String {
        format!("session:{}", user_id)
    }

    /// 处理一个用户回合。同一用户串行（存储咨询锁），不同用户互不影响。
    pub async fn advance(
        &self,
        user_id: &str,
        request: TurnRequest,
    ) -> Result<TurnResponse, CoachError> {
        let lock_key = format!("lock:session:{}", user_id);
        self.acquire_session_lock(&lock_key, user_id).await?;
        let result = self.advance_locked(user_id, request).await;
        if let Err(e) = self.store.release_lock(&lock_key).await {
            tracing::warn!("failed to release session lock for {}: {}", user_id, e);
        }
        result
    }

    async fn acquire_session_lock(&self, lock_key: &str, user_id: &str) -> Result<(), CoachError> {
        let deadline = tokio::time::Instant::now() + self.cfg.lock_wait;
        loop {
            if self.store.acquire_lock(lock_key, self.cfg.lock_ttl).await? {
                return Ok(());
            }
            if tokio::time::Instant::now() >= deadline {
                return Err(CoachError::SessionBusy(user_id.to_string()));
            }
            tokio::time::sleep(self.cfg.lock_retry).await;
        }
    }

    async fn advance_locked(
        &self,
        user_id: &str,
        request: TurnRequest,
    ) -> Result<TurnResponse, CoachError> {
        let mut session = match self.load(user_id).await? {
            Some(session) => session,
            None if request.create_if_missing => {
                tracing::info!("creating session for user {}", user_id);
                ConversationSession::new(user_id)
            }
            None => return Err(CoachError::SessionNotFound(user_id.to_string())),
        };

        if let Some(requested) = request.requested_stage {
            if requested != session.stage {
                return Err(CoachError::InvalidTransition {
                    from: session.stage,
                    requested,
                });
            }
        }

        self.drive(&mut session, &request.input).await
    }

    /// 推进一台会话。每个阶段边界先落盘，再进入下一组件。
    async fn drive(
        &self,
        session: &mut ConversationSession,
        input: &str,
    ) -> Result<TurnResponse, CoachError> {
        let cancel = CancellationToken::new();

        if matches!(
            session.stage,
            Stage::Greeting | Stage::ContextGathering | Stage::Error
        ) {
            session.context.absorb(input);
        }

        loop {
            match session.stage {
                Stage::Greeting => {
                    session.advance_stage(Stage::ContextGathering);
                    self.persist(session).await?;
                    if !session.context.is_ready() {
                        let question = session
                            .context
                            .follow_up_question()
                            .unwrap_or_else(|| "Tell me about your growth goal.".to_string());
                        return Ok(self.respond(
                            session,
                            format!(
                                "Welcome! I turn growth goals into safe, research-backed \
                                 action plans. {}",
                                question
                            ),
                        ));
                    }
                }
                Stage::ContextGathering => {
                    if session.context.is_ready() {
                        session.advance_stage(Stage::Researching);
                        self.persist(session).await?;
                    } else {
                        self.persist(session).await?;
                        let question = session
                            .context
                            .follow_up_question()
                            .unwrap_or_else(|| "Tell me more about your goal.".to_string());
                        return Ok(self.respond(session, question));
                    }
                }
                Stage::Researching => {
                    let query = self.research_query(&session.context);
                    let result = self.research.research(&query, &cancel).await;
                    // 降级调研不中断回合，质量降低但继续推进
                    session.research = Some(result);
                    session.advance_stage(Stage::Strategizing);
                    self.persist(session).await?;
                }
                Stage::Strategizing => {
                    let research = session
                        .research
                        .clone()
                        .unwrap_or_else(|| self.empty_research());
                    match self.strategy.synthesize(&session.context, &research).await {
                        Ok(strategy) => {
                            session.strategy = Some(strategy);
                            session.advance_stage(Stage::Planning);
                            self.persist(session).await?;
                        }
                        Err(e) => {
                            return self
                                .enter_error(
                                    session,
                                    format!(
                                        "Strategy synthesis is unavailable right now ({}). \
                                         Your research is saved; send any message to retry.",
                                        e
                                    ),
                                )
                                .await;
                        }
                    }
                }
                Stage::Planning => {
                    let strategy = match &session.strategy {
                        Some(strategy) => strategy,
                        None => {
                            return self
                                .enter_error(
                                    session,
                                    "Planning reached without a strategy; send any message \
                                     to retry."
                                        .to_string(),
                                )
                                .await;
                        }
                    };
                    session.plan = Some(self.planner.plan(strategy, &session.context));
                    session.advance_stage(Stage::Executing);
                    self.persist(session).await?;
                }
                Stage::Executing => {
                    let plan = match &session.plan {
                        Some(plan) => plan.clone(),
                        None => {
                            return self
                                .enter_error(
                                    session,
                                    "Execution reached without a plan; send any message to retry."
                                        .to_string(),
                                )
                                .await;
                        }
                    };
                    // 过滤在每次执行尝试时重跑：策略可独立于缓存的计划变化
                    let (allowed, rejected) = self.safety.filter(plan.tasks.clone());

                    if allowed.is_empty() {
                        session.advance_stage(Stage::Completed);
                        self.persist(session).await?;
                        return Ok(self.respond(
                            session,
                            format!(
                                "Your strategy is ready, but none of the {} planned tasks \
                                 are eligible for automation under the safety policy. \
                                 The plan is yours to execute manually.",
                                rejected.len()
                            ),
                        ));
                    }

                    let execution_id = self
                        .dispatcher
                        .clone()
                        .dispatch(&session.user_id, allowed.clone())
                        .await;
                    session.execution_id = Some(execution_id);
                    session.advance_stage(Stage::Monitoring);
                    self.persist(session).await?;

                    return Ok(self.respond(
                        session,
                        self.executing_text(session, &plan, allowed.len(), rejected.len()),
                    ));
                }
                Stage::Monitoring => {
                    let execution_id = match &session.execution_id {
                        Some(id) => id.clone(),
                        None => {
                            session.advance_stage(Stage::Completed);
                            self.persist(session).await?;
                            continue;
                        }
                    };
                    let status = self.dispatcher.execution_status(&execution_id).await;
                    match status {
                        Some(status) if status.finished => {
                            session.advance_stage(Stage::Completed);
                            self.persist(session).await?;
                            return Ok(self.respond(
                                session,
                                format!(
                                    "All automation finished: {} completed, {} failed out of \
                                     {} tasks. Your consultation is complete.",
                                    status.completed, status.failed, status.total
                                ),
                            ));
                        }
                        Some(status) => {
                            return Ok(self.respond(
                                session,
                                format!(
                                    "Execution in progress: {}/{} tasks done ({:.0}%).",
                                    status.completed + status.failed,
                                    status.total,
                                    status.progress_percent
                                ),
                            ));
                        }
                        None => {
                            return self
                                .enter_error(
                                    session,
                                    format!(
                                        "Execution {} is no longer tracked; send any message \
                                         to re-dispatch from your saved plan.",
                                        execution_id
                                    ),
                                )
                                .await;
                        }
                    }
                }
                Stage::Completed => {
                    return Ok(self.respond(
                        session,
                        "This consultation is complete. Reset the session to start a new goal."
                            .to_string(),
                    ));
                }
                Stage::Error => {
                    let resume = self.resume_stage(session);
                    tracing::info!(
                        "resuming user {} from error into {}",
                        session.user_id,
                        resume.as_str()
                    );
                    session.last_error = None;
                    session.stage = resume;
                    self.persist(session).await?;
                }
            }
        }
    }

    /// error 态的恢复点：从最后一份已保存产物之后继续
    fn resume_stage(&self, session: &ConversationSession) -> Stage {
        if session.plan.is_some() {
            Stage::Executing
        } else if session.strategy.is_some() {
            Stage::Planning
        } else if session.research.is_some() {
            Stage::Strategizing
        } else if session.context.is_ready() {
            Stage::Researching
        } else {
            Stage::ContextGathering
        }
    }

    async fn enter_error(
        &self,
        session: &mut ConversationSession,
        reason: String,
    ) -> Result<TurnResponse, CoachError> {
        tracing::warn!("user {} entered error stage: {}", session.user_id, reason);
        session.stage = Stage::Error;
        session.last_error = Some(reason.clone());
        self.persist(session).await?;
        Ok(self.respond(session, reason))
    }

    fn respond(&self, session: &ConversationSession, response_text: String) -> TurnResponse {
        TurnResponse {
            stage: session.stage,
            response_text,
            execution_id: session.execution_id.clone(),
        }
    }

    fn research_query(&self, context: &GoalContext) -> String {
        let niche = context.niche.as_deref().unwrap_or("general");
        format!(
            "{} instagram growth strategies engagement tactics best posting times",
            niche
        )
    }

    fn empty_research(&self) -> ResearchResult {
        ResearchResult {
            query_fingerprint: String::new(),
            insights: vec![],
            degraded: true,
            synthesized_summary:
                "No research signal was available; proceeding with baseline growth heuristics."
                    .to_string(),
            retrieved_at: Utc::now(),
        }
    }

    fn executing_text(
        &self,
        session: &ConversationSession,
        plan: &ExecutionPlan,
        allowed: usize,
        rejected: usize,
    ) -> String {
        let mut text = String::new();
        if let Some(strategy) = &session.strategy {
            text.push_str(&format!(
                "Your {} is ready: {} recommendations from {} specialists. ",
                strategy.title,
                strategy.unified_recommendations.len(),
                strategy.contributing_specialists.len()
            ));
        }
        if self.cfg.disclose_degraded
            && session.research.as_ref().map(|r| r.degraded).unwrap_or(false)
        {
            text.push_str("Note: research ran in degraded mode with fewer sources than usual. ");
        }
        text.push_str(&format!(
            "{} tasks queued for automation ({} held back by the safety policy), \
             estimated completion in {}.",
            allowed,
            rejected,
            plan.estimated_completion()
        ));
        text
    }

    async fn load(&self, user_id: &str) -> Result<Option<ConversationSession>, CoachError> {
        match self.store.get(&Self::session_key(user_id)).await? {
            Some(raw) => {
                let session = serde_json::from_str(&raw)
                    .map_err(crate::store::StoreError::Serde)
                    .map_err(CoachError::Store)?;
                Ok(Some(session))
            }
            None => Ok(None),
        }
    }

    async fn persist(&self, session: &mut ConversationSession) -> Result<(), CoachError> {
        session.updated_at = Utc::now();
        let raw = serde_json::to_string(session)
            .map_err(crate::store::StoreError::Serde)
            .map_err(CoachError::Store)?;
        self.store
            .set(&Self::session_key(&session.user_id), &raw, None)
            .await?;
        Ok(())
    }

    /// 显式重置：丢弃现有会话，从 greeting 重新开始
    pub async fn reset(&self, user_id: &str) -> Result<(), CoachError> {
        let mut session = ConversationSession::new(user_id);
        self.persist(&mut session).await
    }

    pub async fn status(&self, user_id: &str) -> Result<Option<SessionSummary>, CoachError> {
        Ok(self.load(user_id).await?.map(|s| SessionSummary {
            user_id: s.user_id,
            stage: s.stage,
            execution_id: s.execution_id,
            created_at: s.created_at,
            updated_at: s.updated_at,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dispatch::{DispatchConfig, MockAutomationClient};
    use crate::llm::{IntentClassifier, MockLlmClient, ModelRouter};
    use crate::planner::PlannerConfig;
    use crate::research::{
        ProviderError, ResearchConfig, ResearchInsight, ResearchProvider, SimulatedProvider,
    };
    use crate::store::MemoryStore;
    use async_trait::async_trait;
    use serde_json::json;

    struct StubProvider;

    #[async_trait]
    impl ResearchProvider for StubProvider {
        fn name(&self) -> &str {
            "stub"
        }

        async fn search(&self, query: &str) -> Result<Vec<ResearchInsight>, ProviderError> {
            Ok(vec![ResearchInsight::new(
                "stub",
                query,
                "reels and consistent engagement win",
                0.8,
                json!({}),
            )])
        }
    }

    const SPECIALIST_JSON: &str = r#"[
        {"category": "engagement_outreach", "topic": "niche peers", "tactic": "engage with 30 posts daily", "rationale": "visibility"},
        {"category": "hashtag_strategy", "topic": "reach", "tactic": "use 12 niche hashtags", "rationale": "relevance"},
        {"category": "posting_cadence", "topic": "feed", "tactic": "post three times weekly", "rationale": "sustainable"},
        {"category": "direct_outreach", "topic": "leads", "tactic": "dm warm leads", "rationale": "conversion"}
    ]"#;

    fn build_machine(llm: Arc<dyn crate::llm::LlmClient>, store: Arc<dyn KvStore>) -> ConversationMachine {
        let classifier = Arc::new(IntentClassifier::new());
        let router = Arc::new(ModelRouter::new());
        let research = Arc::new(ResearchCoordinator::new(
            vec![Arc::new(StubProvider)],
            Arc::new(SimulatedProvider),
            store.clone(),
            classifier,
            None,
            ResearchConfig {
                min_providers: 1,
                ..Default::default()
            },
        ));
        let strategy = Arc::new(StrategyEngine::new(llm, router));
        let dispatcher = Arc::new(Dispatcher::new(
            Arc::new(MockAutomationClient::completing()),
            store.clone(),
            None,
            DispatchConfig {
                min_delay_ms: 0,
                max_delay_ms: 0,
                retry_base_ms: 1,
                poll_interval_ms: 1,
                ..Default::default()
            },
        ));
        ConversationMachine::new(
            store,
            research,
            strategy,
            ExecutionPlanner::new(PlannerConfig::default()),
            SafetyFilter::new(),
            dispatcher,
            MachineConfig {
                lock_wait: Duration::from_secs(1),
                ..Default::default()
            },
        )
    }

    fn working_machine(store: Arc<dyn KvStore>) -> ConversationMachine {
        build_machine(Arc::new(MockLlmClient::with_response(SPECIALIST_JSON)), store)
    }

    #[tokio::test]
    async fn test_complete_context_skips_follow_up_questions() {
        let machine = working_machine(Arc::new(MemoryStore::new()));
        let response = machine
            .advance(
                "u1",
                TurnRequest::new(
                    "I run a fitness account, grow it from 500 to 5000 followers in 60 days",
                ),
            )
            .await
            .unwrap();

        // 必填字段齐全：不追问，一路推进到执行监控
        assert_eq!(response.stage, Stage::Monitoring);
        assert!(response.execution_id.is_some());
        assert!(!response.response_text.contains('?'));
    }

    #[tokio::test]
    async fn test_incomplete_context_asks_targeted_question() {
        let machine = working_machine(Arc::new(MemoryStore::new()));
        let response = machine
            .advance("u1", TurnRequest::new("hi, I have a fitness account"))
            .await
            .unwrap();
        assert_eq!(response.stage, Stage::ContextGathering);
        assert!(response.response_text.contains("follower"));
    }

    #[tokio::test]
    async fn test_stage_is_non_decreasing() {
        let machine = working_machine(Arc::new(MemoryStore::new()));
        let inputs = [
            "hello",
            "I coach breathwork for entrepreneurs",
            "from 500 to 5000 followers",
            "in 60 days",
            "how is it going?",
            "status?",
        ];
        let mut last_rank = 0u8;
        for input in inputs {
            let response = machine.advance("u1", TurnRequest::new(input)).await.unwrap();
            let rank = response.stage.forward_rank().expect("no error stage here");
            assert!(rank >= last_rank, "stage regressed");
            last_rank = rank;
        }
    }

    #[tokio::test]
    async fn test_session_not_found_without_creation() {
        let machine = working_machine(Arc::new(MemoryStore::new()));
        let err = machine
            .advance("ghost", TurnRequest::new("hi").existing_only())
            .await
            .unwrap_err();
        assert!(matches!(err, CoachError::SessionNotFound(_)));
    }

    #[tokio::test]
    async fn test_requesting_wrong_stage_is_invalid_transition() {
        let machine = working_machine(Arc::new(MemoryStore::new()));
        machine.advance("u1", TurnRequest::new("hi")).await.unwrap();
        let err = machine
            .advance("u1", TurnRequest::new("go").at_stage(Stage::Executing))
            .await
            .unwrap_err();
        assert!(matches!(err, CoachError::InvalidTransition { .. }));
    }

    #[tokio::test]
    async fn test_session_round_trip_preserves_stage_and_context() {
        let store: Arc<dyn KvStore> = Arc::new(MemoryStore::new());
        let machine = working_machine(store.clone());
        machine
            .advance("u1", TurnRequest::new("fitness account, 500 followers now"))
            .await
            .unwrap();

        let raw = store.get("session:u1").await.unwrap().unwrap();
        let reloaded: ConversationSession = serde_json::from_str(&raw).unwrap();
        let original = machine.load("u1").await.unwrap().unwrap();
        assert_eq!(reloaded.stage, original.stage);
        assert_eq!(reloaded.context, original.context);
    }

    #[tokio::test]
    async fn test_strategy_failure_enters_error_and_preserves_research() {
        let store: Arc<dyn KvStore> = Arc::new(MemoryStore::new());
        let failing = build_machine(Arc::new(MockLlmClient::failing()), store.clone());
        let response = failing
            .advance(
                "u1",
                TurnRequest::new("fitness account from 500 to 5000 followers in 60 days"),
            )
            .await
            .unwrap();
        assert_eq!(response.stage, Stage::Error);
        assert!(response.response_text.contains("unavailable"));

        let saved = failing.load("u1").await.unwrap().unwrap();
        assert!(saved.research.is_some());
        assert!(saved.strategy.is_none());

        // 同一存储、修好的 LLM：从 error 恢复并走到监控
        let healthy = working_machine(store);
        let response = healthy
            .advance("u1", TurnRequest::new("retry please"))
            .await
            .unwrap();
        assert_eq!(response.stage, Stage::Monitoring);
    }

    #[tokio::test]
    async fn test_reset_starts_over() {
        let machine = working_machine(Arc::new(MemoryStore::new()));
        machine
            .advance(
                "u1",
                TurnRequest::new("fitness from 500 to 5000 followers in 60 days"),
            )
            .await
            .unwrap();
        machine.reset("u1").await.unwrap();
        let summary = machine.status("u1").await.unwrap().unwrap();
        assert_eq!(summary.stage, Stage::Greeting);
    }

    #[tokio::test]
    async fn test_concurrent_turns_serialize_per_user() {
        let machine = Arc::new(working_machine(Arc::new(MemoryStore::new())));
        let a = {
            let machine = machine.clone();
            tokio::spawn(async move { machine.advance("u1", TurnRequest::new("hello")).await })
        };
        let b = {
            let machine = machine.clone();
            tokio::spawn(async move {
                machine
                    .advance("u1", TurnRequest::new("I do fitness coaching"))
                    .await
            })
        };
        // 两个回合都成功（第二个等待锁），会话未损坏
        assert!(a.await.unwrap().is_ok());
        assert!(b.await.unwrap().is_ok());
        let summary = machine.status("u1").await.unwrap().unwrap();
        assert!(summary.stage.forward_rank().is_some());
    }
}
