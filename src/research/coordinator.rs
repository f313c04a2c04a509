//! 调研扇出协调器
//!
//! 查询指纹 → 缓存检查 → 并发扇出全部提供方（单体超时 + 总体超时）→
//! 不足最低提供方数量时降级并调用模拟兜底 → 按置信度排序合成摘要 →
//! 按分类器 TTL 写回缓存。
//!
//! 提供方是第三方且各自不可靠：任何一个的超时/失败都不能阻塞或拖垮整轮。

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures_util::stream::{FuturesUnordered, StreamExt};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tokio_util::sync::CancellationToken;

use crate::llm::{cosine, EmbeddingProvider, IntentClassifier};
use crate::store::KvStore;

use super::provider::{ProviderError, ResearchInsight, ResearchProvider};

/// 一次查询的聚合调研结果
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResearchResult {
    pub query_fingerprint: String,
    /// 置信度降序；同分按提供方优先级（配置顺序），与到达顺序无关
    pub insights: Vec<ResearchInsight>,
    /// 响应的真实提供方少于配置的最低数量
    pub degraded: bool,
    pub synthesized_summary: String,
    pub retrieved_at: DateTime<Utc>,
}

/// 缓存命中/未命中计数
#[derive(Debug, Default)]
pub struct CacheStats {
    hits: AtomicU64,
    misses: AtomicU64,
}

impl CacheStats {
    pub fn record_hit(&self) {
        self.hits.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_miss(&self) {
        self.misses.fetch_add(1, Ordering::Relaxed);
    }

    /// (hits, misses)
    pub fn get(&self) -> (u64, u64) {
        (
            self.hits.load(Ordering::Relaxed),
            self.misses.load(Ordering::Relaxed),
        )
    }
}

#[derive(Debug, Clone)]
pub struct ResearchConfig {
    /// 单个提供方调用超时
    pub provider_timeout: Duration,
    /// 协调器总体超时；必须大于单体超时
    pub overall_timeout: Duration,
    /// 低于该数量的成功提供方即标记降级
    pub min_providers: usize,
    /// 合成摘要的最大长度（字符）
    pub max_summary_chars: usize,
}

impl Default for ResearchConfig {
    fn default() -> Self {
        Self {
            provider_timeout: Duration::from_secs(12),
            overall_timeout: Duration::from_secs(30),
            min_providers: 2,
            max_summary_chars: 4000,
        }
    }
}

/// 规范化查询文本的确定性指纹（缓存键）
pub fn fingerprint(query: &str) -> String {
    let normalized = query.trim().to_lowercase();
    let normalized = normalized.split_whitespace().collect::<Vec<_>>().join(" ");
    format!("{:x}", Sha256::digest(normalized.as_bytes()))
}

pub struct ResearchCoordinator {
    /// 配置顺序即优先级排名（同置信度时的决定性 tie-break）
    providers: Vec<Arc<dyn ResearchProvider>>,
    fallback: Arc<dyn ResearchProvider>,
    store: Arc<dyn KvStore>,
    classifier: Arc<IntentClassifier>,
    embedder: Option<Arc<dyn EmbeddingProvider>>,
    cfg: ResearchConfig,
    stats: CacheStats,
}

impl ResearchCoordinator {
    pub fn new(
        providers: Vec<Arc<dyn ResearchProvider>>,
        fallback: Arc<dyn ResearchProvider>,
        store: Arc<dyn KvStore>,
        classifier: Arc<IntentClassifier>,
        embedder: Option<Arc<dyn EmbeddingProvider>>,
        cfg: ResearchConfig,
    ) -> Self {
        if cfg.overall_timeout <= cfg.provider_timeout {
            tracing::warn!(
                "overall research timeout ({:?}) should exceed per-provider timeout ({:?})",
                cfg.overall_timeout,
                cfg.provider_timeout
            );
        }
        Self {
            providers,
            fallback,
            store,
            classifier,
            embedder,
            cfg,
            stats: CacheStats::default(),
        }
    }

    pub fn cache_stats(&self) -> (u64, u64) {
        self.stats.get()
    }

    /// 执行一次调研：缓存命中直接返回，未命中扇出并写回
    pub async fn research(&self, query: &str, cancel: &CancellationToken) -> ResearchResult {
        let fp = fingerprint(query);
        let cache_key = format!("research:{}", fp);

        match self.store.get(&cache_key).await {
            Ok(Some(raw)) => match serde_json::from_str::<ResearchResult>(&raw) {
                Ok(cached) => {
                    self.stats.record_hit();
                    tracing::debug!("research cache hit: {}", &fp[..12]);
                    return cached;
                }
                Err(e) => tracing::warn!("discarding unreadable cache entry: {}", e),
            },
            Ok(None) => {}
            Err(e) => tracing::warn!("cache read failed, treating as miss: {}", e),
        }
        self.stats.record_miss();

        let (mut insights, succeeded) = self.fan_out(query, cancel).await;
        let degraded = succeeded < self.cfg.min_providers;

        if degraded {
            tracing::warn!(
                "research degraded: {}/{} providers responded, engaging fallback",
                succeeded,
                self.providers.len()
            );
            match tokio::time::timeout(self.cfg.provider_timeout, self.fallback.search(query)).await
            {
                Ok(Ok(extra)) => insights.extend(extra),
                Ok(Err(e)) => tracing::warn!("fallback provider failed: {}", e),
                Err(_) => tracing::warn!("fallback provider timed out"),
            }
        }

        self.rank_insights(query, &mut insights).await;
        let synthesized_summary = self.synthesize_summary(&insights);

        let result = ResearchResult {
            query_fingerprint: fp,
            insights,
            degraded,
            synthesized_summary,
            retrieved_at: Utc::now(),
        };

        let intent = self.classifier.classify(query);
        let mut ttl = intent.cache_ttl();
        if degraded {
            // 降级结果缓存时间压缩，尽快允许一次健康重试
            ttl = ttl.div_f64(4.0).max(Duration::from_secs(60));
        }

        match serde_json::to_string(&result) {
            Ok(raw) => {
                if let Err(e) = self.store.set(&cache_key, &raw, Some(ttl)).await {
                    tracing::warn!("cache write failed: {}", e);
                }
            }
            Err(e) => tracing::warn!("cache serialization failed: {}", e),
        }

        result
    }

    /// 并发扇出全部提供方，收集总体超时前返回的结果。
    /// 返回 (洞察, 成功的提供方数)。
    async fn fan_out(
        &self,
        query: &str,
        cancel: &CancellationToken,
    ) -> (Vec<ResearchInsight>, usize) {
        let mut pending: FuturesUnordered<_> = self
            .providers
            .iter()
            .map(|provider| {
                let provider = provider.clone();
                let query = query.to_string();
                let timeout = self.cfg.provider_timeout;
                let cancel = cancel.clone();
                async move {
                    let result = tokio::select! {
                        _ = cancel.cancelled() => Err(ProviderError::Cancelled),
                        outcome = tokio::time::timeout(timeout, provider.search(&query)) => {
                            match outcome {
                                Ok(inner) => inner,
                                Err(_) => Err(ProviderError::Timeout),
                            }
                        }
                    };
                    (provider.name().to_string(), result)
                }
            })
            .collect();

        let deadline = tokio::time::sleep(self.cfg.overall_timeout);
        tokio::pin!(deadline);

        let mut insights = Vec::new();
        let mut succeeded = 0usize;

        loop {
            tokio::select! {
                _ = &mut deadline => {
                    tracing::warn!("overall research deadline reached with providers still pending");
                    break;
                }
                _ = cancel.cancelled() => break,
                item = pending.next() => match item {
                    Some((name, Ok(batch))) => {
                        tracing::debug!("provider {} returned {} insights", name, batch.len());
                        succeeded += 1;
                        insights.extend(batch);
                    }
                    Some((name, Err(e))) => {
                        tracing::warn!("provider {} failed: {}", name, e);
                    }
                    None => break,
                },
            }
        }

        (insights, succeeded)
    }

    /// 置信度降序排序；配置了嵌入时按查询相似度混合评分。
    /// 同分按提供方优先级排名，保证相同输入的合成输出确定。
    async fn rank_insights(&self, query: &str, insights: &mut [ResearchInsight]) {
        let rank_of = self.priority_ranks();
        let rank = |insight: &ResearchInsight| -> usize {
            rank_of
                .get(insight.provider_name.as_str())
                .copied()
                .unwrap_or(self.providers.len())
        };

        let mut scores: Option<Vec<f64>> = None;
        if let Some(embedder) = &self.embedder {
            if let Ok(query_vec) = embedder.embed(query).await {
                let mut blended = Vec::with_capacity(insights.len());
                let mut ok = true;
                for insight in insights.iter() {
                    match embedder.embed(&insight.summary_text).await {
                        Ok(vec) => {
                            let sim = cosine(&query_vec, &vec) as f64;
                            blended.push(0.5 * insight.confidence + 0.5 * sim.max(0.0));
                        }
                        Err(e) => {
                            tracing::debug!("embedding failed, confidence-only ranking: {}", e);
                            ok = false;
                            break;
                        }
                    }
                }
                if ok {
                    scores = Some(blended);
                }
            }
        }

        match scores {
            Some(scores) => {
                let mut order: Vec<usize> = (0..insights.len()).collect();
                order.sort_by(|&a, &b| {
                    scores[b]
                        .partial_cmp(&scores[a])
                        .unwrap_or(std::cmp::Ordering::Equal)
                        .then_with(|| rank(&insights[a]).cmp(&rank(&insights[b])))
                });
                let reordered: Vec<ResearchInsight> =
                    order.iter().map(|&i| insights[i].clone()).collect();
                insights.clone_from_slice(&reordered);
            }
            None => {
                insights.sort_by(|a, b| {
                    b.confidence
                        .partial_cmp(&a.confidence)
                        .unwrap_or(std::cmp::Ordering::Equal)
                        .then_with(|| rank(a).cmp(&rank(b)))
                });
            }
        }
    }

    fn priority_ranks(&self) -> HashMap<&str, usize> {
        self.providers
            .iter()
            .enumerate()
            .map(|(i, p)| (p.name(), i))
            .collect()
    }

    /// 按排名合并洞察为一段有界摘要
    fn synthesize_summary(&self, insights: &[ResearchInsight]) -> String {
        if insights.is_empty() {
            return "No research signal was available; proceeding with baseline growth heuristics."
                .to_string();
        }

        let mut summary = String::new();
        for insight in insights {
            let line = format!("- [{}] {}\n", insight.provider_name, insight.summary_text);
            if summary.chars().count() + line.chars().count() > self.cfg.max_summary_chars {
                break;
            }
            summary.push_str(&line);
        }

        if summary.is_empty() {
            // 首条就超限：截断保留
            summary = insights[0]
                .summary_text
                .chars()
                .take(self.cfg.max_summary_chars)
                .collect();
        }

        summary.trim_end().to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use async_trait::async_trait;
    use serde_json::json;
    use std::sync::atomic::AtomicUsize;

    struct CountingProvider {
        name: String,
        confidence: f64,
        calls: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl ResearchProvider for CountingProvider {
        fn name(&self) -> &str {
            &self.name
        }

        async fn search(&self, query: &str) -> Result<Vec<ResearchInsight>, ProviderError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(vec![ResearchInsight::new(
                self.name.clone(),
                query,
                format!("insight from {}", self.name),
                self.confidence,
                json!({}),
            )])
        }
    }

    struct SlowProvider;

    #[async_trait]
    impl ResearchProvider for SlowProvider {
        fn name(&self) -> &str {
            "slow"
        }

        async fn search(&self, _query: &str) -> Result<Vec<ResearchInsight>, ProviderError> {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok(vec![])
        }
    }

    fn coordinator_with(
        providers: Vec<Arc<dyn ResearchProvider>>,
        cfg: ResearchConfig,
    ) -> ResearchCoordinator {
        ResearchCoordinator::new(
            providers,
            Arc::new(super::super::provider::SimulatedProvider),
            Arc::new(MemoryStore::new()),
            Arc::new(IntentClassifier::new()),
            None,
            cfg,
        )
    }

    #[tokio::test]
    async fn test_cache_idempotence() {
        let calls = Arc::new(AtomicUsize::new(0));
        let provider = Arc::new(CountingProvider {
            name: "p1".into(),
            confidence: 0.9,
            calls: calls.clone(),
        });
        let coordinator = coordinator_with(
            vec![provider],
            ResearchConfig {
                min_providers: 1,
                ..Default::default()
            },
        );

        let cancel = CancellationToken::new();
        let first = coordinator.research("fitness growth tactics", &cancel).await;
        let second = coordinator.research("  Fitness   GROWTH tactics ", &cancel).await;

        // 规范化后的相同查询在 TTL 内绝不触发第二次扇出
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(first.query_fingerprint, second.query_fingerprint);
        assert_eq!(coordinator.cache_stats(), (1, 1));
    }

    #[tokio::test]
    async fn test_degraded_still_returns_summary() {
        let calls = Arc::new(AtomicUsize::new(0));
        let fast: Arc<dyn ResearchProvider> = Arc::new(CountingProvider {
            name: "fast".into(),
            confidence: 0.8,
            calls,
        });
        let coordinator = coordinator_with(
            vec![fast, Arc::new(SlowProvider), Arc::new(SlowProvider)],
            ResearchConfig {
                provider_timeout: Duration::from_millis(50),
                overall_timeout: Duration::from_millis(400),
                min_providers: 2,
                ..Default::default()
            },
        );

        let result = coordinator
            .research("yoga growth", &CancellationToken::new())
            .await;

        assert!(result.degraded);
        assert!(!result.synthesized_summary.is_empty());
        // 真实结果 + 模拟兜底都在
        assert!(result.insights.iter().any(|i| i.provider_name == "fast"));
        assert!(result
            .insights
            .iter()
            .any(|i| i.provider_name == "simulated"));
    }

    #[tokio::test]
    async fn test_equal_confidence_tie_break_is_priority_order() {
        let calls = Arc::new(AtomicUsize::new(0));
        let a: Arc<dyn ResearchProvider> = Arc::new(CountingProvider {
            name: "alpha".into(),
            confidence: 0.7,
            calls: calls.clone(),
        });
        let b: Arc<dyn ResearchProvider> = Arc::new(CountingProvider {
            name: "beta".into(),
            confidence: 0.7,
            calls,
        });
        let coordinator = coordinator_with(
            vec![a, b],
            ResearchConfig {
                min_providers: 1,
                ..Default::default()
            },
        );

        let result = coordinator
            .research("tie break", &CancellationToken::new())
            .await;

        assert_eq!(result.insights[0].provider_name, "alpha");
        assert_eq!(result.insights[1].provider_name, "beta");
    }

    #[tokio::test]
    async fn test_summary_is_bounded() {
        let calls = Arc::new(AtomicUsize::new(0));
        let provider: Arc<dyn ResearchProvider> = Arc::new(CountingProvider {
            name: "p".into(),
            confidence: 0.9,
            calls,
        });
        let coordinator = coordinator_with(
            vec![provider],
            ResearchConfig {
                min_providers: 1,
                max_summary_chars: 30,
                ..Default::default()
            },
        );

        let result = coordinator
            .research("bounded summary", &CancellationToken::new())
            .await;
        assert!(result.synthesized_summary.chars().count() <= 30);
        assert!(!result.synthesized_summary.is_empty());
    }

    #[test]
    fn test_fingerprint_normalization() {
        assert_eq!(fingerprint("A  Query "), fingerprint("a query"));
        assert_ne!(fingerprint("a query"), fingerprint("another query"));
    }
}
