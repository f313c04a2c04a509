//! Parallel 深度搜索提供方

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;

use super::provider::{ProviderError, ResearchInsight, ResearchProvider};
use super::tavily::map_reqwest_error;

/// Parallel API 客户端：POST /v1/search，x-api-key 认证
///
/// 返回的 excerpt 较长，置信度给固定先验（该 API 不返回评分）。
pub struct ParallelProvider {
    api_key: String,
    base_url: String,
    http: reqwest::Client,
}

#[derive(Deserialize)]
struct ParallelResponse {
    #[serde(default)]
    results: Vec<ParallelResult>,
}

#[derive(Deserialize)]
struct ParallelResult {
    #[serde(default)]
    title: String,
    #[serde(default, alias = "excerpt", alias = "snippet")]
    excerpts: String,
    #[serde(default)]
    url: String,
}

impl ParallelProvider {
    pub fn new(api_key: impl Into<String>, base_url: impl Into<String>, timeout_secs: u64) -> Self {
        Self {
            api_key: api_key.into(),
            base_url: base_url.into(),
            http: reqwest::Client::builder()
                .timeout(std::time::Duration::from_secs(timeout_secs))
                .build()
                .unwrap_or_default(),
        }
    }
}

#[async_trait]
impl ResearchProvider for ParallelProvider {
    fn name(&self) -> &str {
        "parallel"
    }

    async fn search(&self, query: &str) -> Result<Vec<ResearchInsight>, ProviderError> {
        let url = format!("{}/v1/search", self.base_url.trim_end_matches('/'));
        let body = json!({
            "objective": query,
            "max_results": 5,
        });

        let response = self
            .http
            .post(&url)
            .header("x-api-key", &self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(map_reqwest_error)?;

        match response.status().as_u16() {
            401 | 403 => {
                return Err(ProviderError::Http("parallel rejected credentials".into()))
            }
            429 => return Err(ProviderError::Quota),
            s if s >= 400 => {
                return Err(ProviderError::Http(format!("parallel returned {}", s)))
            }
            _ => {}
        }

        let parsed: ParallelResponse = response
            .json()
            .await
            .map_err(|e| ProviderError::Malformed(e.to_string()))?;

        let insights = parsed
            .results
            .into_iter()
            .filter(|r| !r.excerpts.is_empty())
            .map(|r| {
                ResearchInsight::new(
                    "parallel",
                    query,
                    format!("{}: {}", r.title, r.excerpts),
                    0.65,
                    json!({ "url": r.url }),
                )
            })
            .collect();

        Ok(insights)
    }
}
