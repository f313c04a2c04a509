//! Tavily 搜索提供方

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;

use super::provider::{ProviderError, ResearchInsight, ResearchProvider};

/// Tavily API 客户端：POST /search，score 直接作为置信度
pub struct TavilyProvider {
    api_key: String,
    endpoint: String,
    max_results: usize,
    http: reqwest::Client,
}

#[derive(Deserialize)]
struct TavilyResponse {
    #[serde(default)]
    results: Vec<TavilyResult>,
}

#[derive(Deserialize)]
struct TavilyResult {
    #[serde(default)]
    title: String,
    #[serde(default)]
    content: String,
    #[serde(default)]
    url: String,
    #[serde(default)]
    score: Option<f64>,
}

impl TavilyProvider {
    pub fn new(api_key: impl Into<String>, timeout_secs: u64) -> Self {
        Self {
            api_key: api_key.into(),
            endpoint: "https://api.tavily.com/search".to_string(),
            max_results: 5,
            http: reqwest::Client::builder()
                .timeout(std::time::Duration::from_secs(timeout_secs))
                .build()
                .unwrap_or_default(),
        }
    }

}

#[async_trait]
impl ResearchProvider for TavilyProvider {
    fn name(&self) -> &str {
        "tavily"
    }

    async fn search(&self, query: &str) -> Result<Vec<ResearchInsight>, ProviderError> {
        let body = json!({
            "api_key": self.api_key,
            "query": query,
            "max_results": self.max_results,
            "search_depth": "basic",
        });

        let response = self
            .http
            .post(&self.endpoint)
            .json(&body)
            .send()
            .await
            .map_err(map_reqwest_error)?;

        if response.status().as_u16() == 429 {
            return Err(ProviderError::Quota);
        }
        if !response.status().is_success() {
            return Err(ProviderError::Http(format!(
                "tavily returned {}",
                response.status()
            )));
        }

        let parsed: TavilyResponse = response
            .json()
            .await
            .map_err(|e| ProviderError::Malformed(e.to_string()))?;

        let insights = parsed
            .results
            .into_iter()
            .filter(|r| !r.content.is_empty())
            .map(|r| {
                let summary = if r.title.is_empty() {
                    r.content.clone()
                } else {
                    format!("{}: {}", r.title, r.content)
                };
                ResearchInsight::new(
                    "tavily",
                    query,
                    summary,
                    r.score.unwrap_or(0.55),
                    json!({ "url": r.url, "title": r.title }),
                )
            })
            .collect();

        Ok(insights)
    }
}

pub(super) fn map_reqwest_error(e: reqwest::Error) -> ProviderError {
    if e.is_timeout() {
        ProviderError::Timeout
    } else {
        ProviderError::Http(e.to_string())
    }
}
