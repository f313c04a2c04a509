//! Apify 抓取提供方
//!
//! 通过 run-sync-get-dataset-items 运行社媒抓取 actor，
//! 把数据集条目归一化为洞察；条目结构依 actor 而异，缺字段时尽量兜底。

use async_trait::async_trait;
use serde_json::json;

use super::provider::{ProviderError, ResearchInsight, ResearchProvider};
use super::tavily::map_reqwest_error;

pub struct ApifyProvider {
    api_token: String,
    actor: String,
    http: reqwest::Client,
}

impl ApifyProvider {
    pub fn new(api_token: impl Into<String>, actor: impl Into<String>, timeout_secs: u64) -> Self {
        Self {
            api_token: api_token.into(),
            actor: actor.into(),
            http: reqwest::Client::builder()
                .timeout(std::time::Duration::from_secs(timeout_secs))
                .build()
                .unwrap_or_default(),
        }
    }

    fn item_summary(item: &serde_json::Value) -> Option<String> {
        for field in ["caption", "text", "description", "title"] {
            if let Some(s) = item.get(field).and_then(|v| v.as_str()) {
                if !s.is_empty() {
                    return Some(s.to_string());
                }
            }
        }
        None
    }
}

#[async_trait]
impl ResearchProvider for ApifyProvider {
    fn name(&self) -> &str {
        "apify"
    }

    async fn search(&self, query: &str) -> Result<Vec<ResearchInsight>, ProviderError> {
        let url = format!(
            "https://api.apify.com/v2/acts/{}/run-sync-get-dataset-items",
            self.actor
        );
        let body = json!({
            "search": query,
            "resultsLimit": 10,
        });

        let response = self
            .http
            .post(&url)
            .query(&[("token", self.api_token.as_str())])
            .json(&body)
            .send()
            .await
            .map_err(map_reqwest_error)?;

        if response.status().as_u16() == 429 {
            return Err(ProviderError::Quota);
        }
        if !response.status().is_success() {
            return Err(ProviderError::Http(format!(
                "apify returned {}",
                response.status()
            )));
        }

        let items: Vec<serde_json::Value> = response
            .json()
            .await
            .map_err(|e| ProviderError::Malformed(e.to_string()))?;

        let insights = items
            .into_iter()
            .filter_map(|item| {
                let summary = Self::item_summary(&item)?;
                // 抓取数据无评分，带点赞数时略升置信度
                let confidence = if item.get("likesCount").and_then(|v| v.as_u64()).unwrap_or(0)
                    > 1000
                {
                    0.6
                } else {
                    0.5
                };
                Some(ResearchInsight::new(
                    "apify", query, summary, confidence, item,
                ))
            })
            .collect();

        Ok(insights)
    }
}
