//! 调研层：多提供方扇出、降级兜底与结果合成

pub mod apify;
pub mod coordinator;
pub mod parallel;
pub mod provider;
pub mod tavily;

pub use apify::ApifyProvider;
pub use coordinator::{fingerprint, CacheStats, ResearchConfig, ResearchCoordinator, ResearchResult};
pub use parallel::ParallelProvider;
pub use provider::{ProviderError, ResearchInsight, ResearchProvider, SimulatedProvider};
pub use tavily::TavilyProvider;
