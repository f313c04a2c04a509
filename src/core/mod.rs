//! 核心层：组合根与错误分类

pub mod error;
pub mod orchestrator;

pub use error::CoachError;
pub use orchestrator::GrowthCoach;
