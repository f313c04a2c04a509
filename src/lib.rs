//! Bloom - Rust 增长教练智能体后端
//!
//! 把用户的增长目标（"60 天从 500 涨到 5000 粉"）变成一份经过校验、
//! 有安全边界的自动化计划。模块划分：
//! - **config**: 应用配置加载（TOML + 环境变量）
//! - **core**: 组合根（GrowthCoach）与错误分类
//! - **dispatch**: 自动化后端派发（限速、拟人化、重试、状态记录）
//! - **llm**: LLM 客户端抽象与实现（OpenRouter 兼容 / Mock）、嵌入、意图路由
//! - **planner**: 策略 → 执行计划的确定性转换
//! - **research**: 多提供方调研扇出、降级兜底与合成
//! - **safety**: 任务类别安全过滤（默认拒绝）
//! - **session**: 会话状态机与目标上下文抽取
//! - **store**: 键值存储抽象（内存 / 文件）
//! - **strategy**: 专家策略评估与冲突消解合并

pub mod config;
pub mod core;
pub mod dispatch;
pub mod llm;
pub mod observability;
pub mod planner;
pub mod research;
pub mod safety;
pub mod session;
pub mod store;
pub mod strategy;

pub use crate::core::{CoachError, GrowthCoach};
pub use session::{Stage, TurnRequest, TurnResponse};
