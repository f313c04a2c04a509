//! 回合级错误分类
//!
//! 传播策略：单个提供方/专家的失败在各自组件内吸收，只降质量不降可用性；
//! 使整个阶段输出不可用的失败在会话里表现为结构化 error 态响应；
//! 这里的 Result 错误只留给调用方输入问题与基础设施故障。

use thiserror::Error;

use crate::session::Stage;
use crate::store::StoreError;

#[derive(Debug, Error)]
pub enum CoachError {
    /// 会话不存在且调用方未请求创建
    #[error("session not found for user {0}")]
    SessionNotFound(String),

    /// 调用方指定的阶段与会话当前阶段不符（不允许跳转）
    #[error("invalid transition from {from:?} to {requested:?}")]
    InvalidTransition { from: Stage, requested: Stage },

    /// 同一用户已有在途回合，等待超时
    #[error("another turn is in flight for user {0}")]
    SessionBusy(String),

    #[error(transparent)]
    Store(#[from] StoreError),
}
