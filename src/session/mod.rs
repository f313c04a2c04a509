//! 会话层：目标上下文抽取与会话状态机

pub mod context;
pub mod machine;

pub use context::{ExperienceLevel, GoalContext};
pub use machine::{
    ConversationMachine, ConversationSession, MachineConfig, SessionSummary, Stage, TurnRequest,
    TurnResponse,
};
