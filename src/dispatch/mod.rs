//! 派发层：自动化后端客户端与限速派发器

pub mod client;
pub mod dispatcher;

pub use client::{
    AutomationClient, DispatchError, HttpAutomationClient, MockAutomationClient, RemoteStatus,
    RemoteTaskState,
};
pub use dispatcher::{
    DispatchConfig, DispatchRecord, DispatchState, Dispatcher, ExecutionStatus,
};
