//! 执行派发器
//!
//! 把通过安全过滤的任务按用户逐个送入自动化后端：
//! - 动作之间随机延迟（拟人化），避免机械化的请求节奏
//! - 按用户的在途任务并发上限（Semaphore）
//! - 瞬态错误指数退避重试，预算耗尽标记 failed，绝不无限重试
//! - 每次状态变化都落盘 DispatchRecord，轮询方可随时读到真实进度
//! - 主存储写入失败时降级写本地文件存储（以可用性换持久性，有日志）

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use rand::Rng;
use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex, RwLock, Semaphore};

use crate::planner::{Task, TaskCategory};
use crate::store::{FileStore, KvStore};

use super::client::{AutomationClient, RemoteTaskState};

/// 任务派发状态：queued → in_progress → completed | failed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DispatchState {
    Queued,
    InProgress,
    Completed,
    Failed,
}

impl DispatchState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, DispatchState::Completed | DispatchState::Failed)
    }
}

/// 单任务的运行时状态记录；只有派发器可变更
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DispatchRecord {
    pub task_id: String,
    pub category: TaskCategory,
    pub state: DispatchState,
    pub attempts: u32,
    pub handle: Option<String>,
    pub last_error: Option<String>,
    pub updated_at: DateTime<Utc>,
}

/// 落盘格式：整组记录随执行整体覆盖
#[derive(Debug, Clone, Serialize, Deserialize)]
struct PersistedExecution {
    execution_id: String,
    user_id: String,
    records: Vec<DispatchRecord>,
}

/// 状态查询的汇总视图
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionStatus {
    pub execution_id: String,
    pub user_id: String,
    pub records: Vec<DispatchRecord>,
    pub total: usize,
    pub completed: usize,
    pub failed: usize,
    pub progress_percent: f64,
    pub finished: bool,
}

impl ExecutionStatus {
    fn from_records(execution_id: String, user_id: String, records: Vec<DispatchRecord>) -> Self {
        let total = records.len();
        let completed = records
            .iter()
            .filter(|r| r.state == DispatchState::Completed)
            .count();
        let failed = records
            .iter()
            .filter(|r| r.state == DispatchState::Failed)
            .count();
        let terminal = completed + failed;
        let progress_percent = if total > 0 {
            terminal as f64 / total as f64 * 100.0
        } else {
            100.0
        };
        Self {
            execution_id,
            user_id,
            finished: terminal == total,
            records,
            total,
            completed,
            failed,
            progress_percent,
        }
    }
}

#[derive(Debug, Clone)]
pub struct DispatchConfig {
    /// 拟人化延迟范围（毫秒）
    pub min_delay_ms: u64,
    pub max_delay_ms: u64,
    /// 单用户在途任务并发上限
    pub max_concurrent: usize,
    /// 入队重试预算（含首次）
    pub max_attempts: u32,
    /// 退避基数（毫秒），按次指数翻倍
    pub retry_base_ms: u64,
    pub poll_interval_ms: u64,
    pub max_polls: u32,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            min_delay_ms: 10_000,
            max_delay_ms: 120_000,
            max_concurrent: 3,
            max_attempts: 3,
            retry_base_ms: 500,
            poll_interval_ms: 2_000,
            max_polls: 10,
        }
    }
}

struct ExecutionTracker {
    user_id: String,
    records: Mutex<Vec<DispatchRecord>>,
}

pub struct Dispatcher {
    client: Arc<dyn AutomationClient>,
    store: Arc<dyn KvStore>,
    /// 主存储不可用时的本地降级
    fallback: Option<Arc<FileStore>>,
    cfg: DispatchConfig,
    executions: RwLock<HashMap<String, Arc<ExecutionTracker>>>,
}

impl Dispatcher {
    pub fn new(
        client: Arc<dyn AutomationClient>,
        store: Arc<dyn KvStore>,
        fallback: Option<Arc<FileStore>>,
        cfg: DispatchConfig,
    ) -> Self {
        Self {
            client,
            store,
            fallback,
            cfg,
            executions: RwLock::new(HashMap::new()),
        }
    }

    /// 入队一组已过滤任务，返回执行 ID；实际派发在后台进行
    pub async fn dispatch(self: Arc<Self>, user_id: &str, tasks: Vec<Task>) -> String {
        let execution_id = format!("exec_{}", uuid::Uuid::new_v4());
        let records: Vec<DispatchRecord> = tasks
            .iter()
            .map(|t| DispatchRecord {
                task_id: t.task_id.clone(),
                category: t.category,
                state: DispatchState::Queued,
                attempts: 0,
                handle: None,
                last_error: None,
                updated_at: Utc::now(),
            })
            .collect();

        let tracker = Arc::new(ExecutionTracker {
            user_id: user_id.to_string(),
            records: Mutex::new(records),
        });
        self.executions
            .write()
            .await
            .insert(execution_id.clone(), tracker.clone());
        self.persist(&execution_id, &tracker).await;

        tracing::info!(
            "execution {} queued with {} tasks for user {}",
            execution_id,
            tasks.len(),
            user_id
        );

        let dispatcher = self.clone();
        let run_id = execution_id.clone();
        let run_user = user_id.to_string();
        tokio::spawn(async move {
            dispatcher.run(run_id, run_user, tasks, tracker).await;
        });

        execution_id
    }

    /// 派发循环：单用户队列逐个入队，轮询在途任务直到终态
    async fn run(
        self: Arc<Self>,
        execution_id: String,
        user_id: String,
        tasks: Vec<Task>,
        tracker: Arc<ExecutionTracker>,
    ) {
        let semaphore = Arc::new(Semaphore::new(self.cfg.max_concurrent.max(1)));

        for (i, task) in tasks.into_iter().enumerate() {
            if i > 0 {
                self.humanized_pause().await;
            }

            let permit = match semaphore.clone().acquire_owned().await {
                Ok(p) => p,
                Err(_) => break,
            };

            self.update_record(&execution_id, &tracker, &task.task_id, |r| {
                r.state = DispatchState::InProgress;
            })
            .await;

            match self.enqueue_with_retry(&execution_id, &tracker, &user_id, &task).await {
                Some(handle) => {
                    self.update_record(&execution_id, &tracker, &task.task_id, |r| {
                        r.handle = Some(handle.clone());
                    })
                    .await;

                    let dispatcher = self.clone();
                    let poll_execution = execution_id.clone();
                    let poll_tracker = tracker.clone();
                    let task_id = task.task_id.clone();
                    tokio::spawn(async move {
                        let _permit = permit;
                        dispatcher
                            .poll_until_terminal(&poll_execution, &poll_tracker, &task_id, &handle)
                            .await;
                    });
                }
                None => drop(permit),
            }
        }
    }

    async fn humanized_pause(&self) {
        let delay_ms = {
            let mut rng = rand::thread_rng();
            rng.gen_range(self.cfg.min_delay_ms..=self.cfg.max_delay_ms.max(self.cfg.min_delay_ms))
        };
        if delay_ms > 0 {
            tokio::time::sleep(Duration::from_millis(delay_ms)).await;
        }
    }

    /// 有界重试入队；成功返回远端句柄，失败标记 failed 并返回 None
    async fn enqueue_with_retry(
        &self,
        execution_id: &str,
        tracker: &Arc<ExecutionTracker>,
        user_id: &str,
        task: &Task,
    ) -> Option<String> {
        let mut attempts = 0u32;
        loop {
            attempts += 1;
            self.update_record(execution_id, tracker, &task.task_id, |r| {
                r.attempts = attempts;
            })
            .await;

            match self.client.enqueue(user_id, task).await {
                Ok(handle) => return Some(handle),
                Err(e) if e.is_transient() && attempts < self.cfg.max_attempts => {
                    let backoff = self
                        .cfg
                        .retry_base_ms
                        .saturating_mul(1u64 << (attempts - 1).min(16));
                    tracing::warn!(
                        "task {} enqueue attempt {}/{} failed ({}), retrying in {}ms",
                        task.task_id,
                        attempts,
                        self.cfg.max_attempts,
                        e,
                        backoff
                    );
                    self.update_record(execution_id, tracker, &task.task_id, |r| {
                        r.last_error = Some(e.to_string());
                    })
                    .await;
                    tokio::time::sleep(Duration::from_millis(backoff)).await;
                }
                Err(e) => {
                    tracing::error!(
                        "task {} failed after {} attempts: {}",
                        task.task_id,
                        attempts,
                        e
                    );
                    self.update_record(execution_id, tracker, &task.task_id, |r| {
                        r.state = DispatchState::Failed;
                        r.last_error = Some(e.to_string());
                    })
                    .await;
                    return None;
                }
            }
        }
    }

    /// 有界轮询远端状态；预算耗尽时保留 in_progress，不伪造终态
    async fn poll_until_terminal(
        &self,
        execution_id: &str,
        tracker: &Arc<ExecutionTracker>,
        task_id: &str,
        handle: &str,
    ) {
        for _ in 0..self.cfg.max_polls {
            match self.client.status(handle).await {
                Ok(status) => match status.state {
                    RemoteTaskState::Completed => {
                        self.update_record(execution_id, tracker, task_id, |r| {
                            r.state = DispatchState::Completed;
                        })
                        .await;
                        return;
                    }
                    RemoteTaskState::Failed => {
                        self.update_record(execution_id, tracker, task_id, |r| {
                            r.state = DispatchState::Failed;
                            r.last_error = status.detail.clone();
                        })
                        .await;
                        return;
                    }
                    RemoteTaskState::Queued | RemoteTaskState::InProgress => {}
                },
                Err(e) => tracing::warn!("status poll for {} failed: {}", task_id, e),
            }
            tokio::time::sleep(Duration::from_millis(self.cfg.poll_interval_ms)).await;
        }
        tracing::warn!(
            "task {} still running after poll budget, leaving record in_progress",
            task_id
        );
    }

    async fn update_record<F>(
        &self,
        execution_id: &str,
        tracker: &Arc<ExecutionTracker>,
        task_id: &str,
        mutate: F,
    ) where
        F: FnOnce(&mut DispatchRecord),
    {
        {
            let mut records = tracker.records.lock().await;
            if let Some(record) = records.iter_mut().find(|r| r.task_id == task_id) {
                mutate(record);
                record.updated_at = Utc::now();
            }
        }
        self.persist(execution_id, tracker).await;
    }

    /// 整组记录快照落盘；主存储失败降级到文件存储
    async fn persist(&self, execution_id: &str, tracker: &Arc<ExecutionTracker>) {
        let persisted = PersistedExecution {
            execution_id: execution_id.to_string(),
            user_id: tracker.user_id.clone(),
            records: tracker.records.lock().await.clone(),
        };
        let raw = match serde_json::to_string(&persisted) {
            Ok(raw) => raw,
            Err(e) => {
                tracing::error!("dispatch record serialization failed: {}", e);
                return;
            }
        };
        let key = format!("dispatch:{}", execution_id);

        if let Err(e) = self.store.set(&key, &raw, None).await {
            tracing::warn!(
                "primary store write failed ({}), degrading to file-backed records",
                e
            );
            if let Some(fallback) = &self.fallback {
                if let Err(e) = fallback.set(&key, &raw, None).await {
                    tracing::error!("fallback record write also failed: {}", e);
                }
            }
        }
    }

    /// 当前执行状态；内存中没有时从存储恢复（进程重启后仍可查询）
    pub async fn execution_status(&self, execution_id: &str) -> Option<ExecutionStatus> {
        if let Some(tracker) = self.executions.read().await.get(execution_id) {
            let records = tracker.records.lock().await.clone();
            return Some(ExecutionStatus::from_records(
                execution_id.to_string(),
                tracker.user_id.clone(),
                records,
            ));
        }

        let key = format!("dispatch:{}", execution_id);
        let raw = match self.store.get(&key).await {
            Ok(Some(raw)) => Some(raw),
            _ => match &self.fallback {
                Some(fallback) => fallback.get(&key).await.ok().flatten(),
                None => None,
            },
        }?;

        match serde_json::from_str::<PersistedExecution>(&raw) {
            Ok(persisted) => Some(ExecutionStatus::from_records(
                persisted.execution_id,
                persisted.user_id,
                persisted.records,
            )),
            Err(e) => {
                tracing::warn!("unreadable dispatch record for {}: {}", execution_id, e);
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dispatch::client::MockAutomationClient;
    use crate::store::{MemoryStore, StoreError};
    use async_trait::async_trait;
    use serde_json::json;

    fn test_cfg() -> DispatchConfig {
        DispatchConfig {
            min_delay_ms: 0,
            max_delay_ms: 0,
            max_concurrent: 2,
            max_attempts: 3,
            retry_base_ms: 1,
            poll_interval_ms: 1,
            max_polls: 5,
        }
    }

    fn tasks(n: usize) -> Vec<Task> {
        (0..n)
            .map(|i| Task {
                task_id: format!("task_{}", i),
                category: TaskCategory::EngagementLike,
                scheduled_offset_minutes: 0,
                parameters: json!({}),
            })
            .collect()
    }

    async fn wait_finished(dispatcher: &Arc<Dispatcher>, execution_id: &str) -> ExecutionStatus {
        for _ in 0..200 {
            if let Some(status) = dispatcher.execution_status(execution_id).await {
                if status.finished {
                    return status;
                }
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        dispatcher
            .execution_status(execution_id)
            .await
            .expect("execution should exist")
    }

    #[tokio::test]
    async fn test_dispatch_completes_all_records() {
        let dispatcher = Arc::new(Dispatcher::new(
            Arc::new(MockAutomationClient::completing()),
            Arc::new(MemoryStore::new()),
            None,
            test_cfg(),
        ));
        let id = dispatcher.clone().dispatch("u1", tasks(3)).await;
        let status = wait_finished(&dispatcher, &id).await;
        assert_eq!(status.completed, 3);
        assert_eq!(status.failed, 0);
        assert!((status.progress_percent - 100.0).abs() < f64::EPSILON);
    }

    #[tokio::test]
    async fn test_transient_errors_retried_with_budget() {
        let client = Arc::new(MockAutomationClient::failing_first(2));
        let dispatcher = Arc::new(Dispatcher::new(
            client.clone(),
            Arc::new(MemoryStore::new()),
            None,
            test_cfg(),
        ));
        let id = dispatcher.clone().dispatch("u1", tasks(1)).await;
        let status = wait_finished(&dispatcher, &id).await;
        assert_eq!(status.completed, 1);
        assert_eq!(status.records[0].attempts, 3);
    }

    #[tokio::test]
    async fn test_retry_budget_exhaustion_marks_failed() {
        let client = Arc::new(MockAutomationClient::failing_first(100));
        let dispatcher = Arc::new(Dispatcher::new(
            client,
            Arc::new(MemoryStore::new()),
            None,
            test_cfg(),
        ));
        let id = dispatcher.clone().dispatch("u1", tasks(1)).await;
        let status = wait_finished(&dispatcher, &id).await;
        assert_eq!(status.failed, 1);
        assert_eq!(status.records[0].attempts, 3);
        assert!(status.records[0].last_error.is_some());
    }

    #[tokio::test]
    async fn test_rejection_is_not_retried() {
        let dispatcher = Arc::new(Dispatcher::new(
            Arc::new(MockAutomationClient::rejecting()),
            Arc::new(MemoryStore::new()),
            None,
            test_cfg(),
        ));
        let id = dispatcher.clone().dispatch("u1", tasks(1)).await;
        let status = wait_finished(&dispatcher, &id).await;
        assert_eq!(status.failed, 1);
        assert_eq!(status.records[0].attempts, 1);
    }

    struct BrokenStore;

    #[async_trait]
    impl KvStore for BrokenStore {
        async fn get(&self, _key: &str) -> Result<Option<String>, StoreError> {
            Err(StoreError::Unavailable("down".to_string()))
        }

        async fn set(
            &self,
            _key: &str,
            _value: &str,
            _ttl: Option<Duration>,
        ) -> Result<(), StoreError> {
            Err(StoreError::Unavailable("down".to_string()))
        }

        async fn acquire_lock(&self, _key: &str, _ttl: Duration) -> Result<bool, StoreError> {
            Err(StoreError::Unavailable("down".to_string()))
        }

        async fn release_lock(&self, _key: &str) -> Result<(), StoreError> {
            Err(StoreError::Unavailable("down".to_string()))
        }
    }

    #[tokio::test]
    async fn test_file_fallback_when_primary_store_down() {
        let dir = tempfile::tempdir().unwrap();
        let fallback = Arc::new(FileStore::new(dir.path()).unwrap());
        let dispatcher = Arc::new(Dispatcher::new(
            Arc::new(MockAutomationClient::completing()),
            Arc::new(BrokenStore),
            Some(fallback.clone()),
            test_cfg(),
        ));
        let id = dispatcher.clone().dispatch("u1", tasks(1)).await;
        let status = wait_finished(&dispatcher, &id).await;
        assert_eq!(status.completed, 1);

        // 降级路径写入了文件存储，重启后（绕过内存）也能恢复
        let raw = fallback
            .get(&format!("dispatch:{}", id))
            .await
            .unwrap()
            .expect("fallback record should exist");
        assert!(raw.contains("completed"));
    }
}
