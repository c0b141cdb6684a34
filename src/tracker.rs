use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info};

use crate::analysis::AnalysisResult;
use crate::config::DurabilityPolicy;
use crate::error::{PipelineError, PipelineResult};
use crate::store::TaskStore;

/// Lifecycle status of a task.
///
/// `Completed` and `Error` are terminal; no further mutation is permitted once
/// a task reaches either.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    InProgress,
    Completed,
    Error,
}

impl TaskStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, TaskStatus::Completed | TaskStatus::Error)
    }
}

/// Progress and timing for one named step within a task
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepRecord {
    pub name: String,
    pub started_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
    pub progress: u8,
    pub duration_seconds: Option<f64>,
}

/// The full lifecycle record for one task.
///
/// Steps are kept in the order they were first reported so per-step timing
/// round-trips through the store in submission order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskRecord {
    pub status: TaskStatus,
    pub created_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub overall_progress: u8,
    pub steps: Vec<StepRecord>,
    pub total_duration_seconds: Option<f64>,
    /// Human-readable failure description for tasks that ended in error
    pub message: Option<String>,
    /// Analysis payload of a completed task, persisted with the record so
    /// results survive a process restart
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<AnalysisResult>,
}

impl TaskRecord {
    pub fn new(created_at: DateTime<Utc>) -> Self {
        Self {
            status: TaskStatus::InProgress,
            created_at,
            completed_at: None,
            overall_progress: 0,
            steps: Vec::new(),
            total_duration_seconds: None,
            message: None,
            result: None,
        }
    }

    /// Name of the most recently reported step, if any
    pub fn current_step(&self) -> Option<&str> {
        self.steps.last().map(|s| s.name.as_str())
    }

    fn step_mut(&mut self, name: &str) -> Option<&mut StepRecord> {
        self.steps.iter_mut().find(|s| s.name == name)
    }
}

/// Read-only status snapshot returned by polling
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskSnapshot {
    pub status: TaskStatus,
    pub progress: u8,
    pub current_step: Option<String>,
    pub message: Option<String>,
    pub result: Option<AnalysisResult>,
}

/// Summary entry for task listing
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskSummary {
    pub status: TaskStatus,
    pub progress: u8,
}

/// Single source of truth for task lifecycle state and step-level timing.
///
/// All mutation is serialized through one `RwLock` over the task table. Every
/// mutating call flushes the full table to the configured store according to
/// the durability policy; the in-memory view is always fresh, so pollers get
/// read-after-write consistency regardless of the flush strategy. Terminal
/// transitions always persist synchronously.
pub struct TaskTracker {
    tasks: RwLock<HashMap<String, TaskRecord>>,
    store: Arc<dyn TaskStore>,
    durability: DurabilityPolicy,
    last_flush: Mutex<Instant>,
}

impl TaskTracker {
    pub fn new(store: Arc<dyn TaskStore>, durability: DurabilityPolicy) -> Self {
        Self {
            tasks: RwLock::new(HashMap::new()),
            store,
            durability,
            last_flush: Mutex::new(Instant::now()),
        }
    }

    /// Load previously persisted tasks into the in-memory table
    pub async fn restore(&self) -> anyhow::Result<usize> {
        let loaded = self.store.load().await?;
        let count = loaded.len();
        *self.tasks.write().await = loaded;
        if count > 0 {
            info!("Restored {} tasks from store", count);
        }
        Ok(count)
    }

    /// Initialize a fresh in-progress task. Replaces any previous record held
    /// under the same ID.
    pub async fn create(&self, task_id: &str) -> PipelineResult<()> {
        {
            let mut tasks = self.tasks.write().await;
            tasks.insert(task_id.to_string(), TaskRecord::new(Utc::now()));
        }
        info!("Task {} created", task_id);
        self.flush(true).await;
        Ok(())
    }

    /// Record progress for a named step.
    ///
    /// The task must exist and must not be terminal. Progress is caller-driven:
    /// whatever value is given is recorded for both the step and the task;
    /// monotonicity is the caller's contract, not enforced here.
    pub async fn report_progress(
        &self,
        task_id: &str,
        step_name: &str,
        progress: u8,
    ) -> PipelineResult<()> {
        self.report_step(task_id, step_name, progress, progress)
            .await
    }

    /// Record a step's own progress while setting the task's overall figure
    /// independently. Used by `ProgressReporter` so concurrently reporting
    /// branches can keep per-step values exact without letting a late low
    /// report pull the overall figure backwards.
    pub async fn report_step(
        &self,
        task_id: &str,
        step_name: &str,
        step_progress: u8,
        overall: u8,
    ) -> PipelineResult<()> {
        {
            let mut tasks = self.tasks.write().await;
            let record = tasks
                .get_mut(task_id)
                .ok_or_else(|| PipelineError::TaskNotFound(task_id.to_string()))?;

            if record.status.is_terminal() {
                return Err(PipelineError::TaskFinished(task_id.to_string()));
            }

            match record.step_mut(step_name) {
                Some(step) => step.progress = step_progress,
                None => record.steps.push(StepRecord {
                    name: step_name.to_string(),
                    started_at: Utc::now(),
                    ended_at: None,
                    progress: step_progress,
                    duration_seconds: None,
                }),
            }
            record.overall_progress = overall;
        }

        debug!("Task {}: {} ({}%)", task_id, step_name, overall);
        self.flush(false).await;
        Ok(())
    }

    /// Attach the analysis payload to a task so it is persisted alongside the
    /// lifecycle record. Callers attach before the terminal transition; the
    /// following `finish` flushes both durably.
    pub async fn attach_result(&self, task_id: &str, result: AnalysisResult) -> PipelineResult<()> {
        {
            let mut tasks = self.tasks.write().await;
            let record = tasks
                .get_mut(task_id)
                .ok_or_else(|| PipelineError::TaskNotFound(task_id.to_string()))?;

            if record.status.is_terminal() {
                return Err(PipelineError::TaskFinished(task_id.to_string()));
            }
            record.result = Some(result);
        }
        self.flush(false).await;
        Ok(())
    }

    /// Mark a step as finished, recording its end time and duration
    pub async fn complete_step(&self, task_id: &str, step_name: &str) -> PipelineResult<()> {
        {
            let mut tasks = self.tasks.write().await;
            let record = tasks
                .get_mut(task_id)
                .ok_or_else(|| PipelineError::TaskNotFound(task_id.to_string()))?;

            if record.status.is_terminal() {
                return Err(PipelineError::TaskFinished(task_id.to_string()));
            }

            if let Some(step) = record.step_mut(step_name) {
                let now = Utc::now();
                step.ended_at = Some(now);
                step.duration_seconds =
                    Some((now - step.started_at).num_milliseconds() as f64 / 1000.0);
            }
        }
        self.flush(false).await;
        Ok(())
    }

    /// Transition the task to a terminal status and return a snapshot copy of
    /// its record. Steps that were never explicitly closed get their duration
    /// computed against the task end time. On success the overall progress is
    /// forced to 100.
    pub async fn finish(
        &self,
        task_id: &str,
        status: TaskStatus,
        message: Option<String>,
    ) -> PipelineResult<TaskRecord> {
        debug_assert!(status.is_terminal());

        let snapshot = {
            let mut tasks = self.tasks.write().await;
            let record = tasks
                .get_mut(task_id)
                .ok_or_else(|| PipelineError::TaskNotFound(task_id.to_string()))?;

            if record.status.is_terminal() {
                return Err(PipelineError::TaskFinished(task_id.to_string()));
            }

            let now = Utc::now();
            record.status = status;
            record.completed_at = Some(now);
            record.total_duration_seconds =
                Some((now - record.created_at).num_milliseconds() as f64 / 1000.0);
            record.message = message;

            for step in &mut record.steps {
                if step.ended_at.is_none() {
                    step.ended_at = Some(now);
                    step.duration_seconds =
                        Some((now - step.started_at).num_milliseconds() as f64 / 1000.0);
                }
            }

            if status == TaskStatus::Completed {
                record.overall_progress = 100;
            }

            record.clone()
        };

        info!(
            "Task {} finished with status {:?} after {:.2}s",
            task_id,
            snapshot.status,
            snapshot.total_duration_seconds.unwrap_or(0.0)
        );
        self.flush(true).await;
        Ok(snapshot)
    }

    /// Read-only status/progress snapshot. Unknown task IDs are an error.
    pub async fn get_status(&self, task_id: &str) -> PipelineResult<TaskSnapshot> {
        let tasks = self.tasks.read().await;
        let record = tasks
            .get(task_id)
            .ok_or_else(|| PipelineError::TaskNotFound(task_id.to_string()))?;

        Ok(TaskSnapshot {
            status: record.status,
            progress: record.overall_progress,
            current_step: record.current_step().map(|s| s.to_string()),
            message: record.message.clone(),
            result: record.result.clone(),
        })
    }

    /// Status/progress summary for every known task
    pub async fn list_tasks(&self) -> HashMap<String, TaskSummary> {
        let tasks = self.tasks.read().await;
        tasks
            .iter()
            .map(|(id, record)| {
                (
                    id.clone(),
                    TaskSummary {
                        status: record.status,
                        progress: record.overall_progress,
                    },
                )
            })
            .collect()
    }

    /// Flush the task table to the store. `force` bypasses the periodic
    /// batching window (used for create/finish so terminal state and task
    /// existence are always durable).
    async fn flush(&self, force: bool) {
        if !force {
            if let DurabilityPolicy::Periodic { seconds } = self.durability {
                let mut last = self.last_flush.lock().await;
                if last.elapsed().as_secs() < seconds {
                    return;
                }
                *last = Instant::now();
            }
        }

        let tasks = self.tasks.read().await;
        if let Err(e) = self.store.persist(&tasks).await {
            tracing::error!("Failed to persist task table: {}", e);
        }
    }
}

/// Progress funnel for the concurrently running branches of one task.
///
/// Each branch reports its own step values unchanged, but the task's overall
/// figure is clamped to the highest value reported so far. Pollers therefore
/// never observe overall progress moving backwards, whichever branch happens
/// to report last.
pub struct ProgressReporter {
    tracker: Arc<TaskTracker>,
    task_id: String,
    high_water: AtomicU8,
}

impl ProgressReporter {
    pub fn new(tracker: Arc<TaskTracker>, task_id: &str) -> Self {
        Self {
            tracker,
            task_id: task_id.to_string(),
            high_water: AtomicU8::new(0),
        }
    }

    pub fn task_id(&self) -> &str {
        &self.task_id
    }

    /// Record a step at `value`; the overall figure becomes
    /// `max(value, highest reported so far)`.
    pub async fn report(&self, step_name: &str, value: u8) -> PipelineResult<()> {
        let overall = self.high_water.fetch_max(value, Ordering::AcqRel).max(value);
        self.tracker
            .report_step(&self.task_id, step_name, value, overall)
            .await
    }
}
