//! Request handlers: submission, polling, task listing.

use serde_json::{json, Value};
use std::sync::Arc;
use tracing::info;
use uuid::Uuid;

use super::models::{AnalyzeRequest, AnalyzeResponse, ErrorResponse, MediaSource, ProgressResponse};
use crate::error::PipelineResult;
use crate::fetch::MediaFetcher;
use crate::pipeline::PipelineOrchestrator;
use crate::tracker::TaskStatus;

/// Register a new task and start the pipeline in the background.
///
/// Returns immediately with the task ID; downloading (for URL submissions)
/// and all analysis happen on the spawned task.
pub async fn submit(
    orchestrator: Arc<PipelineOrchestrator>,
    fetcher: Arc<MediaFetcher>,
    request: AnalyzeRequest,
) -> PipelineResult<AnalyzeResponse> {
    let task_id = Uuid::new_v4().to_string();
    orchestrator.tracker().create(&task_id).await?;
    info!("Accepted analysis task {}", task_id);

    let spawned_id = task_id.clone();
    tokio::spawn(async move {
        let AnalyzeRequest { source, options } = request;
        let media = match source {
            MediaSource::Bytes(bytes) => Ok(bytes),
            MediaSource::Url(url) => {
                let _ = orchestrator
                    .tracker()
                    .report_progress(&spawned_id, "Downloading video", 5)
                    .await;
                fetcher.fetch(&url).await
            }
        };

        match media {
            Ok(media) => orchestrator.run(spawned_id, media, options).await,
            Err(e) => {
                if let Err(finish_err) = orchestrator
                    .tracker()
                    .finish(&spawned_id, TaskStatus::Error, Some(e.to_string()))
                    .await
                {
                    tracing::warn!(
                        "Task {} could not be marked failed: {}",
                        spawned_id,
                        finish_err
                    );
                }
            }
        }
    });

    Ok(AnalyzeResponse {
        task_id,
        status: "pending".to_string(),
    })
}

/// Poll a task: the full result once completed, the error record for failed
/// tasks, pending progress otherwise. Unknown task IDs surface as
/// `TaskNotFound`.
pub async fn poll(orchestrator: &PipelineOrchestrator, task_id: &str) -> PipelineResult<Value> {
    let snapshot = orchestrator.tracker().get_status(task_id).await?;
    let body = match snapshot.status {
        TaskStatus::Completed => match snapshot.result {
            Some(result) => serde_json::to_value(result)?,
            // completed record restored from a store predating result
            // persistence; never a partial result
            None => serde_json::to_value(ErrorResponse::new(
                "analysis result is no longer available".to_string(),
            ))?,
        },
        TaskStatus::Error => serde_json::to_value(ErrorResponse::new(
            snapshot
                .message
                .unwrap_or_else(|| "analysis failed".to_string()),
        ))?,
        TaskStatus::InProgress => serde_json::to_value(ProgressResponse {
            status: "pending".to_string(),
            progress: snapshot.progress,
            current_step: snapshot.current_step,
        })?,
    };
    Ok(body)
}

/// Status and progress for every known task
pub async fn list_tasks(orchestrator: &PipelineOrchestrator) -> PipelineResult<Value> {
    let tasks = orchestrator.tracker().list_tasks().await;
    Ok(json!({ "tasks": tasks, "count": tasks.len() }))
}

pub async fn health_check() -> Value {
    json!({ "status": "ok" })
}
