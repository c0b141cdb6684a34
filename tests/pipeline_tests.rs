//! End-to-end orchestrator tests with in-process collaborator mocks.

use async_trait::async_trait;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use video_insight::analysis::{ContentClassification, Keyword, MetadataRecord};
use video_insight::api::handlers;
use video_insight::audio::TranscriptOutcome;
use video_insight::callback::CallbackDispatcher;
use video_insight::collaborators::{MetadataExtractor, Moderator, VisionDescriber};
use video_insight::config::{CallbackConfig, DurabilityPolicy};
use video_insight::error::{PipelineError, PipelineResult};
use video_insight::frames::Montage;
use video_insight::pipeline::{
    AudioAnalyzer, PipelineOrchestrator, TaskOptions, VisualAnalyzer,
};
use video_insight::store::MemoryStore;
use video_insight::tracker::{ProgressReporter, TaskStatus, TaskTracker};

struct MockVisual {
    montages: usize,
}

#[async_trait]
impl VisualAnalyzer for MockVisual {
    async fn analyze(
        &self,
        _media: &[u8],
        _progress: &ProgressReporter,
    ) -> PipelineResult<Vec<Montage>> {
        Ok((0..self.montages)
            .map(|i| Montage {
                segment_index: i,
                image_base64: format!("montage-{}", i),
            })
            .collect())
    }
}

struct MockAudio {
    outcome: TranscriptOutcome,
}

#[async_trait]
impl AudioAnalyzer for MockAudio {
    async fn transcribe_media(
        &self,
        _media: &[u8],
        _work_dir: &Path,
        _progress: &ProgressReporter,
    ) -> TranscriptOutcome {
        self.outcome.clone()
    }
}

#[derive(Default)]
struct MockDescriber {
    describe_calls: AtomicUsize,
    synthesize_calls: AtomicUsize,
    fail_segment: Option<usize>,
}

#[async_trait]
impl VisionDescriber for MockDescriber {
    async fn describe_montage(&self, image_base64: &str) -> PipelineResult<String> {
        let call = self.describe_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_segment == Some(call) {
            return Err(PipelineError::Collaborator("vision timeout".to_string()));
        }
        Ok(format!("scene from {}", image_base64))
    }

    async fn synthesize(
        &self,
        descriptions: &[String],
        transcript: Option<&str>,
    ) -> PipelineResult<String> {
        self.synthesize_calls.fetch_add(1, Ordering::SeqCst);
        let mut parts = descriptions.to_vec();
        if let Some(transcript) = transcript {
            parts.push(format!("transcript: {}", transcript));
        }
        Ok(parts.join(" | "))
    }
}

#[derive(Default)]
struct MockModerator {
    calls: AtomicUsize,
    fail: bool,
    warnings: Vec<String>,
}

#[async_trait]
impl Moderator for MockModerator {
    async fn review(&self, _montages: &[Montage]) -> PipelineResult<(bool, Vec<String>)> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.fail {
            return Err(PipelineError::Collaborator("moderation down".to_string()));
        }
        Ok((self.warnings.is_empty(), self.warnings.clone()))
    }
}

#[derive(Default)]
struct MockMetadata {
    extract_calls: AtomicUsize,
    classify_calls: AtomicUsize,
    fail_extract: bool,
    fail_classify: bool,
}

#[async_trait]
impl MetadataExtractor for MockMetadata {
    async fn extract(&self, _description: &str) -> PipelineResult<MetadataRecord> {
        self.extract_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_extract {
            return Err(PipelineError::Collaborator("metadata down".to_string()));
        }
        Ok(MetadataRecord {
            keywords: Some(vec![Keyword {
                keyword: "cooking".to_string(),
                weight: 8,
            }]),
            is_face_exist: Some(true),
            topics: Some(vec!["food".to_string()]),
            ..Default::default()
        })
    }

    async fn classify_content(&self, _description: &str) -> PipelineResult<ContentClassification> {
        self.classify_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_classify {
            return Err(PipelineError::Collaborator("classifier down".to_string()));
        }
        Ok(ContentClassification {
            is_match: true,
            confidence_score: Some(0.8),
            indicators: Some(vec!["kitchen".to_string()]),
        })
    }
}

struct Harness {
    orchestrator: PipelineOrchestrator,
    tracker: Arc<TaskTracker>,
    store: Arc<MemoryStore>,
    describer: Arc<MockDescriber>,
    moderator: Arc<MockModerator>,
    metadata: Arc<MockMetadata>,
}

fn harness(
    visual: MockVisual,
    audio: MockAudio,
    describer: MockDescriber,
    moderator: MockModerator,
    metadata: MockMetadata,
) -> Harness {
    let store = Arc::new(MemoryStore::new());
    let tracker = Arc::new(TaskTracker::new(
        store.clone(),
        DurabilityPolicy::WriteThrough,
    ));
    let describer = Arc::new(describer);
    let moderator = Arc::new(moderator);
    let metadata = Arc::new(metadata);
    let orchestrator = PipelineOrchestrator::new(
        tracker.clone(),
        Arc::new(visual),
        Arc::new(audio),
        describer.clone(),
        moderator.clone(),
        metadata.clone(),
        Arc::new(CallbackDispatcher::new(CallbackConfig {
            delivery_key: None,
            endpoints: std::collections::HashMap::new(),
            default_platform: None,
        })),
    );
    Harness {
        orchestrator,
        tracker,
        store,
        describer,
        moderator,
        metadata,
    }
}

fn completed_audio(text: &str) -> MockAudio {
    MockAudio {
        outcome: TranscriptOutcome::Completed {
            text: text.to_string(),
        },
    }
}

async fn run_task(h: &Harness, options: TaskOptions) -> &'static str {
    h.tracker.create("task-1").await.unwrap();
    h.orchestrator
        .run("task-1".to_string(), b"media".to_vec(), options)
        .await;
    "task-1"
}

#[tokio::test]
async fn test_happy_path_produces_complete_result() {
    let h = harness(
        MockVisual { montages: 2 },
        completed_audio("hello world"),
        MockDescriber::default(),
        MockModerator::default(),
        MockMetadata::default(),
    );

    let id = run_task(&h, TaskOptions::default()).await;

    let status = h.tracker.get_status(id).await.unwrap();
    assert_eq!(status.status, TaskStatus::Completed);
    assert_eq!(status.progress, 100);

    let result = h.orchestrator.get_result(id).await.unwrap();
    assert_eq!(result.status, "completed");
    assert!(result.is_safe);
    assert!(result.content_warnings.is_empty());
    assert_eq!(result.audio_transcription.as_deref(), Some("hello world"));
    assert!(result.description.contains("transcript: hello world"));
    assert_eq!(result.keywords.len(), 1);
    assert!(result.is_face_exist);
    assert_eq!(result.topics, Some(vec!["food".to_string()]));
    // classification was not requested, so the key must be absent
    assert!(result.content_classification.is_none());

    assert_eq!(h.describer.describe_calls.load(Ordering::SeqCst), 2);
    assert_eq!(h.describer.synthesize_calls.load(Ordering::SeqCst), 1);
    assert_eq!(h.metadata.classify_calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_zero_montages_aborts_before_collaborators() {
    let h = harness(
        MockVisual { montages: 0 },
        completed_audio("hello"),
        MockDescriber::default(),
        MockModerator::default(),
        MockMetadata::default(),
    );

    let id = run_task(&h, TaskOptions::default()).await;

    let status = h.tracker.get_status(id).await.unwrap();
    assert_eq!(status.status, TaskStatus::Error);
    assert!(status.message.unwrap().contains("montages"));
    assert!(h.orchestrator.get_result(id).await.is_none());

    assert_eq!(h.moderator.calls.load(Ordering::SeqCst), 0);
    assert_eq!(h.describer.describe_calls.load(Ordering::SeqCst), 0);
    assert_eq!(h.metadata.extract_calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_fatal_audio_failure_ends_task_in_error() {
    let h = harness(
        MockVisual { montages: 2 },
        MockAudio {
            outcome: TranscriptOutcome::Failed {
                reason: "audio chunk 2 is 26214400 bytes, exceeds limit of 25165824 bytes"
                    .to_string(),
                fatal: true,
            },
        },
        MockDescriber::default(),
        MockModerator::default(),
        MockMetadata::default(),
    );

    let id = run_task(&h, TaskOptions::default()).await;

    let status = h.tracker.get_status(id).await.unwrap();
    assert_eq!(status.status, TaskStatus::Error);
    assert!(status.message.unwrap().contains("exceeds limit"));
    assert_eq!(h.moderator.calls.load(Ordering::SeqCst), 0);
    assert_eq!(h.describer.describe_calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_soft_audio_failure_completes_without_transcript() {
    let h = harness(
        MockVisual { montages: 1 },
        MockAudio {
            outcome: TranscriptOutcome::Failed {
                reason: "media has no audio track".to_string(),
                fatal: false,
            },
        },
        MockDescriber::default(),
        MockModerator::default(),
        MockMetadata::default(),
    );

    let id = run_task(&h, TaskOptions::default()).await;

    assert_eq!(
        h.tracker.get_status(id).await.unwrap().status,
        TaskStatus::Completed
    );
    let result = h.orchestrator.get_result(id).await.unwrap();
    assert!(result.audio_transcription.is_none());
    assert!(!result.description.contains("transcript:"));
}

#[tokio::test]
async fn test_moderation_failure_marks_unsafe_but_completes() {
    let h = harness(
        MockVisual { montages: 1 },
        completed_audio("hello"),
        MockDescriber::default(),
        MockModerator {
            fail: true,
            ..Default::default()
        },
        MockMetadata::default(),
    );

    let id = run_task(&h, TaskOptions::default()).await;

    assert_eq!(
        h.tracker.get_status(id).await.unwrap().status,
        TaskStatus::Completed
    );
    let result = h.orchestrator.get_result(id).await.unwrap();
    assert!(!result.is_safe);
    assert_eq!(
        result.content_warnings,
        vec!["moderation review unavailable".to_string()]
    );
}

#[tokio::test]
async fn test_failed_segment_description_gets_placeholder() {
    let h = harness(
        MockVisual { montages: 3 },
        completed_audio("hello"),
        MockDescriber {
            fail_segment: Some(1),
            ..Default::default()
        },
        MockModerator::default(),
        MockMetadata::default(),
    );

    let id = run_task(&h, TaskOptions::default()).await;

    assert_eq!(
        h.tracker.get_status(id).await.unwrap().status,
        TaskStatus::Completed
    );
    let result = h.orchestrator.get_result(id).await.unwrap();
    assert!(result.description.contains("[segment 2 description unavailable]"));
    assert_eq!(h.describer.describe_calls.load(Ordering::SeqCst), 3);
}

#[tokio::test]
async fn test_metadata_failure_falls_back_to_empty_record() {
    let h = harness(
        MockVisual { montages: 1 },
        completed_audio("hello"),
        MockDescriber::default(),
        MockModerator::default(),
        MockMetadata {
            fail_extract: true,
            ..Default::default()
        },
    );

    let id = run_task(&h, TaskOptions::default()).await;

    let result = h.orchestrator.get_result(id).await.unwrap();
    assert_eq!(result.status, "completed");
    assert!(result.keywords.is_empty());
    assert!(!result.is_face_exist);
    assert!(result.topics.is_none());
}

#[tokio::test]
async fn test_classification_requested_and_supplied() {
    let h = harness(
        MockVisual { montages: 1 },
        completed_audio("hello"),
        MockDescriber::default(),
        MockModerator::default(),
        MockMetadata::default(),
    );

    let id = run_task(
        &h,
        TaskOptions {
            classify_content: true,
            ..Default::default()
        },
    )
    .await;

    let result = h.orchestrator.get_result(id).await.unwrap();
    let classification = result.content_classification.unwrap();
    assert!(classification.is_match);
    assert_eq!(classification.confidence_score, Some(0.8));
    assert_eq!(h.metadata.classify_calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_classifier_failure_defaults_classification() {
    let h = harness(
        MockVisual { montages: 1 },
        completed_audio("hello"),
        MockDescriber::default(),
        MockModerator::default(),
        MockMetadata {
            fail_classify: true,
            ..Default::default()
        },
    );

    let id = run_task(
        &h,
        TaskOptions {
            classify_content: true,
            ..Default::default()
        },
    )
    .await;

    let result = h.orchestrator.get_result(id).await.unwrap();
    let classification = result.content_classification.unwrap();
    assert!(!classification.is_match);
    assert!(classification.confidence_score.is_none());
}

#[tokio::test]
async fn test_moderation_warnings_flow_into_result() {
    let h = harness(
        MockVisual { montages: 1 },
        completed_audio("hello"),
        MockDescriber::default(),
        MockModerator {
            warnings: vec!["violence (high confidence)".to_string()],
            ..Default::default()
        },
        MockMetadata::default(),
    );

    let id = run_task(&h, TaskOptions::default()).await;

    let result = h.orchestrator.get_result(id).await.unwrap();
    assert!(!result.is_safe);
    assert_eq!(result.content_warnings.len(), 1);
}

#[tokio::test]
async fn test_poll_in_flight_task_reports_pending() {
    let h = harness(
        MockVisual { montages: 1 },
        completed_audio("hello"),
        MockDescriber::default(),
        MockModerator::default(),
        MockMetadata::default(),
    );

    h.tracker.create("task-1").await.unwrap();
    h.tracker
        .report_progress("task-1", "Downloading video", 5)
        .await
        .unwrap();

    let body = handlers::poll(&h.orchestrator, "task-1").await.unwrap();
    assert_eq!(body["status"], "pending");
    assert_eq!(body["progress"], 5);
    assert_eq!(body["current_step"], "Downloading video");
}

#[tokio::test]
async fn test_poll_completed_task_returns_full_result() {
    let h = harness(
        MockVisual { montages: 1 },
        completed_audio("hello"),
        MockDescriber::default(),
        MockModerator::default(),
        MockMetadata::default(),
    );

    let id = run_task(&h, TaskOptions::default()).await;

    let body = handlers::poll(&h.orchestrator, id).await.unwrap();
    assert_eq!(body["status"], "completed");
    assert_eq!(body["is_safe"], true);
    assert!(body["description"].as_str().unwrap().contains("hello"));
}

#[tokio::test]
async fn test_completed_result_survives_restart() {
    let h = harness(
        MockVisual { montages: 1 },
        completed_audio("hello"),
        MockDescriber::default(),
        MockModerator::default(),
        MockMetadata::default(),
    );

    let id = run_task(&h, TaskOptions::default()).await;
    assert!(h.orchestrator.get_result(id).await.is_some());

    // a fresh tracker over the same store sees the result after restore
    let tracker = TaskTracker::new(h.store.clone(), DurabilityPolicy::WriteThrough);
    tracker.restore().await.unwrap();
    let snapshot = tracker.get_status(id).await.unwrap();
    assert_eq!(snapshot.status, TaskStatus::Completed);
    let result = snapshot.result.unwrap();
    assert_eq!(result.status, "completed");
    assert_eq!(result.audio_transcription.as_deref(), Some("hello"));
}
