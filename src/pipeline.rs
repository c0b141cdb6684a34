//! Task orchestration: runs the visual and audio branches concurrently, then
//! drives the collaborator stages and records the terminal result.

use async_trait::async_trait;
use futures::future::join_all;
use std::path::Path;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tracing::{info, warn};

use crate::analysis::{AnalysisResult, ContentClassification, MetadataRecord, ResultAggregator};
use crate::audio::{AudioChunker, FfmpegChunkEncoder, TranscriptOutcome};
use crate::callback::CallbackDispatcher;
use crate::collaborators::providers::{
    GeminiMetadataExtractor, OpenAiDescriber, OpenAiModerator, WhisperTranscriber,
};
use crate::collaborators::{MetadataExtractor, Moderator, Transcriber, VisionDescriber};
use crate::config::Config;
use crate::error::{PipelineError, PipelineResult};
use crate::frames::{FrameSampler, Montage};
use crate::tracker::{ProgressReporter, TaskStatus, TaskTracker};
use crate::video::MediaSplitter;

/// Per-task options carried from the submission request
#[derive(Debug, Clone, Default)]
pub struct TaskOptions {
    pub identifier: Option<String>,
    pub platform: Option<String>,
    pub classify_content: bool,
}

/// Visual branch: media bytes in, ordered frame montages out
#[async_trait]
pub trait VisualAnalyzer: Send + Sync {
    async fn analyze(
        &self,
        media: &[u8],
        progress: &ProgressReporter,
    ) -> PipelineResult<Vec<Montage>>;
}

/// Audio branch: media bytes in, transcript outcome out
#[async_trait]
pub trait AudioAnalyzer: Send + Sync {
    async fn transcribe_media(
        &self,
        media: &[u8],
        work_dir: &Path,
        progress: &ProgressReporter,
    ) -> TranscriptOutcome;
}

/// Default visual branch: ffmpeg segment splitting followed by per-segment
/// montage sampling. Segments are sampled concurrently but montages come back
/// in segment order.
pub struct MediaVisualAnalyzer {
    splitter: MediaSplitter,
    sampler: FrameSampler,
}

impl MediaVisualAnalyzer {
    pub fn new(splitter: MediaSplitter, sampler: FrameSampler) -> Self {
        Self { splitter, sampler }
    }
}

#[async_trait]
impl VisualAnalyzer for MediaVisualAnalyzer {
    async fn analyze(
        &self,
        media: &[u8],
        progress: &ProgressReporter,
    ) -> PipelineResult<Vec<Montage>> {
        let task_id = progress.task_id();
        let _ = progress.report("Splitting video into segments", 10).await;
        let segments = self.splitter.split(media).await?;
        let _ = progress.report("Sampling frames from segments", 15).await;

        let sampled = join_all(segments.iter().map(|s| self.sampler.sample(s))).await;

        let mut montages = Vec::new();
        for (segment, result) in segments.iter().zip(sampled) {
            match result {
                Ok(Some(montage)) => montages.push(montage),
                Ok(None) => {
                    warn!(
                        "Task {}: no frames could be read from segment {}",
                        task_id, segment.index
                    );
                }
                Err(e) => {
                    warn!(
                        "Task {}: montage for segment {} failed: {}",
                        task_id, segment.index, e
                    );
                }
            }
        }

        let _ = progress.report("Generated frame montages", 25).await;
        Ok(montages)
    }
}

#[async_trait]
impl AudioAnalyzer for AudioChunker {
    async fn transcribe_media(
        &self,
        media: &[u8],
        work_dir: &Path,
        progress: &ProgressReporter,
    ) -> TranscriptOutcome {
        self.run(media, work_dir, progress).await
    }
}

/// Runs every submitted task from raw media bytes to a stored
/// `AnalysisResult`, reporting progress through the tracker throughout.
pub struct PipelineOrchestrator {
    tracker: Arc<TaskTracker>,
    visual: Arc<dyn VisualAnalyzer>,
    audio: Arc<dyn AudioAnalyzer>,
    describer: Arc<dyn VisionDescriber>,
    moderator: Arc<dyn Moderator>,
    metadata: Arc<dyn MetadataExtractor>,
    callbacks: Arc<CallbackDispatcher>,
}

impl PipelineOrchestrator {
    pub fn new(
        tracker: Arc<TaskTracker>,
        visual: Arc<dyn VisualAnalyzer>,
        audio: Arc<dyn AudioAnalyzer>,
        describer: Arc<dyn VisionDescriber>,
        moderator: Arc<dyn Moderator>,
        metadata: Arc<dyn MetadataExtractor>,
        callbacks: Arc<CallbackDispatcher>,
    ) -> Self {
        Self {
            tracker,
            visual,
            audio,
            describer,
            moderator,
            metadata,
            callbacks,
        }
    }

    /// Wire the production stack from configuration. A single semaphore
    /// bounds all ffmpeg work across both branches.
    pub fn from_config(config: &Config, tracker: Arc<TaskTracker>) -> PipelineResult<Self> {
        let jobs = Arc::new(Semaphore::new(config.media.max_ffmpeg_jobs));

        let splitter = MediaSplitter::new(config.media.max_segments, jobs.clone());
        let sampler = FrameSampler::new(
            config.media.frames_per_montage,
            config.media.montage_grid,
            jobs.clone(),
        );
        let encoder = Arc::new(FfmpegChunkEncoder::new(config.audio.sample_rate, jobs));
        let transcriber: Arc<dyn Transcriber> =
            Arc::new(WhisperTranscriber::new(&config.collaborators)?);
        let chunker = AudioChunker::new(
            config.audio.chunk_duration_ms,
            config.audio.max_chunk_bytes,
            encoder,
            transcriber,
        );

        Ok(Self::new(
            tracker,
            Arc::new(MediaVisualAnalyzer::new(splitter, sampler)),
            Arc::new(chunker),
            Arc::new(OpenAiDescriber::new(&config.collaborators)?),
            Arc::new(OpenAiModerator::new(&config.collaborators)?),
            Arc::new(GeminiMetadataExtractor::new(&config.collaborators)?),
            Arc::new(CallbackDispatcher::new(config.callbacks.clone())),
        ))
    }

    pub fn tracker(&self) -> &Arc<TaskTracker> {
        &self.tracker
    }

    /// Completed result for a task, if one has been recorded
    pub async fn get_result(&self, task_id: &str) -> Option<AnalysisResult> {
        self.tracker
            .get_status(task_id)
            .await
            .ok()
            .and_then(|snapshot| snapshot.result)
    }

    /// Execute the whole pipeline for one already-created task. Never
    /// returns an error: failures are recorded on the tracker.
    pub async fn run(&self, task_id: String, media: Vec<u8>, options: TaskOptions) {
        let work_dir = match tempfile::tempdir() {
            Ok(dir) => dir,
            Err(e) => {
                self.fail(&task_id, format!("could not create working directory: {}", e))
                    .await;
                return;
            }
        };

        let progress = ProgressReporter::new(self.tracker.clone(), &task_id);

        // Both branches always run to completion before any verdict. They
        // share one reporter so neither can pull overall progress backwards.
        let (montages, audio_outcome) = tokio::join!(
            self.visual.analyze(&media, &progress),
            self.audio
                .transcribe_media(&media, work_dir.path(), &progress),
        );

        let montages = match montages {
            Ok(montages) => montages,
            Err(e) => {
                self.fail(&task_id, format!("visual analysis failed: {}", e))
                    .await;
                return;
            }
        };
        if montages.is_empty() {
            self.fail(&task_id, PipelineError::NoMontages.to_string())
                .await;
            return;
        }

        let transcript = match &audio_outcome {
            TranscriptOutcome::Completed { text } => Some(text.clone()),
            TranscriptOutcome::Failed { reason, fatal } => {
                if *fatal {
                    self.fail(&task_id, reason.clone()).await;
                    return;
                }
                info!("Task {}: proceeding without transcript: {}", task_id, reason);
                None
            }
        };

        let _ = progress.report("Reviewing content safety", 35).await;
        let (is_safe, content_warnings) = match self.moderator.review(&montages).await {
            Ok(review) => review,
            Err(e) => {
                warn!("Task {}: moderation unavailable: {}", task_id, e);
                (false, vec!["moderation review unavailable".to_string()])
            }
        };

        let _ = progress.report("Describing visual content", 65).await;
        let mut descriptions = Vec::with_capacity(montages.len());
        for montage in &montages {
            match self.describer.describe_montage(&montage.image_base64).await {
                Ok(description) => descriptions.push(description),
                Err(e) => {
                    warn!(
                        "Task {}: description of segment {} failed: {}",
                        task_id, montage.segment_index, e
                    );
                    descriptions.push(format!(
                        "[segment {} description unavailable]",
                        montage.segment_index + 1
                    ));
                }
            }
        }

        let _ = progress.report("Synthesizing description", 75).await;
        let description = match self
            .describer
            .synthesize(&descriptions, transcript.as_deref())
            .await
        {
            Ok(description) => description,
            Err(e) => {
                self.fail(&task_id, format!("description synthesis failed: {}", e))
                    .await;
                return;
            }
        };
        let _ = self
            .tracker
            .complete_step(&task_id, "Synthesizing description")
            .await;

        let _ = progress.report("Extracting metadata", 90).await;
        let metadata = match self.metadata.extract(&description).await {
            Ok(record) => record,
            Err(e) => {
                warn!("Task {}: metadata extraction failed: {}", task_id, e);
                MetadataRecord::default()
            }
        };

        let classification: Option<ContentClassification> = if options.classify_content {
            match self.metadata.classify_content(&description).await {
                Ok(classification) => Some(classification),
                Err(e) => {
                    warn!("Task {}: content classification failed: {}", task_id, e);
                    None
                }
            }
        } else {
            None
        };

        let result = ResultAggregator::aggregate(
            description,
            transcript,
            is_safe,
            content_warnings,
            metadata,
            classification,
            options.classify_content,
        );

        // The result must be recorded before the task reads as completed;
        // finish flushes both to the store together.
        if let Err(e) = self.tracker.attach_result(&task_id, result.clone()).await {
            warn!("Task {}: result could not be recorded: {}", task_id, e);
        }
        if let Err(e) = self
            .tracker
            .finish(&task_id, TaskStatus::Completed, None)
            .await
        {
            warn!("Task {} could not be marked completed: {}", task_id, e);
        }

        if let Some(identifier) = &options.identifier {
            self.callbacks
                .dispatch(identifier, options.platform.as_deref(), &result)
                .await;
        }
    }

    async fn fail(&self, task_id: &str, message: String) {
        warn!("Task {} failed: {}", task_id, message);
        if let Err(e) = self
            .tracker
            .finish(task_id, TaskStatus::Error, Some(message))
            .await
        {
            warn!("Task {} could not be marked failed: {}", task_id, e);
        }
    }
}
