/// Video Insight
///
/// Asynchronous media-analysis service: splits submitted videos into
/// segments, samples frame montages, chunks and transcribes the audio track,
/// and drives external vision/moderation/metadata collaborators to produce a
/// structured analysis result, available by polling or webhook callback.

pub mod analysis;
pub mod api;
pub mod audio;
pub mod callback;
pub mod collaborators;
pub mod config;
pub mod error;
pub mod fetch;
pub mod frames;
pub mod pipeline;
pub mod store;
pub mod tracker;
pub mod video;

// Re-export main types for easy access
pub use crate::analysis::{AnalysisResult, ContentClassification, MetadataRecord, ResultAggregator};
pub use crate::audio::{AudioChunker, ChunkEncoder, TranscriptOutcome};
pub use crate::callback::CallbackDispatcher;
pub use crate::config::{Config, ConfigBuilder, DurabilityPolicy};
pub use crate::error::{PipelineError, PipelineResult};
pub use crate::fetch::MediaFetcher;
pub use crate::frames::{FrameSampler, Montage};
pub use crate::pipeline::{PipelineOrchestrator, TaskOptions};
pub use crate::store::{JsonFileStore, TaskStore};
pub use crate::tracker::{ProgressReporter, TaskStatus, TaskTracker};
pub use crate::video::{MediaInfo, MediaSplitter, Segment};
