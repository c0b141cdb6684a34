//! Seams to the external AI collaborators.
//!
//! The pipeline treats inference as opaque asynchronous calls behind these
//! traits; concrete HTTP providers live in `providers`. Trait objects keep the
//! orchestrator testable with in-process mocks.

pub mod providers;

use async_trait::async_trait;
use std::path::Path;

use crate::analysis::{ContentClassification, MetadataRecord};
use crate::error::PipelineResult;
use crate::frames::Montage;

/// Speech-to-text over one audio chunk file
#[async_trait]
pub trait Transcriber: Send + Sync {
    async fn transcribe(&self, audio_path: &Path) -> PipelineResult<String>;
}

/// Vision description: one call per montage, then one aggregation call
#[async_trait]
pub trait VisionDescriber: Send + Sync {
    /// Describe a single montage image (base64 PNG)
    async fn describe_montage(&self, image_base64: &str) -> PipelineResult<String>;

    /// Combine per-montage descriptions and the transcript into one
    /// free-text description
    async fn synthesize(
        &self,
        descriptions: &[String],
        transcript: Option<&str>,
    ) -> PipelineResult<String>;
}

/// Content-safety review over the montage set
#[async_trait]
pub trait Moderator: Send + Sync {
    /// Returns `(is_safe, warnings)`
    async fn review(&self, montages: &[Montage]) -> PipelineResult<(bool, Vec<String>)>;
}

/// Structured metadata extraction over the synthesized description
#[async_trait]
pub trait MetadataExtractor: Send + Sync {
    async fn extract(&self, description: &str) -> PipelineResult<MetadataRecord>;

    async fn classify_content(&self, description: &str) -> PipelineResult<ContentClassification>;
}
