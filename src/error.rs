use thiserror::Error;

/// Error taxonomy for the analysis pipeline.
///
/// Input and resource-limit errors terminate a task; collaborator errors are
/// downgraded to soft failures by the orchestrator wherever the affected
/// sub-result is not required for the next stage.
#[derive(Debug, Error)]
pub enum PipelineError {
    /// The source media could not be opened or probed.
    #[error("could not open media: {0}")]
    MediaOpen(String),

    /// A segment contains no frames.
    #[error("segment contains no frames")]
    EmptySegment,

    /// An encoded audio chunk exceeded the size cap. No sub-splitting is
    /// attempted; the whole chunking operation fails.
    #[error("audio chunk {index} is {size} bytes, exceeds limit of {limit} bytes")]
    ChunkTooLarge { index: usize, size: u64, limit: u64 },

    /// The visual branch produced no usable montages.
    #[error("no usable montages could be extracted from the media")]
    NoMontages,

    /// Fetching the source media URL failed after all retry attempts.
    #[error("failed to fetch source media: {0}")]
    Fetch(String),

    /// An external collaborator call failed.
    #[error("collaborator error: {0}")]
    Collaborator(String),

    /// A task ID was not found in the tracker.
    #[error("task not found: {0}")]
    TaskNotFound(String),

    /// A mutation was attempted on a task that already reached a terminal
    /// state.
    #[error("task {0} is already finished")]
    TaskFinished(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

pub type PipelineResult<T> = std::result::Result<T, PipelineError>;
