use async_trait::async_trait;
use std::path::Path;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tracing::{debug, info, warn};

use crate::collaborators::Transcriber;
use crate::error::{PipelineError, PipelineResult};
use crate::tracker::ProgressReporter;
use crate::video::write_temp_media;

/// Outcome of the audio branch.
///
/// Per-chunk errors never propagate as panics or `Err`s out of the chunker;
/// callers must check the tag. `fatal` marks resource-limit failures (an
/// oversized chunk) that must terminate the whole task, as opposed to
/// transient transcription failures that only lose the transcript.
#[derive(Debug, Clone)]
pub enum TranscriptOutcome {
    Completed { text: String },
    Failed { reason: String, fatal: bool },
}

impl TranscriptOutcome {
    pub fn text(&self) -> Option<&str> {
        match self {
            TranscriptOutcome::Completed { text } => Some(text),
            TranscriptOutcome::Failed { .. } => None,
        }
    }

    pub fn is_fatal(&self) -> bool {
        matches!(self, TranscriptOutcome::Failed { fatal: true, .. })
    }
}

/// Number of transcription chunks for a track: `ceil(total_ms / chunk_ms)`
pub fn chunk_count(total_ms: u64, chunk_ms: u64) -> usize {
    total_ms.div_ceil(chunk_ms) as usize
}

/// Half-open `(start_ms, end_ms)` spans of each chunk; the last chunk spans
/// exactly the remainder.
pub fn chunk_spans(total_ms: u64, chunk_ms: u64) -> Vec<(u64, u64)> {
    (0..chunk_count(total_ms, chunk_ms) as u64)
        .map(|i| (i * chunk_ms, ((i + 1) * chunk_ms).min(total_ms)))
        .collect()
}

/// Audio track extraction and chunk encoding.
///
/// Behind a trait so the chunker's cleanup and size-cap behavior is testable
/// without ffmpeg on the machine.
#[async_trait]
pub trait ChunkEncoder: Send + Sync {
    /// Extract the full audio track of `source` into `dest`; returns the
    /// track duration in milliseconds.
    async fn extract_track(&self, source: &Path, dest: &Path) -> PipelineResult<u64>;

    /// Encode the `[start_ms, end_ms)` span of `track` into `dest`
    async fn encode_chunk(
        &self,
        track: &Path,
        start_ms: u64,
        end_ms: u64,
        dest: &Path,
    ) -> PipelineResult<()>;
}

/// ffmpeg-backed encoder producing mono 16-bit PCM WAV
pub struct FfmpegChunkEncoder {
    sample_rate: u32,
    jobs: Arc<Semaphore>,
}

impl FfmpegChunkEncoder {
    pub fn new(sample_rate: u32, jobs: Arc<Semaphore>) -> Self {
        Self { sample_rate, jobs }
    }
}

#[async_trait]
impl ChunkEncoder for FfmpegChunkEncoder {
    async fn extract_track(&self, source: &Path, dest: &Path) -> PipelineResult<u64> {
        let _permit = self.jobs.acquire().await.expect("semaphore closed");
        let status = tokio::process::Command::new("ffmpeg")
            .arg("-i")
            .arg(source)
            .args(["-vn", "-acodec", "pcm_s16le"])
            .args(["-ar", &self.sample_rate.to_string()])
            .args(["-ac", "1", "-f", "wav", "-y"])
            .arg(dest)
            .status()
            .await?;
        drop(_permit);

        if !status.success() {
            return Err(PipelineError::MediaOpen(
                "audio track extraction failed".to_string(),
            ));
        }

        let output = tokio::process::Command::new("ffprobe")
            .args(["-v", "quiet", "-print_format", "json", "-show_format"])
            .arg(dest)
            .output()
            .await?;
        let data: serde_json::Value = serde_json::from_slice(&output.stdout)
            .map_err(|e| PipelineError::MediaOpen(format!("unreadable ffprobe output: {}", e)))?;
        let seconds: f64 = data["format"]["duration"]
            .as_str()
            .and_then(|s| s.parse().ok())
            .unwrap_or(0.0);

        Ok((seconds * 1000.0) as u64)
    }

    async fn encode_chunk(
        &self,
        track: &Path,
        start_ms: u64,
        end_ms: u64,
        dest: &Path,
    ) -> PipelineResult<()> {
        let _permit = self.jobs.acquire().await.expect("semaphore closed");
        let status = tokio::process::Command::new("ffmpeg")
            .arg("-i")
            .arg(track)
            .arg("-ss")
            .arg(format!("{:.3}", start_ms as f64 / 1000.0))
            .arg("-t")
            .arg(format!("{:.3}", (end_ms - start_ms) as f64 / 1000.0))
            .args(["-acodec", "pcm_s16le", "-f", "wav", "-y"])
            .arg(dest)
            .status()
            .await?;

        if !status.success() {
            return Err(PipelineError::MediaOpen("chunk encoding failed".to_string()));
        }
        Ok(())
    }
}

/// Extracts the audio track from source media and slices it into
/// duration/size-bounded chunks for sequential transcription.
///
/// Every per-chunk temporary file is deleted immediately after its
/// transcription attempt; the intermediate full-audio file and the source
/// temp file are deleted at the end of chunking regardless of outcome.
pub struct AudioChunker {
    chunk_duration_ms: u64,
    max_chunk_bytes: u64,
    encoder: Arc<dyn ChunkEncoder>,
    transcriber: Arc<dyn Transcriber>,
}

impl AudioChunker {
    pub fn new(
        chunk_duration_ms: u64,
        max_chunk_bytes: u64,
        encoder: Arc<dyn ChunkEncoder>,
        transcriber: Arc<dyn Transcriber>,
    ) -> Self {
        Self {
            chunk_duration_ms,
            max_chunk_bytes,
            encoder,
            transcriber,
        }
    }

    /// Run the whole audio branch: extract, chunk, transcribe sequentially,
    /// concatenate chunk transcripts with single spaces.
    pub async fn run(
        &self,
        media: &[u8],
        work_dir: &Path,
        progress: &ProgressReporter,
    ) -> TranscriptOutcome {
        let source = match write_temp_media(media, ".mp4").await {
            Ok(path) => path,
            Err(e) => {
                return TranscriptOutcome::Failed {
                    reason: format!("could not stage media for audio extraction: {}", e),
                    fatal: false,
                }
            }
        };

        let track = work_dir.join("audio_track.wav");
        let outcome = self.run_with_track(&source, &track, work_dir, progress).await;

        // Intermediate full-audio file removed on every outcome; the source
        // TempPath self-deletes on drop.
        if let Err(e) = tokio::fs::remove_file(&track).await {
            if e.kind() != std::io::ErrorKind::NotFound {
                warn!("Failed to remove intermediate audio track: {}", e);
            }
        }

        outcome
    }

    async fn run_with_track(
        &self,
        source: &Path,
        track: &Path,
        work_dir: &Path,
        progress: &ProgressReporter,
    ) -> TranscriptOutcome {
        let task_id = progress.task_id();
        let _ = progress.report("Extracting audio track", 20).await;

        let total_ms = match self.encoder.extract_track(source, track).await {
            Ok(ms) => ms,
            Err(e) => {
                warn!("Audio extraction failed for task {}: {}", task_id, e);
                return TranscriptOutcome::Failed {
                    reason: format!("audio extraction failed: {}", e),
                    fatal: false,
                };
            }
        };

        if total_ms == 0 {
            return TranscriptOutcome::Failed {
                reason: "media has no audio track".to_string(),
                fatal: false,
            };
        }

        let spans = chunk_spans(total_ms, self.chunk_duration_ms);
        let num_chunks = spans.len();
        info!(
            "Task {}: audio track {}ms, splitting into {} chunks",
            task_id, total_ms, num_chunks
        );

        let mut transcripts = Vec::with_capacity(num_chunks);
        for (i, (start_ms, end_ms)) in spans.into_iter().enumerate() {
            let chunk_path = work_dir.join(format!("chunk_{:03}.wav", i));

            if let Err(e) = self
                .encoder
                .encode_chunk(track, start_ms, end_ms, &chunk_path)
                .await
            {
                remove_quietly(&chunk_path).await;
                return TranscriptOutcome::Failed {
                    reason: format!("chunk {} could not be encoded: {}", i + 1, e),
                    fatal: false,
                };
            }

            let size = match tokio::fs::metadata(&chunk_path).await {
                Ok(meta) => meta.len(),
                Err(e) => {
                    remove_quietly(&chunk_path).await;
                    return TranscriptOutcome::Failed {
                        reason: format!("chunk {} unreadable: {}", i + 1, e),
                        fatal: false,
                    };
                }
            };

            if size > self.max_chunk_bytes {
                remove_quietly(&chunk_path).await;
                let err = PipelineError::ChunkTooLarge {
                    index: i + 1,
                    size,
                    limit: self.max_chunk_bytes,
                };
                warn!("Task {}: {}", task_id, err);
                return TranscriptOutcome::Failed {
                    reason: err.to_string(),
                    fatal: true,
                };
            }

            debug!(
                "Task {}: transcribing chunk {}/{} ({} bytes)",
                task_id,
                i + 1,
                num_chunks,
                size
            );

            // Chunk i+1 starts only after chunk i's transcription returns;
            // the chunk file is deleted right after the attempt either way.
            let transcription = self.transcriber.transcribe(&chunk_path).await;
            remove_quietly(&chunk_path).await;

            match transcription {
                Ok(text) => transcripts.push(text),
                Err(e) => {
                    warn!(
                        "Task {}: transcription failed on chunk {}/{}: {}",
                        task_id,
                        i + 1,
                        num_chunks,
                        e
                    );
                    return TranscriptOutcome::Failed {
                        reason: format!("transcription failed on chunk {}: {}", i + 1, e),
                        fatal: false,
                    };
                }
            }

            let value = 20 + ((i + 1) * 20 / num_chunks) as u8;
            let _ = progress
                .report(&format!("Transcribed chunk {}/{}", i + 1, num_chunks), value)
                .await;
        }

        TranscriptOutcome::Completed {
            text: transcripts.join(" "),
        }
    }
}

async fn remove_quietly(path: &Path) {
    if let Err(e) = tokio::fs::remove_file(path).await {
        if e.kind() != std::io::ErrorKind::NotFound {
            warn!("Failed to remove chunk file {}: {}", path.display(), e);
        }
    }
}
