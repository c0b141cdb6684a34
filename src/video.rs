use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tracing::{debug, info, warn};

use crate::error::{PipelineError, PipelineResult};

/// Media properties extracted with ffprobe
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MediaInfo {
    pub duration: Duration,
    pub fps: f64,
    pub total_frames: u64,
    pub width: u32,
    pub height: u32,
}

/// A time-bounded slice of the source media. Non-durable: consumed by the
/// frame sampler and discarded.
#[derive(Debug, Clone)]
pub struct Segment {
    pub index: usize,
    pub data: Vec<u8>,
}

/// Number of segments for a clip: one per full minute, clamped to [1, max]
pub fn segment_count(duration: Duration, max_segments: usize) -> usize {
    let minutes = (duration.as_secs_f64() / 60.0).floor() as usize;
    minutes.clamp(1, max_segments)
}

/// Divide `total_frames` into `count` equal spans; the final span absorbs the
/// remainder. Returns half-open `(start, end)` frame ranges.
pub fn segment_spans(total_frames: u64, count: usize) -> Vec<(u64, u64)> {
    let count = count.max(1) as u64;
    let per_part = total_frames / count;
    (0..count)
        .map(|i| {
            let start = i * per_part;
            let end = if i == count - 1 {
                total_frames
            } else {
                start + per_part
            };
            (start, end)
        })
        .collect()
}

/// Probe a media file with ffprobe and parse the relevant properties
pub async fn probe_media(path: &Path) -> PipelineResult<MediaInfo> {
    let output = tokio::process::Command::new("ffprobe")
        .args([
            "-v",
            "quiet",
            "-print_format",
            "json",
            "-show_format",
            "-show_streams",
        ])
        .arg(path)
        .output()
        .await?;

    if !output.status.success() {
        return Err(PipelineError::MediaOpen(format!(
            "ffprobe failed for {}",
            path.display()
        )));
    }

    let data: serde_json::Value = serde_json::from_slice(&output.stdout)
        .map_err(|e| PipelineError::MediaOpen(format!("unreadable ffprobe output: {}", e)))?;

    let streams = data["streams"]
        .as_array()
        .ok_or_else(|| PipelineError::MediaOpen("no streams in media".to_string()))?;
    let video_stream = streams
        .iter()
        .find(|s| s["codec_type"] == "video")
        .ok_or_else(|| PipelineError::MediaOpen("no video stream found".to_string()))?;

    let duration_seconds: f64 = data["format"]["duration"]
        .as_str()
        .and_then(|s| s.parse().ok())
        .unwrap_or(0.0);

    let fps = video_stream["r_frame_rate"]
        .as_str()
        .and_then(|s| {
            let parts: Vec<&str> = s.split('/').collect();
            if parts.len() == 2 {
                let num: f64 = parts[0].parse().ok()?;
                let den: f64 = parts[1].parse().ok()?;
                if den > 0.0 {
                    Some(num / den)
                } else {
                    None
                }
            } else {
                s.parse().ok()
            }
        })
        .unwrap_or(0.0);

    let total_frames = video_stream["nb_frames"]
        .as_str()
        .and_then(|s| s.parse().ok())
        .unwrap_or_else(|| (duration_seconds * fps) as u64);

    let info = MediaInfo {
        duration: Duration::from_secs_f64(duration_seconds),
        fps,
        total_frames,
        width: video_stream["width"].as_u64().unwrap_or(0) as u32,
        height: video_stream["height"].as_u64().unwrap_or(0) as u32,
    };

    debug!(
        "Probed media: {}x{}, {:.1}fps, {:.1}s, {} frames",
        info.width,
        info.height,
        info.fps,
        info.duration.as_secs_f64(),
        info.total_frames
    );

    Ok(info)
}

/// Splits raw media bytes into a bounded number of time-based segments.
///
/// Each segment is re-encoded with ffmpeg into a temporary file and returned
/// as an in-memory byte buffer. All temporary files are removed on every exit
/// path, including partial failure mid-loop.
#[derive(Clone)]
pub struct MediaSplitter {
    max_segments: usize,
    jobs: Arc<Semaphore>,
}

impl MediaSplitter {
    pub fn new(max_segments: usize, jobs: Arc<Semaphore>) -> Self {
        Self { max_segments, jobs }
    }

    /// Split media bytes into segments.
    ///
    /// Fails with `MediaOpen` if the source cannot be probed; the caller
    /// aborts the whole task in that case.
    pub async fn split(&self, media: &[u8]) -> PipelineResult<Vec<Segment>> {
        let source = write_temp_media(media, ".mp4").await?;

        let info = probe_media(&source).await?;
        if info.total_frames == 0 || info.fps <= 0.0 {
            return Err(PipelineError::MediaOpen(
                "media contains no decodable frames".to_string(),
            ));
        }

        let count = segment_count(info.duration, self.max_segments);
        let spans = segment_spans(info.total_frames, count);

        info!(
            "Splitting media into {} segments ({} frames, {:.1}s)",
            count,
            info.total_frames,
            info.duration.as_secs_f64()
        );

        let mut segments = Vec::with_capacity(count);
        for (index, (start_frame, end_frame)) in spans.into_iter().enumerate() {
            let start_secs = start_frame as f64 / info.fps;
            let span_secs = (end_frame - start_frame) as f64 / info.fps;

            let out = tempfile::Builder::new()
                .suffix(".mp4")
                .tempfile()?
                .into_temp_path();

            let _permit = self.jobs.acquire().await.expect("semaphore closed");
            let status = tokio::process::Command::new("ffmpeg")
                .arg("-ss")
                .arg(format!("{:.3}", start_secs))
                .arg("-t")
                .arg(format!("{:.3}", span_secs))
                .arg("-i")
                .arg(&source)
                .args(["-an", "-c:v", "libx264", "-preset", "veryfast", "-y"])
                .arg(&out)
                .status()
                .await?;
            drop(_permit);

            // `out` and `source` are TempPaths: dropped (deleted) on every
            // return below, including this error path mid-loop.
            if !status.success() {
                warn!("ffmpeg failed encoding segment {}", index);
                return Err(PipelineError::MediaOpen(format!(
                    "segment {} could not be encoded",
                    index
                )));
            }

            let data = tokio::fs::read(&out).await?;
            segments.push(Segment { index, data });
        }

        Ok(segments)
    }
}

/// Write raw media bytes to a self-deleting temporary file
pub async fn write_temp_media(media: &[u8], suffix: &str) -> PipelineResult<tempfile::TempPath> {
    let path = tempfile::Builder::new()
        .suffix(suffix)
        .tempfile()?
        .into_temp_path();
    tokio::fs::write(&path, media).await?;
    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_segment_count_clamps() {
        // 30-second clip -> 1 segment
        assert_eq!(segment_count(Duration::from_secs(30), 5), 1);
        // 3.4 minutes -> 3 segments
        assert_eq!(segment_count(Duration::from_secs(204), 5), 3);
        // 20 minutes -> capped at 5
        assert_eq!(segment_count(Duration::from_secs(20 * 60), 5), 5);
        // exactly one minute
        assert_eq!(segment_count(Duration::from_secs(60), 5), 1);
    }

    #[test]
    fn test_segment_spans_last_absorbs_remainder() {
        let spans = segment_spans(1003, 4);
        assert_eq!(spans.len(), 4);
        assert_eq!(spans[0], (0, 250));
        assert_eq!(spans[1], (250, 500));
        assert_eq!(spans[2], (500, 750));
        assert_eq!(spans[3], (750, 1003));
    }

    #[test]
    fn test_segment_spans_single() {
        assert_eq!(segment_spans(42, 1), vec![(0, 42)]);
    }
}
