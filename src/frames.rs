use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use image::RgbImage;
use std::io::Cursor;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tracing::{debug, info, warn};

use crate::error::{PipelineError, PipelineResult};
use crate::video::{probe_media, write_temp_media, Segment};

/// A composed grid image of sampled frames from one segment, encoded for
/// transport. Ephemeral: input to the description and moderation
/// collaborators, never persisted.
#[derive(Debug, Clone)]
pub struct Montage {
    pub segment_index: usize,
    pub image_base64: String,
}

/// The frame positions sampled from a segment with `total_frames` frames:
/// `min(i * interval, total - 1)` for `i in 0..n`, `interval = max(1, total / n)`.
pub fn sample_positions(total_frames: u64, n: usize) -> Vec<u64> {
    let interval = (total_frames / n as u64).max(1);
    (0..n as u64)
        .map(|i| (i * interval).min(total_frames - 1))
        .collect()
}

/// Compose frames into a `grid` x `grid` montage, raster order, top-left
/// origin. Cell dimensions come from the first present frame; missing cells
/// stay blank.
pub fn compose_grid(frames: &[Option<RgbImage>], grid: u32) -> Option<RgbImage> {
    let first = frames.iter().flatten().next()?;
    let (w, h) = (first.width(), first.height());

    let mut canvas = RgbImage::new(w * grid, h * grid);
    for (i, frame) in frames.iter().enumerate() {
        if let Some(frame) = frame {
            let x = (i as u32 % grid) * w;
            let y = (i as u32 / grid) * h;
            image::imageops::replace(&mut canvas, frame, x.into(), y.into());
        }
    }
    Some(canvas)
}

/// Extracts a fixed-size set of representative frames from one segment and
/// composes them into a single montage artifact.
#[derive(Clone)]
pub struct FrameSampler {
    frames_per_montage: usize,
    grid: u32,
    jobs: Arc<Semaphore>,
}

impl FrameSampler {
    pub fn new(frames_per_montage: usize, grid: u32, jobs: Arc<Semaphore>) -> Self {
        Self {
            frames_per_montage,
            grid,
            jobs,
        }
    }

    /// Sample frames from a segment and build its montage.
    ///
    /// A failed read at one position is logged and skipped, not retried.
    /// Returns `Ok(None)` when no frame could be read at all, a soft failure
    /// scoped to this segment rather than the task.
    pub async fn sample(&self, segment: &Segment) -> PipelineResult<Option<Montage>> {
        let source = write_temp_media(&segment.data, ".mp4").await?;

        let info = probe_media(&source).await?;
        if info.total_frames == 0 {
            return Err(PipelineError::EmptySegment);
        }

        let positions = sample_positions(info.total_frames, self.frames_per_montage);
        debug!(
            "Sampling segment {}: {} frames, positions {:?}",
            segment.index, info.total_frames, positions
        );

        let mut frames: Vec<Option<RgbImage>> = Vec::with_capacity(positions.len());
        for pos in &positions {
            match self.extract_frame(&source, *pos).await {
                Ok(frame) => frames.push(Some(frame)),
                Err(e) => {
                    warn!(
                        "Failed to read frame at position {} of segment {}: {}",
                        pos, segment.index, e
                    );
                    frames.push(None);
                }
            }
        }

        let read = frames.iter().flatten().count();
        if read == 0 {
            warn!("No frames could be read from segment {}", segment.index);
            return Ok(None);
        }
        info!("Segment {}: composed montage from {} frames", segment.index, read);

        let canvas = match compose_grid(&frames, self.grid) {
            Some(canvas) => canvas,
            None => return Ok(None),
        };
        let mut png = Vec::new();
        canvas
            .write_to(&mut Cursor::new(&mut png), image::ImageFormat::Png)
            .map_err(|e| PipelineError::MediaOpen(format!("montage encoding failed: {}", e)))?;

        Ok(Some(Montage {
            segment_index: segment.index,
            image_base64: BASE64.encode(&png),
        }))
    }

    /// Extract the frame at an exact position into memory via ffmpeg
    async fn extract_frame(
        &self,
        source: &std::path::Path,
        position: u64,
    ) -> PipelineResult<RgbImage> {
        let out = tempfile::Builder::new()
            .suffix(".png")
            .tempfile()?
            .into_temp_path();

        let _permit = self.jobs.acquire().await.expect("semaphore closed");
        let status = tokio::process::Command::new("ffmpeg")
            .arg("-i")
            .arg(source)
            .arg("-vf")
            .arg(format!("select=eq(n\\,{})", position))
            .args(["-vframes", "1", "-y"])
            .arg(&out)
            .status()
            .await?;
        drop(_permit);

        if !status.success() {
            return Err(PipelineError::MediaOpen(format!(
                "frame read failed at position {}",
                position
            )));
        }

        let image = image::open(&out)
            .map_err(|e| PipelineError::MediaOpen(format!("frame decode failed: {}", e)))?;
        Ok(image.to_rgb8())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sample_positions_forty_frames() {
        // T=40, 16 samples: interval 2, positions 0,2,...,30
        let positions = sample_positions(40, 16);
        assert_eq!(positions.len(), 16);
        assert_eq!(
            positions,
            (0..16).map(|i| i * 2).collect::<Vec<u64>>()
        );
        assert!(positions.iter().all(|p| *p < 40));
    }

    #[test]
    fn test_sample_positions_short_segment_clamps() {
        // fewer frames than samples: interval 1, tail clamped to T-1
        let positions = sample_positions(10, 16);
        assert_eq!(positions.len(), 16);
        assert_eq!(&positions[..10], &[0, 1, 2, 3, 4, 5, 6, 7, 8, 9]);
        assert!(positions[10..].iter().all(|p| *p == 9));
    }

    #[test]
    fn test_sample_positions_single_frame() {
        let positions = sample_positions(1, 16);
        assert!(positions.iter().all(|p| *p == 0));
    }

    #[test]
    fn test_compose_grid_dimensions_and_blanks() {
        let red = RgbImage::from_pixel(8, 6, image::Rgb([255, 0, 0]));
        let mut frames: Vec<Option<RgbImage>> = vec![None; 16];
        frames[0] = Some(red.clone());
        frames[5] = Some(red);

        let canvas = compose_grid(&frames, 4).unwrap();
        assert_eq!(canvas.width(), 32);
        assert_eq!(canvas.height(), 24);

        // cell (0,0) carries the frame
        assert_eq!(canvas.get_pixel(0, 0), &image::Rgb([255, 0, 0]));
        // frame 5 goes to grid cell (1, 1): x=8, y=6
        assert_eq!(canvas.get_pixel(8, 6), &image::Rgb([255, 0, 0]));
        // missing cell stays blank
        assert_eq!(canvas.get_pixel(16, 0), &image::Rgb([0, 0, 0]));
    }

    #[test]
    fn test_compose_grid_all_missing() {
        let frames: Vec<Option<RgbImage>> = vec![None; 16];
        assert!(compose_grid(&frames, 4).is_none());
    }
}
