use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;

/// Configuration for the video-insight service
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// HTTP server settings
    pub server: ServerConfig,

    /// Media splitting and frame sampling settings
    pub media: MediaConfig,

    /// Audio extraction and chunking settings
    pub audio: AudioConfig,

    /// External AI collaborator settings
    pub collaborators: CollaboratorConfig,

    /// Result callback delivery settings
    pub callbacks: CallbackConfig,

    /// Task store persistence settings
    pub store: StoreConfig,

    /// Source URL fetch settings
    pub fetch: FetchConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Bind address
    pub host: String,

    /// Listen port
    pub port: u16,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MediaConfig {
    /// Maximum number of time-based segments per video
    pub max_segments: usize,

    /// Number of frames sampled into one montage
    pub frames_per_montage: usize,

    /// Montage grid side length (grid holds grid^2 frames)
    pub montage_grid: u32,

    /// Maximum concurrent ffmpeg/ffprobe subprocesses across all tasks
    pub max_ffmpeg_jobs: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AudioConfig {
    /// Duration of one transcription chunk in milliseconds
    pub chunk_duration_ms: u64,

    /// Hard cap on the encoded size of one chunk in bytes
    pub max_chunk_bytes: u64,

    /// Target sample rate for the extracted audio track
    pub sample_rate: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CollaboratorConfig {
    /// OpenAI API key (vision, transcription, moderation)
    pub openai_api_key: Option<String>,

    /// Gemini API key (metadata extraction)
    pub gemini_api_key: Option<String>,

    /// Model used to describe individual montages
    pub vision_model: String,

    /// Model used for the final description synthesis call
    pub synthesis_model: String,

    /// Model used for audio transcription
    pub transcription_model: String,

    /// Model used for content moderation
    pub moderation_model: String,

    /// Model used for metadata extraction
    pub metadata_model: String,

    /// Request timeout in seconds
    pub request_timeout_seconds: u64,

    /// Maximum tokens for generation calls
    pub max_output_tokens: u32,

    /// Temperature for generation calls
    pub temperature: f32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CallbackConfig {
    /// Shared key included in every callback payload
    pub delivery_key: Option<String>,

    /// Platform name -> callback endpoint URL
    pub endpoints: HashMap<String, String>,

    /// Platform used when the submitter names none
    pub default_platform: Option<String>,
}

/// Durability policy for the task store.
///
/// `WriteThrough` persists the full task table on every mutation, so external
/// pollers always observe durable state. `Periodic` batches disk writes while
/// keeping the in-memory view fresh; terminal transitions always persist
/// synchronously regardless of policy.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "snake_case", tag = "mode")]
pub enum DurabilityPolicy {
    WriteThrough,
    Periodic { seconds: u64 },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    /// Path of the persisted task table
    pub data_file: PathBuf,

    /// When to flush mutations to disk
    pub durability: DurabilityPolicy,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FetchConfig {
    /// Maximum fetch attempts for a source media URL
    pub max_attempts: u32,

    /// Fixed delay between attempts in seconds
    pub retry_delay_seconds: u64,
}

impl Config {
    /// Load configuration from file, falling back to environment variables
    pub fn load() -> Result<Self> {
        let config_paths = [
            "video-insight.toml",
            "config/video-insight.toml",
            "/etc/video-insight/config.toml",
        ];

        for path in &config_paths {
            if let Ok(config_str) = std::fs::read_to_string(path) {
                match toml::from_str(&config_str) {
                    Ok(config) => {
                        tracing::info!("Loaded configuration from: {}", path);
                        return Ok(config);
                    }
                    Err(e) => {
                        tracing::warn!("Failed to parse config file {}: {}", path, e);
                    }
                }
            }
        }

        Self::from_env()
    }

    /// Load configuration from a specific TOML file
    pub fn from_file(path: &str) -> Result<Self> {
        let config_str = std::fs::read_to_string(path)
            .map_err(|e| anyhow!("could not read config file {}: {}", path, e))?;
        let config = toml::from_str(&config_str)
            .map_err(|e| anyhow!("could not parse config file {}: {}", path, e))?;
        tracing::info!("Loaded configuration from: {}", path);
        Ok(config)
    }

    /// Build configuration from defaults plus environment overrides
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();

        if let Ok(port) = std::env::var("VIDEO_INSIGHT_PORT") {
            config.server.port = port.parse().unwrap_or(config.server.port);
        }

        if let Ok(jobs) = std::env::var("VIDEO_INSIGHT_FFMPEG_JOBS") {
            config.media.max_ffmpeg_jobs = jobs.parse().unwrap_or(config.media.max_ffmpeg_jobs);
        }

        if let Ok(key) = std::env::var("VIDEO_INSIGHT_OPENAI_API_KEY") {
            config.collaborators.openai_api_key = Some(key);
        }

        if let Ok(key) = std::env::var("VIDEO_INSIGHT_GEMINI_API_KEY") {
            config.collaborators.gemini_api_key = Some(key);
        }

        if let Ok(key) = std::env::var("VIDEO_INSIGHT_DELIVERY_KEY") {
            config.callbacks.delivery_key = Some(key);
        }

        if let Ok(path) = std::env::var("VIDEO_INSIGHT_DATA_FILE") {
            config.store.data_file = PathBuf::from(path);
        }

        Ok(config)
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        if self.media.max_segments == 0 {
            return Err(anyhow!("max_segments must be greater than 0"));
        }

        if self.media.frames_per_montage != (self.media.montage_grid * self.media.montage_grid) as usize {
            return Err(anyhow!(
                "frames_per_montage must equal montage_grid squared ({} != {}^2)",
                self.media.frames_per_montage,
                self.media.montage_grid
            ));
        }

        if self.media.max_ffmpeg_jobs == 0 {
            return Err(anyhow!("max_ffmpeg_jobs must be greater than 0"));
        }

        if self.audio.chunk_duration_ms == 0 {
            return Err(anyhow!("chunk_duration_ms must be greater than 0"));
        }

        if self.fetch.max_attempts == 0 {
            return Err(anyhow!("max_attempts must be greater than 0"));
        }

        Ok(())
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server: ServerConfig {
                host: "0.0.0.0".to_string(),
                port: 8000,
            },
            media: MediaConfig {
                max_segments: 5,
                frames_per_montage: 16,
                montage_grid: 4,
                max_ffmpeg_jobs: num_cpus::get().min(8),
            },
            audio: AudioConfig {
                chunk_duration_ms: 10 * 60 * 1000, // 10 minutes
                max_chunk_bytes: 24 * 1024 * 1024, // stays under the 25 MB API limit
                sample_rate: 16000,                // optimal for Whisper
            },
            collaborators: CollaboratorConfig {
                openai_api_key: None,
                gemini_api_key: None,
                vision_model: "gpt-4o".to_string(),
                synthesis_model: "gpt-4".to_string(),
                transcription_model: "whisper-1".to_string(),
                moderation_model: "omni-moderation-latest".to_string(),
                metadata_model: "gemini-1.5-pro".to_string(),
                request_timeout_seconds: 120,
                max_output_tokens: 1500,
                temperature: 0.1,
            },
            callbacks: CallbackConfig {
                delivery_key: None,
                endpoints: HashMap::new(),
                default_platform: None,
            },
            store: StoreConfig {
                data_file: PathBuf::from("data/task_record.json"),
                durability: DurabilityPolicy::WriteThrough,
            },
            fetch: FetchConfig {
                max_attempts: 3,
                retry_delay_seconds: 10,
            },
        }
    }
}

/// Configuration builder for programmatic config creation
pub struct ConfigBuilder {
    config: Config,
}

impl ConfigBuilder {
    pub fn new() -> Self {
        Self {
            config: Config::default(),
        }
    }

    pub fn with_port(mut self, port: u16) -> Self {
        self.config.server.port = port;
        self
    }

    pub fn with_data_file(mut self, path: PathBuf) -> Self {
        self.config.store.data_file = path;
        self
    }

    pub fn with_durability(mut self, policy: DurabilityPolicy) -> Self {
        self.config.store.durability = policy;
        self
    }

    pub fn with_ffmpeg_jobs(mut self, jobs: usize) -> Self {
        self.config.media.max_ffmpeg_jobs = jobs;
        self
    }

    pub fn with_callback_endpoint(mut self, platform: &str, url: &str) -> Self {
        self.config
            .callbacks
            .endpoints
            .insert(platform.to_string(), url.to_string());
        self
    }

    pub fn with_delivery_key(mut self, key: &str) -> Self {
        self.config.callbacks.delivery_key = Some(key.to_string());
        self
    }

    pub fn with_retry_delay(mut self, seconds: u64) -> Self {
        self.config.fetch.retry_delay_seconds = seconds;
        self
    }

    pub fn build(self) -> Config {
        self.config
    }
}

impl Default for ConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.media.max_segments, 5);
        assert_eq!(config.audio.chunk_duration_ms, 600_000);
        assert_eq!(config.audio.max_chunk_bytes, 24 * 1024 * 1024);
        assert_eq!(config.fetch.max_attempts, 3);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_builder() {
        let config = ConfigBuilder::new()
            .with_port(9001)
            .with_ffmpeg_jobs(2)
            .with_callback_endpoint("shorts", "http://localhost:9/cb")
            .build();

        assert_eq!(config.server.port, 9001);
        assert_eq!(config.media.max_ffmpeg_jobs, 2);
        assert_eq!(
            config.callbacks.endpoints.get("shorts").unwrap(),
            "http://localhost:9/cb"
        );
    }

    #[test]
    fn test_grid_validation() {
        let mut config = Config::default();
        config.media.frames_per_montage = 9;
        assert!(config.validate().is_err());
    }
}
