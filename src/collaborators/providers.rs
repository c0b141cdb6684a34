//! Concrete HTTP providers for the collaborator traits.

use async_trait::async_trait;
use reqwest;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;
use tracing::debug;

use super::{MetadataExtractor, Moderator, Transcriber, VisionDescriber};
use crate::analysis::{ContentClassification, MetadataRecord};
use crate::config::CollaboratorConfig;
use crate::error::{PipelineError, PipelineResult};
use crate::frames::Montage;

const OPENAI_CHAT_URL: &str = "https://api.openai.com/v1/chat/completions";
const OPENAI_TRANSCRIPTION_URL: &str = "https://api.openai.com/v1/audio/transcriptions";
const OPENAI_MODERATION_URL: &str = "https://api.openai.com/v1/moderations";

/// Score above which a moderation category counts as a content warning
const MODERATION_THRESHOLD: f64 = 0.25;

fn http_client(timeout_seconds: u64) -> PipelineResult<reqwest::Client> {
    reqwest::Client::builder()
        .timeout(Duration::from_secs(timeout_seconds))
        .build()
        .map_err(|e| PipelineError::Collaborator(format!("failed to build HTTP client: {}", e)))
}

fn require_key(key: &Option<String>, name: &str) -> PipelineResult<String> {
    key.clone()
        .ok_or_else(|| PipelineError::Collaborator(format!("{} API key not configured", name)))
}

async fn check_status(
    response: reqwest::Response,
    service: &str,
) -> PipelineResult<reqwest::Response> {
    if response.status().is_success() {
        return Ok(response);
    }
    let status = response.status();
    let text = response.text().await.unwrap_or_default();
    Err(PipelineError::Collaborator(format!(
        "{} API error {}: {}",
        service, status, text
    )))
}

/// Strip markdown code fences that chat models wrap JSON payloads in
fn strip_code_fences(text: &str) -> &str {
    let trimmed = text.trim();
    let without_open = trimmed
        .strip_prefix("```json")
        .or_else(|| trimmed.strip_prefix("```"))
        .unwrap_or(trimmed);
    without_open.strip_suffix("```").unwrap_or(without_open).trim()
}

// ---------------------------------------------------------------------------
// OpenAI chat completions (vision description + synthesis)
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize)]
struct ChatRequest {
    model: String,
    messages: Vec<ChatRequestMessage>,
    max_tokens: u32,
    temperature: f32,
}

#[derive(Debug, Serialize)]
struct ChatRequestMessage {
    role: String,
    content: MessageContent,
}

#[derive(Debug, Serialize)]
#[serde(untagged)]
enum MessageContent {
    Text(String),
    Parts(Vec<ContentPart>),
}

#[derive(Debug, Serialize)]
#[serde(tag = "type")]
enum ContentPart {
    #[serde(rename = "text")]
    Text { text: String },
    #[serde(rename = "image_url")]
    ImageUrl { image_url: ImageUrl },
}

#[derive(Debug, Serialize)]
struct ImageUrl {
    url: String,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatResponseMessage,
}

#[derive(Debug, Deserialize)]
struct ChatResponseMessage {
    content: String,
}

/// Vision describer backed by the OpenAI chat completions API
pub struct OpenAiDescriber {
    api_key: String,
    vision_model: String,
    synthesis_model: String,
    max_tokens: u32,
    temperature: f32,
    client: reqwest::Client,
}

impl OpenAiDescriber {
    pub fn new(config: &CollaboratorConfig) -> PipelineResult<Self> {
        Ok(Self {
            api_key: require_key(&config.openai_api_key, "OpenAI")?,
            vision_model: config.vision_model.clone(),
            synthesis_model: config.synthesis_model.clone(),
            max_tokens: config.max_output_tokens,
            temperature: config.temperature,
            client: http_client(config.request_timeout_seconds)?,
        })
    }

    async fn chat(&self, model: &str, messages: Vec<ChatRequestMessage>) -> PipelineResult<String> {
        let request = ChatRequest {
            model: model.to_string(),
            messages,
            max_tokens: self.max_tokens,
            temperature: self.temperature,
        };

        debug!(model, "Sending chat request to OpenAI");

        let response = self
            .client
            .post(OPENAI_CHAT_URL)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .json(&request)
            .send()
            .await
            .map_err(|e| PipelineError::Collaborator(format!("OpenAI request failed: {}", e)))?;

        let response = check_status(response, "OpenAI").await?;
        let chat: ChatResponse = response
            .json()
            .await
            .map_err(|e| PipelineError::Collaborator(format!("OpenAI response parse: {}", e)))?;

        chat.choices
            .into_iter()
            .next()
            .map(|c| c.message.content)
            .ok_or_else(|| PipelineError::Collaborator("No response from OpenAI".to_string()))
    }
}

#[async_trait]
impl VisionDescriber for OpenAiDescriber {
    async fn describe_montage(&self, image_base64: &str) -> PipelineResult<String> {
        let messages = vec![ChatRequestMessage {
            role: "user".to_string(),
            content: MessageContent::Parts(vec![
                ContentPart::Text {
                    text: "This image is a grid of frames sampled from one segment of a video, \
                           in temporal order left to right, top to bottom. Describe what happens \
                           in this segment: the setting, the people, their actions, and any \
                           visible text or objects. Be specific and factual."
                        .to_string(),
                },
                ContentPart::ImageUrl {
                    image_url: ImageUrl {
                        url: format!("data:image/png;base64,{}", image_base64),
                    },
                },
            ]),
        }];
        self.chat(&self.vision_model, messages).await
    }

    async fn synthesize(
        &self,
        descriptions: &[String],
        transcript: Option<&str>,
    ) -> PipelineResult<String> {
        let mut prompt = String::from(
            "The following are descriptions of consecutive segments of one video, in order.\n\n",
        );
        for (i, description) in descriptions.iter().enumerate() {
            prompt.push_str(&format!("Segment {}: {}\n\n", i + 1, description));
        }
        if let Some(transcript) = transcript {
            prompt.push_str(&format!("Audio transcript: {}\n\n", transcript));
        }
        prompt.push_str(
            "Write a single coherent description of the whole video. Merge the segments \
             into one narrative and incorporate the transcript where it clarifies what is \
             happening. Do not mention segments or frames.",
        );

        let messages = vec![ChatRequestMessage {
            role: "user".to_string(),
            content: MessageContent::Text(prompt),
        }];
        self.chat(&self.synthesis_model, messages).await
    }
}

// ---------------------------------------------------------------------------
// Whisper transcription
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct TranscriptionResponse {
    text: String,
}

/// Speech-to-text via the OpenAI audio transcription endpoint
pub struct WhisperTranscriber {
    api_key: String,
    model: String,
    client: reqwest::Client,
}

impl WhisperTranscriber {
    pub fn new(config: &CollaboratorConfig) -> PipelineResult<Self> {
        Ok(Self {
            api_key: require_key(&config.openai_api_key, "OpenAI")?,
            model: config.transcription_model.clone(),
            client: http_client(config.request_timeout_seconds)?,
        })
    }
}

#[async_trait]
impl Transcriber for WhisperTranscriber {
    async fn transcribe(&self, audio_path: &Path) -> PipelineResult<String> {
        let bytes = tokio::fs::read(audio_path).await?;
        let file_name = audio_path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "chunk.wav".to_string());

        let part = reqwest::multipart::Part::bytes(bytes)
            .file_name(file_name)
            .mime_str("audio/wav")
            .map_err(|e| PipelineError::Collaborator(format!("multipart part: {}", e)))?;
        let form = reqwest::multipart::Form::new()
            .text("model", self.model.clone())
            .part("file", part);

        debug!(path = %audio_path.display(), "Transcribing audio chunk");

        let response = self
            .client
            .post(OPENAI_TRANSCRIPTION_URL)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .multipart(form)
            .send()
            .await
            .map_err(|e| PipelineError::Collaborator(format!("Whisper request failed: {}", e)))?;

        let response = check_status(response, "Whisper").await?;
        let transcription: TranscriptionResponse = response
            .json()
            .await
            .map_err(|e| PipelineError::Collaborator(format!("Whisper response parse: {}", e)))?;

        Ok(transcription.text.trim().to_string())
    }
}

// ---------------------------------------------------------------------------
// OpenAI moderation
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize)]
struct ModerationRequest {
    model: String,
    input: Vec<ModerationInput>,
}

#[derive(Debug, Serialize)]
#[serde(tag = "type")]
enum ModerationInput {
    #[serde(rename = "image_url")]
    ImageUrl { image_url: ImageUrl },
}

#[derive(Debug, Deserialize)]
struct ModerationResponse {
    results: Vec<ModerationResult>,
}

#[derive(Debug, Deserialize)]
struct ModerationResult {
    category_scores: HashMap<String, f64>,
}

/// Content-safety review via the OpenAI moderation endpoint.
///
/// Each montage is reviewed in its own request; one flagged montage marks the
/// whole video unsafe.
pub struct OpenAiModerator {
    api_key: String,
    model: String,
    client: reqwest::Client,
}

impl OpenAiModerator {
    pub fn new(config: &CollaboratorConfig) -> PipelineResult<Self> {
        Ok(Self {
            api_key: require_key(&config.openai_api_key, "OpenAI")?,
            model: config.moderation_model.clone(),
            client: http_client(config.request_timeout_seconds)?,
        })
    }

    async fn review_image(&self, image_base64: &str) -> PipelineResult<Vec<String>> {
        let request = ModerationRequest {
            model: self.model.clone(),
            input: vec![ModerationInput::ImageUrl {
                image_url: ImageUrl {
                    url: format!("data:image/png;base64,{}", image_base64),
                },
            }],
        };

        let response = self
            .client
            .post(OPENAI_MODERATION_URL)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .json(&request)
            .send()
            .await
            .map_err(|e| PipelineError::Collaborator(format!("moderation request failed: {}", e)))?;

        let response = check_status(response, "Moderation").await?;
        let moderation: ModerationResponse = response
            .json()
            .await
            .map_err(|e| PipelineError::Collaborator(format!("moderation response parse: {}", e)))?;

        let mut warnings = Vec::new();
        for result in &moderation.results {
            let mut flagged: Vec<(&String, f64)> = result
                .category_scores
                .iter()
                .filter(|(_, score)| **score >= MODERATION_THRESHOLD)
                .map(|(category, score)| (category, *score))
                .collect();
            flagged.sort_by(|a, b| b.1.total_cmp(&a.1));
            for (category, score) in flagged {
                warnings.push(moderation_warning(category, score));
            }
        }
        Ok(warnings)
    }
}

fn moderation_warning(category: &str, score: f64) -> String {
    let severity = if score >= 0.75 {
        "high"
    } else if score >= 0.5 {
        "medium"
    } else {
        "low"
    };
    format!("{} ({} confidence)", category, severity)
}

#[async_trait]
impl Moderator for OpenAiModerator {
    async fn review(&self, montages: &[Montage]) -> PipelineResult<(bool, Vec<String>)> {
        let mut warnings = Vec::new();
        for montage in montages {
            let mut segment_warnings = self.review_image(&montage.image_base64).await?;
            warnings.append(&mut segment_warnings);
        }
        warnings.dedup();
        let is_safe = warnings.is_empty();
        Ok((is_safe, warnings))
    }
}

// ---------------------------------------------------------------------------
// Gemini metadata extraction
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize)]
struct GeminiRequest {
    contents: Vec<GeminiContent>,
    #[serde(rename = "generationConfig")]
    generation_config: GeminiGenerationConfig,
}

#[derive(Debug, Serialize, Deserialize)]
struct GeminiContent {
    parts: Vec<GeminiPart>,
}

#[derive(Debug, Serialize, Deserialize)]
struct GeminiPart {
    text: String,
}

#[derive(Debug, Serialize)]
struct GeminiGenerationConfig {
    #[serde(rename = "maxOutputTokens")]
    max_output_tokens: u32,
    temperature: f32,
}

#[derive(Debug, Deserialize)]
struct GeminiResponse {
    candidates: Vec<GeminiCandidate>,
}

#[derive(Debug, Deserialize)]
struct GeminiCandidate {
    content: GeminiContent,
}

const METADATA_PROMPT: &str = "\
Analyze the following video description and return a JSON object with these keys:
  keywords: array of {keyword, weight} where weight is 1-10
  is_face_exist: boolean, whether a human face is visible
  topics: array of strings
  entities: array of strings (people, brands, places)
  actions: array of strings
  emotions: array of strings
  visual_elements: array of strings
  audio_elements: array of strings
  genre: string
  target_audience: array of strings
  duration_estimate: string
  quality_indicators: array of strings
  unique_identifiers: array of strings
  person_identity: {name, gender} for the main person, or null
  other_person_identity: array of strings
  psychological_personality: array of strings
  no_of_person_in_video: number of distinct people visible
Omit any key you cannot determine from the description. Return only JSON.";

const CLASSIFICATION_PROMPT: &str = "\
Analyze the following video description and decide whether the video matches the
configured content category. Return a JSON object with these keys:
  is_match: boolean
  confidence_score: number between 0 and 1
  indicators: array of strings naming the evidence
Return only JSON.";

/// Structured metadata extraction via the Gemini generateContent API
pub struct GeminiMetadataExtractor {
    api_key: String,
    model: String,
    max_tokens: u32,
    temperature: f32,
    client: reqwest::Client,
}

impl GeminiMetadataExtractor {
    pub fn new(config: &CollaboratorConfig) -> PipelineResult<Self> {
        Ok(Self {
            api_key: require_key(&config.gemini_api_key, "Gemini")?,
            model: config.metadata_model.clone(),
            max_tokens: config.max_output_tokens,
            temperature: config.temperature,
            client: http_client(config.request_timeout_seconds)?,
        })
    }

    async fn generate(&self, prompt: &str, description: &str) -> PipelineResult<String> {
        let request = GeminiRequest {
            contents: vec![GeminiContent {
                parts: vec![GeminiPart {
                    text: format!("{}\n\nDescription:\n{}", prompt, description),
                }],
            }],
            generation_config: GeminiGenerationConfig {
                max_output_tokens: self.max_tokens,
                temperature: self.temperature,
            },
        };

        let url = format!(
            "https://generativelanguage.googleapis.com/v1beta/models/{}:generateContent?key={}",
            self.model, self.api_key
        );

        debug!(model = %self.model, "Sending request to Gemini API");

        let response = self
            .client
            .post(&url)
            .json(&request)
            .send()
            .await
            .map_err(|e| PipelineError::Collaborator(format!("Gemini request failed: {}", e)))?;

        let response = check_status(response, "Gemini").await?;
        let gemini: GeminiResponse = response
            .json()
            .await
            .map_err(|e| PipelineError::Collaborator(format!("Gemini response parse: {}", e)))?;

        gemini
            .candidates
            .into_iter()
            .next()
            .and_then(|c| c.content.parts.into_iter().next())
            .map(|p| p.text)
            .ok_or_else(|| PipelineError::Collaborator("No response from Gemini".to_string()))
    }
}

#[async_trait]
impl MetadataExtractor for GeminiMetadataExtractor {
    async fn extract(&self, description: &str) -> PipelineResult<MetadataRecord> {
        let text = self.generate(METADATA_PROMPT, description).await?;
        serde_json::from_str(strip_code_fences(&text))
            .map_err(|e| PipelineError::Collaborator(format!("metadata JSON parse: {}", e)))
    }

    async fn classify_content(&self, description: &str) -> PipelineResult<ContentClassification> {
        let text = self.generate(CLASSIFICATION_PROMPT, description).await?;
        serde_json::from_str(strip_code_fences(&text))
            .map_err(|e| PipelineError::Collaborator(format!("classification JSON parse: {}", e)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_strip_code_fences() {
        assert_eq!(strip_code_fences("{\"a\":1}"), "{\"a\":1}");
        assert_eq!(strip_code_fences("```json\n{\"a\":1}\n```"), "{\"a\":1}");
        assert_eq!(strip_code_fences("```\n{\"a\":1}\n```"), "{\"a\":1}");
        assert_eq!(strip_code_fences("  {\"a\":1}  "), "{\"a\":1}");
    }

    #[test]
    fn test_moderation_warning_severity() {
        assert_eq!(moderation_warning("violence", 0.8), "violence (high confidence)");
        assert_eq!(moderation_warning("violence", 0.6), "violence (medium confidence)");
        assert_eq!(moderation_warning("violence", 0.3), "violence (low confidence)");
    }

    #[test]
    fn test_chat_content_serializes_as_parts() {
        let message = ChatRequestMessage {
            role: "user".to_string(),
            content: MessageContent::Parts(vec![
                ContentPart::Text {
                    text: "describe".to_string(),
                },
                ContentPart::ImageUrl {
                    image_url: ImageUrl {
                        url: "data:image/png;base64,AAAA".to_string(),
                    },
                },
            ]),
        };
        let json = serde_json::to_value(&message).unwrap();
        assert_eq!(json["content"][0]["type"], "text");
        assert_eq!(json["content"][1]["image_url"]["url"], "data:image/png;base64,AAAA");
    }
}
