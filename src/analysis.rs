use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A weighted keyword from metadata extraction
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Keyword {
    pub keyword: String,
    pub weight: i32,
}

/// Identity of the main person featured in the media
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PersonIdentity {
    pub name: Option<String>,
    pub gender: Option<String>,
}

/// Nested content-classification sub-record.
///
/// Included in the result only when classification was requested for the
/// task; sub-fields default to `false`/`null`/`null` when the upstream
/// classifier supplied nothing.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ContentClassification {
    pub is_match: bool,
    pub confidence_score: Option<f64>,
    pub indicators: Option<Vec<String>>,
}

impl Default for ContentClassification {
    fn default() -> Self {
        Self {
            is_match: false,
            confidence_score: None,
            indicators: None,
        }
    }
}

/// Raw metadata record as returned by the extraction collaborator.
///
/// Every field is optional: absence means the collaborator did not supply it,
/// and absence must be preserved through aggregation, never defaulted.
/// `no_of_person_in_video` stays a raw JSON value because upstream models
/// return it as either a number or a numeric-looking string.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MetadataRecord {
    pub keywords: Option<Vec<Keyword>>,
    pub is_face_exist: Option<bool>,
    pub topics: Option<Vec<String>>,
    pub entities: Option<Vec<String>>,
    pub actions: Option<Vec<String>>,
    pub emotions: Option<Vec<String>>,
    pub visual_elements: Option<Vec<String>>,
    pub audio_elements: Option<Vec<String>>,
    pub genre: Option<String>,
    pub target_audience: Option<Vec<String>>,
    pub duration_estimate: Option<String>,
    pub quality_indicators: Option<Vec<String>>,
    pub unique_identifiers: Option<Vec<String>>,
    pub person_identity: Option<PersonIdentity>,
    pub other_person_identity: Option<Vec<String>>,
    pub psychological_personality: Option<Vec<String>>,
    pub no_of_person_in_video: Option<Value>,
}

/// Terminal structured output of a completed task.
///
/// Required fields are always present. Optional metadata fields are emitted
/// only when the upstream record supplied them; `skip_serializing_if` keeps
/// absent keys out of the payload entirely.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalysisResult {
    pub status: String,
    pub description: String,
    pub is_safe: bool,
    pub content_warnings: Vec<String>,
    pub keywords: Vec<Keyword>,
    pub is_face_exist: bool,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub audio_transcription: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub topics: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub entities: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub actions: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub emotions: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub visual_elements: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub audio_elements: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub genre: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub target_audience: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration_estimate: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub quality_indicators: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub unique_identifiers: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub person_identity: Option<PersonIdentity>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub other_person_identity: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub psychological_personality: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub no_of_person_in_video: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content_classification: Option<ContentClassification>,
}

/// Normalize the upstream person count: numeric strings are parsed,
/// non-numeric junk coerces to 0, numbers pass through unchanged.
pub fn normalize_person_count(value: &Value) -> u64 {
    match value {
        Value::Number(n) => n.as_u64().unwrap_or(0),
        Value::String(s) => s.trim().parse().unwrap_or(0),
        _ => 0,
    }
}

/// Assembles the final `AnalysisResult` from heterogeneous partial outputs
pub struct ResultAggregator;

impl ResultAggregator {
    /// Build the terminal record.
    ///
    /// Optional metadata fields are copied over only when present upstream.
    /// When classification was requested, an absent upstream classification
    /// yields the defaulted sub-record rather than omitting the key.
    pub fn aggregate(
        description: String,
        transcript: Option<String>,
        is_safe: bool,
        content_warnings: Vec<String>,
        metadata: MetadataRecord,
        classification: Option<ContentClassification>,
        classification_requested: bool,
    ) -> AnalysisResult {
        let content_classification = if classification_requested {
            Some(classification.unwrap_or_default())
        } else {
            None
        };

        AnalysisResult {
            status: "completed".to_string(),
            description,
            is_safe,
            content_warnings,
            keywords: metadata.keywords.unwrap_or_default(),
            is_face_exist: metadata.is_face_exist.unwrap_or(false),
            audio_transcription: transcript,
            topics: metadata.topics,
            entities: metadata.entities,
            actions: metadata.actions,
            emotions: metadata.emotions,
            visual_elements: metadata.visual_elements,
            audio_elements: metadata.audio_elements,
            genre: metadata.genre,
            target_audience: metadata.target_audience,
            duration_estimate: metadata.duration_estimate,
            quality_indicators: metadata.quality_indicators,
            unique_identifiers: metadata.unique_identifiers,
            person_identity: metadata.person_identity,
            other_person_identity: metadata.other_person_identity,
            psychological_personality: metadata.psychological_personality,
            no_of_person_in_video: metadata
                .no_of_person_in_video
                .as_ref()
                .map(normalize_person_count),
            content_classification,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn aggregate_with(metadata: MetadataRecord) -> AnalysisResult {
        ResultAggregator::aggregate(
            "a video".to_string(),
            Some("hello world".to_string()),
            true,
            vec![],
            metadata,
            None,
            false,
        )
    }

    #[test]
    fn test_absent_optionals_stay_absent() {
        let metadata = MetadataRecord {
            entities: Some(vec!["speaker".to_string()]),
            ..Default::default()
        };
        let result = aggregate_with(metadata);

        let json = serde_json::to_value(&result).unwrap();
        let object = json.as_object().unwrap();
        assert!(!object.contains_key("topics"));
        assert!(!object.contains_key("genre"));
        assert!(!object.contains_key("content_classification"));
        assert_eq!(json["entities"], json!(["speaker"]));

        // required fields always present, even when metadata omitted them
        assert_eq!(json["status"], "completed");
        assert_eq!(json["keywords"], json!([]));
        assert_eq!(json["is_face_exist"], json!(false));
        assert!(object.contains_key("content_warnings"));
    }

    #[test]
    fn test_person_count_normalization() {
        assert_eq!(normalize_person_count(&json!("3")), 3);
        assert_eq!(normalize_person_count(&json!("abc")), 0);
        assert_eq!(normalize_person_count(&json!(7)), 7);
        assert_eq!(normalize_person_count(&json!(null)), 0);
        assert_eq!(normalize_person_count(&json!(-2)), 0);
    }

    #[test]
    fn test_person_count_passthrough_in_aggregate() {
        let result = aggregate_with(MetadataRecord {
            no_of_person_in_video: Some(json!("3")),
            ..Default::default()
        });
        assert_eq!(result.no_of_person_in_video, Some(3));

        let result = aggregate_with(MetadataRecord {
            no_of_person_in_video: Some(json!("abc")),
            ..Default::default()
        });
        assert_eq!(result.no_of_person_in_video, Some(0));

        let result = aggregate_with(MetadataRecord::default());
        assert_eq!(result.no_of_person_in_video, None);
    }

    #[test]
    fn test_classification_defaulted_when_requested_but_absent() {
        let result = ResultAggregator::aggregate(
            "d".to_string(),
            None,
            true,
            vec![],
            MetadataRecord::default(),
            None,
            true,
        );
        let classification = result.content_classification.unwrap();
        assert!(!classification.is_match);
        assert!(classification.confidence_score.is_none());
        assert!(classification.indicators.is_none());
    }

    #[test]
    fn test_classification_passed_through_when_supplied() {
        let result = ResultAggregator::aggregate(
            "d".to_string(),
            None,
            false,
            vec!["warning".to_string()],
            MetadataRecord::default(),
            Some(ContentClassification {
                is_match: true,
                confidence_score: Some(0.9),
                indicators: Some(vec!["symbol".to_string()]),
            }),
            true,
        );
        let classification = result.content_classification.unwrap();
        assert!(classification.is_match);
        assert_eq!(classification.confidence_score, Some(0.9));
    }

    #[test]
    fn test_metadata_record_parses_mixed_person_count() {
        let record: MetadataRecord = serde_json::from_value(json!({
            "keywords": [{"keyword": "music", "weight": 9}],
            "is_face_exist": true,
            "no_of_person_in_video": "2"
        }))
        .unwrap();
        assert_eq!(record.keywords.as_ref().unwrap().len(), 1);
        assert_eq!(record.no_of_person_in_video, Some(json!("2")));
    }
}
