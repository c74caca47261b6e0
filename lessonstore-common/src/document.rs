//! Lesson document model
//!
//! One JSON document per lesson. Content blocks are a closed set of variants,
//! each with its own payload shape; the wire form stays `{block_id, type, content}`.

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::path::Path;

/// A lesson as authored in the source corpus.
///
/// Identifiers are kept as raw strings: documents may carry identifiers that are
/// not valid UUIDs until identity repair has run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LessonDocument {
    pub lesson_id: String,
    pub title: String,
    pub domain: String,
    pub order_index: i64,
    #[serde(default)]
    pub content_blocks: Vec<ContentBlock>,
    #[serde(default)]
    pub prerequisites: Vec<String>,
    #[serde(default)]
    pub hidden: bool,
    #[serde(default)]
    pub tags: Vec<String>,
}

impl LessonDocument {
    /// Parse a document from JSON text
    pub fn from_json(text: &str) -> std::result::Result<Self, serde_json::Error> {
        serde_json::from_str(text)
    }

    /// Read and parse one document file
    ///
    /// Any read or parse failure is reported as [`Error::MalformedDocument`].
    pub fn from_path(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path).map_err(|e| Error::MalformedDocument {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;
        Self::from_json(&text).map_err(|e| Error::MalformedDocument {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })
    }
}

/// One ordered sub-unit of a lesson
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "RawContentBlock", into = "RawContentBlock")]
pub struct ContentBlock {
    pub block_id: String,
    pub payload: BlockPayload,
}

impl ContentBlock {
    pub fn new(block_id: impl Into<String>, payload: BlockPayload) -> Self {
        Self {
            block_id: block_id.into(),
            payload,
        }
    }

    /// Wire name of this block's type
    pub fn kind(&self) -> &'static str {
        self.payload.kind()
    }
}

/// Type-specific block payloads
#[derive(Debug, Clone, PartialEq)]
pub enum BlockPayload {
    Text(TextPayload),
    Video(VideoPayload),
    CodeExercise(CodeExercisePayload),
    Assessment(AssessmentPayload),
    Image(ImagePayload),
}

impl BlockPayload {
    pub const KINDS: [&'static str; 5] = ["text", "video", "code_exercise", "assessment", "image"];

    pub fn kind(&self) -> &'static str {
        match self {
            BlockPayload::Text(_) => "text",
            BlockPayload::Video(_) => "video",
            BlockPayload::CodeExercise(_) => "code_exercise",
            BlockPayload::Assessment(_) => "assessment",
            BlockPayload::Image(_) => "image",
        }
    }

    fn from_parts(kind: &str, content: Value) -> std::result::Result<Self, String> {
        let payload = match kind {
            "text" => serde_json::from_value(content).map(BlockPayload::Text),
            "video" => serde_json::from_value(content).map(BlockPayload::Video),
            "code_exercise" => serde_json::from_value(content).map(BlockPayload::CodeExercise),
            "assessment" => serde_json::from_value(content).map(BlockPayload::Assessment),
            "image" => serde_json::from_value(content).map(BlockPayload::Image),
            other => {
                return Err(format!(
                    "unknown content block type '{}' (expected one of {})",
                    other,
                    Self::KINDS.join(", ")
                ))
            }
        };
        payload.map_err(|e| format!("invalid '{}' block content: {}", kind, e))
    }

    fn to_value(&self) -> Value {
        let value = match self {
            BlockPayload::Text(p) => serde_json::to_value(p),
            BlockPayload::Video(p) => serde_json::to_value(p),
            BlockPayload::CodeExercise(p) => serde_json::to_value(p),
            BlockPayload::Assessment(p) => serde_json::to_value(p),
            BlockPayload::Image(p) => serde_json::to_value(p),
        };
        // Payload structs hold only strings, integers and vectors of them.
        value.unwrap_or(Value::Null)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TextPayload {
    pub text: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VideoPayload {
    pub url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub caption: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration_seconds: Option<u32>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CodeExercisePayload {
    pub language: String,
    pub prompt: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub starter_code: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub solution: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AssessmentPayload {
    pub questions: Vec<AssessmentQuestion>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AssessmentQuestion {
    pub prompt: String,
    #[serde(default)]
    pub options: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub correct_option: Option<usize>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImagePayload {
    pub url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub alt_text: Option<String>,
}

/// Wire form of a content block
#[derive(Debug, Clone, Serialize, Deserialize)]
struct RawContentBlock {
    block_id: String,
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    content: Value,
}

impl TryFrom<RawContentBlock> for ContentBlock {
    type Error = String;

    fn try_from(raw: RawContentBlock) -> std::result::Result<Self, Self::Error> {
        let payload = BlockPayload::from_parts(&raw.kind, raw.content)
            .map_err(|reason| format!("block '{}': {}", raw.block_id, reason))?;
        Ok(ContentBlock {
            block_id: raw.block_id,
            payload,
        })
    }
}

impl From<ContentBlock> for RawContentBlock {
    fn from(block: ContentBlock) -> Self {
        RawContentBlock {
            kind: block.payload.kind().to_string(),
            content: block.payload.to_value(),
            block_id: block.block_id,
        }
    }
}

/// Encode blocks for the `lessons.content_blocks` column
pub fn encode_blocks(blocks: &[ContentBlock]) -> Result<String> {
    Ok(serde_json::to_string(blocks)?)
}

/// Decode the `lessons.content_blocks` column
pub fn decode_blocks(text: &str) -> Result<Vec<ContentBlock>> {
    if text.trim().is_empty() {
        return Ok(Vec::new());
    }
    Ok(serde_json::from_str(text)?)
}

/// Encode a prerequisite list for the `lessons.prerequisites` column
pub fn encode_prerequisites(prerequisites: &[String]) -> Result<String> {
    Ok(serde_json::to_string(prerequisites)?)
}

/// Decode the `lessons.prerequisites` column; NULL or empty text is an empty list
pub fn decode_prerequisites(text: Option<&str>) -> Result<Vec<String>> {
    match text.map(str::trim) {
        None | Some("") => Ok(Vec::new()),
        Some(text) => Ok(serde_json::from_str(text)?),
    }
}
