use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::assets::ImageAsset;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationKind {
    Generate,
    Enhance,
    Suggest,
}

impl OperationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Generate => "generate",
            Self::Enhance => "enhance",
            Self::Suggest => "suggest",
        }
    }

    /// Human-readable description used in failure messages.
    pub fn context(&self) -> &'static str {
        match self {
            Self::Generate => "virtual try-on generation",
            Self::Enhance => "image enhancement",
            Self::Suggest => "style suggestions",
        }
    }

    /// Model capability required to serve this operation.
    pub fn capability(&self) -> &'static str {
        match self {
            Self::Generate | Self::Enhance => "image",
            Self::Suggest => "text",
        }
    }

    pub fn returns_image(&self) -> bool {
        !matches!(self, Self::Suggest)
    }
}

/// Outbound call: ordered image attachments followed by one instruction block.
/// Attachment 0 is always the subject image.
#[derive(Debug, Clone, PartialEq)]
pub struct GenerationRequest {
    pub kind: OperationKind,
    pub attachments: Vec<ImageAsset>,
    pub instructions: String,
}

impl GenerationRequest {
    /// Attachment metadata without payload bytes, for logs and receipts.
    pub fn attachment_summary(&self) -> Value {
        Value::Array(
            self.attachments
                .iter()
                .enumerate()
                .map(|(index, asset)| {
                    json!({
                        "index": index,
                        "mime_type": asset.mime_type().as_str(),
                        "bytes": asset.len(),
                        "digest": asset.digest(),
                    })
                })
                .collect(),
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReplyPart {
    InlineImage { mime_type: String, data: String },
    Text(String),
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReplyCandidate {
    pub finish_reason: Option<String>,
    pub parts: Vec<ReplyPart>,
}

/// Transport-successful response from the remote collaborator.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RemoteReply {
    pub candidates: Vec<ReplyCandidate>,
}

impl RemoteReply {
    pub fn image(mime_type: &str, data: &str) -> Self {
        Self {
            candidates: vec![ReplyCandidate {
                finish_reason: Some("STOP".to_string()),
                parts: vec![ReplyPart::InlineImage {
                    mime_type: mime_type.to_string(),
                    data: data.to_string(),
                }],
            }],
        }
    }

    pub fn text(text: &str) -> Self {
        Self {
            candidates: vec![ReplyCandidate {
                finish_reason: Some("STOP".to_string()),
                parts: vec![ReplyPart::Text(text.to_string())],
            }],
        }
    }

    /// Parses a `generateContent`-shaped payload (`candidates[].content.parts[]`).
    pub fn from_payload(payload: &Value) -> Self {
        let candidates = payload
            .get("candidates")
            .and_then(Value::as_array)
            .map(|rows| rows.iter().map(parse_candidate).collect())
            .unwrap_or_default();
        Self { candidates }
    }

    pub fn first_candidate(&self) -> Option<&ReplyCandidate> {
        self.candidates.first()
    }

    pub fn first_image(&self) -> Option<(&str, &str)> {
        self.first_candidate()?.parts.iter().find_map(|part| match part {
            ReplyPart::InlineImage { mime_type, data } if !data.is_empty() => {
                Some((mime_type.as_str(), data.as_str()))
            }
            _ => None,
        })
    }

    pub fn first_text(&self) -> Option<String> {
        let texts = self
            .first_candidate()?
            .parts
            .iter()
            .filter_map(|part| match part {
                ReplyPart::Text(text) => Some(text.as_str()),
                _ => None,
            })
            .collect::<Vec<&str>>();
        if texts.is_empty() {
            return None;
        }
        Some(texts.concat())
    }
}

fn parse_candidate(candidate: &Value) -> ReplyCandidate {
    let finish_reason = candidate
        .get("finishReason")
        .or_else(|| candidate.get("finish_reason"))
        .and_then(Value::as_str)
        .map(str::to_string);
    let parts = candidate
        .get("content")
        .and_then(|content| content.get("parts"))
        .and_then(Value::as_array)
        .map(|rows| rows.iter().filter_map(parse_part).collect())
        .unwrap_or_default();
    ReplyCandidate {
        finish_reason,
        parts,
    }
}

fn parse_part(part: &Value) -> Option<ReplyPart> {
    if let Some(inline) = part
        .get("inlineData")
        .or_else(|| part.get("inline_data"))
        .and_then(Value::as_object)
    {
        let data = inline.get("data").and_then(Value::as_str).unwrap_or_default();
        let mime_type = inline
            .get("mimeType")
            .or_else(|| inline.get("mime_type"))
            .and_then(Value::as_str)
            .unwrap_or("image/png");
        return Some(ReplyPart::InlineImage {
            mime_type: mime_type.to_string(),
            data: data.to_string(),
        });
    }
    part.get("text")
        .and_then(Value::as_str)
        .map(|text| ReplyPart::Text(text.to_string()))
}
