use serde_json::{Map, Value};

use crate::requests::{OperationKind, RemoteReply};

pub const RATE_LIMIT_CODE: i64 = 429;
pub const RATE_LIMIT_STATUS: &str = "RESOURCE_EXHAUSTED";
pub const SAFETY_MARKER: &str = "SAFETY";

/// Raw failure surfaced by a backend before classification.
#[derive(Debug, Clone, PartialEq)]
pub enum RemoteFailure {
    /// Structured error body, e.g. `{"error": {"code": 429, "status": "..."}}`.
    Payload(Value),
    /// Free-form failure text; may itself contain a JSON error body.
    Message(String),
}

impl RemoteFailure {
    pub fn from_error(err: &anyhow::Error) -> Self {
        Self::Message(format!("{err:#}"))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ClassifiedError {
    #[error("Request limit reached. Please wait a minute and try again. For higher usage, please check your plan and billing details.")]
    RateLimited,
    #[error("The request was blocked by safety filters. Please try a different image or prompt.")]
    SafetyBlocked,
    #[error("API Error: {message}")]
    RemoteApi { message: String },
    #[error("The model did not return a result for {}.", .operation.context())]
    EmptyResponse { operation: OperationKind },
    #[error("An unknown error occurred during {}.{}", .operation.context(), detail_suffix(.detail))]
    Unknown {
        operation: OperationKind,
        detail: Option<String>,
    },
}

impl ClassifiedError {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::RateLimited => "rate_limited",
            Self::SafetyBlocked => "safety_blocked",
            Self::RemoteApi { .. } => "remote_api_error",
            Self::EmptyResponse { .. } => "empty_response",
            Self::Unknown { .. } => "unknown",
        }
    }

    /// Only quota exhaustion carries a "wait and retry" recommendation.
    pub fn is_retriable(&self) -> bool {
        matches!(self, Self::RateLimited)
    }
}

fn detail_suffix(detail: &Option<String>) -> String {
    match detail {
        Some(text) if !text.trim().is_empty() => format!(" ({})", text.trim()),
        _ => String::new(),
    }
}

pub fn classify_failure(operation: OperationKind, failure: &RemoteFailure) -> ClassifiedError {
    match failure {
        RemoteFailure::Payload(payload) => {
            classify_payload(payload).unwrap_or(ClassifiedError::Unknown {
                operation,
                detail: None,
            })
        }
        RemoteFailure::Message(text) => {
            let trimmed = text.trim();
            if trimmed.starts_with('{') {
                if let Some(classified) = serde_json::from_str::<Value>(trimmed)
                    .ok()
                    .as_ref()
                    .and_then(classify_payload)
                {
                    return classified;
                }
            }
            if trimmed.contains(SAFETY_MARKER) {
                return ClassifiedError::SafetyBlocked;
            }
            ClassifiedError::Unknown {
                operation,
                detail: (!trimmed.is_empty()).then(|| trimmed.to_string()),
            }
        }
    }
}

fn classify_payload(payload: &Value) -> Option<ClassifiedError> {
    let outer = payload.as_object()?;
    let inner = outer
        .get("error")
        .and_then(Value::as_object)
        .unwrap_or(outer);

    let code = inner.get("code").and_then(|value| {
        value
            .as_i64()
            .or_else(|| value.as_str().and_then(|raw| raw.trim().parse().ok()))
    });
    let status = inner.get("status").and_then(Value::as_str);
    if code == Some(RATE_LIMIT_CODE) || status == Some(RATE_LIMIT_STATUS) {
        return Some(ClassifiedError::RateLimited);
    }

    let message = inner.get("message").and_then(Value::as_str);
    let safety = finish_reason(outer) == Some(SAFETY_MARKER)
        || finish_reason(inner) == Some(SAFETY_MARKER)
        || message.is_some_and(|text| text.contains(SAFETY_MARKER));
    if safety {
        return Some(ClassifiedError::SafetyBlocked);
    }

    message.map(|text| ClassifiedError::RemoteApi {
        message: text.to_string(),
    })
}

fn finish_reason(map: &Map<String, Value>) -> Option<&str> {
    map.get("finishReason")
        .or_else(|| map.get("finish_reason"))
        .and_then(Value::as_str)
}

fn reply_gate(operation: OperationKind, reply: &RemoteReply) -> Result<(), ClassifiedError> {
    let Some(candidate) = reply.first_candidate() else {
        return Err(ClassifiedError::EmptyResponse { operation });
    };
    if candidate.finish_reason.as_deref() == Some(SAFETY_MARKER) {
        return Err(ClassifiedError::SafetyBlocked);
    }
    Ok(())
}

/// Extracts the `(mime_type, base64)` image payload or classifies why there is none.
pub fn expect_image(
    operation: OperationKind,
    reply: &RemoteReply,
) -> Result<(String, String), ClassifiedError> {
    reply_gate(operation, reply)?;
    reply
        .first_image()
        .map(|(mime, data)| (mime.to_string(), data.to_string()))
        .ok_or(ClassifiedError::EmptyResponse { operation })
}

pub fn expect_text(operation: OperationKind, reply: &RemoteReply) -> Result<String, ClassifiedError> {
    reply_gate(operation, reply)?;
    reply
        .first_text()
        .filter(|text| !text.trim().is_empty())
        .ok_or(ClassifiedError::EmptyResponse { operation })
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use crate::requests::{OperationKind, RemoteReply, ReplyCandidate, ReplyPart};

    use super::{classify_failure, expect_image, expect_text, ClassifiedError, RemoteFailure};

    const OP: OperationKind = OperationKind::Generate;

    #[test]
    fn nested_quota_payload_is_rate_limited() {
        let failure = RemoteFailure::Payload(json!({
            "error": {"code": 429, "status": "RESOURCE_EXHAUSTED", "message": "quota"}
        }));
        let classified = classify_failure(OP, &failure);
        assert_eq!(classified, ClassifiedError::RateLimited);
        assert!(classified.is_retriable());
        assert!(classified.to_string().contains("wait a minute"));
    }

    #[test]
    fn status_alone_or_code_alone_is_rate_limited() {
        let by_status = RemoteFailure::Payload(json!({"status": "RESOURCE_EXHAUSTED"}));
        let by_code = RemoteFailure::Payload(json!({"error": {"code": "429"}}));
        assert_eq!(classify_failure(OP, &by_status), ClassifiedError::RateLimited);
        assert_eq!(classify_failure(OP, &by_code), ClassifiedError::RateLimited);
    }

    #[test]
    fn json_embedded_in_message_is_classified_like_a_payload() {
        let quota = RemoteFailure::Message(
            r#" {"error":{"code":429,"status":"RESOURCE_EXHAUSTED"}} "#.to_string(),
        );
        assert_eq!(classify_failure(OP, &quota), ClassifiedError::RateLimited);

        let api = RemoteFailure::Message(r#"{"error":{"code":400,"message":"bad image"}}"#.to_string());
        assert_eq!(
            classify_failure(OP, &api),
            ClassifiedError::RemoteApi {
                message: "bad image".to_string()
            }
        );
    }

    #[test]
    fn safety_finish_reason_is_safety_blocked() {
        let failure = RemoteFailure::Payload(json!({"finishReason": "SAFETY"}));
        assert_eq!(classify_failure(OP, &failure), ClassifiedError::SafetyBlocked);

        let text = RemoteFailure::Message("candidate blocked: SAFETY".to_string());
        assert_eq!(classify_failure(OP, &text), ClassifiedError::SafetyBlocked);

        let reply = RemoteReply {
            candidates: vec![ReplyCandidate {
                finish_reason: Some("SAFETY".to_string()),
                parts: Vec::new(),
            }],
        };
        assert_eq!(expect_image(OP, &reply), Err(ClassifiedError::SafetyBlocked));
    }

    #[test]
    fn bare_message_is_remote_api_error() {
        let failure = RemoteFailure::Payload(json!({"message": "x"}));
        let classified = classify_failure(OP, &failure);
        assert_eq!(
            classified,
            ClassifiedError::RemoteApi {
                message: "x".to_string()
            }
        );
        assert_eq!(classified.to_string(), "API Error: x");
    }

    #[test]
    fn reply_without_image_is_empty_response() {
        assert_eq!(
            expect_image(OP, &RemoteReply::default()),
            Err(ClassifiedError::EmptyResponse { operation: OP })
        );
        let text_only = RemoteReply::text("no picture today");
        let err = expect_image(OperationKind::Enhance, &text_only).unwrap_err();
        assert_eq!(
            err,
            ClassifiedError::EmptyResponse {
                operation: OperationKind::Enhance
            }
        );
        assert_eq!(
            err.to_string(),
            "The model did not return a result for image enhancement."
        );
    }

    #[test]
    fn unstructured_failures_are_unknown_with_context() {
        let failure = RemoteFailure::Message("connection reset".to_string());
        let classified = classify_failure(OperationKind::Enhance, &failure);
        assert_eq!(classified.kind(), "unknown");
        assert_eq!(
            classified.to_string(),
            "An unknown error occurred during image enhancement. (connection reset)"
        );
        let opaque = RemoteFailure::Payload(json!(["not", "an", "object"]));
        assert_eq!(
            classify_failure(OP, &opaque).to_string(),
            "An unknown error occurred during virtual try-on generation."
        );
    }

    #[test]
    fn text_extraction_requires_non_blank_text() {
        let reply = RemoteReply {
            candidates: vec![ReplyCandidate {
                finish_reason: None,
                parts: vec![ReplyPart::Text("  ".to_string())],
            }],
        };
        assert!(expect_text(OperationKind::Suggest, &reply).is_err());
        assert_eq!(
            expect_text(OperationKind::Suggest, &RemoteReply::text("{}")),
            Ok("{}".to_string())
        );
    }
}
