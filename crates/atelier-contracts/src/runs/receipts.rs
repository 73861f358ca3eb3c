use std::path::Path;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::requests::GenerationRequest;

pub const RECEIPT_SCHEMA_VERSION: u64 = 1;

/// Where the produced image sits in the session history when the receipt is written.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryPosition {
    pub cursor: usize,
    pub len: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResultInfo {
    pub mime_type: String,
    pub bytes: usize,
    pub digest: String,
    pub width: Option<u32>,
    pub height: Option<u32>,
}

pub struct ReceiptInput<'a> {
    pub request: &'a GenerationRequest,
    pub model: &'a str,
    pub provider: &'a str,
    pub result: &'a ResultInfo,
    pub history: HistoryPosition,
    pub warnings: &'a [String],
    pub image_path: &'a Path,
    pub receipt_path: &'a Path,
    pub metadata: &'a Map<String, Value>,
}

pub fn build_receipt(input: &ReceiptInput<'_>) -> Value {
    let mut request = Map::new();
    request.insert(
        "operation".to_string(),
        Value::String(input.request.kind.as_str().to_string()),
    );
    request.insert(
        "instructions".to_string(),
        Value::String(input.request.instructions.clone()),
    );
    request.insert(
        "attachments".to_string(),
        input.request.attachment_summary(),
    );

    let mut resolved = Map::new();
    resolved.insert(
        "provider".to_string(),
        Value::String(input.provider.to_string()),
    );
    resolved.insert("model".to_string(), Value::String(input.model.to_string()));

    let mut artifacts = Map::new();
    artifacts.insert(
        "image_path".to_string(),
        Value::String(input.image_path.to_string_lossy().to_string()),
    );
    artifacts.insert(
        "receipt_path".to_string(),
        Value::String(input.receipt_path.to_string_lossy().to_string()),
    );

    let mut root = Map::new();
    root.insert(
        "schema_version".to_string(),
        Value::Number(RECEIPT_SCHEMA_VERSION.into()),
    );
    root.insert("request".to_string(), Value::Object(request));
    root.insert("resolved".to_string(), Value::Object(resolved));
    root.insert(
        "result".to_string(),
        serde_json::to_value(input.result).unwrap_or(Value::Null),
    );
    root.insert(
        "history".to_string(),
        serde_json::to_value(input.history).unwrap_or(Value::Null),
    );
    root.insert(
        "warnings".to_string(),
        Value::Array(input.warnings.iter().cloned().map(Value::String).collect()),
    );
    root.insert("artifacts".to_string(), Value::Object(artifacts));
    root.insert(
        "metadata".to_string(),
        sanitize_payload(&Value::Object(input.metadata.clone())),
    );
    Value::Object(root)
}

pub fn write_receipt(path: &Path, payload: &Value) -> anyhow::Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(path, serde_json::to_string_pretty(payload)?)?;
    Ok(())
}

/// Replaces inline image payloads with a marker so receipts stay small and readable.
pub fn sanitize_payload(value: &Value) -> Value {
    match value {
        Value::Null => Value::Null,
        Value::Bool(_) | Value::Number(_) | Value::String(_) => value.clone(),
        Value::Array(rows) => Value::Array(rows.iter().map(sanitize_payload).collect()),
        Value::Object(map) => {
            let mut out = Map::new();
            for (key, row) in map {
                let lowered = key.to_ascii_lowercase();
                if matches!(
                    lowered.as_str(),
                    "data" | "b64_json" | "image_bytes" | "raw_base64" | "preview"
                ) {
                    out.insert(key.clone(), Value::String("<omitted>".to_string()));
                    continue;
                }
                out.insert(key.clone(), sanitize_payload(row));
            }
            Value::Object(out)
        }
    }
}
