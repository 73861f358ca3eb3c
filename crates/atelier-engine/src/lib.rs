use std::collections::BTreeMap;
use std::env;
use std::io::Cursor;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use atelier_contracts::errors::RemoteFailure;
use atelier_contracts::requests::{GenerationRequest, OperationKind, RemoteReply};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use image::{ImageFormat, Rgb, RgbImage};
use reqwest::blocking::{Client as HttpClient, Response as HttpResponse};
use serde_json::{json, Map, Value};
use sha2::{Digest, Sha256};

pub mod prompts;
pub mod studio;

pub const DEFAULT_REQUEST_TIMEOUT_S: f64 = 90.0;
pub const MIN_REQUEST_TIMEOUT_S: f64 = 15.0;
pub const MAX_REQUEST_TIMEOUT_S: f64 = 300.0;

/// One outbound call: the resolved model plus the assembled request.
#[derive(Debug, Clone, Copy)]
pub struct BackendCall<'a> {
    pub model: &'a str,
    pub request: &'a GenerationRequest,
    pub timeout_s: f64,
}

pub trait GenerationBackend: Send + Sync {
    fn name(&self) -> &str;
    fn call(&self, call: &BackendCall<'_>) -> Result<RemoteReply, RemoteFailure>;
}

#[derive(Default, Clone)]
pub struct BackendRegistry {
    backends: BTreeMap<String, Arc<dyn GenerationBackend>>,
}

impl BackendRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register<B: GenerationBackend + 'static>(&mut self, backend: B) {
        self.register_shared(Arc::new(backend));
    }

    pub fn register_shared(&mut self, backend: Arc<dyn GenerationBackend>) {
        self.backends.insert(backend.name().to_string(), backend);
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn GenerationBackend>> {
        self.backends.get(name).cloned()
    }

    pub fn names(&self) -> Vec<String> {
        self.backends.keys().cloned().collect()
    }
}

pub fn default_backend_registry() -> BackendRegistry {
    let mut backends = BackendRegistry::new();
    backends.register(DryrunBackend);
    backends.register(GeminiBackend::new());
    backends
}

/// Clamps a caller-supplied timeout into the supported window.
pub fn resolve_request_timeout(requested: Option<f64>) -> f64 {
    match requested {
        Some(value) if value.is_finite() => value.clamp(MIN_REQUEST_TIMEOUT_S, MAX_REQUEST_TIMEOUT_S),
        _ => DEFAULT_REQUEST_TIMEOUT_S,
    }
}

/// Offline backend: a solid-colour PNG derived from the request, or canned suggestions.
pub struct DryrunBackend;

const DRYRUN_SIZE: u32 = 64;

const DRYRUN_SUGGESTIONS: [&str; 4] = [
    "a minimalist silver chain necklace",
    "classic black rectangular sunglasses",
    "a vintage leather-strap watch with a dark dial",
    "one or two slim silver rings",
];

impl GenerationBackend for DryrunBackend {
    fn name(&self) -> &str {
        "dryrun"
    }

    fn call(&self, call: &BackendCall<'_>) -> Result<RemoteReply, RemoteFailure> {
        if call.request.kind == OperationKind::Suggest {
            let body = json!({ "suggestions": DRYRUN_SUGGESTIONS });
            return Ok(RemoteReply::text(&body.to_string()));
        }
        let (r, g, b) = color_from_request(call.request);
        let png = render_solid_png(DRYRUN_SIZE, DRYRUN_SIZE, [r, g, b])
            .map_err(|err| RemoteFailure::from_error(&err))?;
        Ok(RemoteReply::image("image/png", &BASE64.encode(png)))
    }
}

fn color_from_request(request: &GenerationRequest) -> (u8, u8, u8) {
    let mut hasher = Sha256::new();
    hasher.update(request.kind.as_str().as_bytes());
    hasher.update(request.instructions.as_bytes());
    for attachment in &request.attachments {
        hasher.update(attachment.bytes());
    }
    let digest = hasher.finalize();
    (digest[0], digest[1], digest[2])
}

fn render_solid_png(width: u32, height: u32, rgb: [u8; 3]) -> Result<Vec<u8>> {
    let mut image = RgbImage::new(width, height);
    for pixel in image.pixels_mut() {
        *pixel = Rgb(rgb);
    }
    let mut out = Cursor::new(Vec::new());
    image
        .write_to(&mut out, ImageFormat::Png)
        .context("failed to encode dryrun image")?;
    Ok(out.into_inner())
}

pub struct GeminiBackend {
    api_base: String,
    http: HttpClient,
}

impl GeminiBackend {
    pub fn new() -> Self {
        Self {
            api_base: env::var("GEMINI_API_BASE")
                .ok()
                .map(|value| value.trim().trim_end_matches('/').to_string())
                .filter(|value| !value.is_empty())
                .unwrap_or_else(|| "https://generativelanguage.googleapis.com/v1beta".to_string()),
            http: HttpClient::new(),
        }
    }

    fn api_key() -> Option<String> {
        non_empty_env("GEMINI_API_KEY").or_else(|| non_empty_env("GOOGLE_API_KEY"))
    }

    fn endpoint_for_model(&self, model: &str) -> String {
        let trimmed = model.trim();
        let model_path = if trimmed.starts_with("models/") {
            trimmed.to_string()
        } else {
            format!("models/{trimmed}")
        };
        format!("{}/{}:generateContent", self.api_base, model_path)
    }

    fn build_payload(request: &GenerationRequest) -> Value {
        let mut parts = request
            .attachments
            .iter()
            .map(|asset| {
                json!({
                    "inlineData": {
                        "mimeType": asset.mime_type().as_str(),
                        "data": asset.raw_base64(),
                    }
                })
            })
            .collect::<Vec<Value>>();
        parts.push(json!({ "text": request.instructions }));

        let generation_config = if request.kind.returns_image() {
            json!({
                "responseModalities": ["IMAGE", "TEXT"],
                "temperature": 0,
            })
        } else {
            json!({
                "responseMimeType": "application/json",
                "responseSchema": {
                    "type": "OBJECT",
                    "properties": {
                        "suggestions": {
                            "type": "ARRAY",
                            "items": { "type": "STRING" },
                        }
                    }
                }
            })
        };

        json!({
            "contents": [{ "role": "user", "parts": parts }],
            "generationConfig": generation_config,
        })
    }

    fn post(&self, endpoint: &str, api_key: &str, payload: &Value, timeout_s: f64) -> Result<HttpResponse> {
        self.http
            .post(endpoint)
            .query(&[("key", api_key)])
            .timeout(Duration::from_secs_f64(timeout_s))
            .json(payload)
            .send()
            .with_context(|| format!("Gemini request failed ({endpoint})"))
    }
}

impl Default for GeminiBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl GenerationBackend for GeminiBackend {
    fn name(&self) -> &str {
        "gemini"
    }

    fn call(&self, call: &BackendCall<'_>) -> Result<RemoteReply, RemoteFailure> {
        let Some(api_key) = Self::api_key() else {
            return Err(RemoteFailure::Message(
                "GEMINI_API_KEY or GOOGLE_API_KEY not set".to_string(),
            ));
        };
        let endpoint = self.endpoint_for_model(call.model);
        let payload = Self::build_payload(call.request);
        let response = self
            .post(&endpoint, &api_key, &payload, resolve_request_timeout(Some(call.timeout_s)))
            .map_err(|err| RemoteFailure::Message(error_chain_text(&err, 512)))?;
        let body = response_json_or_failure("Gemini", response)?;
        Ok(RemoteReply::from_payload(&body))
    }
}

/// Splits an HTTP response into a parsed body or a failure the classifier understands.
/// Error bodies that are JSON objects are passed through as structured payloads.
fn response_json_or_failure(provider: &str, response: HttpResponse) -> Result<Value, RemoteFailure> {
    let status = response.status();
    let code = status.as_u16();
    let body = response.text().map_err(|err| {
        RemoteFailure::Message(format!("{provider} response body read failed: {err}"))
    })?;
    if !status.is_success() {
        if let Ok(parsed @ Value::Object(_)) = serde_json::from_str::<Value>(&body) {
            return Err(RemoteFailure::Payload(parsed));
        }
        return Err(RemoteFailure::Message(format!(
            "{provider} request failed ({code}): {}",
            truncate_text(&body, 512)
        )));
    }
    serde_json::from_str(&body).map_err(|_| {
        RemoteFailure::Message(format!("{provider} returned invalid JSON payload"))
    })
}

fn error_chain_text(err: &anyhow::Error, max_chars: usize) -> String {
    let mut parts: Vec<String> = Vec::new();
    for cause in err.chain() {
        let text = cause.to_string();
        let trimmed = text.trim();
        if trimmed.is_empty() || parts.last().is_some_and(|last| last == trimmed) {
            continue;
        }
        parts.push(trimmed.to_string());
    }
    if parts.is_empty() {
        return truncate_text(&err.to_string(), max_chars);
    }
    truncate_text(&parts.join(" | caused by: "), max_chars)
}

fn truncate_text(value: &str, max_chars: usize) -> String {
    if value.chars().count() <= max_chars {
        return value.to_string();
    }
    value.chars().take(max_chars).collect::<String>() + "…"
}

fn non_empty_env(key: &str) -> Option<String> {
    env::var(key)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

pub(crate) fn map_object(value: Value) -> Map<String, Value> {
    value.as_object().cloned().unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use anyhow::anyhow;
    use atelier_contracts::assets::{ImageAsset, MimeType};
    use atelier_contracts::errors::{classify_failure, expect_image, expect_text};
    use atelier_contracts::requests::{GenerationRequest, OperationKind};
    use serde_json::{json, Value};

    use super::{
        default_backend_registry, error_chain_text, resolve_request_timeout, truncate_text,
        BackendCall, DryrunBackend, GeminiBackend, GenerationBackend,
    };

    fn request(kind: OperationKind, instructions: &str) -> GenerationRequest {
        GenerationRequest {
            kind,
            attachments: vec![ImageAsset::new(vec![1, 2, 3], MimeType::Jpeg)],
            instructions: instructions.to_string(),
        }
    }

    #[test]
    fn default_registry_has_gemini_and_dryrun() {
        let registry = default_backend_registry();
        assert_eq!(registry.names(), vec!["dryrun", "gemini"]);
        assert!(registry.get("gemini").is_some());
        assert!(registry.get("openai").is_none());
    }

    #[test]
    fn request_timeout_is_clamped() {
        assert_eq!(resolve_request_timeout(None), 90.0);
        assert_eq!(resolve_request_timeout(Some(1.0)), 15.0);
        assert_eq!(resolve_request_timeout(Some(1_000.0)), 300.0);
        assert_eq!(resolve_request_timeout(Some(42.0)), 42.0);
        assert_eq!(resolve_request_timeout(Some(f64::NAN)), 90.0);
    }

    #[test]
    fn dryrun_image_is_decodable_and_deterministic() -> anyhow::Result<()> {
        let backend = DryrunBackend;
        let req = request(OperationKind::Generate, "hello");
        let call = BackendCall {
            model: "dryrun-image-1",
            request: &req,
            timeout_s: 90.0,
        };
        let first = backend.call(&call).map_err(|err| anyhow!("{err:?}"))?;
        let second = backend.call(&call).map_err(|err| anyhow!("{err:?}"))?;
        assert_eq!(first, second);

        let (mime, data) = expect_image(OperationKind::Generate, &first)?;
        let asset = ImageAsset::from_base64(&mime, &data)?;
        assert_eq!(asset.mime_type(), MimeType::Png);
        assert_eq!(asset.dimensions(), Some((64, 64)));

        let other = request(OperationKind::Generate, "different");
        let third = backend
            .call(&BackendCall {
                request: &other,
                ..call
            })
            .map_err(|err| anyhow!("{err:?}"))?;
        assert_ne!(first, third);
        Ok(())
    }

    #[test]
    fn dryrun_suggestions_are_json_text() -> anyhow::Result<()> {
        let req = request(OperationKind::Suggest, "style me");
        let reply = DryrunBackend
            .call(&BackendCall {
                model: "dryrun-text-1",
                request: &req,
                timeout_s: 90.0,
            })
            .map_err(|err| anyhow!("{err:?}"))?;
        let text = expect_text(OperationKind::Suggest, &reply)?;
        let parsed: Value = serde_json::from_str(&text)?;
        assert_eq!(parsed["suggestions"].as_array().map(Vec::len), Some(4));
        Ok(())
    }

    #[test]
    fn gemini_payload_orders_images_before_text() {
        let payload = GeminiBackend::build_payload(&request(OperationKind::Generate, "edit"));
        let parts = &payload["contents"][0]["parts"];
        assert_eq!(parts[0]["inlineData"]["mimeType"], json!("image/jpeg"));
        assert_eq!(parts[0]["inlineData"]["data"], json!("AQID"));
        assert_eq!(parts[1]["text"], json!("edit"));
        assert_eq!(
            payload["generationConfig"]["responseModalities"],
            json!(["IMAGE", "TEXT"])
        );
        assert_eq!(payload["generationConfig"]["temperature"], json!(0));
    }

    #[test]
    fn gemini_suggestion_payload_requests_json() {
        let payload = GeminiBackend::build_payload(&request(OperationKind::Suggest, "style"));
        assert_eq!(
            payload["generationConfig"]["responseMimeType"],
            json!("application/json")
        );
        assert_eq!(
            payload["generationConfig"]["responseSchema"]["properties"]["suggestions"]["type"],
            json!("ARRAY")
        );
    }

    #[test]
    fn gemini_endpoint_normalizes_model_prefix() {
        let backend = GeminiBackend::new();
        let plain = backend.endpoint_for_model("gemini-2.5-flash");
        let prefixed = backend.endpoint_for_model("models/gemini-2.5-flash");
        assert_eq!(plain, prefixed);
        assert!(plain.ends_with("/models/gemini-2.5-flash:generateContent"));
    }

    #[test]
    fn transport_errors_classify_as_unknown_with_detail() {
        let err = anyhow!("connection refused").context("Gemini request failed (x)");
        let failure =
            atelier_contracts::errors::RemoteFailure::Message(error_chain_text(&err, 512));
        let classified = classify_failure(OperationKind::Generate, &failure);
        assert_eq!(classified.kind(), "unknown");
        assert!(classified.to_string().contains("connection refused"));
    }

    #[test]
    fn truncate_text_marks_cut() {
        assert_eq!(truncate_text("abc", 5), "abc");
        assert_eq!(truncate_text("abcdef", 3), "abc…");
    }
}
