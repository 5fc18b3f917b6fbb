use std::env;

use anyhow::{bail, Context, Result};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use reqwest::blocking::{Client as HttpClient, Response as HttpResponse};
use serde_json::{json, Value};

const DEFAULT_API_BASE: &str = "https://generativelanguage.googleapis.com/v1beta";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Modality {
    Text,
    Image,
}

impl Modality {
    pub fn as_str(&self) -> &'static str {
        match self {
            Modality::Text => "TEXT",
            Modality::Image => "IMAGE",
        }
    }
}

/// One `generateContent` call. An empty `response_modalities` leaves the
/// service default (text only).
#[derive(Debug, Clone, PartialEq)]
pub struct GenerateRequest {
    pub model: String,
    pub prompt: String,
    pub response_modalities: Vec<Modality>,
}

impl GenerateRequest {
    pub fn text(model: impl Into<String>, prompt: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            prompt: prompt.into(),
            response_modalities: Vec::new(),
        }
    }

    pub fn image(model: impl Into<String>, prompt: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            prompt: prompt.into(),
            response_modalities: vec![Modality::Text, Modality::Image],
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InlineData {
    pub mime_type: Option<String>,
    pub data: Vec<u8>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ResponsePart {
    pub text: Option<String>,
    pub inline_data: Option<InlineData>,
    pub thought: bool,
}

impl ResponsePart {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: Some(text.into()),
            ..Self::default()
        }
    }

    pub fn inline(mime_type: &str, data: Vec<u8>) -> Self {
        Self {
            inline_data: Some(InlineData {
                mime_type: Some(mime_type.to_string()),
                data,
            }),
            ..Self::default()
        }
    }
}

/// Parts of the first candidate.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct GenerateResponse {
    pub parts: Vec<ResponsePart>,
    pub finish_reason: Option<String>,
}

impl GenerateResponse {
    pub fn from_parts(parts: Vec<ResponsePart>) -> Self {
        Self {
            parts,
            finish_reason: None,
        }
    }

    /// Concatenated non-thought text parts, `None` when there are none.
    pub fn text(&self) -> Option<String> {
        let mut found = false;
        let mut out = String::new();
        for text in self
            .parts
            .iter()
            .filter(|part| !part.thought)
            .filter_map(|part| part.text.as_deref())
        {
            found = true;
            out.push_str(text);
        }
        found.then_some(out)
    }

    pub fn first_inline_image(&self) -> Option<&InlineData> {
        self.parts
            .iter()
            .filter_map(|part| part.inline_data.as_ref())
            .find(|inline| !inline.data.is_empty())
    }
}

pub trait GenerationProvider: Send + Sync {
    fn name(&self) -> &str;
    fn generate(&self, request: &GenerateRequest) -> Result<GenerateResponse>;
}

pub struct GeminiProvider {
    api_base: String,
    api_key: String,
    http: HttpClient,
}

impl GeminiProvider {
    pub fn new(api_key: impl Into<String>, api_base: Option<String>) -> Self {
        Self {
            api_base: api_base
                .map(|value| value.trim().trim_end_matches('/').to_string())
                .filter(|value| !value.is_empty())
                .unwrap_or_else(|| DEFAULT_API_BASE.to_string()),
            api_key: api_key.into(),
            http: HttpClient::new(),
        }
    }

    /// Reads the credential once at startup; a missing key is fatal.
    pub fn from_env() -> Result<Self> {
        let Some(api_key) = api_key_from(non_empty_env) else {
            bail!("GEMINI_API_KEY or GOOGLE_API_KEY not set");
        };
        Ok(Self::new(api_key, non_empty_env("GEMINI_API_BASE")))
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
}

impl GenerationProvider for GeminiProvider {
    fn name(&self) -> &str {
        "gemini"
    }

    fn generate(&self, request: &GenerateRequest) -> Result<GenerateResponse> {
        let endpoint = self.endpoint_for_model(&request.model);
        let response = self
            .http
            .post(&endpoint)
            .query(&[("key", self.api_key.as_str())])
            .json(&build_payload(request))
            .send()
            .with_context(|| format!("Gemini request failed ({endpoint})"))?;
        let payload = response_json_or_error("Gemini", response)?;
        parse_response(&payload)
    }
}

pub fn build_payload(request: &GenerateRequest) -> Value {
    let mut payload = json!({
        "contents": [{
            "role": "user",
            "parts": [{ "text": request.prompt }],
        }],
    });
    if !request.response_modalities.is_empty() {
        payload["generationConfig"] = json!({
            "responseModalities": request
                .response_modalities
                .iter()
                .map(Modality::as_str)
                .collect::<Vec<&str>>(),
        });
    }
    payload
}

pub fn parse_response(payload: &Value) -> Result<GenerateResponse> {
    let Some(candidate) = payload
        .get("candidates")
        .and_then(Value::as_array)
        .and_then(|rows| rows.first())
    else {
        if let Some(reason) = payload
            .get("promptFeedback")
            .and_then(|feedback| feedback.get("blockReason"))
            .and_then(Value::as_str)
        {
            bail!("Gemini blocked the prompt ({reason})");
        }
        bail!("Gemini returned no candidates");
    };

    let finish_reason = candidate
        .get("finishReason")
        .and_then(Value::as_str)
        .map(str::to_string);
    let raw_parts = candidate
        .get("content")
        .and_then(|content| content.get("parts"))
        .and_then(Value::as_array)
        .cloned()
        .unwrap_or_default();

    let mut parts = Vec::with_capacity(raw_parts.len());
    for part in raw_parts {
        let text = part.get("text").and_then(Value::as_str).map(str::to_string);
        let thought = part.get("thought").and_then(Value::as_bool).unwrap_or(false);
        let inline_data = match part
            .get("inlineData")
            .or_else(|| part.get("inline_data"))
            .and_then(Value::as_object)
        {
            Some(inline) => {
                let data = inline
                    .get("data")
                    .and_then(Value::as_str)
                    .unwrap_or_default();
                let bytes = BASE64
                    .decode(data.as_bytes())
                    .context("Gemini inline data base64 decode failed")?;
                let mime_type = inline
                    .get("mimeType")
                    .or_else(|| inline.get("mime_type"))
                    .and_then(Value::as_str)
                    .map(str::to_string);
                Some(InlineData {
                    mime_type,
                    data: bytes,
                })
            }
            None => None,
        };
        parts.push(ResponsePart {
            text,
            inline_data,
            thought,
        });
    }

    Ok(GenerateResponse {
        parts,
        finish_reason,
    })
}

fn api_key_from(lookup: impl Fn(&str) -> Option<String>) -> Option<String> {
    lookup("GEMINI_API_KEY").or_else(|| lookup("GOOGLE_API_KEY"))
}

fn non_empty_env(key: &str) -> Option<String> {
    env::var(key)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

fn response_json_or_error(provider: &str, response: HttpResponse) -> Result<Value> {
    let status = response.status();
    let code = status.as_u16();
    let body = response
        .text()
        .with_context(|| format!("{provider} response body read failed"))?;
    if !status.is_success() {
        bail!(
            "{provider} request failed ({code}): {}",
            truncate_text(&body, 512)
        );
    }
    let parsed: Value = serde_json::from_str(&body)
        .with_context(|| format!("{provider} returned invalid JSON payload"))?;
    Ok(parsed)
}

fn truncate_text(value: &str, max_chars: usize) -> String {
    if value.chars().count() <= max_chars {
        return value.to_string();
    }
    value.chars().take(max_chars).collect::<String>() + "…"
}

#[cfg(test)]
mod tests {
    use std::io::{Read, Write};
    use std::net::TcpListener;
    use std::thread;

    use base64::Engine as _;
    use serde_json::json;

    use super::{
        api_key_from, build_payload, parse_response, GeminiProvider, GenerateRequest,
        GenerationProvider, BASE64,
    };

    /// Serves exactly one HTTP response and hands back the raw request text.
    fn serve_once(status_line: &str, body: &str) -> (String, thread::JoinHandle<String>) {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let response = format!(
            "HTTP/1.1 {status_line}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
            body.len()
        );
        let handle = thread::spawn(move || {
            let (mut stream, _) = listener.accept().unwrap();
            let mut raw = Vec::new();
            let mut buf = [0u8; 4096];
            loop {
                let read = stream.read(&mut buf).unwrap();
                if read == 0 {
                    break;
                }
                raw.extend_from_slice(&buf[..read]);
                let text = String::from_utf8_lossy(&raw).to_string();
                if let Some(split) = text.find("\r\n\r\n") {
                    let content_length = text[..split]
                        .lines()
                        .find_map(|line| {
                            let (name, value) = line.split_once(':')?;
                            name.eq_ignore_ascii_case("content-length")
                                .then(|| value.trim().parse::<usize>().ok())
                                .flatten()
                        })
                        .unwrap_or(0);
                    if raw.len() >= split + 4 + content_length {
                        break;
                    }
                }
            }
            stream.write_all(response.as_bytes()).unwrap();
            String::from_utf8_lossy(&raw).to_string()
        });
        (format!("http://{addr}"), handle)
    }

    #[test]
    fn text_payload_is_a_single_user_part() {
        let payload = build_payload(&GenerateRequest::text("gemini-2.0-flash", "Explain tides"));
        assert_eq!(
            payload,
            json!({
                "contents": [{"role": "user", "parts": [{"text": "Explain tides"}]}],
            })
        );
    }

    #[test]
    fn image_payload_requests_text_and_image_modalities() {
        let payload = build_payload(&GenerateRequest::image(
            "gemini-2.0-flash-preview-image-generation",
            "a red circle",
        ));
        assert_eq!(payload["contents"][0]["parts"], json!([{"text": "a red circle"}]));
        assert_eq!(
            payload["generationConfig"]["responseModalities"],
            json!(["TEXT", "IMAGE"])
        );
    }

    #[test]
    fn parse_response_reads_first_candidate_parts() -> anyhow::Result<()> {
        let payload = json!({
            "candidates": [
                {
                    "content": {"parts": [
                        {"text": "thinking", "thought": true},
                        {"text": "Here is "},
                        {"text": "your circle."},
                        {"inlineData": {"mimeType": "image/png", "data": BASE64.encode(b"png-bytes")}},
                    ]},
                    "finishReason": "STOP",
                },
                {"content": {"parts": [{"text": "ignored"}]}},
            ]
        });
        let response = parse_response(&payload)?;
        assert_eq!(response.parts.len(), 4);
        assert_eq!(response.text().as_deref(), Some("Here is your circle."));
        assert_eq!(response.finish_reason.as_deref(), Some("STOP"));
        let inline = response.first_inline_image().unwrap();
        assert_eq!(inline.data, b"png-bytes".to_vec());
        assert_eq!(inline.mime_type.as_deref(), Some("image/png"));
        Ok(())
    }

    #[test]
    fn parse_response_accepts_snake_case_inline_data() -> anyhow::Result<()> {
        let payload = json!({
            "candidates": [{"content": {"parts": [
                {"inline_data": {"mime_type": "image/jpeg", "data": ""}},
                {"inline_data": {"mime_type": "image/jpeg", "data": BASE64.encode(b"jpg")}},
            ]}}]
        });
        let response = parse_response(&payload)?;
        assert_eq!(response.text(), None);
        let inline = response.first_inline_image().unwrap();
        assert_eq!(inline.data, b"jpg".to_vec());
        assert_eq!(inline.mime_type.as_deref(), Some("image/jpeg"));
        Ok(())
    }

    #[test]
    fn parse_response_reports_block_reason_and_missing_candidates() {
        let blocked = parse_response(&json!({"promptFeedback": {"blockReason": "SAFETY"}}))
            .unwrap_err()
            .to_string();
        assert_eq!(blocked, "Gemini blocked the prompt (SAFETY)");

        let empty = parse_response(&json!({"candidates": []}))
            .unwrap_err()
            .to_string();
        assert_eq!(empty, "Gemini returned no candidates");
    }

    #[test]
    fn parse_response_rejects_bad_base64() {
        let payload = json!({
            "candidates": [{"content": {"parts": [
                {"inlineData": {"mimeType": "image/png", "data": "not base64!"}},
            ]}}]
        });
        let err = parse_response(&payload).unwrap_err();
        assert!(err.to_string().contains("base64 decode failed"));
    }

    #[test]
    fn api_key_prefers_gemini_over_google() {
        let both = api_key_from(|key| Some(format!("{key}-value")));
        assert_eq!(both.as_deref(), Some("GEMINI_API_KEY-value"));

        let google_only =
            api_key_from(|key| (key == "GOOGLE_API_KEY").then(|| "google".to_string()));
        assert_eq!(google_only.as_deref(), Some("google"));

        assert_eq!(api_key_from(|_| None), None);
    }

    #[test]
    fn endpoint_normalizes_model_paths_and_base() {
        let provider = GeminiProvider::new("key", Some(" https://example.test/v1beta/ ".to_string()));
        assert_eq!(
            provider.endpoint_for_model("gemini-2.0-flash"),
            "https://example.test/v1beta/models/gemini-2.0-flash:generateContent"
        );
        assert_eq!(
            provider.endpoint_for_model("models/gemini-2.5-flash"),
            "https://example.test/v1beta/models/gemini-2.5-flash:generateContent"
        );

        let default_base = GeminiProvider::new("key", None);
        assert_eq!(
            default_base.endpoint_for_model("gemini-2.0-flash"),
            "https://generativelanguage.googleapis.com/v1beta/models/gemini-2.0-flash:generateContent"
        );
    }

    #[test]
    fn generate_posts_payload_with_key_query() -> anyhow::Result<()> {
        let body = json!({"candidates": [{"content": {"parts": [{"text": "4"}]}}]}).to_string();
        let (base, server) = serve_once("200 OK", &body);
        let provider = GeminiProvider::new("secret-key", Some(base));

        let response = provider.generate(&GenerateRequest::text("gemini-2.0-flash", "What is 2+2?"))?;
        assert_eq!(response.text().as_deref(), Some("4"));

        let raw_request = server.join().unwrap();
        assert!(raw_request.starts_with(
            "POST /models/gemini-2.0-flash:generateContent?key=secret-key "
        ));
        assert!(raw_request.contains("\"text\":\"What is 2+2?\""));
        Ok(())
    }

    #[test]
    fn generate_surfaces_http_errors() {
        let (base, server) = serve_once("500 Internal Server Error", "{\"error\":\"boom\"}");
        let provider = GeminiProvider::new("secret-key", Some(base));

        let err = provider
            .generate(&GenerateRequest::text("gemini-2.0-flash", "hello"))
            .unwrap_err();
        server.join().unwrap();
        assert!(err.to_string().starts_with("Gemini request failed (500)"));
    }
}
