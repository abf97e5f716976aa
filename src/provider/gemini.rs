//! Gemini provider over the public Generative Language API.

use super::http::{AuthConfig, HttpClient, SseParser};
use super::{Error, Provider, format_api_error};
use crate::runtime::{ChatMessage, ChatRole, FragmentSink, ImagePart};
use futures::StreamExt;
use serde::{Deserialize, Serialize};

const ENDPOINT: &str = "https://generativelanguage.googleapis.com/v1beta";

#[derive(Debug, Clone)]
pub struct GeminiClient {
    http: HttpClient,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerateRequest<'a> {
    contents: Vec<Content<'a>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    system_instruction: Option<Content<'a>>,
}

#[derive(Debug, Serialize)]
struct Content<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    role: Option<&'a str>,
    parts: Vec<Part<'a>>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct Part<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    text: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    inline_data: Option<InlineData<'a>>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct InlineData<'a> {
    mime_type: &'a str,
    data: &'a str,
}

impl<'a> Part<'a> {
    fn text(text: &'a str) -> Self {
        Self {
            text: Some(text),
            inline_data: None,
        }
    }

    fn image(image: &'a ImagePart) -> Self {
        Self {
            text: None,
            inline_data: Some(InlineData {
                mime_type: &image.media_type,
                data: &image.data,
            }),
        }
    }
}

#[derive(Debug, Deserialize)]
struct GenerateResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Debug, Deserialize)]
struct Candidate {
    #[serde(default)]
    content: Option<CandidateContent>,
}

#[derive(Debug, Deserialize)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<ResponsePart>,
}

#[derive(Debug, Deserialize)]
struct ResponsePart {
    #[serde(default)]
    text: Option<String>,
}

impl GenerateResponse {
    fn text(&self) -> String {
        self.candidates
            .iter()
            .filter_map(|c| c.content.as_ref())
            .flat_map(|c| c.parts.iter())
            .filter_map(|p| p.text.as_deref())
            .collect()
    }
}

/// Strip an optional `models/` prefix.
fn normalize_model_name(model: &str) -> &str {
    let trimmed = model.trim();
    trimmed.strip_prefix("models/").unwrap_or(trimmed)
}

fn build_request<'a>(system: &'a str, history: &'a [ChatMessage]) -> GenerateRequest<'a> {
    let contents = history
        .iter()
        .map(|m| Content {
            role: Some(match m.role {
                ChatRole::User => "user",
                ChatRole::Assistant => "model",
            }),
            parts: std::iter::once(Part::text(&m.content))
                .chain(m.images.iter().map(Part::image))
                .collect(),
        })
        .collect();

    GenerateRequest {
        contents,
        system_instruction: (!system.is_empty()).then(|| Content {
            role: None,
            parts: vec![Part::text(system)],
        }),
    }
}

impl GeminiClient {
    pub fn new(api_key: impl Into<String>) -> Self {
        let auth = AuthConfig::ApiKey {
            header: "x-goog-api-key".into(),
            key: api_key.into(),
        };
        Self {
            http: HttpClient::new(ENDPOINT, auth),
        }
    }

    /// Client keyed from `GOOGLE_API_KEY` / `GEMINI_API_KEY`.
    pub fn from_env() -> Result<Self, Error> {
        Provider::Gemini
            .api_key()
            .map(Self::new)
            .ok_or_else(|| Error::MissingApiKey {
                provider: Provider::Gemini.id().to_string(),
                env_vars: Provider::Gemini
                    .env_vars()
                    .iter()
                    .map(|v| (*v).to_string())
                    .collect(),
            })
    }

    /// Stream one completion into `sink`, returning the full reply.
    pub async fn stream_chat(
        &self,
        model: &str,
        system: &str,
        history: &[ChatMessage],
        sink: &FragmentSink,
    ) -> Result<String, Error> {
        let request = build_request(system, history);
        let path = format!(
            "/models/{}:streamGenerateContent?alt=sse",
            normalize_model_name(model)
        );

        let stream = self
            .http
            .post_stream(&path, &request)
            .await
            .map_err(|e| match e {
                Error::Api(msg) => Error::Api(format_api_error(&msg)),
                other => other,
            })?;
        futures::pin_mut!(stream);

        let mut parser = SseParser::new();
        let mut reply = String::new();

        while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(|e| Error::Stream(format!("Stream error: {e}")))?;
            for data in parser.feed(&chunk) {
                if data.is_empty() || data == "[DONE]" {
                    continue;
                }
                match serde_json::from_str::<GenerateResponse>(&data) {
                    Ok(response) => {
                        let text = response.text();
                        if text.is_empty() {
                            continue;
                        }
                        reply.push_str(&text);
                        if !sink.text(text).await {
                            return Ok(reply);
                        }
                    }
                    Err(e) => {
                        tracing::warn!("Failed to parse Gemini SSE event: {e}");
                    }
                }
            }
        }

        Ok(reply)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_model_name() {
        assert_eq!(normalize_model_name("models/gemini-2.5-pro"), "gemini-2.5-pro");
        assert_eq!(normalize_model_name(" gemini-2.5-flash "), "gemini-2.5-flash");
    }

    #[test]
    fn test_request_maps_roles() {
        let history = vec![
            ChatMessage::user("hi"),
            ChatMessage::assistant("hello"),
            ChatMessage::user("again"),
        ];
        let json = serde_json::to_value(build_request("be brief", &history)).unwrap();
        assert_eq!(json["contents"][1]["role"], "model");
        assert_eq!(json["contents"][2]["parts"][0]["text"], "again");
        assert_eq!(json["systemInstruction"]["parts"][0]["text"], "be brief");
        assert!(json["systemInstruction"].get("role").is_none());
    }

    #[test]
    fn test_request_inlines_images_after_text() {
        let image = ImagePart {
            media_type: "image/webp".into(),
            data: "UklGRg==".into(),
        };
        let history = vec![ChatMessage::user("describe").with_images(vec![image])];
        let json = serde_json::to_value(build_request("", &history)).unwrap();
        let parts = &json["contents"][0]["parts"];
        assert_eq!(parts[0]["text"], "describe");
        assert!(parts[0].get("inlineData").is_none());
        assert_eq!(parts[1]["inlineData"]["mimeType"], "image/webp");
        assert_eq!(parts[1]["inlineData"]["data"], "UklGRg==");
        assert!(parts[1].get("text").is_none());
    }

    #[test]
    fn test_request_without_system() {
        let json = serde_json::to_value(build_request("", &[])).unwrap();
        assert!(json.get("systemInstruction").is_none());
    }

    #[test]
    fn test_response_text_joins_parts() {
        let data = r#"{"candidates":[{"content":{"role":"model","parts":[{"text":"Hel"},{"text":"lo"}]}}]}"#;
        let response: GenerateResponse = serde_json::from_str(data).unwrap();
        assert_eq!(response.text(), "Hello");
    }

    #[test]
    fn test_response_without_candidates() {
        let response: GenerateResponse = serde_json::from_str(r#"{"usageMetadata":{}}"#).unwrap();
        assert_eq!(response.text(), "");
    }
}
