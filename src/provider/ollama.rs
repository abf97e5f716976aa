//! Ollama provider for local inference.
//!
//! Models are discovered from `/api/tags`; chat uses the native streaming
//! `/api/chat` endpoint, which answers with newline-delimited JSON.

use super::http::{AuthConfig, HttpClient, LineBuffer};
use super::{DISCOVERY_TIMEOUT, Error, format_api_error};
use crate::runtime::{ChatMessage, FragmentSink};
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use std::env;

const DEFAULT_HOST: &str = "http://localhost:11434";

#[derive(Debug, Clone)]
pub struct OllamaClient {
    http: HttpClient,
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<WireMessage<'a>>,
    stream: bool,
}

#[derive(Debug, Serialize)]
struct WireMessage<'a> {
    role: &'a str,
    content: &'a str,
    /// Base64 image payloads.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    images: Vec<&'a str>,
}

#[derive(Debug, Deserialize)]
struct ChatChunk {
    #[serde(default)]
    message: Option<ChunkMessage>,
    #[serde(default)]
    done: bool,
    #[serde(default)]
    error: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ChunkMessage {
    #[serde(default)]
    content: String,
}

#[derive(Debug, Deserialize)]
struct TagsResponse {
    #[serde(default)]
    models: Vec<TagModel>,
}

#[derive(Debug, Deserialize)]
struct TagModel {
    name: String,
}

/// What one NDJSON line of a chat stream means.
#[derive(Debug, PartialEq)]
enum Chunk {
    Text(String),
    Done(String),
}

fn parse_chunk(line: &str) -> Result<Chunk, Error> {
    let chunk: ChatChunk = serde_json::from_str(line)
        .map_err(|e| Error::Stream(format!("Malformed Ollama chunk: {e}")))?;
    if let Some(error) = chunk.error {
        return Err(Error::Api(error));
    }
    let text = chunk.message.map(|m| m.content).unwrap_or_default();
    if chunk.done {
        Ok(Chunk::Done(text))
    } else {
        Ok(Chunk::Text(text))
    }
}

fn build_request<'a>(
    model: &'a str,
    system: &'a str,
    history: &'a [ChatMessage],
) -> ChatRequest<'a> {
    let mut messages = Vec::with_capacity(history.len() + 1);
    if !system.is_empty() {
        messages.push(WireMessage {
            role: "system",
            content: system,
            images: Vec::new(),
        });
    }
    messages.extend(history.iter().map(|m| WireMessage {
        role: m.role.as_str(),
        content: &m.content,
        images: m.images.iter().map(|i| i.data.as_str()).collect(),
    }));

    ChatRequest {
        model,
        messages,
        stream: true,
    }
}

fn normalize_host(host: &str) -> String {
    let host = host.trim().trim_end_matches('/');
    if host.starts_with("http://") || host.starts_with("https://") {
        host.to_string()
    } else {
        format!("http://{host}")
    }
}

impl OllamaClient {
    /// Client for `host`, falling back to `OLLAMA_HOST` and then localhost.
    pub fn new(host: Option<&str>) -> Self {
        let host = host
            .map(str::to_string)
            .or_else(|| env::var("OLLAMA_HOST").ok().filter(|h| !h.is_empty()))
            .unwrap_or_else(|| DEFAULT_HOST.to_string());
        Self {
            http: HttpClient::new(normalize_host(&host), AuthConfig::None),
        }
    }

    pub fn base_url(&self) -> &str {
        self.http.base_url()
    }

    /// Names of locally installed models.
    pub async fn list_models(&self) -> Result<Vec<String>, Error> {
        let tags: TagsResponse = self.http.get_json("/api/tags", DISCOVERY_TIMEOUT).await?;
        Ok(tags.models.into_iter().map(|m| m.name).collect())
    }

    /// Stream one chat completion into `sink`, returning the full reply.
    ///
    /// Stops early, without error, once the sink has been disposed.
    pub async fn stream_chat(
        &self,
        model: &str,
        system: &str,
        history: &[ChatMessage],
        sink: &FragmentSink,
    ) -> Result<String, Error> {
        let request = build_request(model, system, history);
        let stream = self
            .http
            .post_stream("/api/chat", &request)
            .await
            .map_err(|e| match e {
                Error::Api(msg) => Error::Api(format_api_error(&msg)),
                other => other,
            })?;
        futures::pin_mut!(stream);

        let mut lines = LineBuffer::new();
        let mut reply = String::new();

        while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(|e| Error::Stream(format!("Stream error: {e}")))?;
            for line in lines.feed(&chunk) {
                let (text, done) = match parse_chunk(&line)? {
                    Chunk::Text(text) => (text, false),
                    Chunk::Done(text) => (text, true),
                };
                if !text.is_empty() {
                    reply.push_str(&text);
                    if !sink.text(text).await {
                        return Ok(reply);
                    }
                }
                if done {
                    return Ok(reply);
                }
            }
        }

        if let Some(line) = lines.finish()
            && let Chunk::Text(text) | Chunk::Done(text) = parse_chunk(&line)?
            && !text.is_empty()
        {
            reply.push_str(&text);
            sink.text(text).await;
        }

        Ok(reply)
    }
}
