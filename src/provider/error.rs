//! Provider error types.

use thiserror::Error;

/// Reduce an HTTP error body to its human-readable message.
///
/// Provider APIs wrap failures as `{"error": {"message": ..}}` (with an optional
/// `status`), `{"error": ".."}` or `{"message": ".."}`. The `HTTP <code>:` prefix
/// is preserved; anything that is not such JSON is returned unchanged.
#[must_use]
pub fn format_api_error(error: &str) -> String {
    let Some(json_start) = error.find('{') else {
        return error.to_string();
    };
    let Ok(json) = serde_json::from_str::<serde_json::Value>(&error[json_start..]) else {
        return error.to_string();
    };
    let Some(message) = error_message(&json) else {
        return error.to_string();
    };

    let prefix = error[..json_start].trim();
    if prefix.is_empty() {
        message
    } else {
        format!("{prefix} {message}")
    }
}

fn error_message(json: &serde_json::Value) -> Option<String> {
    if let Some(inner) = json.get("error") {
        if let Some(text) = inner.as_str() {
            return Some(text.to_string());
        }
        let message = inner.get("message").and_then(|v| v.as_str())?;
        return Some(match inner.get("status").and_then(|v| v.as_str()) {
            Some(status) => format!("{message} (status: {status})"),
            None => message.to_string(),
        });
    }
    json.get("message")
        .and_then(|v| v.as_str())
        .map(str::to_string)
}

#[derive(Debug, Error)]
pub enum Error {
    #[error("Missing API key for {provider}. Set one of: {}", env_vars.join(", "))]
    MissingApiKey {
        provider: String,
        env_vars: Vec<String>,
    },

    #[error("API error: {0}")]
    Api(String),

    #[error("Stream error: {0}")]
    Stream(String),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_google_error() {
        let error = r#"HTTP 400: {"error":{"message":"API key not valid.","status":"INVALID_ARGUMENT"}}"#;
        assert_eq!(
            format_api_error(error),
            "HTTP 400: API key not valid. (status: INVALID_ARGUMENT)"
        );
    }

    #[test]
    fn test_format_ollama_error() {
        let error = r#"HTTP 404: {"error":"model 'llama9' not found"}"#;
        assert_eq!(format_api_error(error), "HTTP 404: model 'llama9' not found");
    }

    #[test]
    fn test_format_top_level_message() {
        assert_eq!(format_api_error(r#"{"message":"boom"}"#), "boom");
    }

    #[test]
    fn test_format_passthrough() {
        assert_eq!(format_api_error("Connection refused"), "Connection refused");
        assert_eq!(format_api_error("HTTP 500: {oops"), "HTTP 500: {oops");
    }

    #[test]
    fn test_missing_key_message() {
        let err = Error::MissingApiKey {
            provider: "GEMINI".into(),
            env_vars: vec!["GOOGLE_API_KEY".into(), "GEMINI_API_KEY".into()],
        };
        assert_eq!(
            err.to_string(),
            "Missing API key for GEMINI. Set one of: GOOGLE_API_KEY, GEMINI_API_KEY"
        );
    }
}
