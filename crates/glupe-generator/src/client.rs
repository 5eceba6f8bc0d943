//! HTTP oracle client for Google, OpenAI-compatible and Ollama endpoints.

use std::time::Duration;

use async_trait::async_trait;
use glupe_core::{Oracle, OracleError};
use reqwest::header::RETRY_AFTER;
use reqwest::Client;
use serde_json::{json, Value};

use crate::config::{Endpoint, Protocol};

const RAW_SNIPPET_MAX: usize = 200;

/// Oracle backed by an HTTP text-generation endpoint.
pub struct OracleClient {
    client: Client,
    endpoint: Endpoint,
    timeout: Duration,
    name: String,
}

impl OracleClient {
    pub fn new(endpoint: Endpoint, timeout: Duration) -> Self {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .unwrap_or_else(|_| Client::new());
        let name = format!("{}:{}", endpoint.protocol, endpoint.model_id);
        Self {
            client,
            endpoint,
            timeout,
            name,
        }
    }

    pub fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    fn request_url(&self) -> String {
        let url = &self.endpoint.api_url;
        match (&self.endpoint.protocol, &self.endpoint.api_key) {
            (Protocol::Google, Some(key)) if !url.contains("key=") => {
                let sep = if url.contains('?') { '&' } else { '?' };
                format!("{}{}key={}", url, sep, key)
            }
            _ => url.clone(),
        }
    }
}

/// Request body for `protocol`.
pub fn request_body(protocol: Protocol, model_id: &str, prompt: &str) -> Value {
    match protocol {
        Protocol::Google => json!({
            "contents": [{ "parts": [{ "text": prompt }] }]
        }),
        Protocol::Openai => json!({
            "model": model_id,
            "messages": [{ "role": "user", "content": prompt }]
        }),
        Protocol::Ollama => json!({
            "model": model_id,
            "prompt": prompt,
            "stream": false
        }),
    }
}

/// Parse a server hint such as `retry in 12.5s` or `wait 30 seconds`.
pub fn parse_retry_hint(text: &str) -> Option<Duration> {
    let lower = text.to_lowercase();
    ["retry in ", "retry after ", "wait "]
        .iter()
        .filter_map(|needle| {
            let start = lower.find(needle)? + needle.len();
            let number: String = lower[start..]
                .chars()
                .take_while(|c| c.is_ascii_digit() || *c == '.')
                .collect();
            number.parse::<f64>().ok()
        })
        .find(|secs| secs.is_finite() && *secs > 0.0)
        .map(|secs| Duration::from_secs_f64(secs.ceil()))
}

fn looks_rate_limited(text: &str) -> bool {
    let lower = text.to_lowercase();
    lower.contains("rate limit") || lower.contains("429") || lower.contains("resource_exhausted")
}

fn snippet(text: &str) -> String {
    let mut s: String = text.chars().take(RAW_SNIPPET_MAX).collect();
    if text.chars().count() > RAW_SNIPPET_MAX {
        s.push_str("...");
    }
    s.replace('\n', " ")
}

/// Pull the generated text out of a response body.
///
/// Recognizes OpenAI chat and completion shapes, Google candidates and the
/// Ollama `response` field. An `error` member becomes an error.
pub fn extract_response_text(body: &str) -> Result<String, OracleError> {
    if body.trim().is_empty() {
        return Err(OracleError::InvalidResponse("empty response".to_string()));
    }
    let json: Value = serde_json::from_str(body).map_err(|e| {
        OracleError::InvalidResponse(format!("JSON parse error: {}. Raw: {}", e, snippet(body)))
    })?;

    if let Some(error) = json.get("error") {
        let message = error
            .get("message")
            .and_then(Value::as_str)
            .map(str::to_string)
            .unwrap_or_else(|| error.to_string());
        if looks_rate_limited(&message) || error.get("code").and_then(Value::as_u64) == Some(429) {
            return Err(OracleError::RateLimited {
                retry_after: parse_retry_hint(&message),
                message,
            });
        }
        return Err(OracleError::Other(format!("API error - {}", message)));
    }

    let text = if let Some(choice) = json.pointer("/choices/0") {
        choice
            .pointer("/message/content")
            .or_else(|| choice.get("text"))
            .and_then(Value::as_str)
    } else if let Some(candidate) = json.pointer("/candidates/0") {
        candidate.pointer("/content/parts/0/text").and_then(Value::as_str)
    } else {
        json.get("response").and_then(Value::as_str)
    };

    text.map(str::to_string).ok_or_else(|| {
        OracleError::InvalidResponse(format!("unknown response format: {}", snippet(body)))
    })
}

#[async_trait]
impl Oracle for OracleClient {
    async fn generate(&self, prompt: &str) -> Result<String, OracleError> {
        let url = self.request_url();
        let body = request_body(self.endpoint.protocol, &self.endpoint.model_id, prompt);

        tracing::debug!("Sending request to {}: {}", self.name, self.endpoint.api_url);

        let mut req = self
            .client
            .post(&url)
            .header("Content-Type", "application/json")
            .json(&body);

        if self.endpoint.protocol == Protocol::Openai {
            if let Some(key) = &self.endpoint.api_key {
                req = req.header("Authorization", format!("Bearer {}", key));
            }
        }

        let response = req.send().await.map_err(|e| {
            if e.is_timeout() {
                OracleError::Timeout(self.timeout)
            } else {
                tracing::error!("{} request failed: {}", self.name, e);
                OracleError::Other(e.to_string())
            }
        })?;

        let status = response.status();
        let retry_header = response
            .headers()
            .get(RETRY_AFTER)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.trim().parse::<u64>().ok())
            .map(Duration::from_secs);
        let response_text = response.text().await.unwrap_or_default();

        tracing::debug!("{} response status: {}", self.name, status);

        if !status.is_success() {
            if status.as_u16() == 429 || looks_rate_limited(&response_text) {
                return Err(OracleError::RateLimited {
                    retry_after: retry_header.or_else(|| parse_retry_hint(&response_text)),
                    message: format!("HTTP {}: {}", status, snippet(&response_text)),
                });
            }
            let reason = match status.as_u16() {
                401 => "401 Unauthorized (check API key)".to_string(),
                404 => "404 Not Found (check URL)".to_string(),
                _ => format!("HTTP {}: {}", status, snippet(&response_text)),
            };
            return Err(OracleError::Other(reason));
        }

        extract_response_text(&response_text)
    }

    fn name(&self) -> &str {
        &self.name
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extract_openai_chat() {
        let body = r#"{"choices":[{"message":{"role":"assistant","content":"int main(){}"}}]}"#;
        assert_eq!(extract_response_text(body).unwrap(), "int main(){}");
    }

    #[test]
    fn test_extract_openai_completion() {
        let body = r#"{"choices":[{"text":"x = 1"}]}"#;
        assert_eq!(extract_response_text(body).unwrap(), "x = 1");
    }

    #[test]
    fn test_extract_google() {
        let body = r#"{"candidates":[{"content":{"parts":[{"text":"fn main() {}"}]}}]}"#;
        assert_eq!(extract_response_text(body).unwrap(), "fn main() {}");
    }

    #[test]
    fn test_extract_ollama() {
        let body = r#"{"model":"m","response":"print(1)","done":true}"#;
        assert_eq!(extract_response_text(body).unwrap(), "print(1)");
    }

    #[test]
    fn test_error_member() {
        let body = r#"{"error":{"code":429,"message":"Quota exceeded. Please retry in 17.2s."}}"#;
        match extract_response_text(body) {
            Err(OracleError::RateLimited { retry_after, .. }) => {
                assert_eq!(retry_after, Some(Duration::from_secs(18)));
            }
            other => panic!("expected rate limit, got {:?}", other),
        }

        let body = r#"{"error":{"message":"model not found"}}"#;
        assert!(matches!(extract_response_text(body), Err(OracleError::Other(_))));
    }

    #[test]
    fn test_invalid_bodies() {
        assert!(matches!(extract_response_text(""), Err(OracleError::InvalidResponse(_))));
        assert!(matches!(
            extract_response_text("<html>bad gateway</html>"),
            Err(OracleError::InvalidResponse(_))
        ));
        assert!(matches!(
            extract_response_text(r#"{"unexpected":true}"#),
            Err(OracleError::InvalidResponse(_))
        ));
    }

    #[test]
    fn test_parse_retry_hint() {
        assert_eq!(parse_retry_hint("Please retry in 3s"), Some(Duration::from_secs(3)));
        assert_eq!(parse_retry_hint("please WAIT 20 seconds"), Some(Duration::from_secs(20)));
        assert_eq!(parse_retry_hint("try later"), None);
    }

    #[test]
    fn test_request_bodies() {
        let google = request_body(Protocol::Google, "m", "hi");
        assert_eq!(google["contents"][0]["parts"][0]["text"], "hi");
        let openai = request_body(Protocol::Openai, "gpt", "hi");
        assert_eq!(openai["messages"][0]["content"], "hi");
        assert_eq!(openai["model"], "gpt");
        let ollama = request_body(Protocol::Ollama, "q", "hi");
        assert_eq!(ollama["stream"], false);
    }

    #[test]
    fn test_google_key_appended_once() {
        let client = OracleClient::new(
            Endpoint {
                protocol: Protocol::Google,
                model_id: "gemini-pro".into(),
                api_url: "https://example.test/models/gemini-pro:generateContent".into(),
                api_key: Some("k".into()),
            },
            Duration::from_secs(5),
        );
        assert_eq!(
            client.request_url(),
            "https://example.test/models/gemini-pro:generateContent?key=k"
        );
        assert_eq!(client.name(), "google:gemini-pro");
    }
}
