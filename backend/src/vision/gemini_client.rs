use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use futures::future::BoxFuture;
use serde_json::{Value, json};
use std::time::Duration;
use url::Url;

use super::{VisionError, VisionModel};

pub const DEFAULT_ENDPOINT: &str = "https://generativelanguage.googleapis.com";
pub const DEFAULT_MODEL: &str = "gemini-2.0-flash";

#[derive(Clone)]
pub struct GeminiClient {
    http: reqwest::Client,
    endpoint: Url,
    model: String,
    api_key: String,
}

impl GeminiClient {
    pub fn new(
        endpoint: &str,
        model: String,
        api_key: String,
        timeout: Duration,
    ) -> Result<Self, VisionError> {
        let http = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            http,
            endpoint: Url::parse(endpoint)?,
            model,
            api_key,
        })
    }

    fn generate_url(&self) -> Result<Url, VisionError> {
        let path = format!("v1beta/models/{}:generateContent", self.model);
        Ok(self.endpoint.join(&path)?)
    }

    async fn generate(
        &self,
        image: &[u8],
        mime_type: &str,
        prompt: &str,
    ) -> Result<String, VisionError> {
        let url = self.generate_url()?;
        log::debug!(
            "Calling vision model {} with {} bytes of {}",
            self.model,
            image.len(),
            mime_type
        );

        let response = self
            .http
            .post(url)
            .header("x-goog-api-key", &self.api_key)
            .json(&request_body(image, mime_type, prompt))
            .send()
            .await
            .map_err(|e| {
                log::error!("Vision model request failed: {:?}", e);
                VisionError::Http(e)
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            log::error!("Vision model returned {}", status);
            return Err(VisionError::Status {
                status: status.as_u16(),
                body,
            });
        }

        let payload: Value = response.json().await?;
        response_text(&payload).ok_or(VisionError::EmptyResponse)
    }
}

impl VisionModel for GeminiClient {
    fn analyze<'a>(
        &'a self,
        image: &'a [u8],
        mime_type: &'a str,
        prompt: &'a str,
    ) -> BoxFuture<'a, Result<String, VisionError>> {
        Box::pin(self.generate(image, mime_type, prompt))
    }
}

fn request_body(image: &[u8], mime_type: &str, prompt: &str) -> Value {
    json!({
        "contents": [{
            "parts": [
                {
                    "inline_data": {
                        "mime_type": mime_type,
                        "data": STANDARD.encode(image),
                    }
                },
                { "text": prompt }
            ]
        }],
        "generationConfig": {
            "responseMimeType": "application/json"
        }
    })
}

/// Concatenated text parts of the first candidate.
///
/// `None` only when the payload carries no parts at all. Blank text is still a
/// reply and is left for the normalizer to judge.
fn response_text(payload: &Value) -> Option<String> {
    let parts = payload
        .get("candidates")?
        .get(0)?
        .get("content")?
        .get("parts")?
        .as_array()
        .filter(|parts| !parts.is_empty())?;
    Some(
        parts
            .iter()
            .filter_map(|part| part.get("text").and_then(Value::as_str))
            .collect(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_inlines_image_as_base64() {
        let body = request_body(b"abc", "image/png", "describe");
        let parts = &body["contents"][0]["parts"];
        assert_eq!(parts[0]["inline_data"]["mime_type"], "image/png");
        assert_eq!(parts[0]["inline_data"]["data"], "YWJj");
        assert_eq!(parts[1]["text"], "describe");
    }

    #[test]
    fn response_text_joins_parts() {
        let payload = json!({
            "candidates": [{
                "content": { "parts": [ { "text": "{\"a\":" }, { "text": "1}" } ] }
            }]
        });
        assert_eq!(response_text(&payload).as_deref(), Some("{\"a\":1}"));
    }

    #[test]
    fn response_without_parts_is_empty() {
        assert_eq!(response_text(&json!({ "candidates": [] })), None);
        let no_parts = json!({ "candidates": [{ "content": { "parts": [] } }] });
        assert_eq!(response_text(&no_parts), None);
    }

    #[test]
    fn blank_text_is_still_a_reply() {
        let blank = json!({ "candidates": [{ "content": { "parts": [ { "text": "" } ] } }] });
        assert_eq!(response_text(&blank).as_deref(), Some(""));
        let spaces = json!({ "candidates": [{ "content": { "parts": [ { "text": "  " } ] } }] });
        assert_eq!(response_text(&spaces).as_deref(), Some("  "));
    }

    #[test]
    fn generate_url_includes_model() {
        let client = GeminiClient::new(
            DEFAULT_ENDPOINT,
            DEFAULT_MODEL.to_string(),
            "key".to_string(),
            Duration::from_secs(5),
        )
        .unwrap();
        assert_eq!(
            client.generate_url().unwrap().as_str(),
            "https://generativelanguage.googleapis.com/v1beta/models/gemini-2.0-flash:generateContent"
        );
    }
}
