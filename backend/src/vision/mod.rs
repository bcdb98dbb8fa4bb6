pub mod gemini_client;

use futures::future::BoxFuture;
use std::time::Duration;

pub use gemini_client::GeminiClient;

#[derive(Debug, thiserror::Error)]
pub enum VisionError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("Model endpoint returned {status}: {body}")]
    Status { status: u16, body: String },
    #[error("Invalid endpoint: {0}")]
    InvalidEndpoint(#[from] url::ParseError),
    #[error("Model response contained no text")]
    EmptyResponse,
    #[error("Model call timed out after {0:?}")]
    Timeout(Duration),
}

/// A multimodal model that answers a text instruction about one image.
pub trait VisionModel: Send + Sync {
    fn analyze<'a>(
        &'a self,
        image: &'a [u8],
        mime_type: &'a str,
        prompt: &'a str,
    ) -> BoxFuture<'a, Result<String, VisionError>>;
}
