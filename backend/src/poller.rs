//! Client side of the status lifecycle: fetch a record until it settles.

use shared::ImageRecord;
use std::fmt::{Debug, Display};
use std::future::Future;
use std::time::Duration;
use url::Url;
use uuid::Uuid;

#[derive(Debug, thiserror::Error)]
pub enum PollError<E: Debug + Display> {
    #[error("Image still not analyzed after {attempts} attempts")]
    GaveUp {
        attempts: usize,
        last_error: Option<E>,
    },
}

/// Calls `fetch` every `interval` until the record reaches a terminal state.
///
/// Fetch errors are treated as transient and only count as an attempt.
pub async fn poll_until_terminal<F, Fut, E>(
    mut fetch: F,
    interval: Duration,
    max_attempts: usize,
) -> Result<ImageRecord, PollError<E>>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<ImageRecord, E>>,
    E: Debug + Display,
{
    let mut last_error = None;
    for attempt in 1..=max_attempts {
        match fetch().await {
            Ok(record) if record.status.is_terminal() => return Ok(record),
            Ok(record) => {
                log::debug!("Image {} still {} (attempt {})", record.id, record.status, attempt);
                last_error = None;
            }
            Err(e) => {
                log::warn!("Polling attempt {} failed: {}", attempt, e);
                last_error = Some(e);
            }
        }
        if attempt < max_attempts {
            tokio::time::sleep(interval).await;
        }
    }
    Err(PollError::GaveUp {
        attempts: max_attempts,
        last_error,
    })
}

#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("Server returned {0}")]
    Status(u16),
    #[error("Invalid URL: {0}")]
    Url(#[from] url::ParseError),
}

/// Minimal HTTP client for the image endpoints.
#[derive(Clone)]
pub struct HttpImageClient {
    http: reqwest::Client,
    base_url: Url,
    token: String,
}

impl HttpImageClient {
    pub fn new(base_url: &str, token: String) -> Result<Self, ClientError> {
        Ok(Self {
            http: reqwest::Client::new(),
            base_url: Url::parse(base_url)?,
            token,
        })
    }

    pub fn image_url(&self, id: Uuid) -> Result<Url, ClientError> {
        Ok(self.base_url.join(&format!("/api/images/{}", id))?)
    }

    pub async fn get_image(&self, id: Uuid) -> Result<ImageRecord, ClientError> {
        let response = self
            .http
            .get(self.image_url(id)?)
            .bearer_auth(&self.token)
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(ClientError::Status(response.status().as_u16()));
        }
        Ok(response.json().await?)
    }

    pub async fn wait_for_analysis(
        &self,
        id: Uuid,
        interval: Duration,
        max_attempts: usize,
    ) -> Result<ImageRecord, PollError<ClientError>> {
        poll_until_terminal(|| self.get_image(id), interval, max_attempts).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use shared::ImageStatus;
    use std::cell::Cell;

    fn record_with(status: ImageStatus) -> ImageRecord {
        let mut record = ImageRecord::new(Uuid::nil(), "p".into(), "image/png".into());
        record.status = status;
        record
    }

    #[tokio::test(start_paused = true)]
    async fn stops_at_first_terminal_state() {
        let calls = Cell::new(0);
        let statuses = [
            ImageStatus::Pending,
            ImageStatus::Processing,
            ImageStatus::Failed,
            ImageStatus::Completed,
        ];
        let record = poll_until_terminal(
            || {
                let status = statuses[calls.get()];
                calls.set(calls.get() + 1);
                async move { Ok::<_, String>(record_with(status)) }
            },
            Duration::from_secs(2),
            10,
        )
        .await
        .unwrap();
        assert_eq!(record.status, ImageStatus::Failed);
        assert_eq!(calls.get(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn transient_errors_keep_polling() {
        let calls = Cell::new(0);
        let record = poll_until_terminal(
            || {
                calls.set(calls.get() + 1);
                let n = calls.get();
                async move {
                    if n < 3 {
                        Err("connection reset".to_string())
                    } else {
                        Ok(record_with(ImageStatus::Completed))
                    }
                }
            },
            Duration::from_secs(1),
            5,
        )
        .await
        .unwrap();
        assert_eq!(record.status, ImageStatus::Completed);
    }

    #[tokio::test(start_paused = true)]
    async fn gives_up_after_max_attempts() {
        let calls = Cell::new(0);
        let result = poll_until_terminal(
            || {
                calls.set(calls.get() + 1);
                async { Ok::<_, String>(record_with(ImageStatus::Processing)) }
            },
            Duration::from_secs(1),
            4,
        )
        .await;
        assert!(matches!(result, Err(PollError::GaveUp { attempts: 4, .. })));
        assert_eq!(calls.get(), 4);
    }

    #[test]
    fn image_url_is_rooted_at_api() {
        let client = HttpImageClient::new("https://fields.example.com/app/", "t".into()).unwrap();
        assert_eq!(
            client.image_url(Uuid::nil()).unwrap().as_str(),
            "https://fields.example.com/api/images/00000000-0000-0000-0000-000000000000"
        );
    }
}
