use async_trait::async_trait;
use tracing::{debug, error};

use crate::contract::{BoxError, ReceiverClient, RunSubmission};

/// Results receiver reached over HTTP: one form-encoded POST per run,
/// authenticated with HTTP Basic auth.
#[derive(Debug, Clone)]
pub struct HttpReceiverClient {
    client: reqwest::Client,
    upload_url: String,
}

impl HttpReceiverClient {
    pub fn new(upload_url: impl Into<String>) -> Self {
        Self::with_client(reqwest::Client::new(), upload_url)
    }

    pub fn with_client(client: reqwest::Client, upload_url: impl Into<String>) -> Self {
        HttpReceiverClient {
            client,
            upload_url: upload_url.into(),
        }
    }

    pub fn upload_url(&self) -> &str {
        &self.upload_url
    }
}

#[async_trait]
impl ReceiverClient for HttpReceiverClient {
    async fn create_run(&self, submission: RunSubmission) -> Result<(), BoxError> {
        let form = submission.form_fields();
        debug!(url = %self.upload_url, fields = form.len(), "Posting run to receiver");

        let response = self
            .client
            .post(&self.upload_url)
            .basic_auth(&submission.username, Some(&submission.password))
            .form(&form)
            .send()
            .await?;

        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        if !status.is_success() {
            error!(status = status.as_u16(), body = %body, "Receiver rejected run");
            return Err(format!("API error: HTTP {}: {}", status.as_u16(), body.trim()).into());
        }
        Ok(())
    }
}
