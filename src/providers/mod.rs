//! Provider adapters: reqwest implementations of [`crate::contract::CatalogSource`]
//! plus the identifier/URL parsing each CI backend needs.

pub mod azure;
pub mod check_suite;
pub mod github_actions;
pub mod taskcluster;

use std::time::Duration;

use serde::de::DeserializeOwned;
use tracing::debug;

use crate::contract::BoxError;

pub use azure::AzureSource;
pub use check_suite::CheckSuiteSource;
pub use github_actions::GithubActionsSource;
pub use taskcluster::TaskclusterSource;

const USER_AGENT: &str = concat!("ci-ingest/", env!("CARGO_PKG_VERSION"));

/// HTTP client for provider APIs. Listings can be slow, so the timeout is
/// generous compared with the receiver's.
pub fn http_client(timeout: Duration) -> Result<reqwest::Client, BoxError> {
    let client = reqwest::Client::builder()
        .timeout(timeout)
        .user_agent(USER_AGENT)
        .build()?;
    Ok(client)
}

/// Sends `request` and decodes a JSON body, returning the response headers too.
pub(crate) async fn get_json<T: DeserializeOwned>(
    request: reqwest::RequestBuilder,
) -> Result<(T, reqwest::header::HeaderMap), BoxError> {
    let response = request.send().await?;
    let status = response.status();
    let url = response.url().to_string();
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        return Err(format!("GET {url}: HTTP {}: {}", status.as_u16(), body.trim()).into());
    }
    debug!(url = %url, status = status.as_u16(), "Provider responded");
    let headers = response.headers().clone();
    let body = response.json::<T>().await?;
    Ok((body, headers))
}

/// GET against the GitHub REST API, authenticated when a token is configured.
pub(crate) fn github_get(
    client: &reqwest::Client,
    url: String,
    token: Option<&str>,
) -> reqwest::RequestBuilder {
    let request = client
        .get(url)
        .header(reqwest::header::ACCEPT, "application/vnd.github+json");
    match token {
        Some(token) => request.bearer_auth(token),
        None => request,
    }
}
