use async_trait::async_trait;
use ci_ingest::contract::{BoxError, CredentialStore, UploaderCredentials};
use tracing::debug;

/// Reads uploader credentials from `<NAME>_UPLOADER_USERNAME` and
/// `<NAME>_UPLOADER_PASSWORD`, where `<NAME>` is the uploader identity
/// upper-cased with dashes turned into underscores
/// (`github-actions` → `GITHUB_ACTIONS_UPLOADER_USERNAME`).
#[derive(Debug, Clone, Default)]
pub struct EnvCredentialStore;

impl EnvCredentialStore {
    pub fn variable_names(uploader: &str) -> (String, String) {
        let stem = uploader.to_ascii_uppercase().replace('-', "_");
        (
            format!("{stem}_UPLOADER_USERNAME"),
            format!("{stem}_UPLOADER_PASSWORD"),
        )
    }
}

fn required_var(name: &str) -> Result<String, BoxError> {
    match std::env::var(name) {
        Ok(value) if !value.is_empty() => Ok(value),
        _ => Err(format!("{name} is not set").into()),
    }
}

#[async_trait]
impl CredentialStore for EnvCredentialStore {
    async fn get_uploader(&self, name: &str) -> Result<UploaderCredentials, BoxError> {
        let (username_var, password_var) = Self::variable_names(name);
        debug!(uploader = name, username_var = %username_var, "Reading uploader credentials");
        Ok(UploaderCredentials {
            username: required_var(&username_var)?,
            password: required_var(&password_var)?,
        })
    }
}
