//! `load_config` module: reads the static YAML deployment config into an [`IngestConfig`].
//!
//! This is the only place untrusted YAML is parsed. The file never holds
//! secrets: uploader credentials and the GitHub token come from the
//! environment (see [`crate::credentials`]).
//!
//! Every section of the file is optional; missing keys take the defaults of
//! [`IngestConfig`]. A config that parses but cannot be used (zero page cap,
//! invalid epoch branch pattern) is rejected here rather than mid-run.

use anyhow::Result;
use ci_ingest::IngestConfig;
use std::fs;
use std::path::Path;
use tracing::{error, info};

pub fn load_config<P: AsRef<Path>>(path: P) -> Result<IngestConfig> {
    let path_ref = path.as_ref();
    info!(config_path = ?path_ref, "Loading configuration from file");

    let config_content = match fs::read_to_string(path_ref) {
        Ok(content) => {
            info!(config_path = ?path_ref, "Config file read successfully");
            content
        }
        Err(e) => {
            error!(error = ?e, config_path = ?path_ref, "Failed to read config file");
            return Err(anyhow::anyhow!(
                "Failed to read config file {:?}: {}",
                path_ref,
                e
            ));
        }
    };

    if config_content.trim().is_empty() {
        info!(config_path = ?path_ref, "Config file is empty, using defaults");
        return Ok(IngestConfig::default());
    }

    let config: IngestConfig = match serde_yaml::from_str(&config_content) {
        Ok(conf) => {
            info!(config_path = ?path_ref, "Parsed config YAML successfully");
            conf
        }
        Err(e) => {
            error!(error = ?e, config_path = ?path_ref, "Failed to parse config YAML");
            return Err(anyhow::anyhow!("Failed to parse config YAML: {e}"));
        }
    };

    if let Err(e) = config.validate() {
        error!(error = %e, config_path = ?path_ref, "Config failed validation");
        return Err(anyhow::anyhow!("Invalid config {:?}: {e}", path_ref));
    }

    Ok(config)
}
