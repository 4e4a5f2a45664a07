//! Where the piped configuration is read from

use std::path::PathBuf;

use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};

use crate::errors::AgentError;
use crate::storage::settings::PipedSpec;

/// A configuration source picked from the command line
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigSource {
    File(PathBuf),
    /// Base64 encoded document
    Data(String),
    GcpSecret(String),
    AwsSecret(String),
}

impl ConfigSource {
    /// Pick the single non-empty source
    pub fn select(
        file: Option<PathBuf>,
        data: Option<String>,
        gcp_secret: Option<String>,
        aws_secret: Option<String>,
    ) -> Result<Self, AgentError> {
        let non_empty = |v: Option<String>| v.filter(|s| !s.trim().is_empty());
        let mut sources = Vec::new();
        if let Some(file) = file.filter(|p| !p.as_os_str().is_empty()) {
            sources.push(ConfigSource::File(file));
        }
        if let Some(data) = non_empty(data) {
            sources.push(ConfigSource::Data(data));
        }
        if let Some(name) = non_empty(gcp_secret) {
            sources.push(ConfigSource::GcpSecret(name));
        }
        if let Some(name) = non_empty(aws_secret) {
            sources.push(ConfigSource::AwsSecret(name));
        }

        match sources.len() {
            0 => Err(AgentError::ConfigError(
                "one of --config-file, --config-data, --config-gcp-secret or --config-aws-secret must be set"
                    .to_string(),
            )),
            1 => Ok(sources.remove(0)),
            _ => Err(AgentError::ConfigError(
                "only one of --config-file, --config-data, --config-gcp-secret or --config-aws-secret can be set"
                    .to_string(),
            )),
        }
    }

    /// Read and decode the configuration
    pub async fn load(&self) -> Result<PipedSpec, AgentError> {
        let data = match self {
            ConfigSource::File(path) => tokio::fs::read(path).await?,
            ConfigSource::Data(data) => BASE64
                .decode(data.trim())
                .map_err(|e| AgentError::ConfigError(format!("invalid --config-data: {}", e)))?,
            ConfigSource::GcpSecret(name) => {
                return Err(AgentError::ConfigError(format!(
                    "loading configuration from GCP secret {} is not supported by this build",
                    name
                )))
            }
            ConfigSource::AwsSecret(name) => {
                return Err(AgentError::ConfigError(format!(
                    "loading configuration from AWS secret {} is not supported by this build",
                    name
                )))
            }
        };
        PipedSpec::from_bytes(&data)
    }
}
