//! Source processors rewriting files of a freshly cloned tree

use std::sync::Arc;

use async_trait::async_trait;
use regex::{Captures, Regex};
use tracing::debug;

use crate::config::ApplicationSpec;
use crate::errors::AgentError;
use crate::filesys::dir::Dir;

/// Decrypts secrets sealed with the piped's key
pub trait SecretDecrypter: Send + Sync {
    fn decrypt(&self, encrypted: &str) -> Result<String, AgentError>;
}

/// Rewrites files of a canonical tree before it is handed out
#[async_trait]
pub trait SourceProcessor: Send + Sync {
    fn name(&self) -> &'static str;

    async fn process(
        &self,
        repo_dir: &Dir,
        app_dir: &Dir,
        spec: &ApplicationSpec,
    ) -> Result<(), AgentError>;
}

/// Replace every `{{ .<scope>.<name> }}` in `content` through `lookup`
fn render(
    content: &str,
    scope: &str,
    mut lookup: impl FnMut(&str) -> Result<String, AgentError>,
) -> Result<String, AgentError> {
    let pattern = format!(r"\{{\{{\s*\.{}\.([A-Za-z0-9_-]+)\s*\}}\}}", regex::escape(scope));
    let re = Regex::new(&pattern).map_err(|e| AgentError::Internal(e.to_string()))?;

    let mut err = None;
    let out = re.replace_all(content, |caps: &Captures| match lookup(&caps[1]) {
        Ok(value) => value,
        Err(e) => {
            err.get_or_insert(e);
            String::new()
        }
    });
    match err {
        Some(e) => Err(e),
        None => Ok(out.into_owned()),
    }
}

/// Inlines decrypted `encryption.encryptedSecrets` into the decryption targets
pub struct SecretDecryptionProcessor {
    decrypter: Arc<dyn SecretDecrypter>,
}

impl SecretDecryptionProcessor {
    pub fn new(decrypter: Arc<dyn SecretDecrypter>) -> Self {
        Self { decrypter }
    }
}

#[async_trait]
impl SourceProcessor for SecretDecryptionProcessor {
    fn name(&self) -> &'static str {
        "secret-decryption"
    }

    async fn process(
        &self,
        _repo_dir: &Dir,
        app_dir: &Dir,
        spec: &ApplicationSpec,
    ) -> Result<(), AgentError> {
        let Some(encryption) = &spec.encryption else {
            return Ok(());
        };

        for target in &encryption.decryption_targets {
            let file = app_dir.file(target);
            let content = file.read_string().await?;
            let rendered = render(&content, "encryptedSecrets", |name| {
                let sealed = encryption.encrypted_secrets.get(name).ok_or_else(|| {
                    AgentError::DeploySourceError(format!(
                        "secret {} referenced in {} is not declared",
                        name, target
                    ))
                })?;
                self.decrypter.decrypt(sealed)
            })?;
            file.write_string(&rendered).await?;
            debug!(target = %target, "Decrypted secrets");
        }
        Ok(())
    }
}

/// Inlines the content of `attachment.sources` into the attachment targets
pub struct AttachmentProcessor;

#[async_trait]
impl SourceProcessor for AttachmentProcessor {
    fn name(&self) -> &'static str {
        "attachment"
    }

    async fn process(
        &self,
        _repo_dir: &Dir,
        app_dir: &Dir,
        spec: &ApplicationSpec,
    ) -> Result<(), AgentError> {
        let Some(attachment) = &spec.attachment else {
            return Ok(());
        };

        let mut sources = std::collections::BTreeMap::new();
        for (name, path) in &attachment.sources {
            sources.insert(name.clone(), app_dir.file(path).read_string().await?);
        }

        for target in &attachment.targets {
            let file = app_dir.file(target);
            let content = file.read_string().await?;
            let rendered = render(&content, "attachment", |name| {
                sources.get(name).cloned().ok_or_else(|| {
                    AgentError::DeploySourceError(format!(
                        "attachment {} referenced in {} is not declared",
                        name, target
                    ))
                })
            })?;
            file.write_string(&rendered).await?;
        }
        Ok(())
    }
}
