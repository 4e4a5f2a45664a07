//! Deploy sources: application trees at a revision

pub mod cloner;
pub mod processor;
pub mod provider;

pub use cloner::{Cloner, ClonerFactory, GitCloner, GitClonerFactory, LocalCloner};
pub use processor::{AttachmentProcessor, SecretDecrypter, SecretDecryptionProcessor, SourceProcessor};
pub use provider::{DeploySource, Provider, ProviderFactory};
