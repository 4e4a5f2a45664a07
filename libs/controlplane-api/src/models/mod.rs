//! Control plane models

pub mod application;
pub mod command;
pub mod deployment;
pub mod event;

pub use application::*;
pub use command::*;
pub use deployment::*;
pub use event::*;

/// Serde helper encoding byte payloads as standard base64 strings.
pub mod base64_bytes {
    use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&BASE64.encode(bytes))
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Vec<u8>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = Option::<String>::deserialize(deserializer)?.unwrap_or_default();
        BASE64.decode(s.as_bytes()).map_err(serde::de::Error::custom)
    }
}

/// Error body returned by the control plane for failed calls.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorResponse {
    /// Canonical status code name, e.g. `NotFound`
    pub code: String,
    pub message: String,
}
