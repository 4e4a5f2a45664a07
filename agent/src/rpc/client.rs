//! JSON RPC client shared by the control plane and plugin transports

use std::path::PathBuf;
use std::time::Duration;

use reqwest::{header, Certificate, Client, Response};
use secrecy::{ExposeSecret, SecretString};
use serde::{de::DeserializeOwned, Serialize};
use tracing::{debug, error};

use controlplane_api::ErrorResponse;

use crate::errors::AgentError;
use crate::rpc::status::{RpcCode, RpcError};

/// Options to build an [`RpcClient`]
#[derive(Debug, Clone)]
pub struct RpcClientOptions {
    /// `host:port` or a full URL
    pub address: String,
    /// Use plain HTTP instead of TLS when `address` carries no scheme
    pub insecure: bool,
    /// Additional PEM root certificate to trust
    pub cert_file: Option<PathBuf>,
    /// Per-call deadline; `None` leaves calls unbounded
    pub timeout: Option<Duration>,
}

impl Default for RpcClientOptions {
    fn default() -> Self {
        Self {
            address: "localhost:443".to_string(),
            insecure: false,
            cert_file: None,
            timeout: Some(Duration::from_secs(30)),
        }
    }
}

/// Client for `POST {base}/{service}/{method}` JSON calls
#[derive(Clone)]
pub struct RpcClient {
    client: Client,
    base_url: String,
    authorization: Option<SecretString>,
}

impl std::fmt::Debug for RpcClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RpcClient")
            .field("base_url", &self.base_url)
            .finish()
    }
}

impl RpcClient {
    /// Create a new client
    pub fn new(options: &RpcClientOptions) -> Result<Self, AgentError> {
        let mut builder = Client::builder();
        if let Some(timeout) = options.timeout {
            builder = builder.timeout(timeout);
        }
        if let Some(cert_file) = &options.cert_file {
            let pem = std::fs::read(cert_file)?;
            builder = builder.add_root_certificate(Certificate::from_pem(&pem)?);
        }

        Ok(Self {
            client: builder.build()?,
            base_url: base_url(&options.address, options.insecure),
            authorization: None,
        })
    }

    /// Attach the credentials sent as the `authorization` header on every call
    pub fn with_authorization(mut self, value: SecretString) -> Self {
        self.authorization = Some(value);
        self
    }

    /// Get the base URL
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Invoke `service/method` with `req` and decode the response
    pub async fn call<Req, Resp>(
        &self,
        service: &str,
        method: &str,
        req: &Req,
    ) -> Result<Resp, AgentError>
    where
        Req: Serialize + ?Sized,
        Resp: DeserializeOwned,
    {
        let url = format!("{}/{}/{}", self.base_url, service, method);
        debug!("POST {}", url);

        let mut request = self.client.post(&url).json(req);
        if let Some(auth) = &self.authorization {
            request = request.header(header::AUTHORIZATION, auth.expose_secret());
        }

        let response = request.send().await?;
        if !response.status().is_success() {
            let err = error_from_response(response).await;
            error!("RPC {}/{} failed: {}", service, method, err);
            return Err(err.into());
        }

        let body = response.json().await?;
        Ok(body)
    }
}

fn base_url(address: &str, insecure: bool) -> String {
    let address = address.trim_end_matches('/');
    if address.starts_with("http://") || address.starts_with("https://") {
        return address.to_string();
    }
    let scheme = if insecure { "http" } else { "https" };
    format!("{}://{}", scheme, address)
}

async fn error_from_response(response: Response) -> RpcError {
    let status = response.status();
    let body = response.text().await.unwrap_or_default();
    match serde_json::from_str::<ErrorResponse>(&body) {
        Ok(parsed) => RpcError::new(RpcCode::from_name(&parsed.code), parsed.message),
        Err(_) => RpcError::new(RpcCode::from_http_status(status), format!("{}: {}", status, body)),
    }
}
