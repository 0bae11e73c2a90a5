//! HTTP connector for the driver client.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::CONTENT_TYPE;
use reqwest::{Certificate, Client};
use tracing::debug;

use super::connection::{DriverConnection, DriverConnector};
use crate::config::DriverConfig;
use crate::error::{Code, Error, Result, Status};
use crate::types::{Metadata, Request, Response, RpcRequest, RpcResponse};

/// Connects to a broker served by [`crate::server::http`].
#[derive(Debug, Clone)]
pub struct HttpConnector {
    address: String,
    root_certificates: Vec<Vec<u8>>,
    timeout: Option<Duration>,
}

impl HttpConnector {
    /// Targets `address`, either `host:port` or a full base URL.
    pub fn new(address: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            root_certificates: Vec::new(),
            timeout: None,
        }
    }

    /// Builds a connector from driver configuration, reading the root
    /// certificate file if one is configured.
    pub fn from_config(config: &DriverConfig) -> Result<Self> {
        let mut connector = Self::new(config.address.clone());
        if let Some(path) = &config.root_certificates {
            connector = connector.with_root_certificate(std::fs::read(path)?);
        }
        if let Some(secs) = config.timeout_secs {
            connector = connector.with_timeout(Duration::from_secs(secs));
        }
        Ok(connector)
    }

    /// Trusts an additional PEM root certificate and switches to HTTPS.
    pub fn with_root_certificate(mut self, pem: Vec<u8>) -> Self {
        self.root_certificates.push(pem);
        self
    }

    /// Bounds every request.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// The base URL requests are sent to.
    pub fn base_url(&self) -> String {
        if self.address.contains("://") {
            return self.address.trim_end_matches('/').to_string();
        }
        let scheme = if self.root_certificates.is_empty() {
            "http"
        } else {
            "https"
        };
        format!("{scheme}://{}", self.address)
    }
}

/// Connection produced by [`HttpConnector`].
#[derive(Debug, Clone)]
pub struct HttpConnection {
    client: Client,
    base_url: String,
}

#[async_trait]
impl DriverConnector for HttpConnector {
    type Connection = HttpConnection;

    async fn connect(&self) -> Result<HttpConnection> {
        let mut builder = Client::builder();
        if !self.root_certificates.is_empty() {
            let mut certificates = Vec::new();
            for pem in &self.root_certificates {
                let bundle = Certificate::from_pem_bundle(pem)
                    .map_err(|e| Error::Configuration(format!("invalid root certificate: {e}")))?;
                if bundle.is_empty() {
                    return Err(Error::Configuration(
                        "root certificate file holds no certificates".into(),
                    ));
                }
                certificates.extend(bundle);
            }
            builder = builder.tls_certs_merge(certificates);
        }
        if let Some(timeout) = self.timeout {
            builder = builder.timeout(timeout);
        }
        let client = builder
            .build()
            .map_err(|e| Error::Configuration(format!("cannot build http client: {e}")))?;
        let base_url = self.base_url();
        debug!(%base_url, "Opened http connection");
        Ok(HttpConnection { client, base_url })
    }
}

#[async_trait]
impl DriverConnection for HttpConnection {
    async fn call(&self, request: Request<RpcRequest>) -> Result<Response<RpcResponse>> {
        let (metadata, message) = request.into_parts();
        let kind = message.kind();
        let body = message.to_canonical_bytes()?;

        let mut builder = self
            .client
            .post(format!("{}{}", self.base_url, kind.path()))
            .header(CONTENT_TYPE, "application/json")
            .body(body);
        for (name, value) in metadata.iter() {
            builder = builder.header(name, value);
        }

        let response = builder
            .send()
            .await
            .map_err(|e| Error::Transport(format!("{kind}: {e}")))?;
        let status = response.status();
        let metadata: Metadata = response
            .headers()
            .iter()
            .filter_map(|(name, value)| Some((name.as_str(), value.to_str().ok()?)))
            .collect();
        let bytes = response
            .bytes()
            .await
            .map_err(|e| Error::Transport(format!("{kind}: {e}")))?;

        if !status.is_success() {
            let status = serde_json::from_slice::<Status>(&bytes).unwrap_or_else(|_| {
                Status::new(
                    Code::from_http_status(status),
                    String::from_utf8_lossy(&bytes),
                )
            });
            return Err(Error::Status(status));
        }

        let message = RpcResponse::from_json(kind, &bytes)?;
        Ok(Response::new(message).with_metadata(metadata))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn base_url_follows_tls_settings() {
        assert_eq!(HttpConnector::new("[::]:9091").base_url(), "http://[::]:9091");
        assert_eq!(
            HttpConnector::new("broker:9091")
                .with_root_certificate(b"pem".to_vec())
                .base_url(),
            "https://broker:9091"
        );
        assert_eq!(
            HttpConnector::new("http://127.0.0.1:80/").base_url(),
            "http://127.0.0.1:80"
        );
    }

    #[tokio::test]
    async fn invalid_certificate_is_a_configuration_error() {
        let connector = HttpConnector::new("broker:9091").with_root_certificate(b"garbage".to_vec());
        let err = connector.connect().await.unwrap_err();
        assert!(matches!(err, Error::Configuration(_)));
    }

    #[tokio::test]
    async fn unreachable_broker_is_unavailable() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let address = listener.local_addr().unwrap().to_string();
        drop(listener);

        let connection = HttpConnector::new(address).connect().await.unwrap();
        let err = connection
            .call(Request::new(RpcRequest::from(crate::types::CreateRunRequest {})))
            .await
            .unwrap_err();
        assert_eq!(err.code(), Code::Unavailable);
    }
}
