//! HTTP seams: request signing, engine transport, and object-store reads.
//!
//! The signing algorithm lives outside this crate. Hosts plug it in through
//! [`RequestSigner`]; everything above this module talks to [`SignAndSend`]
//! and [`ObjectFetcher`] only.

use reqwest::header::{HeaderMap, HeaderValue};
use reqwest::{Client, Method, StatusCode};

use crate::config::Credentials;
use crate::models::{AthenaError, Result};

/// One outbound request, before signing.
#[derive(Debug, Clone)]
pub struct EngineRequest {
    pub method: Method,
    pub url: String,
    pub headers: HeaderMap,
    pub body: Vec<u8>,
}

impl EngineRequest {
    pub fn get(url: impl Into<String>) -> Self {
        Self {
            method: Method::GET,
            url: url.into(),
            headers: HeaderMap::new(),
            body: Vec::new(),
        }
    }

    pub fn post(url: impl Into<String>, body: Vec<u8>) -> Self {
        Self {
            method: Method::POST,
            url: url.into(),
            headers: HeaderMap::new(),
            body,
        }
    }

    pub fn with_header(mut self, name: &'static str, value: &str) -> Result<Self> {
        let value = HeaderValue::from_str(value)
            .map_err(|e| AthenaError::Configuration(format!("invalid {} header: {}", name, e)))?;
        self.headers.insert(name, value);
        Ok(self)
    }
}

#[derive(Debug, Clone)]
pub struct EngineResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Vec<u8>,
}

impl EngineResponse {
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }

    /// Turns any non-success status into [`AthenaError::Transport`].
    pub fn error_for_status(self) -> Result<Self> {
        if self.status.is_success() {
            return Ok(self);
        }
        Err(AthenaError::Transport {
            status: self.status.as_u16(),
            body: self.text(),
        })
    }
}

/// Signs and sends a request, returning the raw response whatever its status.
#[allow(async_fn_in_trait)]
pub trait SignAndSend {
    async fn sign_and_send(
        &self,
        request: EngineRequest,
        credentials: &Credentials,
    ) -> Result<EngineResponse>;
}

impl<T: SignAndSend + ?Sized> SignAndSend for &T {
    async fn sign_and_send(
        &self,
        request: EngineRequest,
        credentials: &Credentials,
    ) -> Result<EngineResponse> {
        (**self).sign_and_send(request, credentials).await
    }
}

/// Adds authentication to a built request.
pub trait RequestSigner: Send + Sync {
    fn sign(&self, request: &mut reqwest::Request, credentials: &Credentials) -> Result<()>;
}

/// Sends requests as built. Useful behind an authenticating proxy.
#[derive(Debug, Clone, Default)]
pub struct UnsignedRequests;

impl RequestSigner for UnsignedRequests {
    fn sign(&self, _request: &mut reqwest::Request, _credentials: &Credentials) -> Result<()> {
        Ok(())
    }
}

/// [`SignAndSend`] over a reqwest client.
#[derive(Debug, Clone)]
pub struct HttpTransport<S> {
    http_client: Client,
    signer: S,
}

impl<S: RequestSigner> HttpTransport<S> {
    pub fn new(signer: S) -> Self {
        Self {
            http_client: Client::new(),
            signer,
        }
    }

    pub fn with_client(http_client: Client, signer: S) -> Self {
        Self {
            http_client,
            signer,
        }
    }
}

impl<S: RequestSigner> SignAndSend for HttpTransport<S> {
    async fn sign_and_send(
        &self,
        request: EngineRequest,
        credentials: &Credentials,
    ) -> Result<EngineResponse> {
        let mut built = self
            .http_client
            .request(request.method, &request.url)
            .headers(request.headers)
            .body(request.body)
            .build()?;
        self.signer.sign(&mut built, credentials)?;

        let resp = self.http_client.execute(built).await?;
        let status = resp.status();
        let headers = resp.headers().clone();
        let body = resp.bytes().await?.to_vec();
        log::debug!("[HTTP] {} status={} bytes={}", request.url, status, body.len());

        Ok(EngineResponse {
            status,
            headers,
            body,
        })
    }
}

/// Reads one object by absolute URL.
#[allow(async_fn_in_trait)]
pub trait ObjectFetcher {
    async fn fetch_object(&self, url: &str) -> Result<Vec<u8>>;
}

/// Fetches `s3://` objects through a signing transport and `https://` URLs
/// (presigned) with a plain client, so no credentials are attached to them.
#[derive(Debug, Clone)]
pub struct HttpObjectFetcher<T> {
    transport: T,
    credentials: Credentials,
    region: String,
    http_client: Client,
}

impl<T: SignAndSend> HttpObjectFetcher<T> {
    pub fn new(transport: T, credentials: Credentials, region: impl Into<String>) -> Self {
        Self {
            transport,
            credentials,
            region: region.into(),
            http_client: Client::new(),
        }
    }
}

impl<T: SignAndSend> ObjectFetcher for HttpObjectFetcher<T> {
    async fn fetch_object(&self, url: &str) -> Result<Vec<u8>> {
        log::debug!("[FETCH] {}", url);
        if url.starts_with("https://") || url.starts_with("http://") {
            let resp = self.http_client.get(url).send().await?;
            let status = resp.status();
            let body = resp.bytes().await?;
            if !status.is_success() {
                return Err(AthenaError::Transport {
                    status: status.as_u16(),
                    body: String::from_utf8_lossy(&body).into_owned(),
                });
            }
            return Ok(body.to_vec());
        }

        let request = EngineRequest::get(s3_https_url(url, &self.region)?);
        let resp = self
            .transport
            .sign_and_send(request, &self.credentials)
            .await?
            .error_for_status()?;
        Ok(resp.body)
    }
}

/// Maps `s3://bucket/key` to the regional virtual-hosted HTTPS URL.
pub fn s3_https_url(url: &str, region: &str) -> Result<String> {
    let rest = url
        .strip_prefix("s3://")
        .ok_or_else(|| AthenaError::Configuration(format!("unsupported object URL: {}", url)))?;
    match rest.split_once('/') {
        Some((bucket, key)) if !bucket.is_empty() && !key.is_empty() => Ok(format!(
            "https://{}.s3.{}.amazonaws.com/{}",
            bucket, region, key
        )),
        _ => Err(AthenaError::Configuration(format!(
            "object URL has no key: {}",
            url
        ))),
    }
}
