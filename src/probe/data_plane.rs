//! Data-plane HTTP client

use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue};
use url::Url;

use super::{http_client, snippet, DataPlane, ProbeResponse};
use crate::config::Credential;
use crate::error::{ProbeError, ProbeResult};

/// Header the gateway's key-auth plugin reads the API key from
pub const API_KEY_HEADER: &str = "x-api-key";

/// Sends live requests to the gateway's data plane
pub struct HttpDataPlane {
    base_url: Url,
    client: reqwest::Client,
}

impl HttpDataPlane {
    /// Create a client rooted at `base_url`
    pub fn new(base_url: Url, timeout: Duration) -> ProbeResult<Self> {
        Ok(Self {
            base_url,
            client: http_client(timeout, HeaderMap::new())?,
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url.as_str().trim_end_matches('/'), path)
    }
}

#[async_trait]
impl DataPlane for HttpDataPlane {
    async fn get(&self, path: &str, api_key: Option<&Credential>) -> ProbeResult<ProbeResponse> {
        let url = self.url(path);
        let mut request = self.client.get(&url);
        if let Some(key) = api_key {
            let mut value = HeaderValue::from_str(key.expose()).map_err(|_| {
                ProbeError::Client(format!(
                    "API key {} is not a valid header value",
                    key.fingerprint()
                ))
            })?;
            value.set_sensitive(true);
            request = request.header(API_KEY_HEADER, value);
        }

        let response = request
            .send()
            .await
            .map_err(|e| ProbeError::transport(&url, &e))?;

        let status = response.status().as_u16();
        let headers: BTreeMap<String, String> = response
            .headers()
            .iter()
            .map(|(name, value)| {
                (
                    name.as_str().to_string(),
                    String::from_utf8_lossy(value.as_bytes()).into_owned(),
                )
            })
            .collect();
        let text = response
            .text()
            .await
            .map_err(|e| ProbeError::transport(&url, &e))?;

        Ok(ProbeResponse {
            status,
            headers,
            body: serde_json::from_str(&text).ok(),
            body_snippet: snippet(&text),
        })
    }
}
