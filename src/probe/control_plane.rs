//! Control-plane admin API client

use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, AUTHORIZATION};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use tokio::sync::OnceCell;
use tracing::debug;
use url::Url;

use super::{http_client, Consumer, ControlPlane, Plugin};
use crate::config::{Credential, GatewayCredentialSet};
use crate::error::{ProbeError, ProbeResult};

/// Page size requested from entity listings
const PAGE_SIZE: usize = 1000;

/// Upper bound on pages followed for one listing
const MAX_PAGES: usize = 50;

/// Client for a Konnect-hosted control plane.
///
/// The control plane is addressed by name; its id is resolved on first use
/// and cached for the rest of the run.
pub struct KonnectClient {
    api_base: Url,
    control_plane_name: String,
    client: reqwest::Client,
    control_plane_id: OnceCell<String>,
}

#[derive(Debug, Deserialize)]
struct Page<T> {
    #[serde(default = "Vec::new")]
    data: Vec<T>,
    #[serde(default)]
    offset: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ControlPlaneSummary {
    id: String,
    #[serde(default)]
    name: String,
}

impl KonnectClient {
    /// Create a client for the control plane named `control_plane_name`.
    pub fn new(
        api_base: Url,
        token: &Credential,
        control_plane_name: impl Into<String>,
        timeout: Duration,
    ) -> ProbeResult<Self> {
        let mut bearer = HeaderValue::from_str(&format!("Bearer {}", token.expose()))
            .map_err(|_| ProbeError::Client("control-plane token is not a valid header value".to_string()))?;
        bearer.set_sensitive(true);

        let mut headers = HeaderMap::new();
        headers.insert(AUTHORIZATION, bearer);
        headers.insert(ACCEPT, HeaderValue::from_static("application/json"));

        Ok(Self {
            api_base,
            control_plane_name: control_plane_name.into(),
            client: http_client(timeout, headers)?,
            control_plane_id: OnceCell::new(),
        })
    }

    /// Create a client from the run's credential set
    pub fn from_credentials(creds: &GatewayCredentialSet, timeout: Duration) -> ProbeResult<Self> {
        Self::new(
            creds.control_plane_api_base.clone(),
            &creds.control_plane_token,
            creds.control_plane_name.clone(),
            timeout,
        )
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.api_base.as_str().trim_end_matches('/'), path)
    }

    async fn get_json<T: DeserializeOwned>(&self, url: &str, query: &[(&str, String)]) -> ProbeResult<T> {
        let response = self
            .client
            .get(url)
            .query(query)
            .send()
            .await
            .map_err(|e| ProbeError::transport(url, &e))?;

        let status = response.status();
        if !status.is_success() {
            return Err(ProbeError::Status {
                url: url.to_string(),
                status: status.as_u16(),
            });
        }

        let body = response
            .text()
            .await
            .map_err(|e| ProbeError::transport(url, &e))?;
        serde_json::from_str(&body).map_err(|e| ProbeError::malformed(url, e.to_string()))
    }

    async fn resolve_control_plane_id(&self) -> ProbeResult<&str> {
        let id = self
            .control_plane_id
            .get_or_try_init(|| async {
                let url = self.url("/v2/control-planes");
                let page: Page<ControlPlaneSummary> = self.get_json(&url, &[]).await?;
                let found = page
                    .data
                    .into_iter()
                    .find(|cp| cp.name == self.control_plane_name)
                    .ok_or_else(|| ProbeError::ControlPlaneNotFound {
                        name: self.control_plane_name.clone(),
                    })?;
                debug!(
                    control_plane = %self.control_plane_name,
                    control_plane_id = %found.id,
                    "Resolved control plane"
                );
                Ok::<_, ProbeError>(found.id)
            })
            .await?;
        Ok(id.as_str())
    }

    async fn list<T: DeserializeOwned>(&self, entity: &str) -> ProbeResult<Vec<T>> {
        let cp_id = self.resolve_control_plane_id().await?;
        let url = self.url(&format!("/v2/control-planes/{cp_id}/core-entities/{entity}"));

        let mut items = Vec::new();
        let mut offset: Option<String> = None;
        for _ in 0..MAX_PAGES {
            let mut query = vec![("size", PAGE_SIZE.to_string())];
            if let Some(ref o) = offset {
                query.push(("offset", o.clone()));
            }
            let page: Page<T> = self.get_json(&url, &query).await?;
            items.extend(page.data);
            match page.offset.filter(|o| !o.is_empty()) {
                Some(next) => offset = Some(next),
                None => {
                    debug!(entity, count = items.len(), "Listed control-plane entities");
                    return Ok(items);
                }
            }
        }

        Err(ProbeError::TooManyPages {
            url,
            pages: MAX_PAGES,
        })
    }
}

#[async_trait]
impl ControlPlane for KonnectClient {
    async fn plugins(&self) -> ProbeResult<Vec<Plugin>> {
        self.list("plugins").await
    }

    async fn consumers(&self) -> ProbeResult<Vec<Consumer>> {
        self.list("consumers").await
    }
}
