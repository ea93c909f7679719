//! Cloudflare Pages deployments API client.

use async_trait::async_trait;
use log::debug;
use reqwest::{Client, Url};
use secrecy::{ExposeSecret, SecretString};
use serde::de::DeserializeOwned;
use serde::Deserialize;

use super::{Deployment, HostingApi};
use crate::error::{ConfigError, Result, SyncError};
use crate::repository::github::create_http_client;
use crate::sanitize::redact_url;

#[derive(Debug, Deserialize)]
struct ApiMessage {
    #[serde(default)]
    code: i64,
    #[serde(default)]
    message: String,
}

/// Response envelope shared by every endpoint.
#[derive(Debug, Deserialize)]
struct Envelope<T> {
    success: bool,
    #[serde(default)]
    errors: Vec<ApiMessage>,
    result: Option<T>,
}

impl<T> Envelope<T> {
    fn into_result(self, context: &str) -> Result<T> {
        if !self.success {
            let detail = self
                .errors
                .iter()
                .map(|e| format!("{} ({})", e.message, e.code))
                .collect::<Vec<_>>()
                .join("; ");
            return Err(SyncError::Parse(format!(
                "{} was not successful: {}",
                context, detail
            )));
        }
        self.result
            .ok_or_else(|| SyncError::Parse(format!("{} returned no result", context)))
    }
}

pub struct PagesClient {
    client: Client,
    api_url: String,
    account_id: String,
    token: SecretString,
}

impl PagesClient {
    pub fn new(
        api_url: &str,
        account_id: &str,
        token: SecretString,
    ) -> std::result::Result<Self, ConfigError> {
        Url::parse(api_url).map_err(|e| ConfigError::Validation {
            message: format!("Invalid hosting API URL '{}': {}", redact_url(api_url), e),
        })?;

        Ok(Self {
            client: create_http_client()?,
            api_url: api_url.trim_end_matches('/').to_string(),
            account_id: account_id.to_string(),
            token,
        })
    }

    fn deployments_url(&self, project: &str, id: Option<&str>) -> Result<Url> {
        let mut url = Url::parse(&self.api_url)
            .map_err(|e| SyncError::InvalidRequest(format!("Invalid API URL: {}", e)))?;
        {
            let mut path = url
                .path_segments_mut()
                .map_err(|_| SyncError::InvalidRequest("API URL cannot be a base".to_string()))?;
            path.pop_if_empty()
                .extend(["accounts", self.account_id.as_str(), "pages", "projects", project])
                .push("deployments");
            if let Some(id) = id {
                path.push(id);
            }
        }
        Ok(url)
    }

    async fn get_json<T: DeserializeOwned>(&self, url: Url, context: &str) -> Result<T> {
        debug!("GET {}", redact_url(url.as_str()));
        let response = self
            .client
            .get(url)
            .bearer_auth(self.token.expose_secret())
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            return Err(SyncError::from_status(status, &body, context, ""));
        }

        let envelope: Envelope<T> = response.json().await?;
        envelope.into_result(context)
    }
}

#[async_trait]
impl HostingApi for PagesClient {
    async fn list_deployments(&self, project: &str, limit: usize) -> Result<Vec<Deployment>> {
        let mut url = self.deployments_url(project, None)?;
        url.query_pairs_mut()
            .append_pair("per_page", &limit.max(1).to_string());
        self.get_json(url, "list deployments").await
    }

    async fn get_deployment(&self, project: &str, id: &str) -> Result<Deployment> {
        let url = self.deployments_url(project, Some(id))?;
        self.get_json(url, "get deployment").await
    }
}
