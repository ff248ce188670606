use reqwest::header::{ACCEPT, AUTHORIZATION, CONTENT_TYPE};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::{debug, warn};

use crate::error::{AuthError, Result};
use crate::settings::Settings;
use crate::token::AccessToken;

const JSON: &str = "application/json";

/// Status and decoded body of an API call. Bodies that are not JSON are kept
/// as a JSON string.
#[derive(Debug, Clone, PartialEq)]
pub struct ApiResponse {
    pub status: u16,
    pub body: Value,
}

impl ApiResponse {
    pub fn is_success(&self) -> bool {
        self.status < 400
    }
}

/// Profile returned by the identity provider's `/userinfo` endpoint.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UserInfo {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sub: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub picture: Option<String>,
    #[serde(flatten)]
    pub other: Map<String, Value>,
}

/// Issues bearer-authenticated JSON requests against the configured API
/// audience.
#[derive(Clone)]
pub struct ApiClient {
    http_client: reqwest::Client,
    settings: Settings,
    token: AccessToken,
}

impl ApiClient {
    pub fn new(settings: Settings, token: AccessToken) -> Self {
        Self::with_client(reqwest::Client::new(), settings, token)
    }

    pub fn with_client(
        http_client: reqwest::Client,
        settings: Settings,
        token: AccessToken,
    ) -> Self {
        Self {
            http_client,
            settings,
            token,
        }
    }

    pub fn token(&self) -> &AccessToken {
        &self.token
    }

    /// Absolute URLs pass through; anything else is appended to the API
    /// audience.
    pub fn resolve_url(&self, path_or_url: &str) -> String {
        if path_or_url.starts_with("http://") || path_or_url.starts_with("https://") {
            return path_or_url.to_string();
        }
        let base = self.settings.api_audience.trim_end_matches('/');
        if path_or_url.starts_with('/') {
            format!("{base}{path_or_url}")
        } else {
            format!("{base}/{path_or_url}")
        }
    }

    pub async fn get(&self, path_or_url: &str, strict: bool) -> Result<ApiResponse> {
        self.call(path_or_url, None, strict).await
    }

    pub async fn post(&self, path_or_url: &str, data: &Value, strict: bool) -> Result<ApiResponse> {
        self.call(path_or_url, Some(data), strict).await
    }

    /// GET when `data` is `None`, POST with a JSON body otherwise. Error
    /// statuses are logged and returned unless `strict` is set, in which case
    /// they become [`AuthError::UpstreamApi`].
    pub async fn call(
        &self,
        path_or_url: &str,
        data: Option<&Value>,
        strict: bool,
    ) -> Result<ApiResponse> {
        let url = self.resolve_url(path_or_url);
        let request = match data {
            Some(body) => self.http_client.post(&url).json(body),
            None => self.http_client.get(&url),
        };
        debug!(url = %url, post = data.is_some(), "Calling API");
        self.send(request, strict).await
    }

    /// Fetch the signed-in user's profile from the identity provider.
    pub async fn userinfo(&self) -> Result<UserInfo> {
        let response = self.get(&self.settings.userinfo_endpoint(), true).await?;
        serde_json::from_value(response.body)
            .map_err(|e| AuthError::InvalidPayload(format!("Failed to parse user info: {e}")))
    }

    async fn send(&self, request: reqwest::RequestBuilder, strict: bool) -> Result<ApiResponse> {
        let response = request
            .header(ACCEPT, JSON)
            .header(CONTENT_TYPE, JSON)
            .header(AUTHORIZATION, self.token.authorization_header())
            .send()
            .await?;

        let status = response.status();
        let text = response.text().await?;

        if status.is_client_error() || status.is_server_error() {
            warn!(status = status.as_u16(), "API request failed: {}", text);
            if strict {
                return Err(AuthError::UpstreamApi {
                    status: status.as_u16(),
                    body: text,
                });
            }
        }

        let body = serde_json::from_str(&text).unwrap_or(Value::String(text));
        Ok(ApiResponse {
            status: status.as_u16(),
            body,
        })
    }
}
